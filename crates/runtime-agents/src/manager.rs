// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use runtime_eventbus::{Event, EventBus};
use runtime_tools::Tool;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::agent::{Agent, Team};

#[derive(Debug, Error)]
pub enum AgentManagerError {
    #[error("agent not found: {0}")]
    NotFound(String),
}

/// Stateful wrapper over a [`Team`]: tracks the active agent and exposes the
/// lookups and event-emitting helpers the Runtime Loop drives a turn with.
pub struct AgentManager {
    team: Arc<Team>,
    current_agent: Mutex<String>,
    requested_agent: Mutex<Option<String>>,
}

impl AgentManager {
    pub fn new(team: Arc<Team>) -> Self {
        AgentManager {
            team,
            current_agent: Mutex::new("root".to_string()),
            requested_agent: Mutex::new(None),
        }
    }

    pub async fn set_current_agent(&self, name: &str) -> Result<(), AgentManagerError> {
        if self.team.get(name).is_none() {
            return Err(AgentManagerError::NotFound(name.to_string()));
        }
        *self.current_agent.lock().await = name.to_string();
        Ok(())
    }

    pub async fn current_agent_name(&self) -> String {
        self.current_agent.lock().await.clone()
    }

    pub async fn current_agent(&self) -> Option<Arc<Agent>> {
        let name = self.current_agent_name().await;
        self.team.get(&name)
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.team.names().to_vec()
    }

    pub fn agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.team.get(name)
    }

    pub async fn set_requested_agent(&self, name: Option<String>) {
        *self.requested_agent.lock().await = name;
    }

    pub async fn requested_agent(&self) -> Option<String> {
        self.requested_agent.lock().await.clone()
    }

    pub fn team(&self) -> Arc<Team> {
        self.team.clone()
    }

    /// Resolves the tools available to `agent`, bracketed by
    /// `MCPInitStarted`/`MCPInitFinished` events when it has any toolsets.
    pub async fn get_tools(&self, agent: &Agent, bus: &EventBus) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        if agent.toolsets.is_empty() {
            return Ok(Vec::new());
        }
        bus.publish(Event::McpInitStarted).await;
        let tools = agent.tools().await?;
        bus.publish(Event::McpInitFinished).await;
        Ok(tools)
    }

    pub async fn emit_agent_warnings(&self, agent: &Agent, bus: &EventBus) {
        for warning in agent.drain_warnings().await {
            bus.publish(Event::Warning { message: warning }).await;
        }
    }

    pub async fn emit_agent_info(&self, agent: &Agent, bus: &EventBus) {
        bus.publish(Event::AgentInfo { name: agent.name.clone() }).await;
    }

    pub async fn emit_team_info(&self, bus: &EventBus) {
        bus.publish(Event::TeamInfo {
            agent_names: self.agent_names(),
        })
        .await;
    }

    pub async fn emit_toolset_info(&self, tools: &[Arc<dyn Tool>], bus: &EventBus) {
        bus.publish(Event::ToolsetInfo {
            tool_names: tools.iter().map(|t| t.name().to_string()).collect(),
        })
        .await;
    }
}
