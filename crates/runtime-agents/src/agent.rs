// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use runtime_model::ModelProvider;
use runtime_tools::Tool;
use tokio::sync::Mutex;

use crate::toolset::Toolset;

/// A named, polymorphic actor: a system prompt, a model binding, an ordered
/// list of toolsets, optional sub-agents for delegation, an iteration
/// budget, and a one-shot warning queue drained once per turn.
pub struct Agent {
    pub name: String,
    pub system_prompt: String,
    pub model: Arc<dyn ModelProvider>,
    pub toolsets: Vec<Arc<dyn Toolset>>,
    pub sub_agents: Vec<String>,
    pub max_iterations: usize,
    pub welcome_message: Option<String>,
    pub commands: HashMap<String, String>,
    warnings: Mutex<VecDeque<String>>,
}

impl Agent {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, model: Arc<dyn ModelProvider>) -> Self {
        Agent {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model,
            toolsets: Vec::new(),
            sub_agents: Vec::new(),
            max_iterations: 0,
            welcome_message: None,
            commands: HashMap::new(),
            warnings: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_toolset(mut self, toolset: Arc<dyn Toolset>) -> Self {
        self.toolsets.push(toolset);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub async fn push_warning(&self, warning: impl Into<String>) {
        self.warnings.lock().await.push_back(warning.into());
    }

    /// Drains the warning queue; each warning is surfaced exactly once.
    pub async fn drain_warnings(&self) -> Vec<String> {
        let mut queue = self.warnings.lock().await;
        queue.drain(..).collect()
    }

    /// Aggregates tools across every toolset bound to this agent.
    pub async fn tools(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        let mut all = Vec::new();
        for toolset in &self.toolsets {
            all.extend(toolset.tools().await?);
        }
        Ok(all)
    }

    pub async fn stop_toolsets(&self) -> anyhow::Result<()> {
        for toolset in &self.toolsets {
            toolset.stop().await?;
        }
        Ok(())
    }
}

/// An insertion-ordered mapping from agent name to [`Agent`], with a
/// distinguished root (`"root"`).
#[derive(Default)]
pub struct Team {
    order: Vec<String>,
    agents: HashMap<String, Arc<Agent>>,
}

impl Team {
    pub fn new() -> Self {
        Team::default()
    }

    pub fn insert(&mut self, agent: Agent) {
        let name = agent.name.clone();
        if !self.agents.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.agents.insert(name, Arc::new(agent));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn root(&self) -> Option<Arc<Agent>> {
        self.get("root")
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub async fn stop_all_toolsets(&self) -> anyhow::Result<()> {
        for agent in self.agents.values() {
            agent.stop_toolsets().await?;
        }
        Ok(())
    }
}
