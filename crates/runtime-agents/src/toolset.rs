// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use async_trait::async_trait;
use runtime_tools::Tool;

/// A callback a toolset invokes when one of its tools must interrogate the
/// user mid-execution. Kept as a plain closure type here (rather than a
/// dependency on `runtime-elicit`) because the Agent Manager and the
/// Elicitation Broker are siblings in the dependency order, not one atop the
/// other — the Runtime Loop is what wires a real broker into this slot.
pub type ElicitationHandler =
    Arc<dyn Fn(String, String) -> futures::future::BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Inbound dependency: a supplier of tools and (for MCP-backed toolsets)
/// prompts. Concrete transports (shell, filesystem, MCP clients) live
/// outside this crate; only the trait boundary is defined here.
#[async_trait]
pub trait Toolset: Send + Sync {
    async fn tools(&self) -> anyhow::Result<Vec<Arc<dyn Tool>>>;

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn set_elicitation_handler(&self, _handler: ElicitationHandler) {}

    fn set_managed_oauth(&self, _enabled: bool) {}

    async fn list_prompts(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
