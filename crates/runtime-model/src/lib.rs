// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

pub mod catalog;
pub mod mock;
pub mod provider;
pub mod types;

pub use catalog::{InputModality, ModelCatalogEntry, ModelCostDescriptor};
pub use mock::{EchoMockProvider, ScriptedMockProvider};
pub use provider::{CloneOptions, ModelProvider, ResponseStream};
pub use types::{
    CompletionRequest, ContentPart, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    ToolCall, ToolCallDelta, ToolContentPart, ToolResultContent, ToolSchema, Usage,
};
