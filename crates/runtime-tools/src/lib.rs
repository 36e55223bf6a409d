// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

pub mod policy;
pub mod registry;
pub mod tool;

pub use policy::ToolPermissions;
pub use registry::ToolRegistry;
pub use tool::{OutputCategory, Tool, ToolAnnotations, ToolOutput, ToolOutputPart};
pub use runtime_model::{FunctionCall, ToolCall};
