// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0

pub mod cancel;
pub mod compact;
pub mod error;
pub mod executor;
pub mod runtime;
pub mod stream;
pub mod trim;

pub use cancel::{CancelHandle, CancelToken};
pub use compact::{compact_session, emergency_compact, DEFAULT_EMERGENCY_KEEP_N};
pub use error::RuntimeError;
pub use executor::{DelegationHandler, ResumeDecision, ToolExecutor};
pub use runtime::{RuntimeLoop, RuntimeOptions};
pub use stream::{classify_stream_error, process_stream, StreamResult};
pub use trim::{build_prompt_messages, clear_stale_tool_output, DEFAULT_MAX_MESSAGES};
