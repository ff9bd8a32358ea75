// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
mod mock;
mod provider;
mod types;

pub use mock::{MockProvider, ScriptedTurn};
pub use provider::{
    resolve_api_key, resolve_base_url, ModelError, ModelProvider, ModelRef, ProviderRegistry,
    ResponseStream,
};
pub use types::{
    CompletionRequest, FinishReason, FunctionCall, Message, MessageContent, ResponseEvent, Role,
    ToolSchema, Usage,
};
