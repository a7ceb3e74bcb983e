//! Approval decisions for confirm mode.

use std::sync::Arc;

use serde_json::Value;

use crate::chat::ToolCall;

/// A caller's decision about one pending tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolApproval {
    /// Execute as requested.
    Approve,
    /// Skip it; the reason is reported to the model as an error result.
    Deny(String),
    /// Execute with replacement arguments. They are validated again.
    Modify(Value),
}

/// Callback deciding tool calls when a confirm-mode turn runs unattended.
pub type ToolApprovalFn = Arc<dyn Fn(&ToolCall) -> ToolApproval + Send + Sync>;
