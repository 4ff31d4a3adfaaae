//! Structured response envelope.

use crate::error::ToolError;
use rmcp::model::{CallToolResult, Content};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Exactly one of these is produced per dispatched call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error: None,
            error_code: None,
        }
    }

    pub fn failure(tool: &str, err: &ToolError) -> Self {
        Self {
            success: false,
            message: format!("{tool} failed"),
            data: Value::Null,
            error: Some(err.to_string()),
            error_code: Some(err.code().to_string()),
        }
    }

    /// Error code, if this envelope reports a failure.
    pub fn code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    /// Render for MCP: the envelope as pretty JSON text, `is_error` on failure.
    pub fn into_tool_result(self) -> CallToolResult {
        let text = serde_json::to_string_pretty(&self).unwrap_or_else(|_| format!("{:?}", self));
        if self.success {
            CallToolResult::success(vec![Content::text(text)])
        } else {
            CallToolResult::error(vec![Content::text(text)])
        }
    }
}
