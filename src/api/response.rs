//! API response structures

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One answer pulled from a run, either a streamed fragment or the whole
/// buffered reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunAnswer {
    pub request_id: String,
    pub date: String,
    /// Answer text; a fragment when streaming
    pub answer: String,
    pub conversation_id: String,
    pub message_id: String,
    /// Set on the last answer of a run
    pub is_completion: bool,
    /// Structured events produced while answering
    pub content: Vec<AnswerEvent>,
}

impl RunAnswer {
    /// Tool calls requested by the app across all events of this answer
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content
            .iter()
            .filter_map(|event| event.tool_calls.as_deref())
            .flatten()
    }

    pub fn is_final(&self) -> bool {
        self.is_completion
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerEvent {
    pub event_code: i64,
    pub event_message: String,
    /// Stage that produced the event, e.g. `Reasoning` or `ChatAgent`
    pub event_type: String,
    pub event_id: String,
    /// `preparing`, `running`, `error` or `done`
    pub event_status: String,
    /// `text`, `code`, `image`, `rag`, `function_call`, ...
    pub content_type: String,
    /// Payload whose shape depends on `content_type`
    pub outputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Model that consumed the tokens
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

pub(crate) fn default_tool_type() -> String {
    "function".to_string()
}

/// A hosted application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "appType")]
    pub app_type: String,
    #[serde(rename = "isPublished")]
    pub is_published: bool,
    /// Unix timestamp of the last change
    #[serde(rename = "updateTime")]
    pub update_time: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GetAppListResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub data: Vec<App>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DescribeAppsResponse {
    #[serde(rename = "requestId", alias = "RequestId")]
    pub request_id: String,
    #[serde(alias = "Data")]
    pub data: Vec<App>,
    #[serde(rename = "Marker")]
    pub marker: String,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "NextMarker")]
    pub next_marker: String,
    #[serde(rename = "MaxKeys")]
    pub max_keys: u32,
}

/// Error envelope the service returns instead of an answer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ServerErrorBody {
    #[serde(default)]
    pub request_id: String,
    pub code: Value,
    pub message: String,
}

impl ServerErrorBody {
    pub(crate) fn code_text(&self) -> String {
        match &self.code {
            Value::String(code) => code.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_answer_decodes_events() {
        let json = r#"{
            "request_id": "r1",
            "date": "2024-06-01T10:00:00Z",
            "answer": "hi",
            "conversation_id": "c1",
            "message_id": "m1",
            "is_completion": true,
            "content": [{
                "event_code": 0,
                "event_type": "FunctionCall",
                "event_status": "done",
                "content_type": "function_call",
                "outputs": {"text": "calling"},
                "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7, "name": "ernie"},
                "tool_calls": [{"id": "t1", "type": "function", "function": {"name": "weather", "arguments": {"city": "Beijing"}}}]
            }]
        }"#;

        let answer: RunAnswer = serde_json::from_str(json).unwrap();
        assert!(answer.is_final());
        assert_eq!(answer.content[0].usage.as_ref().unwrap().total_tokens, 7);

        let calls: Vec<_> = answer.tool_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "weather");
        assert_eq!(calls[0].function.arguments["city"], "Beijing");
    }

    #[test]
    fn test_partial_answer_defaults() {
        let answer: RunAnswer = serde_json::from_str(r#"{"answer":"a"}"#).unwrap();
        assert_eq!(answer.answer, "a");
        assert!(!answer.is_completion);
        assert!(answer.content.is_empty());
    }

    #[test]
    fn test_error_body_is_strict() {
        let err: ServerErrorBody =
            serde_json::from_str(r#"{"code":400,"message":"bad"}"#).unwrap();
        assert_eq!(err.code_text(), "400");

        assert!(serde_json::from_str::<ServerErrorBody>(
            r#"{"code":0,"message":"","answer":"x"}"#
        )
        .is_err());
    }

    #[test]
    fn test_app_field_names() {
        let app: App = serde_json::from_str(
            r#"{"id":"a1","name":"n","appType":"chat","isPublished":true,"updateTime":1700000000}"#,
        )
        .unwrap();
        assert_eq!(app.app_type, "chat");
        assert!(app.is_published);
        assert_eq!(app.update_time, 1_700_000_000);
    }
}
