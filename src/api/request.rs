//! API request structures

use super::response::default_tool_type;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A conversational turn sent to an app
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub app_id: String,
    pub query: String,
    pub stream: bool,
    pub conversation_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,

    /// Local functions the app may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,

    /// Results of tool calls requested by a previous answer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_outputs: Vec<ToolOutput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_id: Option<String>,
}

impl RunRequest {
    pub fn new(
        app_id: impl Into<String>,
        conversation_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            conversation_id: conversation_id.into(),
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_file_ids(mut self, file_ids: Vec<String>) -> Self {
        self.file_ids = file_ids;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    /// Answer tool calls from the previous turn
    pub fn with_tool_outputs(mut self, outputs: Vec<ToolOutput>) -> Self {
        self.tool_outputs = outputs;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_end_user_id(mut self, end_user_id: impl Into<String>) -> Self {
        self.end_user_id = Some(end_user_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    pub function: FunctionSpec,
}

impl Tool {
    pub fn function(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            tool_type: default_tool_type(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Function signature described with a JSON schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Forces a specific component or tool for the turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoice {
    #[serde(rename = "type")]
    pub choice_type: String,
    pub function: ToolChoiceFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl ToolChoice {
    pub fn function(name: impl Into<String>, input: Value) -> Self {
        Self {
            choice_type: "function".to_string(),
            function: ToolChoiceFunction {
                name: name.into(),
                input,
            },
        }
    }
}

/// Paging for the app list; empty values are left out of the query string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppListRequest {
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl Default for GetAppListRequest {
    fn default() -> Self {
        Self {
            limit: 10,
            after: None,
            before: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeAppsRequest {
    #[serde(rename = "MaxKeys", skip_serializing_if = "Option::is_none")]
    pub max_keys: Option<u32>,
    #[serde(rename = "Marker", skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_request_omits_empty_fields() {
        let request = RunRequest::new("app", "conv", "hello").with_stream(true);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"app_id": "app", "query": "hello", "stream": true, "conversation_id": "conv"})
        );
    }

    #[test]
    fn test_run_request_with_tools() {
        let request = RunRequest::new("app", "conv", "weather?")
            .with_tools(vec![Tool::function(
                "get_weather",
                "Look up the weather",
                json!({"type": "object", "properties": {"city": {"type": "string"}}}),
            )])
            .with_tool_outputs(vec![ToolOutput {
                tool_call_id: "t1".to_string(),
                output: "sunny".to_string(),
            }])
            .with_end_user_id("user-7");

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(value["tool_outputs"][0]["output"], "sunny");
        assert_eq!(value["end_user_id"], "user-7");
        assert!(value.get("tool_choice").is_none());
    }

    #[test]
    fn test_describe_apps_names() {
        let request = DescribeAppsRequest {
            max_keys: Some(5),
            marker: None,
        };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"MaxKeys": 5}));
    }
}
