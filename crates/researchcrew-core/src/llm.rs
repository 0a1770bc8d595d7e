//! Chat-completions client for OpenAI-compatible providers (DeepSeek by default).

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::LlmError;
use crate::config::LlmSettings;
use crate::security::{SecretValue, redact};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of a chat transcript in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatRole::Assistant, content)
    }

    /// Assistant turn that requests tool invocations.
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn text_content(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// Function name plus its JSON-encoded arguments, as sent by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    /// Decode the argument string; an empty string is treated as `{}`.
    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&self.arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    fn to_wire(&self) -> Value {
        json!({ "type": "function", "function": self })
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    /// Request body for `POST /chat/completions`.
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": self.messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        });
        if !self.tools.is_empty() {
            payload["tools"] = Value::Array(self.tools.iter().map(ToolDefinition::to_wire).collect());
            payload["tool_choice"] = json!("auto");
        }
        payload
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub message: ChatMessage,
    pub finish_reason: Option<String>,
}

/// Anything that can answer a chat-completions request.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// HTTP client for any provider exposing the OpenAI chat-completions API.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretValue,
}

impl OpenAiCompatibleClient {
    pub fn new(http: reqwest::Client, api_base: &str, api_key: SecretValue) -> Self {
        Self {
            http,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
        }
    }

    pub fn from_settings(settings: &LlmSettings, http: reqwest::Client) -> Self {
        Self::new(http, &settings.api_base, settings.api_key.clone())
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    #[instrument(
        name = "llm.complete",
        skip(self, request),
        fields(model = %request.model, messages = request.messages.len(), tools = request.tools.len())
    )]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&request.to_payload())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: redact(&body.chars().take(500).collect::<String>()),
            });
        }

        let decoded: CompletionResponse =
            serde_json::from_str(&body).map_err(|err| LlmError::Decode(err.to_string()))?;
        let choice = decoded
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyChoices)?;

        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            tool_calls = choice.message.tool_calls.len(),
            "completion received"
        );

        Ok(Completion {
            message: choice.message,
            finish_reason: choice.finish_reason,
        })
    }
}

fn function_kind() -> String {
    "function".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn request(tools: Vec<ToolDefinition>) -> CompletionRequest {
        CompletionRequest {
            model: "deepseek-chat".into(),
            messages: vec![
                ChatMessage::system("You are a researcher."),
                ChatMessage::user("Summarise context windows."),
            ],
            temperature: 0.7,
            max_tokens: 4000,
            tools,
        }
    }

    #[test]
    fn payload_includes_tools_only_when_present() {
        let without = request(vec![]).to_payload();
        assert!(without.get("tools").is_none());
        assert!(without.get("tool_choice").is_none());

        let with = request(vec![ToolDefinition {
            name: "arxiv_search".into(),
            description: "Search arXiv".into(),
            parameters: json!({ "type": "object" }),
        }])
        .to_payload();
        assert_eq!(with["tools"][0]["type"], "function");
        assert_eq!(with["tools"][0]["function"]["name"], "arxiv_search");
        assert_eq!(with["tool_choice"], "auto");
    }

    #[test]
    fn tool_messages_serialise_in_wire_shape() {
        let call = ToolCall::new("call_1", "web_search", &json!({ "query": "rope" }));
        let assistant = serde_json::to_value(ChatMessage::assistant_tool_calls(None, vec![call]))
            .expect("serialise");
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"rope"}"#
        );

        let result = serde_json::to_value(ChatMessage::tool_result("call_1", "3 hits"))
            .expect("serialise");
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_1");
        assert!(result.get("tool_calls").is_none());
    }

    #[test]
    fn empty_arguments_parse_as_object() {
        let call = FunctionCall {
            name: "web_search".into(),
            arguments: String::new(),
        };
        assert_eq!(call.parsed_arguments().expect("parses"), json!({}));
    }

    #[tokio::test]
    async fn completes_against_compatible_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({ "model": "deepseek-chat" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": "cmpl-1",
                    "choices": [{
                        "index": 0,
                        "finish_reason": "tool_calls",
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_9",
                                "type": "function",
                                "function": { "name": "arxiv_search", "arguments": "{\"query\":\"rope\"}" }
                            }]
                        }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = OpenAiCompatibleClient::new(
            reqwest::Client::new(),
            &format!("{}/v1/", server.url()),
            SecretValue::new("sk-test"),
        );
        let completion = client.complete(request(vec![])).await.expect("completion");

        mock.assert_async().await;
        assert_eq!(completion.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(completion.message.tool_calls.len(), 1);
        assert_eq!(completion.message.tool_calls[0].function.name, "arxiv_search");
        assert_eq!(completion.message.text_content(), "");
    }

    #[tokio::test]
    async fn error_status_is_reported_without_secrets() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":"bad key sk-abcdefghijklmnopqrstu"}"#)
            .create_async()
            .await;

        let client = OpenAiCompatibleClient::new(
            reqwest::Client::new(),
            &format!("{}/v1", server.url()),
            SecretValue::new("sk-test"),
        );
        let err = client.complete(request(vec![])).await.unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 401);
                assert!(!body.contains("sk-abcdefghijklmnopqrstu"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let client = OpenAiCompatibleClient::new(
            reqwest::Client::new(),
            &format!("{}/v1", server.url()),
            SecretValue::new("sk-test"),
        );
        let err = client.complete(request(vec![])).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyChoices));
    }
}
