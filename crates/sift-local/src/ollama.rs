use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sift_core::chat::{ChatRequest, ChatResponse, ToolCall};
use sift_core::tokens::chunk_by_tokens;
use sift_core::{ChatModel, Embedder, Error, Result};
use std::sync::OnceLock;

/// Ollama `/api/chat` and `/api/embed` client for one model on one server.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    context_window: usize,
    name: String,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: &str, model: &str, context_window: usize) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            name: format!("{model}@{base_url}"),
            client,
            base_url,
            model: model.to_string(),
            context_window,
        }
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn endpoint_embed(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

#[derive(Debug, Clone, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaOptions {
    num_ctx: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

fn tool_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tool_call>(.*?)</tool_call>").expect("static regex"))
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>\s*(.*?)\s*</think>").expect("static regex"))
}

/// Arguments arrive as an object, or as a JSON string holding one.
fn arguments_object(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        Value::String(s) => serde_json::from_str::<Map<String, Value>>(&s).unwrap_or_default(),
        _ => Map::new(),
    }
}

/// Split raw model content into visible text, a `<think>` section, and inline
/// `<tool_call>{json}</tool_call>` blocks (used by models without native tool calling).
pub fn split_tagged_content(raw: &str) -> (String, Option<String>, Vec<ToolCall>) {
    let thinking = think_re()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty());

    let mut calls = Vec::new();
    for cap in tool_call_re().captures_iter(raw) {
        let Some(body) = cap.get(1) else { continue };
        match serde_json::from_str::<Value>(body.as_str().trim()) {
            Ok(v) => {
                let name = v
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() {
                    tracing::warn!("inline tool call without a name");
                    continue;
                }
                let arguments = arguments_object(v.get("arguments").cloned().unwrap_or_default());
                calls.push(ToolCall {
                    name,
                    arguments,
                    result: None,
                });
            }
            Err(e) => tracing::warn!(error = %e, "failed to parse inline tool call"),
        }
    }

    let content = think_re().replace_all(raw, "");
    let content = tool_call_re().replace_all(&content, "");
    (content.trim().to_string(), thinking, calls)
}

#[async_trait::async_trait]
impl ChatModel for OllamaClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = OllamaChatRequest {
            model: &self.model,
            messages: req
                .messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                    thinking: None,
                    tool_calls: Vec::new(),
                })
                .collect(),
            tools: req.tools.iter().map(|t| t.as_function_json()).collect(),
            stream: false,
            options: OllamaOptions {
                num_ctx: self.context_window,
            },
        };

        let resp = self
            .client
            .post(self.endpoint_chat())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!("ollama chat HTTP {status}")));
        }
        let parsed: OllamaChatResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;

        let (content, inline_thinking, inline_calls) = split_tagged_content(&parsed.message.content);
        let mut tool_calls: Vec<ToolCall> = parsed
            .message
            .tool_calls
            .into_iter()
            .map(|c| ToolCall {
                name: c.function.name,
                arguments: arguments_object(c.function.arguments),
                result: None,
            })
            .collect();
        tool_calls.extend(inline_calls);

        Ok(ChatResponse {
            content,
            thinking: parsed
                .message
                .thinking
                .filter(|t| !t.trim().is_empty())
                .or(inline_thinking),
            tool_calls,
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait::async_trait]
impl Embedder for OllamaClient {
    fn name(&self) -> &str {
        &self.name
    }

    /// One vector per token-budgeted chunk of `text`, in chunk order.
    async fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        let input = chunk_by_tokens(text, self.context_window);
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let expected = input.len();
        let body = EmbedRequest {
            model: &self.model,
            input,
            options: OllamaOptions {
                num_ctx: self.context_window,
            },
        };
        let resp = self
            .client
            .post(self.endpoint_embed())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Embed(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Embed(format!("ollama embed HTTP {status}")));
        }
        let parsed: EmbedResponse = resp.json().await.map_err(|e| Error::Embed(e.to_string()))?;
        if parsed.embeddings.len() != expected {
            return Err(Error::Embed(format!(
                "ollama returned {} embeddings for {expected} chunks",
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{routing::post, Json, Router};
    use sift_core::chat::{ChatMessage, Role, ToolSpec};

    fn client(base: &str) -> OllamaClient {
        OllamaClient::new(reqwest::Client::new(), base, "qwen2.5:3b-instruct", 4096)
    }

    #[test]
    fn splits_think_and_inline_tool_calls_out_of_content() {
        let raw = "<think>\n  weighing sources  \n</think>Here you go.\n<tool_call>{\"name\": \"search_extraction\", \"arguments\": {\"summary\": \"s\", \"citations\": []}}</tool_call>";
        let (content, thinking, calls) = split_tagged_content(raw);
        assert_eq!(content, "Here you go.");
        assert_eq!(thinking.as_deref(), Some("weighing sources"));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search_extraction");
        assert_eq!(calls[0].arguments["summary"], "s");
    }

    #[test]
    fn malformed_inline_calls_are_skipped() {
        let (content, thinking, calls) =
            split_tagged_content("No results found <tool_call>{not json}</tool_call>");
        assert_eq!(content, "No results found");
        assert!(thinking.is_none());
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn chat_sends_tools_and_num_ctx_and_reads_native_tool_calls() {
        let app = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["options"]["num_ctx"], 4096);
                assert_eq!(body["tools"][0]["function"]["name"], "search_extraction");
                assert_eq!(body["messages"][0]["role"], "system");
                Json(serde_json::json!({
                    "model": "qwen2.5:3b-instruct",
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [{"function": {
                            "name": "search_extraction",
                            "arguments": {"summary": "borrowing", "citations": []}
                        }}]
                    },
                    "done": true
                }))
            }),
        );
        let base = serve(app).await;
        let req = ChatRequest {
            messages: vec![
                ChatMessage::new(Role::System, "sys"),
                ChatMessage::new(Role::User, "hi"),
            ],
            tools: vec![ToolSpec {
                name: "search_extraction".to_string(),
                description: "d".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        };
        let resp = client(&base).chat(&req).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].arguments["summary"], "borrowing");
        assert!(resp.tool_calls[0].result.is_none());
    }

    #[tokio::test]
    async fn server_errors_are_llm_errors() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
        );
        let base = serve(app).await;
        let err = client(&base).chat(&ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[tokio::test]
    async fn embed_returns_one_vector_per_chunk() {
        let app = Router::new().route(
            "/api/embed",
            post(|Json(body): Json<Value>| async move {
                let n = body["input"].as_array().map(Vec::len).unwrap_or(0);
                let embeddings: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 1.0]).collect();
                Json(serde_json::json!({ "embeddings": embeddings }))
            }),
        );
        let base = serve(app).await;
        let small = OllamaClient::new(reqwest::Client::new(), &base, "nomic-embed-text", 8);
        let text = "one two three four\nfive six seven eight\nnine ten eleven twelve\n";
        let vs = small.embed(text).await.unwrap();
        assert!(vs.len() > 1);
        assert_eq!(vs[0], vec![0.0, 1.0]);
        assert!(small.embed("").await.unwrap().is_empty());
    }
}
