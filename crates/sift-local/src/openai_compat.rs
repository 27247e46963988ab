use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sift_core::chat::{ChatRequest, ChatResponse, ToolCall};
use sift_core::tokens::chunk_by_tokens;
use sift_core::{ChatModel, Embedder, Error, Result};

/// Client for servers speaking the OpenAI `chat/completions` and `embeddings` shapes
/// (llama.cpp, vLLM, LM Studio, hosted gateways).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    context_window: usize,
    name: String,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        context_window: usize,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            name: format!("{model}@{base_url}"),
            client,
            base_url,
            api_key,
            model: model.to_string(),
            context_window,
        }
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn endpoint_embeddings(&self) -> String {
        format!("{}/v1/embeddings", self.base_url)
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        let mut rb = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }
        rb
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChoiceToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceToolCall {
    function: ChoiceFunction,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceFunction {
    name: String,
    /// JSON text, per the OpenAI wire format.
    #[serde(default)]
    arguments: String,
}

fn parse_arguments(name: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Map<String, Value>>(raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(tool = name, error = %e, "tool call arguments are not a JSON object");
            Map::new()
        }
    }
}

#[async_trait::async_trait]
impl ChatModel for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = ChatCompletionsRequest {
            model: &self.model,
            messages: req
                .messages
                .iter()
                .map(|m| Message {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            tools: req.tools.iter().map(|t| t.as_function_json()).collect(),
            stream: false,
        };

        let resp = self
            .post(self.endpoint_chat_completions())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "openai_compat chat.completions HTTP {status}"
            )));
        }
        let parsed: ChatCompletionsResponse =
            resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        let Some(choice) = parsed.choices.into_iter().next() else {
            return Err(Error::Llm("openai_compat response has no choices".to_string()));
        };

        let msg = choice.message;
        Ok(ChatResponse {
            content: msg.content.unwrap_or_default().trim().to_string(),
            thinking: msg.reasoning_content.filter(|s| !s.trim().is_empty()),
            tool_calls: msg
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    arguments: parse_arguments(&c.function.name, &c.function.arguments),
                    name: c.function.name,
                    result: None,
                })
                .collect(),
        })
    }
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Embed("embedding response is missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let embedding = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Embed("embedding item missing embedding array".to_string()))?;
        let vec = embedding
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|n| n as f32)
                    .ok_or_else(|| Error::Embed("embedding value must be numeric".to_string()))
            })
            .collect::<Result<Vec<f32>>>()?;
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait::async_trait]
impl Embedder for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        let input = chunk_by_tokens(text, self.context_window);
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        let resp = self
            .post(self.endpoint_embeddings())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Embed(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Embed(format!("openai_compat embeddings HTTP {status}")));
        }
        let json: Value = resp.json().await.map_err(|e| Error::Embed(e.to_string()))?;
        parse_embedding_response(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::http::HeaderMap;
    use axum::{routing::post, Json, Router};
    use sift_core::chat::{ChatMessage, Role};

    #[test]
    fn parses_embeddings_in_index_order() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 3.0] },
                { "index": 0, "embedding": [0.5, 1.5] }
            ]
        });
        let parsed = parse_embedding_response(json).unwrap();
        assert_eq!(parsed, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
        assert!(parse_embedding_response(serde_json::json!({})).is_err());
    }

    #[tokio::test]
    async fn chat_decodes_string_arguments_and_sends_bearer_key() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(
                    headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok()),
                    Some("Bearer sk-test")
                );
                assert_eq!(body["model"], "local-model");
                Json(serde_json::json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "reasoning_content": "checking the page",
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {
                                    "name": "search_extraction",
                                    "arguments": "{\"summary\":\"s\",\"citations\":[]}"
                                }
                            }]
                        }
                    }]
                }))
            }),
        );
        let base = serve(app).await;
        let c = OpenAiCompatClient::new(
            reqwest::Client::new(),
            &format!("{base}/"),
            Some("sk-test".to_string()),
            "local-model",
            8192,
        );
        let req = ChatRequest {
            messages: vec![ChatMessage::new(Role::User, "hi")],
            tools: Vec::new(),
        };
        let resp = c.chat(&req).await.unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(resp.thinking.as_deref(), Some("checking the page"));
        assert_eq!(resp.tool_calls[0].name, "search_extraction");
        assert_eq!(resp.tool_calls[0].arguments["summary"], "s");
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(serde_json::json!({ "choices": [] })) }),
        );
        let base = serve(app).await;
        let c = OpenAiCompatClient::new(reqwest::Client::new(), &base, None, "m", 8192);
        let err = c.chat(&ChatRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Llm(_)));
    }

    #[test]
    fn malformed_argument_text_becomes_an_empty_map() {
        assert!(parse_arguments("t", "{not json").is_empty());
        assert!(parse_arguments("t", "").is_empty());
        assert_eq!(parse_arguments("t", "{\"a\":1}")["a"], 1);
    }
}
