//! Chat model contract, tool calls, and isolated conversation contexts.
//!
//! A [`Conversation`] owns its message history and tool registry. Workers each build their own,
//! so no two tasks ever share prompt history or swap tools in and out of a shared agent.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Function-style tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    /// `{"type":"function","function":{...}}`, the shape both Ollama and OpenAI-compatible
    /// servers accept.
    pub fn as_function_json(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Filled in once the tool has run.
    #[serde(default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    /// Deserialize the result of the tool call named `tool_name`.
    ///
    /// Fails when no call carries that name, when its result is missing, or when the result
    /// does not fit `T`.
    pub fn bind_tool_result<T: DeserializeOwned>(&self, tool_name: &str) -> Result<T> {
        if tool_name.is_empty() {
            return Err(Error::ToolBind("tool name cannot be empty".to_string()));
        }
        if self.tool_calls.is_empty() {
            return Err(Error::ToolBind("no tool calls found in message".to_string()));
        }
        let call = self
            .tool_calls
            .iter()
            .find(|c| c.name == tool_name)
            .ok_or_else(|| Error::ToolBind(format!("tool call {tool_name} not found")))?;
        let raw = call
            .result
            .clone()
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::ToolBind(format!("tool call {tool_name} has no result")))?;
        serde_json::from_value(raw)
            .map_err(|e| Error::ToolBind(format!("tool call {tool_name} result: {e}")))
    }
}

#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Stable identity used in logs and traces (model name, endpoint, ...).
    fn name(&self) -> &str;
    /// Context window in estimated tokens.
    fn context_window(&self) -> usize;
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

pub type ToolHandler = fn(&Map<String, Value>) -> Result<Value>;

#[derive(Clone)]
pub struct Tool {
    pub spec: ToolSpec,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("spec", &self.spec).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new(tools: impl IntoIterator<Item = Tool>) -> Self {
        let mut r = Self::default();
        for t in tools {
            r.register(t);
        }
        r
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.spec.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// One conversation with one model, owned by exactly one caller.
pub struct Conversation {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    messages: Vec<ChatMessage>,
    tools: ToolRegistry,
}

impl Conversation {
    pub fn new(model: Arc<dyn ChatModel>, system_prompt: &str, tools: ToolRegistry) -> Self {
        let mut c = Self {
            model,
            system_prompt: system_prompt.to_string(),
            messages: Vec::new(),
            tools,
        };
        c.clear();
        c
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn context_window(&self) -> usize {
        self.model.context_window()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Drop the history, keeping only the system prompt.
    pub fn clear(&mut self) {
        self.messages.clear();
        if !self.system_prompt.is_empty() {
            self.messages
                .push(ChatMessage::new(Role::System, self.system_prompt.clone()));
        }
    }

    pub async fn send_user(&mut self, content: &str) -> Result<ChatResponse> {
        self.send(Role::User, content).await
    }

    /// Append a turn, ask the model, record its reply, and run any tool calls it made.
    pub async fn send(&mut self, role: Role, content: &str) -> Result<ChatResponse> {
        self.messages.push(ChatMessage::new(role, content));
        let req = ChatRequest {
            messages: self.messages.clone(),
            tools: self.tools.specs(),
        };
        let mut resp = self.model.chat(&req).await?;
        let mut reply = resp.thinking.clone().unwrap_or_default();
        reply.push_str(&resp.content);
        self.messages.push(ChatMessage::new(Role::Assistant, reply));
        self.run_tools(&mut resp);
        Ok(resp)
    }

    fn run_tools(&self, resp: &mut ChatResponse) {
        for call in &mut resp.tool_calls {
            let Some(tool) = self.tools.get(&call.name) else {
                tracing::warn!(tool = %call.name, model = %self.model.name(), "tool not registered");
                continue;
            };
            match (tool.handler)(&call.arguments) {
                Ok(v) => call.result = Some(v),
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool call rejected");
                }
            }
        }
    }
}
