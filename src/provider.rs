//! Model-provider capability: the chat-completion backend behind the planner
//! and the compressor.
//!
//! [`ModelProvider::bind_tools`] yields a [`ModelInvoker`] bound to a tool
//! catalog; the invoker is what nodes await. The bundled [`HttpProvider`]
//! speaks the OpenAI-compatible `/chat/completions` wire format.

use crate::config::{ModelSlot, ModelSlots};
use crate::engine::message::{FinishReason, Message, ToolCall, UserPart};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Capability interfaces
// ---------------------------------------------------------------------------

/// Schema for one tool as exposed to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A tool call the model emitted with arguments that failed to parse.
/// Usually seen together with `finish_reason == Length`.
#[derive(Debug, Clone)]
pub struct InvalidToolCall {
    pub id: String,
    pub name: String,
    pub error: String,
}

/// One assistant turn as returned by a provider.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub invalid_calls: Vec<InvalidToolCall>,
    pub usage: Option<TokenUsage>,
    pub finish_reason: FinishReason,
}

pub trait ModelProvider: Send + Sync {
    fn model_id(&self) -> &str;
    fn context_window(&self) -> usize;
    fn max_completion_tokens(&self) -> usize;
    /// Bind a tool catalog; the returned invoker carries it on every call.
    fn bind_tools(&self, tools: Vec<ToolSchema>) -> Arc<dyn ModelInvoker>;
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        max_completion_tokens: Option<usize>,
    ) -> Result<AssistantTurn>;
}

// ---------------------------------------------------------------------------
// Model registry (routing slots)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Base,
    Reason,
    Vision,
    Code,
    Chat,
}

/// Holds one provider per configured slot; every role falls back to `base`.
pub struct ModelRegistry {
    providers: HashMap<ModelRole, Arc<dyn ModelProvider>>,
}

impl ModelRegistry {
    pub fn from_slots(slots: &ModelSlots) -> Self {
        let mut providers: HashMap<ModelRole, Arc<dyn ModelProvider>> = HashMap::new();
        providers.insert(
            ModelRole::Base,
            Arc::new(HttpProvider::from_slot(&slots.base)) as Arc<dyn ModelProvider>,
        );
        for (role, slot) in [
            (ModelRole::Reason, &slots.reason),
            (ModelRole::Vision, &slots.vision),
            (ModelRole::Code, &slots.code),
            (ModelRole::Chat, &slots.chat),
        ] {
            if let Some(slot) = slot {
                providers.insert(role, Arc::new(HttpProvider::from_slot(slot)));
            }
        }
        Self { providers }
    }

    /// Registry over a single provider; used by tests and delegated children.
    pub fn single(provider: Arc<dyn ModelProvider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert(ModelRole::Base, provider);
        Self { providers }
    }

    pub fn for_role(&self, role: ModelRole) -> Arc<dyn ModelProvider> {
        self.providers
            .get(&role)
            .or_else(|| self.providers.get(&ModelRole::Base))
            .expect("registry always holds a base provider")
            .clone()
    }

    pub fn base(&self) -> Arc<dyn ModelProvider> {
        self.for_role(ModelRole::Base)
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP provider
// ---------------------------------------------------------------------------

pub struct HttpProvider {
    http: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
    context_window: usize,
    max_completion_tokens: usize,
}

impl HttpProvider {
    pub fn from_slot(slot: &ModelSlot) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            model: slot.id.clone(),
            base_url: slot.base_url.trim_end_matches('/').to_string(),
            api_key: slot.api_key.clone(),
            context_window: slot.context_window,
            max_completion_tokens: slot.max_completion_tokens,
        }
    }
}

impl ModelProvider for HttpProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn max_completion_tokens(&self) -> usize {
        self.max_completion_tokens
    }

    fn bind_tools(&self, tools: Vec<ToolSchema>) -> Arc<dyn ModelInvoker> {
        Arc::new(BoundHttpModel {
            http: self.http.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            tools,
        })
    }
}

struct BoundHttpModel {
    http: Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
    tools: Vec<ToolSchema>,
}

#[async_trait]
impl ModelInvoker for BoundHttpModel {
    async fn invoke(
        &self,
        messages: &[Message],
        max_completion_tokens: Option<usize>,
    ) -> Result<AssistantTurn> {
        let total_chars: usize = messages.iter().map(|m| m.text().len()).sum();
        info!(
            "Chat request: model={}, messages={}, tools={}, total_chars={}",
            self.model,
            messages.len(),
            self.tools.len(),
            total_chars
        );

        let url = format!("{}/chat/completions", self.base_url);
        let wire_messages: Vec<WireMessage> = messages.iter().map(WireMessage::from_message).collect();
        let wire_tools: Option<Vec<WireTool>> = if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.iter().map(WireTool::from_schema).collect())
        };
        let req = WireRequest {
            model: self.model.clone(),
            messages: wire_messages,
            tools: wire_tools,
            max_tokens: max_completion_tokens,
            stream: false,
        };

        let mut rb = self.http.post(url).json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.header("Authorization", format!("Bearer {}", key));
        }
        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat completion error ({}): {}", status, text);
        }

        let payload: WireResponse = resp.json().await?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("chat completion returned no choices"))?;

        let finish_reason = match choice.finish_reason.as_deref() {
            Some("stop") => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("tool_calls") => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        };
        if finish_reason == FinishReason::Length {
            warn!(
                "Model output truncated (finish_reason=length, model={}). \
                 Consider raising max_completion_tokens for this slot.",
                self.model
            );
        }

        let mut tool_calls = Vec::new();
        let mut invalid_calls = Vec::new();
        for wire_call in choice.message.tool_calls.unwrap_or_default() {
            match serde_json::from_str::<JsonValue>(&wire_call.function.arguments) {
                Ok(args) => tool_calls.push(ToolCall {
                    id: wire_call.id,
                    name: wire_call.function.name,
                    args,
                }),
                Err(e) => invalid_calls.push(InvalidToolCall {
                    id: wire_call.id,
                    name: wire_call.function.name,
                    error: format!("invalid tool-call JSON: {}", e),
                }),
            }
        }

        let usage = payload.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens.unwrap_or(0),
            output_tokens: u.completion_tokens.unwrap_or(0),
        });

        Ok(AssistantTurn {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            invalid_calls,
            usage,
            finish_reason,
        })
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl WireMessage {
    fn from_message(msg: &Message) -> Self {
        match msg {
            Message::System { content, .. } => Self {
                role: "system".into(),
                content: content.clone(),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::User { content, .. } => Self {
                role: "user".into(),
                content: content
                    .iter()
                    .map(|part| match part {
                        UserPart::Text { text } => text.clone(),
                        UserPart::ImageRef { path } => format!("[image attached: {}]", path),
                        UserPart::FileText { path, text } => {
                            format!("<uploaded_file path=\"{}\">\n{}\n</uploaded_file>", path, text)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n"),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => Self {
                role: "assistant".into(),
                content: content.clone(),
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        tool_calls
                            .iter()
                            .map(|c| WireToolCall {
                                id: c.id.clone(),
                                r#type: "function".into(),
                                function: WireFunctionCall {
                                    name: c.name.clone(),
                                    arguments: c.args.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: None,
                name: None,
            },
            Message::ToolResult {
                call_id,
                name,
                content,
                ..
            } => Self {
                role: "tool".into(),
                content: content.render(),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
                name: Some(name.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: JsonValue,
}

impl WireTool {
    fn from_schema(schema: &ToolSchema) -> Self {
        Self {
            r#type: "function".into(),
            function: WireFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<usize>,
    completion_tokens: Option<usize>,
}

// ---------------------------------------------------------------------------
// Scripted provider for tests
// ---------------------------------------------------------------------------
