use super::message::{ContentPart, Role, Turn, TurnContent};
use super::{GenerationOutcome, Generator, TitleGenerator, Usage};
use crate::config::LLMConfig;
use crate::tools::registry::ToolRegistry;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const NEW_CHAT_TITLE: &str = "New Chat";
pub const FALLBACK_TITLE: &str = "Chat Session";
const TITLE_CONTEXT_TURNS: usize = 10;
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<Value>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    id: String,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

fn cache_control() -> Value {
    json!({"type": "ephemeral"})
}

fn part_to_block(part: &ContentPart) -> Option<Value> {
    match part {
        ContentPart::Text { text, .. } if text.is_empty() => None,
        ContentPart::Text { text, .. } => Some(json!({"type": "text", "text": text})),
        ContentPart::ToolCall {
            tool_call_id,
            tool_name,
            args,
        } => Some(json!({
            "type": "tool_use",
            "id": tool_call_id,
            "name": tool_name,
            "input": args,
        })),
        ContentPart::ToolResult {
            tool_call_id,
            result,
            is_error,
            ..
        } => {
            let content = match result {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let mut block = json!({
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": content,
            });
            if *is_error == Some(true) {
                block["is_error"] = Value::Bool(true);
            }
            Some(block)
        }
        ContentPart::Other(value) => {
            tracing::debug!(
                "[AnthropicClient] Skipping unsupported '{}' part",
                value["type"].as_str().unwrap_or("unknown")
            );
            None
        }
    }
}

fn turn_blocks(turn: &Turn) -> Vec<Value> {
    let mut blocks: Vec<Value> = match &turn.content {
        TurnContent::Text(text) if text.is_empty() => Vec::new(),
        TurnContent::Text(text) => vec![json!({"type": "text", "text": text})],
        TurnContent::Parts(parts) => parts.iter().filter_map(part_to_block).collect(),
    };
    if turn.has_cache_marker() {
        if let Some(last) = blocks.last_mut() {
            last["cache_control"] = cache_control();
        }
    }
    blocks
}

/// Map the durable log onto the Messages API layout: system turns become the
/// system prompt, tool turns become user messages of tool results, and
/// consecutive messages with the same role are merged.
fn to_wire(turns: &[Turn]) -> (Vec<Value>, Vec<WireMessage>) {
    let mut system = Vec::new();
    let mut messages: Vec<WireMessage> = Vec::new();

    for turn in turns {
        let blocks = turn_blocks(turn);
        if blocks.is_empty() {
            continue;
        }
        let role = match turn.role {
            Role::System => {
                system.extend(blocks);
                continue;
            }
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };

        match messages.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => messages.push(WireMessage {
                role,
                content: blocks,
            }),
        }
    }

    (system, messages)
}

/// Exponential backoff for retry `attempt` (1-based), saturating instead of overflowing
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
}

fn clean_title(raw: &str) -> String {
    let unquoted: String = raw.chars().filter(|c| *c != '"' && *c != '\'').collect();
    let trimmed = unquoted.trim();
    let trimmed = trimmed
        .strip_prefix("Title:")
        .map(str::trim_start)
        .unwrap_or(trimmed);
    trimmed.chars().take(TITLE_MAX_CHARS).collect::<String>().trim().to_string()
}

/// Client for the Anthropic Messages API with a bounded tool-use loop
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    settings: LLMConfig,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        settings: LLMConfig,
        tools: Arc<ToolRegistry>,
        max_steps: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            settings,
            tools,
            max_steps: max_steps.max(1),
        }
    }

    async fn send(&self, request: &MessagesRequest<'_>) -> Result<MessagesResponse> {
        let url = format!("{}/v1/messages", self.settings.base_url.trim_end_matches('/'));
        let max_retries = self.settings.max_retries.max(1);
        let mut last_error = None;

        for attempt in 0..max_retries {
            if attempt > 0 {
                let delay = backoff_delay_ms(self.settings.retry_base_delay_ms, attempt);
                tracing::warn!(
                    "[AnthropicClient] Retrying API call (attempt {}/{}) after {}ms delay",
                    attempt + 1,
                    max_retries,
                    delay
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
            }

            let response_result = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.settings.api_version)
                .header("content-type", "application/json")
                .json(request)
                .send()
                .await;

            let response = match response_result {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!("[AnthropicClient] HTTP request failed: {}", e);
                    last_error = Some(anyhow::anyhow!("HTTP request failed: {}", e));
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                tracing::warn!(
                    "[AnthropicClient] API returned error status {}: {}",
                    status,
                    error_text
                );
                let error = anyhow::anyhow!("API error {}: {}", status, error_text);
                if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                    return Err(error);
                }
                last_error = Some(error);
                continue;
            }

            match response.json::<MessagesResponse>().await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    tracing::warn!("[AnthropicClient] Failed to decode response body: {}", e);
                    last_error = Some(anyhow::anyhow!("Response decode error: {}", e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("All retry attempts failed")))
    }
}

#[async_trait]
impl Generator for AnthropicClient {
    async fn generate(&self, history: &[Turn]) -> Result<GenerationOutcome> {
        let tool_schemas = self.tools.schemas();
        let mut outcome = GenerationOutcome::default();

        while outcome.steps < self.max_steps {
            outcome.steps += 1;

            let mut context = history.to_vec();
            context.extend(outcome.turns.iter().cloned());
            let (system, messages) = to_wire(&context);
            let request = MessagesRequest {
                model: &self.settings.model,
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
                system,
                messages,
                tools: tool_schemas.clone(),
            };

            let response = self.send(&request).await?;
            outcome.usage.add(&response.usage);
            tracing::debug!(
                "[AnthropicClient] Step {}/{} finished with {:?}",
                outcome.steps,
                self.max_steps,
                response.stop_reason
            );

            let mut parts = Vec::new();
            let mut calls = Vec::new();
            for block in response.content {
                match block {
                    ResponseBlock::Text { text } => parts.push(ContentPart::text(text)),
                    ResponseBlock::ToolUse { id, name, input } => {
                        calls.push((id.clone(), name.clone(), input.clone()));
                        parts.push(ContentPart::ToolCall {
                            tool_call_id: id,
                            tool_name: name,
                            args: input,
                        });
                    }
                    ResponseBlock::Other => {}
                }
            }
            outcome.turns.push(Turn::assistant(response.id, parts));

            if response.stop_reason.as_deref() != Some("tool_use") || calls.is_empty() {
                break;
            }

            let tool_turn_id = calls[0].0.clone();
            let mut results = Vec::with_capacity(calls.len());
            for (call_id, name, input) in calls {
                let result = self.tools.invoke(&name, input).await;
                results.push(ContentPart::ToolResult {
                    tool_call_id: call_id,
                    tool_name: name,
                    is_error: (!result.success).then_some(true),
                    result: result.to_value(),
                });
            }
            outcome.turns.push(Turn::tool(tool_turn_id, results));
        }

        outcome.step_ceiling_reached = outcome.steps >= self.max_steps;
        Ok(outcome)
    }
}

#[async_trait]
impl TitleGenerator for AnthropicClient {
    async fn summarize(&self, turns: &[Turn], current_title: Option<&str>) -> String {
        let recent: Vec<&Turn> = turns
            .iter()
            .filter(|turn| matches!(turn.role, Role::User | Role::Assistant))
            .collect();
        let recent = &recent[recent.len().saturating_sub(TITLE_CONTEXT_TURNS)..];
        if recent.is_empty() {
            return NEW_CHAT_TITLE.to_string();
        }

        let conversation = recent
            .iter()
            .map(|turn| match turn.role {
                Role::User => format!("User: {}", turn.text()),
                _ => format!("Assistant: {}", turn.text()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let current = current_title
            .filter(|title| !title.is_empty())
            .map(|title| format!("The current title is \"{}\". Keep it if it still fits.\n\n", title))
            .unwrap_or_default();
        let prompt = format!(
            "Please generate a very brief, descriptive title (2-6 words) for this conversation. \
             Focus on the main topic or task being discussed. Do not include quotes or extra \
             formatting, just the title:\n\n{}{}\n\nTitle:",
            current, conversation
        );

        let request = MessagesRequest {
            model: &self.settings.title_model,
            max_tokens: 50,
            temperature: self.settings.temperature,
            system: Vec::new(),
            messages: vec![WireMessage {
                role: "user",
                content: vec![json!({"type": "text", "text": prompt})],
            }],
            tools: Vec::new(),
        };

        match self.send(&request).await {
            Ok(response) => {
                let text: String = response
                    .content
                    .into_iter()
                    .filter_map(|block| match block {
                        ResponseBlock::Text { text } => Some(text),
                        _ => None,
                    })
                    .collect();
                let title = clean_title(&text);
                if title.is_empty() {
                    FALLBACK_TITLE.to_string()
                } else {
                    title
                }
            }
            Err(e) => {
                tracing::warn!("[AnthropicClient] Title generation failed: {}", e);
                FALLBACK_TITLE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, max_steps: usize) -> AnthropicClient {
        let settings = LLMConfig {
            base_url: server.uri(),
            retry_base_delay_ms: 1,
            ..LLMConfig::default()
        };
        let tools = Arc::new(ToolRegistry::with_defaults(&ToolsConfig::default()));
        AnthropicClient::new("test-key".to_string(), settings, tools, max_steps)
    }

    fn text_reply(id: &str, text: &str) -> Value {
        json!({
            "id": id,
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 7}
        })
    }

    fn tool_reply(id: &str, command: &str) -> Value {
        json!({
            "id": id,
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "executeCommand", "input": {"command": command}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 3, "output_tokens": 2}
        })
    }

    #[test]
    fn test_to_wire_places_cache_control_and_merges_roles() {
        let turns = vec![
            Turn::system("sys").with_cache_marker(),
            Turn::user("list files"),
            Turn::assistant(
                "a1",
                vec![
                    ContentPart::text(""),
                    ContentPart::ToolCall {
                        tool_call_id: "toolu_1".to_string(),
                        tool_name: "executeCommand".to_string(),
                        args: json!({"command": "ls"}),
                    },
                ],
            ),
            Turn::tool(
                "toolu_1",
                vec![ContentPart::ToolResult {
                    tool_call_id: "toolu_1".to_string(),
                    tool_name: "executeCommand".to_string(),
                    result: json!({"success": true, "output": "a.txt"}),
                    is_error: None,
                }],
            ),
            Turn::user("continue"),
            Turn::assistant("a2", vec![ContentPart::text("done")]).with_cache_marker(),
        ];

        let (system, messages) = to_wire(&turns);

        assert_eq!(system.len(), 1);
        assert_eq!(system[0]["cache_control"], cache_control());
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content.len(), 1);
        assert_eq!(messages[1].content[0]["type"], "tool_use");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content.len(), 2);
        assert_eq!(messages[2].content[0]["type"], "tool_result");
        assert_eq!(messages[3].content[0]["cache_control"], cache_control());
        assert!(messages[0].content[0].get("cache_control").is_none());
    }

    #[test]
    fn test_to_wire_skips_unsupported_parts() {
        let image: ContentPart = serde_json::from_value(json!({"type": "image", "image": "aGk="})).unwrap();
        let turns = vec![Turn::new(
            Role::User,
            TurnContent::Parts(vec![ContentPart::text("look"), image]),
        )];

        let (_, messages) = to_wire(&turns);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, vec![json!({"type": "text", "text": "look"})]);
    }

    #[test]
    fn test_backoff_delay_saturates() {
        assert_eq!(backoff_delay_ms(1000, 1), 1000);
        assert_eq!(backoff_delay_ms(1000, 3), 4000);
        assert_eq!(backoff_delay_ms(1000, 100), u64::MAX);
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\"Title: Fix Bug\"\n"), "Fix Bug");
        assert_eq!(clean_title("'Rust Build'"), "Rust Build");
        assert_eq!(clean_title(&"x".repeat(80)).len(), 50);
    }

    #[tokio::test]
    async fn test_generate_single_step() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("msg_1", "Hello!")))
            .expect(1)
            .mount(&server)
            .await;

        let history = vec![Turn::system("sys").with_cache_marker(), Turn::user("hi")];
        let outcome = client(&server, 5).generate(&history).await.unwrap();

        assert_eq!(outcome.steps, 1);
        assert!(!outcome.step_ceiling_reached);
        assert_eq!(outcome.turns.len(), 1);
        assert_eq!(outcome.turns[0].id.as_deref(), Some("msg_1"));
        assert_eq!(outcome.turns[0].text(), "Hello!");
        assert_eq!(outcome.usage.cache_read_input_tokens, 7);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["system"][0]["cache_control"], cache_control());
        assert_eq!(body["tools"][0]["name"], "executeCommand");
    }

    #[tokio::test]
    async fn test_generate_runs_tools_between_steps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("tool_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("msg_2", "Found it")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_reply("msg_1", "echo tool-ran")))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let outcome = client(&server, 5)
            .generate(&[Turn::user("check")])
            .await
            .unwrap();

        assert_eq!(outcome.steps, 2);
        let roles: Vec<Role> = outcome.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::Tool, Role::Assistant]);
        assert_eq!(outcome.turns[1].id.as_deref(), Some("toolu_1"));
        match &outcome.turns[1].content {
            TurnContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult { result, is_error, .. } => {
                    assert_eq!(result["success"], true);
                    assert!(result["output"].as_str().unwrap().contains("tool-ran"));
                    assert_eq!(*is_error, None);
                }
                other => panic!("unexpected part {:?}", other),
            },
            other => panic!("unexpected content {:?}", other),
        }
        assert_eq!(outcome.usage.input_tokens, 13);
    }

    #[tokio::test]
    async fn test_generate_stops_at_step_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_reply("msg_1", "true")))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = client(&server, 1)
            .generate(&[Turn::user("loop")])
            .await
            .unwrap();

        assert_eq!(outcome.steps, 1);
        assert!(outcome.step_ceiling_reached);
        assert_eq!(outcome.turns.len(), 2);
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("msg_9", "ok")))
            .mount(&server)
            .await;

        let outcome = client(&server, 5)
            .generate(&[Turn::user("hi")])
            .await
            .unwrap();

        assert_eq!(outcome.turns[0].id.as_deref(), Some("msg_9"));
    }

    #[tokio::test]
    async fn test_auth_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, 5)
            .generate(&[Turn::user("hi")])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_summarize_title() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(text_reply("msg_t", "\"Title: Fix Bug\"")),
            )
            .mount(&server)
            .await;

        let turns = vec![Turn::system("sys"), Turn::user("my build fails")];
        let title = client(&server, 5).summarize(&turns, None).await;

        assert_eq!(title, "Fix Bug");
    }

    #[tokio::test]
    async fn test_summarize_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = client(&server, 5);

        assert_eq!(client.summarize(&[Turn::system("sys")], None).await, NEW_CHAT_TITLE);
        assert_eq!(
            client.summarize(&[Turn::user("hi")], Some("Old")).await,
            FALLBACK_TITLE
        );
    }
}
