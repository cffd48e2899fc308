//! Conversation Turns
//!
//! Information Hiding:
//! - The on-disk shape of a turn (string vs. part list, provider options) is
//!   owned here and nowhere else
//! - Cache marker placement and removal go through the helpers below so empty
//!   option containers never leak into the durable log

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Assistant and tool turns come back from the remote call and carry ids
    pub fn is_generated(self) -> bool {
        matches!(self, Role::Assistant | Role::Tool)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheControlKind {
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: CacheControlKind,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: CacheControlKind::Ephemeral,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicOptions {
    #[serde(rename = "cacheControl", default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl AnthropicOptions {
    fn is_empty(&self) -> bool {
        self.cache_control.is_none() && self.other.is_empty()
    }
}

/// Provider-specific annotations attached to a turn or a content part
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<AnthropicOptions>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ProviderOptions {
    fn is_empty(&self) -> bool {
        self.anthropic.is_none() && self.other.is_empty()
    }
}

fn options_have_marker(options: &Option<ProviderOptions>) -> bool {
    options
        .as_ref()
        .and_then(|o| o.anthropic.as_ref())
        .is_some_and(|a| a.cache_control.is_some())
}

fn set_marker_on(options: &mut Option<ProviderOptions>) {
    let options = options.get_or_insert_with(ProviderOptions::default);
    let anthropic = options.anthropic.get_or_insert_with(AnthropicOptions::default);
    anthropic.cache_control = Some(CacheControl::ephemeral());
}

/// Removes the marker and collapses containers it leaves empty.
/// Returns true if a marker was present.
fn strip_marker_from(options: &mut Option<ProviderOptions>) -> bool {
    let Some(opts) = options.as_mut() else {
        return false;
    };
    let Some(anthropic) = opts.anthropic.as_mut() else {
        return false;
    };
    let removed = anthropic.cache_control.take().is_some();

    if anthropic.is_empty() {
        opts.anthropic = None;
    }
    if opts.is_empty() {
        *options = None;
    }
    removed
}

/// One typed element of a structured turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(
            rename = "providerOptions",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        provider_options: Option<ProviderOptions>,
    },
    #[serde(rename = "tool-call")]
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
    #[serde(rename = "tool-result")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        result: Value,
        #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// Any other part type (images, files, reasoning), kept verbatim
    #[serde(untagged)]
    Other(Value),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text {
            text: text.into(),
            provider_options: None,
        }
    }

    /// Short human rendering, used for previews and title prompts
    pub fn render(&self) -> String {
        match self {
            ContentPart::Text { text, .. } => text.clone(),
            ContentPart::ToolCall { .. } => "[tool-call]".to_string(),
            ContentPart::ToolResult { .. } => "[tool-result]".to_string(),
            ContentPart::Other(value) => {
                format!("[{}]", value["type"].as_str().unwrap_or("unknown"))
            }
        }
    }

    fn has_marker(&self) -> bool {
        match self {
            ContentPart::Text {
                provider_options, ..
            } => options_have_marker(provider_options),
            ContentPart::ToolCall { .. }
            | ContentPart::ToolResult { .. }
            | ContentPart::Other(_) => false,
        }
    }

    fn strip_marker(&mut self) -> bool {
        match self {
            ContentPart::Text {
                provider_options, ..
            } => strip_marker_from(provider_options),
            ContentPart::ToolCall { .. }
            | ContentPart::ToolResult { .. }
            | ContentPart::Other(_) => false,
        }
    }
}

/// Either a plain string or an ordered list of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl TurnContent {
    pub fn render(&self) -> String {
        match self {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Parts(parts) => parts.iter().map(ContentPart::render).collect(),
        }
    }
}

/// One conversation entry as stored in the durable log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        rename = "providerOptions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub provider_options: Option<ProviderOptions>,
    /// Fields written by other tools, carried through rewrites untouched
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Turn {
    pub fn new(role: Role, content: TurnContent) -> Self {
        Self {
            role,
            content,
            id: None,
            provider_options: None,
            other: Map::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, TurnContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, TurnContent::Text(text.into()))
    }

    pub fn assistant(id: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self::new(Role::Assistant, TurnContent::Parts(parts)).with_id(id)
    }

    pub fn tool(id: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self::new(Role::Tool, TurnContent::Parts(parts)).with_id(id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_cache_marker(mut self) -> Self {
        self.set_cache_marker();
        self
    }

    /// True if the turn itself or any of its parts is a cache breakpoint
    pub fn has_cache_marker(&self) -> bool {
        if options_have_marker(&self.provider_options) {
            return true;
        }
        match &self.content {
            TurnContent::Text(_) => false,
            TurnContent::Parts(parts) => parts.iter().any(ContentPart::has_marker),
        }
    }

    pub fn set_cache_marker(&mut self) {
        set_marker_on(&mut self.provider_options);
    }

    /// Removes every marker on the turn and its parts. Returns true if one was present.
    pub fn strip_cache_marker(&mut self) -> bool {
        let mut removed = strip_marker_from(&mut self.provider_options);
        if let TurnContent::Parts(parts) = &mut self.content {
            for part in parts.iter_mut() {
                removed |= part.strip_marker();
            }
        }
        removed
    }

    pub fn text(&self) -> String {
        self.content.render()
    }

    /// Text parts only, without placeholders for tool parts
    pub fn spoken_text(&self) -> String {
        match &self.content {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        let parts: &[ContentPart] = match &self.content {
            TurnContent::Text(_) => &[],
            TurnContent::Parts(parts) => parts,
        };
        parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => Some((tool_call_id.as_str(), tool_name.as_str(), args)),
            _ => None,
        })
    }
}
