use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Which orchestration flavour the user picked in the composer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    #[default]
    Agent,
    V2,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildMode::Agent => "agent",
            BuildMode::V2 => "v2",
        }
    }
}

impl std::str::FromStr for BuildMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(BuildMode::Agent),
            "v2" => Ok(BuildMode::V2),
            other => Err(format!("unknown build mode '{other}', expected 'agent' or 'v2'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub mode: BuildMode,
    pub thinking: bool,
    pub high_power: bool,
    pub web_search: bool,
    pub conversation_history: Vec<Message>,
}

/// The frozen request sent to a model provider.
///
/// Serializes to the provider-agnostic wire shape
/// `{ message, context: { mode, thinking, highPower, webSearch, conversationHistory }, provider }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub message: String,
    pub context: RequestContext,
    pub provider: String,
}

/// Builder for [`ModelRequest`].
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    message: String,
    context: RequestContext,
    provider: String,
}

/// Convenience entry point: `bldr_llm::request("Build a todo app")`.
pub fn request(message: impl Into<String>) -> RequestBuilder {
    RequestBuilder {
        message: message.into(),
        ..Default::default()
    }
}

impl RequestBuilder {
    pub fn mode(&mut self, mode: BuildMode) -> &mut Self {
        self.context.mode = mode;
        self
    }

    pub fn thinking(&mut self, on: bool) -> &mut Self {
        self.context.thinking = on;
        self
    }

    pub fn high_power(&mut self, on: bool) -> &mut Self {
        self.context.high_power = on;
        self
    }

    pub fn web_search(&mut self, on: bool) -> &mut Self {
        self.context.web_search = on;
        self
    }

    pub fn provider(&mut self, provider: impl Into<String>) -> &mut Self {
        self.provider = provider.into();
        self
    }

    /// Attach prior conversation, keeping only the most recent `limit`
    /// messages.
    pub fn history(&mut self, messages: &[Message], limit: usize) -> &mut Self {
        let start = messages.len().saturating_sub(limit);
        self.context.conversation_history = messages[start..].to_vec();
        self
    }

    pub fn build(&self) -> ModelRequest {
        ModelRequest {
            message: self.message.clone(),
            context: self.context.clone(),
            provider: self.provider.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_wire_shape() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let req = request("Build a todo app")
            .mode(BuildMode::V2)
            .thinking(true)
            .web_search(true)
            .provider("openai")
            .history(&history, 10)
            .build();

        let value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(value["message"], "Build a todo app");
        assert_eq!(value["provider"], "openai");
        assert_eq!(value["context"]["mode"], "v2");
        assert_eq!(value["context"]["thinking"], true);
        assert_eq!(value["context"]["highPower"], false);
        assert_eq!(value["context"]["webSearch"], true);
        assert_eq!(
            value["context"]["conversationHistory"]
                .as_array()
                .map(Vec::len),
            Some(2)
        );
    }

    #[test]
    fn history_keeps_most_recent_messages() {
        let history: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        let req = request("next").history(&history, 2).build();
        let contents: Vec<&str> = req
            .context
            .conversation_history
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }
}
