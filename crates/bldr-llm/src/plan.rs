use serde::{Deserialize, Serialize};

use crate::action::Action;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_score: Option<f32>,
    #[serde(default)]
    pub web_search_used: bool,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

/// A provider's answer: narrative content paired with ordered actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub content: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub metadata: PlanMetadata,
    /// Tool calls that were dropped because they did not parse.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<String>,
}

impl Plan {
    /// A plan with neither text nor actions gives the user nothing to act on.
    pub fn is_usable(&self) -> bool {
        !self.content.trim().is_empty() || !self.actions.is_empty()
    }
}
