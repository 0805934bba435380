use serde::{Deserialize, Serialize};

use crate::action::Action;

/// An event emitted while a provider streams its plan.
#[derive(Debug, Clone)]
pub enum PlanEvent {
    /// A chunk of narrative text.
    TextDelta(String),

    /// A fully parsed action. Actions arrive in plan order.
    Action(Action),

    /// A tool call that could not be turned into an action. The rest of the
    /// plan stays usable.
    Rejected(String),

    /// Generation is complete.
    Finish { usage: Option<Usage> },

    /// An error occurred mid-stream.
    Error(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}
