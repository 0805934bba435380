pub mod action;
pub mod describe;
pub mod error;
pub mod message;
pub mod model;
pub mod plan;
pub mod provider;
pub mod request;
pub mod response;
pub mod stream;

pub use action::{Action, ActionDefinition, ActionKind};
pub use describe::{Property, Schema};
pub use error::Error;
pub use message::{Message, MessageMetadata, Role, now_ms};
pub use model::{LanguageModel, LanguageModelBackend};
pub use plan::{Plan, PlanMetadata};
pub use provider::{ModelProvider, ModelProviderBackend};
pub use request::{BuildMode, ModelRequest, RequestBuilder, RequestContext, request};
pub use response::PlanResponse;
pub use stream::{PlanEvent, Usage};
