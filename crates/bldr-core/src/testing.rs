//! Scripted collaborators shared by the coordinator and session tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bldr_llm::{
    LanguageModel, LanguageModelBackend, ModelProvider, ModelProviderBackend, ModelRequest, Plan,
    PlanEvent, PlanResponse, Usage,
};
use bldr_llm_registry::{ProviderOptions, ProviderRegistration, Registry};
use parking_lot::Mutex;

use crate::backends::{CommandOutput, CommandRunner, ProjectStore};
use crate::error::{Error, Result};

type FactoryResult = std::result::Result<ModelProvider, bldr_llm_registry::Error>;

/// One scripted model turn.
pub enum Turn {
    Plan(Plan),
    /// Stream the plan after a delay.
    Slow(Duration, Plan),
    Fail(fn() -> bldr_llm::Error),
    /// Stream some text, then fail.
    Broken(&'static str, fn() -> bldr_llm::Error),
}

#[derive(Clone, Default)]
pub struct Script {
    turns: Arc<Mutex<VecDeque<Turn>>>,
    pub requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl Script {
    pub fn new(turns: impl IntoIterator<Item = Turn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns.into_iter().collect())),
            requests: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

struct ScriptedProvider {
    id: String,
    script: Script,
}

struct ScriptedModel {
    provider: String,
    model_id: String,
    script: Script,
}

impl ModelProviderBackend for ScriptedProvider {
    fn name(&self) -> &str {
        &self.id
    }

    fn model(&self, model_id: &str) -> LanguageModel {
        LanguageModel::new(ScriptedModel {
            provider: self.id.clone(),
            model_id: model_id.to_string(),
            script: self.script.clone(),
        })
    }
}

fn plan_events(plan: Plan) -> Vec<std::result::Result<PlanEvent, bldr_llm::Error>> {
    let mut events = Vec::new();
    // Split the text so consumers see more than one delta.
    let mid = plan.content.char_indices().nth(plan.content.chars().count() / 2);
    match mid {
        Some((at, _)) if at > 0 => {
            events.push(Ok(PlanEvent::TextDelta(plan.content[..at].to_string())));
            events.push(Ok(PlanEvent::TextDelta(plan.content[at..].to_string())));
        }
        _ if !plan.content.is_empty() => {
            events.push(Ok(PlanEvent::TextDelta(plan.content.clone())));
        }
        _ => {}
    }
    events.extend(plan.actions.into_iter().map(|a| Ok(PlanEvent::Action(a))));
    events.extend(plan.rejected.into_iter().map(|r| Ok(PlanEvent::Rejected(r))));
    events.push(Ok(PlanEvent::Finish {
        usage: Some(Usage {
            input_tokens: 12,
            output_tokens: 30,
        }),
    }));
    events
}

impl LanguageModelBackend for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn plan(&self, request: &ModelRequest) -> PlanResponse {
        self.script.requests.lock().push(request.clone());
        let turn = self.script.turns.lock().pop_front();
        match turn {
            Some(Turn::Plan(plan)) => PlanResponse::new(tokio_stream::iter(plan_events(plan))),
            Some(Turn::Slow(delay, plan)) => PlanResponse::new(async_stream::stream! {
                tokio::time::sleep(delay).await;
                for event in plan_events(plan) {
                    yield event;
                }
            }),
            Some(Turn::Fail(error)) => PlanResponse::new(tokio_stream::iter(vec![Err(error())])),
            Some(Turn::Broken(text, error)) => PlanResponse::new(tokio_stream::iter(vec![
                Ok(PlanEvent::TextDelta(text.to_string())),
                Err(error()),
            ])),
            None => PlanResponse::new(tokio_stream::iter(vec![Err(bldr_llm::Error::Other(
                "script exhausted".into(),
            ))])),
        }
    }
}

/// A registry with a keyless `scripted` provider and a `locked` provider
/// whose API key is never set.
pub fn registry(script: &Script) -> Registry {
    let mut registry = Registry::new();
    let scripted = script.clone();
    registry.add_provider(
        ProviderRegistration::new("scripted", "Scripted", "script-1"),
        move |options: ProviderOptions| -> FactoryResult {
            Ok(ModelProvider::new(ScriptedProvider {
                id: options.id,
                script: scripted.clone(),
            }))
        },
    );
    let locked = script.clone();
    registry.add_provider(
        ProviderRegistration::new("locked", "Locked", "locked-1")
            .with_credential_env("BLDR_TEST_NEVER_SET_API_KEY"),
        move |options: ProviderOptions| -> FactoryResult {
            Ok(ModelProvider::new(ScriptedProvider {
                id: options.id,
                script: locked.clone(),
            }))
        },
    );
    registry
}

/// Project store and command runner that log every call into one shared,
/// ordered journal. Paths containing `fail` error out.
#[derive(Clone, Default)]
pub struct Journal {
    pub entries: Arc<Mutex<Vec<String>>>,
    files: Arc<Mutex<std::collections::BTreeMap<String, String>>>,
}

impl Journal {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }
}

#[async_trait]
impl ProjectStore for Journal {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.entries.lock().push(format!("write {path}"));
        if path.contains("fail") {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.files.lock().insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        self.entries.lock().push(format!("mkdir {path}"));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.file(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.files.lock().contains_key(path))
    }
}

#[async_trait]
impl CommandRunner for Journal {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.entries.lock().push(format!("run {command}"));
        let code = if command.contains("fail") { 1 } else { 0 };
        Ok(CommandOutput {
            exit_code: Some(code),
            ..Default::default()
        })
    }
}
