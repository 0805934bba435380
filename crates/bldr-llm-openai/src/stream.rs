//! Opens an SSE connection to the Chat Completions API and maps chunks to
//! bldr-llm `PlanEvent`s.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ProviderState;
use crate::types::{ChatChunk, ChatRequest, ErrorEnvelope};
use bldr_llm::error::Error;
use bldr_llm::{Action, PlanEvent, Usage};
use eventsource_stream::Eventsource;
use futures::Stream;
use tokio_stream::StreamExt;

pub fn open(
    state: Arc<ProviderState>,
    body: ChatRequest,
) -> impl Stream<Item = Result<PlanEvent, Error>> + Send {
    async_stream::try_stream! {
        let url = format!("{}/chat/completions", state.config.base_url);
        tracing::debug!(provider = %state.config.name, model = %body.model, "opening chat completion stream");
        let resp = state
            .client
            .post(&url)
            .bearer_auth(&state.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(Box::new(e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            tracing::warn!(provider = %state.config.name, status = status.as_u16(), "chat completion request rejected");
            let body_text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body_text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body_text);
            Err(Error::Api {
                code: status.as_str().to_string(),
                message,
            })?;
            unreachable!();
        }

        let mut sse = resp.bytes_stream().eventsource();
        let mut mapper = ChunkMapper::new();

        while let Some(event) = sse.next().await {
            match event {
                Ok(event) => {
                    for plan_event in mapper.map_data(&event.data)? {
                        yield plan_event;
                    }
                }
                Err(e) => {
                    Err(Error::Sse(e.to_string()))?;
                }
            }
        }

        // Some compatible servers close the stream without a `[DONE]` marker.
        for plan_event in mapper.finish()? {
            yield plan_event;
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk mapper (stateful — assembles tool call fragments by index)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

pub(crate) struct ChunkMapper {
    pending: BTreeMap<usize, PendingCall>,
    usage: Option<Usage>,
    finished: bool,
}

impl ChunkMapper {
    pub(crate) fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            usage: None,
            finished: false,
        }
    }

    pub(crate) fn map_data(&mut self, data: &str) -> Result<Vec<PlanEvent>, Error> {
        if data.trim() == "[DONE]" {
            return self.finish();
        }

        let chunk: ChatChunk = serde_json::from_str(data)?;
        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                events.push(PlanEvent::TextDelta(text));
            }
            for call in choice.delta.tool_calls {
                let pending = self.pending.entry(call.index).or_default();
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        pending.arguments.push_str(&arguments);
                    }
                }
            }
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        Ok(events)
    }

    /// Emit the assembled actions in call order, then the finish event.
    /// A call that does not parse is reported and skipped.
    pub(crate) fn finish(&mut self) -> Result<Vec<PlanEvent>, Error> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        let mut events = Vec::with_capacity(self.pending.len() + 1);
        for (index, call) in std::mem::take(&mut self.pending) {
            match Action::from_call(&call.name, &call.arguments) {
                Ok(action) => events.push(PlanEvent::Action(action)),
                Err(e) => {
                    tracing::warn!(index, tool = %call.name, error = %e, "dropping tool call");
                    events.push(PlanEvent::Rejected(e.to_string()));
                }
            }
        }
        events.push(PlanEvent::Finish {
            usage: self.usage.take(),
        });
        Ok(events)
    }
}
