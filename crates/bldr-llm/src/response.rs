use crate::error::Error;
use crate::plan::{Plan, PlanMetadata};
use crate::stream::{PlanEvent, Usage};
use futures::Stream;
use std::pin::Pin;
use tokio_stream::StreamExt;

/// A live streaming plan from a model provider.
///
/// Consume it event-by-event via [`events()`](PlanResponse::events), or
/// collect the full plan with [`into_plan()`](PlanResponse::into_plan).
pub struct PlanResponse {
    inner: Pin<Box<dyn Stream<Item = Result<PlanEvent, Error>> + Send>>,
}

impl PlanResponse {
    pub fn new(stream: impl Stream<Item = Result<PlanEvent, Error>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Replay an already complete plan as a stream: its content as a single
    /// delta, then each action, then a finish event.
    pub fn from_plan(plan: Plan) -> Self {
        let usage = Usage {
            input_tokens: 0,
            output_tokens: plan.metadata.tokens_used.min(u64::from(u32::MAX)) as u32,
        };
        let mut events = Vec::with_capacity(plan.actions.len() + plan.rejected.len() + 2);
        if !plan.content.is_empty() {
            events.push(Ok(PlanEvent::TextDelta(plan.content)));
        }
        events.extend(plan.actions.into_iter().map(|a| Ok(PlanEvent::Action(a))));
        events.extend(plan.rejected.into_iter().map(|r| Ok(PlanEvent::Rejected(r))));
        events.push(Ok(PlanEvent::Finish { usage: Some(usage) }));
        Self::new(tokio_stream::iter(events))
    }

    /// Consume the response as an async stream of events.
    pub fn events(self) -> Pin<Box<dyn Stream<Item = Result<PlanEvent, Error>> + Send>> {
        self.inner
    }

    /// Collect the full streamed response into a single plan.
    pub async fn into_plan(self) -> Result<Plan, Error> {
        let mut plan = Plan::default();
        let mut usage = None;

        let mut stream = self.inner;
        while let Some(event) = stream.next().await {
            match event? {
                PlanEvent::TextDelta(delta) => plan.content.push_str(&delta),
                PlanEvent::Action(action) => plan.actions.push(action),
                PlanEvent::Rejected(reason) => plan.rejected.push(reason),
                PlanEvent::Finish { usage: u } => usage = u,
                PlanEvent::Error(message) => return Err(Error::Sse(message)),
            }
        }

        plan.metadata = PlanMetadata {
            tokens_used: usage.map(|u| u.total()).unwrap_or_default(),
            ..Default::default()
        };
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;

    #[tokio::test]
    async fn streamed_events_collect_into_ordered_plan() {
        let events = vec![
            Ok(PlanEvent::TextDelta("Building ".into())),
            Ok(PlanEvent::Action(Action::create_folder("/src"))),
            Ok(PlanEvent::TextDelta("your app".into())),
            Ok(PlanEvent::Action(Action::create_file("/src/App.tsx", "x"))),
            Ok(PlanEvent::Finish {
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
            }),
        ];
        let plan = PlanResponse::new(tokio_stream::iter(events))
            .into_plan()
            .await
            .expect("plan");

        assert_eq!(plan.content, "Building your app");
        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].kind.name(), "create_folder");
        assert_eq!(plan.metadata.tokens_used, 15);
    }

    #[tokio::test]
    async fn mid_stream_error_fails_collection() {
        let events = vec![
            Ok(PlanEvent::TextDelta("partial".into())),
            Ok(PlanEvent::Error("overloaded".into())),
        ];
        let err = PlanResponse::new(tokio_stream::iter(events))
            .into_plan()
            .await
            .unwrap_err();
        assert!(matches!(&err, Error::Sse(message) if message == "overloaded"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rejected_calls_do_not_fail_collection() {
        let events = vec![
            Ok(PlanEvent::TextDelta("Here is your app.".into())),
            Ok(PlanEvent::Action(Action::create_file("/a.txt", "a"))),
            Ok(PlanEvent::Rejected("invalid `create_file` action".into())),
            Ok(PlanEvent::Finish { usage: None }),
        ];
        let plan = PlanResponse::new(tokio_stream::iter(events))
            .into_plan()
            .await
            .expect("plan");

        assert!(plan.is_usable());
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.rejected, vec!["invalid `create_file` action".to_string()]);
    }
}
