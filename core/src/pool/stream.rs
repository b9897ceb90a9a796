use crate::error::PoolError;
use crate::pool::{Pool, RunOutcome};
use crate::router::LastResult;
use crate::tools::AttemptRecord;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub(crate) type EventSender = mpsc::UnboundedSender<Result<PoolEvent, PoolError>>;

#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// Only emitted by [`Pool::stream_observe`].
    TurnStarted { agent: String, turn: usize },
    /// Output fragment of the running agent; only emitted by [`Pool::stream_observe`].
    Fragment { agent: String, text: String },
    TurnCompleted {
        turn: usize,
        result: LastResult,
        trace: Vec<AttemptRecord>,
    },
    Finished(RunOutcome),
}

impl Pool {
    /// One [`PoolEvent::TurnCompleted`] per turn, then [`PoolEvent::Finished`].
    ///
    /// A failed run ends the stream with the error.
    pub fn stream(
        &mut self,
        input: impl Into<String>,
    ) -> BoxStream<'_, Result<PoolEvent, PoolError>> {
        self.event_stream(input.into(), false)
    }

    /// Like [`Pool::stream`], with turn starts and output fragments interleaved.
    pub fn stream_observe(
        &mut self,
        input: impl Into<String>,
    ) -> BoxStream<'_, Result<PoolEvent, PoolError>> {
        self.event_stream(input.into(), true)
    }

    /// The run is polled by the returned stream and never spawned. Dropping the
    /// stream cancels the run at its next await point; completed turns stay in
    /// the state and the status keeps `Running` until the next run.
    fn event_stream(
        &mut self,
        input: String,
        fine: bool,
    ) -> BoxStream<'_, Result<PoolEvent, PoolError>> {
        // rx lives in the same stream as the driver, so a send can only fail
        // once both are gone.
        let (tx, rx) = mpsc::unbounded_channel();

        let driver = async move {
            let finished = self
                .drive(input, Some(&tx), fine)
                .await
                .map(PoolEvent::Finished);
            let _ = tx.send(finished);
        };

        let events = UnboundedReceiverStream::new(rx);
        let driver = stream::once(driver)
            .filter_map(|()| async { None::<Result<PoolEvent, PoolError>> });

        stream::select(events, driver).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::router::{FnRouter, RoundRobinRouter, RouterResult};
    use crate::traits::{ChatRequest, ChatResponse, Provider};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl Provider for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ChatResponse::text(format!("echo: {}", last)))
        }
    }

    struct Slow(Arc<AtomicUsize>);

    #[async_trait]
    impl Provider for Slow {
        fn model_name(&self) -> &str {
            "slow"
        }

        async fn chat(&self, _request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(ChatResponse::text("done"))
        }
    }

    fn pool() -> Pool {
        Pool::builder()
            .agent(Agent::builder("a").build().unwrap())
            .agent(Agent::builder("b").build().unwrap())
            .default_model(Arc::new(Echo))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn coarse_stream_yields_completed_turns_then_outcome() {
        let mut pool = pool();
        let events: Vec<_> = pool.stream("hi").collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            Ok(PoolEvent::TurnCompleted { turn: 1, result, .. }) if result.agent == "a"
        ));
        assert!(matches!(
            &events[1],
            Ok(PoolEvent::TurnCompleted { turn: 2, result, .. }) if result.agent == "b"
        ));
        assert!(matches!(&events[2], Ok(PoolEvent::Finished(outcome)) if outcome.turns == 2));
    }

    #[tokio::test]
    async fn observed_stream_interleaves_fragments_per_turn() {
        let mut pool = pool();
        let events: Vec<PoolEvent> = pool
            .stream_observe("hi")
            .map(|e| e.unwrap())
            .collect()
            .await;

        let labels: Vec<String> = events
            .iter()
            .map(|e| match e {
                PoolEvent::TurnStarted { agent, .. } => format!("start:{}", agent),
                PoolEvent::Fragment { agent, .. } => format!("fragment:{}", agent),
                PoolEvent::TurnCompleted { result, .. } => format!("done:{}", result.agent),
                PoolEvent::Finished(_) => "finished".to_string(),
            })
            .collect();
        assert_eq!(
            labels,
            vec![
                "start:a", "fragment:a", "done:a", "start:b", "fragment:b", "done:b", "finished"
            ]
        );
    }

    #[tokio::test]
    async fn stream_ends_with_routing_error() {
        let mut pool = Pool::builder()
            .agent(Agent::builder("a").build().unwrap())
            .default_model(Arc::new(Echo))
            .router(FnRouter::new(|_, call_count, _| {
                Ok(if call_count == 0 {
                    RouterResult::next("a")
                } else {
                    RouterResult::next("ghost")
                })
            }))
            .build()
            .unwrap();

        let events: Vec<_> = pool.stream("hi").collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(&events[1], Err(e) if e.is_routing()));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_cancels_the_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pool = Pool::builder()
            .agent(Agent::builder("a").build().unwrap())
            .agent(Agent::builder("b").build().unwrap())
            .router(RoundRobinRouter::cycling(["a", "b"]))
            .max_iter(5)
            .default_model(Arc::new(Slow(calls.clone())))
            .build()
            .unwrap();

        {
            let mut events = pool.stream("hi");
            let first = events.next().await.unwrap().unwrap();
            assert!(matches!(first, PoolEvent::TurnCompleted { turn: 1, .. }));
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        // turn 2 had started when the stream went away and never completed
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.state().history().len(), 2);
    }
}
