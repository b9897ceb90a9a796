use crate::router::{LastResult, Router, RouterResult};
use crate::state::State;
use async_trait::async_trait;
use std::fmt;

type DecideFn =
    dyn Fn(&State, usize, Option<&LastResult>) -> anyhow::Result<RouterResult> + Send + Sync;

/// Router backed by an arbitrary closure.
pub struct FnRouter {
    name: String,
    decide: Box<DecideFn>,
    candidates: Option<Vec<String>>,
}

impl FnRouter {
    pub fn new<F>(decide: F) -> Self
    where
        F: Fn(&State, usize, Option<&LastResult>) -> anyhow::Result<RouterResult>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: "function".to_string(),
            decide: Box::new(decide),
            candidates: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Declares the names the closure may return so the pool can check them at construction.
    pub fn with_candidates(mut self, candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.candidates = Some(candidates.into_iter().map(Into::into).collect());
        self
    }
}

impl fmt::Debug for FnRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRouter")
            .field("name", &self.name)
            .field("candidates", &self.candidates)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Router for FnRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(
        &self,
        state: &State,
        call_count: usize,
        last: Option<&LastResult>,
    ) -> anyhow::Result<RouterResult> {
        (self.decide)(state, call_count, last)
    }

    fn candidates(&self) -> Option<&[String]> {
        self.candidates.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delegates_to_closure() {
        let router = FnRouter::new(|state, call_count, last| {
            state.set("seen", &call_count)?;
            Ok(match last {
                None => RouterResult::next("planner"),
                Some(last) if last.agent == "planner" => RouterResult::next("writer"),
                Some(_) => RouterResult::stop(),
            })
        });
        let state = State::new();

        assert_eq!(
            router.decide(&state, 0, None).await.unwrap(),
            RouterResult::next("planner")
        );
        let last = LastResult {
            agent: "planner".into(),
            output: "plan".into(),
            tools_used: vec![],
        };
        assert_eq!(
            router.decide(&state, 1, Some(&last)).await.unwrap(),
            RouterResult::next("writer")
        );
        assert_eq!(state.get::<usize>("seen"), Some(1));
        assert!(router.candidates().is_none());
    }

    #[tokio::test]
    async fn errors_propagate() {
        let router = FnRouter::new(|_, _, _| anyhow::bail!("no idea")).with_name("broken");
        assert_eq!(router.name(), "broken");
        assert!(router.decide(&State::new(), 0, None).await.is_err());
    }
}
