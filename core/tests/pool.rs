use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use troupe_core::{
    Agent, ChatMessage, ChatRequest, ChatResponse, FnRouter, HistoryStore, InMemoryHistory,
    LastResult, OnError, Pool, PoolEvent, PoolStatus, Provider, Role, RoundRobinRouter,
    RouterResult, State, StopReason, Tool, ToolCall,
};

/// Plays queued responses first, then answers `"<label> #<n>"`.
struct Scripted {
    label: String,
    queued: Mutex<VecDeque<ChatResponse>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl Scripted {
    fn new(label: &str) -> Arc<Self> {
        Self::with_script(label, vec![])
    }

    fn with_script(label: &str, script: Vec<ChatResponse>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            queued: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(vec![]),
        })
    }

    fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Provider for Scripted {
    fn model_name(&self) -> &str {
        &self.label
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(request.messages.to_vec());
        if let Some(response) = self.queued.lock().unwrap().pop_front() {
            return Ok(response);
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChatResponse::text(format!("{} #{}", self.label, n)))
    }
}

fn agent(name: &str) -> Agent {
    Agent::builder(name)
        .description(format!("{} agent", name))
        .model(Scripted::new(name))
        .build()
        .unwrap()
}

fn tool_call(name: &str, args: serde_json::Value) -> ChatResponse {
    ChatResponse {
        text: None,
        tool_calls: vec![ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments: args.to_string(),
        }],
    }
}

fn speakers(state: &State) -> Vec<String> {
    state
        .history()
        .iter()
        .filter_map(|m| m.agent_name.clone())
        .collect()
}

#[tokio::test]
async fn max_iter_zero_runs_no_turns() {
    let mut pool = Pool::builder()
        .agents([agent("a"), agent("b")])
        .max_iter(0)
        .build()
        .unwrap();

    let outcome = pool.run("hello").await.unwrap();

    assert_eq!(outcome.turns, 0);
    assert_eq!(outcome.output, "");
    assert_eq!(outcome.stop_reason, StopReason::MaxIterReached);
    assert_eq!(pool.state().history().len(), 1);
    assert_eq!(pool.state().history()[0].content, "hello");
    assert_eq!(pool.status(), PoolStatus::Stopped(StopReason::MaxIterReached));
}

#[tokio::test]
async fn max_iter_one_runs_exactly_one_turn() {
    let mut pool = Pool::builder()
        .agents([agent("a"), agent("b")])
        .router(RoundRobinRouter::cycling(["a", "b"]))
        .max_iter(1)
        .build()
        .unwrap();

    let outcome = pool.run("hello").await.unwrap();

    assert_eq!(outcome.turns, 1);
    assert_eq!(outcome.output, "a #1");
    assert_eq!(speakers(pool.state()), vec!["a"]);
}

#[tokio::test]
async fn cycling_round_robin_alternates_until_max_iter() {
    let mut pool = Pool::builder()
        .agents([agent("a"), agent("b")])
        .router(RoundRobinRouter::cycling(["a", "b"]))
        .max_iter(5)
        .build()
        .unwrap();

    let outcome = pool.run("go").await.unwrap();

    assert_eq!(speakers(pool.state()), vec!["a", "b", "a", "b", "a"]);
    assert_eq!(outcome.turns, 5);
    assert_eq!(outcome.output, "a #3");
    assert_eq!(outcome.stop_reason, StopReason::MaxIterReached);
}

#[tokio::test]
async fn default_router_makes_one_pass_in_registration_order() {
    let mut pool = Pool::new([agent("planner"), agent("writer"), agent("critic")]).unwrap();
    assert_eq!(pool.router().name(), "round_robin");

    let outcome = pool.run("draft a haiku").await.unwrap();

    assert_eq!(speakers(pool.state()), vec!["planner", "writer", "critic"]);
    assert_eq!(outcome.stop_reason, StopReason::RouterSignaledStop);
    assert_eq!(outcome.output, "critic #1");
}

#[tokio::test]
async fn three_turn_history_is_seeded_input_then_attributed_turns() {
    let mut pool = Pool::new([agent("a"), agent("b"), agent("c")]).unwrap();
    pool.run("start").await.unwrap();

    let history = pool.state().history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].agent_name, None);
    for (msg, name) in history[1..].iter().zip(["a", "b", "c"]) {
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.agent_name.as_deref(), Some(name));
        assert_eq!(msg.content, format!("{} #1", name));
    }
}

#[tokio::test]
async fn unknown_agent_is_a_routing_error_and_keeps_history() {
    let mut pool = Pool::builder()
        .agents([agent("a"), agent("b")])
        .router(FnRouter::new(|_, call_count, _| {
            Ok(match call_count {
                0 => RouterResult::next("a"),
                _ => RouterResult::next("nobody"),
            })
        }))
        .build()
        .unwrap();

    let err = pool.run("hi").await.unwrap_err();

    assert!(err.is_routing());
    assert!(err.to_string().contains("nobody"));
    assert_eq!(speakers(pool.state()), vec!["a"]);
    assert_eq!(pool.state().history().len(), 2);
    assert_eq!(pool.status(), PoolStatus::Stopped(StopReason::UnknownAgent));
}

#[tokio::test]
async fn max_iter_wins_over_a_simultaneous_stop() {
    let consulted = Arc::new(AtomicUsize::new(0));
    let seen = consulted.clone();
    let mut pool = Pool::builder()
        .agent(agent("a"))
        .router(FnRouter::new(move |_, call_count, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(if call_count < 2 {
                RouterResult::next("a")
            } else {
                RouterResult::stop()
            })
        }))
        .max_iter(2)
        .build()
        .unwrap();

    let outcome = pool.run("hi").await.unwrap();

    assert_eq!(outcome.turns, 2);
    assert_eq!(outcome.stop_reason, StopReason::MaxIterReached);
    assert_eq!(consulted.load(Ordering::SeqCst), 3);
}

#[test]
fn construction_rejects_invalid_pools() {
    let duplicate = Pool::new([agent("a"), agent("a")]).unwrap_err();
    assert!(duplicate.is_configuration());

    let empty = Pool::new(Vec::<Agent>::new()).unwrap_err();
    assert!(empty.is_configuration());

    let stray = Pool::builder()
        .agent(agent("a"))
        .router(RoundRobinRouter::new(["a", "ghost"]))
        .build()
        .unwrap_err();
    assert!(stray.is_configuration());
    assert!(stray.to_string().contains("ghost"));
}

#[tokio::test]
async fn router_receives_last_result_and_shared_data() {
    let log: Arc<Mutex<Vec<Option<LastResult>>>> = Arc::new(Mutex::new(vec![]));
    let recorded = log.clone();
    let mut pool = Pool::builder()
        .agents([agent("a"), agent("b")])
        .router(FnRouter::new(move |state, call_count, last| {
            recorded.lock().unwrap().push(last.cloned());
            state.set("decisions", &(call_count + 1))?;
            Ok(match call_count {
                0 => RouterResult::next("a"),
                1 => RouterResult::next("b"),
                _ => RouterResult::stop(),
            })
        }))
        .build()
        .unwrap();

    pool.run("hi").await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3);
    assert!(log[0].is_none());
    assert_eq!(log[1].as_ref().unwrap().agent, "a");
    assert_eq!(log[2].as_ref().unwrap().output, "b #1");
    assert_eq!(pool.state().get::<usize>("decisions"), Some(3));
}

#[tokio::test]
async fn data_written_in_one_turn_is_visible_in_the_next() {
    let write = Tool::builder()
        .name("write_note")
        .handler(|args| async move {
            let note = args.string("note")?;
            args.data().set_value("note", json!(note));
            Ok::<_, anyhow::Error>(json!("saved"))
        })
        .build()
        .unwrap();
    let read = Tool::builder()
        .name("read_note")
        .handler(|args| async move {
            Ok::<_, anyhow::Error>(args.data().get_value("note").unwrap_or(json!(null)))
        })
        .build()
        .unwrap();

    let writer_model = Scripted::with_script(
        "writer",
        vec![tool_call("write_note", json!({"note": "meet at noon"}))],
    );
    let reader_model = Scripted::with_script("reader", vec![tool_call("read_note", json!({}))]);

    let writer = Agent::builder("writer")
        .model(writer_model)
        .tool(write)
        .build()
        .unwrap();
    let reader = Agent::builder("reader")
        .model(reader_model.clone())
        .tool(read)
        .build()
        .unwrap();

    let mut pool = Pool::new([writer, reader]).unwrap();
    pool.run("remember the meeting").await.unwrap();

    let last = reader_model.last_request();
    let tool_result = last.iter().rev().find(|m| m.role == "tool").unwrap();
    assert_eq!(tool_result.content, "meet at noon");
    assert_eq!(pool.state().data().get::<String>("note").as_deref(), Some("meet at noon"));
}

#[tokio::test]
async fn later_agents_see_earlier_output_attributed() {
    let critic_model = Scripted::new("critic");
    let critic = Agent::builder("critic")
        .model(critic_model.clone())
        .build()
        .unwrap();
    let mut pool = Pool::new([agent("writer"), critic]).unwrap();

    pool.run("write something").await.unwrap();

    let request = critic_model.last_request();
    assert_eq!(request[0].role, "system");
    assert!(request[0].content.contains("- writer: writer agent"));
    assert_eq!(request[1].content, "write something");
    assert_eq!(request[2].role, "user");
    assert_eq!(request[2].content, "[writer]: writer #1");
}

#[tokio::test]
async fn raising_tool_aborts_the_run_but_keeps_state() {
    let failing = Tool::builder()
        .name("explode")
        .on_error(OnError::Raise)
        .handler(|_args| async move { Err(anyhow::anyhow!("boom")) })
        .build()
        .unwrap();
    let doomed = Agent::builder("b")
        .model(Scripted::with_script("b", vec![tool_call("explode", json!({}))]))
        .tool(failing)
        .build()
        .unwrap();
    let mut pool = Pool::new([agent("a"), doomed]).unwrap();

    let err = pool.run("go").await.unwrap_err();

    assert!(matches!(err, troupe_core::PoolError::Tool(ref e) if e.tool() == "explode"));
    assert_eq!(speakers(pool.state()), vec!["a"]);
    assert_eq!(pool.status(), PoolStatus::Stopped(StopReason::Failed));
}

#[tokio::test]
async fn return_error_tool_does_not_abort_the_run() {
    let failing = Tool::builder()
        .name("flaky")
        .on_error(OnError::ReturnError)
        .handler(|_args| async move { Err(anyhow::anyhow!("down")) })
        .build()
        .unwrap();
    let model = Scripted::with_script("a", vec![tool_call("flaky", json!({}))]);
    let a = Agent::builder("a")
        .model(model.clone())
        .tool(failing)
        .build()
        .unwrap();
    let mut pool = Pool::new([a]).unwrap();

    let outcome = pool.run("go").await.unwrap();

    assert_eq!(outcome.output, "a #1");
    let request = model.last_request();
    assert!(request.last().unwrap().content.starts_with("Error:"));
}

#[tokio::test]
async fn agent_tracing_flag_beats_pool_default() {
    let echo = || {
        Tool::builder()
            .name("echo")
            .handler(|args| async move { Ok::<_, anyhow::Error>(args.into_value()) })
            .build()
            .unwrap()
    };
    let quiet = Agent::builder("quiet")
        .model(Scripted::with_script("quiet", vec![tool_call("echo", json!({}))]))
        .tool(echo())
        .tracing(false)
        .build()
        .unwrap();
    let loud = Agent::builder("loud")
        .model(Scripted::with_script("loud", vec![tool_call("echo", json!({}))]))
        .tool(echo())
        .build()
        .unwrap();
    let mut pool = Pool::builder()
        .agents([quiet, loud])
        .tracing(true)
        .build()
        .unwrap();

    assert!(pool.tracing());
    assert!(!pool.agent("quiet").unwrap().tracing_enabled());
    assert!(pool.agent("loud").unwrap().tracing_enabled());

    let traces: Vec<(String, usize)> = pool
        .stream("go")
        .filter_map(|event| async move {
            match event {
                Ok(PoolEvent::TurnCompleted { result, trace, .. }) => {
                    Some((result.agent, trace.len()))
                }
                _ => None,
            }
        })
        .collect()
        .await;

    assert_eq!(
        traces,
        vec![("quiet".to_string(), 0), ("loud".to_string(), 1)]
    );
}

#[tokio::test]
async fn default_model_fills_only_agents_without_one() {
    let fallback = Scripted::new("fallback");
    let bare = Agent::builder("bare").build().unwrap();
    let mut pool = Pool::builder()
        .agents([bare, agent("own")])
        .default_model(fallback.clone())
        .build()
        .unwrap();

    assert_eq!(pool.default_model().unwrap().model_name(), "fallback");
    assert_eq!(pool.agent("bare").unwrap().model().unwrap().model_name(), "fallback");
    assert_eq!(pool.agent("own").unwrap().model().unwrap().model_name(), "own");

    let outcome = pool.run("hi").await.unwrap();
    assert_eq!(speakers(pool.state()), vec!["bare", "own"]);
    assert_eq!(pool.state().history()[1].content, "fallback #1");
    assert_eq!(outcome.output, "own #1");
}

#[tokio::test]
async fn agent_without_any_model_fails_its_turn() {
    let mut pool = Pool::new([Agent::builder("bare").build().unwrap()]).unwrap();
    let err = pool.run("hi").await.unwrap_err();
    assert!(matches!(err, troupe_core::PoolError::Agent { ref agent, .. } if agent == "bare"));
    assert_eq!(pool.state().history().len(), 1);
}

#[tokio::test]
async fn state_persists_across_runs_and_turns_restart() {
    let mut pool = Pool::new([agent("a"), agent("b")]).unwrap();

    let first = pool.run("one").await.unwrap();
    let second = pool.run("two").await.unwrap();

    assert_eq!(first.turns, 2);
    assert_eq!(second.turns, 2);
    assert_ne!(first.run_id, second.run_id);
    let contents: Vec<&str> = pool
        .state()
        .history()
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["one", "a #1", "b #1", "two", "a #2", "b #2"]);
}

#[tokio::test]
async fn finished_pool_hands_its_state_to_the_next_one() {
    let mut drafting = Pool::new([agent("drafter")]).unwrap();
    drafting.run("outline").await.unwrap();
    drafting.state().set("draft", &"v1").unwrap();

    let mut review = Pool::builder()
        .agent(agent("reviewer"))
        .state(drafting.into_state())
        .build()
        .unwrap();
    review.run("review it").await.unwrap();

    assert_eq!(speakers(review.state()), vec!["drafter", "reviewer"]);
    assert_eq!(review.state().get::<String>("draft").as_deref(), Some("v1"));
    assert_eq!(review.state().agents().len(), 1);
}

#[tokio::test]
async fn supplied_state_is_shared_and_pool_history_store_wins() {
    let carried = Arc::new(InMemoryHistory::new());
    let preferred = Arc::new(InMemoryHistory::new());
    let state = State::new().with_history_store(carried.clone());
    state.set("topic", &"tides").unwrap();

    let mut pool = Pool::builder()
        .agent(agent("a"))
        .state(state)
        .history(preferred.clone())
        .build()
        .unwrap();

    assert_eq!(pool.state().get::<String>("topic").as_deref(), Some("tides"));
    assert_eq!(pool.state().agents().len(), 1);

    pool.run("hi").await.unwrap();

    assert_eq!(preferred.count().await.unwrap(), 2);
    assert_eq!(carried.count().await.unwrap(), 0);
    let mirrored = preferred.messages().await.unwrap();
    assert_eq!(mirrored, pool.state().history().to_vec());
}

#[tokio::test]
async fn observed_stream_reports_every_turn() {
    let mut pool = Pool::new([agent("a"), agent("b")]).unwrap();

    let events: Vec<PoolEvent> = pool
        .stream_observe("hi")
        .map(|event| event.unwrap())
        .collect()
        .await;

    let fragments: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            PoolEvent::Fragment { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(fragments, vec!["a #1", "b #1"]);
    assert!(matches!(
        events.last(),
        Some(PoolEvent::Finished(outcome)) if outcome.stop_reason == StopReason::RouterSignaledStop
    ));
    assert_eq!(pool.state().history().len(), 3);
}
