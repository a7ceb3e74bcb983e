use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use super::*;
use crate::chat::{ChatMessage, ChatResponse, ChatRole};
use crate::config::{ClientConfig, ToolExecutionMode};
use crate::error::LlmError;
use crate::middleware::{Directive, Middleware, MiddlewareStack};
use crate::mock::MockProvider;
use crate::provider::{ChatParams, DynProvider, ToolDefinition};
use crate::retry::RetryPolicy;
use crate::session::{ChatSession, SessionEvent, Termination, TurnStep};
use crate::test_helpers::{response_events, sample_response, sample_tool_response, tool_call};

fn count_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"n": {"type": "integer"}},
        "required": ["n"]
    })
}

fn counter(runs: &Arc<AtomicU32>) -> impl ToolHandler + 'static {
    let runs = Arc::clone(runs);
    tool_fn(
        ToolDefinition::new("count", "Counts its invocations", count_schema()),
        move |input: Value| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ToolError>(format!("n={}", input["n"]))
            }
        },
    )
}

fn config(mode: ToolExecutionMode) -> crate::config::ClientConfigBuilder {
    ClientConfig::builder("mock")
        .retry(RetryPolicy::none())
        .tool_mode(mode)
}

fn session_with(mock: &MockProvider, config: ClientConfig, tools: ToolRegistry) -> ChatSession {
    ChatSession::new(Arc::new(mock.clone()) as Arc<dyn DynProvider>, config).with_tools(tools)
}

fn count_call(id: &str, n: i64) -> crate::chat::ToolCall {
    tool_call(id, "count", json!({"n": n}))
}

#[tokio::test]
async fn test_budget_allows_exactly_max_tool_calls() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    for i in 0..6 {
        mock.queue_response(sample_tool_response(vec![count_call(&format!("c{i}"), i)]));
    }
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let err = chat.ask("count forever").await.unwrap_err();
    assert!(matches!(err.root(), LlmError::ToolLimitExceeded { limit: 5 }));
    assert!(err.to_string().starts_with("mock tool calling failed"));
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert_eq!(mock.call_count(), 6);
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_batch_over_budget_runs_nothing() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![
        count_call("a", 1),
        count_call("b", 2),
        count_call("c", 3),
    ]));
    let config = config(ToolExecutionMode::Auto).max_tool_calls(2).build().unwrap();
    let mut chat = session_with(&mock, config, tools);

    let err = chat.ask("go").await.unwrap_err();
    assert!(matches!(err.root(), LlmError::ToolLimitExceeded { limit: 2 }));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_recoverable_errors_count_against_budget() {
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition::new("broken", "Always fails", json!({"type": "object"})),
        |_input: Value| async move { Err::<String, _>(ToolError::new("still broken")) },
    ));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("a", "broken", json!({}))]));
    mock.queue_response(sample_tool_response(vec![tool_call("b", "broken", json!({}))]));
    let config = config(ToolExecutionMode::Auto).max_tool_calls(1).build().unwrap();
    let mut chat = session_with(&mock, config, tools);

    let err = chat.ask("go").await.unwrap_err();
    assert!(matches!(err.root(), LlmError::ToolLimitExceeded { limit: 1 }));
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test]
async fn test_tool_results_fed_back_then_answer() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![count_call("c1", 7)]));
    mock.queue_response(sample_response("Seven."));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let outcome = chat
        .ask_with("count to seven", Default::default())
        .await
        .unwrap();
    assert_eq!(outcome.text(), "Seven.");
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.tool_calls_executed, 1);
    assert_eq!(outcome.usage.input_tokens, 200);

    let roles: Vec<_> = chat.history().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [ChatRole::User, ChatRole::Assistant, ChatRole::Tool, ChatRole::Assistant]
    );
    let result = &chat.history()[2];
    assert_eq!(result.tool_call_id.as_deref(), Some("c1"));
    assert_eq!(result.name.as_deref(), Some("count"));
    assert_eq!(result.text(), "n=7");

    let second = &mock.recorded_calls()[1];
    assert_eq!(second.messages.len(), 3);
    assert!(second.tools.as_ref().is_some_and(|t| t[0].name == "count"));
}

#[tokio::test]
async fn test_halt_ends_turn_without_another_model_call() {
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition::new("search", "Search", json!({"type": "object"})),
        |_input: Value| async move { Ok::<_, ToolError>("three results") },
    ));
    tools.register(tool_fn(
        ToolDefinition::new("checkout", "Place the order", json!({"type": "object"})),
        |_input: Value| async move { Ok::<_, ToolError>(ToolOutput::halt("Order placed.")) },
    ));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("s1", "search", json!({}))]));
    mock.queue_response(sample_tool_response(vec![tool_call("k1", "checkout", json!({}))]));
    mock.queue_response(sample_response("never sent"));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let outcome = chat.ask_with("buy it", Default::default()).await.unwrap();
    assert_eq!(outcome.termination, Termination::Halted);
    assert_eq!(outcome.text(), "Order placed.");
    assert_eq!(outcome.iterations, 2);
    assert_eq!(mock.call_count(), 2);
    assert_eq!(chat.history().last().unwrap().role, ChatRole::Assistant);
}

#[tokio::test]
async fn test_halt_skips_unfinished_calls_in_batch() {
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition::new("stop", "Stop", json!({"type": "object"})),
        |_input: Value| async move { Ok::<_, ToolError>(ToolOutput::halt("stopped")) },
    ));
    tools.register(tool_fn(
        ToolDefinition::new("slow", "Slow", json!({"type": "object"})),
        |_input: Value| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ToolError>("late")
        },
    ));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![
        tool_call("s", "slow", json!({})),
        tool_call("h", "stop", json!({})),
    ]));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let outcome = chat.ask_with("go", Default::default()).await.unwrap();
    assert!(outcome.is_halted());
    let skipped = chat
        .history()
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("s"))
        .unwrap();
    assert!(skipped.is_error);
    assert!(skipped.text().starts_with("Skipped"));
}

#[tokio::test]
async fn test_invalid_arguments_fed_back_once() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("c1", "count", json!({"n": "x"}))]));
    mock.queue_response(sample_tool_response(vec![count_call("c2", 2)]));
    mock.queue_response(sample_response("fixed"));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let outcome = chat.ask_with("count", Default::default()).await.unwrap();
    assert_eq!(outcome.text(), "fixed");
    assert_eq!(outcome.tool_calls_executed, 1);
    let rejected = &chat.history()[2];
    assert!(rejected.is_error);
    assert_eq!(rejected.tool_call_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_repeated_validation_failure_fails_turn() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("c1", "count", json!({}))]));
    mock.queue_response(sample_tool_response(vec![tool_call("c1", "count", json!({}))]));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let err = chat.ask("count").await.unwrap_err();
    assert!(matches!(err.root(), LlmError::SchemaValidation { .. }));
    assert!(matches!(
        &err,
        LlmError::Operation { provider, operation: crate::provider::Capability::Tools, .. }
            if provider == "mock"
    ));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_invalid_calls_with_new_ids_each_fed_back() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("c1", "count", json!({}))]));
    mock.queue_response(sample_tool_response(vec![tool_call("c2", "count", json!({}))]));
    mock.queue_response(sample_tool_response(vec![count_call("c3", 3)]));
    mock.queue_response(sample_response("three"));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let outcome = chat.ask_with("count", Default::default()).await.unwrap();
    assert_eq!(outcome.text(), "three");
    assert_eq!(outcome.iterations, 4);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let rejected: Vec<_> = chat
        .history()
        .iter()
        .filter(|m| m.is_error)
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();
    assert_eq!(rejected, ["c1", "c2"]);
    let third = &mock.recorded_calls()[2];
    assert!(third.messages.last().unwrap().is_error);
}

#[tokio::test]
async fn test_unknown_tool_reported_to_model() {
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("c1", "launch", json!({}))]));
    mock.queue_response(sample_response("sorry"));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&Arc::new(AtomicU32::new(0))));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    chat.ask("launch").await.unwrap();
    assert!(chat.history()[2].text().contains("unknown tool 'launch'"));
}

#[tokio::test]
async fn test_dry_run_records_without_executing() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![count_call("c1", 3)]));
    mock.queue_response(sample_response("planned"));
    let mut chat = session_with(&mock, config(ToolExecutionMode::DryRun).build().unwrap(), tools);

    let outcome = chat.ask_with("plan", Default::default()).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.tool_calls_executed, 1);
    assert!(chat.history()[2].text().starts_with("[dry run] count"));
}

#[tokio::test]
async fn test_confirm_mode_pauses_for_decisions() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![
        count_call("a", 1),
        count_call("b", 2),
        count_call("c", 3),
    ]));
    mock.queue_response(sample_response("done"));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Confirm).build().unwrap(), tools);

    let mut turn = chat.turn("count").unwrap();
    let TurnStep::AwaitingApproval(calls) = turn.next().await.unwrap() else {
        panic!("expected a pause for approval");
    };
    assert_eq!(calls.len(), 3);

    turn.approve("a").unwrap();
    turn.deny("b", "not today").unwrap();
    assert!(turn.deny("zzz", "unknown").is_err());
    assert_eq!(turn.pending().len(), 1);

    // Still undecided: next() reports what is left.
    let TurnStep::AwaitingApproval(left) = turn.next().await.unwrap() else {
        panic!("expected remaining calls");
    };
    assert_eq!(left[0].id, "c");

    turn.modify("c", json!({"n": 30})).unwrap();
    let TurnStep::Done(outcome) = turn.next().await.unwrap() else {
        panic!("expected the turn to finish");
    };
    assert_eq!(outcome.tool_calls_executed, 2);
    drop(turn);

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let texts: Vec<_> = chat.history()[2..5].iter().map(ChatMessage::text).collect();
    assert_eq!(texts, ["n=1", "Denied: not today", "n=30"]);
}

#[tokio::test]
async fn test_confirm_mode_ask_needs_callback() {
    let mut tools = ToolRegistry::new();
    tools.register(counter(&Arc::new(AtomicU32::new(0))));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![count_call("a", 1)]));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Confirm).build().unwrap(), tools);

    let err = chat.ask("count").await.unwrap_err();
    assert!(matches!(err, LlmError::Configuration(_)));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_confirm_mode_ask_uses_callback() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![count_call("a", 1), count_call("b", 2)]));
    mock.queue_response(sample_response("ok"));
    let config = config(ToolExecutionMode::Confirm)
        .approve_with(|call| {
            if call.id == "a" {
                ToolApproval::Approve
            } else {
                ToolApproval::Deny("policy".into())
            }
        })
        .build()
        .unwrap();
    let mut chat = session_with(&mock, config, tools);

    let outcome = chat.ask_with("count", Default::default()).await.unwrap();
    assert_eq!(outcome.tool_calls_executed, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_parallel_batch_runs_concurrently() {
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition::new("wait", "Waits a second", json!({"type": "object"})),
        |_input: Value| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, ToolError>("waited")
        },
    ));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![
        tool_call("a", "wait", json!({})),
        tool_call("b", "wait", json!({})),
        tool_call("c", "wait", json!({})),
    ]));
    mock.queue_response(sample_response("all done"));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let started = tokio::time::Instant::now();
    chat.ask("wait").await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");

    let ids: Vec<_> = chat.history()[2..5]
        .iter()
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[tokio::test]
async fn test_recoverable_error_fed_back_fatal_error_fails() {
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition::new("flaky", "Sometimes fails", json!({"type": "object"})),
        |input: Value| async move {
            if input["fatal"].as_bool().unwrap_or(false) {
                Err::<String, _>(ToolError::fatal("disk gone"))
            } else {
                Err(ToolError::new("try again"))
            }
        },
    ));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("a", "flaky", json!({}))]));
    mock.queue_response(sample_tool_response(vec![tool_call(
        "b",
        "flaky",
        json!({"fatal": true}),
    )]));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let err = chat.ask("go").await.unwrap_err();
    let LlmError::ToolExecution { tool_name, .. } = err.root() else {
        panic!("expected a tool execution error, got {err:?}");
    };
    assert_eq!(tool_name, "flaky");
    let second = &mock.recorded_calls()[1];
    let fed_back = second.messages.last().unwrap();
    assert!(fed_back.is_error);
    assert_eq!(fed_back.text(), "try again");
}

#[tokio::test]
async fn test_tool_receives_context() {
    struct Account {
        owner: &'static str,
    }
    let mut tools: ToolRegistry<Account> = ToolRegistry::new();
    tools.register(tool_fn_with_ctx(
        ToolDefinition::new("whoami", "Account owner", json!({"type": "object"})),
        |_input: Value, ctx: ToolContext<'_, Account>| {
            let text = format!("{} (iteration {})", ctx.state.owner, ctx.iteration);
            async move { Ok::<_, ToolError>(text) }
        },
    ));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("w", "whoami", json!({}))]));
    mock.queue_response(sample_response("hi ada"));
    let mut chat = ChatSession::with_context(
        Arc::new(mock.clone()) as Arc<dyn DynProvider>,
        config(ToolExecutionMode::Auto).build().unwrap(),
        Account { owner: "ada" },
    )
    .with_tools(tools);

    chat.ask("who am I").await.unwrap();
    assert_eq!(chat.history()[2].text(), "ada (iteration 1)");
}

#[tokio::test]
async fn test_stream_reports_tool_execution() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));
    let mock = MockProvider::named("mock");
    mock.queue_stream(response_events(&sample_tool_response(vec![count_call("c1", 1)])));
    mock.queue_stream(response_events(&sample_response("one")));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools);

    let events: Vec<_> = chat
        .stream("count")
        .map(|e| e.unwrap())
        .collect()
        .await;
    let start = events
        .iter()
        .position(|e| matches!(e, SessionEvent::ToolExecutionStart { .. }))
        .unwrap();
    let end = events
        .iter()
        .position(|e| matches!(e, SessionEvent::ToolExecutionEnd { is_error: false, .. }))
        .unwrap();
    assert!(start < end);
    assert!(matches!(events.last(), Some(SessionEvent::Done(o)) if o.text() == "one"));
    assert_eq!(chat.history().len(), 4);
}

struct Canned(ChatResponse);

impl Middleware for Canned {
    fn before_request(&self, _params: &ChatParams) -> Result<Option<Directive>, LlmError> {
        Ok(Some(Directive::Respond(Box::new(self.0.clone()))))
    }
}

struct HaltAfterTools(Arc<Mutex<u32>>);

impl Middleware for HaltAfterTools {
    fn on_tool_call(&self, _call: &crate::chat::ToolCall) -> Result<Option<Directive>, LlmError> {
        *self.0.lock().unwrap() += 1;
        Ok(None)
    }

    fn after_response(&self, response: &ChatResponse) -> Result<Option<Directive>, LlmError> {
        if response.has_tool_calls() {
            return Ok(Some(Directive::Halt("tools are disabled".into())));
        }
        Ok(None)
    }
}

#[tokio::test]
async fn test_middleware_respond_skips_provider() {
    let mock = MockProvider::named("mock");
    let mut chat = session_with(
        &mock,
        config(ToolExecutionMode::Auto).build().unwrap(),
        ToolRegistry::new(),
    )
    .with_middleware(MiddlewareStack::new().with(Canned(sample_response("cached"))));

    let reply = chat.ask("hi").await.unwrap();
    assert_eq!(reply.text(), "cached");
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_middleware_halt_after_response() {
    let seen = Arc::new(Mutex::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&Arc::new(AtomicU32::new(0))));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![count_call("a", 1)]));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools)
        .with_middleware(MiddlewareStack::new().with(HaltAfterTools(Arc::clone(&seen))));

    let outcome = chat.ask_with("go", Default::default()).await.unwrap();
    assert!(outcome.is_halted());
    assert_eq!(outcome.text(), "tools are disabled");
    assert_eq!(*seen.lock().unwrap(), 0);
}

struct Rewrite(ChatResponse);

impl Middleware for Rewrite {
    fn after_response(&self, _response: &ChatResponse) -> Result<Option<Directive>, LlmError> {
        Ok(Some(Directive::Respond(Box::new(self.0.clone()))))
    }
}

#[tokio::test]
async fn test_replaced_response_usage_matches_session_total() {
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_response("original"));
    let mut replacement = sample_response("rewritten");
    replacement.usage = crate::usage::Usage::new(7, 3);
    let mut chat = session_with(
        &mock,
        config(ToolExecutionMode::Auto).build().unwrap(),
        ToolRegistry::new(),
    )
    .with_middleware(MiddlewareStack::new().with(Rewrite(replacement)));

    let reply = chat.ask("hi").await.unwrap();
    assert_eq!(reply.text(), "rewritten");
    let attached: crate::usage::Usage = chat
        .history()
        .iter()
        .filter_map(|m| m.usage.as_ref())
        .sum();
    assert_eq!(attached, crate::usage::Usage::new(7, 3));
    assert_eq!(chat.total_usage(), &attached);
}

#[tokio::test]
async fn test_halt_after_response_keeps_call_usage() {
    let mut tools = ToolRegistry::new();
    tools.register(counter(&Arc::new(AtomicU32::new(0))));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![count_call("a", 1)]));
    let mut chat = session_with(&mock, config(ToolExecutionMode::Auto).build().unwrap(), tools)
        .with_middleware(MiddlewareStack::new().with(HaltAfterTools(Arc::new(Mutex::new(0)))));

    chat.ask("go").await.unwrap();
    let last = chat.history().last().unwrap();
    assert_eq!(last.usage.as_ref(), Some(chat.total_usage()));
    assert_eq!(chat.usage().call_count(), 1);
}

#[tokio::test]
async fn test_registry_execute_outside_loop() {
    let runs = Arc::new(AtomicU32::new(0));
    let mut tools = ToolRegistry::new();
    tools.register(counter(&runs));

    let out = tools.execute(&count_call("x", 4), &(), 1).await.unwrap();
    assert_eq!(out.content, "n=4");
    let err = tools
        .execute(&tool_call("y", "count", json!({})), &(), 1)
        .await
        .unwrap_err();
    assert!(!err.fatal);
}
