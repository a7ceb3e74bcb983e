//! Agent loop tests through the public API, with scripted model turns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Deserialize;
use serde_json::{Value, json};

use llm_relay::mock::MockProvider;
use llm_relay::test_helpers::{sample_response, sample_tool_response, tool_call};
use llm_relay::tool::{ToolError, ToolOutput, tool_fn};
use llm_relay::{
    ChatRole, ChatSession, ClientConfig, DynProvider, JsonSchema, LlmError, RetryPolicy,
    Termination, ToolDefinition, ToolExecutionMode, ToolRegistry,
};

#[derive(Deserialize, schemars::JsonSchema)]
struct Lookup {
    city: String,
}

fn weather_tool(runs: &Arc<AtomicU32>) -> ToolRegistry {
    let runs = Arc::clone(runs);
    let schema = JsonSchema::from_type::<Lookup>().unwrap();
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition {
            name: "weather".into(),
            description: "Current weather for a city".into(),
            parameters: schema,
        },
        move |input: Value| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                let lookup: Lookup = serde_json::from_value(input)?;
                Ok::<_, ToolError>(format!("Sunny in {}", lookup.city))
            }
        },
    ));
    tools
}

fn session(mock: &MockProvider, mode: ToolExecutionMode, tools: ToolRegistry) -> ChatSession {
    let config = ClientConfig::builder("mock")
        .retry(RetryPolicy::none())
        .tool_mode(mode)
        .build()
        .unwrap();
    ChatSession::new(Arc::new(mock.clone()) as Arc<dyn DynProvider>, config).with_tools(tools)
}

fn lookup(id: &str, city: &str) -> llm_relay::ToolCall {
    tool_call(id, "weather", json!({"city": city}))
}

#[tokio::test]
async fn test_default_budget_is_five_executions() {
    let runs = Arc::new(AtomicU32::new(0));
    let mock = MockProvider::named("mock");
    for i in 0..10 {
        mock.queue_response(sample_tool_response(vec![lookup(&format!("c{i}"), "Oslo")]));
    }
    let mut chat = session(&mock, ToolExecutionMode::Auto, weather_tool(&runs));

    let err = chat.ask("weather, repeatedly").await.unwrap_err();
    assert!(matches!(err.root(), LlmError::ToolLimitExceeded { limit: 5 }));
    assert!(err.to_string().starts_with("mock tool calling failed"));
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_parallel_results_answer_in_call_order() {
    let runs = Arc::new(AtomicU32::new(0));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![
        lookup("a", "Oslo"),
        lookup("b", "Lima"),
    ]));
    mock.queue_response(sample_response("Sunny everywhere."));
    let mut chat = session(&mock, ToolExecutionMode::Auto, weather_tool(&runs));

    let outcome = chat.ask_with("weather?", Default::default()).await.unwrap();
    assert_eq!(outcome.termination, Termination::Complete);
    assert_eq!(outcome.tool_calls_executed, 2);

    let history = chat.history();
    assert_eq!(history.len(), 5);
    assert_eq!(history[2].role, ChatRole::Tool);
    assert_eq!(history[2].text(), "Sunny in Oslo");
    assert_eq!(history[3].text(), "Sunny in Lima");
}

#[tokio::test]
async fn test_halting_tool_ends_turn_at_second_iteration() {
    let mut tools = ToolRegistry::new();
    tools.register(tool_fn(
        ToolDefinition::new("lookup", "Look something up", json!({"type": "object"})),
        |_input: Value| async move { Ok::<_, ToolError>("found it") },
    ));
    tools.register(tool_fn(
        ToolDefinition::new("finish", "Report the final answer", json!({"type": "object"})),
        |_input: Value| async move { Ok::<_, ToolError>(ToolOutput::halt("All done.")) },
    ));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![tool_call("l", "lookup", json!({}))]));
    mock.queue_response(sample_tool_response(vec![tool_call("f", "finish", json!({}))]));
    let mut chat = session(&mock, ToolExecutionMode::Auto, tools);

    let outcome = chat.ask_with("go", Default::default()).await.unwrap();
    assert!(outcome.is_halted());
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.text(), "All done.");
    assert_eq!(mock.call_count(), 2);
    assert_eq!(chat.history().last().unwrap().text(), "All done.");
}

#[tokio::test]
async fn test_dry_run_never_executes() {
    let runs = Arc::new(AtomicU32::new(0));
    let mock = MockProvider::named("mock");
    mock.queue_response(sample_tool_response(vec![lookup("a", "Oslo")]));
    mock.queue_response(sample_response("would have looked"));
    let mut chat = session(&mock, ToolExecutionMode::DryRun, weather_tool(&runs));

    chat.ask("weather?").await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(chat.history()[2].text().contains("not executed"));
}
