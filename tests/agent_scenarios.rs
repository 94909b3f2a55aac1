//! End-to-end agent scenarios driven by a scripted completion service

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;

use boardroom::completion::{MessageRole, ScriptStep, StreamFragment};
use boardroom::roles::RoleCatalog;
use boardroom::tools::{ParamKind, ParamSchema};
use boardroom::{
    AgentMemoryStore, AgentRuntime, AgentStatus, Capability, CapabilityRegistry, Config,
    ErrorKind, ScriptedClient, TurnEvent, WorkspaceStore,
};

fn runtime(client: &ScriptedClient) -> (TempDir, AgentRuntime) {
    let base = tempfile::tempdir().expect("Failed to create temp directory");
    let mut config = Config::default();
    config.workspace.base_dir = base.path().to_path_buf();
    let runtime = AgentRuntime::new(config, Arc::new(client.clone()), RoleCatalog::builtin());
    (base, runtime)
}

#[tokio::test]
async fn test_conversation_resumes_after_restart() {
    let client = ScriptedClient::new()
        .then_text("Noted: CODE-42.")
        .then_text("The code was CODE-42.");
    let base = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.workspace.base_dir = base.path().to_path_buf();

    {
        let runtime = AgentRuntime::new(
            config.clone(),
            Arc::new(client.clone()),
            RoleCatalog::builtin(),
        );
        let record = runtime.initialize("p1", "ceo", Value::Null).await.unwrap();
        assert!(record.conversation.is_empty());
        runtime.invoke("p1", "ceo", "remember CODE-42").await.unwrap();
    }

    // A fresh store sees the persisted exchange
    let ws = WorkspaceStore::open(base.path(), "p1").unwrap();
    let memory = AgentMemoryStore::activate(&ws, "ceo").unwrap();
    assert_eq!(memory.record().conversation.len(), 2);
    drop(memory);

    let runtime = AgentRuntime::new(config, Arc::new(client.clone()), RoleCatalog::builtin());
    let outcome = runtime.invoke("p1", "ceo", "what was the code?").await.unwrap();
    assert_eq!(outcome.response, "The code was CODE-42.");

    let messages = &client.requests()[1].messages;
    let replayed: Vec<(MessageRole, Option<&str>)> = messages
        .iter()
        .map(|m| (m.role, m.content.as_deref()))
        .skip(1)
        .collect();
    assert_eq!(
        replayed,
        vec![
            (MessageRole::User, Some("remember CODE-42")),
            (MessageRole::Assistant, Some("Noted: CODE-42.")),
            (MessageRole::User, Some("what was the code?")),
        ]
    );
}

#[tokio::test]
async fn test_missing_required_argument_is_structured() {
    let mut registry = CapabilityRegistry::new();
    registry
        .register(
            "math",
            Capability::new(
                "add",
                "Add two numbers",
                ParamSchema::new()
                    .required("a", ParamKind::Number, "left operand")
                    .required("b", ParamKind::Number, "right operand"),
                |args| async move { Ok(json!(args["a"].as_f64().unwrap_or_default())) },
            ),
        )
        .unwrap();

    let outcome = registry.dispatch("add", json!({"a": 2})).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::InvalidArguments));

    let content: Value = serde_json::from_str(&outcome.to_content()).unwrap();
    assert_eq!(content["success"], false);
    assert_eq!(content["error_kind"], "InvalidArgumentsError");
}

#[tokio::test]
async fn test_failed_and_successful_calls_in_one_turn() {
    let client = ScriptedClient::new()
        .then_tool_calls(&[
            ("call_read", "read_file", r#"{"file_path": "docs/missing.md"}"#),
            (
                "call_write",
                "write_file",
                r##"{"file_path": "docs/plan.md", "content": "# Plan\n"}"##,
            ),
        ])
        .then_text("Wrote the plan.");
    let (base, runtime) = runtime(&client);

    let events: Vec<TurnEvent> = runtime
        .invoke_streaming("p1", "ceo", "draft a plan")
        .await
        .unwrap()
        .collect()
        .await;

    let errors = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::ToolError { call_id, .. } if call_id == "call_read"))
        .count();
    let results = events
        .iter()
        .filter(|e| matches!(e, TurnEvent::ToolResult { call_id, .. } if call_id == "call_write"))
        .count();
    assert_eq!((errors, results), (1, 1));
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));

    assert_eq!(
        std::fs::read_to_string(base.path().join("p1/docs/plan.md")).unwrap(),
        "# Plan\n"
    );

    let record = runtime.status("p1", "ceo").await.unwrap();
    assert_eq!(record.conversation.len(), 4);
    assert_eq!(record.status, AgentStatus::Active);
}

#[tokio::test]
async fn test_escaping_paths_fail_the_call_not_the_turn() {
    let client = ScriptedClient::new()
        .then_tool_calls(&[("c1", "read_file", r#"{"file_path": "../../../../etc/passwd"}"#)])
        .then_text("Could not read it.");
    let (_base, runtime) = runtime(&client);

    let outcome = runtime.invoke("p1", "ceo", "read passwd").await.unwrap();
    assert_eq!(
        outcome.tool_calls[0].outcome.error_kind,
        Some(ErrorKind::WorkspaceSecurity)
    );
}

#[tokio::test]
async fn test_tool_loop_cap_surfaces_error_event() {
    let mut client = ScriptedClient::new();
    for i in 0..3 {
        let id = format!("c{}", i);
        client = client.then_tool_calls(&[(id.as_str(), "team_read_messages", "{}")]);
    }
    let base = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.workspace.base_dir = base.path().to_path_buf();
    config.orchestrator.max_tool_rounds = 2;
    let runtime = AgentRuntime::new(config, Arc::new(client.clone()), RoleCatalog::builtin());

    let events: Vec<TurnEvent> = runtime
        .invoke_streaming("p1", "ceo", "keep going")
        .await
        .unwrap()
        .collect()
        .await;

    assert!(matches!(
        events.last(),
        Some(TurnEvent::Error {
            kind: ErrorKind::ToolLoopExceeded,
            ..
        })
    ));
    let record = runtime.status("p1", "ceo").await.unwrap();
    assert!(record.conversation.is_empty());
    assert_eq!(record.status, AgentStatus::Error);
}

#[tokio::test]
async fn test_transport_failure_then_recovery() {
    let client = ScriptedClient::new()
        .then(ScriptStep::StreamError(
            vec![StreamFragment::Content("Half an ans".to_string())],
            "connection reset".to_string(),
        ))
        .then_text("Full answer.");
    let (_base, runtime) = runtime(&client);

    let events: Vec<TurnEvent> = runtime
        .invoke_streaming("p1", "backend", "status?")
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(
        events,
        vec![
            TurnEvent::Content {
                text: "Half an ans".to_string()
            },
            TurnEvent::Error {
                kind: ErrorKind::Transport,
                message: "Transport error: connection reset".to_string(),
            },
        ]
    );
    assert_eq!(
        runtime.status("p1", "backend").await.unwrap().status,
        AgentStatus::Error
    );

    let outcome = runtime.invoke("p1", "backend", "status?").await.unwrap();
    assert_eq!(outcome.response, "Full answer.");
    let record = runtime.status("p1", "backend").await.unwrap();
    assert_eq!(record.status, AgentStatus::Active);
    assert_eq!(record.conversation.len(), 2);
}

#[tokio::test]
async fn test_roles_share_the_board() {
    let client = ScriptedClient::new()
        .then_tool_calls(&[(
            "c1",
            "team_write_message",
            r#"{"message": "Ship the API by Friday", "author": "ceo", "priority": "high"}"#,
        )])
        .then_text("Posted.")
        .then_tool_calls(&[("c2", "team_read_messages", r#"{"priority_filter": "high"}"#)])
        .then_text("Got it.");
    let (_base, runtime) = runtime(&client);

    runtime.invoke("p1", "ceo", "tell backend").await.unwrap();
    let outcome = runtime.invoke("p1", "backend", "check board").await.unwrap();

    let result = outcome.tool_calls[0].outcome.result.clone().unwrap();
    let rendered = result.to_string();
    assert!(rendered.contains("Ship the API by Friday"));
    assert!(rendered.contains("ceo"));

    // Each role keeps its own history
    assert_eq!(runtime.status("p1", "ceo").await.unwrap().conversation.len(), 3);
    assert_eq!(runtime.status("p1", "backend").await.unwrap().conversation.len(), 3);
}
