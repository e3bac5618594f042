//! Integration test: auto-decay and auto-compact through the agent loop.

mod init_logging;

use std::sync::Arc;

use minion::{
    AgentBuilder, AgentConfig, AgentState, CompactConfig, DecayConfig, Input, Message,
    MockProvider, Query,
};
use serde_json::json;

fn agent_config(decay: DecayConfig, compact: CompactConfig) -> AgentConfig {
    AgentConfig {
        default_route: Some("raw".to_string()),
        decay,
        compact,
        ..Default::default()
    }
}

/// **Scenario (S5, agent-driven)**: a large tool output decays after its TTL
/// elapses; the slot keeps the reference text, the cache file keeps the full
/// content, and `file_read` can fetch it back.
#[tokio::test]
async fn large_tool_output_decays_and_is_readable() {
    let agent = AgentBuilder::new()
        .provider(Arc::new(MockProvider::with_reply("ack")))
        .config(agent_config(
            DecayConfig {
                enabled: true,
                min_size: 100_000,
                ttl_steps: 3,
            },
            CompactConfig {
                enabled: false,
                ..Default::default()
            },
        ))
        .build()
        .unwrap();
    agent.setup().await.unwrap();

    // history as of step 5: a 150 KB tool result arrived
    let large = "x".repeat(150_000);
    let mut state = AgentState::new(Input::new("task"));
    state.push_messages(vec![Message::system("sys"), Message::user("task")]);
    state.step_count = 5;
    state.push_messages(vec![Message::tool("call-9", large.clone())]);
    state.step_count = 7; // the step about to run is step 8

    agent.execute_step(&mut state, None).await.unwrap();

    assert_eq!(state.decayed.len(), 1);
    let marker = &state.decayed[0];
    assert!(marker.decayed);
    assert_eq!(marker.original_size, 150_000);
    let on_disk = std::fs::metadata(&marker.file_path).unwrap();
    assert_eq!(on_disk.len(), 150_000);

    let slot = state.messages[2].content.as_text();
    assert_eq!(
        slot,
        format!(
            "[Large output (146KB) saved to: {}] Use file_read to access full content if needed.",
            marker.file_path
        )
    );

    // the reference is honorable: file_read returns the content
    let brain = agent.brain().unwrap();
    let tool = brain
        .tools()
        .into_iter()
        .find(|t| t.name() == minion::TOOL_FILE_READ)
        .unwrap();
    let out = tool
        .call(json!({"path": marker.file_path, "max_bytes": 64}))
        .await
        .unwrap();
    assert_eq!(out["total_bytes"], 150_000);
    assert!(out["content"].as_str().unwrap().starts_with("xxxx"));

    // files live until the agent closes
    agent.close().await.unwrap();
    assert!(!std::path::Path::new(&marker.file_path).exists());
}

/// **Scenario (S6, agent-driven)**: a history near the context window is
/// compacted before the step — system messages unchanged, last `keep_recent`
/// non-system messages identical, exactly one `[Conversation Summary]`.
#[tokio::test]
async fn long_history_is_compacted_before_the_step() {
    let agent = AgentBuilder::new()
        .provider(Arc::new(MockProvider::with_reply("step reply")))
        .compact_provider(Arc::new(MockProvider::with_reply("condensed history")))
        .config(agent_config(
            DecayConfig {
                enabled: false,
                ..Default::default()
            },
            CompactConfig {
                enabled: true,
                context_window: 10_000,
                threshold: 0.92,
                keep_recent: 10,
            },
        ))
        .build()
        .unwrap();
    agent.setup().await.unwrap();

    let mut state = AgentState::new(Input::new(Query::from("task")));
    state.push_messages(vec![Message::system("pinned system prompt")]);
    for i in 0..40 {
        state.push_messages(vec![Message::user(format!("{i}: {}", "y".repeat(1_000)))]);
    }
    let tokens_before = minion::estimate_tokens(&state.messages);
    assert!(tokens_before >= 9_200);
    let recent_before: Vec<Message> = state
        .messages
        .iter()
        .filter(|m| !m.is_system())
        .rev()
        .take(10)
        .cloned()
        .collect();

    agent.execute_step(&mut state, None).await.unwrap();

    // strictly fewer tokens than before (the step added one small reply)
    assert!(minion::estimate_tokens(&state.messages) < tokens_before);
    assert_eq!(
        state.messages[0].content.as_text(),
        "pinned system prompt"
    );
    let summaries: Vec<&Message> = state
        .messages
        .iter()
        .filter(|m| m.content.as_text().starts_with("[Conversation Summary]"))
        .collect();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].is_system());
    assert!(summaries[0].content.as_text().contains("condensed history"));

    // the step appended one assistant message after the pinned recents
    let non_system_after: Vec<Message> = state
        .messages
        .iter()
        .filter(|m| !m.is_system())
        .cloned()
        .collect();
    let pinned_window =
        &non_system_after[non_system_after.len() - 11..non_system_after.len() - 1];
    let recent_before_ordered: Vec<Message> =
        recent_before.into_iter().rev().collect();
    assert_eq!(pinned_window, recent_before_ordered.as_slice());

    agent.close().await.unwrap();
}
