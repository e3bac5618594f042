//! Integration test: dynamic tool discovery — search the registry, load a
//! tool, call it from generated code under its sanitized name.

mod init_logging;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use minion::{
    AgentBuilder, MockProvider, Tool, ToolError, ToolInfo, ToolRegistry, ToolSpec,
};
use serde_json::{json, Value};

/// Records the exact arguments of every call.
struct RecordingTool {
    name: String,
    calls: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.name, "Create a pull request on GitHub")
            .with_input("repo", minion::ParamSpec::required("string", "owner/repo"))
            .with_input("title", minion::ParamSpec::required("string", "PR title"))
            .with_input("body", minion::ParamSpec::required("string", "PR body"))
            .with_input("base", minion::ParamSpec::required("string", "base branch"))
            .with_input("head", minion::ParamSpec::required("string", "head branch"))
    }

    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        self.calls.lock().unwrap().push(args);
        Ok(json!({"url": "https://example.test/pr/1"}))
    }
}

fn seeded_registry(calls: Arc<Mutex<Vec<Value>>>) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    let entries = [
        ("github.create_pull_request", "Create a pull request on GitHub"),
        ("slack.send_message", "Send a message to a Slack channel"),
        ("jira.create_ticket", "Create a ticket in Jira"),
    ];
    for (name, description) in entries {
        let name_owned = name.to_string();
        let calls = Arc::clone(&calls);
        registry
            .register_factory(
                ToolInfo {
                    name: name.to_string(),
                    description: description.to_string(),
                    parameters: vec![],
                    category: "general".to_string(),
                },
                Box::new(move || {
                    Ok(Arc::new(RecordingTool {
                        name: name_owned,
                        calls,
                    }) as Arc<dyn Tool>)
                }),
            )
            .unwrap();
    }
    registry
}

/// **Scenario (S4)**: `tool_search("pull request")` ranks the GitHub tool
/// first; `load_tool` makes it callable as `github_create_pull_request`
/// inside generated code; exactly one call reaches the underlying tool with
/// the given arguments.
#[tokio::test]
async fn search_load_then_call_from_code() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = seeded_registry(Arc::clone(&calls));

    let agent = AgentBuilder::code()
        .provider(Arc::new(MockProvider::with_reply("unused")))
        .tool_registry(Arc::clone(&registry))
        .build()
        .unwrap();
    agent.setup().await.unwrap();
    let brain = agent.brain().unwrap();

    // search: lightweight infos, nothing instantiated
    let search = brain
        .run_code("hits = tool_search('pull request', 'keyword')\nfinal_answer(hits)\n")
        .await;
    assert!(search.ok(), "search failed: {:?}", search.error);
    let hits = search.value.to_json();
    assert_eq!(hits[0]["name"], "github.create_pull_request");
    assert_eq!(registry.get_stats().loaded, 0);

    // load: factory runs once, tool injected under its sanitized name
    let load = brain
        .run_code("final_answer(load_tool('github.create_pull_request'))\n")
        .await;
    assert!(load.ok(), "load failed: {:?}", load.error);
    assert_eq!(registry.get_stats().loaded, 1);

    // call from generated code with keyword arguments
    let call = brain
        .run_code(
            "r = github_create_pull_request(repo='o/r', title='t', body='b', base='main', head='f')\nfinal_answer(r)\n",
        )
        .await;
    assert!(call.ok(), "call failed: {:?}", call.error);
    assert_eq!(call.value.to_json()["url"], "https://example.test/pr/1");

    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0],
        json!({"repo": "o/r", "title": "t", "body": "b", "base": "main", "head": "f"})
    );
    agent.close().await.unwrap();
}

/// Positional arguments map onto the spec's declared parameter order.
#[tokio::test]
async fn positional_arguments_follow_declared_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let registry = seeded_registry(Arc::clone(&calls));

    let agent = AgentBuilder::code()
        .provider(Arc::new(MockProvider::with_reply("unused")))
        .tool_registry(registry)
        .build()
        .unwrap();
    agent.setup().await.unwrap();
    let brain = agent.brain().unwrap();

    brain
        .run_code("load_tool('github.create_pull_request')\n")
        .await;
    let call = brain
        .run_code("final_answer(github_create_pull_request('o/r', 't', 'b', 'main', 'f'))\n")
        .await;
    assert!(call.ok(), "call failed: {:?}", call.error);
    let recorded = calls.lock().unwrap();
    assert_eq!(recorded[0]["repo"], "o/r");
    assert_eq!(recorded[0]["head"], "f");
    agent.close().await.unwrap();
}
