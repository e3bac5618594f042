//! State types flowing between the brain, workers, and agents.
//!
//! - [`Input`]: one query plus routing/feedback state; created by callers,
//!   mutated only by the owning worker, dropped when the step returns.
//! - [`AgentResponse`]: the terminal result of a step.
//! - [`Plan`] / [`PlanTask`]: topological task list for the plan worker.
//! - [`AgentState`]: per-invocation agent loop state.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::CostRecord;
use crate::message::{Message, Query};

/// One query on its way through the decision core.
#[derive(Clone, Debug)]
pub struct Input {
    pub query: Query,
    pub query_type: String,
    /// Explicit worker route; `None` lets the moderator decide.
    pub route: Option<String>,
    pub system_prompt: Option<String>,
    /// Current candidate answer (set by workers, read by checkers).
    pub answer: Option<String>,
    /// Critic feedback carried into an improve round.
    pub feedback: Option<String>,
    pub dataset: Option<String>,
    pub cache_plan: Option<String>,
    pub stream: bool,
    /// Free-form extras (test cases, plan task outputs).
    pub metadata: HashMap<String, Value>,
}

impl Input {
    pub fn new(query: impl Into<Query>) -> Self {
        Self {
            query: query.into(),
            query_type: "question".to_string(),
            route: None,
            system_prompt: None,
            answer: None,
            feedback: None,
            dataset: None,
            cache_plan: None,
            stream: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_route(mut self, route: &str) -> Self {
        self.route = Some(route.to_string());
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Some(prompt.to_string());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Text view of the query for prompt construction.
    pub fn query_text(&self) -> String {
        self.query.as_text()
    }
}

/// Terminal result of one step: answer plus grading and termination state.
#[derive(Clone, Debug, Default)]
pub struct AgentResponse {
    pub answer: String,
    pub score: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub is_final_answer: bool,
    /// Conversation history at termination.
    pub messages: Vec<Message>,
    /// Last raw provider text.
    pub raw_reply: String,
    pub cost: CostRecord,
}

impl AgentResponse {
    pub fn answer(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self {
            raw_reply: answer.clone(),
            answer,
            score: 0.0,
            terminated: true,
            truncated: false,
            is_final_answer: true,
            messages: Vec::new(),
            cost: CostRecord::default(),
        }
    }

    /// Failure response carrying the error kind and message; never a final
    /// answer.
    pub fn failure(kind: &str, message: &str) -> Self {
        Self {
            answer: format!("{kind}: {message}"),
            score: 0.0,
            terminated: true,
            truncated: false,
            is_final_answer: false,
            messages: Vec::new(),
            raw_reply: String::new(),
            cost: CostRecord::default(),
        }
    }

    /// Terminal stream chunk view of this response: `final_answer` for a
    /// final answer, `error` for a terminated non-answer, `completion`
    /// otherwise. Grading and termination state ride in the metadata.
    pub fn to_chunk(&self) -> stream_event::StreamChunk {
        use stream_event::StreamChunk;
        let chunk = if self.is_final_answer {
            StreamChunk::final_answer(self.answer.clone())
        } else if self.terminated {
            StreamChunk::error(self.answer.clone())
        } else {
            StreamChunk::completion(self.answer.clone())
        };
        chunk
            .with_metadata("score", serde_json::json!(self.score))
            .with_metadata("terminated", serde_json::json!(self.terminated))
            .with_metadata("truncated", serde_json::json!(self.truncated))
    }
}

/// Execution status of one plan task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One task in a plan: runs after its dependencies complete, and may only
/// read outputs of completed ancestors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    #[serde(default)]
    pub dependencies: HashSet<String>,
    pub instruction: String,
    /// Key under which this task's result lands in `Input::metadata`.
    pub output_key: String,
    /// Worker route for this task; plan default when absent.
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default = "default_status", skip_deserializing)]
    pub status: TaskStatus,
    #[serde(default, skip_deserializing)]
    pub result: Option<String>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

/// Ordered task list; executes in topological order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<PlanTask>,
}

impl Plan {
    /// Topological order of task indices; `Err` names a cycle participant.
    pub fn topological_order(&self) -> Result<Vec<usize>, String> {
        let index_of: HashMap<&str, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();
        let mut visited = vec![0u8; self.tasks.len()]; // 0 new, 1 visiting, 2 done
        let mut order = Vec::with_capacity(self.tasks.len());

        fn visit(
            i: usize,
            tasks: &[PlanTask],
            index_of: &HashMap<&str, usize>,
            visited: &mut [u8],
            order: &mut Vec<usize>,
        ) -> Result<(), String> {
            match visited[i] {
                2 => return Ok(()),
                1 => return Err(format!("dependency cycle through task '{}'", tasks[i].id)),
                _ => {}
            }
            visited[i] = 1;
            for dep in &tasks[i].dependencies {
                let Some(&j) = index_of.get(dep.as_str()) else {
                    return Err(format!(
                        "task '{}' depends on unknown task '{}'",
                        tasks[i].id, dep
                    ));
                };
                visit(j, tasks, index_of, visited, order)?;
            }
            visited[i] = 2;
            order.push(i);
            Ok(())
        }

        for i in 0..self.tasks.len() {
            visit(i, &self.tasks, &index_of, &mut visited, &mut order)?;
        }
        Ok(order)
    }
}

/// Marker left in place of a decayed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecayMarker {
    pub decayed: bool,
    pub file_path: String,
    pub original_size: u64,
    /// Index of the decayed message in the history.
    pub message_index: usize,
}

/// Per-invocation state of an agent loop.
#[derive(Clone, Debug)]
pub struct AgentState {
    pub input: Input,
    pub messages: Vec<Message>,
    pub step_count: usize,
    pub done: bool,
    pub score: f64,
    /// Per-agent scratch variables.
    pub vars: HashMap<String, Value>,
    pub plan: Option<Plan>,
    /// Decay/compaction markers accumulated this run.
    pub decayed: Vec<DecayMarker>,
    /// Step index at which each message arrived, for decay TTLs.
    pub message_steps: Vec<usize>,
}

impl AgentState {
    pub fn new(input: Input) -> Self {
        Self {
            input,
            messages: Vec::new(),
            step_count: 0,
            done: false,
            score: 0.0,
            vars: HashMap::new(),
            plan: None,
            decayed: Vec::new(),
            message_steps: Vec::new(),
        }
    }

    /// Appends messages, recording the current step for decay bookkeeping.
    pub fn push_messages(&mut self, messages: Vec<Message>) {
        for m in messages {
            self.messages.push(m);
            self.message_steps.push(self.step_count);
        }
    }

    pub fn last_assistant_reply(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::Assistant)
            .map(|m| m.content.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> PlanTask {
        PlanTask {
            id: id.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            instruction: format!("do {id}"),
            output_key: format!("out_{id}"),
            route: None,
            status: TaskStatus::Pending,
            result: None,
        }
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let plan = Plan {
            tasks: vec![task("c", &["a", "b"]), task("a", &[]), task("b", &["a"])],
        };
        let order = plan.topological_order().unwrap();
        let pos = |id: &str| {
            order
                .iter()
                .position(|&i| plan.tasks[i].id == id)
                .unwrap()
        };
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_is_detected() {
        let plan = Plan {
            tasks: vec![task("a", &["b"]), task("b", &["a"])],
        };
        let err = plan.topological_order().unwrap_err();
        assert!(err.contains("cycle"));
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let plan = Plan {
            tasks: vec![task("a", &["ghost"])],
        };
        assert!(plan.topological_order().unwrap_err().contains("ghost"));
    }

    #[test]
    fn push_messages_tracks_arrival_step() {
        let mut state = AgentState::new(Input::new("q"));
        state.push_messages(vec![Message::user("one")]);
        state.step_count = 3;
        state.push_messages(vec![Message::assistant("two")]);
        assert_eq!(state.message_steps, vec![0, 3]);
    }

    #[test]
    fn response_chunk_kind_tracks_termination_state() {
        let ok = AgentResponse::answer("42").to_chunk();
        assert_eq!(ok.chunk_type, stream_event::ChunkKind::FinalAnswer);
        assert_eq!(ok.metadata["terminated"], serde_json::json!(true));

        let failed = AgentResponse::failure("tool_error", "boom").to_chunk();
        assert_eq!(failed.chunk_type, stream_event::ChunkKind::Error);
    }

    #[test]
    fn plan_task_deserializes_from_llm_json() {
        let json = r#"{"id": "t1", "dependencies": [], "instruction": "solve", "output_key": "answer", "route": "python"}"#;
        let task: PlanTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.route.as_deref(), Some("python"));
    }
}
