//! Plan worker: the LLM decomposes the task into a dependency-ordered task
//! list; each task runs through a sub-worker with its completed ancestors'
//! outputs available in `input.metadata`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::brain::Brain;
use crate::error::MinionError;
use crate::message::canonicalize;
use crate::state::{AgentResponse, Input, Plan, PlanTask, TaskStatus};

use super::{prompts, Worker};

pub struct PlanWorker;

fn parse_plan(text: &str) -> Result<Plan, String> {
    // the model may wrap the JSON in a fence or prose; find the array
    let start = text.find('[').ok_or("no JSON array in plan response")?;
    let end = text.rfind(']').ok_or("unterminated JSON array in plan response")?;
    if end < start {
        return Err("malformed plan response".to_string());
    }
    let tasks: Vec<PlanTask> =
        serde_json::from_str(&text[start..=end]).map_err(|e| format!("invalid plan JSON: {e}"))?;
    if tasks.is_empty() {
        return Err("plan has no tasks".to_string());
    }
    Ok(Plan { tasks })
}

/// Transitive dependency closure of one task.
fn ancestors(plan: &Plan, id: &str) -> HashSet<String> {
    let by_id: HashMap<&str, &PlanTask> =
        plan.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut seen = HashSet::new();
    let mut stack: Vec<&str> = by_id
        .get(id)
        .map(|t| t.dependencies.iter().map(String::as_str).collect())
        .unwrap_or_default();
    while let Some(dep) = stack.pop() {
        if seen.insert(dep.to_string()) {
            if let Some(task) = by_id.get(dep) {
                stack.extend(task.dependencies.iter().map(String::as_str));
            }
        }
    }
    seen
}

#[async_trait]
impl Worker for PlanWorker {
    fn name(&self) -> &str {
        "plan"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        // 1. ask the model for a task DAG
        let messages = canonicalize(&input.query, Some(prompts::PLAN_SYSTEM));
        let options = crate::llm::GenerateOptions {
            temperature: brain.config().temperature,
            ..Default::default()
        };
        let raw = brain.provider().generate(&messages, &options).await?;
        let mut plan = parse_plan(&raw).map_err(|message| MinionError::Worker {
            worker: "plan".to_string(),
            message,
        })?;
        let order = plan.topological_order().map_err(|message| {
            MinionError::Worker {
                worker: "plan".to_string(),
                message,
            }
        })?;
        debug!(tasks = plan.tasks.len(), "plan parsed");

        // 2. run tasks strictly sequentially in topological order
        let mut outputs: HashMap<String, Value> = HashMap::new();
        let default_route = brain.config().plan_default_route.clone();
        let mut failed: Option<String> = None;

        for idx in order {
            let (task_id, instruction, route, output_key, deps) = {
                let task = &plan.tasks[idx];
                (
                    task.id.clone(),
                    task.instruction.clone(),
                    task.route.clone().unwrap_or_else(|| default_route.clone()),
                    task.output_key.clone(),
                    ancestors(&plan, &task.id),
                )
            };
            plan.tasks[idx].status = TaskStatus::InProgress;

            let Some(worker) = brain.registry().create(&route) else {
                plan.tasks[idx].status = TaskStatus::Failed;
                failed = Some(format!("task '{task_id}': unknown route '{route}'"));
                break;
            };

            // a task reads only outputs of completed ancestors
            let mut task_input = Input::new(instruction);
            task_input.system_prompt = input.system_prompt.clone();
            for (key, value) in &outputs {
                let owner_ok = plan
                    .tasks
                    .iter()
                    .any(|t| t.output_key == *key && deps.contains(&t.id));
                if owner_ok {
                    task_input.metadata.insert(key.clone(), value.clone());
                }
            }

            match worker.execute(&mut task_input, brain).await {
                Ok(response) if response.is_final_answer || !response.answer.is_empty() => {
                    outputs.insert(output_key, Value::String(response.answer.clone()));
                    plan.tasks[idx].result = Some(response.answer);
                    plan.tasks[idx].status = TaskStatus::Completed;
                }
                Ok(response) => {
                    warn!(task = %task_id, "sub-worker returned no answer");
                    plan.tasks[idx].status = TaskStatus::Failed;
                    failed = Some(format!(
                        "task '{task_id}' produced no answer: {}",
                        response.answer
                    ));
                    break;
                }
                Err(e) => {
                    plan.tasks[idx].status = TaskStatus::Failed;
                    failed = Some(format!("task '{task_id}' failed: {e}"));
                    break;
                }
            }
        }

        // 3. answer = last completed task's result (the sink in a linear plan)
        if let Some(message) = failed {
            input.metadata.insert(
                "plan".to_string(),
                serde_json::to_value(&plan).unwrap_or(Value::Null),
            );
            return Ok(AgentResponse {
                answer: message,
                terminated: true,
                is_final_answer: false,
                messages,
                ..Default::default()
            });
        }

        let answer = plan
            .tasks
            .iter()
            .rev()
            .find_map(|t| t.result.clone())
            .unwrap_or_default();
        input.metadata.insert(
            "plan".to_string(),
            serde_json::to_value(&plan).unwrap_or(Value::Null),
        );
        input.answer = Some(answer.clone());
        Ok(AgentResponse {
            answer,
            raw_reply: raw,
            messages,
            ..AgentResponse::answer("")
        })
    }
}
