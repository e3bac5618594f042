//! Prompt constants for the built-in workers.

/// Chain-of-thought system prompt.
pub const COT_SYSTEM: &str = "You are a careful reasoner. Think through the problem step by step, \
then state your conclusion on its own line as `Final Answer: <answer>`.";

/// Code worker system prompt: structured Thought → Code → Observation.
pub const CODE_SYSTEM: &str = "You solve problems by writing Python code.\n\
Work in cycles of:\n\
Thought: a short plan for the next step.\n\
Code:\n\
```python\n\
# your code\n\
```<end_code>\n\
After each code block you receive an Observation with the execution output.\n\
Call final_answer(value) in code when you have the answer. Only use the \
provided tools and allowed imports.";

/// Python worker system prompt: single snippet, no structured blocks.
pub const PYTHON_SYSTEM: &str = "Write a single Python snippet that solves the task. Wrap it in a \
```python fenced block. Call final_answer(value) with the result, or leave \
the result as the last expression.";

/// Plan worker system prompt: emit a topological task list as JSON.
pub const PLAN_SYSTEM: &str = "Decompose the task into a JSON array of sub-tasks. Each element \
must be an object {\"id\", \"dependencies\", \"instruction\", \"output_key\", \"route\"} where \
dependencies lists ids that must complete first and route is one of the \
available worker routes (or null for the default). Reply with the JSON \
array only.";

/// Route worker system prompt; `{routes}` is replaced with the route list.
pub const ROUTE_SYSTEM: &str = "You dispatch queries to reasoning strategies. Available routes:\n\
{routes}\n\
Reply with exactly one route name, nothing else.";

/// Observation template fed back to code workers after a failed round.
pub const OBSERVATION_TEMPLATE: &str = "Observation:\n{observation}";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_prompt_names_the_sentinel() {
        assert!(CODE_SYSTEM.contains("<end_code>"));
        assert!(CODE_SYSTEM.contains("final_answer"));
    }

    #[test]
    fn route_prompt_has_placeholder() {
        assert!(ROUTE_SYSTEM.contains("{routes}"));
    }
}
