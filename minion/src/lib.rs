//! # Minion
//!
//! An agentic reasoning core in Rust: turn a user query into a verified
//! answer by iteratively producing, executing, checking, and improving
//! candidate solutions.
//!
//! ## Design
//!
//! - **Brain in front**: [`Brain::step`] is the single entry point. It wraps
//!   the query as an [`Input`], delegates to the `moderator` worker, and
//!   returns `(answer, score, terminated, truncated, info)`.
//! - **Workers by route**: reasoning strategies (`raw`, `cot`, `dcot`,
//!   `python`, `code`, `plan`, `ensemble`, …) share one [`Worker`] contract
//!   and are discoverable by route string through [`MINION_REGISTRY`] (or an
//!   isolated [`WorkerRegistry`] in tests).
//! - **Check/improve**: a [`Checker`] grades candidates; failures feed back
//!   through the improver within configured budgets.
//! - **Sandboxed interpreter**: code-producing strategies run their Python
//!   on an AST-walking evaluator ([`Interpreter`] / [`AsyncInterpreter`])
//!   with an import allowlist, an operation cap, and a curated builtin set;
//!   `final_answer(x)` terminates a turn from inside evaluated code.
//! - **Agent loop**: [`BaseAgent`] drives many steps over the same brain and
//!   interpreter, with auto-decay of large outputs and auto-compact of long
//!   histories.
//!
//! ## Main modules
//!
//! - [`brain`]: [`Brain`], [`BrainConfig`], [`StepOutcome`].
//! - [`worker`]: [`Worker`], [`WorkerRegistry`], the built-in strategies.
//! - [`check`]: [`Checker`], [`CheckMinion`], [`TestMinion`],
//!   [`DoctestMinion`], [`CodiumCheckMinion`], [`improve_loop`].
//! - [`interpreter`]: [`Interpreter`], [`AsyncInterpreter`],
//!   [`InterpreterConfig`], [`ExecResult`].
//! - [`node`]: [`ActionNode`] — one atomic LLM turn.
//! - [`tools`]: [`Tool`], [`ToolRegistry`], search/load meta-tools.
//! - [`collections`]: [`ToolCollection`], [`McpCollection`], [`SkillManager`].
//! - [`agent`]: [`BaseAgent`], [`AgentBuilder`], decay/compact passes.
//! - [`llm`]: [`Provider`], [`MockProvider`], [`WithRetry`], cost records.
//! - [`message`]: [`Message`], [`Query`], canonical conversion.
//! - [`memory`]: [`Memory`], [`SemanticIndex`].
//! - [`state`]: [`Input`], [`AgentResponse`], [`Plan`], [`AgentState`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minion::{Brain, MockProvider};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), minion::MinionError> {
//! let brain = Brain::builder()
//!     .provider(Arc::new(MockProvider::with_reply(
//!         "```python\nfinal_answer(234 * 568)\n```",
//!     )))
//!     .build()?;
//! let outcome = brain.step_with("what's the solution 234*568", Some("code"), false).await?;
//! assert_eq!(outcome.answer, "132912");
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod brain;
pub mod check;
pub mod collections;
pub mod error;
pub mod interpreter;
pub mod llm;
pub mod memory;
pub mod message;
pub mod node;
pub mod state;
pub mod tools;
pub mod worker;

pub use agent::{
    compact_pass, decay_pass, estimate_tokens, AgentBuilder, AgentConfig, BaseAgent,
    CompactConfig, DecayConfig, FileReadTool, TOOL_FILE_READ,
};
pub use brain::{
    Brain, BrainBuilder, BrainConfig, CheckConfig, CodeRuntime, ModelDescriptor, StepInfo,
    StepOutcome,
};
pub use check::{
    improve_loop, CheckMinion, CheckResult, Checker, CodiumCheckMinion, DoctestMinion,
    FeedbackMinion, HeldOutExample, TestCase, TestMinion,
};
pub use collections::{
    McpCollection, McpToolAdapter, McpToolDecl, McpTransport, Skill, SkillManager, SkillTool,
    ToolCollection, TOOL_SKILL,
};
pub use error::MinionError;
pub use interpreter::{
    AsyncInterpreter, ExecResult, Interpreter, InterpreterConfig, InterpreterError,
};
pub use llm::{
    CostRecord, GenerateOptions, MockProvider, PriceTable, Provider, ProviderError,
    ProviderResponse, RetryPolicy, ToolCallRequest, ToolChoice, Usage, WithRetry,
};
pub use memory::{EpisodicRecord, KeywordIndex, Memory, RetrievalHit, SemanticIndex};
pub use message::{canonicalize, Content, ContentPart, ImageFormat, Message, Query, QueryPart, Role};
pub use node::{ActionNode, ToolDispatch, TurnResult};
pub use state::{
    AgentResponse, AgentState, DecayMarker, Input, Plan, PlanTask, TaskStatus,
};
pub use stream_event::{ChunkKind, StreamChunk};
pub use tools::{
    convert_callables, sanitize_tool_name, search_tools, AsyncFnTool, FinalAnswerTool,
    FunctionSpec, LoadToolTool, ParamSpec, RegistryStats, SearchStrategy, SyncFnTool, Tool,
    ToolDef, ToolError, ToolInfo, ToolInjector, ToolRegistry, ToolSearchTool, ToolSpec,
    TOOL_FINAL_ANSWER, TOOL_LOAD_TOOL, TOOL_SEARCH,
};
pub use worker::{
    extract_code, extract_final_answer, Aggregation, CodeWorker, CotWorker, DcotWorker,
    EnsembleMember, EnsembleWorker, ModeratorWorker, NativeWorker, PlanWorker, PythonWorker,
    RawWorker, RouteWorker, Worker, WorkerRegistry, END_CODE, MINION_REGISTRY,
};

/// When running `cargo test -p minion`, initializes tracing from `RUST_LOG`
/// so unit tests in `src/**` can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
