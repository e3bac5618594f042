//! Brain/Mind orchestrator: the entry point of the decision core.
//!
//! A [`Brain`] owns the process-wide configuration, the provider registry,
//! the shared code interpreter, and the tool surface. One
//! [`step`](Brain::step) turns a query into a verified answer: it builds an
//! [`Input`], hands it to the `moderator` worker (which routes, executes,
//! and runs the check/improve loop), and returns
//! `(answer, score, terminated, truncated, info)`.

mod config;

pub use config::{BrainConfig, CheckConfig, ModelDescriptor};

use std::sync::Arc;

use stream_event::StreamChunk;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::check::Checker;
use crate::error::MinionError;
use crate::interpreter::{
    AsyncInterpreter, ExecResult, Interpreter, InterpreterConfig, ToolBinding, ToolHandle,
    ToolSink,
};
use crate::llm::{CostRecord, PriceTable, Provider};
use crate::message::Query;
use crate::state::{AgentResponse, Input};
use crate::tools::{sanitize_tool_name, Tool};
use crate::worker::{WorkerRegistry, MINION_REGISTRY};

/// The shared code interpreter, sync or async.
pub enum CodeRuntime {
    Sync(std::sync::Mutex<Interpreter>),
    Async(tokio::sync::Mutex<AsyncInterpreter>),
}

impl CodeRuntime {
    pub async fn run(&self, code: &str) -> ExecResult {
        match self {
            CodeRuntime::Sync(interp) => interp.lock().expect("interpreter lock").run(code),
            CodeRuntime::Async(interp) => interp.lock().await.run(code).await,
        }
    }

    /// Runs a script for its definitions only (skill injection).
    pub async fn inject_script(&self, source: &str) -> Result<(), String> {
        match self {
            CodeRuntime::Sync(interp) => {
                interp.lock().expect("interpreter lock").inject_script(source)
            }
            CodeRuntime::Async(interp) => interp.lock().await.inject_script(source).await,
        }
    }

    /// Shared tool namespace of the underlying interpreter.
    fn tool_sink(&self) -> ToolSink {
        match self {
            CodeRuntime::Sync(interp) => interp.lock().expect("interpreter lock").tool_sink(),
            CodeRuntime::Async(interp) => {
                // only called at construction, before any run holds the lock
                interp
                    .try_lock()
                    .expect("interpreter idle at construction")
                    .tool_sink()
            }
        }
    }
}

/// Outcome of one brain step.
#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub answer: String,
    pub score: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

/// Extra detail accompanying a step outcome.
#[derive(Clone, Debug)]
pub struct StepInfo {
    pub response: AgentResponse,
    pub cost: CostRecord,
}

/// Builder for [`Brain`].
#[derive(Default)]
pub struct BrainBuilder {
    config: Option<BrainConfig>,
    provider: Option<Arc<dyn Provider>>,
    tools: Vec<Arc<dyn Tool>>,
    registry: Option<Arc<WorkerRegistry>>,
    checker: Option<Arc<dyn Checker>>,
    stream_tx: Option<mpsc::Sender<StreamChunk>>,
    force_sync_interpreter: bool,
}

impl BrainBuilder {
    pub fn config(mut self, config: BrainConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = tools;
        self
    }

    /// Isolated registry (tests); the global [`MINION_REGISTRY`] otherwise.
    pub fn registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Sink for stream chunks; workers emit through it when `input.stream`.
    pub fn stream_sink(mut self, tx: mpsc::Sender<StreamChunk>) -> Self {
        self.stream_tx = Some(tx);
        self
    }

    /// Forces the sync interpreter even when tools are registered.
    pub fn sync_interpreter(mut self) -> Self {
        self.force_sync_interpreter = true;
        self
    }

    pub fn build(self) -> Result<Brain, MinionError> {
        let provider = self
            .provider
            .ok_or_else(|| MinionError::Config("brain requires a provider".to_string()))?;
        let config = self.config.unwrap_or_default();

        // interpreter variant: tools dispatch through the async evaluator;
        // a tool-free brain gets the cheaper sync walker
        let interpreter = build_runtime(
            &config.interpreter,
            &self.tools,
            self.force_sync_interpreter,
        );

        let interpreter_sink = interpreter.tool_sink();
        Ok(Brain {
            config,
            provider,
            tools: std::sync::RwLock::new(self.tools),
            registry: self.registry,
            checker: self.checker,
            stream_tx: self.stream_tx,
            interpreter,
            interpreter_sink,
            price_table: PriceTable::with_defaults(),
        })
    }
}

fn build_runtime(
    config: &InterpreterConfig,
    tools: &[Arc<dyn Tool>],
    force_sync: bool,
) -> CodeRuntime {
    if tools.is_empty() || force_sync {
        CodeRuntime::Sync(std::sync::Mutex::new(Interpreter::new(config)))
    } else {
        let mut interp = AsyncInterpreter::new(config);
        for tool in tools {
            interp.add_async_tool(Arc::clone(tool));
        }
        CodeRuntime::Async(tokio::sync::Mutex::new(interp))
    }
}

/// Entry-point orchestrator. See the module docs.
pub struct Brain {
    config: BrainConfig,
    provider: Arc<dyn Provider>,
    tools: std::sync::RwLock<Vec<Arc<dyn Tool>>>,
    registry: Option<Arc<WorkerRegistry>>,
    checker: Option<Arc<dyn Checker>>,
    stream_tx: Option<mpsc::Sender<StreamChunk>>,
    interpreter: CodeRuntime,
    interpreter_sink: ToolSink,
    price_table: PriceTable,
}

impl Brain {
    pub fn builder() -> BrainBuilder {
        BrainBuilder::default()
    }

    /// Builds a bounded chunk channel: hand the sender to
    /// [`BrainBuilder::stream_sink`] and consume the stream side.
    pub fn chunk_channel(
        buffer: usize,
    ) -> (
        mpsc::Sender<StreamChunk>,
        tokio_stream::wrappers::ReceiverStream<StreamChunk>,
    ) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, tokio_stream::wrappers::ReceiverStream::new(rx))
    }

    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }

    /// Snapshot of the current tool surface.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.read().expect("tools lock").clone()
    }

    /// Adds a tool to the surface and binds it into the interpreter's tool
    /// namespace under its sanitized name. Safe to call while an evaluation
    /// is in progress (the `load_tool` meta-tool relies on this).
    pub fn add_tool(&self, tool: Arc<dyn Tool>) {
        let sanitized = sanitize_tool_name(tool.name());
        let handle = ToolHandle {
            name: sanitized.clone(),
            spec: tool.spec(),
            binding: ToolBinding::Async(Arc::clone(&tool)),
        };
        self.interpreter_sink.insert(sanitized, Arc::new(handle));
        self.tools.write().expect("tools lock").push(tool);
    }

    pub fn registry(&self) -> &WorkerRegistry {
        self.registry.as_deref().unwrap_or(&MINION_REGISTRY)
    }

    pub fn checker(&self) -> Option<Arc<dyn Checker>> {
        self.checker.clone()
    }

    pub fn price_table(&self) -> &PriceTable {
        &self.price_table
    }

    /// The stream sink, if one was configured.
    pub fn stream_sender(&self) -> Option<&mpsc::Sender<StreamChunk>> {
        self.stream_tx.as_ref()
    }

    /// Runs code on the shared interpreter.
    pub async fn run_code(&self, code: &str) -> ExecResult {
        self.interpreter.run(code).await
    }

    pub fn interpreter(&self) -> &CodeRuntime {
        &self.interpreter
    }

    /// One step: query in, verified answer out.
    pub async fn step(&self, query: impl Into<Query>) -> Result<StepOutcome, MinionError> {
        self.step_with(query, None, false).await
    }

    /// One step with explicit route and stream flag.
    pub async fn step_with(
        &self,
        query: impl Into<Query>,
        route: Option<&str>,
        stream: bool,
    ) -> Result<StepOutcome, MinionError> {
        let mut input = Input::new(query).with_stream(stream);
        input.route = route
            .map(str::to_string)
            .or_else(|| self.config.default_route.clone());
        let response = self.step_input(input).await;
        Ok(self.finish(response))
    }

    /// Runs a prepared [`Input`] through the moderator.
    pub async fn step_input(&self, mut input: Input) -> AgentResponse {
        let Some(moderator) = self.registry().create("moderator") else {
            return AgentResponse::failure("route_not_found", "moderator is not registered");
        };
        match moderator.execute(&mut input, self).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "moderator failed");
                if let Some(tx) = &self.stream_tx {
                    let _ = tx.send(StreamChunk::error(e.to_string())).await;
                }
                AgentResponse::failure(e.kind(), &e.to_string())
            }
        }
    }

    fn finish(&self, mut response: AgentResponse) -> StepOutcome {
        let cost = self.provider.get_cost();
        response.cost = cost.clone();
        debug!(
            answer_len = response.answer.len(),
            score = response.score,
            terminated = response.terminated,
            "brain step complete"
        );
        StepOutcome {
            answer: response.answer.clone(),
            score: response.score,
            terminated: response.terminated,
            truncated: response.truncated,
            info: StepInfo { response, cost },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    #[tokio::test]
    async fn step_routes_explicitly_and_returns_tuple_fields() {
        let provider = Arc::new(MockProvider::with_reply("the answer is here"));
        let brain = Brain::builder().provider(provider).build().unwrap();
        let outcome = brain.step_with("a question", Some("raw"), false).await.unwrap();
        assert_eq!(outcome.answer, "the answer is here");
        assert!(outcome.terminated);
        assert!(!outcome.truncated);
        assert!(outcome.info.cost.total_tokens > 0);
    }

    #[tokio::test]
    async fn unknown_route_yields_failure_response() {
        let provider = Arc::new(MockProvider::with_reply("x"));
        let brain = Brain::builder().provider(provider).build().unwrap();
        let outcome = brain
            .step_with("q", Some("no-such-route"), false)
            .await
            .unwrap();
        assert!(!outcome.info.response.is_final_answer);
        assert!(outcome.answer.contains("no-such-route"));
    }

    #[tokio::test]
    async fn streamed_chunks_reconstruct_the_answer() {
        use futures::StreamExt;

        let text = "streaming tokens one by one";
        let (tx, stream) = Brain::chunk_channel(64);
        let brain = Brain::builder()
            .provider(Arc::new(MockProvider::with_reply(text)))
            .stream_sink(tx)
            .build()
            .unwrap();
        let outcome = brain.step_with("q", Some("raw"), true).await.unwrap();
        drop(brain);
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(stream_event::chunk::accumulate_text(&chunks), text);
        assert_eq!(outcome.answer, text);
    }

    #[tokio::test]
    async fn tool_free_brain_uses_sync_interpreter() {
        let provider = Arc::new(MockProvider::with_reply("x"));
        let brain = Brain::builder().provider(provider).build().unwrap();
        assert!(matches!(brain.interpreter(), CodeRuntime::Sync(_)));
        let result = brain.run_code("final_answer(6 * 7)\n").await;
        assert_eq!(result.value_text(), "42");
        assert!(result.is_final_answer);
    }
}
