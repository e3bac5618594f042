//! Agent loop: the long-running Thought → Code → Observation front end over
//! the brain, interpreter, and tool surface.
//!
//! Lifecycle: [`AgentBuilder::build`] → [`setup`](BaseAgent::setup)
//! (idempotent) → repeated steps under [`run`](BaseAgent::run) →
//! [`close`](BaseAgent::close). [`scope`](BaseAgent::scope) is the
//! `async with` equivalent: setup on enter, close on exit, also on error or
//! cancellation.
//!
//! Context management composes two independent passes: auto-compact runs
//! *before* a step (the next call must fit), auto-decay runs *after* a step
//! (prunes what just arrived once it is old enough).

mod compact;
mod decay;
mod file_tool;

pub use compact::{compact_pass, estimate_tokens, CompactConfig};
pub use decay::{decay_pass, DecayConfig};
pub use file_tool::{FileReadTool, TOOL_FILE_READ};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use stream_event::StreamChunk;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::brain::{Brain, BrainConfig};
use crate::check::Checker;
use crate::collections::{SkillManager, ToolCollection};
use crate::error::MinionError;
use crate::llm::Provider;
use crate::memory::{EpisodicRecord, Memory};
use crate::message::Query;
use crate::state::{AgentResponse, AgentState, Input};
use crate::tools::{
    convert_callables, FinalAnswerTool, LoadToolTool, Tool, ToolDef, ToolRegistry, ToolSearchTool,
};

/// Agent-level knobs.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    /// Route used when neither the run call nor the input names one.
    pub default_route: Option<String>,
    pub decay: DecayConfig,
    pub compact: CompactConfig,
    /// Decay cache directory; a per-agent temp dir when unset.
    pub cache_dir: Option<PathBuf>,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 8,
            default_route: None,
            decay: DecayConfig::default(),
            compact: CompactConfig::default(),
            cache_dir: None,
            system_prompt: None,
        }
    }
}

/// Builder for [`BaseAgent`].
#[derive(Default)]
pub struct AgentBuilder {
    provider: Option<Arc<dyn Provider>>,
    brain_config: Option<BrainConfig>,
    config: AgentConfig,
    tool_defs: Vec<ToolDef>,
    collections: Vec<Arc<dyn ToolCollection>>,
    skills: Option<Arc<SkillManager>>,
    registry: Option<Arc<ToolRegistry>>,
    checker: Option<Arc<dyn Checker>>,
    compact_provider: Option<Arc<dyn Provider>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder preset for a code agent: default route `code`.
    pub fn code() -> Self {
        let mut builder = Self::default();
        builder.config.default_route = Some("code".to_string());
        builder
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn brain_config(mut self, config: BrainConfig) -> Self {
        self.brain_config = Some(config);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Tools: instances or raw callables with declared specs; converted at
    /// setup.
    pub fn tools(mut self, defs: Vec<ToolDef>) -> Self {
        self.tool_defs = defs;
        self
    }

    pub fn collection(mut self, collection: Arc<dyn ToolCollection>) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn skills(mut self, skills: Arc<SkillManager>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Registry backing the `tool_search` / `load_tool` meta-tools.
    pub fn tool_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Model used for history summarization; the main provider otherwise.
    pub fn compact_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.compact_provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<Arc<BaseAgent>, MinionError> {
        let provider = self
            .provider
            .ok_or_else(|| MinionError::Config("agent requires a provider".to_string()))?;
        let cache_dir = match &self.config.cache_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(format!("minion-agent-{}", uuid::Uuid::new_v4())),
        };
        Ok(Arc::new(BaseAgent {
            provider,
            brain_config: self.brain_config.unwrap_or_default(),
            config: self.config,
            tool_defs: std::sync::Mutex::new(Some(self.tool_defs)),
            collections: self.collections,
            skills: self.skills,
            registry: self.registry,
            checker: self.checker,
            compact_provider: self.compact_provider,
            brain: OnceCell::new(),
            memory: Arc::new(Memory::new()),
            cache_dir,
            set_up: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }))
    }

    /// Constructor + setup in one call.
    pub async fn create(self) -> Result<Arc<BaseAgent>, MinionError> {
        let agent = self.build()?;
        agent.setup().await?;
        Ok(agent)
    }
}

/// A long-running agent over the brain, interpreter, and tool surface.
pub struct BaseAgent {
    provider: Arc<dyn Provider>,
    brain_config: BrainConfig,
    config: AgentConfig,
    tool_defs: std::sync::Mutex<Option<Vec<ToolDef>>>,
    collections: Vec<Arc<dyn ToolCollection>>,
    skills: Option<Arc<SkillManager>>,
    registry: Option<Arc<ToolRegistry>>,
    checker: Option<Arc<dyn Checker>>,
    compact_provider: Option<Arc<dyn Provider>>,
    brain: OnceCell<Arc<Brain>>,
    memory: Arc<Memory>,
    cache_dir: PathBuf,
    set_up: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl BaseAgent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// The brain; available after setup.
    pub fn brain(&self) -> Option<&Arc<Brain>> {
        self.brain.get()
    }

    /// Token for cancelling in-flight runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Idempotent setup: collection setup, raw-callable conversion, skill
    /// script injection, brain construction.
    pub async fn setup(self: &Arc<Self>) -> Result<(), MinionError> {
        if self.set_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.cache_dir)?;

        for collection in &self.collections {
            collection.setup().await?;
        }
        if let Some(skills) = &self.skills {
            skills.setup().await?;
        }

        // assemble the tool surface
        let defs = self
            .tool_defs
            .lock()
            .expect("tool defs lock")
            .take()
            .unwrap_or_default();
        let mut tools: Vec<Arc<dyn Tool>> = convert_callables(defs);
        for collection in &self.collections {
            tools.extend(collection.tools());
        }
        if let Some(skills) = &self.skills {
            tools.extend(skills.tools());
        }
        tools.push(Arc::new(FinalAnswerTool));
        tools.push(Arc::new(FileReadTool::new(&self.cache_dir)));

        let mut builder = Brain::builder()
            .provider(Arc::clone(&self.provider))
            .config(self.brain_config.clone())
            .tools(tools);
        if let Some(checker) = &self.checker {
            builder = builder.checker(Arc::clone(checker));
        }
        let brain = Arc::new(builder.build()?);

        // meta-tools: search needs only the registry; load_tool injects
        // loaded tools back into this brain's surface and interpreter
        if let Some(registry) = &self.registry {
            brain.add_tool(Arc::new(ToolSearchTool::new(Arc::clone(registry))));
            let weak: Weak<Brain> = Arc::downgrade(&brain);
            let injector = move |_name: &str, tool: Arc<dyn Tool>| {
                if let Some(brain) = weak.upgrade() {
                    brain.add_tool(tool);
                }
            };
            brain.add_tool(Arc::new(LoadToolTool::new(
                Arc::clone(registry),
                Arc::new(injector),
            )));
        }

        // skill scripts land in the interpreter namespace
        if let Some(skills) = &self.skills {
            for (file, source) in skills.scripts().await {
                if let Err(e) = brain.interpreter().inject_script(&source).await {
                    warn!(script = %file, error = %e, "skill script failed to load");
                }
            }
        }

        self.brain
            .set(brain)
            .map_err(|_| MinionError::Config("agent set up twice concurrently".to_string()))?;
        info!(cache_dir = %self.cache_dir.display(), "agent setup complete");
        Ok(())
    }

    fn require_brain(&self) -> Result<&Arc<Brain>, MinionError> {
        self.brain
            .get()
            .ok_or_else(|| MinionError::Config("agent used before setup".to_string()))
    }

    /// System prompt enhanced with skill instructions and the tool list.
    async fn enhanced_system_prompt(&self, brain: &Brain) -> String {
        let mut prompt = self
            .config
            .system_prompt
            .clone()
            .unwrap_or_else(|| "You are a capable assistant that solves tasks.".to_string());
        if let Some(skills) = &self.skills {
            let instructions = skills.instructions().await;
            if !instructions.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(&instructions);
            }
        }
        let tools = brain.tools();
        if !tools.is_empty() {
            prompt.push_str("\n\nAvailable tools:\n");
            for tool in tools {
                let spec = tool.spec();
                prompt.push_str(&format!("- {}: {}\n", spec.name, spec.description));
            }
        }
        prompt
    }

    /// One step: compact → delegate to the brain → merge → decay.
    pub async fn execute_step(
        &self,
        state: &mut AgentState,
        route_override: Option<&str>,
    ) -> Result<AgentResponse, MinionError> {
        let brain = self.require_brain()?;

        // auto-compact before the step, so the next call fits
        let compact_provider = self
            .compact_provider
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.provider));
        match compact_pass(state, &compact_provider, &self.config.compact).await {
            Ok(_) => {}
            Err(warning) => {
                if let Some(tx) = brain.stream_sender() {
                    let _ = tx.send(StreamChunk::warning(warning)).await;
                }
            }
        }

        if state.messages.is_empty() {
            let system = self.enhanced_system_prompt(brain).await;
            let initial = crate::message::canonicalize(&state.input.query, Some(&system));
            state.push_messages(initial);
        }

        // route precedence: run argument > input.route > agent default
        let route = route_override
            .map(str::to_string)
            .or_else(|| state.input.route.clone())
            .or_else(|| self.config.default_route.clone());

        let mut input = Input::new(Query::Messages(state.messages.clone()));
        input.route = route;
        input.stream = state.input.stream;
        input.metadata = state.input.metadata.clone();

        let mut response = brain.step_input(input.clone()).await;

        // a provider-side context overflow gets one forced compaction + retry
        if !response.is_final_answer && response.answer.starts_with("context_overflow") {
            let force = CompactConfig {
                enabled: true,
                threshold: 0.0,
                ..self.config.compact.clone()
            };
            match compact_pass(state, &compact_provider, &force).await {
                Ok(true) => {
                    input.query = Query::Messages(state.messages.clone());
                    response = brain.step_input(input).await;
                }
                Ok(false) => {}
                Err(warning) => {
                    if let Some(tx) = brain.stream_sender() {
                        let _ = tx.send(StreamChunk::warning(warning)).await;
                    }
                }
            }
        }

        // merge this turn's new messages into the history
        if response.messages.len() > state.messages.len()
            && response.messages[..state.messages.len()] == state.messages[..]
        {
            let new = response.messages[state.messages.len()..].to_vec();
            state.push_messages(new);
        } else if !response.answer.is_empty() {
            state.push_messages(vec![crate::message::Message::assistant(
                response.answer.clone(),
            )]);
        }

        state.step_count += 1;
        state.score = response.score;
        state.done = response.terminated || state.step_count >= self.config.max_steps;

        // auto-decay after the step
        if let Err(e) = decay_pass(state, &self.cache_dir, &self.config.decay) {
            warn!(error = %e, "decay pass failed");
        }

        self.memory
            .append_episodic(EpisodicRecord::new(
                state.step_count,
                format!("step answered: {}", response.answer),
            ))
            .await;
        debug!(
            step = state.step_count,
            done = state.done,
            "agent step complete"
        );
        Ok(response)
    }

    /// Runs a task to completion (or `max_steps`). Cancellable at any await
    /// boundary through [`cancellation_token`](BaseAgent::cancellation_token).
    pub async fn run(&self, task: &str) -> Result<AgentResponse, MinionError> {
        self.run_async(Query::from(task), None, None, None)
            .await
            .map(|(response, _)| response)
    }

    pub async fn run_async(
        &self,
        task: Query,
        state: Option<AgentState>,
        max_steps: Option<usize>,
        route: Option<String>,
    ) -> Result<(AgentResponse, AgentState), MinionError> {
        let brain = self.require_brain()?;
        let mut state = state.unwrap_or_else(|| AgentState::new(Input::new(task)));
        let max_steps = max_steps.unwrap_or(self.config.max_steps);

        let mut last = AgentResponse::default();
        while !state.done && state.step_count < max_steps {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    // stop dispatching, surface a final error chunk, unwind
                    if let Some(tx) = brain.stream_sender() {
                        let _ = tx.send(StreamChunk::error("run cancelled")).await;
                    }
                    return Err(MinionError::Cancelled);
                }
                step = self.execute_step(&mut state, route.as_deref()) => {
                    last = step?;
                }
            }
        }
        Ok((last, state))
    }

    /// `async with` equivalent: setup on enter, close on exit (also on
    /// error).
    pub async fn scope<F, Fut, T>(self: &Arc<Self>, f: F) -> Result<T, MinionError>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: std::future::Future<Output = Result<T, MinionError>>,
    {
        self.setup().await?;
        let result = f(Arc::clone(self)).await;
        let close_result = self.close().await;
        match (result, close_result) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
        }
    }

    /// Releases collections and the decay cache. Cache cleanup is
    /// best-effort: a failure is logged, not surfaced.
    pub async fn close(&self) -> Result<(), MinionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        for collection in &self.collections {
            if let Err(e) = collection.close().await {
                warn!(collection = collection.name(), error = %e, "collection close failed");
            }
        }
        if let Some(skills) = &self.skills {
            let _ = skills.close().await;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.cache_dir) {
            debug!(error = %e, "decay cache cleanup skipped");
        }
        info!("agent closed");
        Ok(())
    }
}
