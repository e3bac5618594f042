//! Routing workers: `route` (LLM picks the strategy) and `moderator` (the
//! top-level worker owning route selection, the retry budget, and the
//! check/improve loop).

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::brain::Brain;
use crate::error::MinionError;
use crate::message::canonicalize;
use crate::state::{AgentResponse, Input};

use super::{prompts, Worker};

/// Meta-worker: asks the LLM to pick the best route for this input given the
/// registry, then delegates to it.
pub struct RouteWorker;

impl RouteWorker {
    /// Picks the route named in the reply; substring match against the
    /// registry, longest name first so `code` cannot shadow `dcot`.
    fn pick_route(reply: &str, mut routes: Vec<String>) -> Option<String> {
        let reply = reply.to_lowercase();
        routes.sort_by_key(|r| std::cmp::Reverse(r.len()));
        routes.into_iter().find(|r| reply.contains(r.as_str()))
    }
}

#[async_trait]
impl Worker for RouteWorker {
    fn name(&self) -> &str {
        "route"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let routes: Vec<String> = brain
            .registry()
            .routes()
            .into_iter()
            // meta-routes would recurse
            .filter(|r| r != "route" && r != "moderator" && r != "ensemble")
            .collect();
        let system = prompts::ROUTE_SYSTEM.replace("{routes}", &routes.join("\n"));
        let messages = canonicalize(&input.query, Some(&system));
        let reply = brain
            .provider()
            .generate(&messages, &Default::default())
            .await?;

        let route = Self::pick_route(&reply, routes).ok_or_else(|| MinionError::Worker {
            worker: "route".to_string(),
            message: format!("no known route in reply: {reply}"),
        })?;
        debug!(route = %route, "route worker selected");

        let worker = brain
            .registry()
            .create(&route)
            .ok_or_else(|| MinionError::RouteNotFound(route.clone()))?;
        input.route = Some(route);
        worker.execute(input, brain).await
    }
}

/// Top-level worker: resolves the route (explicit `input.route`, configured
/// ensemble, or the route worker), runs it with a single retry, then runs
/// the check/improve loop when a checker is configured.
pub struct ModeratorWorker;

impl ModeratorWorker {
    fn resolve_route(input: &Input, brain: &Brain) -> String {
        if let Some(route) = &input.route {
            return route.clone();
        }
        if !brain.config().ensemble.is_empty() {
            return "ensemble".to_string();
        }
        "route".to_string()
    }
}

#[async_trait]
impl Worker for ModeratorWorker {
    fn name(&self) -> &str {
        "moderator"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let route = Self::resolve_route(input, brain);
        let worker = brain
            .registry()
            .create(&route)
            .ok_or_else(|| MinionError::RouteNotFound(route.clone()))?;

        // single retry budget, spent only on transient provider failures
        let mut response = match worker.execute(input, brain).await {
            Ok(response) => response,
            Err(MinionError::Provider(e)) if e.is_transient() => {
                warn!(route = %route, error = %e, "worker failed transiently, retrying once");
                let worker = brain
                    .registry()
                    .create(&route)
                    .ok_or_else(|| MinionError::RouteNotFound(route.clone()))?;
                worker.execute(input, brain).await?
            }
            Err(e) => return Err(e),
        };

        if brain.checker().is_some() && brain.config().check.enabled {
            response = crate::check::improve_loop(input, response, brain).await?;
        }
        response.terminated = true;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockProvider, ProviderResponse};
    use crate::worker::WorkerRegistry;
    use std::sync::Arc;

    fn brain_with(replies: Vec<&str>) -> Brain {
        let responses = replies
            .into_iter()
            .map(|r| ProviderResponse {
                content: r.to_string(),
                ..Default::default()
            })
            .collect();
        Brain::builder()
            .provider(Arc::new(MockProvider::with_script(responses)))
            .registry(Arc::new(WorkerRegistry::with_defaults()))
            .build()
            .unwrap()
    }

    #[test]
    fn pick_route_prefers_longest_match() {
        let routes = vec!["cot".to_string(), "dcot".to_string()];
        assert_eq!(
            RouteWorker::pick_route("use dcot for this", routes.clone()),
            Some("dcot".to_string())
        );
        assert_eq!(
            RouteWorker::pick_route("cot", routes),
            Some("cot".to_string())
        );
    }

    #[tokio::test]
    async fn explicit_route_takes_precedence() {
        let brain = brain_with(vec!["the raw reply"]);
        let mut input = Input::new("q").with_route("raw");
        let response = ModeratorWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "the raw reply");
        assert!(response.terminated);
    }

    #[tokio::test]
    async fn without_route_the_route_worker_decides() {
        // call 1: route selection; call 2: the chosen raw worker
        let brain = brain_with(vec!["raw", "delegated reply"]);
        let mut input = Input::new("q");
        let response = ModeratorWorker.execute(&mut input, &brain).await.unwrap();
        assert_eq!(response.answer, "delegated reply");
        assert_eq!(input.route.as_deref(), Some("raw"));
    }

    #[tokio::test]
    async fn route_worker_rejects_unknown_reply() {
        let brain = brain_with(vec!["teleportation"]);
        let mut input = Input::new("q");
        let err = RouteWorker.execute(&mut input, &brain).await.unwrap_err();
        assert!(matches!(err, MinionError::Worker { .. }));
    }
}
