//! Ensemble worker: runs a configured set of sub-workers and aggregates
//! their candidates.
//!
//! Aggregation strategies: majority voting, weight-weighted voting, and
//! pick-best-by-score. When no strict majority exists, the candidate whose
//! supporters have the highest mean score wins; remaining ties resolve by
//! first occurrence in sub-worker order.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::brain::Brain;
use crate::error::MinionError;
use crate::state::{AgentResponse, Input};

use super::Worker;

/// One ensemble member: a route, how many copies to run, and its vote weight.
#[derive(Clone, Debug, Deserialize)]
pub struct EnsembleMember {
    pub route: String,
    #[serde(default = "one")]
    pub copies: usize,
    #[serde(default = "one_f64")]
    pub weight: f64,
}

fn one() -> usize {
    1
}

fn one_f64() -> f64 {
    1.0
}

/// Aggregation strategy for ensemble candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Majority,
    Weighted,
    PickBest,
}

struct Candidate {
    answer: String,
    score: f64,
    weight: f64,
}

pub struct EnsembleWorker;

impl EnsembleWorker {
    fn aggregate(
        candidates: &[Candidate],
        strategy: Aggregation,
    ) -> Option<(String, f64)> {
        if candidates.is_empty() {
            return None;
        }
        let mean_score =
            candidates.iter().map(|c| c.score).sum::<f64>() / candidates.len() as f64;

        match strategy {
            Aggregation::PickBest => candidates
                .iter()
                .max_by(|a, b| {
                    a.score
                        .partial_cmp(&b.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|c| (c.answer.clone(), c.score)),
            Aggregation::Majority | Aggregation::Weighted => {
                // vote per normalized answer, in first-occurrence order
                let mut tally: Vec<(&str, f64, f64, usize)> = Vec::new(); // answer, votes, supporter score sum, count
                for c in candidates {
                    let answer = c.answer.trim();
                    let vote = if strategy == Aggregation::Weighted {
                        c.weight
                    } else {
                        1.0
                    };
                    if let Some(entry) = tally.iter_mut().find(|(a, ..)| *a == answer) {
                        entry.1 += vote;
                        entry.2 += c.score;
                        entry.3 += 1;
                    } else {
                        tally.push((answer, vote, c.score, 1));
                    }
                }
                let total_votes: f64 = tally.iter().map(|(_, v, ..)| v).sum();
                // votes first, then supporters' mean score; strict-greater
                // replacement keeps first occurrence on exact ties
                let mut winner: Option<&(&str, f64, f64, usize)> = None;
                for entry in &tally {
                    let better = match winner {
                        None => true,
                        Some(best) => (entry.1, entry.2 / entry.3 as f64)
                            .partial_cmp(&(best.1, best.2 / best.3 as f64))
                            .map(|o| o == std::cmp::Ordering::Greater)
                            .unwrap_or(false),
                    };
                    if better {
                        winner = Some(entry);
                    }
                }
                let winner = winner?;
                let vote_fraction = winner.1 / total_votes.max(f64::MIN_POSITIVE);
                // a strict-majority answer scores at least the candidate mean
                Some((winner.0.to_string(), vote_fraction.max(mean_score)))
            }
        }
    }
}

#[async_trait]
impl Worker for EnsembleWorker {
    fn name(&self) -> &str {
        "ensemble"
    }

    async fn execute(
        &self,
        input: &mut Input,
        brain: &Brain,
    ) -> Result<AgentResponse, MinionError> {
        let members = if brain.config().ensemble.is_empty() {
            // bare ensemble default: three independent cot samples
            vec![EnsembleMember {
                route: "cot".to_string(),
                copies: 3,
                weight: 1.0,
            }]
        } else {
            brain.config().ensemble.clone()
        };

        let mut runs = Vec::new();
        for member in &members {
            for _ in 0..member.copies.max(1) {
                let Some(worker) = brain.registry().create(&member.route) else {
                    return Err(MinionError::RouteNotFound(member.route.clone()));
                };
                let mut sub_input = input.clone();
                sub_input.route = Some(member.route.clone());
                let weight = member.weight;
                runs.push(async move {
                    let result = worker.execute(&mut sub_input, brain).await;
                    (result, weight)
                });
            }
        }

        let results = futures::future::join_all(runs).await;
        let mut candidates = Vec::new();
        for (result, weight) in results {
            match result {
                Ok(response) => candidates.push(Candidate {
                    answer: response.answer,
                    score: response.score,
                    weight,
                }),
                Err(e) => warn!(error = %e, "ensemble member failed, excluded from vote"),
            }
        }

        let (answer, score) =
            Self::aggregate(&candidates, brain.config().ensemble_aggregation).ok_or_else(
                || MinionError::Worker {
                    worker: "ensemble".to_string(),
                    message: "all ensemble members failed".to_string(),
                },
            )?;
        input.answer = Some(answer.clone());
        Ok(AgentResponse {
            answer,
            score,
            ..AgentResponse::answer("")
        })
    }
}
