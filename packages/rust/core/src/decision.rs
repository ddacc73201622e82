//! Decision engine: asks the oracle for the next action and validates it
//! against the session before anything acts on it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};

use pagewise_shared::PagewiseError;

use crate::oracle::{Oracle, OracleReply};
use crate::session::SessionState;

/// Reasoning attached to the fallback decision.
pub const FALLBACK_REASONING: &str = "Exploration failed, proceeding to answer";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The three actions the oracle may choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionTag {
    Answer,
    Explore,
    Execute,
}

impl DecisionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Explore => "explore",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for DecisionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionTag {
    type Err = DecisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "answer" => Ok(Self::Answer),
            "explore" => Ok(Self::Explore),
            "execute" => Ok(Self::Execute),
            _ => Err(DecisionError::UnknownDecision(s.to_string())),
        }
    }
}

/// A validated decision with its selected indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Unvisited indices to crawl next.
    Explore(Vec<usize>),
    /// Visited indices useful for the answer.
    Answer(Vec<usize>),
    /// Visited indices holding data for code execution.
    Execute(Vec<usize>),
}

impl Decision {
    pub fn tag(&self) -> DecisionTag {
        match self {
            Self::Explore(_) => DecisionTag::Explore,
            Self::Answer(_) => DecisionTag::Answer,
            Self::Execute(_) => DecisionTag::Execute,
        }
    }

    pub fn indices(&self) -> &[usize] {
        match self {
            Self::Explore(i) | Self::Answer(i) | Self::Execute(i) => i,
        }
    }
}

/// Result of one decision round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub decision: Decision,
    pub reasoning: String,
    /// Whether the fallback replaced the oracle's proposal.
    pub fallback: bool,
}

impl DecisionOutcome {
    fn fallback() -> Self {
        Self {
            decision: Decision::Answer(Vec::new()),
            reasoning: FALLBACK_REASONING.to_string(),
            fallback: true,
        }
    }
}

/// Why a proposal was rejected. Always resolved through the fallback.
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    #[error("unknown decision '{0}'")]
    UnknownDecision(String),

    #[error("explore decision selected no unvisited URLs")]
    EmptyExploreSelection,

    #[error("exploration budget exhausted (iteration {iteration}/{max_iterations}, pages {visited}/{max_pages})")]
    BudgetExhausted {
        iteration: usize,
        max_iterations: usize,
        visited: usize,
        max_pages: usize,
    },

    #[error(transparent)]
    Oracle(#[from] PagewiseError),
}

impl DecisionError {
    /// Whether asking the oracle again could produce a usable reply.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnknownDecision(_)
                | Self::EmptyExploreSelection
                | Self::Oracle(PagewiseError::Parse { .. })
        )
    }
}

/// The parts of a session a proposal is validated against.
#[derive(Debug, Clone)]
pub struct ValidationScope {
    pub visited: BTreeSet<usize>,
    pub unvisited: BTreeSet<usize>,
    pub max_urls_per_iteration: usize,
    pub iteration: usize,
    pub max_iterations: usize,
    pub max_pages: usize,
}

impl ValidationScope {
    pub fn from_session(state: &SessionState) -> Self {
        let registry = state.registry();
        let config = state.config();
        Self {
            visited: registry.visited_indices().into_iter().collect(),
            unvisited: registry.unvisited_indices().into_iter().collect(),
            max_urls_per_iteration: config.max_urls_per_iteration,
            iteration: state.iteration(),
            max_iterations: config.max_iterations,
            max_pages: config.max_pages,
        }
    }

    fn budget_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations || self.visited.len() >= self.max_pages
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Keep candidates in `allowed`, in order, dropping negatives and repeats.
fn keep_known(candidates: &[i64], allowed: &BTreeSet<usize>) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for &raw in candidates {
        let Ok(index) = usize::try_from(raw) else {
            continue;
        };
        if allowed.contains(&index) && !kept.contains(&index) {
            kept.push(index);
        }
    }
    kept
}

/// Check a raw oracle reply against the session.
///
/// Explore candidates are capped to `max_urls_per_iteration` *before* being
/// filtered to the unvisited set, so a cap can leave nothing valid.
pub fn validate(reply: &OracleReply, scope: &ValidationScope) -> Result<Decision, DecisionError> {
    let tag: DecisionTag = reply.decision.parse()?;

    match tag {
        DecisionTag::Explore => {
            if scope.budget_exhausted() {
                return Err(DecisionError::BudgetExhausted {
                    iteration: scope.iteration,
                    max_iterations: scope.max_iterations,
                    visited: scope.visited.len(),
                    max_pages: scope.max_pages,
                });
            }
            let capped = &reply.selected_url_indices
                [..reply.selected_url_indices.len().min(scope.max_urls_per_iteration)];
            let selected = keep_known(capped, &scope.unvisited);
            if selected.is_empty() {
                return Err(DecisionError::EmptyExploreSelection);
            }
            Ok(Decision::Explore(selected))
        }
        DecisionTag::Answer => Ok(Decision::Answer(keep_known(
            &reply.selected_url_indices,
            &scope.visited,
        ))),
        DecisionTag::Execute => Ok(Decision::Execute(keep_known(
            &reply.selected_url_indices,
            &scope.visited,
        ))),
    }
}

async fn propose_valid(
    oracle: &dyn Oracle,
    prompt: &str,
    scope: &ValidationScope,
) -> Result<(Decision, String), DecisionError> {
    let reply = oracle.propose(prompt).await?;
    let decision = validate(&reply, scope)?;
    Ok((decision, reply.reasoning))
}

/// Ask the oracle for a decision and validate it.
///
/// Unparsable or rejected replies are re-requested up to `retries` extra
/// times. Anything else, or running out of retries, falls back to an
/// empty-selection answer.
pub async fn decide(
    oracle: &dyn Oracle,
    prompt: &str,
    scope: &ValidationScope,
    retries: u32,
) -> DecisionOutcome {
    let mut attempt = 0;
    loop {
        match propose_valid(oracle, prompt, scope).await {
            Ok((decision, reasoning)) => {
                info!(decision = %decision.tag(), selected = ?decision.indices(), "decision made");
                return DecisionOutcome {
                    decision,
                    reasoning: reasoning.trim().to_string(),
                    fallback: false,
                };
            }
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(error = %e, attempt, "unusable decision reply, asking again");
            }
            Err(e) => {
                warn!(error = %e, "decision failed, falling back to answer");
                return DecisionOutcome::fallback();
            }
        }
    }
}
