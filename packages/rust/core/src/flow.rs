//! The per-turn orchestration loop: crawl, decide, then answer or execute.

use std::sync::Arc;

use tracing::{info, instrument};

use pagewise_crawler::{PageFetcher, crawl_batch};
use pagewise_sandbox::Sandbox;
use pagewise_shared::{CrawlConfig, PagewiseError, Result};

use crate::answer::synthesize;
use crate::context::decision_prompt;
use crate::decision::{Decision, DecisionTag, ValidationScope, decide};
use crate::execute::run_execution;
use crate::intent::detect_intent;
use crate::oracle::Oracle;
use crate::progress::ProgressReporter;
use crate::session::SessionState;

/// Result of one question/answer turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Final answer or execution report.
    pub answer: String,
    /// Terminal decision that produced the answer.
    pub decision: DecisionTag,
    /// Explore rounds taken.
    pub iterations: usize,
    /// Whether any decision in the turn came from the fallback.
    pub used_fallback: bool,
}

/// Shared collaborators for running turns. Holds no per-session state, so one
/// agent can serve many sessions concurrently.
pub struct Agent {
    fetcher: Arc<dyn PageFetcher>,
    oracle: Arc<dyn Oracle>,
    sandbox: Sandbox,
    crawl: CrawlConfig,
}

impl Agent {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        oracle: Arc<dyn Oracle>,
        sandbox: Sandbox,
        crawl: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            oracle,
            sandbox,
            crawl,
        }
    }

    /// Run one turn of `question` against `state`.
    ///
    /// Crawls whatever is pending, asks the oracle for a decision, and loops
    /// on explore until it chooses answer or execute. The final answer is
    /// stored on the session and appended to its history.
    #[instrument(skip_all, fields(session = %state.id()))]
    pub async fn run_turn(
        &self,
        state: &mut SessionState,
        question: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<TurnOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PagewiseError::validation("question must not be empty"));
        }

        state.begin_turn(question);
        let intent = detect_intent(question);
        info!(triggered = intent.triggered, category = %intent.category, "turn started");

        let mut used_fallback = false;

        let (decision, answer) = loop {
            if !state.pending.is_empty() {
                let limits = state.page_limits();
                let report = crawl_batch(
                    self.fetcher.clone(),
                    &mut state.registry,
                    &mut state.pending,
                    &limits,
                    &self.crawl,
                )
                .await;
                if !report.crawled.is_empty() {
                    progress.batch_crawled(&report.crawled);
                }
            }

            let prompt = decision_prompt(state, &intent);
            let scope = ValidationScope::from_session(state);
            let outcome = decide(
                self.oracle.as_ref(),
                &prompt,
                &scope,
                state.config().decision_retries,
            )
            .await;
            used_fallback |= outcome.fallback;
            progress.decision_made(outcome.decision.tag());

            match outcome.decision {
                Decision::Explore(indices) => {
                    state.pending.extend(indices);
                    state.iteration += 1;
                }
                Decision::Answer(selection) => {
                    state.freeze_selection(selection, outcome.reasoning);
                    let answer = synthesize(self.oracle.as_ref(), state).await;
                    break (DecisionTag::Answer, answer);
                }
                Decision::Execute(selection) => {
                    state.freeze_selection(selection, outcome.reasoning);
                    progress.execution_started();
                    let report =
                        run_execution(self.oracle.as_ref(), &self.sandbox, state, &intent).await;
                    break (DecisionTag::Execute, report);
                }
            }
        };

        state.finish_turn(answer.clone());
        progress.answer_ready();

        info!(
            decision = %decision,
            iterations = state.iteration(),
            pages = state.registry().visited_count(),
            "turn completed"
        );

        Ok(TurnOutcome {
            answer,
            decision,
            iterations: state.iteration(),
            used_fallback,
        })
    }
}
