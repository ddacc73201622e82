//! Progress reporting for a running turn.

use tokio::sync::mpsc::UnboundedSender;

use crate::decision::DecisionTag;

/// Progress callback for reporting turn status.
pub trait ProgressReporter: Send + Sync {
    /// Called after each crawl batch with the URLs that were fetched.
    fn batch_crawled(&self, urls: &[String]);
    /// Called when a decision has been validated.
    fn decision_made(&self, decision: DecisionTag);
    /// Called before generated code is run.
    fn execution_started(&self);
    /// Called once the final answer is stored.
    fn answer_ready(&self);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn batch_crawled(&self, _urls: &[String]) {}
    fn decision_made(&self, _decision: DecisionTag) {}
    fn execution_started(&self) {}
    fn answer_ready(&self) {}
}

/// Human-readable message for a crawl batch.
pub fn crawled_message(urls: &[String]) -> String {
    format!("Crawled {} page(s): {}", urls.len(), urls.join(", "))
}

/// Human-readable message for a decision.
pub fn decision_message(decision: DecisionTag) -> &'static str {
    match decision {
        DecisionTag::Answer => "We've got enough information to answer the question...",
        DecisionTag::Explore => "We need to explore more pages to get better information...",
        DecisionTag::Execute => "We need to run code to process the website data...",
    }
}

pub const EXECUTION_MESSAGE: &str = "Executing code to process the data...";
pub const ANSWER_READY_MESSAGE: &str = "The final answer is ready!";

/// Forwards progress as text messages over a channel. A closed receiver is
/// ignored.
pub struct ChannelProgress {
    tx: UnboundedSender<String>,
}

impl ChannelProgress {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }

    fn send(&self, message: impl Into<String>) {
        let _ = self.tx.send(message.into());
    }
}

impl ProgressReporter for ChannelProgress {
    fn batch_crawled(&self, urls: &[String]) {
        self.send(crawled_message(urls));
    }

    fn decision_made(&self, decision: DecisionTag) {
        self.send(decision_message(decision));
    }

    fn execution_started(&self) {
        self.send(EXECUTION_MESSAGE);
    }

    fn answer_ready(&self) {
        self.send(ANSWER_READY_MESSAGE);
    }
}
