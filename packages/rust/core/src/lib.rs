//! Agent orchestration for Pagewise.
//!
//! A turn crawls pending pages, asks the oracle whether to explore further,
//! answer, or run generated code, and loops until it gets a terminal
//! decision. Sessions keep the crawled pages and history across turns.

pub mod answer;
pub mod context;
pub mod decision;
pub mod execute;
pub mod flow;
pub mod intent;
pub mod oracle;
pub mod progress;
pub mod session;

pub use decision::{Decision, DecisionOutcome, DecisionTag};
pub use flow::{Agent, TurnOutcome};
pub use intent::{ExecutionCategory, ExecutionIntent, detect_intent};
pub use oracle::{OpenRouterOracle, Oracle, OracleReply};
pub use progress::{ChannelProgress, ProgressReporter, SilentProgress};
pub use session::SessionState;
