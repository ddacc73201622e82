//! Core domain types shared across Pagewise crates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for conversation session identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HistoryTurn
// ---------------------------------------------------------------------------

/// One completed question/answer exchange in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    /// The user's question as asked.
    pub question: String,
    /// The final answer or execution report.
    pub answer: String,
}

impl HistoryTurn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_displays_as_uuid() {
        let id = SessionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }

    #[test]
    fn session_ids_are_time_sortable() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert!(a.0 <= b.0);
    }

    #[test]
    fn history_turn_serialization() {
        let turn = HistoryTurn::new("What is the refund policy?", "30 days.");
        let json = serde_json::to_string(&turn).expect("serialize");
        let parsed: HistoryTurn = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.question, "What is the refund policy?");
        assert_eq!(parsed.answer, "30 days.");
    }
}
