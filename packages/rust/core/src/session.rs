//! Per-conversation state.

use tracing::debug;

use pagewise_crawler::{AllowList, PageLimits, UrlRegistry, parse_http_url};
use pagewise_shared::{HistoryTurn, PagewiseError, Result, SessionConfig, SessionId};

/// Everything one conversation knows: discovered pages, the link graph,
/// history, and the per-turn working fields.
///
/// The flow takes `&mut SessionState`, so at most one turn runs against a
/// session at a time.
#[derive(Debug, Clone)]
pub struct SessionState {
    id: SessionId,
    config: SessionConfig,
    allow: AllowList,
    seed_count: usize,
    history: Vec<HistoryTurn>,

    pub(crate) registry: UrlRegistry,

    // Per-turn fields, reset by `begin_turn`.
    pub(crate) question: String,
    pub(crate) iteration: usize,
    pub(crate) pending: Vec<usize>,
    pub(crate) reasoning: String,
    pub(crate) selection: Vec<usize>,
    pub(crate) final_answer: Option<String>,
}

impl SessionState {
    /// Start a session from one or more http(s) start URLs.
    pub fn new<S: AsRef<str>>(start_urls: &[S], config: SessionConfig) -> Result<Self> {
        if start_urls.is_empty() {
            return Err(PagewiseError::validation("at least one start URL is required"));
        }

        let mut registry = UrlRegistry::new();
        for url in start_urls {
            let url = url.as_ref();
            if parse_http_url(url).is_none() {
                return Err(PagewiseError::validation(format!(
                    "'{url}' is not a valid URL; start URLs must be http:// or https://"
                )));
            }
            registry.register(url);
        }

        let allow = AllowList::new(&config.allowed);
        let seed_count = registry.len();

        Ok(Self {
            id: SessionId::new(),
            config,
            allow,
            seed_count,
            history: Vec::new(),
            registry,
            question: String::new(),
            iteration: 0,
            pending: Vec::new(),
            reasoning: String::new(),
            selection: Vec::new(),
            final_answer: None,
        })
    }

    /// Reset per-turn fields and queue any seed pages not yet crawled.
    pub(crate) fn begin_turn(&mut self, question: &str) {
        self.question = question.to_string();
        self.iteration = 0;
        self.reasoning.clear();
        self.selection.clear();
        self.final_answer = None;
        self.pending = (0..self.seed_count)
            .filter(|&i| !self.registry.is_visited(i))
            .collect();
        debug!(session = %self.id, pending = self.pending.len(), "turn started");
    }

    /// Freeze the decision's reasoning and selected indices for the terminal stage.
    pub(crate) fn freeze_selection(&mut self, selection: Vec<usize>, reasoning: String) {
        self.selection = selection;
        self.reasoning = reasoning;
    }

    /// Store the turn's final answer and append it to history if non-empty.
    pub(crate) fn finish_turn(&mut self, answer: String) {
        if !answer.trim().is_empty() {
            self.history.push(HistoryTurn::new(&self.question, &answer));
        }
        self.final_answer = Some(answer);
    }

    pub(crate) fn page_limits(&self) -> PageLimits {
        PageLimits {
            content_max_chars: self.config.content_max_chars,
            max_links_per_page: self.config.max_links_per_page,
            allow: self.allow.clone(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &UrlRegistry {
        &self.registry
    }

    pub fn history(&self) -> &[HistoryTurn] {
        &self.history
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// Explore rounds taken in the current turn.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn pending(&self) -> &[usize] {
        &self.pending
    }

    /// Reasoning of the last terminal decision.
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Indices chosen by the last terminal decision.
    pub fn selection(&self) -> &[usize] {
        &self.selection
    }

    pub fn final_answer(&self) -> Option<&str> {
        self.final_answer.as_deref()
    }

    /// Number of start URLs registered at creation.
    pub fn seed_count(&self) -> usize {
        self.seed_count
    }
}
