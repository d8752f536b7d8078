//! Attempt State Machine
//!
//! `Idle -> Attempting(mode) -> {Succeeded, Failed(category)}`
//!
//! [`transition`] is a pure function so every edge can be tested on its own.
//! Escalation only ever goes `Attempting(Static) -> Attempting(Dynamic)`, and
//! a dynamic attempt never escalates, so a page sees at most one escalation
//! per model.

use super::FetchMode;
use crate::types::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    /// `Auto` never appears here; it starts as `Static`
    Attempting(FetchMode),
    Succeeded,
    Failed(ErrorCategory),
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEvent {
    Start(FetchMode),
    Extracted,
    BotProtection,
    InsufficientContent,
    Truncated,
    FetchFailed,
    ModelFailed,
    OtherFailure,
}

impl AttemptEvent {
    /// Event for a failure category
    pub fn from_category(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::BotProtection => Self::BotProtection,
            ErrorCategory::InsufficientContent => Self::InsufficientContent,
            ErrorCategory::LlmTruncation => Self::Truncated,
            ErrorCategory::FetchError => Self::FetchFailed,
            ErrorCategory::ModelError => Self::ModelFailed,
            _ => Self::OtherFailure,
        }
    }
}

/// Next state
///
/// `can_escalate` says whether a dynamic fetch is both permitted and
/// configured for this page.
pub fn transition(state: AttemptState, event: AttemptEvent, can_escalate: bool) -> AttemptState {
    use AttemptEvent as E;
    use AttemptState as S;

    match (state, event) {
        (S::Idle, E::Start(FetchMode::Dynamic)) => S::Attempting(FetchMode::Dynamic),
        (S::Idle, E::Start(_)) => S::Attempting(FetchMode::Static),
        (S::Idle, _) => S::Idle,

        (S::Attempting(_), E::Extracted) => S::Succeeded,

        (S::Attempting(FetchMode::Dynamic), E::BotProtection) => {
            S::Failed(ErrorCategory::BotProtection)
        }
        (S::Attempting(FetchMode::Dynamic), E::InsufficientContent) => {
            S::Failed(ErrorCategory::InsufficientContent)
        }
        (S::Attempting(_), E::BotProtection) if can_escalate => S::Attempting(FetchMode::Dynamic),
        (S::Attempting(_), E::InsufficientContent) if can_escalate => {
            S::Attempting(FetchMode::Dynamic)
        }
        (S::Attempting(_), E::BotProtection) => S::Failed(ErrorCategory::BotProtection),
        (S::Attempting(_), E::InsufficientContent) => S::Failed(ErrorCategory::InsufficientContent),

        // Truncation is terminal for this model: the caller moves down the chain
        (S::Attempting(_), E::Truncated) => S::Failed(ErrorCategory::LlmTruncation),
        (S::Attempting(_), E::FetchFailed) => S::Failed(ErrorCategory::FetchError),
        (S::Attempting(_), E::ModelFailed) => S::Failed(ErrorCategory::ModelError),
        (S::Attempting(_), E::OtherFailure) => S::Failed(ErrorCategory::ExtractionError),
        (S::Attempting(mode), E::Start(_)) => S::Attempting(mode),

        (terminal, _) => terminal,
    }
}

/// State plus escalation count for one page and one model
#[derive(Debug, Clone, Copy)]
pub struct AttemptMachine {
    state: AttemptState,
    escalations: u8,
}

impl Default for AttemptMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptMachine {
    pub fn new() -> Self {
        Self {
            state: AttemptState::Idle,
            escalations: 0,
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Escalations so far (0 or 1)
    pub fn retry_count(&self) -> u8 {
        self.escalations
    }

    pub fn apply(&mut self, event: AttemptEvent, can_escalate: bool) -> AttemptState {
        let next = transition(self.state, event, can_escalate);
        if self.state == AttemptState::Attempting(FetchMode::Static)
            && next == AttemptState::Attempting(FetchMode::Dynamic)
        {
            self.escalations += 1;
        }
        self.state = next;
        next
    }
}
