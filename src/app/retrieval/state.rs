//! Per-item retrieval state machine
//!
//! ```text
//! Pending -> PrimarySearch -> PrimaryFound -> Transferring -> Done
//!                          \-> PrimaryMiss -> FallbackDispatch -> FallbackTransferring -> FallbackDone
//!                                                           \-------------------------\-> FallbackFailed
//! ```
//!
//! `Faulted` is reachable from every non-terminal primary state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::app::models::{Item, Source};
use crate::errors::{RetrievalError, RetrievalResult};

/// Where one item is in its retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrievalState {
    Pending,
    PrimarySearch,
    PrimaryFound,
    Transferring,
    Done,
    PrimaryMiss,
    FallbackDispatch,
    FallbackTransferring,
    FallbackDone,
    FallbackFailed,
    Faulted,
}

impl RetrievalState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RetrievalState::Done
                | RetrievalState::FallbackDone
                | RetrievalState::FallbackFailed
                | RetrievalState::Faulted
        )
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: RetrievalState) -> bool {
        use RetrievalState::*;

        match (self, next) {
            (Pending, PrimarySearch)
            | (PrimarySearch, PrimaryFound)
            | (PrimarySearch, PrimaryMiss)
            | (PrimaryFound, Transferring)
            | (Transferring, Done)
            | (PrimaryMiss, FallbackDispatch)
            | (FallbackDispatch, FallbackTransferring)
            | (FallbackDispatch, FallbackFailed)
            | (FallbackTransferring, FallbackDone)
            | (FallbackTransferring, FallbackFailed) => true,
            (Pending | PrimarySearch | PrimaryFound | Transferring | PrimaryMiss, Faulted) => true,
            _ => false,
        }
    }

    /// Source whose transfer this state represents, if any
    pub fn transferred_from(self) -> Option<Source> {
        match self {
            RetrievalState::Done => Some(Source::Primary),
            RetrievalState::FallbackDone => Some(Source::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for RetrievalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One item travelling through the state machine
#[derive(Debug, Clone)]
pub struct ItemRetrieval {
    item: Item,
    state: RetrievalState,
}

impl ItemRetrieval {
    /// Start a retrieval in `Pending`
    pub fn new(item: Item) -> Self {
        Self {
            item,
            state: RetrievalState::Pending,
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn state(&self) -> RetrievalState {
        self.state
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: RetrievalState) -> RetrievalResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(RetrievalError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }

        trace!("'{}': {} -> {}", self.item, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Consume the retrieval, returning its item
    pub fn into_item(self) -> Item {
        self.item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RetrievalState::*;

    fn retrieval() -> ItemRetrieval {
        ItemRetrieval::new(Item::new(0, "Artist - Song"))
    }

    #[test]
    fn test_primary_path() {
        let mut r = retrieval();
        for next in [PrimarySearch, PrimaryFound, Transferring, Done] {
            r.advance(next).unwrap();
        }
        assert!(r.state().is_terminal());
        assert_eq!(r.state().transferred_from(), Some(Source::Primary));
    }

    #[test]
    fn test_fallback_paths() {
        let mut r = retrieval();
        for next in [PrimarySearch, PrimaryMiss, FallbackDispatch, FallbackTransferring, FallbackDone] {
            r.advance(next).unwrap();
        }
        assert_eq!(r.state().transferred_from(), Some(Source::Fallback));

        let mut r = retrieval();
        for next in [PrimarySearch, PrimaryMiss, FallbackDispatch, FallbackFailed] {
            r.advance(next).unwrap();
        }
        assert!(r.state().is_terminal());
        assert_eq!(r.state().transferred_from(), None);
    }

    #[test]
    fn test_fault_reachable_from_primary_states_only() {
        for start in [Pending, PrimarySearch, PrimaryFound, Transferring, PrimaryMiss] {
            assert!(start.can_transition_to(Faulted), "{} -> Faulted", start);
        }
        for start in [FallbackDispatch, FallbackTransferring, Done, FallbackDone] {
            assert!(!start.can_transition_to(Faulted), "{} -> Faulted", start);
        }
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut r = retrieval();
        let error = r.advance(Done).unwrap_err();
        assert!(matches!(error, RetrievalError::InvalidTransition { .. }));
        assert_eq!(r.state(), Pending);

        r.advance(PrimarySearch).unwrap();
        assert!(r.advance(FallbackDispatch).is_err());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        let all = [
            Pending,
            PrimarySearch,
            PrimaryFound,
            Transferring,
            Done,
            PrimaryMiss,
            FallbackDispatch,
            FallbackTransferring,
            FallbackDone,
            FallbackFailed,
            Faulted,
        ];
        for from in all.into_iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)));
        }
    }
}
