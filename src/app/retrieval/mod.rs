//! Item retrieval from the primary and fallback sources
//!
//! [`Retriever`] walks an [`ItemRetrieval`] through its state machine. The
//! primary leg runs inline on the worker's session and either starts a
//! transfer or ends in `PrimaryMiss`. The fallback leg runs later, in its own
//! task on a dedicated session, starting from `FallbackDispatch`.

pub mod config;
pub mod fallback;
pub mod primary;
pub mod state;

use std::sync::Arc;

use tracing::{debug, info};

use crate::app::session::AutomationSession;
use crate::errors::RetrievalResult;

pub use config::{RetrievalConfig, Selectors};
pub use fallback::FallbackResolver;
pub use primary::{PrimaryMatch, PrimaryResolver};
pub use state::{ItemRetrieval, RetrievalState};

/// How the primary leg ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryOutcome {
    /// A transfer was started from the primary source
    TransferStarted,
    /// Nothing usable; dispatch to the fallback source
    Miss,
}

/// Runs both legs of a retrieval
#[derive(Debug, Clone)]
pub struct Retriever {
    config: Arc<RetrievalConfig>,
    primary: PrimaryResolver,
    fallback: FallbackResolver,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        let config = Arc::new(config);
        Self {
            primary: PrimaryResolver::new(Arc::clone(&config)),
            fallback: FallbackResolver::new(Arc::clone(&config)),
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Primary leg: `Pending` through `Done` or `PrimaryMiss`
    ///
    /// On error the retrieval is left in `Faulted`.
    pub async fn run_primary(
        &self,
        session: &dyn AutomationSession,
        retrieval: &mut ItemRetrieval,
    ) -> RetrievalResult<PrimaryOutcome> {
        retrieval.advance(RetrievalState::PrimarySearch)?;

        let result = self.primary_leg(session, retrieval).await;
        if result.is_err() {
            retrieval.advance(RetrievalState::Faulted)?;
        }
        result
    }

    async fn primary_leg(
        &self,
        session: &dyn AutomationSession,
        retrieval: &mut ItemRetrieval,
    ) -> RetrievalResult<PrimaryOutcome> {
        match self.primary.search(session, retrieval.item()).await? {
            PrimaryMatch::Found(target) => {
                retrieval.advance(RetrievalState::PrimaryFound)?;
                retrieval.advance(RetrievalState::Transferring)?;
                self.primary.start_transfer(session, &target).await?;
                retrieval.advance(RetrievalState::Done)?;
                info!("Started transfer of '{}' from primary source", retrieval.item());
                Ok(PrimaryOutcome::TransferStarted)
            }
            PrimaryMatch::NotFound => {
                retrieval.advance(RetrievalState::PrimaryMiss)?;
                Ok(PrimaryOutcome::Miss)
            }
        }
    }

    /// Fallback leg: `FallbackDispatch` through `FallbackDone` or `FallbackFailed`
    pub async fn run_fallback(
        &self,
        session: &dyn AutomationSession,
        retrieval: &mut ItemRetrieval,
    ) -> RetrievalResult<()> {
        let result = self.fallback_leg(session, retrieval).await;
        match &result {
            Ok(()) => {
                retrieval.advance(RetrievalState::FallbackDone)?;
                info!("Started transfer of '{}' from fallback source", retrieval.item());
            }
            Err(e) => {
                debug!("Fallback for '{}' failed: {}", retrieval.item(), e);
                retrieval.advance(RetrievalState::FallbackFailed)?;
            }
        }
        result
    }

    async fn fallback_leg(
        &self,
        session: &dyn AutomationSession,
        retrieval: &mut ItemRetrieval,
    ) -> RetrievalResult<()> {
        let converter = self.fallback.resolve(session, retrieval.item()).await?;
        retrieval.advance(RetrievalState::FallbackTransferring)?;
        self.fallback
            .transfer(session, retrieval.item(), &converter)
            .await
    }
}
