//! Session lifecycle management
//!
//! The [`SessionManager`] is the only place sessions are created. It records
//! every session it hands out so that [`SessionManager::teardown`] can close
//! all of them, then kills every helper process by name, tracked or not.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{AutomationSession, ProcessControl, SessionFactory, SessionOptions};
use crate::errors::{SessionError, SessionResult};

/// A tracked session handed out by the manager
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    session: Arc<dyn AutomationSession>,
}

impl SessionHandle {
    /// Manager-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Deref for SessionHandle {
    type Target = dyn AutomationSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

/// Outcome of a teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownReport {
    /// Sessions closed cleanly
    pub sessions_closed: usize,
    /// Sessions whose close reported an error
    pub close_failures: usize,
    /// Helper processes killed by name
    pub helpers_killed: usize,
    /// Teardown had already run; nothing was done
    pub already_torn_down: bool,
}

/// Creates, tracks and tears down automation sessions
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    processes: Arc<dyn ProcessControl>,
    options: SessionOptions,
    helper_name: String,
    primary: tokio::sync::Mutex<Option<SessionHandle>>,
    tracked: Mutex<Vec<SessionHandle>>,
    next_id: AtomicU64,
    created_any: AtomicBool,
    torn_down: AtomicBool,
}

impl SessionManager {
    /// Create a manager
    ///
    /// `options` are the base options for every session; the manager sets
    /// `kill_existing` itself depending on which session is being created.
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        processes: Arc<dyn ProcessControl>,
        options: SessionOptions,
        helper_name: impl Into<String>,
    ) -> Self {
        Self {
            factory,
            processes,
            options,
            helper_name: helper_name.into(),
            primary: tokio::sync::Mutex::new(None),
            tracked: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            created_any: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// The primary session, created on first call
    ///
    /// Stray helper processes from earlier runs are killed before the
    /// primary session is created. Later calls return the same session.
    pub async fn acquire_primary(&self) -> SessionResult<SessionHandle> {
        let mut primary = self.primary.lock().await;
        if let Some(handle) = primary.as_ref() {
            return Ok(handle.clone());
        }

        let options = SessionOptions {
            kill_existing: true,
            ..self.options.clone()
        };
        let handle = self.create(&options).await?;
        info!("Primary session {} ready", handle.id());
        *primary = Some(handle.clone());
        Ok(handle)
    }

    /// Whether the primary session has been created
    pub async fn has_primary(&self) -> bool {
        self.primary.lock().await.is_some()
    }

    /// A fresh tracked session
    pub async fn acquire(&self) -> SessionResult<SessionHandle> {
        let options = SessionOptions {
            kill_existing: false,
            ..self.options.clone()
        };
        self.create(&options).await
    }

    /// Close one tracked session before teardown
    pub async fn release(&self, handle: SessionHandle) -> SessionResult<()> {
        let removed = {
            let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            let before = tracked.len();
            tracked.retain(|h| h.id != handle.id);
            before != tracked.len()
        };

        if !removed {
            debug!("Session {} already released", handle.id);
            return Ok(());
        }

        debug!("Releasing session {}", handle.id);
        handle.close().await
    }

    /// Number of sessions currently tracked
    pub fn open_sessions(&self) -> usize {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether teardown has run
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Close every tracked session, then kill helper processes by name
    ///
    /// Idempotent: the second and later calls do nothing.
    pub async fn teardown(&self) -> TeardownReport {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return TeardownReport {
                already_torn_down: true,
                ..TeardownReport::default()
            };
        }

        let sessions: Vec<SessionHandle> = {
            let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
            tracked.drain(..).collect()
        };
        self.primary.lock().await.take();

        let mut report = TeardownReport::default();
        for handle in sessions {
            match handle.close().await {
                Ok(()) => report.sessions_closed += 1,
                Err(e) => {
                    warn!("Session {} failed to close: {}", handle.id, e);
                    report.close_failures += 1;
                }
            }
        }

        match self.processes.kill_all(&self.helper_name).await {
            Ok(killed) => report.helpers_killed = killed,
            Err(e) => warn!("Could not kill '{}' processes: {}", self.helper_name, e),
        }

        info!(
            "Teardown closed {} sessions ({} failed), killed {} helper processes",
            report.sessions_closed, report.close_failures, report.helpers_killed
        );
        report
    }

    async fn create(&self, options: &SessionOptions) -> SessionResult<SessionHandle> {
        if self.is_torn_down() {
            return Err(SessionError::Closed);
        }

        if options.kill_existing {
            match self.processes.kill_all(&self.helper_name).await {
                Ok(0) => {}
                Ok(killed) => info!("Killed {} stray '{}' processes", killed, self.helper_name),
                Err(e) => warn!("Could not clear stray '{}' processes: {}", self.helper_name, e),
            }
        }

        let session = self.factory.create(options).await?;
        self.created_any.store(true, Ordering::Release);

        let handle = SessionHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            session,
        };
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());

        // teardown may have started while the factory was working
        if self.is_torn_down() {
            self.tracked
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|h| h.id != handle.id);
            if let Err(e) = handle.close().await {
                debug!("Late session {} failed to close: {}", handle.id, e);
            }
            return Err(SessionError::Closed);
        }

        debug!("Created session {}", handle.id);
        Ok(handle)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("options", &self.options)
            .field("helper_name", &self.helper_name)
            .field("open_sessions", &self.open_sessions())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.is_torn_down() || !self.created_any.load(Ordering::Acquire) {
            return;
        }

        warn!("Session manager dropped without teardown; killing helper processes");
        if let Err(e) = self.processes.kill_all_blocking(&self.helper_name) {
            warn!("Could not kill '{}' processes: {}", self.helper_name, e);
        }
    }
}
