//! Browser automation sessions
//!
//! The orchestration engine never talks to a browser directly. It drives an
//! [`AutomationSession`], a small set of page primitives (navigate, wait,
//! find, click, type, read), and obtains sessions from a [`SessionFactory`].
//! The production backend is [`webdriver::WebDriverFactory`], which spawns a
//! W3C WebDriver helper process per session.
//!
//! Session ownership and teardown are handled by
//! [`lifecycle::SessionManager`]; stray helper processes are found and killed
//! through [`process::ProcessControl`]. [`scripted`] provides an in-memory
//! backend for running the engine without a browser.

pub mod lifecycle;
pub mod process;
pub mod scripted;
pub mod webdriver;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::SessionResult;

pub use lifecycle::{SessionHandle, SessionManager, TeardownReport};
pub use process::{ProcessControl, SystemProcesses};
pub use webdriver::{WebDriverConfig, WebDriverFactory};

/// Opaque reference to an element inside one session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    /// Wrap a backend element id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Backend element id
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Page primitives offered by an automation backend
///
/// Selectors are CSS selectors. Every wait is bounded; an expired wait returns
/// [`SessionError::Timeout`](crate::errors::SessionError::Timeout).
#[async_trait]
pub trait AutomationSession: Send + Sync {
    /// Load `url` in the session's window
    async fn navigate(&self, url: &str) -> SessionResult<()>;

    /// Block until the current document has finished loading
    async fn wait_for_page_ready(&self) -> SessionResult<()>;

    /// Block until an element matching `selector` is displayed
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> SessionResult<ElementRef>;

    /// First element matching `selector`
    async fn find_element(&self, selector: &str) -> SessionResult<ElementRef>;

    /// All elements matching `selector`, possibly none
    async fn find_elements(&self, selector: &str) -> SessionResult<Vec<ElementRef>>;

    /// All descendants of `parent` matching `selector`
    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> SessionResult<Vec<ElementRef>>;

    /// Click an element
    async fn click(&self, element: &ElementRef) -> SessionResult<()>;

    /// Type text into an element
    async fn send_keys(&self, element: &ElementRef, text: &str) -> SessionResult<()>;

    /// Read an attribute, `None` when absent
    async fn attribute(&self, element: &ElementRef, name: &str) -> SessionResult<Option<String>>;

    /// Visible text of an element
    async fn text(&self, element: &ElementRef) -> SessionResult<String>;

    /// End the session and release its backend resources
    async fn close(&self) -> SessionResult<()>;
}

/// Options for creating one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Where the browser writes transferred files
    pub download_dir: PathBuf,
    /// Run without a visible window
    pub headless: bool,
    /// Kill stray helper processes before creating this session
    pub kill_existing: bool,
}

/// Creates automation sessions
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Create a ready-to-use session
    async fn create(&self, options: &SessionOptions) -> SessionResult<Arc<dyn AutomationSession>>;
}
