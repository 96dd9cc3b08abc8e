//! W3C WebDriver backend
//!
//! Each session owns its own driver process (`chromedriver` by default),
//! listening on a free local port and spoken to over HTTP with `reqwest`.
//! The child process is spawned with `kill_on_drop`, so a session that is
//! dropped without `close` still takes its driver down.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AutomationSession, ElementRef, SessionFactory, SessionOptions};
use crate::constants::session;
use crate::errors::{SessionError, SessionResult};

/// WebDriver backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDriverConfig {
    /// Driver executable (name on `PATH` or full path)
    pub driver_binary: PathBuf,
    /// Optional browser executable handed to the driver
    pub browser_binary: Option<PathBuf>,
    /// Host the driver binds to
    pub host: String,
    /// Time allowed for the driver to answer its status endpoint
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,
    /// Bound for page-ready waits
    #[serde(with = "humantime_serde")]
    pub page_load_timeout: Duration,
    /// HTTP timeout for one driver command
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Interval between polls inside bounded waits
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Extra browser arguments
    pub browser_args: Vec<String>,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            driver_binary: PathBuf::from(session::DRIVER_BINARY),
            browser_binary: None,
            host: session::DRIVER_HOST.to_string(),
            startup_timeout: session::DRIVER_STARTUP_TIMEOUT,
            page_load_timeout: session::PAGE_LOAD_TIMEOUT,
            command_timeout: session::COMMAND_TIMEOUT,
            poll_interval: session::WAIT_POLL_INTERVAL,
            browser_args: Vec::new(),
        }
    }
}

/// Spawns one driver process per session
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    config: WebDriverConfig,
    client: Client,
}

impl WebDriverFactory {
    /// Create a factory
    pub fn new(config: WebDriverConfig) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(config.command_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    /// Backend configuration
    pub fn config(&self) -> &WebDriverConfig {
        &self.config
    }

    fn spawn_driver(&self, port: u16) -> SessionResult<Child> {
        Command::new(&self.config.driver_binary)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::DriverSpawn {
                binary: self.config.driver_binary.display().to_string(),
                source,
            })
    }

    /// Poll the driver's status endpoint until it reports ready
    async fn wait_until_ready(&self, base: &str) -> SessionResult<()> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(500),
            max_elapsed_time: Some(self.config.startup_timeout),
            ..ExponentialBackoff::default()
        };
        let status_url = format!("{}/status", base);
        let status_url = status_url.as_str();
        let client = &self.client;

        backoff::future::retry(policy, move || async move {
            let response = client
                .get(status_url)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(e.to_string()))?;
            let body: Value = response
                .json()
                .await
                .map_err(|e| backoff::Error::transient(e.to_string()))?;

            if body["value"]["ready"].as_bool().unwrap_or(false) {
                Ok(())
            } else {
                Err(backoff::Error::transient("driver not ready".to_string()))
            }
        })
        .await
        .map_err(|reason| {
            debug!("Driver at {} never became ready: {}", base, reason);
            SessionError::DriverNotReady {
                seconds: self.config.startup_timeout.as_secs(),
            }
        })
    }

    fn capabilities(&self, options: &SessionOptions) -> Value {
        let mut args = vec![
            "--allow-running-insecure-content".to_string(),
            "--disable-gpu".to_string(),
            "--no-first-run".to_string(),
        ];
        if options.headless {
            args.push("--headless=new".to_string());
        }
        args.extend(self.config.browser_args.iter().cloned());

        let mut chrome_options = json!({
            "args": args,
            "prefs": {
                "download.default_directory": options.download_dir.display().to_string(),
                "download.prompt_for_download": false,
                "download.directory_upgrade": true,
                "safebrowsing.enabled": true,
            },
        });
        if let Some(browser) = &self.config.browser_binary {
            chrome_options["binary"] = json!(browser.display().to_string());
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": self.config.page_load_timeout.as_millis() as u64,
                    },
                    "goog:chromeOptions": chrome_options,
                }
            }
        })
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn create(&self, options: &SessionOptions) -> SessionResult<Arc<dyn AutomationSession>> {
        let port = free_port(&self.config.host)?;
        let child = self.spawn_driver(port)?;
        let base = format!("http://{}:{}", self.config.host, port);

        self.wait_until_ready(&base).await?;

        let response = self
            .client
            .post(format!("{}/session", base))
            .json(&self.capabilities(options))
            .send()
            .await?;
        let body = read_value("new session", response).await?;
        let session_id = body["sessionId"]
            .as_str()
            .ok_or_else(|| SessionError::InvalidResponse {
                reason: "new session response carried no sessionId".to_string(),
            })?
            .to_string();

        info!(
            "Started browser session {} on port {} (headless: {})",
            session_id, port, options.headless
        );

        Ok(Arc::new(WebDriverSession {
            client: self.client.clone(),
            url: format!("{}/session/{}", base, session_id),
            driver: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            page_load_timeout: self.config.page_load_timeout,
            poll_interval: self.config.poll_interval,
        }))
    }
}

/// One live WebDriver session and its driver process
#[derive(Debug)]
pub struct WebDriverSession {
    client: Client,
    url: String,
    driver: Mutex<Option<Child>>,
    closed: AtomicBool,
    page_load_timeout: Duration,
    poll_interval: Duration,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> SessionResult<Value> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }

        let url = format!("{}{}", self.url, path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                SessionError::Disconnected {
                    reason: e.to_string(),
                }
            } else {
                SessionError::Http(e)
            }
        })?;

        read_value(&format!("{} {}", method, path), response).await
    }

    async fn find_in(&self, path: &str, selector: &str) -> SessionResult<Vec<ElementRef>> {
        let value = self
            .command(Method::POST, path, Some(css(selector)))
            .await?;
        value
            .as_array()
            .ok_or_else(|| SessionError::InvalidResponse {
                reason: format!("element list expected for '{}'", selector),
            })?
            .iter()
            .map(element_ref)
            .collect()
    }

    async fn is_displayed(&self, element: &ElementRef) -> SessionResult<bool> {
        let path = format!("/element/{}/displayed", element.id());
        Ok(self
            .command(Method::GET, &path, None)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn ready_state(&self) -> SessionResult<String> {
        let script = json!({ "script": "return document.readyState", "args": [] });
        let value = self
            .command(Method::POST, "/execute/sync", Some(script))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn stop_driver(&self) {
        if let Some(mut child) = self.driver.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!("Driver process already gone: {}", e);
            }
        }
    }
}

#[async_trait]
impl AutomationSession for WebDriverSession {
    async fn navigate(&self, url: &str) -> SessionResult<()> {
        debug!("Navigating to {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn wait_for_page_ready(&self) -> SessionResult<()> {
        let deadline = Instant::now() + self.page_load_timeout;
        loop {
            if self.ready_state().await? == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::timeout("page load", self.page_load_timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> SessionResult<ElementRef> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find_element(selector).await {
                Ok(element) => match self.is_displayed(&element).await {
                    Ok(true) => return Ok(element),
                    Ok(false) => {}
                    Err(SessionError::Command { ref error, .. })
                        if error == "stale element reference" => {}
                    Err(e) => return Err(e),
                },
                Err(SessionError::NoSuchElement { .. }) => {}
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(SessionError::timeout(format!("element '{}'", selector), timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn find_element(&self, selector: &str) -> SessionResult<ElementRef> {
        match self.command(Method::POST, "/element", Some(css(selector))).await {
            Ok(value) => element_ref(&value),
            Err(SessionError::Command { error, .. }) if error == "no such element" => {
                Err(SessionError::NoSuchElement {
                    selector: selector.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn find_elements(&self, selector: &str) -> SessionResult<Vec<ElementRef>> {
        self.find_in("/elements", selector).await
    }

    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> SessionResult<Vec<ElementRef>> {
        self.find_in(&format!("/element/{}/elements", parent.id()), selector)
            .await
    }

    async fn click(&self, element: &ElementRef) -> SessionResult<()> {
        let path = format!("/element/{}/click", element.id());
        self.command(Method::POST, &path, Some(json!({})))
            .await
            .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> SessionResult<()> {
        let path = format!("/element/{}/value", element.id());
        self.command(Method::POST, &path, Some(json!({ "text": text })))
            .await
            .map(|_| ())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> SessionResult<Option<String>> {
        let path = format!("/element/{}/attribute/{}", element.id(), name);
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn text(&self, element: &ElementRef) -> SessionResult<String> {
        let path = format!("/element/{}/text", element.id());
        let value = self.command(Method::GET, &path, None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn close(&self) -> SessionResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.client.delete(&self.url).send().await;
        if let Err(e) = &result {
            warn!("Browser session did not close cleanly: {}", e);
        }
        self.stop_driver().await;
        Ok(())
    }
}

/// CSS selector locator body
fn css(selector: &str) -> Value {
    json!({ "using": "css selector", "value": selector })
}

fn element_ref(value: &Value) -> SessionResult<ElementRef> {
    value[session::ELEMENT_KEY]
        .as_str()
        .map(ElementRef::new)
        .ok_or_else(|| SessionError::InvalidResponse {
            reason: format!("element reference expected, got {}", value),
        })
}

/// Unwrap the `value` member of a driver response, mapping W3C errors
async fn read_value(command: &str, response: reqwest::Response) -> SessionResult<Value> {
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    Err(command_error(command, &value))
}

fn command_error(command: &str, value: &Value) -> SessionError {
    SessionError::Command {
        command: command.to_string(),
        error: value["error"].as_str().unwrap_or("unknown error").to_string(),
        message: value["message"].as_str().unwrap_or_default().to_string(),
    }
}

/// Ask the OS for an unused local port
fn free_port(host: &str) -> SessionResult<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}
