//! In-memory scripted backend
//!
//! [`ScriptedWeb`] stands in for a browser and the three sites it visits
//! (primary source, fallback search, fallback converter) plus a playlist page.
//! Each song name is given a script describing how each source behaves for
//! it. Transfers write a marker file into the download directory and rename
//! it to the finished file after a configurable delay, the way a browser does.
//!
//! [`ScriptedProcesses`] is an in-memory process table for [`ProcessControl`].

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;

use super::{AutomationSession, ElementRef, ProcessControl, SessionFactory, SessionOptions};
use crate::app::models::Source;
use crate::constants::{run, selectors, sources};
use crate::errors::{SessionError, SessionResult};

/// Address of the scripted playlist page
pub const PLAYLIST_URL: &str = "scripted://playlist";

const SONG_URL_PREFIX: &str = "scripted://song/";

/// How the primary source behaves for one song
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryScript {
    /// Results resolve to a target; navigating to it starts a transfer
    Hit,
    /// The single not-found sentinel entry
    NotFound,
    /// Results exist but none carries a target link
    NoTarget,
    /// Submitting the search fails with a recoverable command error
    Error,
    /// Submitting the search kills the session
    Crash,
    /// Submitting the search panics
    Panic,
}

/// How the fallback source behaves for one song
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackScript {
    /// The converter becomes ready and offers a transfer link
    Hit,
    /// The search returns nothing
    NoResults,
    /// The converter never shows its ready marker
    NeverReady,
    /// The converter is ready but offers no transfer link
    NoLink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Page {
    Blank,
    PrimaryHome { typed: String },
    PrimaryResults { query: String },
    FallbackResults { query: String },
    Converter { song: usize },
    Playlist,
    Other,
}

#[derive(Debug, Default)]
struct WebState {
    songs: Vec<String>,
    primary: HashMap<String, PrimaryScript>,
    fallback: HashMap<String, FallbackScript>,
    playlist: Vec<(String, String)>,
    transfers: Vec<(String, Source)>,
    fallback_searches: Vec<String>,
}

impl WebState {
    fn song_index(&mut self, name: &str) -> usize {
        match self.songs.iter().position(|song| song == name) {
            Some(index) => index,
            None => {
                self.songs.push(name.to_string());
                self.songs.len() - 1
            }
        }
    }

    fn primary_script(&self, name: &str) -> PrimaryScript {
        self.primary.get(name).copied().unwrap_or(PrimaryScript::NotFound)
    }

    fn fallback_script(&self, name: &str) -> FallbackScript {
        self.fallback
            .get(name)
            .copied()
            .unwrap_or(FallbackScript::NoResults)
    }
}

#[derive(Debug)]
struct WebShared {
    download_dir: PathBuf,
    _temp: Option<TempDir>,
    state: Mutex<WebState>,
    transfer_delay: Mutex<Duration>,
    session_delay: Mutex<Duration>,
    fail_creation: AtomicBool,
    sessions_created: AtomicUsize,
    open_sessions: AtomicUsize,
    helpers: Mutex<Option<Arc<ScriptedProcesses>>>,
}

/// Scripted stand-in for the browser and the sites it visits
#[derive(Debug, Clone)]
pub struct ScriptedWeb {
    shared: Arc<WebShared>,
}

impl ScriptedWeb {
    /// A scripted web writing into a fresh temporary directory
    pub fn new() -> io::Result<Self> {
        let temp = tempfile::tempdir()?;
        let dir = temp.path().to_path_buf();
        Ok(Self::build(dir, Some(temp)))
    }

    /// A scripted web writing into `dir`
    pub fn with_download_dir(dir: impl Into<PathBuf>) -> Self {
        Self::build(dir.into(), None)
    }

    fn build(download_dir: PathBuf, temp: Option<TempDir>) -> Self {
        Self {
            shared: Arc::new(WebShared {
                download_dir,
                _temp: temp,
                state: Mutex::new(WebState::default()),
                transfer_delay: Mutex::new(Duration::from_millis(50)),
                session_delay: Mutex::new(Duration::ZERO),
                fail_creation: AtomicBool::new(false),
                sessions_created: AtomicUsize::new(0),
                open_sessions: AtomicUsize::new(0),
                helpers: Mutex::new(None),
            }),
        }
    }

    /// Directory transfers are written to
    pub fn download_dir(&self) -> &Path {
        &self.shared.download_dir
    }

    /// Session factory backed by this web
    pub fn factory(&self) -> Arc<dyn SessionFactory> {
        Arc::new(ScriptedFactory { web: self.clone() })
    }

    /// Script the primary source for `name`
    pub fn primary(&self, name: &str, script: PrimaryScript) -> &Self {
        self.state().primary.insert(name.to_string(), script);
        self
    }

    /// Script the fallback source for `name`
    pub fn fallback(&self, name: &str, script: FallbackScript) -> &Self {
        self.state().fallback.insert(name.to_string(), script);
        self
    }

    /// Rows shown on the playlist page, as `(title, artists)`
    pub fn playlist(&self, rows: Vec<(&str, &str)>) -> &Self {
        self.state().playlist = rows
            .into_iter()
            .map(|(title, artists)| (title.to_string(), artists.to_string()))
            .collect();
        self
    }

    /// How long a transfer keeps its marker file before finishing
    pub fn transfer_delay(&self, delay: Duration) -> &Self {
        *self
            .shared
            .transfer_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    /// How long creating a session takes
    pub fn session_delay(&self, delay: Duration) -> &Self {
        *self
            .shared
            .session_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
        self
    }

    /// Make session creation fail
    pub fn fail_session_creation(&self, fail: bool) -> &Self {
        self.shared.fail_creation.store(fail, Ordering::Release);
        self
    }

    /// Register a helper process in `processes` for every session created
    pub fn spawn_helpers_in(&self, processes: Arc<ScriptedProcesses>) -> &Self {
        *self
            .shared
            .helpers
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(processes);
        self
    }

    /// Sessions created so far
    pub fn sessions_created(&self) -> usize {
        self.shared.sessions_created.load(Ordering::Acquire)
    }

    /// Sessions created and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::Acquire)
    }

    /// Every transfer started, in order
    pub fn transfers(&self) -> Vec<(String, Source)> {
        self.state().transfers.clone()
    }

    /// Songs searched on the fallback source, in order
    pub fn fallback_searches(&self) -> Vec<String> {
        self.state().fallback_searches.clone()
    }

    fn state(&self) -> MutexGuard<'_, WebState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start_transfer(&self, name: &str, source: Source) -> SessionResult<()> {
        self.state().transfers.push((name.to_string(), source));

        let final_name = match source {
            Source::Primary => format!("{} {}.mp3", name, sources::SITE_SUFFIX),
            Source::Fallback => format!("{}.mp3", name),
        };
        let final_path = self.shared.download_dir.join(&final_name);
        let marker_path = self
            .shared
            .download_dir
            .join(format!("{}{}", final_name, run::TRANSFER_MARKER_SUFFIX));
        std::fs::write(&marker_path, b"partial")?;

        let delay = *self
            .shared
            .transfer_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tokio::fs::rename(&marker_path, &final_path).await;
        });
        Ok(())
    }
}

struct ScriptedFactory {
    web: ScriptedWeb,
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn create(&self, _options: &SessionOptions) -> SessionResult<Arc<dyn AutomationSession>> {
        let shared = &self.web.shared;
        let delay = *shared
            .session_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if shared.fail_creation.load(Ordering::Acquire) {
            return Err(SessionError::DriverSpawn {
                binary: "scripted".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "scripted creation failure"),
            });
        }

        let helper = shared
            .helpers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map(|processes| {
                let pid = processes.spawn_one("chromedriver");
                (processes, pid)
            });

        shared.sessions_created.fetch_add(1, Ordering::AcqRel);
        shared.open_sessions.fetch_add(1, Ordering::AcqRel);

        Ok(Arc::new(ScriptedSession {
            web: self.web.clone(),
            page: Mutex::new(Page::Blank),
            closed: AtomicBool::new(false),
            helper,
        }))
    }
}

struct ScriptedSession {
    web: ScriptedWeb,
    page: Mutex<Page>,
    closed: AtomicBool,
    helper: Option<(Arc<ScriptedProcesses>, u32)>,
}

impl ScriptedSession {
    fn page(&self) -> MutexGuard<'_, Page> {
        self.page.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn crash(&self) -> SessionError {
        self.mark_closed();
        SessionError::Disconnected {
            reason: "scripted crash".to_string(),
        }
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.web.shared.open_sessions.fetch_sub(1, Ordering::AcqRel);
            if let Some((processes, pid)) = &self.helper {
                processes.remove(*pid);
            }
        }
    }

    fn lookup(&self, selector: &str) -> Option<ElementRef> {
        let page = self.page().clone();
        let id = match (&page, selector) {
            (Page::PrimaryHome { .. }, selectors::PRIMARY_QUERY_INPUT) => "query-input",
            (Page::PrimaryHome { .. }, selectors::PRIMARY_SUBMIT) => "submit",
            (Page::PrimaryResults { .. }, selectors::PRIMARY_RESULT) => "result",
            (Page::PrimaryResults { .. }, selectors::PRIMARY_RESULT_LIST) => "result-list",
            (Page::Converter { song }, selectors::FALLBACK_READY_MARKER) => {
                let name = self.web.state().songs[*song].clone();
                if self.web.state().fallback_script(&name) == FallbackScript::NeverReady {
                    return None;
                }
                "ready"
            }
            _ => return None,
        };
        Some(ElementRef::new(id))
    }

    fn entry_count(script: PrimaryScript) -> usize {
        match script {
            PrimaryScript::Hit => 3,
            PrimaryScript::NoTarget => 2,
            _ => 1,
        }
    }
}

fn parse_index(id: &str, prefix: &str) -> Option<usize> {
    id.strip_prefix(prefix)?.split(':').next()?.parse().ok()
}

fn refs(prefix: &str, count: usize) -> Vec<ElementRef> {
    (0..count)
        .map(|i| ElementRef::new(format!("{}{}", prefix, i)))
        .collect()
}

#[async_trait]
impl AutomationSession for ScriptedSession {
    async fn navigate(&self, url: &str) -> SessionResult<()> {
        self.ensure_open()?;

        let page = if url.starts_with(sources::PRIMARY_URL) {
            Page::PrimaryHome {
                typed: String::new(),
            }
        } else if url.starts_with(sources::FALLBACK_SEARCH_URL) {
            let parsed = Url::parse(url).map_err(|e| SessionError::InvalidResponse {
                reason: e.to_string(),
            })?;
            let query = parsed
                .query_pairs()
                .find(|(key, _)| key == sources::FALLBACK_QUERY_PARAM)
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            self.web.state().fallback_searches.push(query.clone());
            Page::FallbackResults { query }
        } else if url.starts_with(sources::FALLBACK_TRANSFER_ENDPOINT) {
            let song = url
                .rsplit('/')
                .next()
                .and_then(|id| id.strip_prefix("vid"))
                .and_then(|index| index.parse().ok())
                .ok_or_else(|| SessionError::InvalidResponse {
                    reason: format!("unknown converter address {}", url),
                })?;
            Page::Converter { song }
        } else if let Some(index) = url.strip_prefix(SONG_URL_PREFIX) {
            let name = index
                .parse::<usize>()
                .ok()
                .and_then(|index| self.web.state().songs.get(index).cloned())
                .ok_or_else(|| SessionError::InvalidResponse {
                    reason: format!("unknown song address {}", url),
                })?;
            self.web.start_transfer(&name, Source::Primary)?;
            Page::Other
        } else if url == PLAYLIST_URL {
            Page::Playlist
        } else {
            Page::Other
        };

        *self.page() = page;
        Ok(())
    }

    async fn wait_for_page_ready(&self) -> SessionResult<()> {
        self.ensure_open()
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> SessionResult<ElementRef> {
        self.ensure_open()?;
        self.lookup(selector)
            .ok_or_else(|| SessionError::timeout(format!("element '{}'", selector), timeout))
    }

    async fn find_element(&self, selector: &str) -> SessionResult<ElementRef> {
        self.ensure_open()?;
        self.lookup(selector)
            .ok_or_else(|| SessionError::NoSuchElement {
                selector: selector.to_string(),
            })
    }

    async fn find_elements(&self, selector: &str) -> SessionResult<Vec<ElementRef>> {
        self.ensure_open()?;
        let page = self.page().clone();
        let state = self.web.state();

        let found = match (&page, selector) {
            (Page::FallbackResults { query }, selectors::FALLBACK_RESULT_LINK) => {
                match state.fallback_script(query) {
                    FallbackScript::NoResults => Vec::new(),
                    _ => refs("video:", 2),
                }
            }
            (Page::Converter { song }, selectors::FALLBACK_TRANSFER_LINK) => {
                match state.fallback_script(&state.songs[*song]) {
                    FallbackScript::NoLink => Vec::new(),
                    _ => refs("transfer:", 1),
                }
            }
            (Page::Playlist, selectors::PLAYLIST_ROW) => refs("row:", state.playlist.len()),
            _ => Vec::new(),
        };
        Ok(found)
    }

    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> SessionResult<Vec<ElementRef>> {
        self.ensure_open()?;
        let page = self.page().clone();
        let state = self.web.state();
        let id = parent.id();

        let found = match (&page, selector) {
            (Page::PrimaryResults { query }, selectors::PRIMARY_RESULT_ENTRY) if id == "result-list" => {
                refs("entry:", Self::entry_count(state.primary_script(query)))
            }
            (Page::PrimaryResults { query }, selectors::PRIMARY_ENTRY_FIELD) => {
                match (state.primary_script(query), parse_index(id, "entry:")) {
                    (PrimaryScript::NotFound, _) | (_, None) => Vec::new(),
                    (_, Some(entry)) => (0..2)
                        .map(|field| ElementRef::new(format!("field:{}:{}", entry, field)))
                        .collect(),
                }
            }
            (Page::PrimaryResults { query }, selectors::PRIMARY_ENTRY_LINK) => {
                match (state.primary_script(query), parse_index(id, "entry:")) {
                    (PrimaryScript::Hit, Some(entry)) => {
                        vec![ElementRef::new(format!("link:{}", entry))]
                    }
                    _ => Vec::new(),
                }
            }
            (Page::Playlist, selectors::PLAYLIST_TITLE) => match parse_index(id, "row:") {
                Some(row) => vec![ElementRef::new(format!("title:{}", row))],
                None => Vec::new(),
            },
            (Page::Playlist, selectors::PLAYLIST_ARTISTS) => match parse_index(id, "row:") {
                Some(row) => vec![ElementRef::new(format!("artists:{}", row))],
                None => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(found)
    }

    async fn click(&self, element: &ElementRef) -> SessionResult<()> {
        self.ensure_open()?;
        let page = self.page().clone();

        match (page, element.id()) {
            (Page::PrimaryHome { typed }, "submit") => {
                let script = self.web.state().primary_script(&typed);
                match script {
                    PrimaryScript::Error => {
                        return Err(SessionError::Command {
                            command: "click".to_string(),
                            error: "element click intercepted".to_string(),
                            message: "scripted failure".to_string(),
                        })
                    }
                    PrimaryScript::Crash => return Err(self.crash()),
                    PrimaryScript::Panic => panic!("scripted panic while searching '{}'", typed),
                    _ => {}
                }
                *self.page() = Page::PrimaryResults { query: typed };
                Ok(())
            }
            (Page::Converter { song }, id) if id.starts_with("transfer:") => {
                let name = self.web.state().songs[song].clone();
                self.web.start_transfer(&name, Source::Fallback)
            }
            _ => Ok(()),
        }
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> SessionResult<()> {
        self.ensure_open()?;
        if let (Page::PrimaryHome { typed }, "query-input") = (&mut *self.page(), element.id()) {
            typed.push_str(text);
        }
        Ok(())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> SessionResult<Option<String>> {
        self.ensure_open()?;
        if name != "href" {
            return Ok(None);
        }

        let page = self.page().clone();
        let mut state = self.web.state();
        let id = element.id();

        let href = match page {
            Page::PrimaryResults { query } if id.starts_with("link:") => {
                Some(format!("{}{}", SONG_URL_PREFIX, state.song_index(&query)))
            }
            Page::FallbackResults { query } if id.starts_with("video:") => Some(format!(
                "/watch?{}=vid{}",
                sources::FALLBACK_VIDEO_ID_PARAM,
                state.song_index(&query)
            )),
            _ => None,
        };
        Ok(href)
    }

    async fn text(&self, element: &ElementRef) -> SessionResult<String> {
        self.ensure_open()?;
        let page = self.page().clone();
        let state = self.web.state();
        let id = element.id();

        let text = match page {
            Page::PrimaryResults { query } if id.starts_with("entry:") => {
                match state.primary_script(&query) {
                    PrimaryScript::NotFound => "Your request was not found".to_string(),
                    _ => format!("{} 3:45", query),
                }
            }
            Page::PrimaryResults { query } if id.starts_with("field:") => {
                // field:<entry>:<index>; entries 0 and 1 share a key
                let mut parts = id.split(':').skip(1);
                let entry: usize = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                let field: usize = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                match field {
                    0 => query,
                    _ => format!("3:4{}", entry / 2),
                }
            }
            Page::Playlist => {
                if let Some(row) = parse_index(id, "title:") {
                    state.playlist.get(row).map(|r| r.0.clone()).unwrap_or_default()
                } else if let Some(row) = parse_index(id, "artists:") {
                    state.playlist.get(row).map(|r| r.1.clone()).unwrap_or_default()
                } else {
                    String::new()
                }
            }
            _ => String::new(),
        };
        Ok(text)
    }

    async fn close(&self) -> SessionResult<()> {
        self.mark_closed();
        Ok(())
    }
}

/// In-memory process table
#[derive(Debug, Default)]
pub struct ScriptedProcesses {
    running: Mutex<HashMap<String, Vec<u32>>>,
    next_pid: AtomicU32,
    kills: AtomicUsize,
}

impl ScriptedProcesses {
    /// A table with `count` processes named `name` already running
    pub fn with_running(name: &str, count: usize) -> Self {
        let processes = Self::default();
        processes.spawn(name, count);
        processes
    }

    /// Start `count` processes named `name`
    pub fn spawn(&self, name: &str, count: usize) {
        for _ in 0..count {
            self.spawn_one(name);
        }
    }

    fn spawn_one(&self, name: &str) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed) + 1000;
        self.table().entry(name.to_string()).or_default().push(pid);
        pid
    }

    /// Number of running processes named `name`
    pub fn running(&self, name: &str) -> usize {
        self.table().get(name).map_or(0, Vec::len)
    }

    /// Total processes killed
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::Acquire)
    }

    fn remove(&self, pid: u32) -> bool {
        let mut table = self.table();
        for pids in table.values_mut() {
            if let Some(position) = pids.iter().position(|p| *p == pid) {
                pids.remove(position);
                return true;
            }
        }
        false
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Vec<u32>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProcessControl for ScriptedProcesses {
    async fn list_by_name(&self, name: &str) -> io::Result<Vec<u32>> {
        Ok(self.table().get(name).cloned().unwrap_or_default())
    }

    async fn kill(&self, pid: u32) -> io::Result<()> {
        if self.remove(pid) {
            self.kills.fetch_add(1, Ordering::AcqRel);
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such process"))
        }
    }

    fn kill_all_blocking(&self, name: &str) -> io::Result<usize> {
        let killed = self.table().remove(name).map_or(0, |pids| pids.len());
        self.kills.fetch_add(killed, Ordering::AcqRel);
        Ok(killed)
    }
}
