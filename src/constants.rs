//! Application constants for Playlist Fetcher
//!
//! This module centralizes the constants used throughout the application,
//! organized by functional domain. Site-specific values here are only the
//! defaults; every one of them can be overridden from the config file.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Overrides the WebDriver binary used to spawn browser sessions
    pub const DRIVER_BINARY: &str = "PLAYLIST_FETCHER_DRIVER";
}

/// Primary and fallback source endpoints
pub mod sources {
    /// Primary song search site
    pub const PRIMARY_URL: &str = "https://myfreemp3c.com/";

    /// Text shown by the primary site as the single result when nothing matched
    pub const PRIMARY_NOT_FOUND_TEXT: &str = "your request was not found";

    /// Only this many primary results are considered when picking a target
    pub const PRIMARY_RESULT_LIMIT: usize = 10;

    /// Separator used to join the sub-fields of a primary result into its key
    pub const RESULT_KEY_SEPARATOR: &str = " - ";

    /// Fallback video search page (query goes in `search_query`)
    pub const FALLBACK_SEARCH_URL: &str = "https://www.youtube.com/results";

    /// Query parameter carrying the search text on the fallback site
    pub const FALLBACK_QUERY_PARAM: &str = "search_query";

    /// Query parameter carrying the video identifier in fallback result links
    pub const FALLBACK_VIDEO_ID_PARAM: &str = "v";

    /// Conversion endpoint; the video identifier is appended as the last segment
    pub const FALLBACK_TRANSFER_ENDPOINT: &str = "https://www.yt-download.org/pt/@api/button/mp3";

    /// String the primary site appends to downloaded file names
    pub const SITE_SUFFIX: &str = "my-free-mp3s.com";
}

/// CSS selectors for page interaction
pub mod selectors {
    /// Primary site: search input
    pub const PRIMARY_QUERY_INPUT: &str = "#query";

    /// Primary site: search submit button
    pub const PRIMARY_SUBMIT: &str = "body > div.wrapper > div.container > div > span > button";

    /// Primary site: result container
    pub const PRIMARY_RESULT: &str = "#result";

    /// Primary site: result list inside the container
    pub const PRIMARY_RESULT_LIST: &str = "#result > div.list-group";

    /// Primary site: one result entry
    pub const PRIMARY_RESULT_ENTRY: &str = ".list-group-item";

    /// Primary site: sub-fields of an entry joined into its key
    pub const PRIMARY_ENTRY_FIELD: &str = "#navi";

    /// Primary site: link inside an entry pointing at the transfer target
    pub const PRIMARY_ENTRY_LINK: &str = "a.name";

    /// Fallback site: video result links
    pub const FALLBACK_RESULT_LINK: &str = "a#video-title.yt-simple-endpoint.style-scope.ytd-video-renderer";

    /// Fallback converter: element that appears once the file is ready
    pub const FALLBACK_READY_MARKER: &str = ".download-result";

    /// Fallback converter: transfer links
    pub const FALLBACK_TRANSFER_LINK: &str = ".link";

    /// Playlist page: one track row
    pub const PLAYLIST_ROW: &str = ".tracklist-row";

    /// Playlist page: track title inside a row
    pub const PLAYLIST_TITLE: &str = "div.tracklist-name.ellipsis-one-line";

    /// Playlist page: artist list inside a row
    pub const PLAYLIST_ARTISTS: &str = "span.TrackListRow__artists.ellipsis-one-line";
}

/// Automation session defaults
pub mod session {
    use super::Duration;

    /// WebDriver binary spawned for each session
    pub const DRIVER_BINARY: &str = "chromedriver";

    /// OS process name of the helper, used for stray-process cleanup
    pub const HELPER_PROCESS_NAME: &str = "chromedriver";

    /// Host the driver listens on
    pub const DRIVER_HOST: &str = "127.0.0.1";

    /// Time allowed for a freshly spawned driver to answer `/status`
    pub const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

    /// Bound for page-ready waits
    pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default bound for element waits
    pub const ELEMENT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Interval between element/page polls inside a wait
    pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

    /// HTTP timeout for a single WebDriver command
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

    /// W3C key under which element references are returned
    pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
}

/// Run orchestration defaults
pub mod run {
    use super::Duration;

    /// Poll interval of the quiescence detector
    pub const QUIESCENCE_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Bound for the fallback converter to show its ready marker
    pub const FALLBACK_READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    /// Suffix browsers give to partially transferred files
    pub const TRANSFER_MARKER_SUFFIX: &str = ".crdownload";

    /// Capacity of the run event channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Timeout for the reachability probe of a playlist link
    pub const LINK_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

    /// Iterations between detector status logs (every 30s at the default interval)
    pub const DETECTOR_LOG_FREQUENCY: u32 = 30;
}

/// Worker pool limits
pub mod workers {
    /// Upper bound on parallel workers, each owning a browser session
    pub const MAX_WORKER_COUNT: usize = 64;
}

/// Output directory conventions
pub mod output {
    /// Prefix of the per-run session folder
    pub const SESSION_FOLDER_PREFIX: &str = "PlaylistFetcher_Session_";

    /// chrono format of the session folder timestamp
    pub const SESSION_ID_FORMAT: &str = "%d_%m_%Y_%H_%M_%S";

    /// Permissions applied to the output directory (Unix only)
    #[cfg(unix)]
    pub const DIRECTORY_PERMISSIONS: u32 = 0o755;
}

/// Configuration file locations
pub mod config {
    /// Project-local config file name
    pub const LOCAL_CONFIG_FILE: &str = "playlist-fetcher.toml";

    /// Directory under the user config dir
    pub const CONFIG_DIR_NAME: &str = "playlist-fetcher";

    /// File name inside the user config dir
    pub const CONFIG_FILE_NAME: &str = "config.toml";
}

// Re-export commonly used constants for convenience
pub use run::{QUIESCENCE_POLL_INTERVAL, TRANSFER_MARKER_SUFFIX};
pub use session::{DRIVER_BINARY, HELPER_PROCESS_NAME};
pub use sources::{PRIMARY_RESULT_LIMIT, SITE_SUFFIX};
