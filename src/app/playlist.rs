//! Playlist input
//!
//! A playlist link is probed over plain HTTP before anything else runs, then
//! read with the primary session: each track row yields
//! `"<first artist> - <title>"`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::app::retrieval::Selectors;
use crate::app::session::AutomationSession;
use crate::errors::{RunError, RunResult, SessionResult};

/// Reachability check for a user-supplied link
#[async_trait]
pub trait LinkProbe: Send + Sync {
    async fn probe(&self, link: &str) -> RunResult<()>;
}

/// Probes links with an HTTP GET
#[derive(Debug, Clone)]
pub struct HttpLinkProbe {
    client: reqwest::Client,
}

impl HttpLinkProbe {
    pub fn new(timeout: Duration) -> RunResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkProbe for HttpLinkProbe {
    async fn probe(&self, link: &str) -> RunResult<()> {
        validate_link(&self.client, link).await
    }
}

/// GET `link`; transport failures and error statuses make it unreachable
pub async fn validate_link(client: &reqwest::Client, link: &str) -> RunResult<()> {
    let unreachable = |reason: String| RunError::LinkUnreachable {
        link: link.to_string(),
        reason,
    };

    let url = url::Url::parse(link).map_err(|e| unreachable(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| unreachable(e.to_string()))?;
    response
        .error_for_status()
        .map_err(|e| unreachable(e.to_string()))?;

    debug!("Link reachable: {}", link);
    Ok(())
}

/// `"<first artist> - <title>"` from a row's texts
///
/// Returns `None` when the title is blank.
pub fn format_track(title: &str, artists: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    let artist = artists.split(',').next().unwrap_or_default().trim();
    Some(format!("{} - {}", artist, title))
}

/// Reads track names off a playlist page
#[derive(Debug, Clone)]
pub struct PlaylistReader {
    selectors: Selectors,
}

impl PlaylistReader {
    pub fn new(selectors: Selectors) -> Self {
        Self { selectors }
    }

    /// Track names on the page at `link`, in page order
    pub async fn read_names(
        &self,
        session: &dyn AutomationSession,
        link: &str,
    ) -> SessionResult<Vec<String>> {
        info!("Navigating to playlist link");
        session.navigate(link).await?;
        session.wait_for_page_ready().await?;

        let rows = session.find_elements(&self.selectors.playlist_row).await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(title) = session
                .find_child_elements(row, &self.selectors.playlist_title)
                .await?
                .into_iter()
                .next()
            else {
                warn!("Playlist row {} has no title; skipped", row);
                continue;
            };
            let title = session.text(&title).await?;

            let artists = match session
                .find_child_elements(row, &self.selectors.playlist_artists)
                .await?
                .first()
            {
                Some(artists) => session.text(artists).await?,
                None => String::new(),
            };

            match format_track(&title, &artists) {
                Some(name) => names.push(name),
                None => warn!("Playlist row {} has a blank title; skipped", row),
            }
        }

        info!("Got {} song names from playlist", names.len());
        Ok(names)
    }
}
