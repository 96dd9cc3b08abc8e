//! Fallback source retrieval
//!
//! The fallback searches a video site for the item, takes the first result,
//! and hands its video identifier to a conversion endpoint. Once the
//! converter shows its ready marker the first transfer link is clicked.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use super::config::RetrievalConfig;
use crate::app::models::Item;
use crate::app::session::AutomationSession;
use crate::constants::sources::{FALLBACK_QUERY_PARAM, FALLBACK_VIDEO_ID_PARAM};
use crate::errors::{RetrievalError, RetrievalResult, SessionError};

/// Drives the fallback search and conversion
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    config: Arc<RetrievalConfig>,
}

impl FallbackResolver {
    pub fn new(config: Arc<RetrievalConfig>) -> Self {
        Self { config }
    }

    /// Search page address for `item`
    pub fn search_url(&self, item: &Item) -> RetrievalResult<Url> {
        Url::parse_with_params(
            &self.config.fallback_search_url,
            &[(FALLBACK_QUERY_PARAM, item.name())],
        )
        .map_err(|e| RetrievalError::InvalidUrl {
            url: self.config.fallback_search_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Converter address for a video identifier
    pub fn transfer_url(&self, video_id: &str) -> String {
        format!(
            "{}/{}",
            self.config.fallback_transfer_endpoint.trim_end_matches('/'),
            video_id
        )
    }

    /// Search the fallback source and return the converter address
    pub async fn resolve(
        &self,
        session: &dyn AutomationSession,
        item: &Item,
    ) -> RetrievalResult<String> {
        let search = self.search_url(item)?;
        session.navigate(search.as_str()).await?;
        session.wait_for_page_ready().await?;

        let results = session
            .find_elements(&self.config.selectors.fallback_result_link)
            .await?;
        let first = results
            .first()
            .ok_or_else(|| RetrievalError::NoFallbackResults {
                item: item.name().to_string(),
            })?;

        let link = session
            .attribute(first, "href")
            .await?
            .ok_or_else(|| RetrievalError::NoFallbackResults {
                item: item.name().to_string(),
            })?;
        let video_id = video_id(&search, &link)?;

        debug!("Fallback video for '{}': {}", item, video_id);
        Ok(self.transfer_url(&video_id))
    }

    /// Load the converter, wait for it to be ready, start the transfer
    pub async fn transfer(
        &self,
        session: &dyn AutomationSession,
        item: &Item,
        converter_url: &str,
    ) -> RetrievalResult<()> {
        let selectors = &self.config.selectors;
        let timeout = self.config.fallback_ready_timeout;

        session.navigate(converter_url).await?;
        match session
            .wait_for_element(&selectors.fallback_ready_marker, timeout)
            .await
        {
            Ok(_) => {}
            Err(SessionError::Timeout { .. }) => {
                return Err(RetrievalError::FallbackTimeout {
                    item: item.name().to_string(),
                    seconds: timeout.as_secs(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        let links = session
            .find_elements(&selectors.fallback_transfer_link)
            .await?;
        let link = links.first().ok_or_else(|| RetrievalError::NoTransferLink {
            item: item.name().to_string(),
        })?;
        session.click(link).await?;
        Ok(())
    }
}

/// Video identifier from a result link, resolved against the search page
pub fn video_id(search: &Url, link: &str) -> RetrievalResult<String> {
    let resolved = search.join(link).map_err(|e| RetrievalError::InvalidUrl {
        url: link.to_string(),
        reason: e.to_string(),
    })?;

    resolved
        .query_pairs()
        .find(|(key, _)| key == FALLBACK_VIDEO_ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RetrievalError::MissingVideoId {
            link: link.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::session::scripted::{FallbackScript, ScriptedWeb};
    use crate::app::session::{SessionFactory, SessionOptions};
    use crate::app::models::Source;

    fn resolver() -> FallbackResolver {
        FallbackResolver::new(Arc::new(RetrievalConfig::default()))
    }

    #[test]
    fn test_search_url_encodes_query() {
        let url = resolver()
            .search_url(&Item::new(0, "AC/DC - Back in Black"))
            .unwrap();
        let query: Vec<_> = url.query_pairs().collect();
        assert_eq!(query.len(), 1);
        assert_eq!(query[0].0, "search_query");
        assert_eq!(query[0].1, "AC/DC - Back in Black");
    }

    #[test]
    fn test_video_id_from_relative_and_absolute_links() {
        let search = Url::parse("https://www.youtube.com/results?search_query=x").unwrap();
        assert_eq!(video_id(&search, "/watch?v=abc123").unwrap(), "abc123");
        assert_eq!(
            video_id(&search, "https://www.youtube.com/watch?v=xyz&t=10").unwrap(),
            "xyz"
        );
    }

    #[test]
    fn test_link_without_video_id_is_rejected() {
        let search = Url::parse("https://www.youtube.com/results?search_query=x").unwrap();
        let error = video_id(&search, "/channel/UC123").unwrap_err();
        assert!(matches!(error, RetrievalError::MissingVideoId { .. }));
        assert!(video_id(&search, "/watch?v=").is_err());
    }

    #[test]
    fn test_transfer_url_appends_id() {
        assert_eq!(
            resolver().transfer_url("abc123"),
            "https://www.yt-download.org/pt/@api/button/mp3/abc123"
        );
    }

    async fn run(web: &ScriptedWeb, name: &str) -> RetrievalResult<()> {
        let session = web
            .factory()
            .create(&SessionOptions {
                download_dir: web.download_dir().to_path_buf(),
                headless: true,
                kill_existing: false,
            })
            .await
            .unwrap();
        let resolver = resolver();
        let item = Item::new(0, name);
        let converter = resolver.resolve(session.as_ref(), &item).await?;
        resolver.transfer(session.as_ref(), &item, &converter).await
    }

    #[tokio::test]
    async fn test_fallback_hit_starts_transfer() {
        let web = ScriptedWeb::new().unwrap();
        web.fallback("Artist - Rare", FallbackScript::Hit);

        run(&web, "Artist - Rare").await.unwrap();
        assert_eq!(
            web.transfers(),
            vec![("Artist - Rare".to_string(), Source::Fallback)]
        );
    }

    #[tokio::test]
    async fn test_fallback_failures_map_to_errors() {
        let web = ScriptedWeb::new().unwrap();
        web.fallback("A - NoResults", FallbackScript::NoResults)
            .fallback("B - NeverReady", FallbackScript::NeverReady)
            .fallback("C - NoLink", FallbackScript::NoLink);

        assert!(matches!(
            run(&web, "A - NoResults").await,
            Err(RetrievalError::NoFallbackResults { .. })
        ));
        assert!(matches!(
            run(&web, "B - NeverReady").await,
            Err(RetrievalError::FallbackTimeout { seconds: 300, .. })
        ));
        assert!(matches!(
            run(&web, "C - NoLink").await,
            Err(RetrievalError::NoTransferLink { .. })
        ));
        assert!(web.transfers().is_empty());
    }
}
