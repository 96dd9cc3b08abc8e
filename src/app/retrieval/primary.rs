//! Primary source search
//!
//! The primary source answers a query with a list of entries. A single entry
//! carrying the not-found sentinel means no match. Otherwise the first few
//! entries are keyed by their joined sub-field texts, duplicates dropped, and
//! the first entry with a target link wins.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::config::RetrievalConfig;
use crate::app::models::Item;
use crate::app::session::{AutomationSession, ElementRef};
use crate::constants::sources::RESULT_KEY_SEPARATOR;
use crate::errors::RetrievalResult;

/// Result of a primary search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryMatch {
    /// A transfer target was resolved
    Found(String),
    /// Nothing usable; the item goes to the fallback source
    NotFound,
}

/// One de-duplicated primary entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Sub-field texts joined with `" - "`
    pub key: String,
    /// The entry's own target link, if it has one
    pub target: Option<String>,
}

/// Whether an entry's text is the not-found sentinel
pub fn is_not_found(text: &str, sentinel: &str) -> bool {
    text.to_lowercase().contains(&sentinel.to_lowercase())
}

/// Composite key of an entry
pub fn build_key<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|field| field.as_ref().trim())
        .collect::<Vec<_>>()
        .join(RESULT_KEY_SEPARATOR)
}

/// First candidate in result order that has a target
pub fn select_target(candidates: &[Candidate]) -> Option<&str> {
    candidates
        .iter()
        .find_map(|candidate| candidate.target.as_deref())
}

/// Drives searches on the primary source
#[derive(Debug, Clone)]
pub struct PrimaryResolver {
    config: Arc<RetrievalConfig>,
}

impl PrimaryResolver {
    pub fn new(config: Arc<RetrievalConfig>) -> Self {
        Self { config }
    }

    /// Search for `item` and resolve a transfer target
    pub async fn search(
        &self,
        session: &dyn AutomationSession,
        item: &Item,
    ) -> RetrievalResult<PrimaryMatch> {
        let selectors = &self.config.selectors;
        let timeout = self.config.element_timeout;

        session.navigate(&self.config.primary_url).await?;
        session.wait_for_page_ready().await?;

        let input = session
            .wait_for_element(&selectors.primary_query_input, timeout)
            .await?;
        session.send_keys(&input, item.name()).await?;
        let submit = session.find_element(&selectors.primary_submit).await?;
        session.click(&submit).await?;

        session.wait_for_page_ready().await?;
        session
            .wait_for_element(&selectors.primary_result, timeout)
            .await?;
        let list = session
            .wait_for_element(&selectors.primary_result_list, timeout)
            .await?;
        let entries = session
            .find_child_elements(&list, &selectors.primary_result_entry)
            .await?;

        if let [only] = entries.as_slice() {
            let text = session.text(only).await?;
            if is_not_found(&text, &self.config.not_found_text) {
                debug!("Primary source has no match for '{}'", item);
                return Ok(PrimaryMatch::NotFound);
            }
        }

        let candidates = self.collect_candidates(session, &entries).await?;
        match select_target(&candidates) {
            Some(target) => {
                debug!(
                    "Primary target for '{}' picked from {} candidates",
                    item,
                    candidates.len()
                );
                Ok(PrimaryMatch::Found(target.to_string()))
            }
            None => {
                debug!("No primary entry for '{}' carried a target", item);
                Ok(PrimaryMatch::NotFound)
            }
        }
    }

    /// Start the transfer by loading the resolved target
    pub async fn start_transfer(
        &self,
        session: &dyn AutomationSession,
        target: &str,
    ) -> RetrievalResult<()> {
        session.navigate(target).await?;
        Ok(())
    }

    async fn collect_candidates(
        &self,
        session: &dyn AutomationSession,
        entries: &[ElementRef],
    ) -> RetrievalResult<Vec<Candidate>> {
        let selectors = &self.config.selectors;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for entry in entries.iter().take(self.config.result_limit) {
            let mut fields = Vec::new();
            for field in session
                .find_child_elements(entry, &selectors.primary_entry_field)
                .await?
            {
                fields.push(session.text(&field).await?);
            }

            let key = build_key(&fields);
            if !seen.insert(key.clone()) {
                continue;
            }

            let target = match session
                .find_child_elements(entry, &selectors.primary_entry_link)
                .await?
                .first()
            {
                Some(link) => session.attribute(link, "href").await?,
                None => None,
            };

            candidates.push(Candidate { key, target });
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::session::scripted::{PrimaryScript, ScriptedWeb};
    use crate::app::session::{SessionFactory, SessionOptions};
    use crate::constants::selectors;
    use crate::errors::SessionResult;
    use async_trait::async_trait;
    use std::time::Duration;

    /// A results page with fixed entries, each `(fields, href)`
    struct ResultsPage {
        entries: Vec<(Vec<String>, Option<String>)>,
    }

    fn row(fields: &[&str], href: Option<&str>) -> (Vec<String>, Option<String>) {
        (
            fields.iter().map(|field| field.to_string()).collect(),
            href.map(str::to_string),
        )
    }

    impl ResultsPage {
        fn entry(&self, element: &ElementRef) -> Option<usize> {
            element.id().strip_prefix("entry:")?.parse().ok()
        }
    }

    #[async_trait]
    impl AutomationSession for ResultsPage {
        async fn navigate(&self, _url: &str) -> SessionResult<()> {
            Ok(())
        }

        async fn wait_for_page_ready(&self) -> SessionResult<()> {
            Ok(())
        }

        async fn wait_for_element(&self, selector: &str, _timeout: Duration) -> SessionResult<ElementRef> {
            Ok(ElementRef::new(selector))
        }

        async fn find_element(&self, selector: &str) -> SessionResult<ElementRef> {
            Ok(ElementRef::new(selector))
        }

        async fn find_elements(&self, _selector: &str) -> SessionResult<Vec<ElementRef>> {
            Ok(Vec::new())
        }

        async fn find_child_elements(
            &self,
            parent: &ElementRef,
            selector: &str,
        ) -> SessionResult<Vec<ElementRef>> {
            let found = match (self.entry(parent), selector) {
                (None, selectors::PRIMARY_RESULT_ENTRY) => (0..self.entries.len())
                    .map(|i| ElementRef::new(format!("entry:{}", i)))
                    .collect(),
                (Some(i), selectors::PRIMARY_ENTRY_FIELD) => (0..self.entries[i].0.len())
                    .map(|j| ElementRef::new(format!("field:{}:{}", i, j)))
                    .collect(),
                (Some(i), selectors::PRIMARY_ENTRY_LINK) if self.entries[i].1.is_some() => {
                    vec![ElementRef::new(format!("link:{}", i))]
                }
                _ => Vec::new(),
            };
            Ok(found)
        }

        async fn click(&self, _element: &ElementRef) -> SessionResult<()> {
            Ok(())
        }

        async fn send_keys(&self, _element: &ElementRef, _text: &str) -> SessionResult<()> {
            Ok(())
        }

        async fn attribute(&self, element: &ElementRef, _name: &str) -> SessionResult<Option<String>> {
            let index = element
                .id()
                .strip_prefix("link:")
                .and_then(|i| i.parse::<usize>().ok());
            Ok(index.and_then(|i| self.entries[i].1.clone()))
        }

        async fn text(&self, element: &ElementRef) -> SessionResult<String> {
            if let Some(i) = self.entry(element) {
                return Ok(self.entries[i].0.join(" "));
            }
            let (i, j) = element
                .id()
                .strip_prefix("field:")
                .and_then(|rest| rest.split_once(':'))
                .unwrap();
            Ok(self.entries[i.parse::<usize>().unwrap()].0[j.parse::<usize>().unwrap()].clone())
        }

        async fn close(&self) -> SessionResult<()> {
            Ok(())
        }
    }

    async fn resolve(page: &ResultsPage) -> PrimaryMatch {
        PrimaryResolver::new(Arc::new(RetrievalConfig::default()))
            .search(page, &Item::new(0, "Artist - Song"))
            .await
            .unwrap()
    }

    fn candidate(key: &str, target: Option<&str>) -> Candidate {
        Candidate {
            key: key.to_string(),
            target: target.map(str::to_string),
        }
    }

    #[test]
    fn test_not_found_is_case_insensitive() {
        assert!(is_not_found("Your Request Was NOT Found", "your request was not found"));
        assert!(!is_not_found("Artist - Song", "your request was not found"));
    }

    #[test]
    fn test_build_key_joins_trimmed_fields() {
        assert_eq!(build_key(&[" Artist ", "Song", "3:45"]), "Artist - Song - 3:45");
        assert_eq!(build_key::<&str>(&[]), "");
    }

    /// Test first-wins target selection
    ///
    /// Verifies that the earliest entry with a target is chosen and entries
    /// without one are skipped, with no ranking applied.
    #[test]
    fn test_select_target_is_first_wins() {
        let candidates = vec![
            candidate("A - 1", None),
            candidate("B - 2", Some("https://host/b")),
            candidate("C - 3", Some("https://host/c")),
        ];
        assert_eq!(select_target(&candidates), Some("https://host/b"));
        assert_eq!(select_target(&[candidate("A - 1", None)]), None);
        assert_eq!(select_target(&[]), None);
    }

    async fn search(web: &ScriptedWeb, name: &str) -> PrimaryMatch {
        let session = web
            .factory()
            .create(&SessionOptions {
                download_dir: web.download_dir().to_path_buf(),
                headless: true,
                kill_existing: false,
            })
            .await
            .unwrap();
        let resolver = PrimaryResolver::new(Arc::new(RetrievalConfig::default()));
        resolver
            .search(session.as_ref(), &Item::new(0, name))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_resolves_target() {
        let web = ScriptedWeb::new().unwrap();
        web.primary("Artist - Song", PrimaryScript::Hit);

        match search(&web, "Artist - Song").await {
            PrimaryMatch::Found(target) => assert!(target.starts_with("scripted://song/")),
            PrimaryMatch::NotFound => panic!("expected a target"),
        }
    }

    #[tokio::test]
    async fn test_sentinel_entry_is_a_miss() {
        let web = ScriptedWeb::new().unwrap();
        web.primary("Nobody - Nothing", PrimaryScript::NotFound);
        assert_eq!(search(&web, "Nobody - Nothing").await, PrimaryMatch::NotFound);
    }

    #[tokio::test]
    async fn test_entries_without_targets_are_a_miss() {
        let web = ScriptedWeb::new().unwrap();
        web.primary("Artist - Linkless", PrimaryScript::NoTarget);
        assert_eq!(search(&web, "Artist - Linkless").await, PrimaryMatch::NotFound);
    }

    /// Test the result cap
    ///
    /// Verifies that only the first ten entries are considered: a target on
    /// the eleventh entry is never reached, one on the tenth is.
    #[tokio::test]
    async fn test_entries_past_the_limit_are_ignored() {
        let entries = |linked: usize| ResultsPage {
            entries: (0..12)
                .map(|i| {
                    let href = (i == linked).then_some("https://host/linked");
                    row(&["Artist", format!("Song {}", i).as_str()], href)
                })
                .collect(),
        };

        assert_eq!(resolve(&entries(10)).await, PrimaryMatch::NotFound);
        assert_eq!(
            resolve(&entries(9)).await,
            PrimaryMatch::Found("https://host/linked".to_string())
        );
    }

    /// Test duplicate keys
    ///
    /// Verifies that an entry whose key was already seen is skipped even
    /// when it carries the only target so far.
    #[tokio::test]
    async fn test_repeated_key_is_skipped() {
        let page = ResultsPage {
            entries: vec![
                row(&["K", "Song"], None),
                row(&["K", "Song"], Some("https://host/duplicate")),
                row(&["L", "Song"], Some("https://host/next")),
            ],
        };

        assert_eq!(
            resolve(&page).await,
            PrimaryMatch::Found("https://host/next".to_string())
        );
    }
}
