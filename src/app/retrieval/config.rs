//! Retrieval configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{run, selectors, session, sources};

/// Runtime configuration for both sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Primary search page
    pub primary_url: String,
    /// Sentinel text of the primary source's single not-found entry
    pub not_found_text: String,
    /// Maximum primary entries considered per search
    pub result_limit: usize,
    /// Fallback search page
    pub fallback_search_url: String,
    /// Fallback conversion endpoint
    pub fallback_transfer_endpoint: String,
    /// Bound for element waits on either source
    #[serde(with = "humantime_serde")]
    pub element_timeout: Duration,
    /// Bound for the fallback converter's ready marker
    #[serde(with = "humantime_serde")]
    pub fallback_ready_timeout: Duration,
    /// Page selectors
    pub selectors: Selectors,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            primary_url: sources::PRIMARY_URL.to_string(),
            not_found_text: sources::PRIMARY_NOT_FOUND_TEXT.to_string(),
            result_limit: sources::PRIMARY_RESULT_LIMIT,
            fallback_search_url: sources::FALLBACK_SEARCH_URL.to_string(),
            fallback_transfer_endpoint: sources::FALLBACK_TRANSFER_ENDPOINT.to_string(),
            element_timeout: session::ELEMENT_TIMEOUT,
            fallback_ready_timeout: run::FALLBACK_READY_TIMEOUT,
            selectors: Selectors::default(),
        }
    }
}

/// CSS selectors used on the primary, fallback and playlist pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub primary_query_input: String,
    pub primary_submit: String,
    pub primary_result: String,
    pub primary_result_list: String,
    pub primary_result_entry: String,
    pub primary_entry_field: String,
    pub primary_entry_link: String,
    pub fallback_result_link: String,
    pub fallback_ready_marker: String,
    pub fallback_transfer_link: String,
    pub playlist_row: String,
    pub playlist_title: String,
    pub playlist_artists: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            primary_query_input: selectors::PRIMARY_QUERY_INPUT.to_string(),
            primary_submit: selectors::PRIMARY_SUBMIT.to_string(),
            primary_result: selectors::PRIMARY_RESULT.to_string(),
            primary_result_list: selectors::PRIMARY_RESULT_LIST.to_string(),
            primary_result_entry: selectors::PRIMARY_RESULT_ENTRY.to_string(),
            primary_entry_field: selectors::PRIMARY_ENTRY_FIELD.to_string(),
            primary_entry_link: selectors::PRIMARY_ENTRY_LINK.to_string(),
            fallback_result_link: selectors::FALLBACK_RESULT_LINK.to_string(),
            fallback_ready_marker: selectors::FALLBACK_READY_MARKER.to_string(),
            fallback_transfer_link: selectors::FALLBACK_TRANSFER_LINK.to_string(),
            playlist_row: selectors::PLAYLIST_ROW.to_string(),
            playlist_title: selectors::PLAYLIST_TITLE.to_string(),
            playlist_artists: selectors::PLAYLIST_ARTISTS.to_string(),
        }
    }
}
