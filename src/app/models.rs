//! Data models for songs flowing through a run
//!
//! An [`Item`] is the unit of work: an immutable display name plus the
//! sequence number it received when the queue was seeded. Two items may carry
//! the same name; they are still processed independently.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One song to retrieve
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    id: u64,
    name: String,
}

impl Item {
    /// Create an item with an explicit sequence id
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Sequence id assigned at seed time
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Display name used as the search query
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Which source started a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// The primary song search site
    Primary,
    /// The video-site fallback
    Fallback,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Primary => f.write_str("primary"),
            Source::Fallback => f.write_str("fallback"),
        }
    }
}

/// Reduce a hyphen-delimited name to its first two parts
///
/// Names such as `"Artist - Title - Remastered 2011"` carry qualifiers that
/// only hurt the search; they become `"Artist - Title"`. Names with two or
/// fewer parts are returned unchanged.
pub fn normalize_item_name(name: &str) -> String {
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() > 2 {
        format!("{} - {}", parts[0].trim(), parts[1].trim())
    } else {
        name.to_string()
    }
}

/// Normalize every name and assign sequence ids in input order
pub fn prepare_items<I, S>(names: I) -> Vec<Item>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .enumerate()
        .map(|(index, name)| Item::new(index as u64, normalize_item_name(name.as_ref())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_part_name_is_cut_to_two() {
        assert_eq!(normalize_item_name("A - B - Remix"), "A - B");
        assert_eq!(
            normalize_item_name("Queen - Bohemian Rhapsody - Remastered 2011"),
            "Queen - Bohemian Rhapsody"
        );
    }

    #[test]
    fn test_short_names_are_untouched() {
        assert_eq!(normalize_item_name("Artist1 - Song1"), "Artist1 - Song1");
        assert_eq!(normalize_item_name("JustATitle"), "JustATitle");
        assert_eq!(normalize_item_name(""), "");
    }

    #[test]
    fn test_unspaced_hyphens_count_as_parts() {
        assert_eq!(normalize_item_name("Jay-Z - Song"), "Jay - Z");
    }

    #[test]
    fn test_prepare_items_keeps_duplicates_and_order() {
        let items = prepare_items(["A - B", "A - B", "C - D - Live"]);

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].name(), "A - B");
        assert_eq!(items[1].name(), "A - B");
        assert_ne!(items[0], items[1]);
        assert_eq!(items[2].name(), "C - D");
        assert_eq!(items[2].id(), 2);
    }
}
