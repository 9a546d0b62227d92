use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Subscription filter in NIP-01 shape.
///
/// Only `authors` and `kinds` narrow cache lookups. The remaining fields are
/// carried so a filter round-trips unchanged, but the cache does not evaluate
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<u16>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Generic tag queries keyed as on the wire (`#e`, `#p`, ...).
    #[serde(flatten)]
    pub generic_tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors
            .get_or_insert_with(BTreeSet::new)
            .extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Cross product of authors and kinds, or `None` when either set is absent.
    pub fn author_kind_pairs(&self) -> Option<Vec<(&str, u16)>> {
        let authors = self.authors.as_ref()?;
        let kinds = self.kinds.as_ref()?;

        let mut pairs = Vec::with_capacity(authors.len() * kinds.len());
        for author in authors {
            for kind in kinds {
                pairs.push((author.as_str(), *kind));
            }
        }
        Some(pairs)
    }
}
