// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Topic and topic-filter parsing, canonicalized from the forward-slash
//! separated wire representation. `spec.md` §3: topics never contain
//! wildcards; filters may use `+` (single level) and `#` (multi-level,
//! final position only).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

pub const SINGLE_WILDCARD: &str = "+";
pub const MULTI_WILDCARD: &str = "#";

/// An ordered sequence of topic levels, e.g. `"a/b/c"` -> `["a", "b", "c"]`.
/// Empty levels (`"a//b"`) are preserved as empty strings rather than
/// collapsed, matching the Open Question resolution in `SPEC_FULL.md` §4.1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    levels: Vec<String>,
}

impl Topic {
    /// Parses a concrete (non-filter) topic. Rejects wildcards.
    ///
    /// # Errors
    /// Returns `InvalidTopicFilter` if the topic contains `+` or `#`, or is
    /// empty.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::InvalidTopicFilter, "topic must not be empty"));
        }
        let levels: Vec<String> = raw.split('/').map(str::to_string).collect();
        for level in &levels {
            if level == SINGLE_WILDCARD || level == MULTI_WILDCARD {
                return Err(Error::new(
                    ErrorKind::InvalidTopicFilter,
                    format!("concrete topic must not contain wildcards: {raw}"),
                ));
            }
        }
        Ok(Self { levels })
    }

    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.levels.join("/"))
    }
}

/// A single level in a `TopicFilter`: a literal string, `+`, or the
/// terminal `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterLevel {
    Literal(String),
    SingleWildcard,
    MultiWildcard,
}

/// A topic filter as used in SUBSCRIBE and in the archive-group filter
/// tree. May contain `+` at any level and `#` only as the last level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    levels: Vec<FilterLevel>,
    raw: String,
}

impl TopicFilter {
    /// Parses and validates a topic filter.
    ///
    /// # Errors
    /// Returns `InvalidTopicFilter` if `#` appears anywhere but the final
    /// level, or the filter is empty.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::InvalidTopicFilter, "filter must not be empty"));
        }
        let parts: Vec<&str> = raw.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());
        for (idx, part) in parts.iter().enumerate() {
            let level = match *part {
                MULTI_WILDCARD if idx == last => FilterLevel::MultiWildcard,
                MULTI_WILDCARD => {
                    return Err(Error::new(
                        ErrorKind::InvalidTopicFilter,
                        format!("'#' must be the last level in filter: {raw}"),
                    ));
                }
                SINGLE_WILDCARD => FilterLevel::SingleWildcard,
                other => FilterLevel::Literal(other.to_string()),
            };
            levels.push(level);
        }
        Ok(Self {
            levels,
            raw: raw.to_string(),
        })
    }

    #[must_use]
    pub fn levels(&self) -> &[FilterLevel] {
        &self.levels
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if `topic` is matched by this filter, applying the
    /// three-edge-per-level traversal from `spec.md` §4.1: exact, `+`, `#`.
    #[must_use]
    pub fn is_match(&self, topic: &Topic) -> bool {
        Self::match_levels(&self.levels, topic.levels())
    }

    fn match_levels(filter: &[FilterLevel], topic: &[String]) -> bool {
        match filter.first() {
            None => topic.is_empty(),
            Some(FilterLevel::MultiWildcard) => true,
            Some(FilterLevel::SingleWildcard) => {
                !topic.is_empty() && Self::match_levels(&filter[1..], &topic[1..])
            }
            Some(FilterLevel::Literal(lit)) => {
                !topic.is_empty() && topic[0] == *lit && Self::match_levels(&filter[1..], &topic[1..])
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(raw: &str) -> Topic {
        Topic::parse(raw).unwrap()
    }

    fn filter(raw: &str) -> TopicFilter {
        TopicFilter::parse(raw).unwrap()
    }

    #[test]
    fn hash_at_end_matches_any_depth() {
        let f = filter("a/#");
        assert!(f.is_match(&topic("a")));
        assert!(f.is_match(&topic("a/b")));
        assert!(f.is_match(&topic("a/b/c")));
        assert!(!f.is_match(&topic("x")));
    }

    #[test]
    fn hash_not_at_end_is_rejected() {
        let err = TopicFilter::parse("a/#/b").unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::InvalidTopicFilter);
    }

    #[test]
    fn single_wildcard_matches_exactly_one_level() {
        let f = filter("a/+");
        assert!(f.is_match(&topic("a/b")));
        assert!(f.is_match(&topic("a/")));
        assert!(!f.is_match(&topic("a")));
        assert!(!f.is_match(&topic("a/b/c")));
    }

    #[test]
    fn empty_level_topics_are_distinct_from_collapsed() {
        assert_ne!(topic("a//b"), topic("a/b"));
        assert!(filter("a/+/b").is_match(&topic("a//b")));
    }
}
