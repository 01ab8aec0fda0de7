//! Which headers are parsed during ingestion and which are deferred.

use std::collections::HashSet;

use crate::protocol::normalize_name;

/// Headers parsed eagerly when no explicit list is configured.
pub const DEFAULT_EAGER_HEADERS: &[&str] = &[
    "from",
    "to",
    "cseq",
    "call-id",
    "max-forwards",
    "via",
    "contact",
    "record-route",
    "route",
    "content-length",
    "subscription-state",
    "event",
];

/// The set of normalized header names to parse eagerly.
///
/// `content-length` is always eager, the message needs it for framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPolicy {
    eager: HashSet<String>,
}

impl HeaderPolicy {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let eager = names.into_iter().map(|name| normalize_name(name.as_ref())).filter(|name| !name.is_empty()).collect();
        Self { eager }
    }

    /// Builds the policy from a comma separated, case insensitive list.
    ///
    /// `None` means the default set, an empty string means nothing but
    /// `content-length`.
    pub fn from_config(headers_to_parse: Option<&str>) -> Self {
        match headers_to_parse {
            Some(list) => Self::new(list.split(',')),
            None => Self::default(),
        }
    }

    /// `key` must already be normalized.
    pub fn is_eager(&self, key: &str) -> bool {
        key == "content-length" || self.eager.contains(key)
    }

    /// A policy deferring every header but `content-length`.
    pub fn defer_all() -> Self {
        Self { eager: HashSet::new() }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.eager.iter().map(String::as_str)
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EAGER_HEADERS)
    }
}
