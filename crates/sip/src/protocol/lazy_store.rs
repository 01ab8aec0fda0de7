//! Deferred headers kept as raw text until someone asks for them.

use parking_lot::Mutex;

use crate::codec::header::HeaderParser;
use crate::protocol::{Header, ParseError};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    name: String,
    raw: String,
}

/// Raw header lines keyed by lowercase name, in insertion order.
///
/// Each entry holds one or more complete header lines, every one of them
/// terminated by exactly one CRLF, so the whole entry can be written to the
/// wire as is.
#[derive(Debug, Default)]
pub struct LazyHeaderStore {
    entries: Mutex<Vec<Entry>>,
}

impl LazyHeaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `raw` under `name`, replacing any previous entry in place.
    pub fn put(&self, name: &str, raw: &str) {
        let raw = terminate(raw);
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.raw = raw,
            None => entries.push(Entry { name: name.to_owned(), raw }),
        }
    }

    /// Adds another line to the entry for `name`, creating it when missing.
    pub fn append(&self, name: &str, raw: &str) {
        let raw = terminate(raw);
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.raw.push_str(&raw),
            None => entries.push(Entry { name: name.to_owned(), raw }),
        }
    }

    pub fn get_raw(&self, name: &str) -> Option<String> {
        self.entries.lock().iter().find(|entry| entry.name == name).map(|entry| entry.raw.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().iter().any(|entry| entry.name == name)
    }

    /// Removes the entry and parses each of its lines.
    ///
    /// The entry leaves the store under the lock before parsing starts, so
    /// when several callers race on the same name only one of them sees the
    /// raw text. A parse failure does not put the entry back.
    pub fn take_and_parse(&self, name: &str, parser: &dyn HeaderParser) -> Result<Option<Vec<Header>>, ParseError> {
        let Some(raw) = self.remove(name) else {
            return Ok(None);
        };

        raw.split("\r\n")
            .filter(|line| !line.is_empty())
            .map(|line| parser.parse(line).map_err(|e| ParseError::invalid_promoted_header(name, e)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn remove(&self, name: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|entry| entry.name == name)?;
        Some(entries.remove(index).raw)
    }

    pub fn all_values(&self) -> Vec<String> {
        self.entries.lock().iter().map(|entry| entry.raw.clone()).collect()
    }

    pub fn all_names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Writes every entry in insertion order.
    pub(crate) fn encode(&self, dst: &mut String) {
        for entry in self.entries.lock().iter() {
            dst.push_str(&entry.raw);
        }
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Clone for LazyHeaderStore {
    fn clone(&self) -> Self {
        Self { entries: Mutex::new(self.entries.lock().clone()) }
    }
}

fn terminate(raw: &str) -> String {
    let mut line = raw.trim_end_matches(['\r', '\n']).to_owned();
    line.push_str("\r\n");
    line
}
