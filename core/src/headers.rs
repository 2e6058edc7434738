//! Case-insensitive header storage with cumulative values.
//!
//! # Design
//! `HeaderTable` keeps entries in insertion order alongside a lower-cased
//! index. The casing of the first write for a name is canonical for the
//! lifetime of the table; later writes under any casing append `, <value>`
//! to the existing entry instead of replacing it. Insertion order is kept so
//! the outgoing header block is deterministic.
//!
//! The request-side policy (forbidden header names and methods) lives here
//! too, as free functions, so that the state machine and the preparation
//! step share one definition.

use std::collections::{HashMap, HashSet};

/// Header names a caller may not set on a request; the transport owns them.
pub const FORBIDDEN_REQUEST_HEADERS: &[&str] = &[
    "accept-charset",
    "accept-encoding",
    "access-control-request-headers",
    "access-control-request-method",
    "connection",
    "content-length",
    "content-transfer-encoding",
    "cookie",
    "cookie2",
    "date",
    "expect",
    "host",
    "keep-alive",
    "origin",
    "referer",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "via",
];

/// Methods `open` refuses with a security error.
pub const FORBIDDEN_METHODS: &[&str] = &["TRACE", "TRACK", "CONNECT"];

/// Response headers never reported by `get_all_response_headers`.
pub const COOKIE_RESPONSE_HEADERS: &[&str] = &["set-cookie", "set-cookie2"];

pub fn is_forbidden_header(name: &str) -> bool {
    FORBIDDEN_REQUEST_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

pub fn is_forbidden_method(method: &str) -> bool {
    FORBIDDEN_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}

/// Ordered, case-insensitive multimap collapsed to one value per name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    /// (canonical name, accumulated value) in first-set order.
    entries: Vec<(String, String)>,
    /// lower-cased name -> position in `entries`.
    index: HashMap<String, usize>,
    /// lower-cased names whose value is still a seeded default.
    defaults: HashSet<String>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` to `name`, joining with `", "` when the header already
    /// exists. The first casing seen for a name wins. A seeded default is
    /// replaced outright, casing included, by the first explicit value.
    pub fn append(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        if self.defaults.remove(&key) {
            if let Some(&pos) = self.index.get(&key) {
                self.entries[pos] = (name.to_string(), value.to_string());
                return;
            }
        }
        match self.index.get(&key) {
            Some(&pos) => {
                let existing = &mut self.entries[pos].1;
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((name.to_string(), value.to_string()));
            }
        }
    }

    /// Set `name` to exactly `value`, keeping the canonical casing if the
    /// header already exists.
    pub fn replace(&mut self, name: &str, value: &str) {
        let key = name.to_ascii_lowercase();
        self.defaults.remove(&key);
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value.to_string(),
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((name.to_string(), value.to_string()));
            }
        }
    }

    /// Set `name` only if no header of that name exists yet.
    pub fn insert_default(&mut self, name: &str, value: &str) {
        if !self.contains(name) {
            self.replace(name, value);
        }
    }

    /// Like `insert_default`, but the entry stays marked as a default until
    /// the caller sets the header explicitly.
    pub fn seed_default(&mut self, name: &str, value: &str) {
        if !self.contains(name) {
            self.replace(name, value);
            self.defaults.insert(name.to_ascii_lowercase());
        }
    }

    /// Whether `name` still holds its seeded default.
    pub fn is_default(&self, name: &str) -> bool {
        self.defaults.contains(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let key = name.to_ascii_lowercase();
        self.defaults.remove(&key);
        let pos = self.index.remove(&key)?;
        let (_, value) = self.entries.remove(pos);
        for idx in self.index.values_mut() {
            if *idx > pos {
                *idx -= 1;
            }
        }
        Some(value)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Canonical casing recorded for `name`, if set.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&pos| self.entries[pos].0.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.defaults.clear();
    }

    pub fn to_vec(&self) -> Vec<(String, String)> {
        self.entries.clone()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for HeaderTable {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut table = HeaderTable::new();
        for (name, value) in iter {
            table.append(name, value);
        }
        table
    }
}
