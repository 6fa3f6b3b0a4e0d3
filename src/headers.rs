//! Insertion-ordered, case-insensitive HTTP header map.
//!
//! Emission order matches insertion order. Multi-valued request headers are
//! repeated entries; duplicate response headers are joined with `, ` as they
//! are parsed.

use std::fmt;

/// An ordered multimap of header names to values.
///
/// Lookups are case-insensitive; the original spelling of names is preserved
/// for emission.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set `name` to a single value, replacing any existing entries.
    ///
    /// The first existing entry's position is kept; later duplicates are
    /// dropped. A new name appends at the end.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let mut slot = None;
        self.entries.retain_mut(|(existing, existing_value)| {
            if existing.eq_ignore_ascii_case(&name) {
                if slot.is_none() {
                    *existing_value = value.clone();
                    slot = Some(());
                    true
                } else {
                    false
                }
            } else {
                true
            }
        });
        if slot.is_none() {
            self.entries.push((name, value));
        }
    }

    /// Append an entry, keeping any existing entries for the same name.
    /// Repeated entries are emitted as repeated header lines.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Response-side insertion: a duplicate name joins onto the existing
    /// value with `, `, preserving insertion order.
    pub(crate) fn append_joined(&mut self, name: &str, value: &str) {
        for (existing, existing_value) in &mut self.entries {
            if existing.eq_ignore_ascii_case(name) {
                existing_value.push_str(", ");
                existing_value.push_str(value);
                return;
            }
        }
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// First value for `name`, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// Whether any entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every entry for `name`.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Produce a new map with `overrides` overlaid on top of `self`.
    ///
    /// Each name present in `overrides` replaces all of that name's entries
    /// in the result; neither input is mutated.
    pub(crate) fn merge_over(&self, overrides: &Headers) -> Headers {
        let mut merged = self.clone();
        for (name, _) in &overrides.entries {
            merged.remove(name);
        }
        merged.entries.extend(overrides.entries.iter().cloned());
        merged
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> From<&'a [(&'a str, &'a str)]> for Headers {
    fn from(pairs: &'a [(&'a str, &'a str)]) -> Self {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}

fn is_sensitive(name: &str) -> bool {
    name.eq_ignore_ascii_case("authorization") || name.eq_ignore_ascii_case("proxy-authorization")
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.entries {
            if is_sensitive(name) {
                map.entry(name, &"REDACTED");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}
