//! Prompt template parsing: `[variable]` placeholder scanning and
//! substitution.
//!
//! Variable names match `[A-Za-z0-9_]+`. There is no escaping syntax; a `[`
//! that does not open a complete token passes through untouched.

use std::collections::HashSet;
use std::ops::Range;

/// Insertion-ordered variable name → value mapping.
///
/// A plain vec of pairs: prompt variable counts are small, and the order
/// values were assigned in must survive into display names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    entries: Vec<(String, String)>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any existing entry in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut assignment = Assignment::new();
        for (name, value) in iter {
            assignment.set(name, value);
        }
        assignment
    }
}

/// Scan `text` for `[identifier]` tokens, calling `on_token` with the bare
/// identifier and the byte range of the whole token, brackets included.
fn scan_tokens(text: &str, mut on_token: impl FnMut(&str, Range<usize>)) {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                // Token bounds are all ASCII, so byte slicing is safe here.
                on_token(&text[i + 1..j], i..j + 1);
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
}

/// Find every variable referenced in a prompt, each exactly once, in
/// first-occurrence order.
pub fn find_variables(prompt: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    scan_tokens(prompt, |name, _| {
        if seen.insert(name.to_string()) {
            found.push(name.to_string());
        }
    });
    found
}

/// Replace every `[name]` token with its assigned value.
///
/// Tokens whose name is absent from the assignment are left untouched; that
/// literal passthrough is a deliberate fallback, not a failure.
pub fn apply_variables(prompt: &str, assignment: &Assignment) -> String {
    let mut out = String::with_capacity(prompt.len());
    let mut last = 0;
    scan_tokens(prompt, |name, range| {
        out.push_str(&prompt[last..range.start]);
        match assignment.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&prompt[range.clone()]),
        }
        last = range.end;
    });
    out.push_str(&prompt[last..]);
    out
}
