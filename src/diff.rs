//! Order-insensitive structural diff over JSON-style values.
//!
//! Two values are considered equal when they are structurally identical after
//! treating every sequence as an unordered multiset, recursively at every
//! nesting level. The diff reports the full set of reconciliation steps from
//! the expected value to the actual one instead of stopping at the first
//! mismatch.

use serde_json::Value;
use std::fmt;

/// One reconciliation step between an expected and an actual value.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffEntry {
    /// Same kind on both sides, different scalar value.
    ValueChanged {
        path: String,
        expected: Value,
        actual: Value,
    },
    /// Node kind differs (e.g. mapping on one side, sequence on the other).
    KindChanged {
        path: String,
        expected: Value,
        actual: Value,
    },
    /// Mapping key present in expected, absent from actual.
    KeyRemoved { path: String, value: Value },
    /// Mapping key present in actual, absent from expected.
    KeyAdded { path: String, value: Value },
    /// Sequence element in expected with no equal counterpart in actual.
    /// The path names the sequence; element order carries no meaning.
    ItemRemoved { path: String, value: Value },
    /// Sequence element in actual with no equal counterpart in expected.
    ItemAdded { path: String, value: Value },
}

impl DiffEntry {
    pub fn path(&self) -> &str {
        match self {
            DiffEntry::ValueChanged { path, .. }
            | DiffEntry::KindChanged { path, .. }
            | DiffEntry::KeyRemoved { path, .. }
            | DiffEntry::KeyAdded { path, .. }
            | DiffEntry::ItemRemoved { path, .. }
            | DiffEntry::ItemAdded { path, .. } => path,
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() { "root" } else { path }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffEntry::ValueChanged {
                path,
                expected,
                actual,
            } => write!(
                f,
                "value changed at {}: expected {expected}, got {actual}",
                display_path(path)
            ),
            DiffEntry::KindChanged {
                path,
                expected,
                actual,
            } => write!(
                f,
                "kind changed at {}: expected {}, got {}",
                display_path(path),
                kind(expected),
                kind(actual)
            ),
            DiffEntry::KeyRemoved { path, value } => {
                write!(f, "missing key {}: expected {value}", display_path(path))
            }
            DiffEntry::KeyAdded { path, value } => {
                write!(f, "unexpected key {}: got {value}", display_path(path))
            }
            DiffEntry::ItemRemoved { path, value } => {
                write!(f, "missing item in {}: {value}", display_path(path))
            }
            DiffEntry::ItemAdded { path, value } => {
                write!(f, "unexpected item in {}: {value}", display_path(path))
            }
        }
    }
}

/// Accumulated reconciliation steps; empty means the values are equal under
/// unordered comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueDiff {
    pub entries: Vec<DiffEntry>,
}

impl ValueDiff {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn push(&mut self, entry: DiffEntry) {
        self.entries.push(entry);
    }
}

impl fmt::Display for ValueDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.entries {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{entry}")?;
            first = false;
        }
        Ok(())
    }
}

/// Computes the order-insensitive difference between two values.
pub fn diff(expected: &Value, actual: &Value) -> ValueDiff {
    let mut out = ValueDiff::default();
    diff_at("", expected, actual, &mut out);
    out
}

/// Equality under the same rules `diff` uses, without building entries.
pub fn unordered_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            e.len() == a.len()
                && e.iter()
                    .all(|(key, ev)| a.get(key).is_some_and(|av| unordered_eq(ev, av)))
        }
        (Value::Array(e), Value::Array(a)) => {
            if e.len() != a.len() {
                return false;
            }
            let mut used = vec![false; a.len()];
            e.iter().all(|item| {
                match a
                    .iter()
                    .enumerate()
                    .find(|(idx, cand)| !used[*idx] && unordered_eq(item, cand))
                {
                    Some((idx, _)) => {
                        used[idx] = true;
                        true
                    }
                    None => false,
                }
            })
        }
        _ => expected == actual,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn child(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn diff_at(path: &str, expected: &Value, actual: &Value, out: &mut ValueDiff) {
    match (expected, actual) {
        (Value::Object(e), Value::Object(a)) => {
            for (key, ev) in e {
                match a.get(key) {
                    Some(av) => diff_at(&child(path, key), ev, av, out),
                    None => out.push(DiffEntry::KeyRemoved {
                        path: child(path, key),
                        value: ev.clone(),
                    }),
                }
            }
            for (key, av) in a {
                if !e.contains_key(key) {
                    out.push(DiffEntry::KeyAdded {
                        path: child(path, key),
                        value: av.clone(),
                    });
                }
            }
        }
        (Value::Array(e), Value::Array(a)) => diff_sequences(path, e, a, out),
        _ if kind(expected) != kind(actual) => out.push(DiffEntry::KindChanged {
            path: path.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }),
        _ => {
            if expected != actual {
                out.push(DiffEntry::ValueChanged {
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }
}

// Greedy multiset matching. Pairing an expected element with any equal unused
// actual element is safe: equality is transitive, so a different pairing can
// never unlock a strictly better match elsewhere.
fn diff_sequences(path: &str, expected: &[Value], actual: &[Value], out: &mut ValueDiff) {
    let mut used = vec![false; actual.len()];
    for item in expected {
        match actual
            .iter()
            .enumerate()
            .find(|(idx, cand)| !used[*idx] && unordered_eq(item, cand))
        {
            Some((idx, _)) => used[idx] = true,
            None => out.push(DiffEntry::ItemRemoved {
                path: path.to_string(),
                value: item.clone(),
            }),
        }
    }
    for (idx, cand) in actual.iter().enumerate() {
        if !used[idx] {
            out.push(DiffEntry::ItemAdded {
                path: path.to_string(),
                value: cand.clone(),
            });
        }
    }
}
