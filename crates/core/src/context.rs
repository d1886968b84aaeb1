//! Per-run context store and variable interpolation.
//!
//! Values are written once per key and never replaced. String arguments are
//! resolved against the store with three rules, tried in order:
//!
//! 1. whole value: `list_all` yields the entire output of `list_all`
//! 2. keyed access: `categorize['imgs']`, `categorize["imgs"]` or `rows[0]`
//! 3. substitution: every known key occurring as a whole identifier token
//!    inside the string is replaced by its value (`base_dir/Images`)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Append-only store of step and iteration outputs for one run.
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    entries: Arc<DashMap<String, Value>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value. Writing an existing key is an error.
    pub fn put(&self, key: impl Into<String>, value: Value) -> Result<()> {
        match self.entries.entry(key.into()) {
            Entry::Occupied(e) => Err(Error::ContextKeyExists(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(value);
                Ok(())
            }
        }
    }

    /// Fetch a value by key.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.entries
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| Error::ContextKeyNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted list of keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort_unstable();
        keys
    }

    /// Copy of every entry.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Resolve one expression against the store.
    pub fn resolve(&self, expr: &str) -> Result<Value> {
        let trimmed = expr.trim();
        if let Some(value) = self.entries.get(trimmed) {
            return Ok(value.value().clone());
        }

        if let Some((name, key)) = parse_keyed_access(trimmed) {
            let base = self.get(name).map_err(|_| {
                Error::dependency(format!("'{}' is not available in context", name))
            })?;
            return lookup(&base, &key).ok_or_else(|| {
                Error::dependency(format!("'{}' has no entry {}", name, key))
            });
        }

        Ok(Value::String(self.substitute(expr)))
    }

    /// Resolve every string inside a value, recursing through arrays and objects.
    pub fn resolve_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.resolve(s),
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve each argument of a step.
    pub fn resolve_args(&self, args: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut out = Map::with_capacity(args.len());
        for (k, v) in args {
            out.insert(k.clone(), self.resolve_value(v)?);
        }
        Ok(out)
    }

    fn substitute(&self, text: &str) -> String {
        let mut keys = self.keys();
        keys.retain(|k| !k.is_empty() && text.contains(k.as_str()));
        if keys.is_empty() {
            return text.to_string();
        }
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        'scan: while i < text.len() {
            let rest = &text[i..];
            let before_ok = text[..i].chars().next_back().map_or(true, |c| !is_ident_char(c));
            if before_ok {
                for key in &keys {
                    if !rest.starts_with(key.as_str()) {
                        continue;
                    }
                    let after_ok = rest[key.len()..]
                        .chars()
                        .next()
                        .map_or(true, |c| !is_ident_char(c));
                    if !after_ok {
                        continue;
                    }
                    if let Some(value) = self.entries.get(key.as_str()) {
                        out.push_str(&value_to_text(value.value()));
                        i += key.len();
                        continue 'scan;
                    }
                }
            }
            // Not a key here; copy one char.
            let ch = rest.chars().next().unwrap_or_default();
            out.push(ch);
            i += ch.len_utf8().max(1);
        }
        out
    }
}

/// Key inside a bracketed access expression.
#[derive(Debug, Clone, PartialEq)]
enum AccessKey {
    Name(String),
    Index(usize),
}

impl std::fmt::Display for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(n) => write!(f, "['{}']", n),
            Self::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// Parse `ident['key']`, `ident["key"]` or `ident[3]`.
fn parse_keyed_access(expr: &str) -> Option<(&str, AccessKey)> {
    let open = expr.find('[')?;
    let inner = expr[open + 1..].strip_suffix(']')?;
    let name = &expr[..open];

    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') || !chars.all(is_ident_char) {
        return None;
    }

    let key = if let Some(q) = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
    {
        AccessKey::Name(q.to_string())
    } else if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
        AccessKey::Index(inner.parse().ok()?)
    } else {
        return None;
    };
    Some((name, key))
}

fn lookup(base: &Value, key: &AccessKey) -> Option<Value> {
    match (base, key) {
        (Value::Object(map), AccessKey::Name(k)) => map.get(k).cloned(),
        (Value::Object(map), AccessKey::Index(i)) => map.get(&i.to_string()).cloned(),
        (Value::Array(items), AccessKey::Index(i)) => items.get(*i).cloned(),
        _ => None,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Strings are inserted raw, everything else as compact JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ContextStore {
        let store = ContextStore::new();
        store.put("list_all", json!([{"name": "a.jpg"}])).unwrap();
        store.put("categorize", json!({"imgs": ["a.jpg"]})).unwrap();
        store.put("base_dir", json!("/home/u/Downloads")).unwrap();
        store
    }

    #[test]
    fn test_put_is_monotonic() {
        let store = ContextStore::new();
        store.put("a", json!(1)).unwrap();
        let err = store.put("a", json!(2)).unwrap_err();
        assert!(matches!(err, Error::ContextKeyExists(ref k) if k == "a"));
        assert_eq!(store.get("a").unwrap(), json!(1));
        assert!(matches!(store.get("b"), Err(Error::ContextKeyNotFound(_))));
    }

    #[test]
    fn test_resolve_whole_value() {
        assert_eq!(store().resolve("list_all").unwrap(), json!([{"name": "a.jpg"}]));
    }

    #[test]
    fn test_resolve_keyed_access() {
        let store = store();
        assert_eq!(store.resolve("categorize['imgs']").unwrap(), json!(["a.jpg"]));
        assert_eq!(store.resolve("categorize[\"imgs\"]").unwrap(), json!(["a.jpg"]));
        assert_eq!(store.resolve("list_all[0]").unwrap(), json!({"name": "a.jpg"}));
    }

    #[test]
    fn test_keyed_access_failures_are_dependency_errors() {
        let store = store();
        assert!(matches!(
            store.resolve("missing['imgs']"),
            Err(Error::Dependency(_))
        ));
        assert!(matches!(
            store.resolve("categorize['pdfs']"),
            Err(Error::Dependency(_))
        ));
    }

    #[test]
    fn test_resolve_substring() {
        assert_eq!(
            store().resolve("base_dir/Images").unwrap(),
            json!("/home/u/Downloads/Images")
        );
    }

    #[test]
    fn test_substring_respects_token_boundaries() {
        let store = ContextStore::new();
        store.put("dir", json!("/tmp")).unwrap();
        store.put("dir_name", json!("photos")).unwrap();
        assert_eq!(store.resolve("dir/dir_name").unwrap(), json!("/tmp/photos"));
        assert_eq!(store.resolve("redirect").unwrap(), json!("redirect"));
        assert_eq!(store.resolve("plain text").unwrap(), json!("plain text"));
    }

    #[test]
    fn test_resolve_value_recurses() {
        let store = store();
        let args = json!({"files": "categorize['imgs']", "dest": ["base_dir/Images"], "n": 3});
        let resolved = store.resolve_value(&args).unwrap();
        assert_eq!(
            resolved,
            json!({"files": ["a.jpg"], "dest": ["/home/u/Downloads/Images"], "n": 3})
        );
    }

    #[test]
    fn test_clones_share_entries() {
        let store = ContextStore::new();
        let handle = store.clone();
        handle.put("x", json!(true)).unwrap();
        assert!(store.contains("x"));
        assert_eq!(store.snapshot().len(), 1);
    }
}
