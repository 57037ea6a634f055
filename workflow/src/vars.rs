use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A `%name%` reference that no variable source could satisfy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unresolved variable \"%{0}%\"")]
pub struct UnresolvedVariable(pub String);

/// Anything that can supply a value for a variable name.
/// Names never include the surrounding `%`.
pub trait Lookup {
    fn lookup(&self, key: &str) -> Option<&str>;
}

/// Per-unit variable store. Ordered so that persisted progress files are stable.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    vars: BTreeMap<String, String>,
}

impl Variables {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set `key` to `value`, returning the previous value if there was one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.vars.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Apply assignments in order; a later assignment to the same key wins.
    pub fn merge<'a, I>(&mut self, assignments: I)
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        for (k, v) in assignments {
            self.set(k.as_str(), v.as_str());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Lookup for Variables {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.get(key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Variables {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Two lookups stacked on top of each other; `top` shadows `base`.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a, T, B> {
    pub top: &'a T,
    pub base: &'a B,
}

impl<'a, T, B> Overlay<'a, T, B> {
    pub fn new(top: &'a T, base: &'a B) -> Self {
        Self { top, base }
    }
}

impl<T: Lookup, B: Lookup> Lookup for Overlay<'_, T, B> {
    fn lookup(&self, key: &str) -> Option<&str> {
        self.top.lookup(key).or_else(|| self.base.lookup(key))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_merge_later_wins() {
        let mut vars = Variables::default();
        vars.set("a", "1");
        let assignments = vec![
            ("a".to_owned(), "2".to_owned()),
            ("b".to_owned(), "x".to_owned()),
            ("a".to_owned(), "3".to_owned()),
        ];
        vars.merge(&assignments);
        assert_eq!(Some("3"), vars.get("a"));
        assert_eq!(Some("x"), vars.get("b"));
        assert_eq!(2, vars.len());
    }

    #[test]
    fn test_overlay_shadows_base() {
        let base: Variables = [("SIPName", "unit"), ("fileName", "base")].into_iter().collect();
        let top: Variables = [("fileName", "a.txt")].into_iter().collect();
        let both = Overlay::new(&top, &base);
        assert_eq!(Some("a.txt"), both.lookup("fileName"));
        assert_eq!(Some("unit"), both.lookup("SIPName"));
        assert_eq!(None, both.lookup("missing"));
    }

    #[test]
    fn test_serializes_as_plain_map() -> anyhow::Result<()> {
        let vars: Variables = [("b", "2"), ("a", "1")].into_iter().collect();
        let text = serde_json::to_string(&vars)?;
        assert_eq!(r#"{"a":"1","b":"2"}"#, text);
        Ok(())
    }
}
