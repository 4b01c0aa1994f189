use std::collections::BTreeMap;
use std::sync::Arc;

/// A setting value, or `None` meaning "reset to default".
pub type SettingValue = Option<Arc<str>>;

/// Immutable, copy-on-write keyed mapping of session settings. Snapshots taken
/// for the savepoint stack are cheap `Arc` clones and are never mutated in
/// place: every change goes through `mutate()` → `finish()`, which hands back
/// a fresh `Settings` sharing unmodified entries with the original.
#[derive(Clone, Default, Debug, Eq, PartialEq)]
pub struct Settings {
    map: Arc<BTreeMap<String, SettingValue>>,
}

impl Settings {
    pub fn new() -> Self {
        Self { map: Arc::new(BTreeMap::new()) }
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Stable identity of the underlying map, for cheap change detection
    /// (e.g. caching a serialized form until the map is replaced).
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.map) as usize
    }

    /// Begins a mutation: clones the current map so in-progress edits are not
    /// visible until `finish()` replaces `self`.
    pub fn mutate(&self) -> SettingsMutation {
        SettingsMutation { base: (*self.map).clone() }
    }

    /// True if `self`'s keys/values are a superset of `other`'s.
    pub fn is_superset_of(&self, other: &Settings) -> bool {
        other.map.iter().all(|(k, v)| self.map.get(k) == Some(v))
    }
}

pub struct SettingsMutation {
    base: BTreeMap<String, SettingValue>,
}

impl SettingsMutation {
    /// Sets `key` to `value`, or resets it to default if `value` is `None`.
    pub fn set(mut self, key: &str, value: SettingValue) -> Self {
        match value {
            Some(v) => { self.base.insert(key.to_string(), Some(v)); }
            None => { self.base.remove(key); }
        }
        self
    }

    /// RESET ALL: drop every setting in this mutation.
    pub fn reset_all(mut self) -> Self {
        self.base.clear();
        self
    }

    pub fn finish(self) -> Settings {
        Settings { map: Arc::new(self.base) }
    }
}

/// Parses `global <module>::<name>` keys used by frontend-only settings that
/// back `ParamRemap`'s hidden global arguments.
pub fn parse_global_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix("global ")?;
    let (module, name) = rest.split_once("::")?;
    Some((module, name))
}

/// Interprets a setting value the way `is_setting_truthy` does for frontend
/// booleans: case-insensitive prefixes of on/true/yes/1 → true, off/false/no/0
/// → false, the single letter `o` is ambiguous and yields `None`.
pub fn is_setting_truthy(value: &str) -> Option<bool> {
    let lower = value.to_ascii_lowercase();
    if lower == "o" {
        return None;
    }
    for word in ["on", "true", "yes", "1"] {
        if word.starts_with(&lower) && !lower.is_empty() {
            return Some(true);
        }
    }
    for word in ["off", "false", "no", "0"] {
        if word.starts_with(&lower) && !lower.is_empty() {
            return Some(false);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutate_does_not_alias_original() {
        let s1 = Settings::new();
        let s2 = s1.mutate().set("x", Some(Arc::from("1"))).finish();
        assert!(!s1.contains("x"));
        assert!(s2.contains("x"));
    }

    #[test]
    fn superset_invariant() {
        let base = Settings::new().mutate().set("x", Some(Arc::from("1"))).finish();
        let local = base.mutate().set("y", Some(Arc::from("2"))).finish();
        assert!(local.is_superset_of(&base));
        assert!(!base.is_superset_of(&local));
    }

    #[test]
    fn truthy_prefixes() {
        assert_eq!(is_setting_truthy("on"), Some(true));
        assert_eq!(is_setting_truthy("y"), Some(true));
        assert_eq!(is_setting_truthy("off"), Some(false));
        assert_eq!(is_setting_truthy("n"), Some(false));
        assert_eq!(is_setting_truthy("o"), None);
    }
}
