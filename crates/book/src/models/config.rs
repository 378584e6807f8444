use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_TITLE: &str = "Mon Livre Souvenir";

/// Caller-supplied generation options.
///
/// Passed through opaquely to the metadata record. The renderer reads the
/// well-known keys `title`, `format` and `style` when they hold strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookConfig(BTreeMap<String, Value>);
impl BookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn title(&self) -> &str {
        self.get_str("title").unwrap_or(DEFAULT_TITLE)
    }

    pub fn format(&self) -> Option<&str> {
        self.get_str("format")
    }

    pub fn style(&self) -> Option<&str> {
        self.get_str("style")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for BookConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
