//! Target platform descriptor (OS, device, SDK version...).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-keyed platform descriptor, e.g. `{"os": "iOS", "version": "17.0"}`.
///
/// Keys are kept sorted so every rendering is stable for identical input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Platform(BTreeMap<String, Value>);

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short label: the values in key order, space separated (`iOS 17.0`).
    pub fn label(&self) -> String {
        self.0
            .values()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// `key=value` pairs joined with commas, the shape `xcodebuild -destination` takes.
    pub fn destination(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={}", render_value(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Read a platform back from a JSON column. Non-object values yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_in_key_order() {
        let platform = Platform::new().with("version", "17.0").with("os", "iOS");
        assert_eq!(platform.label(), "iOS 17.0");
        assert_eq!(platform.destination(), "os=iOS,version=17.0");
    }

    #[test]
    fn non_string_values_render_as_json() {
        let platform = Platform::new().with("arch", "arm64").with("simulator", true);
        assert_eq!(platform.destination(), "arch=arm64,simulator=true");
    }

    #[test]
    fn json_column_round_trip_rejects_non_objects() {
        let platform = Platform::new().with("os", "iOS");
        assert_eq!(Platform::from_json(&platform.to_json()), Some(platform));
        assert_eq!(Platform::from_json(&Value::String("iOS".into())), None);
    }
}
