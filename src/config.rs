use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use crate::{template::BlockKind, value::Value, Error, InternalResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fallback configuration per `kind.plugin`, used when the template has none.
    #[serde(default)]
    pub plugin_defaults: HashMap<String, Value>,

    /// Capacity of the data fan-in channel; `0` sizes it to the number of data blocks.
    #[serde(default = "default_data_channel_capacity")]
    pub data_channel_capacity: usize,

    /// Require `depends_on` targets to be declared before their dependants.
    #[serde(default)]
    pub strict_dependency_order: bool,

    /// Tags applied when a render call passes none.
    #[serde(default)]
    pub default_required_tags: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plugin_defaults: HashMap::new(),
            data_channel_capacity: default_data_channel_capacity(),
            strict_dependency_order: false,
            default_required_tags: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to open config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
        Ok(config)
    }

    pub fn from_json_str(s: &str) -> InternalResult<Self> {
        let config = serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    pub fn plugin_default(&self, kind: BlockKind, plugin: &str) -> Option<&Value> {
        self.plugin_defaults.get(&format!("{}.{}", kind, plugin))
    }

    pub fn with_plugin_default(
        mut self,
        kind: BlockKind,
        plugin: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.plugin_defaults
            .insert(format!("{}.{}", kind, plugin), value.into());
        self
    }
}

fn default_data_channel_capacity() -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config.data_channel_capacity, 0);
        assert!(!config.strict_dependency_order);
        assert!(config.default_required_tags.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"plugin_defaults": {{"content.text": {{"format": "md"}}}}, "strict_dependency_order": true}}"#
        )
        .unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert!(config.strict_dependency_order);
        assert_eq!(
            config
                .plugin_default(BlockKind::Content, "text")
                .and_then(|v| v.get("format"))
                .and_then(Value::as_str),
            Some("md")
        );
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = EngineConfig::from_json_str("{\"data_channel_capacity\": \"many\"}").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
