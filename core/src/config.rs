//! Run-wide configuration shared by the pipeline components.
//!
//! The top-level table is deserialized into [Config]. Each component owns a sub-table of `tools`
//! which it deserializes itself through [Config::tool_config], so this crate does not need to know
//! about every component's options.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the directory (under the output directory) holding pipeline state between runs.
pub const STATE_DIR: &str = ".modernize";

/// Top-level keys of the configuration file. Anything else is reported as unknown.
const KNOWN_KEYS: &[&str] = &[
    "input",
    "output",
    "force",
    "log_filter",
    "workers",
    "business_hints",
    "tools",
];

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Path to the Python file or directory to translate.
    pub input: PathBuf,

    /// Path to the output directory that receives the Go module tree.
    pub output: PathBuf,

    /// Ignore cached translations and convert every file again.
    #[serde(default)]
    pub force: bool,

    /// `tracing_subscriber::EnvFilter` directive used for console and log file output.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Number of files converted concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Free-form domain knowledge passed into every prompt.
    #[serde(default)]
    pub business_hints: Vec<String>,

    /// Per-component sub-tables, keyed by component name.
    #[serde(default)]
    pub tools: HashMap<String, config::Value>,
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Error)]
#[error("invalid configuration for tools.{tool}: {source}")]
pub struct ToolConfigError {
    tool: String,
    #[source]
    source: config::ConfigError,
}

impl Config {
    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config {
            input: PathBuf::new(),
            output: PathBuf::new(),
            force: false,
            log_filter: default_log_filter(),
            workers: 2,
            business_hints: vec![],
            tools: HashMap::new(),
        }
    }

    /// Directory under `output` where caches and the semantic index are persisted.
    pub fn state_dir(&self) -> PathBuf {
        state_dir(&self.output)
    }

    /// Deserializes the `tools.<name>` sub-table into `T`. A missing table yields `T::default()`.
    /// Keys not listed in `known` are reported through [unknown_field_warning].
    pub fn tool_config<T: DeserializeOwned + Default>(
        &self,
        name: &str,
        known: &[&str],
    ) -> Result<T, ToolConfigError> {
        let Some(value) = self.tools.get(name) else {
            return Ok(T::default());
        };
        if let Ok(table) = value.clone().into_table() {
            let unknown: Vec<&str> = table
                .keys()
                .map(String::as_str)
                .filter(|key| !known.contains(key))
                .collect();
            unknown_field_warning(&format!("tools.{name}"), &unknown);
        }
        T::deserialize(value.clone()).map_err(|source| ToolConfigError {
            tool: name.to_string(),
            source,
        })
    }
}

/// Returns the state directory for a given output directory.
pub fn state_dir(output: &Path) -> PathBuf {
    output.join(STATE_DIR)
}

/// Returns the top-level keys that [Config] does not recognize.
pub fn unknown_top_level_keys<'k>(keys: impl IntoIterator<Item = &'k String>) -> Vec<&'k str> {
    keys.into_iter()
        .map(String::as_str)
        .filter(|key| !KNOWN_KEYS.contains(key))
        .collect()
}

/// Prints out a warning message for every key in `unknown`.
///
/// `prefix` should be the path to the table holding the keys (e.g. `tools.semantic_index`), or
/// empty for the top level.
pub fn unknown_field_warning(prefix: &str, unknown: &[&str]) {
    let mut entries = unknown.to_vec();
    entries.sort_unstable();
    entries.into_iter().for_each(|name| match prefix {
        "" => eprintln!("Warning: unknown config key {name}"),
        p => eprintln!("Warning: unknown config key {p}.{name}"),
    });
}

/// Serializable snapshot of the settings that affect a run, embedded in the run report.
#[derive(Clone, Debug, Serialize)]
pub struct RunSettings {
    pub input: PathBuf,
    pub output: PathBuf,
    pub force: bool,
    pub workers: usize,
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> RunSettings {
        RunSettings {
            input: config.input.clone(),
            output: config.output.clone(),
            force: config.force,
            workers: config.workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        top_k: usize,
        stream: bool,
    }

    fn with_tools(toml: &str) -> Config {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .set_override("tools.sample.stream", "true")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        config
    }

    #[test]
    fn tool_config_coerces_string_overrides() {
        let config = with_tools(
            r#"
                input = "in"
                output = "out"
                [tools.sample]
                top_k = 3
            "#,
        );
        let sample: Sample = config.tool_config("sample", &["top_k", "stream"]).unwrap();
        assert_eq!(
            sample,
            Sample {
                top_k: 3,
                stream: true
            }
        );
        assert_eq!(config.workers, 4);
        assert_eq!(config.state_dir(), Path::new("out/.modernize"));
    }

    #[test]
    fn missing_tool_table_uses_defaults() {
        let sample: Sample = Config::mock().tool_config("absent", &[]).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn unknown_keys_are_detected() {
        let keys = ["input".to_string(), "colour".to_string()];
        assert_eq!(unknown_top_level_keys(&keys), ["colour"]);
    }
}
