//! Hierarchical settings: defaults, an optional YAML file, and dotted-key
//! overrides, merged into one tree and then deserialized into typed
//! sections.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use loadstone_types::error::WorkflowError;

/// Recognized top-level paths; anything else is rejected.
const TOP_LEVEL_SECTIONS: &[&str] = &[
    "connector",
    "driver",
    "schema",
    "batch",
    "executor",
    "codec",
    "log",
    "monitoring",
    "engine",
    "stats",
];

/// Short aliases. `{connector}` expands to the configured connector name.
const ALIASES: &[(&str, &str)] = &[
    ("url", "connector.{connector}.url"),
    ("c", "connector.name"),
    ("k", "schema.keyspace"),
    ("t", "schema.table"),
    ("m", "schema.mapping"),
    ("logDir", "log.directory"),
    ("maxErrors", "log.max_errors"),
    ("dryRun", "engine.dry_run"),
    ("maxConcurrentFiles", "connector.{connector}.max_concurrent_files"),
    ("header", "connector.{connector}.header"),
    ("delim", "connector.csv.delimiter"),
    ("cl", "driver.consistency"),
];

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitutes `${VAR}` patterns with environment variable values.
fn substitute_env_vars(input: &str) -> anyhow::Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();
    for cap in ENV_VAR_RE.captures_iter(input) {
        match std::env::var(&cap[1]) {
            Ok(val) => result = result.replace(&cap[0], &val),
            Err(_) => missing.push(cap[1].to_string()),
        }
    }
    anyhow::ensure!(
        missing.is_empty(),
        "missing environment variable(s): {}",
        missing.join(", ")
    );
    Ok(result)
}

/// The merged, validated settings tree plus its typed sections.
#[derive(Debug, Clone)]
pub struct Settings {
    pub connector: ConnectorSettings,
    pub driver: DriverSettings,
    pub schema: SchemaSettings,
    pub batch: BatchSettings,
    pub executor: ExecutorSettings,
    pub codec: CodecSettings,
    pub log: LogSettings,
    pub monitoring: MonitoringSettings,
    pub engine: EngineSettings,
    pub stats: StatsSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectorSettings {
    pub name: ConnectorName,
    pub csv: Value,
    pub json: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorName {
    #[default]
    Csv,
    Json,
}

impl ConnectorName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorName::Csv => "csv",
            ConnectorName::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverSettings {
    pub hosts: Vec<String>,
    pub port: u16,
    pub consistency: String,
    pub page_size: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1".to_string()],
            port: 9042,
            consistency: "LOCAL_QUORUM".to_string(),
            page_size: 5_000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemaSettings {
    pub keyspace: Option<String>,
    pub table: Option<String>,
    pub mapping: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    pub mode: String,
    pub max_batch_statements: usize,
    pub max_size_in_bytes: i64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            mode: "PARTITION_KEY".to_string(),
            max_batch_statements: 32,
            max_size_in_bytes: -1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSettings {
    pub max_in_flight_requests: i64,
    pub max_in_flight_queries: i64,
    pub max_requests_per_second: i64,
    pub continuous_paging: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_in_flight_requests: 1_000,
            max_in_flight_queries: 200,
            max_requests_per_second: -1,
            continuous_paging: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecSettings {
    pub locale: String,
    pub time_zone: String,
    pub null_strings: Vec<String>,
    pub boolean_strings: Vec<String>,
    pub boolean_numbers: [f64; 2],
    pub number: String,
    pub format_numbers: bool,
    pub overflow_strategy: String,
    pub rounding: String,
    pub timestamp: String,
    pub date: String,
    pub time: String,
    pub unit: String,
    pub epoch: String,
    pub uuid_strategy: String,
    pub allow_extra_fields: bool,
    pub allow_missing_fields: bool,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            time_zone: "+00:00".to_string(),
            null_strings: Vec::new(),
            boolean_strings: Vec::new(),
            boolean_numbers: [1.0, 0.0],
            number: "#,###.##".to_string(),
            format_numbers: false,
            overflow_strategy: "REJECT".to_string(),
            rounding: "HALF_EVEN".to_string(),
            timestamp: "CQL_TIMESTAMP".to_string(),
            date: "ISO_LOCAL_DATE".to_string(),
            time: "ISO_LOCAL_TIME".to_string(),
            unit: "MILLISECONDS".to_string(),
            epoch: "1970-01-01T00:00:00Z".to_string(),
            uuid_strategy: "RANDOM".to_string(),
            allow_extra_fields: false,
            allow_missing_fields: false,
        }
    }
}

/// Accepts both `100` and `"1%"` forms.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a number or string, got: {other}"
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub directory: String,
    #[serde(deserialize_with = "string_or_number")]
    pub max_errors: String,
    pub max_held_positions: usize,
    pub stack_trace_depth: usize,
    pub frame_filter_prefixes: Vec<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: "./logs".to_string(),
            max_errors: "100".to_string(),
            max_held_positions: 10_000,
            stack_trace_depth: 2,
            frame_filter_prefixes: vec!["tokio::".to_string(), "loadstone_executor::".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitoringSettings {
    pub report_rate_seconds: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            report_rate_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub dry_run: bool,
    pub execution_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatsSettings {
    pub modes: Vec<String>,
    pub num_partitions: usize,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            modes: vec!["global".to_string()],
            num_partitions: 10,
        }
    }
}

impl Settings {
    /// Merges the optional settings file and the dotted-key overrides,
    /// then deserializes every section. Unknown top-level paths and
    /// unknown keys inside typed sections are configuration errors.
    pub fn load(
        file: Option<&Path>,
        overrides: &[(String, String)],
    ) -> Result<Settings, WorkflowError> {
        Self::build(file, overrides).map_err(|e| WorkflowError::Config(format!("{e:#}")))
    }

    fn build(file: Option<&Path>, overrides: &[(String, String)]) -> anyhow::Result<Settings> {
        let mut tree = match file {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read settings file {}", path.display()))?;
                let substituted = substitute_env_vars(&raw)?;
                let yaml: serde_yaml::Value = serde_yaml::from_str(&substituted)
                    .context("settings file is not valid YAML")?;
                serde_json::to_value(yaml).context("settings file is not a mapping")?
            }
            None => Value::Object(serde_json::Map::new()),
        };
        if tree.is_null() {
            tree = Value::Object(serde_json::Map::new());
        }
        anyhow::ensure!(tree.is_object(), "settings root must be a mapping");

        // The connector name decides what `{connector}` aliases expand
        // to; look for it before expanding.
        let connector_name = overrides
            .iter()
            .rev()
            .find(|(k, _)| k == "connector.name" || k == "c")
            .map(|(_, v)| v.clone())
            .or_else(|| {
                tree.pointer("/connector/name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "csv".to_string());

        for (key, raw_value) in overrides {
            let path = resolve_alias(key, &connector_name);
            let value = parse_scalar(raw_value)?;
            set_path(&mut tree, &path, value)
                .with_context(|| format!("cannot apply setting {key}"))?;
        }

        let root = tree.as_object().expect("checked above");
        for key in root.keys() {
            anyhow::ensure!(
                TOP_LEVEL_SECTIONS.contains(&key.as_str()),
                "unknown settings path: {key}"
            );
        }

        fn section<T: Default + serde::de::DeserializeOwned>(
            tree: &Value,
            name: &str,
        ) -> anyhow::Result<T> {
            match tree.get(name) {
                None | Some(Value::Null) => Ok(T::default()),
                Some(value) => serde_json::from_value(value.clone())
                    .with_context(|| format!("invalid '{name}' settings")),
            }
        }

        Ok(Settings {
            connector: section(&tree, "connector")?,
            driver: section(&tree, "driver")?,
            schema: section(&tree, "schema")?,
            batch: section(&tree, "batch")?,
            executor: section(&tree, "executor")?,
            codec: section(&tree, "codec")?,
            log: section(&tree, "log")?,
            monitoring: section(&tree, "monitoring")?,
            engine: section(&tree, "engine")?,
            stats: section(&tree, "stats")?,
        })
    }

    /// The active connector's own settings subtree.
    pub fn connector_subtree(&self) -> &Value {
        match self.connector.name {
            ConnectorName::Csv => &self.connector.csv,
            ConnectorName::Json => &self.connector.json,
        }
    }

    pub fn log_directory(&self) -> PathBuf {
        PathBuf::from(&self.log.directory)
    }
}

fn resolve_alias(key: &str, connector_name: &str) -> String {
    for (alias, target) in ALIASES {
        if key == *alias {
            return target.replace("{connector}", connector_name);
        }
    }
    key.to_string()
}

/// Parses an override value with YAML scalar rules, so `true`, `42`, and
/// `[a, b]` come out typed and everything else stays a string.
fn parse_scalar(raw: &str) -> anyhow::Result<Value> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(raw).unwrap_or(serde_yaml::Value::String(raw.to_string()));
    serde_json::to_value(yaml).context("unrepresentable settings value")
}

fn set_path(tree: &mut Value, path: &str, value: Value) -> anyhow::Result<()> {
    let mut node = tree;
    let segments: Vec<&str> = path.split('.').collect();
    anyhow::ensure!(!segments.is_empty(), "empty settings path");
    for segment in &segments[..segments.len() - 1] {
        anyhow::ensure!(!segment.is_empty(), "empty segment in path {path}");
        let object = node
            .as_object_mut()
            .with_context(|| format!("{path} conflicts with a scalar setting"))?;
        node = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !node.is_object() {
            *node = Value::Object(serde_json::Map::new());
        }
    }
    let last = segments[segments.len() - 1];
    let object = node
        .as_object_mut()
        .with_context(|| format!("{path} conflicts with a scalar setting"))?;
    object.insert(last.to_string(), value);
    Ok(())
}
