use std::fs;
use std::path::{Path, PathBuf};

use binstream_client::{event_type_regex, Condition};
use binstream_replication::ReplicationConfig;
use clap::Parser;
use serde::Deserialize;

use crate::error::PumpError;
use crate::registry::Pipeline;

/// Command-line / environment options of the binstream server.
#[derive(Clone, Debug, Parser)]
#[command(name = "binstream", version, about = "MySQL binlog change-data-capture server")]
pub struct Options {
    /// Unique replica server id announced to the primary.
    #[arg(long, env = "BINSTREAM_SERVER_ID", default_value_t = 100)]
    pub server_id: u32,

    /// Host of the MySQL primary.
    #[arg(long, env = "BINSTREAM_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the MySQL primary.
    #[arg(long, env = "BINSTREAM_PORT", default_value_t = 3306)]
    pub port: u16,

    /// Replication user. Must hold REPLICATION SLAVE and REPLICATION CLIENT.
    #[arg(long, env = "BINSTREAM_USER", default_value = "root")]
    pub user: String,

    #[arg(long, env = "BINSTREAM_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Run under leader election, with at most one active reader across the
    /// fleet. Disables admin mutations and local pipeline persistence.
    #[arg(long, env = "BINSTREAM_HA")]
    pub ha: bool,

    /// Structured configuration file (global filter and boot-time pipelines).
    #[arg(long, env = "BINSTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// File the non-HA server persists admin-created pipelines to.
    #[arg(long, env = "BINSTREAM_PIPELINES_FILE", default_value = "pipelines.json")]
    pub pipelines_file: PathBuf,

    /// File the non-HA server persists the replication position to.
    #[arg(long, env = "BINSTREAM_POSITION_FILE", default_value = "position.json")]
    pub position_file: PathBuf,
}

impl Options {
    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            server_id: self.server_id,
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

/// Structured configuration: the global schema filter plus boot-time
/// pipelines.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PumpConfig {
    #[serde(default)]
    pub filter: GlobalFilterConfig,
    #[serde(rename = "pipeline", default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GlobalFilterConfig {
    /// Schema names must match this pattern, when set.
    #[serde(default)]
    pub include: String,
    /// Schema names matching this pattern are dropped, when set.
    #[serde(default)]
    pub exclude: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub stream: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub condition: ConditionConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConditionConfig {
    #[serde(rename = "column-changed", default)]
    pub column_changed: Vec<String>,
}

fn enabled_default() -> bool {
    true
}

impl PumpConfig {
    pub fn load(path: &Path) -> Result<PumpConfig, PumpError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl PipelineConfig {
    pub fn into_pipeline(self) -> Pipeline {
        let type_pattern = event_type_regex(&self.types);
        Pipeline {
            handler_id: None,
            schema: self.schema,
            table: self.table,
            stream: self.stream,
            type_pattern,
            types: self.types,
            enabled: self.enabled,
            condition: Condition {
                column_changed: self.condition.column_changed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_a_full_config() {
        let raw = r#"{
            "filter": {"include": "", "exclude": "^audit$"},
            "pipeline": [
                {
                    "schema": "^app$",
                    "table": "^users$",
                    "types": ["UPD", "INS"],
                    "stream": "s.users",
                    "condition": {"column-changed": ["email"]}
                }
            ]
        }"#;

        let config: PumpConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.filter.exclude, "^audit$");
        assert_eq!(config.pipelines.len(), 1);

        let pipeline = config.pipelines[0].clone().into_pipeline();
        assert_eq!(pipeline.type_pattern, "^(INS|UPD)$");
        assert_eq!(pipeline.condition.column_changed, vec!["email".to_string()]);
        assert!(pipeline.enabled);
    }

    #[test]
    fn missing_fields_default() {
        let config: PumpConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.pipelines.len(), 0);
        assert_eq!(config.filter.include, "");
    }
}
