//! River configuration.
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` environment
//! expansion, so credentials stay out of the file.

use crate::error::{Result, RiverError};
use crate::rule::RuleConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RiverConfig {
    /// Source database connection.
    pub mysql: MySqlConfig,

    /// Target search store connection.
    pub elastic: ElasticConfig,

    /// Batching and channel settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Position persistence settings.
    #[serde(default)]
    pub position: PositionConfig,

    /// Per-table sync rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// MySQL connection settings.
#[derive(Clone, Deserialize)]
pub struct MySqlConfig {
    #[serde(default = "default_mysql_host")]
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    #[serde(default = "default_mysql_user")]
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Replica server id; must be unique among the source's replicas.
    #[serde(default = "default_server_id")]
    pub server_id: u32,
}

impl std::fmt::Debug for MySqlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("server_id", &self.server_id)
            .finish()
    }
}

fn default_mysql_host() -> String {
    "localhost".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_mysql_user() -> String {
    "root".to_string()
}

fn default_server_id() -> u32 {
    1001
}

/// Elasticsearch connection settings.
#[derive(Clone, Deserialize)]
pub struct ElasticConfig {
    #[serde(default = "default_elastic_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for ElasticConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn default_elastic_endpoint() -> String {
    "http://localhost:9200".to_string()
}

/// Batching and channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    /// Requests per bulk batch before a flush is forced.
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,
    /// Periodic flush interval in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Sync channel capacity; sends block when full.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            bulk_size: default_bulk_size(),
            flush_interval_ms: default_flush_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_bulk_size() -> usize {
    128
}

fn default_flush_interval_ms() -> u64 {
    200
}

fn default_channel_capacity() -> usize {
    1024
}

/// Position persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionConfig {
    /// File the replication position is checkpointed to.
    #[serde(default = "default_position_file")]
    pub file: PathBuf,
    /// Binlog file to start from when no checkpoint exists.
    #[serde(default)]
    pub binlog_name: Option<String>,
    /// Binlog offset to start from when no checkpoint exists.
    #[serde(default)]
    pub binlog_pos: Option<u32>,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            file: default_position_file(),
            binlog_name: None,
            binlog_pos: None,
        }
    }
}

fn default_position_file() -> PathBuf {
    PathBuf::from("estuary.pos")
}

impl RiverConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RiverError::config(format!("read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env_vars(raw);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| RiverError::config(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parts that can fail before any connection is made.
    pub fn validate(&self) -> Result<()> {
        if self.mysql.host.is_empty() {
            return Err(RiverError::config("mysql.host must be set"));
        }
        if self.elastic.endpoint.is_empty() {
            return Err(RiverError::config("elastic.endpoint must be set"));
        }
        if self.sync.bulk_size == 0 {
            return Err(RiverError::config("sync.bulk_size must be positive"));
        }
        if self.sync.channel_capacity == 0 {
            return Err(RiverError::config("sync.channel_capacity must be positive"));
        }
        if self.rules.is_empty() {
            return Err(RiverError::config("at least one rule is required"));
        }
        for rule in &self.rules {
            if rule.schema.is_empty() || rule.table.is_empty() {
                return Err(RiverError::config(
                    "every rule needs schema and table set",
                ));
            }
        }
        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references.
fn expand_env_vars(raw: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
mysql:
  host: db.internal
  password: secret
elastic:
  endpoint: http://search.internal:9200
rules:
  - schema: app
    table: users
"#;

    #[test]
    fn test_minimal_config() {
        let config = RiverConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.mysql.host, "db.internal");
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.mysql.server_id, 1001);
        assert_eq!(config.sync.bulk_size, 128);
        assert_eq!(config.sync.flush_interval_ms, 200);
        assert_eq!(config.position.file, PathBuf::from("estuary.pos"));
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn test_rule_fields_parse() {
        let raw = r#"
mysql: {host: db}
elastic: {endpoint: "http://es:9200"}
rules:
  - schema: app
    table: posts
    index: blog
    type: post
    id: [slug]
    parent: author_id
    pipeline: enrich
    where: {published: 1}
    field:
      title: "my_title"
      tags: ",list"
    action:
      delete: ""
"#;
        let config = RiverConfig::from_yaml(raw).unwrap();
        let rule = &config.rules[0];
        assert_eq!(rule.index, "blog");
        assert_eq!(rule.doc_type, "post");
        assert_eq!(rule.parent.as_deref(), Some("author_id"));
        assert_eq!(rule.id.as_deref(), Some(&["slug".to_string()][..]));
        assert_eq!(rule.pipeline.as_deref(), Some("enrich"));
        assert_eq!(rule.field_mapping["tags"], ",list");
        assert_eq!(rule.action_mapping["delete"], "");
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("ESTUARY_TEST_HOST", "expanded.host");
        let raw = r#"
mysql:
  host: ${ESTUARY_TEST_HOST}
  password: ${ESTUARY_TEST_MISSING:-fallback}
elastic: {endpoint: "http://es:9200"}
rules:
  - {schema: app, table: users}
"#;
        let config = RiverConfig::from_yaml(raw).unwrap();
        assert_eq!(config.mysql.host, "expanded.host");
        assert_eq!(config.mysql.password.as_deref(), Some("fallback"));
    }

    #[test]
    fn test_validate_requires_rules() {
        let raw = r#"
mysql: {host: db}
elastic: {endpoint: "http://es:9200"}
rules: []
"#;
        assert!(RiverConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_bulk_size() {
        let raw = r#"
mysql: {host: db}
elastic: {endpoint: "http://es:9200"}
sync: {bulk_size: 0}
rules:
  - {schema: app, table: users}
"#;
        assert!(RiverConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = RiverConfig::from_yaml(MINIMAL).unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("secret"));
    }
}
