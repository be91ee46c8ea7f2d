//! Startup configuration document.
//!
//! The core never reads this from disk itself — parsing a config file is an
//! external collaborator's job (see crate-level docs). What lives here is
//! the typed shape the core expects to receive already parsed, plus
//! convenience (de)serialisation helpers so an embedder doesn't have to
//! hand-roll them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Memory,
    Sqlite,
    Postgres,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Memory
    }
}

fn default_memory_soft_cap() -> u64 {
    5_000_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    #[serde(default = "default_memory_soft_cap")]
    pub soft_record_cap: u64,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            soft_record_cap: default_memory_soft_cap(),
        }
    }
}

fn default_dump_interval() -> Duration {
    Duration::from_secs(180)
}

fn serialize_duration_secs<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

fn deserialize_duration_secs<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> Result<Duration, D::Error> {
    let secs = u64::deserialize(d)?;
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteStorageConfig {
    #[serde(
        default = "default_dump_interval",
        serialize_with = "serialize_duration_secs",
        deserialize_with = "deserialize_duration_secs"
    )]
    pub dump_interval: Duration,
    pub addon_dir: PathBuf,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            dump_interval: default_dump_interval(),
            addon_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConnectionConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type", default)]
    pub storage_type: StorageType,
    #[serde(default)]
    pub memory: MemoryStorageConfig,
    #[serde(default)]
    pub sqlite: SqliteStorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub database: DatabaseConnectionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub telemetry_enabled: bool,
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./logs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            logs_dir: default_logs_dir(),
            storage: StorageConfig::default(),
            database: DatabaseConnectionConfig::default(),
            api: ApiConfig::default(),
            telemetry_enabled: false,
        }
    }
}

impl Config {
    /// Validates cross-field constraints that serde's defaults cannot
    /// express. Collects every violation rather than bailing on the
    /// first, so a caller gets one actionable error report.
    pub fn validate(&self) -> Result<(), IngestError> {
        let mut problems = Vec::new();

        if matches!(self.storage.storage_type, StorageType::Postgres)
            && self.database.host.is_empty()
        {
            problems.push("storage.type is postgres but database.host is empty".to_string());
        }
        if matches!(self.storage.storage_type, StorageType::Postgres)
            && self.database.database.is_empty()
        {
            problems.push("storage.type is postgres but database.database is empty".to_string());
        }
        if matches!(self.storage.storage_type, StorageType::Sqlite)
            && !self.storage.sqlite.addon_dir.as_os_str().is_empty()
            && self.storage.sqlite.dump_interval.is_zero()
        {
            problems.push("storage.sqlite.dumpInterval must be non-zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(IngestError::ConfigError(problems.join("; ")))
        }
    }

    pub fn from_json(s: &str) -> Result<Self, IngestError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String, IngestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml(s: &str) -> Result<Self, IngestError> {
        let cfg: Self =
            toml::from_str(s).map_err(|e| IngestError::ConfigError(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[cfg(feature = "toml-config")]
    pub fn to_toml(&self) -> Result<String, IngestError> {
        toml::to_string_pretty(self).map_err(|e| IngestError::ConfigError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.storage.storage_type, StorageType::Memory);
        assert_eq!(cfg.storage.memory.soft_record_cap, 5_000_000);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = Config::from_json(r#"{"unknownField": 42}"#).unwrap();
        assert_eq!(cfg.log_level, LogLevel::Info);
    }

    #[test]
    fn postgres_without_host_fails_validation() {
        let json = r#"{"storage": {"type": "postgres"}}"#;
        let err = Config::from_json(json).unwrap_err();
        match err {
            IngestError::ConfigError(msg) => assert!(msg.contains("database.host")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = Config::default();
        let s = cfg.to_json().unwrap();
        let back = Config::from_json(&s).unwrap();
        assert_eq!(cfg.log_level, back.log_level);
    }
}
