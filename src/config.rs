#![forbid(unsafe_code)]

//! Runtime configuration shared by the backend and CLI binaries.
//!
//! Values resolve in three layers: explicit overrides (CLI flags) win over
//! process environment variables, which win over the optional `.env` file.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DATABASE_PATH: &str = "channel-mirror.db";
pub const DEFAULT_DOWNLOADS_PATH: &str = "downloads";
pub const DEFAULT_MIRROR_PORT: u16 = 3001;
pub const DEFAULT_MIRROR_HOST: &str = "127.0.0.1";
pub const DEFAULT_SYNC_INTERVAL_HOURS: u64 = 24;

/// Fully resolved configuration handed to the binaries.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub api_key: String,
    pub channel_id: String,
    pub database_path: PathBuf,
    pub downloads_path: PathBuf,
    pub mirror_port: u16,
    pub mirror_host: String,
    /// Whether sync runs should also fetch media for videos that have none
    /// on disk. Resolved here once and passed into the orchestrator; the
    /// sync code itself never consults the environment.
    pub download_on_sync: bool,
    pub sync_interval_hours: u64,
}

/// Values a binary already knows (usually from CLI flags) that should beat
/// both the environment and the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub downloads_path: Option<PathBuf>,
    pub mirror_port: Option<u16>,
    pub mirror_host: Option<String>,
    pub download_on_sync: Option<bool>,
    pub env_path: Option<PathBuf>,
}

pub fn load_config() -> Result<MirrorConfig> {
    resolve_config(ConfigOverrides::default())
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<MirrorConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<MirrorConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<MirrorConfig> {
    let api_key = lookup_value("YOUTUBE_API_KEY", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))?;
    let channel_id = lookup_value("YOUTUBE_CHANNEL_ID", file_vars, &env_lookup)
        .ok_or_else(|| anyhow!("YOUTUBE_CHANNEL_ID not set"))?;

    let database_path = overrides
        .database_path
        .or_else(|| lookup_value("DATABASE_PATH", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
    let downloads_path = overrides
        .downloads_path
        .or_else(|| lookup_value("DOWNLOADS_PATH", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOADS_PATH));

    let mirror_port = overrides
        .mirror_port
        .or_else(|| {
            lookup_value("MIRROR_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_MIRROR_PORT);
    let mirror_host = overrides
        .mirror_host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() { None } else { Some(trimmed) }
        })
        .or_else(|| lookup_value("MIRROR_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MIRROR_HOST.to_string());

    let download_on_sync = overrides.download_on_sync.unwrap_or_else(|| {
        lookup_value("DOWNLOAD_VIDEOS", file_vars, &env_lookup)
            .map(|value| parse_bool_flag(&value))
            .unwrap_or(false)
    });
    let sync_interval_hours = lookup_value("SYNC_INTERVAL_HOURS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|hours| *hours > 0)
        .unwrap_or(DEFAULT_SYNC_INTERVAL_HOURS);

    Ok(MirrorConfig {
        api_key,
        channel_id,
        database_path,
        downloads_path,
        mirror_port,
        mirror_host,
        download_on_sync,
        sync_interval_hours,
    })
}

/// Accepts the usual truthy spellings so `.env` files stay forgiving.
fn parse_bool_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const REQUIRED: &str = "YOUTUBE_API_KEY=\"key\"\nYOUTUBE_CHANNEL_ID=\"UC123\"\n";

    fn make_config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> MirrorConfig {
        let cfg = make_config_file(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_config(&vars, |_| None).unwrap()
    }

    #[test]
    fn config_requires_api_key() {
        let cfg = make_config_file("YOUTUBE_CHANNEL_ID=\"UC123\"\n");
        let vars = read_env_file(cfg.path()).unwrap();
        let err = build_config(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("YOUTUBE_API_KEY"));
    }

    #[test]
    fn config_requires_channel_id() {
        let cfg = make_config_file("YOUTUBE_API_KEY=\"key\"\n");
        let vars = read_env_file(cfg.path()).unwrap();
        let err = build_config(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("YOUTUBE_CHANNEL_ID"));
    }

    #[test]
    fn config_applies_defaults() {
        let config = config_from(REQUIRED);
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE_PATH));
        assert_eq!(config.downloads_path, PathBuf::from(DEFAULT_DOWNLOADS_PATH));
        assert_eq!(config.mirror_port, DEFAULT_MIRROR_PORT);
        assert_eq!(config.mirror_host, DEFAULT_MIRROR_HOST);
        assert!(!config.download_on_sync);
        assert_eq!(config.sync_interval_hours, DEFAULT_SYNC_INTERVAL_HOURS);
    }

    #[test]
    fn config_reads_file_values() {
        let config = config_from(&format!(
            "{REQUIRED}DATABASE_PATH=\"/data/mirror.db\"\nDOWNLOADS_PATH=\"/data/media\"\nMIRROR_PORT=\"4242\"\nMIRROR_HOST=\"0.0.0.0\"\nDOWNLOAD_VIDEOS=\"true\"\nSYNC_INTERVAL_HOURS=\"6\"\n"
        ));
        assert_eq!(config.database_path, PathBuf::from("/data/mirror.db"));
        assert_eq!(config.downloads_path, PathBuf::from("/data/media"));
        assert_eq!(config.mirror_port, 4242);
        assert_eq!(config.mirror_host, "0.0.0.0");
        assert!(config.download_on_sync);
        assert_eq!(config.sync_interval_hours, 6);
    }

    #[test]
    fn config_prefers_env_over_file() {
        let cfg = make_config_file(&format!("{REQUIRED}DATABASE_PATH=\"/from-file\"\n"));
        let vars = read_env_file(cfg.path()).unwrap();
        let config = build_config(&vars, |key| {
            if key == "DATABASE_PATH" {
                Some("/from-env".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/from-env"));
    }

    #[test]
    fn config_override_precedence() {
        let mut vars = HashMap::new();
        vars.insert("YOUTUBE_API_KEY".to_string(), "key".to_string());
        vars.insert("YOUTUBE_CHANNEL_ID".to_string(), "UC123".to_string());
        vars.insert("DATABASE_PATH".to_string(), "/file-db".to_string());
        vars.insert("MIRROR_PORT".to_string(), "7000".to_string());

        let overrides = ConfigOverrides {
            database_path: Some(PathBuf::from("/override-db")),
            mirror_port: Some(9000),
            download_on_sync: Some(true),
            ..ConfigOverrides::default()
        };

        let config = build_config_with_overrides(
            &vars,
            |key| {
                if key == "MIRROR_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/override-db"));
        assert_eq!(config.mirror_port, 9000);
        assert!(config.download_on_sync);
    }

    #[test]
    fn config_ignores_invalid_port_and_interval() {
        let config = config_from(&format!(
            "{REQUIRED}MIRROR_PORT=\"nope\"\nSYNC_INTERVAL_HOURS=\"0\"\n"
        ));
        assert_eq!(config.mirror_port, DEFAULT_MIRROR_PORT);
        assert_eq!(config.sync_interval_hours, DEFAULT_SYNC_INTERVAL_HOURS);
    }

    #[test]
    fn parse_bool_flag_accepts_truthy_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool_flag(value), "{value} should be truthy");
        }
        for value in ["0", "false", "no", "off", ""] {
            assert!(!parse_bool_flag(value), "{value} should be falsy");
        }
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config_file(
            r#"
            export YOUTUBE_API_KEY="abc"
            YOUTUBE_CHANNEL_ID='UC999'
            MIRROR_HOST =  "0.0.0.0"
            MIRROR_PORT=9090
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("YOUTUBE_API_KEY").unwrap(), "abc");
        assert_eq!(vars.get("YOUTUBE_CHANNEL_ID").unwrap(), "UC999");
        assert_eq!(vars.get("MIRROR_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("MIRROR_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
