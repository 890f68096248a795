//! Configuration handling.
//!
//! Two layers: process settings come from CLI arguments and environment
//! variables (`Config`), datasource profiles come from a YAML file
//! (`load_profiles`).
//!
//! # Profile file
//!
//! ```yaml
//! profiles:
//!   DEFAULT:
//!     datasource:
//!       host: localhost
//!       port: 5432
//!       user: app
//!       dbname: app
//!       password: secret
//!     gorm:
//!       dialect: postgres
//!       print_log: true
//! ```

use crate::models::{ConnectionProfile, DEFAULT_SSL_MODE, DIALECT_SQLITE};
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the datasource used when the caller does not pick one.
pub const DEFAULT_DATASOURCE_NAME: &str = "DEFAULT";
pub const DEFAULT_CONFIG_PATH: &str = "datasources.yaml";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while loading the profile file. All of them are fatal at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Error loading datasource profiles file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing datasource profiles: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("No datasource profiles defined under 'profiles'")]
    NoProfiles,

    #[error("Datasource name cannot be empty")]
    EmptyName,

    #[error("Datasource '{datasource}': {message}")]
    InvalidProfile { datasource: String, message: String },
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profiles: Option<BTreeMap<String, RawProfile>>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    datasource: RawDatasource,
    #[serde(alias = "orm")]
    gorm: RawOrm,
}

#[derive(Debug, Deserialize)]
struct RawDatasource {
    #[serde(default)]
    host: String,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    user: String,
    #[serde(default)]
    dbname: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    ssl_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOrm {
    dialect: String,
    #[serde(default)]
    print_log: bool,
}

impl RawProfile {
    fn into_profile(self, name: &str) -> Result<ConnectionProfile, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidProfile {
            datasource: name.to_string(),
            message: message.to_string(),
        };

        let dialect = self.gorm.dialect.trim().to_ascii_lowercase();
        if dialect.is_empty() {
            return Err(invalid("dialect cannot be empty"));
        }

        let ds = self.datasource;
        if ds.dbname.is_empty() {
            return Err(invalid("dbname cannot be empty"));
        }
        // SQLite only needs a file path; everything else talks to a server.
        if dialect != DIALECT_SQLITE {
            if ds.host.is_empty() {
                return Err(invalid("host cannot be empty"));
            }
            if ds.port == 0 {
                return Err(invalid("port must be greater than 0"));
            }
            if ds.user.is_empty() {
                return Err(invalid("user cannot be empty"));
            }
        }

        Ok(ConnectionProfile {
            host: ds.host,
            port: ds.port,
            user: ds.user,
            password: ds.password,
            dbname: ds.dbname,
            dialect,
            print_log: self.gorm.print_log,
            ssl_mode: ds
                .ssl_mode
                .unwrap_or_else(|| DEFAULT_SSL_MODE.to_string()),
        })
    }
}

/// Any YAML key names a datasource, as long as it is not blank.
fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }
    Ok(())
}

/// Parse datasource profiles from YAML text. Profiles come back sorted by name.
pub fn parse_profiles(yaml: &str) -> Result<Vec<(String, ConnectionProfile)>, ConfigError> {
    let file: ProfileFile = serde_yaml::from_str(yaml)?;
    let raw = file.profiles.filter(|p| !p.is_empty()).ok_or(ConfigError::NoProfiles)?;

    raw.into_iter()
        .map(|(name, profile)| {
            validate_name(&name)?;
            let profile = profile.into_profile(&name)?;
            Ok((name, profile))
        })
        .collect()
}

/// Read and parse the profile file at `path`.
pub fn load_profiles(path: &Path) -> Result<Vec<(String, ConnectionProfile)>, ConfigError> {
    tracing::info!(path = %path.display(), "Reading datasource profiles");
    let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_profiles(&yaml)
}

/// Process configuration.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "datasource-tx",
    about = "Open the datasources described in a YAML profile file",
    version,
    author
)]
pub struct Config {
    /// Path to the YAML datasource profile file
    #[arg(
        short,
        long,
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        env = "DATASOURCE_CONFIG"
    )]
    pub config: PathBuf,

    /// Name of the datasource used when none is given
    #[arg(
        long,
        value_name = "NAME",
        default_value = DEFAULT_DATASOURCE_NAME,
        env = "DATASOURCE_DEFAULT"
    )]
    pub default_datasource: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DATASOURCE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DATASOURCE_JSON_LOGS")]
    pub json_logs: bool,

    /// Run a `SELECT 1` transaction against every datasource after connecting
    #[arg(long)]
    pub check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            default_datasource: DEFAULT_DATASOURCE_NAME.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            check: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DIALECT_POSTGRES;

    const TWO_PROFILES: &str = r#"
profiles:
  DEFAULT:
    datasource:
      host: localhost
      port: 5432
      user: app
      dbname: app
      password: secret
    gorm:
      dialect: postgres
      print_log: true
  reporting:
    datasource:
      host: replica.internal
      port: 5433
      user: report
      dbname: warehouse
      password: other
      ssl_mode: require
    orm:
      dialect: POSTGRES
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(config.default_datasource, DEFAULT_DATASOURCE_NAME);
        assert!(!config.check);
    }

    #[test]
    fn test_cli_overrides() {
        let config = Config::try_parse_from([
            "datasource-tx",
            "--config",
            "/etc/app/db.yaml",
            "--default-datasource",
            "primary",
            "--check",
        ])
        .unwrap();
        assert_eq!(config.config, PathBuf::from("/etc/app/db.yaml"));
        assert_eq!(config.default_datasource, "primary");
        assert!(config.check);
    }

    #[test]
    fn test_parse_two_profiles() {
        let profiles = parse_profiles(TWO_PROFILES).unwrap();
        assert_eq!(profiles.len(), 2);

        let (name, default) = &profiles[0];
        assert_eq!(name, "DEFAULT");
        assert_eq!(default.host, "localhost");
        assert_eq!(default.port, 5432);
        assert_eq!(default.password, "secret");
        assert_eq!(default.dialect, DIALECT_POSTGRES);
        assert!(default.print_log);
        assert_eq!(default.ssl_mode, DEFAULT_SSL_MODE);

        let (name, reporting) = &profiles[1];
        assert_eq!(name, "reporting");
        assert_eq!(reporting.dialect, DIALECT_POSTGRES);
        assert!(!reporting.print_log);
        assert_eq!(reporting.ssl_mode, "require");
    }

    #[test]
    fn test_parse_sqlite_profile_needs_only_dbname() {
        let yaml = r#"
profiles:
  local:
    datasource:
      dbname: /var/lib/app/local.db
    gorm:
      dialect: sqlite
"#;
        let profiles = parse_profiles(yaml).unwrap();
        assert_eq!(profiles[0].1.dbname, "/var/lib/app/local.db");
        assert_eq!(profiles[0].1.dialect, DIALECT_SQLITE);
    }

    #[test]
    fn test_unknown_dialect_is_parsed_not_rejected() {
        // Dialect support is decided when connecting, not when parsing.
        let yaml = r#"
profiles:
  legacy:
    datasource: {host: db, port: 1521, user: sys, dbname: orcl, password: x}
    gorm: {dialect: oracle, print_log: false}
"#;
        let profiles = parse_profiles(yaml).unwrap();
        assert_eq!(profiles[0].1.dialect, "oracle");
    }

    #[test]
    fn test_missing_profiles_key() {
        let result = parse_profiles("something_else: 1\n");
        assert!(matches!(result, Err(ConfigError::NoProfiles)));
    }

    #[test]
    fn test_empty_profiles_map() {
        let result = parse_profiles("profiles: {}\n");
        assert!(matches!(result, Err(ConfigError::NoProfiles)));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = parse_profiles("profiles: [unclosed\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_gorm_section() {
        let yaml = r#"
profiles:
  DEFAULT:
    datasource: {host: localhost, port: 5432, user: app, dbname: app, password: x}
"#;
        assert!(matches!(parse_profiles(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_port_must_be_numeric() {
        let yaml = r#"
profiles:
  DEFAULT:
    datasource: {host: localhost, port: "abc", user: app, dbname: app, password: x}
    gorm: {dialect: postgres}
"#;
        assert!(matches!(parse_profiles(yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_network_profile_requires_host() {
        let yaml = r#"
profiles:
  DEFAULT:
    datasource: {port: 5432, user: app, dbname: app, password: x}
    gorm: {dialect: postgres}
"#;
        match parse_profiles(yaml) {
            Err(ConfigError::InvalidProfile { datasource, message }) => {
                assert_eq!(datasource, "DEFAULT");
                assert!(message.contains("host"));
            }
            other => panic!("expected InvalidProfile, got {:?}", other),
        }
    }

    #[test]
    fn test_any_datasource_name_is_accepted() {
        let yaml = r#"
profiles:
  db.main:
    datasource: {host: h, port: 5432, user: u, dbname: d, password: p}
    gorm: {dialect: postgres}
  "reporting replica":
    datasource: {host: r, port: 5432, user: u, dbname: d, password: p}
    gorm: {dialect: postgres}
"#;
        let names: Vec<String> = parse_profiles(yaml)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["db.main", "reporting replica"]);
    }

    #[test]
    fn test_empty_datasource_name() {
        let yaml = r#"
profiles:
  "":
    datasource: {host: h, port: 5432, user: u, dbname: d, password: p}
    gorm: {dialect: postgres}
"#;
        assert!(matches!(parse_profiles(yaml), Err(ConfigError::EmptyName)));
    }

    #[test]
    fn test_load_profiles_missing_file() {
        let result = load_profiles(Path::new("/nonexistent/datasources.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_profiles_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datasources.yaml");
        std::fs::write(&path, TWO_PROFILES).unwrap();
        let profiles = load_profiles(&path).unwrap();
        assert_eq!(profiles.len(), 2);
    }
}
