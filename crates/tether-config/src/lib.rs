//! Multi-tier TOML configuration for Tether.
//!
//! Reads configuration from multiple sources with precedence:
//! overrides > env vars > config file > defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tether_mcp::McpConfig;
use tether_types::ConfigError;

/// The default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Resolved configuration for a Tether host.
#[derive(Debug, Clone)]
pub struct TetherConfig {
    pub logging: LogSettings,
    pub mcp: McpConfig,
    pub config_dir: PathBuf,
}

/// Resolved log sink settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// An `EnvFilter` directive, e.g. `info` or `tether_mcp=debug`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

/// Settings that can be read from a TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub mcp: McpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: Option<String>,
    #[serde(default)]
    pub json: bool,
}

/// Overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    /// Shorthand for `log_level = "debug"`.
    pub verbose: bool,
    pub request_timeout_ms: Option<u64>,
}

impl TetherConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. Overrides
    /// 2. Environment variables (`TETHER_LOG`, `TETHER_REQUEST_TIMEOUT_MS`)
    /// 3. Config file (~/.tether/config.toml)
    /// 4. Defaults
    pub fn load(overrides: Overrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"));
        resolve(settings, overrides, |key| std::env::var(key).ok(), config_dir)
    }
}

/// Apply precedence rules to already-read settings.
fn resolve(
    settings: SettingsFile,
    overrides: Overrides,
    env: impl Fn(&str) -> Option<String>,
    config_dir: PathBuf,
) -> Result<TetherConfig, ConfigError> {
    // Resolve log level: override > verbose > env > config file > default
    let level = overrides
        .log_level
        .or_else(|| overrides.verbose.then(|| "debug".to_string()))
        .or_else(|| env("TETHER_LOG"))
        .or(settings.logging.level)
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

    let env_timeout = env("TETHER_REQUEST_TIMEOUT_MS")
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "TETHER_REQUEST_TIMEOUT_MS".into(),
                    message: e.to_string(),
                })
        })
        .transpose()?;

    let mut mcp = settings.mcp;
    if let Some(ms) = overrides.request_timeout_ms.or(env_timeout) {
        mcp.request_timeout_ms = ms;
    }
    validate_timeouts(&mcp)?;

    Ok(TetherConfig {
        logging: LogSettings {
            level,
            json: settings.logging.json,
        },
        mcp,
        config_dir,
    })
}

fn validate_timeouts(mcp: &McpConfig) -> Result<(), ConfigError> {
    if mcp.request_timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: "mcp.request_timeout_ms".into(),
            message: "must be greater than zero".into(),
        });
    }
    for (name, server) in &mcp.servers {
        if server.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: format!("mcp.servers.{name}.timeout_ms"),
                message: "must be greater than zero".into(),
            });
        }
    }
    Ok(())
}

/// Get the Tether config directory path (~/.tether/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TETHER_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tether")
}

/// Load and parse a TOML settings file, returning defaults on any error.
pub fn load_settings_file(path: &Path) -> SettingsFile {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            let err = ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            };
            tracing::warn!("{err}; using defaults");
            SettingsFile::default()
        }),
        Err(_) => SettingsFile::default(),
    }
}

/// Install the global log subscriber, writing to stderr.
///
/// `RUST_LOG` wins over the configured level when it is set and valid.
pub fn init_logging(settings: &LogSettings) -> Result<(), ConfigError> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| ConfigError::InvalidValue {
            key: "logging.level".into(),
            message: e.to_string(),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let config = resolve(
            SettingsFile::default(),
            Overrides::default(),
            no_env,
            PathBuf::from("/tmp"),
        )
        .unwrap();
        assert_eq!(config.logging.level, DEFAULT_LOG_LEVEL);
        assert!(!config.logging.json);
        assert_eq!(config.mcp.request_timeout_ms, 30000);
        assert!(config.mcp.servers.is_empty());
    }

    #[test]
    fn test_settings_toml_parse() {
        let toml_str = r#"
[logging]
level = "info"
json = true

[mcp]
request_timeout_ms = 15000

[mcp.servers.memory]
command = "npx -y @modelcontextprotocol/server-memory"

[mcp.servers.github]
command = "npx -y @modelcontextprotocol/server-github"
env = { GITHUB_TOKEN = "ghp_xxxx" }
timeout_ms = 60000
"#;
        let settings: SettingsFile = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.logging.level.as_deref(), Some("info"));
        assert!(settings.logging.json);
        assert_eq!(settings.mcp.request_timeout_ms, 15000);
        assert_eq!(settings.mcp.servers.len(), 2);
        assert_eq!(settings.mcp.servers["github"].timeout_ms, Some(60000));
    }

    #[test]
    fn test_precedence() {
        let settings: SettingsFile = toml::from_str(
            r#"
[logging]
level = "info"

[mcp]
request_timeout_ms = 15000
"#,
        )
        .unwrap();

        // File beats defaults.
        let config = resolve(settings.clone(), Overrides::default(), no_env, PathBuf::new()).unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.mcp.request_timeout_ms, 15000);

        // Env beats file.
        let env = env_of(&[("TETHER_LOG", "trace"), ("TETHER_REQUEST_TIMEOUT_MS", "9000")]);
        let config = resolve(settings.clone(), Overrides::default(), &env, PathBuf::new()).unwrap();
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.mcp.request_timeout_ms, 9000);

        // Overrides beat env.
        let overrides = Overrides {
            verbose: true,
            request_timeout_ms: Some(1000),
            ..Default::default()
        };
        let config = resolve(settings, overrides, &env, PathBuf::new()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.mcp.request_timeout_ms, 1000);
    }

    #[test]
    fn test_invalid_timeouts_are_rejected() {
        let env = env_of(&[("TETHER_REQUEST_TIMEOUT_MS", "soon")]);
        let err = resolve(SettingsFile::default(), Overrides::default(), env, PathBuf::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TETHER_REQUEST_TIMEOUT_MS"));

        let settings: SettingsFile = toml::from_str(
            r#"
[mcp.servers.slow]
command = "slow-server"
timeout_ms = 0
"#,
        )
        .unwrap();
        let err = resolve(settings, Overrides::default(), no_env, PathBuf::new()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "mcp.servers.slow.timeout_ms"),
            other => panic!("Expected InvalidValue, got: {other:?}"),
        }
    }

    #[test]
    fn test_settings_file_fallbacks() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load_settings_file(&dir.path().join("absent.toml"));
        assert!(missing.mcp.servers.is_empty());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[mcp\nthis is not toml").unwrap();
        let settings = load_settings_file(&broken);
        assert!(settings.logging.level.is_none());

        let good = dir.path().join("config.toml");
        std::fs::write(&good, "[mcp.servers.echo]\ncommand = \"echo-server\"\n").unwrap();
        let settings = load_settings_file(&good);
        assert_eq!(settings.mcp.servers["echo"].command, "echo-server");
    }

    #[test]
    fn test_init_logging_only_once() {
        let settings = LogSettings {
            level: "warn".into(),
            json: false,
        };
        assert!(init_logging(&settings).is_ok());
        assert!(matches!(
            init_logging(&settings),
            Err(ConfigError::Logging(_))
        ));
    }
}
