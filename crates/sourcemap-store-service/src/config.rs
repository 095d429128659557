use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::level_filters::LevelFilter;

use crate::types::{EntryKind, Snapshot};

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the store.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "sourcemap_store".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Error returned for retention limits below `-1`.
#[derive(Debug, thiserror::Error)]
#[error("invalid retention limit {0}, expected -1 or 0 (unbounded) or a positive number")]
pub struct InvalidRetentionLimit(i64);

/// The maximum number of source maps kept per application version.
///
/// Configured as a number, where `-1` and `0` both stand for [`Unbounded`](Self::Unbounded).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RetentionLimit {
    #[default]
    Unbounded,
    Max(usize),
}

impl RetentionLimit {
    /// Creates a limit of `max` entries. Zero means no limit.
    pub fn max(max: usize) -> Self {
        match max {
            0 => Self::Unbounded,
            max => Self::Max(max),
        }
    }

    /// Whether a group with `len` entries has to give up one before another is added.
    pub fn is_reached(&self, len: usize) -> bool {
        match *self {
            Self::Unbounded => false,
            Self::Max(max) => len >= max,
        }
    }
}

impl TryFrom<i64> for RetentionLimit {
    type Error = InvalidRetentionLimit;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Unbounded),
            n => usize::try_from(n)
                .map(Self::max)
                .map_err(|_| InvalidRetentionLimit(n)),
        }
    }
}

impl From<RetentionLimit> for i64 {
    fn from(limit: RetentionLimit) -> Self {
        match limit {
            RetentionLimit::Unbounded => -1,
            RetentionLimit::Max(max) => i64::try_from(max).unwrap_or(i64::MAX),
        }
    }
}

impl fmt::Display for RetentionLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("unbounded"),
            Self::Max(max) => write!(f, "{max}"),
        }
    }
}

/// Locations of the database file and the source map directory.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StorePaths {
    /// The JSON database holding all entries.
    pub db: PathBuf,
    /// The directory source map files are stored in.
    pub sourcemaps: PathBuf,
}

impl StorePaths {
    /// The default layout below a root directory.
    pub fn in_root(root: &Path) -> Self {
        Self {
            db: root.join("db.json"),
            sourcemaps: root.join("sourcemaps"),
        }
    }
}

/// See the README for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host or IP address to bind the HTTP server to. Binds all interfaces if not set.
    pub host: Option<String>,

    /// Port to bind the HTTP server to.
    pub port: u16,

    /// Maximum number of container source maps kept per application version.
    pub max_container_maps: RetentionLimit,

    /// Maximum number of code push source maps kept per application version.
    pub max_codepush_maps: RetentionLimit,

    /// Directory holding the database and the source maps.
    ///
    /// Ignored if `paths` is set.
    pub root_path: Option<PathBuf>,

    /// Explicit locations of the database and the source maps.
    pub paths: Option<StorePaths>,

    /// Initial contents of the database, used only when the database file does not exist.
    pub db_seed: Option<Snapshot>,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Config {
    /// Resolves where the database and the source maps are stored.
    ///
    /// Explicit `paths` win over `root_path`, which defaults to `./store`.
    pub fn store_paths(&self) -> StorePaths {
        match (&self.paths, &self.root_path) {
            (Some(paths), _) => paths.clone(),
            (None, Some(root)) => StorePaths::in_root(root),
            (None, None) => StorePaths::in_root(Path::new("store")),
        }
    }

    /// The retention limit applying to entries of the given kind.
    pub fn retention_limit(&self, kind: EntryKind) -> RetentionLimit {
        match kind {
            EntryKind::Container => self.max_container_maps,
            EntryKind::CodePush => self.max_codepush_maps,
        }
    }

    /// The host the HTTP server binds to.
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("0.0.0.0")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: None,
            port: 3000,
            max_container_maps: RetentionLimit::Unbounded,
            max_codepush_maps: RetentionLimit::Unbounded,
            root_path: None,
            paths: None,
            db_seed: None,
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host(), "0.0.0.0");
        assert_eq!(cfg.max_container_maps, RetentionLimit::Unbounded);
        assert_eq!(cfg.max_codepush_maps, RetentionLimit::Unbounded);
        assert_eq!(cfg.store_paths(), StorePaths::in_root(Path::new("store")));
    }

    #[test]
    fn test_retention_limits() {
        let yaml = r#"
            max_container_maps: 5
            max_codepush_maps: -1
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.retention_limit(EntryKind::Container),
            RetentionLimit::Max(5)
        );
        assert_eq!(
            cfg.retention_limit(EntryKind::CodePush),
            RetentionLimit::Unbounded
        );
    }

    #[test]
    fn test_zero_retention_limit_is_unbounded() {
        let yaml = r#"
            max_container_maps: 0
            max_codepush_maps: 0
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.max_container_maps, RetentionLimit::Unbounded);
        assert_eq!(cfg.max_codepush_maps, RetentionLimit::Unbounded);
    }

    #[test]
    fn test_invalid_retention_limits() {
        for yaml in ["max_container_maps: -2", "max_codepush_maps: -100"] {
            assert!(Config::from_reader(yaml.as_bytes()).is_err(), "{yaml}");
        }
    }

    #[test]
    fn test_retention_limit_reached() {
        assert!(!RetentionLimit::Unbounded.is_reached(usize::MAX));
        let limit = RetentionLimit::max(2);
        assert!(!limit.is_reached(1));
        assert!(limit.is_reached(2));
        assert!(limit.is_reached(3));
        assert_eq!(RetentionLimit::max(0), RetentionLimit::Unbounded);
        assert!(!RetentionLimit::max(0).is_reached(1000));
    }

    #[test]
    fn test_store_paths() {
        let yaml = r#"
            root_path: /var/lib/sourcemaps
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(
            cfg.store_paths(),
            StorePaths {
                db: PathBuf::from("/var/lib/sourcemaps/db.json"),
                sourcemaps: PathBuf::from("/var/lib/sourcemaps/sourcemaps"),
            }
        );

        let yaml = r#"
            root_path: /var/lib/sourcemaps
            paths:
              db: /etc/store.json
              sourcemaps: /srv/maps
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.store_paths().db, PathBuf::from("/etc/store.json"));
        assert_eq!(cfg.store_paths().sourcemaps, PathBuf::from("/srv/maps"));
    }

    #[test]
    fn test_db_seed() {
        let yaml = r#"
            db_seed:
              containerSourceMaps:
                - descriptor:
                    app: testapp
                    platform: ios
                    version: 1.0.0
                    containerVersion: 2.0.0
                  sourcemap: 89558600-dce8-44aa-b0b2-fefb11b6f556
                  timestamp: 1553530245432
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        let seed = cfg.db_seed.unwrap();
        assert_eq!(seed.container_source_maps.len(), 1);
        assert!(seed.code_push_source_maps.is_empty());
    }

    #[test]
    fn test_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            caches:
              downloaded:
                max_unused_for: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
