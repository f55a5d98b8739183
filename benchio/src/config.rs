//! Configuration for a benchmark run.
//!
//! Configuration is merged from the following sources, highest precedence first:
//!
//! 1. Command line flags
//! 2. Environment variables (prefixed with `BENCHIO__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! Nested structures use double underscores in environment variables, for example
//! `BENCHIO__LOGGING__LEVEL=debug`. A YAML file looks like this:
//!
//! ```yaml
//! endpoint: http://minio-1:9000,http://minio-2:9000
//! bucket: loadtest
//! access_key: minio
//! secret_key: minio123
//! object_size: 64 MiB
//! multipart_size: 16 MiB
//! count: 1000
//! workers: 32
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytesize::ByteSize;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::{Error, Result};

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "BENCHIO__";

/// Newtype around `String` that keeps credentials out of `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    /// The secret in plain text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[redacted]")
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty for a TTY, simplified otherwise.
    Auto,
    /// Pretty printing with colors.
    Pretty,
    /// Simplified plain text output.
    Simplified,
    /// JSON lines.
    Json,
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration. Logs are always written to stderr.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level. `RUST_LOG` takes precedence if set.
    ///
    /// # Default
    ///
    /// `INFO`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `auto`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Parameters of a benchmark run.
///
/// Loaded once with [`Config::load`] and read-only afterwards.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Access key for the storage endpoints.
    pub access_key: ConfigSecret,
    /// Secret key for the storage endpoints.
    pub secret_key: ConfigSecret,
    /// Signing region.
    ///
    /// # Default
    ///
    /// `us-east-1`
    pub region: String,
    /// Comma-separated list of endpoints. Workers are assigned round-robin.
    pub endpoint: String,
    /// The bucket objects are written to. It must exist before the run.
    pub bucket: String,

    /// The size of every object.
    ///
    /// # Default
    ///
    /// `1 MiB`
    pub object_size: ByteSize,
    /// Divides the object size to get the size of the in-memory random sample.
    ///
    /// # Default
    ///
    /// `1` (the sample is as large as an object)
    pub object_split: u64,
    /// Part size for multipart uploads and downloads. `0` disables multipart transfers.
    pub multipart_size: ByteSize,
    /// Prefix of every object key. Keys are `{prefix}{index}`.
    ///
    /// # Default
    ///
    /// `benchio-`
    pub prefix: String,
    /// The number of objects written and read per phase.
    ///
    /// # Default
    ///
    /// `1000`
    pub count: u64,
    /// The number of concurrent workers. Must not exceed `count`.
    ///
    /// # Default
    ///
    /// `10`
    pub workers: usize,

    /// Print one line per completed operation.
    pub verbose: bool,
    /// Run the write phase.
    pub write: bool,
    /// Run the read phase.
    pub read: bool,
    /// Delete all objects after the run.
    pub cleanup: bool,

    /// Timeout applied to each storage operation by the client.
    ///
    /// # Default
    ///
    /// `None` (operations may take arbitrarily long)
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    /// Writes a JSON summary of the run to this path.
    pub report_path: Option<PathBuf>,

    /// Logging configuration.
    pub logging: Logging,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_key: ConfigSecret::default(),
            secret_key: ConfigSecret::default(),
            region: "us-east-1".to_owned(),
            endpoint: String::new(),
            bucket: String::new(),

            object_size: ByteSize::mib(1),
            object_split: 1,
            multipart_size: ByteSize::b(0),
            prefix: "benchio-".to_owned(),
            count: 1000,
            workers: 10,

            verbose: false,
            write: true,
            read: true,
            cleanup: true,

            request_timeout: None,
            report_path: None,

            logging: Logging::default(),
        }
    }
}

/// Values given on the command line, which take precedence over every other source.
///
/// Sizes are kept as text so they are parsed the same way as in files and environment variables.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    /// See [`Config::access_key`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    /// See [`Config::secret_key`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    /// See [`Config::region`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// See [`Config::endpoint`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// See [`Config::bucket`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// See [`Config::object_size`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_size: Option<String>,
    /// See [`Config::object_split`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_split: Option<u64>,
    /// See [`Config::multipart_size`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_size: Option<String>,
    /// See [`Config::prefix`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// See [`Config::count`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// See [`Config::workers`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// See [`Config::verbose`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    /// See [`Config::write`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
    /// See [`Config::read`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    /// See [`Config::cleanup`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<bool>,
    /// See [`Config::report_path`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from the optional YAML file, the environment and `overrides`.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::globals(overrides))
            .extract()?;

        Ok(config)
    }

    /// The configured endpoints, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoint
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Checks the invariants a run depends on.
    pub fn validate(&self) -> Result<()> {
        if self.count < 1 {
            return Err(Error::InvalidConfig(
                "object count must be at least 1".into(),
            ));
        }
        if self.workers < 1 || self.workers as u64 > self.count {
            return Err(Error::InvalidConfig(format!(
                "workers ({}) must be between 1 and the object count ({})",
                self.workers, self.count
            )));
        }
        if self.endpoints().is_empty() {
            return Err(Error::InvalidConfig(
                "one or more endpoints are required".into(),
            ));
        }
        if self.bucket.is_empty() {
            return Err(Error::InvalidConfig("a bucket is required".into()));
        }
        if self.object_size.as_u64() == 0 {
            return Err(Error::InvalidConfig(
                "object size must be at least one byte".into(),
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test parameters")?;
        writeln!(f, "Endpoint(s):      {:?}", self.endpoints())?;
        writeln!(f, "Bucket:           {}", self.bucket)?;
        writeln!(f, "ObjectNamePrefix: {}", self.prefix)?;
        writeln!(
            f,
            "ObjectSize:       {:0.4} MB",
            self.object_size.as_u64() as f64 / (1024.0 * 1024.0)
        )?;
        writeln!(f, "ObjectSplit:      {}", self.object_split)?;
        if self.multipart_size.as_u64() > 0 {
            writeln!(f, "MultipartSize:    {}", self.multipart_size)?;
        }
        writeln!(f, "numClients:       {}", self.workers)?;
        writeln!(f, "numSamples:       {}", self.count)?;
        writeln!(f, "Verbose:          {}", self.verbose)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn valid() -> Config {
        Config {
            endpoint: "http://localhost:9000".into(),
            bucket: "bucket".into(),
            count: 10,
            workers: 3,
            ..Config::default()
        }
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BENCHIO__ENDPOINT", "http://a:9000, http://b:9000");
            jail.set_env("BENCHIO__BUCKET", "loadtest");
            jail.set_env("BENCHIO__OBJECT_SIZE", "4 MiB");
            jail.set_env("BENCHIO__COUNT", "50");
            jail.set_env("BENCHIO__CLEANUP", "false");
            jail.set_env("BENCHIO__REQUEST_TIMEOUT", "30s");
            jail.set_env("BENCHIO__LOGGING__LEVEL", "debug");

            let config = Config::load(None, &Overrides::default()).unwrap();

            assert_eq!(config.endpoints(), ["http://a:9000", "http://b:9000"]);
            assert_eq!(config.bucket, "loadtest");
            assert_eq!(config.object_size, ByteSize::mib(4));
            assert_eq!(config.count, 50);
            assert!(!config.cleanup);
            assert!(config.write);
            assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.region, "us-east-1");

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            endpoint: http://localhost:9000
            bucket: whatever
            access_key: minio
            secret_key: minio123
            object_size: 64 MiB
            multipart_size: 16 MiB
            object_split: 8
            workers: 32
            logging:
                format: json
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path()), &Overrides::default()).unwrap();

            assert_eq!(config.bucket, "whatever");
            assert_eq!(config.access_key.as_str(), "minio");
            assert_eq!(config.object_size, ByteSize::mib(64));
            assert_eq!(config.multipart_size, ByteSize::mib(16));
            assert_eq!(config.object_split, 8);
            assert_eq!(config.workers, 32);
            assert_eq!(config.count, 1000);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.logging.level, LevelFilter::INFO);

            Ok(())
        });
    }

    #[test]
    fn overrides_take_precedence() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BENCHIO__BUCKET", "from-env");
            jail.set_env("BENCHIO__WORKERS", "4");

            let overrides = Overrides {
                bucket: Some("from-flag".into()),
                object_size: Some("1500000".into()),
                verbose: Some(true),
                ..Default::default()
            };
            let config = Config::load(None, &overrides).unwrap();

            assert_eq!(config.bucket, "from-flag");
            assert_eq!(config.workers, 4);
            assert_eq!(config.object_size, ByteSize::b(1_500_000));
            assert!(config.verbose);
            assert!(config.cleanup);

            Ok(())
        });
    }

    #[test]
    fn overrides_toggle_phases_and_credentials() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("BENCHIO__REGION", "us-west-2");
            jail.set_env("BENCHIO__ACCESS_KEY", "from-env");

            let overrides = Overrides {
                access_key: Some("minio".into()),
                secret_key: Some("minio123".into()),
                region: Some("eu-central-1".into()),
                write: Some(false),
                cleanup: Some(false),
                ..Default::default()
            };
            let config = Config::load(None, &overrides).unwrap();

            assert_eq!(config.access_key.as_str(), "minio");
            assert_eq!(config.secret_key.as_str(), "minio123");
            assert_eq!(config.region, "eu-central-1");
            assert!(!config.write);
            assert!(config.read);
            assert!(!config.cleanup);

            Ok(())
        });
    }

    #[test]
    fn secrets_are_redacted() {
        let config = Config {
            secret_key: "hunter2".into(),
            ..valid()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn validation() {
        assert!(valid().validate().is_ok());

        let too_many_workers = Config {
            workers: 11,
            ..valid()
        };
        assert!(matches!(
            too_many_workers.validate(),
            Err(Error::InvalidConfig(_))
        ));

        let no_objects = Config {
            count: 0,
            workers: 0,
            ..valid()
        };
        assert!(no_objects.validate().is_err());

        let no_workers = Config {
            workers: 0,
            ..valid()
        };
        assert!(no_workers.validate().is_err());

        let no_endpoint = Config {
            endpoint: " , ".into(),
            ..valid()
        };
        assert!(no_endpoint.validate().is_err());

        let no_bucket = Config {
            bucket: String::new(),
            ..valid()
        };
        assert!(no_bucket.validate().is_err());

        let empty_objects = Config {
            object_size: ByteSize::b(0),
            ..valid()
        };
        assert!(empty_objects.validate().is_err());
    }
}
