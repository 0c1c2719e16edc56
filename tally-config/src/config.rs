use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_auth::FernetKey;
use tally_log::LogConfig;
use tally_metchan::MetchanConfig;
use tally_outlet::{LEASE_CLOCK_SKEW, OutletConfig};
use tally_redis::RedisConfig;
use tally_upstream::{ClientOptions, Endpoint, Url};

/// The name of the configuration file within the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.yml";

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            cause: Some(Box::new(inner)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn invalid(field: &str) -> Self {
        Self::new(ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// Structure used to hold information about configuration overrides via CLI parameters or
/// environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The namespace of all keys and metric names.
    pub app_name: Option<String>,
    /// The redis server url.
    pub redis_url: Option<String>,
    /// The url of the self-metrics destination.
    pub metchan_url: Option<String>,
    /// Print self-metrics to standard output.
    pub verbose: Option<String>,
    /// Number of outlet partitions.
    pub partitions: Option<String>,
    /// Colon separated list of fernet keys.
    pub secrets: Option<String>,
}

/// Controls the HTTP client used for the gauges API.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Http {
    /// Timeout for upstream requests in seconds.
    pub timeout: u64,
    /// Timeout for establishing connections in seconds.
    pub connection_timeout: u64,
    /// Overrides the `User-Agent` header.
    pub user_agent: Option<String>,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            timeout: 5,
            connection_timeout: 3,
            user_agent: None,
        }
    }
}

/// Keys for authentication tokens.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Fernet keys accepted for tokens. The first key is used to issue new tokens.
    pub secrets: Vec<FernetKey>,
}

fn default_app_name() -> String {
    "tally".to_owned()
}

fn default_shutdown_timeout() -> u64 {
    10
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ConfigValues {
    #[serde(default = "default_app_name")]
    app_name: String,
    #[serde(default = "default_shutdown_timeout")]
    shutdown_timeout: u64,
    #[serde(default)]
    logging: LogConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    redis: Option<RedisConfig>,
    #[serde(default)]
    http: Http,
    #[serde(default)]
    metchan: MetchanConfig,
    #[serde(default)]
    outlet: OutletConfig,
    #[serde(default)]
    auth: AuthConfig,
}

impl Default for ConfigValues {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            shutdown_timeout: default_shutdown_timeout(),
            logging: LogConfig::default(),
            redis: None,
            http: Http::default(),
            metchan: MetchanConfig::default(),
            outlet: OutletConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ConfigValues {
    /// Loads `config.yml` from the given directory, or returns defaults if it does not exist.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = base.join(CONFIG_FILE_NAME);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => {
                let error = ConfigError::wrap(error, ConfigErrorKind::CouldNotOpenFile);
                return Err(error.file(&path));
            }
        };

        serde_yaml::from_reader(io::BufReader::new(file))
            .map_err(|error| ConfigError::wrap(error, ConfigErrorKind::BadYaml).file(&path))
    }

    /// Checks values that cannot be expressed in their types.
    fn validate(&self) -> Result<(), ConfigError> {
        let outlet = &self.outlet;

        if self.app_name.is_empty() {
            return Err(ConfigError::invalid("app_name"));
        }
        if outlet.partitions == 0 {
            return Err(ConfigError::invalid("outlet.partitions"));
        }
        if outlet.bucket_interval == 0 {
            return Err(ConfigError::invalid("outlet.bucket_interval"));
        }
        if outlet.poll_interval == 0 {
            return Err(ConfigError::invalid("outlet.poll_interval"));
        }
        if outlet.concurrency == 0 {
            return Err(ConfigError::invalid("outlet.concurrency"));
        }
        // Leases must outlive their bucket on every worker, including those with a lagging clock.
        if outlet.lease_ttl < outlet.bucket_interval.saturating_add(LEASE_CLOCK_SKEW.as_secs()) {
            return Err(ConfigError::invalid("outlet.lease_ttl"));
        }
        if let Err(error) = outlet.api_url.parse::<Url>() {
            return Err(ConfigError::for_field(error, "outlet.api_url"));
        }
        if self.metchan.flush_interval == 0 {
            return Err(ConfigError::invalid("metchan.flush_interval"));
        }
        if self.metchan.outbox_capacity == 0 {
            return Err(ConfigError::invalid("metchan.outbox_capacity"));
        }
        if let Some(url) = &self.metchan.url {
            if let Err(error) = url.parse::<Endpoint>() {
                return Err(ConfigError::for_field(error, "metchan.url"));
            }
        }

        Ok(())
    }
}

/// Config struct.
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// A missing `config.yml` yields the default configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = ConfigValues::load(&path)?;
        values.validate()?;

        Ok(Config { values, path })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_json::from_value(value)
            .map_err(|error| ConfigError::wrap(error, ConfigErrorKind::BadJson))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let values = &mut self.values;

        if let Some(app_name) = overrides.app_name {
            values.app_name = app_name;
        }

        if let Some(redis_url) = overrides.redis_url {
            values.redis = Some(RedisConfig::Single(redis_url));
        }

        if let Some(metchan_url) = overrides.metchan_url {
            values.metchan.url = Some(metchan_url).filter(|url| !url.is_empty());
        }

        if let Some(verbose) = overrides.verbose {
            values.metchan.verbose =
                parse_bool(&verbose).ok_or_else(|| ConfigError::invalid("verbose"))?;
        }

        if let Some(partitions) = overrides.partitions {
            values.outlet.partitions = partitions
                .trim()
                .parse()
                .map_err(|error| ConfigError::for_field(error, "partitions"))?;
        }

        if let Some(secrets) = overrides.secrets {
            values.auth.secrets = secrets
                .split(':')
                .filter(|secret| !secret.is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|error| ConfigError::for_field(error, "secrets"))?;
        }

        values.validate()?;
        Ok(self)
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|error| ConfigError::wrap(error, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the namespace of all Redis keys, leases and self-metrics.
    pub fn app_name(&self) -> &str {
        &self.values.app_name
    }

    /// Returns the time granted to services for a graceful shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.shutdown_timeout)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the Redis server configuration, if any.
    pub fn redis(&self) -> Option<&RedisConfig> {
        self.values.redis.as_ref()
    }

    /// Returns the options of HTTP clients.
    pub fn client_options(&self) -> ClientOptions {
        let http = &self.values.http;
        let mut options = ClientOptions {
            timeout: Duration::from_secs(http.timeout),
            connection_timeout: Duration::from_secs(http.connection_timeout),
            ..ClientOptions::default()
        };

        if let Some(user_agent) = &http.user_agent {
            options.user_agent = user_agent.clone();
        }

        options
    }

    /// Returns the self-metrics configuration.
    pub fn metchan(&self) -> &MetchanConfig {
        &self.values.metchan
    }

    /// Returns the outlet configuration.
    pub fn outlet(&self) -> &OutletConfig {
        &self.values.outlet
    }

    /// Returns the keys for authentication tokens.
    pub fn auth_keys(&self) -> &[FernetKey] {
        &self.values.auth.secrets
    }
}

/// Parses booleans the way environment variables usually spell them.
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
