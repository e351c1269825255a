//! Process configuration.
//!
//! Tunables come from command-line flags with `TALLY_*` environment
//! fallbacks. Credentials come only from the environment, optionally
//! seeded from an env file:
//!
//! - `PUSHER_APP_ID`, `PUSHER_APP_KEY`, `PUSHER_APP_SECRET`,
//!   `PUSHER_APP_CLUSTER` -- required
//! - `PUSHER_APP_SECURE` -- optional, `1`/`true` enables HTTPS
//! - `TWITTER_CONSUMER_KEY`, `TWITTER_CONSUMER_SECRET`,
//!   `TWITTER_ACCESS_TOKEN`, `TWITTER_ACCESS_SECRET` -- required

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tally_api::ServerConfig;
use tally_broadcast::{BroadcastConfig, PusherCredentials};
use tally_core::TrackedOptions;
use tally_stream::{OAuthCredentials, ReconnectPolicy};

use crate::error::ConfigError;

/// Env file looked for when `--env-file` is not given.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Command-line interface.
#[derive(Debug, Clone, Parser)]
#[command(name = "tally-server", version, about = "Live keyword tally service")]
pub struct Cli {
    /// Comma-separated options to track (2 or 3).
    #[arg(long, env = "TALLY_OPTIONS", default_value = "Messi,Suarez,Trump")]
    pub options: String,

    /// Address the query server binds to.
    #[arg(long, env = "TALLY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the query server listens on.
    #[arg(long, env = "TALLY_HTTP_PORT", default_value_t = tally_api::server::DEFAULT_PORT)]
    pub http_port: u16,

    /// Time between broadcasts.
    #[arg(long, env = "TALLY_BROADCAST_INTERVAL", default_value = "3s", value_parser = humantime::parse_duration)]
    pub broadcast_interval: Duration,

    /// Broadcast channel name.
    #[arg(long, env = "TALLY_CHANNEL", default_value = tally_broadcast::broadcaster::DEFAULT_CHANNEL)]
    pub channel: String,

    /// Broadcast event name.
    #[arg(long, env = "TALLY_EVENT", default_value = tally_broadcast::broadcaster::DEFAULT_EVENT)]
    pub event: String,

    /// Pause before retrying a failed publish.
    #[arg(long, env = "TALLY_PUBLISH_RETRY_BACKOFF", default_value = "250ms", value_parser = humantime::parse_duration)]
    pub publish_retry_backoff: Duration,

    /// Reconnect attempts without an event in between before the consumer gives up.
    #[arg(long, env = "TALLY_RECONNECT_MAX_RETRIES", default_value_t = tally_stream::policy::DEFAULT_MAX_RETRIES)]
    pub reconnect_max_retries: u32,

    /// Delay before the first reconnect attempt.
    #[arg(long, env = "TALLY_RECONNECT_INITIAL_BACKOFF", default_value = "1s", value_parser = humantime::parse_duration)]
    pub reconnect_initial_backoff: Duration,

    /// Upper bound on the reconnect delay.
    #[arg(long, env = "TALLY_RECONNECT_MAX_BACKOFF", default_value = "60s", value_parser = humantime::parse_duration)]
    pub reconnect_max_backoff: Duration,

    /// Silence on the stream after which it counts as stalled.
    #[arg(long, env = "TALLY_STALL_TIMEOUT", default_value = "90s", value_parser = humantime::parse_duration)]
    pub stall_timeout: Duration,

    /// How long shutdown waits for tasks to finish.
    #[arg(long, env = "TALLY_SHUTDOWN_GRACE", default_value = "10s", value_parser = humantime::parse_duration)]
    pub shutdown_grace: Duration,

    /// Env file with credentials. Without this flag `.env` is loaded if present.
    #[arg(long, env = "TALLY_ENV_FILE")]
    pub env_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TALLY_LOG_JSON")]
    pub log_json: bool,
}

/// Load the env file into the process environment.
///
/// Variables already set are not overridden. Returns the path that was
/// loaded, or `None` if the default file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::EnvFile`] if an explicitly requested file cannot
/// be loaded, or the default file exists but is malformed.
pub fn load_env_file(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    match explicit {
        Some(path) => dotenvy::from_path(path)
            .map(|()| Some(path.to_path_buf()))
            .map_err(|e| ConfigError::EnvFile {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        None => match dotenvy::from_filename(DEFAULT_ENV_FILE) {
            Ok(path) => Ok(Some(path)),
            Err(e) if e.not_found() => Ok(None),
            Err(e) => Err(ConfigError::EnvFile {
                path: DEFAULT_ENV_FILE.to_owned(),
                message: e.to_string(),
            }),
        },
    }
}

/// Fully validated configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Options to track.
    pub options: TrackedOptions,
    /// Query server listen address.
    pub server: ServerConfig,
    /// Broadcast loop settings.
    pub broadcast: BroadcastConfig,
    /// Reconnect policy for the stream consumer.
    pub reconnect: ReconnectPolicy,
    /// Stall timeout for the filtered stream.
    pub stall_timeout: Duration,
    /// Shutdown grace period.
    pub shutdown_grace: Duration,
    /// Pusher credentials.
    pub pusher: PusherCredentials,
    /// Filtered stream credentials.
    pub twitter: OAuthCredentials,
}

impl AppConfig {
    /// Validate the parsed flags and read credentials from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid options, zero durations, or
    /// missing credentials.
    pub fn from_env(cli: &Cli) -> Result<Self, ConfigError> {
        Self::from_lookup(cli, |name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(cli: &Cli, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let options = TrackedOptions::parse_delimited(&cli.options)?;

        let env_var = |name: &'static str| -> Result<String, ConfigError> {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnv { name })
        };

        let pusher = PusherCredentials {
            app_id: env_var("PUSHER_APP_ID")?,
            key: env_var("PUSHER_APP_KEY")?,
            secret: env_var("PUSHER_APP_SECRET")?,
            cluster: env_var("PUSHER_APP_CLUSTER")?,
            secure: parse_flag("PUSHER_APP_SECURE", lookup("PUSHER_APP_SECURE").as_deref())?,
        };

        let twitter = OAuthCredentials {
            consumer_key: env_var("TWITTER_CONSUMER_KEY")?,
            consumer_secret: env_var("TWITTER_CONSUMER_SECRET")?,
            access_token: env_var("TWITTER_ACCESS_TOKEN")?,
            access_secret: env_var("TWITTER_ACCESS_SECRET")?,
        };

        let broadcast_interval = positive("broadcast interval", cli.broadcast_interval)?;
        let stall_timeout = positive("stall timeout", cli.stall_timeout)?;
        let initial_backoff = positive("reconnect initial backoff", cli.reconnect_initial_backoff)?;
        if cli.reconnect_max_backoff < initial_backoff {
            return Err(ConfigError::Invalid {
                name: "reconnect max backoff",
                message: "must not be shorter than the initial backoff".to_owned(),
            });
        }

        Ok(Self {
            options,
            server: ServerConfig {
                host: cli.host.clone(),
                port: cli.http_port,
            },
            broadcast: BroadcastConfig {
                interval: broadcast_interval,
                channel: non_empty("channel", &cli.channel)?,
                event: non_empty("event", &cli.event)?,
                retry_backoff: cli.publish_retry_backoff,
            },
            reconnect: ReconnectPolicy {
                max_retries: cli.reconnect_max_retries,
                initial_backoff,
                max_backoff: cli.reconnect_max_backoff,
            },
            stall_timeout,
            shutdown_grace: cli.shutdown_grace,
            pusher,
            twitter,
        })
    }
}

fn positive(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            name,
            message: "must be greater than zero".to_owned(),
        });
    }
    Ok(value)
}

fn non_empty(name: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::Invalid {
            name,
            message: "must not be empty".to_owned(),
        });
    }
    Ok(value.to_owned())
}

/// Parse a boolean environment flag. Unset or empty means `false`.
fn parse_flag(name: &'static str, raw: Option<&str>) -> Result<bool, ConfigError> {
    match raw.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
        None | Some("" | "0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some(other) => Err(ConfigError::Invalid {
            name,
            message: format!("expected 1/true or 0/false, got {other:?}"),
        }),
    }
}
