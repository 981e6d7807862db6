//! Controller configuration.
//!
//! All settings come from environment variables and are read once at startup.

use crate::error::ControllerError;
use cluster_client::{ConnectionSettings, LogOptions};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 60;

/// Runtime configuration of the Pod Logs Controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespaces to watch, one watcher each
    pub namespaces: Vec<String>,
    pub connection: ConnectionSettings,
    pub log: LogOptions,
    /// Stop after this long; run until Ctrl-C when `None`
    pub run_for: Option<Duration>,
    pub watch_backoff_min_secs: u64,
    pub watch_backoff_max_secs: u64,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let namespaces: Vec<String> = value("WATCH_NAMESPACE")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|ns| !ns.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| vec![DEFAULT_NAMESPACE.to_string()]);
        if namespaces.is_empty() {
            return Err(ControllerError::InvalidConfig(
                "WATCH_NAMESPACE must name at least one namespace".to_string(),
            ));
        }

        let connection = ConnectionSettings {
            kubeconfig: value("KUBECONFIG_FILE").map(PathBuf::from),
            context: value("KUBE_CONTEXT"),
            label_selector: value("POD_LABEL_SELECTOR"),
        };

        let log = LogOptions {
            container: value("LOG_CONTAINER"),
            follow: parse_bool("LOG_FOLLOW", value("LOG_FOLLOW"))?.unwrap_or(true),
            tail_lines: parse("LOG_TAIL_LINES", value("LOG_TAIL_LINES"))?,
            since_seconds: parse("LOG_SINCE_SECONDS", value("LOG_SINCE_SECONDS"))?,
            timestamps: parse_bool("LOG_TIMESTAMPS", value("LOG_TIMESTAMPS"))?.unwrap_or(false),
        };

        let run_for = parse::<u64>("RUN_DURATION_SECS", value("RUN_DURATION_SECS"))?
            .map(Duration::from_secs);

        let watch_backoff_min_secs = parse("WATCH_BACKOFF_MIN_SECS", value("WATCH_BACKOFF_MIN_SECS"))?
            .unwrap_or(DEFAULT_BACKOFF_MIN_SECS);
        let watch_backoff_max_secs = parse("WATCH_BACKOFF_MAX_SECS", value("WATCH_BACKOFF_MAX_SECS"))?
            .unwrap_or(DEFAULT_BACKOFF_MAX_SECS);
        if watch_backoff_min_secs == 0 || watch_backoff_min_secs > watch_backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "watch backoff must satisfy 0 < min <= max (got {}..{})",
                watch_backoff_min_secs, watch_backoff_max_secs
            )));
        }

        Ok(Self {
            namespaces,
            connection,
            log,
            run_for,
            watch_backoff_min_secs,
            watch_backoff_max_secs,
        })
    }
}

fn parse<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, ControllerError> {
    raw.map(|v| {
        v.parse::<T>().map_err(|_| {
            ControllerError::InvalidConfig(format!("{} has an invalid value: {}", key, v))
        })
    })
    .transpose()
}

fn parse_bool(key: &str, raw: Option<String>) -> Result<Option<bool>, ControllerError> {
    raw.map(|v| match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ControllerError::InvalidConfig(format!(
            "{} must be a boolean, got {}",
            key, v
        ))),
    })
    .transpose()
}
