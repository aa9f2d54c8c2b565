use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

pub const LISTEN_PORT_VAR: &str = "LISTEN_PORT";
pub const BACKEND_PORT_VAR: &str = "BACKEND_PORT";
pub const SERVICE_NAME_VAR: &str = "SERVICE_NAME";
pub const BACKEND_ENDPOINTS_VAR: &str = "BACKEND_ENDPOINTS";
pub const REQUEST_RATE_VAR: &str = "REQUEST_RATE";
pub const POD_NAME_VAR: &str = "POD_NAME";
pub const LIFETIME_VAR: &str = "LIFETIME";
pub const NUM_THREADS_VAR: &str = "NUM_THREADS";

pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_BACKEND_PORT: u16 = 80;
pub const DEFAULT_SERVICE_NAME: &str = "Unknown server";
pub const DEFAULT_REQUEST_RATE: f64 = 1.0;

/// Slowest accepted rate: about one request every eleven and a half days.
pub const MIN_REQUEST_RATE: f64 = 1e-6;

/// Seconds of sends the derived in-flight bound covers. Longer than a stalled
/// TCP connect, so one blackholed endpoint cannot use up every permit.
pub const SEND_WINDOW_SECS: f64 = 300.0;

/// Largest in-flight bound a tokio semaphore can hold.
pub const MAX_NUM_THREADS: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Process configuration, resolved once at startup and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen_port: u16,
    pub backend_port: u16,
    pub service_name: String,
    /// Hostnames that receive generated traffic, in round-robin order.
    pub backend_endpoints: Vec<String>,
    /// Requests per second. Always finite and positive.
    pub request_rate: f64,
    /// Sent to peers in the identity header. Empty when unset.
    pub pod_name: String,
    /// Raw lifetime string; parsed by the lifetime controller.
    pub lifetime: Option<String>,
    /// Upper bound on outbound sends in flight at once. At least 1.
    pub num_threads: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            backend_port: DEFAULT_BACKEND_PORT,
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            backend_endpoints: Vec::new(),
            request_rate: DEFAULT_REQUEST_RATE,
            pod_name: String::new(),
            lifetime: None,
            num_threads: derived_num_threads(DEFAULT_REQUEST_RATE),
        }
    }
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    ///
    /// Every field is logged along with where its value came from. Values that
    /// fail to parse are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        let listen_port = resolve(
            LISTEN_PORT_VAR,
            "Listening port",
            var(LISTEN_PORT_VAR),
            DEFAULT_LISTEN_PORT,
            parse_value::<u16>,
        );
        let backend_port = resolve(
            BACKEND_PORT_VAR,
            "Backend port",
            var(BACKEND_PORT_VAR),
            DEFAULT_BACKEND_PORT,
            parse_value::<u16>,
        );

        let service_name = match var(SERVICE_NAME_VAR) {
            Some(name) => {
                log::info!("Server name: {name}");
                name
            }
            None => {
                log::info!(
                    "{SERVICE_NAME_VAR} env var is not set. Server name is set to {DEFAULT_SERVICE_NAME}"
                );
                DEFAULT_SERVICE_NAME.to_owned()
            }
        };

        let backend_endpoints = parse_endpoints(&lookup(BACKEND_ENDPOINTS_VAR).unwrap_or_default());
        log::info!("Backend endpoints: {backend_endpoints:?}");

        let request_rate = resolve(
            REQUEST_RATE_VAR,
            "Request rate (requests per second)",
            var(REQUEST_RATE_VAR),
            DEFAULT_REQUEST_RATE,
            parse_rate,
        );

        let pod_name = match var(POD_NAME_VAR) {
            Some(name) => {
                log::info!("Pod name: {name}");
                name
            }
            None => {
                log::info!("{POD_NAME_VAR} env var is not set. Pod name is empty");
                String::new()
            }
        };

        let lifetime = var(LIFETIME_VAR);
        match &lifetime {
            Some(lifetime) => log::info!("Lifetime: {lifetime}"),
            None => log::info!("{LIFETIME_VAR} env var is not set. Lifetime is empty"),
        }

        let num_threads = resolve(
            NUM_THREADS_VAR,
            "Concurrent sends",
            var(NUM_THREADS_VAR),
            derived_num_threads(request_rate),
            parse_num_threads,
        );

        Self {
            listen_port,
            backend_port,
            service_name,
            backend_endpoints,
            request_rate,
            pod_name,
            lifetime,
            num_threads,
        }
    }
}

/// Splits a comma separated list, trimming each token and dropping empty ones.
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

/// In-flight bound used when `NUM_THREADS` is not set: every send of the last
/// [`SEND_WINDOW_SECS`] may still be pending.
pub fn derived_num_threads(request_rate: f64) -> usize {
    // float to int casts saturate, NaN becomes 0
    ((request_rate * SEND_WINDOW_SECS).ceil() as usize).clamp(1, MAX_NUM_THREADS)
}

fn resolve<T, P>(var: &'static str, label: &str, raw: Option<String>, default: T, parse: P) -> T
where
    T: Display + Copy,
    P: Fn(&'static str, &str) -> Result<T, ConfigError>,
{
    let Some(raw) = raw else {
        log::info!("{var} env var is not set. {label} will be set to {default}");
        return default;
    };

    match parse(var, &raw) {
        Ok(value) => {
            log::info!("{label}: {value}");
            value
        }
        Err(err) => {
            log::warn!("{err}. {label} will be set to {default}");
            default
        }
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse::<T>().map_err(|err| ConfigError {
        var,
        value: raw.to_owned(),
        reason: err.to_string(),
    })
}

fn parse_rate(var: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let rate = parse_value::<f64>(var, raw)?;
    if !rate.is_finite() || rate < MIN_REQUEST_RATE {
        return Err(ConfigError {
            var,
            value: raw.to_owned(),
            reason: format!("must be a number no lower than {MIN_REQUEST_RATE}"),
        });
    }
    Ok(rate)
}

fn parse_num_threads(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match parse_value::<usize>(var, raw)? {
        0 => Err(ConfigError {
            var,
            value: raw.to_owned(),
            reason: "must be at least 1".to_owned(),
        }),
        n if n > MAX_NUM_THREADS => {
            log::warn!("{var} value {n} is above the limit, using {MAX_NUM_THREADS}");
            Ok(MAX_NUM_THREADS)
        }
        n => Ok(n),
    }
}
