use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cli::Cli;
use crate::jobs::TaskIntervals;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://monitor.db?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const MAX_EXPIRY_WARNING_DAYS: i64 = 3_650;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub sweep_interval_seconds: u64,
    pub expiry_refresh_interval_seconds: u64,
    pub expiry_warning_interval_seconds: u64,
    pub heartbeat_check_interval_seconds: u64,
    pub http_timeout_seconds: u64,
    pub tls_timeout_seconds: u64,
    pub whois_timeout_seconds: u64,
    pub expiry_warning_days: i64,
    pub max_in_flight_checks: Option<usize>,
    pub scheduler_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Missing keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_in_flight_checks = match lookup("MAX_IN_FLIGHT_CHECKS") {
            Some(raw) => Some(parse_value::<usize>("MAX_IN_FLIGHT_CHECKS", &raw)?),
            None => None,
        };

        let config = Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            sweep_interval_seconds: number(&lookup, "SWEEP_INTERVAL_SECONDS", 30)?,
            expiry_refresh_interval_seconds: number(
                &lookup,
                "EXPIRY_REFRESH_INTERVAL_SECONDS",
                86_400,
            )?,
            expiry_warning_interval_seconds: number(
                &lookup,
                "EXPIRY_WARNING_INTERVAL_SECONDS",
                3_600,
            )?,
            heartbeat_check_interval_seconds: number(
                &lookup,
                "HEARTBEAT_CHECK_INTERVAL_SECONDS",
                120,
            )?,
            http_timeout_seconds: number(&lookup, "HTTP_TIMEOUT_SECONDS", 5)?,
            tls_timeout_seconds: number(&lookup, "TLS_TIMEOUT_SECONDS", 5)?,
            whois_timeout_seconds: number(&lookup, "WHOIS_TIMEOUT_SECONDS", 8)?,
            expiry_warning_days: number(&lookup, "EXPIRY_WARNING_DAYS", 30)?,
            max_in_flight_checks,
            scheduler_enabled: true,
        };
        config.validate()?;
        Ok(config)
    }

    /// Command-line flags take precedence over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(bind) = &cli.bind {
            self.bind_addr = bind.clone();
        }
        if let Some(seconds) = cli.sweep_interval {
            self.sweep_interval_seconds = seconds;
        }
        if let Some(seconds) = cli.http_timeout {
            self.http_timeout_seconds = seconds;
        }
        if cli.no_scheduler {
            self.scheduler_enabled = false;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("SWEEP_INTERVAL_SECONDS", self.sweep_interval_seconds),
            ("EXPIRY_REFRESH_INTERVAL_SECONDS", self.expiry_refresh_interval_seconds),
            ("EXPIRY_WARNING_INTERVAL_SECONDS", self.expiry_warning_interval_seconds),
            ("HEARTBEAT_CHECK_INTERVAL_SECONDS", self.heartbeat_check_interval_seconds),
            ("HTTP_TIMEOUT_SECONDS", self.http_timeout_seconds),
            ("TLS_TIMEOUT_SECONDS", self.tls_timeout_seconds),
            ("WHOIS_TIMEOUT_SECONDS", self.whois_timeout_seconds),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(format!("{} must be greater than zero", name));
        }
        if !(1..=MAX_EXPIRY_WARNING_DAYS).contains(&self.expiry_warning_days) {
            return Err(format!(
                "EXPIRY_WARNING_DAYS must be between 1 and {}",
                MAX_EXPIRY_WARNING_DAYS
            ));
        }
        if self.max_in_flight_checks == Some(0) {
            return Err("MAX_IN_FLIGHT_CHECKS must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn task_intervals(&self) -> TaskIntervals {
        TaskIntervals {
            monitoring_sweep: Duration::from_secs(self.sweep_interval_seconds),
            refresh_expiries: Duration::from_secs(self.expiry_refresh_interval_seconds),
            expiry_warnings: Duration::from_secs(self.expiry_warning_interval_seconds),
            heartbeat_check: Duration::from_secs(self.heartbeat_check_interval_seconds),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn tls_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_timeout_seconds)
    }

    pub fn whois_timeout(&self) -> Duration {
        Duration::from_secs(self.whois_timeout_seconds)
    }
}

fn number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, String>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("{} must be a valid number", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use clap::Parser;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.sweep_interval_seconds, 30);
        assert_eq!(config.expiry_refresh_interval_seconds, 86_400);
        assert_eq!(config.heartbeat_check_interval_seconds, 120);
        assert_eq!(config.whois_timeout(), Duration::from_secs(8));
        assert_eq!(config.expiry_warning_days, 30);
        assert!(config.max_in_flight_checks.is_none());
        assert!(config.scheduler_enabled);
    }

    #[test]
    fn env_values_override_defaults() {
        let config = from_pairs(&[
            ("SWEEP_INTERVAL_SECONDS", "10"),
            ("MAX_IN_FLIGHT_CHECKS", "16"),
            ("DATABASE_URL", "sqlite::memory:"),
        ])
        .unwrap();
        assert_eq!(config.sweep_interval_seconds, 10);
        assert_eq!(config.max_in_flight_checks, Some(16));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.task_intervals().monitoring_sweep, Duration::from_secs(10));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = from_pairs(&[("HTTP_TIMEOUT_SECONDS", "soon")]).unwrap_err();
        assert_eq!(err, "HTTP_TIMEOUT_SECONDS must be a valid number");
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = from_pairs(&[("SWEEP_INTERVAL_SECONDS", "0")]).unwrap_err();
        assert!(err.contains("SWEEP_INTERVAL_SECONDS"));
    }

    #[test]
    fn warning_days_outside_range_are_rejected() {
        for raw in ["0", "-5", "100000000"] {
            let err = from_pairs(&[("EXPIRY_WARNING_DAYS", raw)]).unwrap_err();
            assert_eq!(err, "EXPIRY_WARNING_DAYS must be between 1 and 3650");
        }
        let config = from_pairs(&[("EXPIRY_WARNING_DAYS", "3650")]).unwrap();
        assert_eq!(config.expiry_warning_days, 3_650);
    }

    #[test]
    fn cli_wins_over_env() {
        let config = from_pairs(&[("SWEEP_INTERVAL_SECONDS", "10")]).unwrap();
        let cli = Cli::parse_from([
            "service-monitor",
            "--sweep-interval",
            "45",
            "--bind",
            "127.0.0.1:9000",
            "--no-scheduler",
        ]);

        let config = config.apply_cli(&cli).unwrap();

        assert_eq!(config.sweep_interval_seconds, 45);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert!(!config.scheduler_enabled);
    }
}
