use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub public_rps: u32,
    pub staff_rps: u32,
    pub event_rps_per_user: u32,
    pub grace_period_minutes: i64,
    pub late_submission_policy: LateSubmissionPolicy,
    pub grading_sweep_seconds: u64,
    pub log_format: LogFormat,
}

/// What `submit()` does with an attempt that ran past `duration + grace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LateSubmissionPolicy {
    #[default]
    Accept,
    Flag,
    Reject,
}

impl FromStr for LateSubmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "flag" => Ok(Self::Flag),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown late submission policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            public_rps: get_env_parse_or("PUBLIC_RPS", 50)?,
            staff_rps: get_env_parse_or("STAFF_RPS", 50)?,
            event_rps_per_user: get_env_parse_or("EVENT_RPS_PER_USER", 20)?,
            grace_period_minutes: get_env_parse_or("GRACE_PERIOD_MINUTES", 2)?,
            late_submission_policy: get_env_parse_or(
                "LATE_SUBMISSION_POLICY",
                LateSubmissionPolicy::Accept,
            )?,
            grading_sweep_seconds: get_env_parse_or("GRADING_SWEEP_SECONDS", 60)?,
            log_format: get_env_parse_or("LOG_FORMAT", LogFormat::Text)?,
        })
    }

    /// Settings for in-process use (tests, local tooling) where nothing is read from the environment.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            server_address: "127.0.0.1:0".to_string(),
            database_url: String::new(),
            jwt_secret: jwt_secret.to_string(),
            public_rps: 1_000,
            staff_rps: 1_000,
            event_rps_per_user: 1_000,
            grace_period_minutes: 2,
            late_submission_policy: LateSubmissionPolicy::Accept,
            grading_sweep_seconds: 60,
            log_format: LogFormat::Text,
        }
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_late_policy_case_insensitively() {
        assert_eq!("Reject".parse::<LateSubmissionPolicy>(), Ok(LateSubmissionPolicy::Reject));
        assert_eq!(" flag ".parse::<LateSubmissionPolicy>(), Ok(LateSubmissionPolicy::Flag));
        assert!("ignore".parse::<LateSubmissionPolicy>().is_err());
    }

    #[test]
    fn parses_log_format() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
