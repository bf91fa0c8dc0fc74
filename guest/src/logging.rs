//! Tracing setup driven by the `VMLITE_LOG_LEVEL` environment variable.

use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use vmlite_shared::{VmliteError, VmliteResult};

pub const LOG_LEVEL_ENV: &str = "VMLITE_LOG_LEVEL";

/// Parse a log level name (case-insensitive). Unknown values are an error:
/// the agent fails fast rather than booting with a level the operator did
/// not ask for.
pub fn parse_level(value: &str) -> VmliteResult<LevelFilter> {
    LevelFilter::from_str(value.trim()).map_err(|_| {
        VmliteError::Config(format!(
            "unknown log level {value:?} (expected off, error, warn, info, debug or trace)"
        ))
    })
}

/// Resolve the level from the environment; absent means `info`.
pub fn level_from_env() -> VmliteResult<LevelFilter> {
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(value) => parse_level(&value),
        Err(std::env::VarError::NotPresent) => Ok(LevelFilter::INFO),
        Err(err) => Err(VmliteError::Config(format!("{LOG_LEVEL_ENV}: {err}"))),
    }
}

/// Install the global subscriber. The guest console is the only sink.
pub fn init(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_levels_case_insensitively() {
        assert_eq!(parse_level("off").unwrap(), LevelFilter::OFF);
        assert_eq!(parse_level("ERROR").unwrap(), LevelFilter::ERROR);
        assert_eq!(parse_level("Warn").unwrap(), LevelFilter::WARN);
        assert_eq!(parse_level("info").unwrap(), LevelFilter::INFO);
        assert_eq!(parse_level("DEBUG").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("trace").unwrap(), LevelFilter::TRACE);
    }

    #[test]
    fn rejects_unknown_levels() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
    }
}
