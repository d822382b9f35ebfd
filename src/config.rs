//! Runtime settings and their environment overrides.
use super::error::LedgerError;
use chrono_tz::Tz;

pub const TIMEZONE_VAR: &str = "STOCK_LEDGER_TZ";
pub const MAX_ATTEMPTS_VAR: &str = "STOCK_LEDGER_MAX_ATTEMPTS";

/// Runtime settings shared by the engine and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Reference timezone business dates are anchored to.
    pub timezone: Tz,
    /// Upper bound on executions of one material's unit of work before a
    /// conflict is surfaced as [`LedgerError::Contention`].
    pub max_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            max_attempts: 8,
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_timezone(mut self, name: &str) -> Result<Self, LedgerError> {
        self.timezone = name
            .parse()
            .map_err(|_| LedgerError::Config(format!("unknown timezone {name:?}")))?;
        Ok(self)
    }
    pub fn set_max_attempts(mut self, attempts: u32) -> Result<Self, LedgerError> {
        if attempts == 0 {
            return Err(LedgerError::Config("max_attempts must be at least 1".into()));
        }
        self.max_attempts = attempts;
        Ok(self)
    }
    /// Defaults overridden by `STOCK_LEDGER_TZ` and `STOCK_LEDGER_MAX_ATTEMPTS`
    /// when they are set.
    pub fn from_env() -> Result<Self, LedgerError> {
        let mut config = Self::default();
        if let Ok(tz) = std::env::var(TIMEZONE_VAR) {
            config = config.set_timezone(&tz)?;
        }
        if let Ok(raw) = std::env::var(MAX_ATTEMPTS_VAR) {
            let attempts = raw
                .parse()
                .map_err(|_| LedgerError::Config(format!("{MAX_ATTEMPTS_VAR}={raw:?} is not a number")))?;
            config = config.set_max_attempts(attempts)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iana_names() {
        let config = LedgerConfig::new().set_timezone("America/Sao_Paulo").unwrap();
        assert_eq!(config.timezone, chrono_tz::America::Sao_Paulo);
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(matches!(
            LedgerConfig::new().set_timezone("Mars/Olympus"),
            Err(LedgerError::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_attempts() {
        assert!(LedgerConfig::new().set_max_attempts(0).is_err());
    }
}
