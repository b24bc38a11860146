use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::types::DetectionError;

/// How a redelivered `externalEventId` is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeliveryPolicy {
    /// Run the decision again as a fresh observation
    Reprocess,
    /// Return `duplicate_event` without touching sessions, guests or tokens
    Ignore,
}

impl FromStr for RedeliveryPolicy {
    type Err = DetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reprocess" => Ok(RedeliveryPolicy::Reprocess),
            "ignore" => Ok(RedeliveryPolicy::Ignore),
            other => Err(DetectionError::ConfigError(format!(
                "REDELIVERY_POLICY must be 'reprocess' or 'ignore', got '{}'",
                other
            ))),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a guest may stay pending (default: 30 minutes)
    pub guest_confirmation_window: chrono::Duration,

    /// Lifetime of a registration token (default: 24 hours)
    pub registration_token_lifetime: chrono::Duration,

    /// Organization assumed when a detection carries none
    pub default_organization_id: Uuid,

    /// Treatment of redelivered events (default: reprocess)
    pub redelivery_policy: RedeliveryPolicy,

    /// Upper bound for one decision against the stores (default: 10 seconds)
    pub store_timeout: Duration,

    /// Upper bound for one email send (default: 15 seconds)
    pub notifier_timeout: Duration,

    /// How often overdue guests are expired (default: 60 seconds)
    pub guest_sweep_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            guest_confirmation_window: chrono::Duration::minutes(30),
            registration_token_lifetime: chrono::Duration::hours(24),
            default_organization_id: Uuid::nil(),
            redelivery_policy: RedeliveryPolicy::Reprocess,
            store_timeout: Duration::from_secs(10),
            notifier_timeout: Duration::from_secs(15),
            guest_sweep_interval: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Reads overrides from the environment, falling back to the defaults
    pub fn from_env() -> Result<Self, DetectionError> {
        let defaults = Self::default();

        let window_minutes: i64 = env_or(
            "GUEST_CONFIRMATION_WINDOW_MINUTES",
            defaults.guest_confirmation_window.num_minutes(),
        )?;
        let token_hours: i64 = env_or(
            "REGISTRATION_TOKEN_LIFETIME_HOURS",
            defaults.registration_token_lifetime.num_hours(),
        )?;
        let sweep_secs: u64 = env_or(
            "GUEST_SWEEP_INTERVAL_SECS",
            defaults.guest_sweep_interval.as_secs(),
        )?;
        if sweep_secs == 0 {
            return Err(DetectionError::ConfigError(
                "GUEST_SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        Ok(Self {
            guest_confirmation_window: positive_span(
                "GUEST_CONFIRMATION_WINDOW_MINUTES",
                window_minutes,
                chrono::Duration::try_minutes,
            )?,
            registration_token_lifetime: positive_span(
                "REGISTRATION_TOKEN_LIFETIME_HOURS",
                token_hours,
                chrono::Duration::try_hours,
            )?,
            default_organization_id: env_or(
                "DEFAULT_ORGANIZATION_ID",
                defaults.default_organization_id,
            )?,
            redelivery_policy: env_or("REDELIVERY_POLICY", defaults.redelivery_policy)?,
            store_timeout: Duration::from_secs(env_or(
                "STORE_TIMEOUT_SECS",
                defaults.store_timeout.as_secs(),
            )?),
            notifier_timeout: Duration::from_secs(env_or(
                "NOTIFIER_TIMEOUT_SECS",
                defaults.notifier_timeout.as_secs(),
            )?),
            guest_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

/// Converts a configured amount into a span, rejecting zero, negatives and overflow
fn positive_span(
    name: &str,
    amount: i64,
    to_span: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration, DetectionError> {
    if amount <= 0 {
        return Err(DetectionError::ConfigError(format!("{} must be positive", name)));
    }
    to_span(amount)
        .ok_or_else(|| DetectionError::ConfigError(format!("{} is out of range: {}", name, amount)))
}

fn env_or<T>(name: &str, default: T) -> Result<T, DetectionError>
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DetectionError::ConfigError(format!("Invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.guest_confirmation_window, chrono::Duration::minutes(30));
        assert_eq!(config.registration_token_lifetime, chrono::Duration::hours(24));
        assert_eq!(config.redelivery_policy, RedeliveryPolicy::Reprocess);
    }

    #[test]
    fn test_redelivery_policy_parsing() {
        assert_eq!(
            " Ignore ".parse::<RedeliveryPolicy>().unwrap(),
            RedeliveryPolicy::Ignore
        );
        assert_eq!(
            "reprocess".parse::<RedeliveryPolicy>().unwrap(),
            RedeliveryPolicy::Reprocess
        );
        assert!("drop".parse::<RedeliveryPolicy>().is_err());
    }

    #[test]
    fn test_spans_reject_non_positive_and_overflow() {
        assert_eq!(
            positive_span("W", 45, chrono::Duration::try_minutes).unwrap(),
            chrono::Duration::minutes(45)
        );
        assert!(matches!(
            positive_span("W", 0, chrono::Duration::try_minutes),
            Err(DetectionError::ConfigError(_))
        ));
        assert!(matches!(
            positive_span("W", -5, chrono::Duration::try_hours),
            Err(DetectionError::ConfigError(_))
        ));
        assert!(matches!(
            positive_span("W", i64::MAX, chrono::Duration::try_minutes),
            Err(DetectionError::ConfigError(_))
        ));
        assert!(matches!(
            positive_span("W", i64::MAX / 1000, chrono::Duration::try_hours),
            Err(DetectionError::ConfigError(_))
        ));
    }
}
