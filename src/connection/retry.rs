//! Reconnect backoff (§4.2, §6 `ReconnectConfig`).
//!
//! Adapted from the teacher's `retry.rs`: same exponential-backoff shape
//! (`initial * multiplier^attempt`, capped at `max`), but jitter here is
//! the spec's single symmetric envelope — `delay * (1 ± jitter_factor)` —
//! rather than the teacher's `JitterMode` enum of AWS-style strategies.

use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// Compute the delay before reconnect attempt `attempt` (1-based).
///
/// `base = initial_delay * backoff_multiplier^(attempt - 1)`, capped at
/// `max_delay`, then jittered by `± jitter_factor` of itself.
pub fn backoff_delay(cfg: &ReconnectConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let multiplier = cfg.backoff_multiplier.powi(exponent);
    let base_secs = (cfg.initial_delay.as_secs_f64() * multiplier).min(cfg.max_delay.as_secs_f64());

    let jitter_factor = cfg.jitter_factor.clamp(0.0, 1.0);
    let jittered_secs = if jitter_factor == 0.0 {
        base_secs
    } else {
        let offset = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor);
        (base_secs * (1.0 + offset)).max(0.0)
    };

    Duration::from_secs_f64(jittered_secs)
}

/// Whether a reconnect attempt count is still within policy.
/// `max_attempts == 0` means unlimited.
pub fn should_retry(cfg: &ReconnectConfig, attempt: u32) -> bool {
    cfg.enabled && (cfg.max_attempts == 0 || attempt < cfg.max_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            reset_interval: Duration::from_secs(300),
        }
    }

    #[test]
    fn delay_grows_exponentially_without_jitter() {
        let cfg = cfg();
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_at_max_delay() {
        let cfg = cfg();
        let delay = backoff_delay(&cfg, 20);
        assert_eq!(delay, cfg.max_delay);
    }

    #[test]
    fn jitter_stays_within_envelope() {
        let mut cfg = cfg();
        cfg.jitter_factor = 0.1;
        for attempt in 1..=4 {
            let delay = backoff_delay(&cfg, attempt);
            let base = (cfg.initial_delay.as_secs_f64() * cfg.backoff_multiplier.powi(attempt as i32 - 1))
                .min(cfg.max_delay.as_secs_f64());
            let lower = base * 0.9;
            let upper = base * 1.1;
            let got = delay.as_secs_f64();
            assert!(got >= lower - 1e-9 && got <= upper + 1e-9, "attempt {attempt}: {got} not in [{lower}, {upper}]");
        }
    }

    #[test]
    fn unlimited_attempts_when_max_is_zero() {
        let mut cfg = cfg();
        cfg.max_attempts = 0;
        assert!(should_retry(&cfg, 10_000));
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let cfg = cfg();
        assert!(should_retry(&cfg, 4));
        assert!(!should_retry(&cfg, 5));
    }

    #[test]
    fn disabled_never_retries() {
        let mut cfg = cfg();
        cfg.enabled = false;
        assert!(!should_retry(&cfg, 0));
    }
}
