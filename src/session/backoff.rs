//! Reconnect backoff.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
///
/// The jitter is derived from the attempt number so many devices dropping
/// together do not reconnect in lockstep, while a single device's schedule
/// stays reproducible. The result never exceeds `max_delay`.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let max = config.max_delay().as_secs_f64();
    let base = config.initial_delay().as_secs_f64() * 2.0_f64.powi(attempt.min(30) as i32);
    let capped = base.min(max);

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).clamp(0.0, max);

    Duration::from_secs_f64(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            ..ReconnectConfig::default()
        }
    }

    #[test]
    fn test_backoff_grows() {
        let config = config();
        let d0 = calculate_backoff(0, &config);
        let d3 = calculate_backoff(3, &config);
        assert_eq!(d0, Duration::from_secs(1));
        assert!(d3 > Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_capped() {
        let config = config();
        for attempt in 0..100 {
            assert!(calculate_backoff(attempt, &config) <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_backoff_deterministic() {
        let config = config();
        assert_eq!(calculate_backoff(5, &config), calculate_backoff(5, &config));
    }
}
