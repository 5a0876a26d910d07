//! Pure backoff-delay computation for outbox retry scheduling.

use rand::Rng;
use std::time::Duration;

/// `delay(r) = clamp(base * multiplier^r, 0, max_delay) * (1 + uniform(-jitter, +jitter))`
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            multiplier: 1.6,
            jitter: 0.2,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Compute the delay before the next retry attempt, `retry_count` attempts in.
/// Jitter is applied multiplicatively after the exponential term is clamped,
/// so the returned delay never exceeds `max_delay * (1 + jitter)`.
pub fn next_delay(retry_count: u32, config: &BackoffConfig) -> Duration {
    next_delay_with_rng(retry_count, config, &mut rand::thread_rng())
}

fn next_delay_with_rng(retry_count: u32, config: &BackoffConfig, rng: &mut impl Rng) -> Duration {
    let exp = config.multiplier.powi(retry_count as i32);
    let raw = config.base.as_secs_f64() * exp;
    let clamped = raw.min(config.max_delay.as_secs_f64()).max(0.0);

    let jitter_factor = if config.jitter > 0.0 {
        1.0 + rng.gen_range(-config.jitter..=config.jitter)
    } else {
        1.0
    };

    let jittered = (clamped * jitter_factor).max(0.0);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_before_clamp() {
        let config = BackoffConfig {
            jitter: 0.0,
            ..Default::default()
        };
        let d0 = next_delay(0, &config);
        let d1 = next_delay(1, &config);
        let d2 = next_delay(2, &config);
        assert_eq!(d0, Duration::from_secs_f64(1.0));
        assert_eq!(d1, Duration::from_secs_f64(1.6));
        assert_eq!(d2, Duration::from_secs_f64(2.56));
    }

    #[test]
    fn clamps_to_max_delay() {
        let config = BackoffConfig {
            jitter: 0.0,
            ..Default::default()
        };
        let d = next_delay(20, &config);
        assert_eq!(d, config.max_delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig::default();
        for r in 0..8 {
            let d = next_delay(r, &config);
            let max_bound = config.max_delay.as_secs_f64() * (1.0 + config.jitter);
            assert!(d.as_secs_f64() <= max_bound + f64::EPSILON);
            assert!(d.as_secs_f64() >= 0.0);
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let config = BackoffConfig {
            jitter: 0.0,
            ..Default::default()
        };
        let a = next_delay(3, &config);
        let b = next_delay(3, &config);
        assert_eq!(a, b);
    }
}
