// Simulated backing-store latency (stands in for DB query cost in demos/benchmarks)

use rand::Rng;
use std::time::Duration;

/// Artificial delay applied by the product services before answering.
///
/// Uses `tokio::time::sleep`, so tests running on a paused clock advance
/// through it instantly and deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimulatedLatency {
    #[default]
    None,
    Fixed(Duration),
    /// `base` plus a uniform random `0..=jitter`
    Jitter { base: Duration, jitter: Duration },
}

impl SimulatedLatency {
    pub fn from_millis(base_ms: u64, jitter_ms: u64) -> Self {
        match (base_ms, jitter_ms) {
            (0, 0) => SimulatedLatency::None,
            (base, 0) => SimulatedLatency::Fixed(Duration::from_millis(base)),
            (base, jitter) => SimulatedLatency::Jitter {
                base: Duration::from_millis(base),
                jitter: Duration::from_millis(jitter),
            },
        }
    }

    /// Pick the delay for one call.
    pub fn sample(&self) -> Duration {
        match *self {
            SimulatedLatency::None => Duration::ZERO,
            SimulatedLatency::Fixed(delay) => delay,
            SimulatedLatency::Jitter { base, jitter } => {
                let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
                base + Duration::from_millis(extra)
            }
        }
    }

    pub async fn wait(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_millis() {
        assert_eq!(SimulatedLatency::from_millis(0, 0), SimulatedLatency::None);
        assert_eq!(
            SimulatedLatency::from_millis(50, 0),
            SimulatedLatency::Fixed(Duration::from_millis(50))
        );
        assert!(matches!(
            SimulatedLatency::from_millis(0, 10),
            SimulatedLatency::Jitter { .. }
        ));
    }

    #[test]
    fn test_jitter_bounds() {
        let latency = SimulatedLatency::from_millis(500, 1000);
        for _ in 0..100 {
            let d = latency.sample();
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(1500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_uses_tokio_clock() {
        let start = tokio::time::Instant::now();
        SimulatedLatency::Fixed(Duration::from_millis(50)).wait().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
