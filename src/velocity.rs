//! Arrival-rate estimation for feeds and playlists.
//!
//! Velocity is expressed in entries per day. Internally the estimator keeps an
//! exponential moving average of inter-arrival gaps; the persisted velocity is
//! enough to recover that mean as `86400 / velocity`.

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy)]
pub struct VelocityPolicy {
    pub alpha: f64,
    pub max_velocity: f64,
    pub min_interval: Duration,
}

impl Default for VelocityPolicy {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            max_velocity: 100.0,
            min_interval: Duration::seconds(60),
        }
    }
}

impl VelocityPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            alpha: config.velocity_alpha,
            max_velocity: config.max_velocity,
            ..Self::default()
        }
    }

    /// Folds newly observed arrival times into the previous velocity.
    ///
    /// Arrivals at or before `last_arrival` are ignored. When nothing new
    /// arrived and the silence since `last_arrival` exceeds the current mean
    /// gap, the silence itself counts as one observation.
    pub fn estimate(
        &self,
        previous: f64,
        last_arrival: Option<DateTime<Utc>>,
        arrivals: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> f64 {
        let mut mean = (previous.is_finite() && previous > 0.0).then(|| SECONDS_PER_DAY / previous);
        let mut cursor = last_arrival;
        let mut observed = false;

        let mut sorted = arrivals.to_vec();
        sorted.sort();

        for arrival in sorted {
            if let Some(last) = cursor {
                if arrival <= last {
                    continue;
                }
                let gap = self.gap_seconds(arrival - last);
                mean = Some(self.fold(mean, gap));
                observed = true;
            }
            cursor = Some(arrival);
        }

        if !observed {
            if let (Some(current), Some(last)) = (mean, cursor) {
                let silence = self.gap_seconds(now - last);
                if silence > current {
                    mean = Some(self.fold(mean, silence));
                }
            }
        }

        let velocity = mean.map(|m| SECONDS_PER_DAY / m).unwrap_or(0.0);
        if velocity.is_finite() {
            velocity.clamp(0.0, self.max_velocity)
        } else {
            0.0
        }
    }

    fn gap_seconds(&self, gap: Duration) -> f64 {
        gap.max(self.min_interval).num_milliseconds() as f64 / 1000.0
    }

    fn fold(&self, mean: Option<f64>, sample: f64) -> f64 {
        match mean {
            Some(m) => self.alpha * sample + (1.0 - self.alpha) * m,
            None => sample,
        }
    }
}

/// Spreads `count` arrivals evenly over `(since, now]`.
pub fn spread_arrivals(since: DateTime<Utc>, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    if count == 0 || now <= since {
        return Vec::new();
    }
    let window = (now - since).num_milliseconds();
    (1..=count as i64)
        .map(|i| since + Duration::milliseconds(window * i / count as i64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn every(step: Duration, n: i64) -> Vec<DateTime<Utc>> {
        (0..n).map(|i| start() + step * i as i32).collect()
    }

    #[test]
    fn test_daily_feed_is_slower_than_busy_feed() {
        let policy = VelocityPolicy::default();

        let daily = every(Duration::days(1), 10);
        let busy = every(Duration::minutes(72), 200);

        let slow = policy.estimate(0.0, None, &daily, *daily.last().unwrap());
        let fast = policy.estimate(0.0, None, &busy, *busy.last().unwrap());

        assert!((slow - 1.0).abs() < 0.01, "daily velocity was {slow}");
        assert!((fast - 20.0).abs() < 0.1, "busy velocity was {fast}");
        assert!(slow < fast);
    }

    /// Crawls once an hour, feeding each estimate into the next crawl.
    fn crawl_hourly(policy: &VelocityPolicy, published: &[DateTime<Utc>], hours: i64) -> Vec<f64> {
        let mut velocity = 0.0;
        let mut last_arrival = None;
        let mut previous_crawl = start() - Duration::hours(1);
        let mut history = Vec::new();

        for hour in 0..hours {
            let now = start() + Duration::hours(hour);
            let arrivals: Vec<_> = published
                .iter()
                .copied()
                .filter(|p| *p > previous_crawl && *p <= now)
                .collect();
            velocity = policy.estimate(velocity, last_arrival, &arrivals, now);
            last_arrival = arrivals.iter().copied().chain(last_arrival).max();
            previous_crawl = now;
            history.push(velocity);
        }
        history
    }

    #[test]
    fn test_hourly_crawls_rank_daily_below_busy() {
        let policy = VelocityPolicy::default();
        let daily: Vec<_> = every(Duration::days(1), 14)
            .into_iter()
            .map(|p| p + Duration::hours(12))
            .collect();
        let busy = every(Duration::hours(2), 14 * 12);

        let slow = crawl_hourly(&policy, &daily, 14 * 24);
        let fast = crawl_hourly(&policy, &busy, 14 * 24);

        for v in slow.iter().chain(&fast) {
            assert!(v.is_finite() && *v >= 0.0);
        }
        let (slow, fast) = (*slow.last().unwrap(), *fast.last().unwrap());
        assert!((slow - 1.0).abs() < 0.05, "daily velocity was {slow}");
        assert!((fast - 12.0).abs() < 0.5, "busy velocity was {fast}");
        assert!(slow < fast);
    }

    #[test]
    fn test_hourly_crawls_decay_after_feed_goes_quiet() {
        let policy = VelocityPolicy::default();
        let published = every(Duration::hours(2), 3 * 12);
        let history = crawl_hourly(&policy, &published, 7 * 24);

        let active = history[3 * 24 - 1];
        let quiet = &history[3 * 24 - 1..];
        assert!(quiet.windows(2).all(|w| w[1] <= w[0]));
        let last = *history.last().unwrap();
        assert!(last < active / 2.0, "velocity {last} did not decay from {active}");
        assert!(last > 0.0);
    }

    #[test]
    fn test_velocity_never_negative() {
        let policy = VelocityPolicy::default();
        assert_eq!(policy.estimate(0.0, None, &[], start()), 0.0);
        assert_eq!(policy.estimate(-5.0, Some(start()), &[], start()), 0.0);

        // Arrivals older than the last one are ignored rather than producing negative gaps.
        let stale = vec![start() - Duration::days(3)];
        let v = policy.estimate(2.0, Some(start()), &stale, start() + Duration::hours(1));
        assert!(v >= 0.0);
        assert!((v - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_burst_is_capped() {
        let policy = VelocityPolicy::default();
        let burst = every(Duration::seconds(1), 50);
        let v = policy.estimate(0.0, None, &burst, *burst.last().unwrap());
        assert_eq!(v, policy.max_velocity);
    }

    #[test]
    fn test_silence_decays_velocity() {
        let policy = VelocityPolicy::default();
        let last = start();
        let v = policy.estimate(10.0, Some(last), &[], last + Duration::days(3));
        assert!(v < 10.0);
        assert!(v > 0.0);
    }

    #[test]
    fn test_short_silence_keeps_velocity() {
        let policy = VelocityPolicy::default();
        let last = start();
        let v = policy.estimate(10.0, Some(last), &[], last + Duration::hours(1));
        assert!((v - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_spread_arrivals_fills_window_evenly() {
        let now = start() + Duration::hours(3);
        let arrivals = spread_arrivals(start(), now, 3);
        assert_eq!(
            arrivals,
            vec![
                start() + Duration::hours(1),
                start() + Duration::hours(2),
                start() + Duration::hours(3)
            ]
        );
        assert!(spread_arrivals(start(), now, 0).is_empty());
        assert!(spread_arrivals(now, start(), 4).is_empty());
    }
}
