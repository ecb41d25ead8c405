//! Random purchase-event generator.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::{DEFAULT_SKU_LENGTH, SourceConfig};
use crate::error::SourceError;

use super::{Event, EventSource};

/// Regions the generator draws from.
pub const REGIONS: [&str; 5] = ["us", "eu", "apac", "latam", "africa"];

const SKU_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_USER_ID: i64 = 100_000;

/// Generates an endless (or `limit`-bounded) stream of random events.
pub struct SyntheticSource {
    rng: StdRng,
    limit: Option<u64>,
    emitted: u64,
    throttle: Option<Interval>,
}

impl SyntheticSource {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            limit: None,
            emitted: 0,
            throttle: None,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        let mut source = Self::new(config.seed);
        source.limit = config.limit;
        if let Some(rate) = config.events_per_sec {
            source = source.with_rate(rate);
        }
        source
    }

    /// Stop after `limit` events.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Emit at most `events_per_sec` events per second. Zero disables throttling.
    pub fn with_rate(mut self, events_per_sec: u64) -> Self {
        self.throttle = (events_per_sec > 0).then(|| {
            let mut interval =
                tokio::time::interval(Duration::from_secs_f64(1.0 / events_per_sec as f64));
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            interval
        });
        self
    }

    fn generate(&mut self) -> Event {
        let sku = (0..DEFAULT_SKU_LENGTH)
            .map(|_| SKU_ALPHABET[self.rng.random_range(0..SKU_ALPHABET.len())] as char)
            .collect();

        Event {
            timestamp: Utc::now().timestamp(),
            user_id: self.rng.random_range(1..=MAX_USER_ID),
            region: REGIONS[self.rng.random_range(0..REGIONS.len())].to_string(),
            amount: self.rng.random::<f64>() * 100.0,
            sku,
        }
    }
}

#[async_trait]
impl EventSource for SyntheticSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.limit.is_some_and(|limit| self.emitted >= limit) {
            return Ok(None);
        }
        if let Some(throttle) = self.throttle.as_mut() {
            throttle.tick().await;
        }
        self.emitted += 1;
        Ok(Some(self.generate()))
    }

    fn describe(&self) -> String {
        match self.limit {
            Some(limit) => format!("synthetic generator ({limit} events)"),
            None => "synthetic generator".to_string(),
        }
    }
}
