//! Synthetic sector KPI generator.
//!
//! Each sector gets a fixed province, a jittered location near the province
//! centre and a baseline load. Every tick produces one sample per sector:
//!
//! - `payload` = baseline + 20·sin(t/60 + i mod 7) + N(0, 5), at least 1
//! - `thr`     = payload / (10 + U(0,1)·5), at least 0.1
//! - `prb`     = 40 + (payload mod 60)·0.5 + N(0, 4), clamped to [1, 99.9]
//! - `avail`   = 99.9 − |N(0, 0.4)|, at least 90

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::time::Duration;

use super::{BatchSource, SourceEvent};
use crate::config::SimulatorConfig;
use crate::types::{Batch, Sample};

/// Province name and approximate centre (lat, lon).
pub const PROVINCES: [(&str, f64, f64); 11] = [
    ("Tehran", 35.7, 51.4),
    ("Isfahan", 32.65, 51.67),
    ("Fars", 29.6, 52.5),
    ("Khorasan", 36.3, 59.6),
    ("East Azerbaijan", 38.1, 46.3),
    ("West Azerbaijan", 37.6, 45.0),
    ("Mazandaran", 36.5, 52.3),
    ("Gilan", 37.3, 49.6),
    ("Kerman", 30.3, 57.1),
    ("Hormozgan", 27.2, 56.3),
    ("Sistan-Baluchestan", 28.6, 61.0),
];

const LOCATION_JITTER_DEG: f64 = 0.4;

struct Sector {
    id: String,
    province: &'static str,
    lat: f64,
    lon: f64,
    baseline: f64,
}

pub struct KpiSimulator {
    sectors: Vec<Sector>,
    rng: StdRng,
    /// Simulated seconds since start, drives the diurnal-ish sine
    t: f64,
    interval: Duration,
    yielded_first: bool,
}

impl KpiSimulator {
    pub fn new(config: &SimulatorConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let sectors = (0..config.sectors)
            .map(|i| {
                let (province, lat, lon) = PROVINCES[i % PROVINCES.len()];
                Sector {
                    id: format!("IR_SECT_{:04}", i),
                    province,
                    lat: round_to(lat + rng.gen_range(-LOCATION_JITTER_DEG..LOCATION_JITTER_DEG), 4),
                    lon: round_to(lon + rng.gen_range(-LOCATION_JITTER_DEG..LOCATION_JITTER_DEG), 4),
                    baseline: baseline_for_sector(i),
                }
            })
            .collect();

        Self {
            sectors,
            rng,
            t: 0.0,
            interval: config.interval(),
            yielded_first: false,
        }
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Produce the next tick's batch without sleeping.
    #[allow(clippy::cast_precision_loss)]
    pub fn generate_batch(&mut self) -> Batch {
        let timestamp = Utc::now();
        let mut batch = Vec::with_capacity(self.sectors.len());

        for (idx, sector) in self.sectors.iter().enumerate() {
            let phase = (idx % 7) as f64;
            let noise: f64 = self.rng.sample::<f64, _>(StandardNormal) * 5.0;
            let payload = (sector.baseline + 20.0 * (self.t / 60.0 + phase).sin() + noise).max(1.0);

            let thr = (payload / (10.0 + self.rng.gen::<f64>() * 5.0)).max(0.1);

            let prb_noise: f64 = self.rng.sample::<f64, _>(StandardNormal) * 4.0;
            let prb = (40.0 + (payload % 60.0) * 0.5 + prb_noise).clamp(1.0, 99.9);

            let avail_noise: f64 = self.rng.sample::<f64, _>(StandardNormal) * 0.4;
            let avail = (99.9 - avail_noise.abs()).max(90.0);

            batch.push(
                Sample::new(sector.id.clone(), timestamp)
                    .with_field("province", sector.province)
                    .with_field("lat", sector.lat)
                    .with_field("lon", sector.lon)
                    .with_field("payload", round_to(payload, 3))
                    .with_field("thr", round_to(thr, 3))
                    .with_field("prb", round_to(prb, 3))
                    .with_field("avail", round_to(avail, 3)),
            );
        }

        self.t += self.interval.as_secs_f64();
        batch
    }
}

#[async_trait]
impl BatchSource for KpiSimulator {
    async fn next_batch(&mut self) -> Result<SourceEvent> {
        if self.yielded_first && !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        self.yielded_first = true;
        Ok(SourceEvent::Batch(self.generate_batch()))
    }

    fn source_name(&self) -> &str {
        "simulator"
    }
}

#[allow(clippy::cast_precision_loss)]
fn baseline_for_sector(idx: usize) -> f64 {
    100.0 + (idx % 50) as f64 * 2.0
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}
