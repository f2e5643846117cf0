//! Synthetic readings for when no device is around.
//!
//! Values follow a bounded random walk: a per-field trend is picked and held
//! for a while, and small noise is added on top of it each step.
//! Consecutive readings therefore look like a slowly drifting physical process
//! instead of independent noise.

use std::ops::RangeInclusive;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::reading::{Reading, WaterLevel};

/// Valid pH range for synthetic values.
pub const PH_RANGE: RangeInclusive<f64> = 4.0..=9.0;
/// Valid temperature range (°C) for synthetic values.
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 15.0..=35.0;
/// Valid TDS range (ppm) for synthetic values.
pub const TDS_RANGE: RangeInclusive<f64> = 200.0..=1500.0;

/// Largest pH trend per emission.
pub const PH_TREND: f64 = 0.05;
/// Largest pH noise per emission.
pub const PH_NOISE: f64 = 0.02;

const TEMPERATURE_TREND: f64 = 0.1;
const TEMPERATURE_NOISE: f64 = 0.05;
const TDS_TREND: f64 = 5.0;
const TDS_NOISE: f64 = 2.0;

/// How many emissions a trend is kept for.
const TREND_SPAN: RangeInclusive<u32> = 10..=30;

/// Minimum emissions between water level changes.
pub const LEVEL_COOLDOWN: u32 = 50;

/// Once the cooldown passed, the chance per emission of the level moving.
const LEVEL_CHANGE_PROBABILITY: f64 = 0.2;

/// The largest difference between two consecutive emitted pH values.
/// Emitted values are rounded, which may add up to a hundredth.
pub const PH_STEP_LIMIT: f64 = PH_TREND + PH_NOISE + 0.01;

#[derive(Debug, Clone, Copy, Default)]
struct Trend {
    ph: f64,
    temperature: f64,
    tds: f64,
}

impl Trend {
    fn roll(rng: &mut StdRng) -> Self {
        Self {
            ph: rng.gen_range(-PH_TREND..=PH_TREND),
            temperature: rng.gen_range(-TEMPERATURE_TREND..=TEMPERATURE_TREND),
            tds: rng.gen_range(-TDS_TREND..=TDS_TREND),
        }
    }
}

fn drift(rng: &mut StdRng, value: f64, trend: f64, noise: f64, range: &RangeInclusive<f64>) -> f64 {
    let next = value + trend + rng.gen_range(-noise..=noise);
    next.clamp(*range.start(), *range.end())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// An endless source of plausible readings.
///
/// Iterating never returns `None`.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
    seed: Option<u64>,
    rng: StdRng,

    ph: f64,
    temperature: f64,
    tds: f64,
    water_level: WaterLevel,

    trend: Trend,
    trend_left: u32,
    since_level_change: u32,
}

impl Default for SyntheticGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticGenerator {
    /// A generator seeded from entropy.
    pub fn new() -> Self {
        Self::with_rng(None, StdRng::from_entropy())
    }

    /// A generator which always produces the same sequence for the same seed.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(Some(seed), StdRng::seed_from_u64(seed))
    }

    fn with_rng(seed: Option<u64>, rng: StdRng) -> Self {
        Self {
            seed,
            rng,
            ph: 6.5,
            temperature: 23.0,
            tds: 650.0,
            water_level: WaterLevel::Medium,
            trend: Trend::default(),
            trend_left: 0,
            since_level_change: 0,
        }
    }

    /// Start over from the initial state.
    /// A seeded generator repeats its sequence from the beginning.
    pub fn restart(&mut self) {
        *self = match self.seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::new(),
        };
    }

    /// Produce the next reading.
    pub fn next_reading(&mut self) -> Reading {
        if self.trend_left == 0 {
            self.trend = Trend::roll(&mut self.rng);
            self.trend_left = self.rng.gen_range(TREND_SPAN);
        }
        self.trend_left -= 1;

        let rng = &mut self.rng;
        self.ph = drift(rng, self.ph, self.trend.ph, PH_NOISE, &PH_RANGE);
        self.temperature = drift(
            rng,
            self.temperature,
            self.trend.temperature,
            TEMPERATURE_NOISE,
            &TEMPERATURE_RANGE,
        );
        self.tds = drift(rng, self.tds, self.trend.tds, TDS_NOISE, &TDS_RANGE);

        self.since_level_change += 1;
        if self.since_level_change >= LEVEL_COOLDOWN && rng.gen_bool(LEVEL_CHANGE_PROBABILITY) {
            let up = rng.gen_bool(0.5);
            self.water_level = self.water_level.step(up);
            self.since_level_change = 0;
        }

        Reading {
            ph: round2(self.ph),
            temperature: round2(self.temperature),
            water_level: self.water_level.clone(),
            tds: self.tds.round() as i64,
        }
    }
}

impl Iterator for SyntheticGenerator {
    type Item = Reading;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_reading())
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn ph_is_a_bounded_random_walk() {
        let readings = SyntheticGenerator::new().take(10_000).collect::<Vec<_>>();

        for reading in &readings {
            assert!(PH_RANGE.contains(&reading.ph), "{reading}");
        }

        for (previous, next) in readings.iter().tuple_windows() {
            let step = (next.ph - previous.ph).abs();
            assert!(
                step <= PH_STEP_LIMIT + 1e-9,
                "step {step} from {previous} to {next}"
            );
        }
    }

    #[test]
    fn other_fields_stay_in_range() {
        for reading in SyntheticGenerator::with_seed(7).take(10_000) {
            assert!(TEMPERATURE_RANGE.contains(&reading.temperature), "{reading}");
            assert!(
                TDS_RANGE.contains(&(reading.tds as f64)),
                "{reading}"
            );
            assert!(matches!(
                reading.water_level,
                WaterLevel::Low | WaterLevel::Medium | WaterLevel::High
            ));
        }
    }

    #[test]
    fn water_level_changes_are_rare_and_single_steps() {
        let readings = SyntheticGenerator::with_seed(1234).take(10_000).collect_vec();

        let mut last_change = 0;
        let mut changes = 0;

        for (index, (previous, next)) in readings.iter().tuple_windows().enumerate() {
            if previous.water_level == next.water_level {
                continue;
            }

            changes += 1;
            if changes > 1 {
                assert!(index - last_change >= LEVEL_COOLDOWN as usize);
            }
            last_change = index;

            let one_step = previous.water_level.step(true) == next.water_level
                || previous.water_level.step(false) == next.water_level;
            assert!(one_step);
        }

        assert!(changes > 0, "10k readings should see the level move at least once");
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = SyntheticGenerator::with_seed(42).take(100).collect_vec();
        let b = SyntheticGenerator::with_seed(42).take(100).collect_vec();

        assert_eq!(a, b);
    }

    #[test]
    fn restart_repeats_seeded_sequence() {
        let mut generator = SyntheticGenerator::with_seed(3);
        let first = generator.by_ref().take(20).collect_vec();

        generator.restart();
        let again = generator.take(20).collect_vec();

        assert_eq!(first, again);
    }

    #[test]
    fn consecutive_readings_are_correlated() {
        // Independent noise over the full range would jump by whole units regularly.
        let readings = SyntheticGenerator::with_seed(99).take(1000).collect_vec();

        let largest_temperature_step = readings
            .iter()
            .tuple_windows()
            .map(|(a, b)| (a.temperature - b.temperature).abs())
            .fold(0.0, f64::max);

        assert!(largest_temperature_step <= TEMPERATURE_TREND + TEMPERATURE_NOISE + 0.01 + 1e-9);
    }
}
