//! Ground-level estimation from the stationary parts of a raw altitude trace.
//!
//! Barometric altimeters rarely report zero on the pad: the baseline depends on
//! the pressure the device was calibrated against. The estimator looks for
//! stretches where the rolling standard deviation is small, snaps the readings
//! found there onto a grid and returns the most common grid value.

use std::collections::BTreeMap;

use ndarray::ArrayView1;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::FlightError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GroundParams {
    /// Samples per rolling standard-deviation window.
    pub window_size: usize,
    /// Leading samples ignored while the sensor settles.
    pub warmup_skip: usize,
    /// A window counts as stable when its sample std-dev is strictly below this.
    pub stability_std_m: f64,
    /// Grid spacing used to cluster stable readings.
    pub cluster_resolution_m: f64,
}

impl Default for GroundParams {
    fn default() -> Self {
        Self {
            window_size: 20,
            warmup_skip: 5,
            stability_std_m: 0.5,
            cluster_resolution_m: 0.5,
        }
    }
}

/// Estimate the resting altitude of the recording.
///
/// Ties between equally common clusters resolve to the smallest altitude.
pub fn estimate_ground_level(altitude: &[f64], params: &GroundParams) -> Result<f64, FlightError> {
    let settled = altitude.get(params.warmup_skip..).unwrap_or(&[]);
    let stable = stable_readings(settled, params.window_size, params.stability_std_m);
    let level = cluster_mode(&stable, params.cluster_resolution_m).ok_or(
        FlightError::InsufficientStableData {
            window_size: params.window_size,
            available: settled.len(),
        },
    )?;
    debug!(
        stable = stable.len(),
        settled = settled.len(),
        "ground level estimated at {:.2} m",
        level
    );
    Ok(level)
}

/// Readings whose trailing window (ending at the reading) has a sample
/// standard deviation below `threshold`. The first `window_size - 1`
/// positions have no complete window and never qualify.
fn stable_readings(series: &[f64], window_size: usize, threshold: f64) -> Vec<f64> {
    if window_size == 0 || series.len() < window_size {
        return Vec::new();
    }
    ArrayView1::from(series)
        .windows(window_size)
        .into_iter()
        .zip(&series[window_size - 1..])
        .filter_map(|(window, &reading)| (window.std(1.0) < threshold).then_some(reading))
        .collect()
}

/// Snap `value` to the nearest multiple of `resolution`, halves going to the
/// even multiple.
pub fn round_to_resolution(value: f64, resolution: f64) -> f64 {
    (value / resolution).round_ties_even() * resolution
}

fn cluster_mode(values: &[f64], resolution: f64) -> Option<f64> {
    let mut counts: BTreeMap<OrderedFloat<f64>, usize> = BTreeMap::new();
    for &value in values {
        *counts
            .entry(OrderedFloat(round_to_resolution(value, resolution)))
            .or_insert(0) += 1;
    }
    // Ascending iteration plus a strict comparison keeps the smallest value on ties.
    let mut best: Option<(f64, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value.into_inner(), count));
        }
    }
    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(base: f64, n: usize, amplitude: f64) -> Vec<f64> {
        (0..n)
            .map(|i| base + if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn flat_run_after_warmup_is_ground() {
        let mut altitude = vec![250.0, -40.0, 3.0, 17.0, 99.0];
        altitude.extend(std::iter::repeat(12.3).take(25));
        altitude.extend((0..40).map(|i| 12.3 + i as f64 * 3.0));
        let level = estimate_ground_level(&altitude, &GroundParams::default()).unwrap();
        assert!((level - 12.3).abs() <= 0.25, "got {level}");
    }

    #[test]
    fn small_noise_still_clusters() {
        let mut altitude = noisy(101.2, 60, 0.1);
        altitude.extend((0..30).map(|i| 101.2 + i as f64 * 5.0));
        let level = estimate_ground_level(&altitude, &GroundParams::default()).unwrap();
        assert_eq!(level, 101.0);
    }

    #[test]
    fn ties_pick_smallest_cluster() {
        let mut altitude = vec![0.0; 5];
        altitude.extend(std::iter::repeat(20.0).take(20));
        altitude.extend(std::iter::repeat(5.0).take(20));
        let params = GroundParams {
            window_size: 20,
            warmup_skip: 5,
            stability_std_m: 0.5,
            cluster_resolution_m: 0.5,
        };
        // One stable position at the end of each plateau: 20.0 and 5.0 both appear once.
        let level = estimate_ground_level(&altitude, &params).unwrap();
        assert_eq!(level, 5.0);
    }

    #[test]
    fn noisy_recording_is_rejected() {
        let altitude = noisy(50.0, 200, 3.0);
        let err = estimate_ground_level(&altitude, &GroundParams::default()).unwrap_err();
        assert!(matches!(
            err,
            FlightError::InsufficientStableData {
                window_size: 20,
                available: 195
            }
        ));
    }

    #[test]
    fn window_longer_than_series_is_rejected() {
        let altitude = vec![10.0; 15];
        let err = estimate_ground_level(&altitude, &GroundParams::default()).unwrap_err();
        assert!(matches!(err, FlightError::InsufficientStableData { .. }));
    }

    #[test]
    fn rounding_matches_half_even_grid() {
        assert_eq!(round_to_resolution(10.2, 0.5), 10.0);
        assert_eq!(round_to_resolution(10.3, 0.5), 10.5);
        assert_eq!(round_to_resolution(10.25, 0.5), 10.0);
        assert_eq!(round_to_resolution(10.75, 0.5), 11.0);
        assert_eq!(round_to_resolution(-0.2, 0.5), 0.0);
    }
}
