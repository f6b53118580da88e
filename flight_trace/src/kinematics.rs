//! Velocity and acceleration from a calibrated altitude trace.
//!
//! Two differencing schemes are available and are always selected explicitly
//! through [`DerivativeStrategy`]. Samples a scheme cannot define (incomplete
//! smoothing windows, the lead-in of the periodic difference) are `None`
//! rather than zero or NaN.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_SMOOTHING_WINDOW: usize = 10;
pub const DEFAULT_PERIOD_SAMPLES: usize = 20;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "id", content = "params")]
pub enum DerivativeStrategy {
    #[serde(rename = "central_difference_smoothed")]
    CentralDifferenceSmoothed { smoothing_window: usize },
    #[serde(rename = "periodic_difference")]
    PeriodicDifference { period_samples: usize },
}

impl Default for DerivativeStrategy {
    fn default() -> Self {
        DerivativeStrategy::CentralDifferenceSmoothed {
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
        }
    }
}

impl DerivativeStrategy {
    pub fn id(&self) -> &'static str {
        match self {
            DerivativeStrategy::CentralDifferenceSmoothed { .. } => "central_difference_smoothed",
            DerivativeStrategy::PeriodicDifference { .. } => "periodic_difference",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DerivativeStrategy::CentralDifferenceSmoothed { .. } => "Central difference (smoothed)",
            DerivativeStrategy::PeriodicDifference { .. } => "Periodic difference",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DerivativeStrategy::CentralDifferenceSmoothed { .. } => {
                "Gradient of altitude and of velocity, acceleration smoothed by a centred moving average."
            }
            DerivativeStrategy::PeriodicDifference { .. } => {
                "Backward difference over a fixed number of samples, applied twice."
            }
        }
    }

    /// Shortest series for which the strategy defines any output.
    pub fn min_samples(&self) -> usize {
        match *self {
            DerivativeStrategy::CentralDifferenceSmoothed { smoothing_window } => {
                smoothing_window.max(2)
            }
            DerivativeStrategy::PeriodicDifference { period_samples } => 2 * period_samples,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivativeStatus {
    Complete,
    InsufficientData { required: usize, available: usize },
}

impl DerivativeStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, DerivativeStatus::Complete)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Kinematics {
    pub strategy: DerivativeStrategy,
    pub velocity_m_s: Vec<Option<f64>>,
    pub acceleration_m_s2: Vec<Option<f64>>,
    pub status: DerivativeStatus,
}

/// Derive velocity and acceleration with sample spacing `dt` seconds.
///
/// Both output series have the length of `altitude`. A series shorter than
/// [`DerivativeStrategy::min_samples`] yields all-missing outputs and an
/// [`DerivativeStatus::InsufficientData`] status.
pub fn derive_kinematics(altitude: &[f64], dt: f64, strategy: &DerivativeStrategy) -> Kinematics {
    let n = altitude.len();
    let required = strategy.min_samples();
    if n < required {
        warn!(
            strategy = strategy.id(),
            required,
            available = n,
            "insufficient data for derivative"
        );
        return Kinematics {
            strategy: strategy.clone(),
            velocity_m_s: vec![None; n],
            acceleration_m_s2: vec![None; n],
            status: DerivativeStatus::InsufficientData {
                required,
                available: n,
            },
        };
    }

    let (velocity_m_s, acceleration_m_s2) = match *strategy {
        DerivativeStrategy::CentralDifferenceSmoothed { smoothing_window } => {
            let velocity = gradient(altitude, dt);
            let acceleration = gradient(&velocity, dt);
            (
                velocity.into_iter().map(Some).collect(),
                centered_moving_average(&acceleration, smoothing_window),
            )
        }
        DerivativeStrategy::PeriodicDifference { period_samples } => {
            let altitude: Vec<Option<f64>> = altitude.iter().copied().map(Some).collect();
            let velocity = periodic_difference(&altitude, period_samples, dt);
            let acceleration = periodic_difference(&velocity, period_samples, dt);
            (velocity, acceleration)
        }
    };

    debug!(
        strategy = strategy.id(),
        samples = n,
        defined_acceleration = acceleration_m_s2.iter().flatten().count(),
        "kinematics derived"
    );

    Kinematics {
        strategy: strategy.clone(),
        velocity_m_s,
        acceleration_m_s2,
        status: DerivativeStatus::Complete,
    }
}

/// Second-order central differences in the interior, first-order one-sided
/// differences at both ends. Fewer than two samples give an empty result.
pub fn gradient(values: &[f64], dt: f64) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(n);
    out.push((values[1] - values[0]) / dt);
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / (2.0 * dt));
    }
    out.push((values[n - 1] - values[n - 2]) / dt);
    out
}

/// Centred moving average. Index `i` averages `[i - window/2, i + (window-1)/2]`,
/// so even windows lean one sample towards the past. Indices without a full
/// window are `None`.
pub fn centered_moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if window == 0 || values.len() < window {
        return out;
    }
    let lead = window / 2;
    for (k, slice) in ArrayView1::from(values).windows(window).into_iter().enumerate() {
        out[k + lead] = slice.mean();
    }
    out
}

/// `(x[i] - x[i - period]) / (period * dt)`; missing where either operand is
/// missing or `i < period`.
pub fn periodic_difference(values: &[Option<f64>], period: usize, dt: f64) -> Vec<Option<f64>> {
    let span = period as f64 * dt;
    (0..values.len())
        .map(|i| {
            let back = i.checked_sub(period)?;
            Some((values[i]? - values[back]?) / span)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.05;

    fn defined(series: &[Option<f64>]) -> Vec<usize> {
        series
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|_| i))
            .collect()
    }

    #[test]
    fn gradient_matches_edge_and_interior_rules() {
        let values = [0.0, 1.0, 4.0, 9.0, 16.0];
        let g = gradient(&values, 1.0);
        assert_eq!(g, vec![1.0, 2.0, 4.0, 6.0, 7.0]);
        assert!(gradient(&[3.0], 1.0).is_empty());
    }

    #[test]
    fn constant_velocity_has_zero_acceleration() {
        let altitude: Vec<f64> = (0..60).map(|i| 4.0 * i as f64 * DT).collect();
        let k = derive_kinematics(&altitude, DT, &DerivativeStrategy::default());
        assert!(k.status.is_complete());
        for v in k.velocity_m_s.iter().flatten() {
            assert!((v - 4.0).abs() < 1e-9);
        }
        for a in k.acceleration_m_s2.iter().flatten() {
            assert!(a.abs() < 1e-9);
        }
    }

    #[test]
    fn smoothing_leaves_five_leading_and_four_trailing_gaps() {
        let altitude: Vec<f64> = (0..40).map(|i| (i as f64 * DT).powi(2)).collect();
        let k = derive_kinematics(&altitude, DT, &DerivativeStrategy::default());
        assert!(k.velocity_m_s.iter().all(Option::is_some));
        let idx = defined(&k.acceleration_m_s2);
        assert_eq!(idx.first(), Some(&5));
        assert_eq!(idx.last(), Some(&35));
        assert_eq!(idx.len(), 31);
    }

    #[test]
    fn odd_window_is_symmetric() {
        let values: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let avg = centered_moving_average(&values, 3);
        assert_eq!(avg[0], None);
        assert_eq!(avg[1], Some(1.0));
        assert_eq!(avg[5], Some(5.0));
        assert_eq!(avg[6], None);
    }

    #[test]
    fn periodic_lead_in_doubles_for_acceleration() {
        let altitude: Vec<f64> = (0..100).map(|i| (i as f64 * DT).powi(2)).collect();
        let strategy = DerivativeStrategy::PeriodicDifference { period_samples: 20 };
        let k = derive_kinematics(&altitude, DT, &strategy);
        assert_eq!(defined(&k.velocity_m_s).first(), Some(&20));
        assert_eq!(defined(&k.acceleration_m_s2).first(), Some(&40));
        // t^2 has constant second derivative 2.
        for a in k.acceleration_m_s2.iter().flatten() {
            assert!((a - 2.0).abs() < 1e-9, "got {a}");
        }
    }

    #[test]
    fn integrating_periodic_velocity_recovers_altitude() {
        let period = 20;
        let strategy = DerivativeStrategy::PeriodicDifference {
            period_samples: period,
        };

        // A ramp is reconstructed exactly up to a constant offset.
        let ramp: Vec<f64> = (0..200).map(|i| 3.0 + 0.5 * i as f64).collect();
        let k = derive_kinematics(&ramp, DT, &strategy);
        let offsets = integrated_offsets(&ramp, &k.velocity_m_s);
        let ramp_spread = spread(&offsets);
        assert!(ramp_spread < 1e-9, "ramp spread {ramp_spread}");

        // Up and down: the lag around apogee is bounded by one period of climb.
        let flight: Vec<f64> = (0..200)
            .map(|i| if i < 100 { 0.5 * i as f64 } else { 0.5 * (200 - i) as f64 })
            .collect();
        let k = derive_kinematics(&flight, DT, &strategy);
        let offsets = integrated_offsets(&flight, &k.velocity_m_s);
        let flight_spread = spread(&offsets);
        assert!(
            flight_spread <= 0.5 * period as f64,
            "flight spread {flight_spread}"
        );
    }

    fn integrated_offsets(altitude: &[f64], velocity: &[Option<f64>]) -> Vec<f64> {
        let mut sum = 0.0;
        let mut offsets = Vec::new();
        for (a, v) in altitude.iter().zip(velocity) {
            if let Some(v) = v {
                sum += v * DT;
                offsets.push(a - sum);
            }
        }
        offsets
    }

    fn spread(values: &[f64]) -> f64 {
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        max - min
    }

    #[test]
    fn short_series_reports_insufficient_data() {
        let altitude = vec![1.0; 39];
        let strategy = DerivativeStrategy::PeriodicDifference { period_samples: 20 };
        let k = derive_kinematics(&altitude, DT, &strategy);
        assert_eq!(
            k.status,
            DerivativeStatus::InsufficientData {
                required: 40,
                available: 39
            }
        );
        assert_eq!(k.velocity_m_s.len(), 39);
        assert!(k.velocity_m_s.iter().all(Option::is_none));

        let k = derive_kinematics(&altitude[..9], DT, &DerivativeStrategy::default());
        assert!(!k.status.is_complete());
        assert!(k.acceleration_m_s2.iter().all(Option::is_none));
    }

    #[test]
    fn strategy_serializes_with_id_and_params() {
        let strategy = DerivativeStrategy::PeriodicDifference { period_samples: 20 };
        let json = serde_json::to_string(&strategy).unwrap();
        assert_eq!(json, r#"{"id":"periodic_difference","params":{"period_samples":20}}"#);
        let back: DerivativeStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
        assert_eq!(back.id(), "periodic_difference");
        assert_eq!(DerivativeStrategy::default().min_samples(), 10);
    }
}
