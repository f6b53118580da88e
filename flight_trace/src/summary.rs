use serde::{Deserialize, Serialize};

use crate::kinematics::{DerivativeStatus, Kinematics};
use crate::FlightSeries;

pub const FEET_PER_METER: f64 = 3.28084;

/// Scalar statistics of the windowed flight.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub max_altitude_m: f64,
    pub max_altitude_ft: f64,
    /// `None` when no velocity sample is defined.
    pub max_velocity_m_s: Option<f64>,
    pub max_acceleration_m_s2: Option<f64>,
    pub flight_duration_s: f64,
    pub apogee_time_s: f64,
    pub derivative_status: DerivativeStatus,
}

pub fn summarize(series: &FlightSeries, kinematics: &Kinematics) -> Summary {
    let (apogee_pos, max_altitude_m) = series
        .altitude_m
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        });
    let apogee_time_s = series.time_s.get(apogee_pos).copied().unwrap_or(0.0);

    Summary {
        max_altitude_m,
        max_altitude_ft: max_altitude_m * FEET_PER_METER,
        max_velocity_m_s: max_defined(&kinematics.velocity_m_s),
        max_acceleration_m_s2: max_defined(&kinematics.acceleration_m_s2),
        flight_duration_s: series.duration_s(),
        apogee_time_s,
        derivative_status: kinematics.status.clone(),
    }
}

fn max_defined(values: &[Option<f64>]) -> Option<f64> {
    values.iter().flatten().copied().reduce(f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::DerivativeStrategy;

    fn series(altitude: &[f64]) -> FlightSeries {
        let time: Vec<f64> = (0..altitude.len()).map(|i| i as f64 * 0.05).collect();
        FlightSeries::new(time, altitude.to_vec())
    }

    #[test]
    fn maxima_skip_missing_samples() {
        let s = series(&[0.0, 3.0, 10.0, 4.0]);
        let kinematics = Kinematics {
            strategy: DerivativeStrategy::default(),
            velocity_m_s: vec![None, Some(2.0), Some(-1.0), None],
            acceleration_m_s2: vec![None, None, Some(-9.0), Some(-12.0)],
            status: DerivativeStatus::Complete,
        };
        let summary = summarize(&s, &kinematics);
        assert_eq!(summary.max_altitude_m, 10.0);
        assert!((summary.max_altitude_ft - 32.8084).abs() < 1e-9);
        assert_eq!(summary.max_velocity_m_s, Some(2.0));
        assert_eq!(summary.max_acceleration_m_s2, Some(-9.0));
        assert!((summary.flight_duration_s - 0.15).abs() < 1e-12);
        assert!((summary.apogee_time_s - 0.1).abs() < 1e-12);
    }

    #[test]
    fn all_missing_derivatives_stay_missing() {
        let s = series(&[0.0, 1.0]);
        let kinematics = Kinematics {
            strategy: DerivativeStrategy::PeriodicDifference { period_samples: 20 },
            velocity_m_s: vec![None, None],
            acceleration_m_s2: vec![None, None],
            status: DerivativeStatus::InsufficientData {
                required: 40,
                available: 2,
            },
        };
        let summary = summarize(&s, &kinematics);
        assert_eq!(summary.max_velocity_m_s, None);
        assert_eq!(summary.max_acceleration_m_s2, None);
        assert!(!summary.derivative_status.is_complete());
    }
}
