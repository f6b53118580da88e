//! Flight-window detection anchored on apogee.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::FlightError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowParams {
    /// Calibrated altitude at or below which the vehicle is considered on the ground.
    pub threshold_m: f64,
    /// Samples kept before the detected launch crossing.
    pub pre_margin_samples: usize,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            threshold_m: 1.0,
            pre_margin_samples: 10,
        }
    }
}

/// Inclusive index range `[start, end]` of the flight within the calibrated series.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlightWindow {
    pub start: usize,
    pub end: usize,
    pub apogee_index: usize,
    pub apogee_altitude_m: f64,
    /// Ground crossing found walking back from apogee, before the pre-launch margin.
    pub launch_index: usize,
    /// Ground crossing found walking forward from apogee.
    pub landing_index: usize,
}

impl FlightWindow {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// Locate the flight by walking outwards from the highest sample.
///
/// Launch is the last at-or-below-threshold sample before apogee, so pad
/// noise that pokes above the threshold earlier is never the launch. The
/// landing boundary is the first crossing after apogee and gets no margin.
///
/// A trace that never rises above the threshold yields the whole series.
pub fn detect_flight_window(
    calibrated: &[f64],
    params: &WindowParams,
) -> Result<FlightWindow, FlightError> {
    let last = calibrated
        .len()
        .checked_sub(1)
        .ok_or_else(|| FlightError::InputFormat("altitude series is empty".into()))?;

    let mut apogee_index = 0;
    for (i, &value) in calibrated.iter().enumerate() {
        if value > calibrated[apogee_index] {
            apogee_index = i;
        }
    }
    let apogee_altitude_m = calibrated[apogee_index];
    let threshold = params.threshold_m;

    if apogee_altitude_m <= threshold {
        warn!(
            "peak altitude {:.2} m never exceeds the {:.2} m launch threshold; using the full recording",
            apogee_altitude_m, threshold
        );
        return Ok(FlightWindow {
            start: 0,
            end: last,
            apogee_index,
            apogee_altitude_m,
            launch_index: 0,
            landing_index: last,
        });
    }

    let launch_index = (1..=apogee_index)
        .rev()
        .find(|&i| calibrated[i] <= threshold)
        .unwrap_or(0);
    let landing_index = (apogee_index..=last)
        .find(|&i| calibrated[i] <= threshold)
        .unwrap_or(last);
    let start = launch_index.saturating_sub(params.pre_margin_samples);

    debug!(
        apogee_index,
        launch_index, landing_index, start, "flight window detected"
    );

    Ok(FlightWindow {
        start,
        end: landing_index,
        apogee_index,
        apogee_altitude_m,
        launch_index,
        landing_index,
    })
}
