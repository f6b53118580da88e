//! Flight-log analysis for altimeter recordings.
//!
//! The pipeline drops the sensor warm-up rows, finds the resting ground level,
//! calibrates the trace against it, isolates the flight around apogee, derives
//! velocity and acceleration and reduces everything to a handful of summary
//! statistics. All stages are pure functions of their inputs and [`Params`].

use std::fmt::Write as _;

use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

pub mod ground;
pub mod kinematics;
pub mod summary;
pub mod window;

pub use ground::{estimate_ground_level, GroundParams};
pub use kinematics::{derive_kinematics, DerivativeStatus, DerivativeStrategy, Kinematics};
pub use summary::{summarize, Summary, FEET_PER_METER};
pub use window::{detect_flight_window, FlightWindow, WindowParams};

pub const TIMESTAMP_COLUMN: &str = "Timestamp";
pub const ALTITUDE_COLUMN: &str = "Altitude(m)";

/// Observed sample spacing may drift this far from the nominal period before a warning.
const PERIOD_TOLERANCE: f64 = 0.10;

#[derive(Error, Debug)]
pub enum FlightError {
    #[error("malformed input: {0}")]
    InputFormat(String),
    #[error(
        "no stable ground reference: no {window_size}-sample window among {available} settled samples is quiet enough"
    )]
    InsufficientStableData { window_size: usize, available: usize },
    #[error("flight window lasts {duration_s:.2} s, less than the {minimum_s:.2} s minimum")]
    DegenerateWindow { duration_s: f64, minimum_s: f64 },
    #[error("{strategy} needs at least {required} samples but the flight window has {available}")]
    InsufficientSeriesLength {
        strategy: &'static str,
        required: usize,
        available: usize,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub timestamp_ms: f64,
    pub altitude_m: f64,
}

/// What to do with a flight window shorter than `min_flight_duration_s`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DegeneratePolicy {
    Warn,
    Fail,
}

impl Default for DegeneratePolicy {
    fn default() -> Self {
        DegeneratePolicy::Warn
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Leading rows dropped before any analysis.
    pub warmup_rows: usize,
    /// Nominal sample spacing used for differentiation.
    pub sample_period_s: f64,
    pub ground: GroundParams,
    pub window: WindowParams,
    pub derivative: DerivativeStrategy,
    pub min_flight_duration_s: f64,
    pub degenerate_window: DegeneratePolicy,
    /// Treat a series too short for the derivative strategy as an error.
    pub strict_derivatives: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            warmup_rows: 5,
            sample_period_s: 0.05,
            ground: GroundParams::default(),
            window: WindowParams::default(),
            derivative: DerivativeStrategy::default(),
            min_flight_duration_s: 1.0,
            degenerate_window: DegeneratePolicy::Warn,
            strict_derivatives: false,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), FlightError> {
        fn positive(name: &str, value: f64) -> Result<(), FlightError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(FlightError::InvalidParameter(format!(
                    "{name} must be a positive number, got {value}"
                )))
            }
        }

        positive("sample_period_s", self.sample_period_s)?;
        positive("ground.stability_std_m", self.ground.stability_std_m)?;
        positive("ground.cluster_resolution_m", self.ground.cluster_resolution_m)?;
        if self.ground.window_size < 2 {
            return Err(FlightError::InvalidParameter(format!(
                "ground.window_size must be at least 2, got {}",
                self.ground.window_size
            )));
        }
        if !self.window.threshold_m.is_finite() {
            return Err(FlightError::InvalidParameter(
                "window.threshold_m must be finite".into(),
            ));
        }
        if !(self.min_flight_duration_s.is_finite() && self.min_flight_duration_s >= 0.0) {
            return Err(FlightError::InvalidParameter(format!(
                "min_flight_duration_s must be non-negative, got {}",
                self.min_flight_duration_s
            )));
        }
        match self.derivative {
            DerivativeStrategy::CentralDifferenceSmoothed { smoothing_window: 0 } => Err(
                FlightError::InvalidParameter("smoothing_window must be at least 1".into()),
            ),
            DerivativeStrategy::PeriodicDifference { period_samples: 0 } => Err(
                FlightError::InvalidParameter("period_samples must be at least 1".into()),
            ),
            _ => Ok(()),
        }
    }

    pub fn params_hash_sha256(&self) -> Result<String, FlightError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| FlightError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Read `Timestamp` and `Altitude(m)` from a CSV recording. Other columns are ignored.
pub fn parse_samples(input: &[u8]) -> Result<Vec<Sample>, FlightError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);
    let headers = reader
        .headers()
        .map_err(|e| FlightError::InputFormat(format!("unreadable header: {e}")))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}') == name)
            .ok_or_else(|| FlightError::InputFormat(format!("missing column `{name}`")))
    };
    let timestamp_col = column(TIMESTAMP_COLUMN)?;
    let altitude_col = column(ALTITUDE_COLUMN)?;

    let mut samples = Vec::new();
    for (row, record) in reader.records().enumerate() {
        // Header is line 1.
        let line = row + 2;
        let record = record.map_err(|e| FlightError::InputFormat(format!("line {line}: {e}")))?;
        samples.push(Sample {
            timestamp_ms: numeric_cell(&record, timestamp_col, TIMESTAMP_COLUMN, line)?,
            altitude_m: numeric_cell(&record, altitude_col, ALTITUDE_COLUMN, line)?,
        });
    }
    if samples.is_empty() {
        return Err(FlightError::InputFormat("no data rows".into()));
    }
    Ok(samples)
}

fn numeric_cell(
    record: &csv::StringRecord,
    col: usize,
    name: &str,
    line: usize,
) -> Result<f64, FlightError> {
    let raw = record.get(col).unwrap_or("");
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(FlightError::InputFormat(format!(
            "line {line}: `{name}` is not a finite number: {raw:?}"
        ))),
    }
}

/// Windowed, re-zeroed flight trace.
#[derive(Clone, Debug, PartialEq)]
pub struct FlightSeries {
    pub time_s: Array1<f64>,
    pub altitude_m: Array1<f64>,
    pub altitude_ft: Array1<f64>,
}

impl FlightSeries {
    pub fn new(time_s: Vec<f64>, altitude_m: Vec<f64>) -> Self {
        let altitude_m = Array1::from(altitude_m);
        Self {
            time_s: Array1::from(time_s),
            altitude_ft: &altitude_m * FEET_PER_METER,
            altitude_m,
        }
    }

    pub fn len(&self) -> usize {
        self.time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_s.is_empty()
    }

    pub fn duration_s(&self) -> f64 {
        let n = self.time_s.len();
        if n == 0 {
            return 0.0;
        }
        self.time_s[n - 1] - self.time_s[0]
    }
}

#[derive(Clone, Debug)]
pub struct FlightAnalysis {
    pub ground_level_m: f64,
    /// Indices into the post-warm-up series.
    pub window: FlightWindow,
    pub observed_period_s: Option<f64>,
    pub series: FlightSeries,
    pub kinematics: Kinematics,
    pub summary: Summary,
    pub params_hash: String,
}

impl FlightAnalysis {
    pub fn report(&self) -> FlightReport {
        FlightReport {
            ground_level_m: self.ground_level_m,
            window: self.window,
            summary: self.summary.clone(),
            derivative_strategy: self.kinematics.strategy.id().to_string(),
            derivative_name: self.kinematics.strategy.name().to_string(),
            observed_period_s: self.observed_period_s,
            params_hash: self.params_hash.clone(),
        }
    }
}

/// Serializable outcome of one analysis, without the per-sample series.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FlightReport {
    pub ground_level_m: f64,
    pub window: FlightWindow,
    pub summary: Summary,
    pub derivative_strategy: String,
    pub derivative_name: String,
    pub observed_period_s: Option<f64>,
    pub params_hash: String,
}

/// Median spacing of consecutive timestamps, in seconds.
pub fn median_sample_period(timestamps_ms: &[f64]) -> Option<f64> {
    let mut gaps: Vec<f64> = timestamps_ms.windows(2).map(|w| w[1] - w[0]).collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_by(|a, b| a.total_cmp(b));
    let mid = gaps.len() / 2;
    let median = if gaps.len() % 2 == 0 {
        0.5 * (gaps[mid - 1] + gaps[mid])
    } else {
        gaps[mid]
    };
    Some(median / 1000.0)
}

/// Run the full pipeline over parsed samples.
pub fn analyze_samples(samples: &[Sample], params: &Params) -> Result<FlightAnalysis, FlightError> {
    params.validate()?;

    let settled = samples
        .get(params.warmup_rows..)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| {
            FlightError::InputFormat(format!(
                "no samples left after discarding {} warm-up rows",
                params.warmup_rows
            ))
        })?;
    let timestamps: Vec<f64> = settled.iter().map(|s| s.timestamp_ms).collect();
    let altitude: Vec<f64> = settled.iter().map(|s| s.altitude_m).collect();

    let observed_period_s = median_sample_period(&timestamps);
    if let Some(observed) = observed_period_s {
        let nominal = params.sample_period_s;
        if (observed - nominal).abs() > PERIOD_TOLERANCE * nominal {
            warn!(
                "median sample spacing {:.4} s differs from the nominal {:.4} s; derivatives use the nominal period",
                observed, nominal
            );
        }
    }

    // Warm-up rows are already gone; the estimator must not skip again.
    let ground = GroundParams {
        warmup_skip: 0,
        ..params.ground.clone()
    };
    let ground_level_m = estimate_ground_level(&altitude, &ground)?;
    let calibrated: Vec<f64> = altitude.iter().map(|a| a - ground_level_m).collect();

    let window = detect_flight_window(&calibrated, &params.window)?;
    debug!(
        start = window.start,
        end = window.end,
        apogee = window.apogee_index,
        "apogee at {:.1} m",
        window.apogee_altitude_m
    );

    let t0 = timestamps[window.start];
    let time_s: Vec<f64> = timestamps[window.start..=window.end]
        .iter()
        .map(|t| (t - t0) / 1000.0)
        .collect();
    let series = FlightSeries::new(time_s, calibrated[window.start..=window.end].to_vec());

    let duration_s = series.duration_s();
    if duration_s < params.min_flight_duration_s {
        match params.degenerate_window {
            DegeneratePolicy::Warn => warn!(
                "flight window lasts only {:.2} s (minimum {:.2} s)",
                duration_s, params.min_flight_duration_s
            ),
            DegeneratePolicy::Fail => {
                return Err(FlightError::DegenerateWindow {
                    duration_s,
                    minimum_s: params.min_flight_duration_s,
                })
            }
        }
    }

    let windowed = series.altitude_m.to_vec();
    let kinematics = derive_kinematics(&windowed, params.sample_period_s, &params.derivative);
    if params.strict_derivatives {
        if let DerivativeStatus::InsufficientData {
            required,
            available,
        } = kinematics.status
        {
            return Err(FlightError::InsufficientSeriesLength {
                strategy: params.derivative.id(),
                required,
                available,
            });
        }
    }

    let summary = summarize(&series, &kinematics);
    Ok(FlightAnalysis {
        ground_level_m,
        window,
        observed_period_s,
        series,
        kinematics,
        summary,
        params_hash: params.params_hash_sha256()?,
    })
}

/// Parse a CSV recording and analyse it.
pub fn analyze_recording(input: &[u8], params: &Params) -> Result<FlightAnalysis, FlightError> {
    let samples = parse_samples(input)?;
    debug!(rows = samples.len(), "parsed recording");
    analyze_samples(&samples, params)
}

/// Analyse independent recordings in parallel. Results follow input order.
pub fn analyze_batch<B>(inputs: &[B], params: &Params) -> Vec<Result<FlightAnalysis, FlightError>>
where
    B: AsRef<[u8]> + Sync,
{
    inputs
        .par_iter()
        .map(|input| analyze_recording(input.as_ref(), params))
        .collect()
}
