mod plot;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum, ValueHint};
use flight_trace::kinematics::{DEFAULT_PERIOD_SAMPLES, DEFAULT_SMOOTHING_WINDOW};
use flight_trace::{
    analyze_recording, DegeneratePolicy, DerivativeStrategy, FlightAnalysis, FlightReport, Params,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::plot::{render_analysis, ChartKind, INSUFFICIENT_DERIVATIVE};

#[derive(Parser, Debug)]
#[command(author, version, about = "Altimeter flight-log analyzer", long_about = None)]
struct Cli {
    /// Altimeter CSV recording with `Timestamp` and `Altitude(m)` columns
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// JSON parameter file; missing fields keep their defaults
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Differencing scheme for velocity and acceleration
    #[arg(long, value_enum)]
    derivative: Option<DerivativeOpt>,

    /// Moving-average window (samples) for the central-difference acceleration
    #[arg(long)]
    smoothing_window: Option<usize>,

    /// Lag (samples) of the periodic difference
    #[arg(long)]
    period_samples: Option<usize>,

    /// Fail on degenerate flight windows and on series too short for the derivative
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,

    /// Output PNG path (defaults to `<input stem>_analysis.png` next to the input)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Additionally render the chart as SVG
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Write a JSON report of the analysis
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Skip rendering the PNG chart
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Enable verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum DerivativeOpt {
    Central,
    Periodic,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and succeed; usage errors exit 1.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    handle_analysis(&cli)
}

fn handle_analysis(cli: &Cli) -> Result<()> {
    let params = build_params(cli)?;
    let bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;
    let analysis = analyze_recording(&bytes, &params)
        .with_context(|| format!("failed to analyse {}", cli.input.display()))?;

    let png_path = if cli.no_plot {
        None
    } else {
        Some(
            cli.png
                .clone()
                .unwrap_or_else(|| analysis_image_path(&cli.input)),
        )
    };
    write_outputs(
        &analysis,
        png_path.as_deref(),
        cli.svg.as_deref(),
        cli.json.as_deref(),
    )?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in report_lines(&analysis, png_path.as_deref()) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

/// Write every requested artifact. If any of them fails, the ones already
/// written are removed again.
fn write_outputs(
    analysis: &FlightAnalysis,
    png: Option<&Path>,
    svg: Option<&Path>,
    json: Option<&Path>,
) -> Result<()> {
    let mut written = Vec::new();
    let result = write_artifacts(analysis, png, svg, json, &mut written);
    if result.is_err() {
        for path in &written {
            if let Err(err) = fs::remove_file(path) {
                warn!("failed to remove partial output {}: {err}", path.display());
            }
        }
    }
    result
}

fn write_artifacts(
    analysis: &FlightAnalysis,
    png: Option<&Path>,
    svg: Option<&Path>,
    json: Option<&Path>,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    if let Some(path) = png {
        render_analysis(analysis, path, ChartKind::Png)
            .with_context(|| format!("failed to render {}", path.display()))?;
        written.push(path.to_path_buf());
        info!("wrote chart {}", path.display());
    }
    if let Some(path) = svg {
        render_analysis(analysis, path, ChartKind::Svg)
            .with_context(|| format!("failed to render {}", path.display()))?;
        written.push(path.to_path_buf());
        info!("wrote chart {}", path.display());
    }
    if let Some(path) = json {
        write_json_report(&analysis.report(), path)?;
        written.push(path.to_path_buf());
        info!("wrote report {}", path.display());
    }
    Ok(())
}

fn build_params(cli: &Cli) -> Result<Params> {
    let mut params = match &cli.params {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read params {}", path.display()))?;
            serde_json::from_str::<Params>(&text)
                .with_context(|| format!("failed to parse params {}", path.display()))?
        }
        None => Params::default(),
    };

    let current = match params.derivative {
        DerivativeStrategy::CentralDifferenceSmoothed { .. } => DerivativeOpt::Central,
        DerivativeStrategy::PeriodicDifference { .. } => DerivativeOpt::Periodic,
    };
    params.derivative = match cli.derivative.unwrap_or(current) {
        DerivativeOpt::Central => {
            if cli.period_samples.is_some() {
                bail!("--period-samples only applies to the periodic derivative");
            }
            let window = match params.derivative {
                DerivativeStrategy::CentralDifferenceSmoothed { smoothing_window } => {
                    smoothing_window
                }
                _ => DEFAULT_SMOOTHING_WINDOW,
            };
            DerivativeStrategy::CentralDifferenceSmoothed {
                smoothing_window: cli.smoothing_window.unwrap_or(window),
            }
        }
        DerivativeOpt::Periodic => {
            if cli.smoothing_window.is_some() {
                bail!("--smoothing-window only applies to the central derivative");
            }
            let period = match params.derivative {
                DerivativeStrategy::PeriodicDifference { period_samples } => period_samples,
                _ => DEFAULT_PERIOD_SAMPLES,
            };
            DerivativeStrategy::PeriodicDifference {
                period_samples: cli.period_samples.unwrap_or(period),
            }
        }
    };

    if cli.strict {
        params.strict_derivatives = true;
        params.degenerate_window = DegeneratePolicy::Fail;
    }
    params.validate()?;
    Ok(params)
}

/// `flight.csv` becomes `flight_analysis.png` in the same directory.
fn analysis_image_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flight".to_string());
    input.with_file_name(format!("{stem}_analysis.png"))
}

fn report_lines(analysis: &FlightAnalysis, plot_path: Option<&Path>) -> Vec<String> {
    let window = &analysis.window;
    let summary = &analysis.summary;
    let maximum = |value: Option<f64>, unit: &str| match value {
        Some(v) => format!("{v:.1} {unit}"),
        None => INSUFFICIENT_DERIVATIVE.to_string(),
    };

    let mut lines = vec![
        format!(
            "Apogee at index: {}, altitude: {:.1}m",
            window.apogee_index, window.apogee_altitude_m
        ),
        format!("Flight start: {}, Flight end: {}", window.start, window.end),
    ];
    if let Some(path) = plot_path {
        lines.push(format!("Plot saved as: {}", path.display()));
    }
    lines.extend([
        format!(
            "Max altitude: {:.1} m ({:.1} ft)",
            summary.max_altitude_m, summary.max_altitude_ft
        ),
        format!("Max velocity: {}", maximum(summary.max_velocity_m_s, "m/s")),
        format!(
            "Max acceleration: {}",
            maximum(summary.max_acceleration_m_s2, "m/s²")
        ),
        format!("Flight duration: {:.1} s", summary.flight_duration_s),
        format!("Derivative: {}", analysis.kinematics.strategy.id()),
    ]);
    lines
}

fn write_json_report(report: &FlightReport, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flight_trace::analyze_samples;
    use flight_trace::Sample;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("flight-trace").chain(args.iter().copied())).unwrap()
    }

    fn samples() -> Vec<Sample> {
        (0..120)
            .map(|i| {
                let altitude_m = match i {
                    0..=44 => 50.0,
                    45..=74 => 50.0 + (i - 44) as f64 * 3.0,
                    75..=104 => 140.0 - (i - 74) as f64 * 3.0,
                    _ => 50.0,
                };
                Sample {
                    timestamp_ms: i as f64 * 50.0,
                    altitude_m,
                }
            })
            .collect()
    }

    #[test]
    fn input_is_required_and_single() {
        assert!(Cli::try_parse_from(["flight-trace"]).is_err());
        assert!(Cli::try_parse_from(["flight-trace", "a.csv", "b.csv"]).is_err());
        assert_eq!(cli(&["a.csv"]).input, PathBuf::from("a.csv"));
    }

    #[test]
    fn image_path_sits_next_to_input() {
        assert_eq!(
            analysis_image_path(Path::new("logs/flight_07.csv")),
            PathBuf::from("logs/flight_07_analysis.png")
        );
        assert_eq!(
            analysis_image_path(Path::new("raw")),
            PathBuf::from("raw_analysis.png")
        );
    }

    #[test]
    fn derivative_flags_override_defaults() {
        let params = build_params(&cli(&["f.csv"])).unwrap();
        assert_eq!(params, Params::default());

        let params = build_params(&cli(&["f.csv", "--derivative", "periodic"])).unwrap();
        assert_eq!(
            params.derivative,
            DerivativeStrategy::PeriodicDifference { period_samples: 20 }
        );

        let params = build_params(&cli(&["f.csv", "--smoothing-window", "5", "--strict"])).unwrap();
        assert_eq!(
            params.derivative,
            DerivativeStrategy::CentralDifferenceSmoothed { smoothing_window: 5 }
        );
        assert!(params.strict_derivatives);
        assert_eq!(params.degenerate_window, DegeneratePolicy::Fail);

        assert!(build_params(&cli(&["f.csv", "--period-samples", "10"])).is_err());
        assert!(build_params(&cli(&["f.csv", "--smoothing-window", "0"])).is_err());
    }

    #[test]
    fn params_file_is_layered_under_flags() {
        let dir = std::env::temp_dir().join(format!("flight-trace-cli-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("params.json");
        fs::write(
            &path,
            r#"{"derivative":{"id":"periodic_difference","params":{"period_samples":8}},"window":{"threshold_m":2.0}}"#,
        )
        .unwrap();
        let path_arg = path.to_string_lossy().into_owned();

        let params = build_params(&cli(&["f.csv", "--params", &path_arg])).unwrap();
        assert_eq!(
            params.derivative,
            DerivativeStrategy::PeriodicDifference { period_samples: 8 }
        );
        assert_eq!(params.window.threshold_m, 2.0);

        let params =
            build_params(&cli(&["f.csv", "--params", &path_arg, "--period-samples", "12"])).unwrap();
        assert_eq!(
            params.derivative,
            DerivativeStrategy::PeriodicDifference { period_samples: 12 }
        );
    }

    #[test]
    fn report_lines_use_one_decimal() {
        let analysis = analyze_samples(&samples(), &Params::default()).unwrap();
        let lines = report_lines(&analysis, Some(Path::new("f_analysis.png")));
        assert_eq!(lines[0], "Apogee at index: 69, altitude: 90.0m");
        assert_eq!(lines[1], "Flight start: 29, Flight end: 99");
        assert_eq!(lines[2], "Plot saved as: f_analysis.png");
        assert_eq!(lines[3], "Max altitude: 90.0 m (295.3 ft)");
        assert!(lines[4].starts_with("Max velocity: 60.0 m/s"));
        assert_eq!(lines[7], "Derivative: central_difference_smoothed");
    }

    #[test]
    fn missing_derivatives_are_reported_as_such() {
        let params = Params {
            derivative: DerivativeStrategy::PeriodicDifference {
                period_samples: 60,
            },
            ..Params::default()
        };
        let analysis = analyze_samples(&samples(), &params).unwrap();
        let lines = report_lines(&analysis, None);
        assert!(lines.iter().all(|l| !l.starts_with("Plot saved as")));
        assert!(lines.contains(&"Max velocity: insufficient data for derivative".to_string()));
        assert!(lines.contains(&"Max acceleration: insufficient data for derivative".to_string()));
    }

    #[test]
    fn failed_report_removes_rendered_chart() {
        let analysis = analyze_samples(&samples(), &Params::default()).unwrap();
        let dir = std::env::temp_dir().join(format!("flight-trace-outputs-{}", process::id()));
        fs::create_dir_all(&dir).unwrap();
        let png = dir.join("flight_analysis.png");
        let json = dir.join("missing").join("report.json");

        let err = write_outputs(&analysis, Some(&png), None, Some(&json)).unwrap_err();
        assert!(err.to_string().contains("report.json"));
        assert!(!png.exists());
        assert!(!json.exists());
    }

    #[test]
    fn json_report_round_trips() {
        let analysis = analyze_samples(&samples(), &Params::default()).unwrap();
        let path = std::env::temp_dir().join(format!("flight-trace-report-{}.json", process::id()));
        write_json_report(&analysis.report(), &path).unwrap();
        let back: FlightReport = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.window, analysis.window);
        assert_eq!(back.params_hash, analysis.params_hash);
        assert_eq!(back.derivative_strategy, "central_difference_smoothed");
        assert!((back.summary.max_altitude_m - 90.0).abs() < 1e-9);
    }
}
