//! Three stacked panels over the re-zeroed flight time: altitude (with a
//! secondary feet axis), velocity and acceleration.

use std::panic;
use std::path::Path;

use anyhow::{anyhow, Result};
use flight_trace::{FlightAnalysis, FEET_PER_METER};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, FontFamily, FontStyle};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingBackend,
    DrawingErrorKind, FontTransform,
};

const CHART_SIZE: (u32, u32) = (1200, 1200);
const ALTITUDE_COLOR: RGBColor = RGBColor(31, 119, 180);
const FEET_COLOR: RGBColor = RGBColor(128, 128, 128);
const VELOCITY_COLOR: RGBColor = RGBColor(44, 160, 44);
const ACCELERATION_COLOR: RGBColor = RGBColor(214, 39, 40);

pub const INSUFFICIENT_DERIVATIVE: &str = "insufficient data for derivative";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

/// Render the analysis to `path`. Backend panics are reported as errors.
pub fn render_analysis(analysis: &FlightAnalysis, path: &Path, kind: ChartKind) -> Result<()> {
    let render = || -> Result<()> {
        match kind {
            ChartKind::Png => {
                let backend = BitMapBackend::new(path, CHART_SIZE);
                draw_panels(GlyphTextBackend::new(backend).into_drawing_area(), analysis)
            }
            ChartKind::Svg => {
                let backend = SVGBackend::new(path, CHART_SIZE);
                draw_panels(backend.into_drawing_area(), analysis)
            }
        }
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| anyhow!("plotting backend panicked while drawing {}", path.display()))?
}

struct KinematicPanel<'a> {
    values: &'a [Option<f64>],
    color: RGBColor,
    y_desc: &'a str,
    stat: String,
    x_desc: Option<&'a str>,
}

fn draw_panels<DB>(root: DrawingArea<DB, Shift>, analysis: &FlightAnalysis) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let panels = root.split_evenly((3, 1));

    let time = analysis.series.time_s.to_vec();
    let x_end = time.last().copied().filter(|&t| t > 0.0).unwrap_or(1.0);
    let apogee_t = analysis.summary.apogee_time_s;
    let summary = &analysis.summary;

    draw_altitude_panel(&panels[0], analysis, &time, x_end)?;
    draw_kinematic_panel(
        &panels[1],
        &time,
        x_end,
        apogee_t,
        KinematicPanel {
            values: &analysis.kinematics.velocity_m_s,
            color: VELOCITY_COLOR,
            y_desc: "Velocity (m/s)",
            stat: stat_line("Max Velocity", summary.max_velocity_m_s, "m/s"),
            x_desc: None,
        },
    )?;
    draw_kinematic_panel(
        &panels[2],
        &time,
        x_end,
        apogee_t,
        KinematicPanel {
            values: &analysis.kinematics.acceleration_m_s2,
            color: ACCELERATION_COLOR,
            y_desc: "Acceleration (m/s²)",
            stat: stat_line("Max Acceleration", summary.max_acceleration_m_s2, "m/s²"),
            x_desc: Some("Time (seconds)"),
        },
    )?;

    root.present()?;
    Ok(())
}

fn draw_altitude_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    analysis: &FlightAnalysis,
    time: &[f64],
    x_end: f64,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let altitude = analysis.series.altitude_m.to_vec();
    let (y_lo, y_hi) = padded_range(&altitude).unwrap_or((-0.5, 0.5));

    let mut chart = ChartBuilder::on(area)
        .caption("Flight Data Analysis", title_font())
        .margin(12)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Right, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 30)
        .build_cartesian_2d(0.0..x_end, y_lo..y_hi)?
        .set_secondary_coord(0.0..x_end, y_lo * FEET_PER_METER..y_hi * FEET_PER_METER);

    let time_fmt = |v: &f64| format!("{:.1}", v);
    let whole_fmt = |v: &f64| format!("{:.0}", v);
    chart
        .configure_mesh()
        .light_line_style(&BLACK.mix(0.05))
        .x_label_formatter(&time_fmt)
        .y_label_formatter(&whole_fmt)
        .y_desc("Altitude (m)")
        .label_style(axis_font())
        .axis_desc_style(axis_font())
        .draw()?;
    chart
        .configure_secondary_axes()
        .y_label_formatter(&whole_fmt)
        .y_desc("Altitude (ft)")
        .label_style(axis_font())
        .axis_desc_style(axis_font())
        .draw()?;

    chart.draw_series(LineSeries::new(
        time.iter().copied().zip(altitude.iter().copied()),
        Color::stroke_width(&ALTITUDE_COLOR, 2),
    ))?;
    chart.draw_secondary_series(LineSeries::new(
        time.iter()
            .copied()
            .zip(analysis.series.altitude_ft.iter().copied()),
        &FEET_COLOR.mix(0.5),
    ))?;

    let apogee_t = analysis.summary.apogee_time_s;
    chart.draw_series(LineSeries::new(
        vec![(apogee_t, y_lo), (apogee_t, y_hi)],
        &RED.mix(0.5),
    ))?;
    chart.draw_series(std::iter::once(
        EmptyElement::at((apogee_t, y_hi))
            + Text::new(
                format!("t={:.1}s", apogee_t),
                (4, 4),
                axis_font().color(&RED),
            ),
    ))?;

    let summary = &analysis.summary;
    draw_stats_box(
        &chart.plotting_area().strip_coord_spec(),
        &[
            format!(
                "Max Altitude: {:.1} m ({:.1} ft)",
                summary.max_altitude_m, summary.max_altitude_ft
            ),
            format!("Flight Duration: {:.1} s", summary.flight_duration_s),
        ],
    )?;
    Ok(())
}

fn draw_kinematic_panel<DB>(
    area: &DrawingArea<DB, Shift>,
    time: &[f64],
    x_end: f64,
    apogee_t: f64,
    panel: KinematicPanel<'_>,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let defined: Vec<f64> = panel.values.iter().flatten().copied().collect();
    let (y_lo, y_hi) = padded_range(&defined).unwrap_or((-1.0, 1.0));

    let mut chart = ChartBuilder::on(area)
        .margin(12)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Right, 70)
        .set_label_area_size(
            LabelAreaPosition::Bottom,
            if panel.x_desc.is_some() { 50 } else { 30 },
        )
        .build_cartesian_2d(0.0..x_end, y_lo..y_hi)?;

    let time_fmt = |v: &f64| format!("{:.1}", v);
    let value_fmt = |v: &f64| format!("{:.0}", v);
    let mut mesh = chart.configure_mesh();
    mesh.light_line_style(&BLACK.mix(0.05))
        .x_label_formatter(&time_fmt)
        .y_label_formatter(&value_fmt)
        .y_desc(panel.y_desc)
        .label_style(axis_font())
        .axis_desc_style(axis_font());
    if let Some(x_desc) = panel.x_desc {
        mesh.x_desc(x_desc);
    }
    mesh.draw()?;

    for run in defined_runs(time, panel.values) {
        chart.draw_series(LineSeries::new(run, Color::stroke_width(&panel.color, 2)))?;
    }
    chart.draw_series(LineSeries::new(
        vec![(apogee_t, y_lo), (apogee_t, y_hi)],
        &RED.mix(0.5),
    ))?;

    let plot = chart.plotting_area().strip_coord_spec();
    if defined.is_empty() {
        let (width, height) = plot.dim_in_pixel();
        let style = TextStyle::from(axis_font().color(&RED)).pos(Pos::new(HPos::Center, VPos::Center));
        plot.draw(&Text::new(
            INSUFFICIENT_DERIVATIVE,
            (width as i32 / 2, height as i32 / 2),
            style,
        ))?;
    } else {
        draw_stats_box(&plot, &[panel.stat])?;
    }
    Ok(())
}

/// Right-aligned text lines in a framed box at the top-right of `plot`.
fn draw_stats_box<DB>(plot: &DrawingArea<DB, Shift>, lines: &[String]) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    const PAD: i32 = 8;
    const LINE_GAP: i32 = 6;

    let style = TextStyle::from(axis_font()).pos(Pos::new(HPos::Right, VPos::Top));
    let mut box_w = 0;
    let mut line_h = 0;
    for line in lines {
        let (w, h) = plot.estimate_text_size(line, &style)?;
        box_w = box_w.max(w as i32);
        line_h = line_h.max(h as i32);
    }
    let box_h = lines.len() as i32 * (line_h + LINE_GAP) - LINE_GAP;

    let (width, _) = plot.dim_in_pixel();
    let right = width as i32 - PAD;
    let corners = [
        (right - box_w - PAD, PAD),
        (right + PAD / 2, PAD + box_h + PAD),
    ];
    plot.draw(&Rectangle::new(corners, WHITE.mix(0.85).filled()))?;
    plot.draw(&Rectangle::new(corners, &BLACK.mix(0.3)))?;
    for (i, line) in lines.iter().enumerate() {
        let y = PAD + PAD / 2 + i as i32 * (line_h + LINE_GAP);
        plot.draw(&Text::new(line.as_str(), (right - PAD / 2, y), style.clone()))?;
    }
    Ok(())
}

fn stat_line(label: &str, value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{label}: {v:.1} {unit}"),
        None => format!("{label}: {INSUFFICIENT_DERIVATIVE}"),
    }
}

fn title_font() -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal)
}

fn axis_font() -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal)
}

/// Contiguous runs of defined samples, so gaps are never bridged.
fn defined_runs(time: &[f64], values: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (&t, value) in time.iter().zip(values) {
        match value {
            Some(v) => current.push((t, *v)),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn padded_range(values: &[f64]) -> Option<(f64, f64)> {
    let (min, max) = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })?;
    let span = max - min;
    let pad = if span < 1e-6 { 0.5 } else { span * 0.1 };
    Some((min - pad, max + pad))
}

/// Draws all text from a built-in pixel font so bitmap output needs no
/// system fonts. Everything else goes straight to the wrapped backend.
struct GlyphTextBackend<DB> {
    inner: DB,
}

impl<DB> GlyphTextBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

impl<DB: DrawingBackend> DrawingBackend for GlyphTextBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.fill_polygon(vert, style)
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_circle(center, radius, style, fill)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        let color = style.color();
        if color.alpha == 0.0 || text.trim().is_empty() {
            return Ok(());
        }

        let scale = glyph_scale(style.size());
        let (width, height) = text_extent(text, scale);
        let (width, height) = (width as i32, height as i32);
        let anchor = style.anchor();
        let dx = match anchor.h_pos {
            HPos::Left => 0,
            HPos::Right => -width,
            HPos::Center => -width / 2,
        };
        let dy = match anchor.v_pos {
            VPos::Top => 0,
            VPos::Center => -height / 2,
            VPos::Bottom => -height,
        };
        let transform = style.transform();

        let mut cursor = dx;
        for ch in text.chars() {
            let Some(shape) = glyph(ch) else {
                cursor += scale * SPACE_WIDTH;
                continue;
            };
            for (row, bits) in shape.rows.iter().enumerate() {
                for col in 0..shape.width {
                    if bits & (1 << (shape.width - 1 - col)) != 0 {
                        let offset = (cursor + col as i32 * scale, dy + row as i32 * scale);
                        self.fill_block(pos, offset, scale, &transform, color)?;
                    }
                }
            }
            cursor += scale * (shape.width as i32 + 1);
        }
        Ok(())
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        Ok(text_extent(text, glyph_scale(style.size())))
    }
}

impl<DB: DrawingBackend> GlyphTextBackend<DB> {
    /// Fill a `scale`-sized block at `offset` from `origin`, rotated with the text.
    fn fill_block(
        &mut self,
        origin: BackendCoord,
        offset: (i32, i32),
        scale: i32,
        transform: &FontTransform,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<DB::ErrorType>> {
        for bx in 0..scale {
            for by in 0..scale {
                let (tx, ty) = transform.transform(offset.0 + bx, offset.1 + by);
                self.inner.draw_pixel((origin.0 + tx, origin.1 + ty), color)?;
            }
        }
        Ok(())
    }
}

const GLYPH_HEIGHT: usize = 7;
const SPACE_WIDTH: i32 = 3;

#[derive(Clone, Copy)]
struct Glyph {
    width: u8,
    rows: [u8; GLYPH_HEIGHT],
}

const fn g(width: u8, rows: [u8; GLYPH_HEIGHT]) -> Glyph {
    Glyph { width, rows }
}

/// 7-row bitmaps, most significant used bit leftmost. Letters are upper case only.
const GLYPHS: &[(char, Glyph)] = &[
    ('A', g(5, [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001])),
    ('B', g(5, [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110])),
    ('C', g(5, [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110])),
    ('D', g(5, [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100])),
    ('E', g(5, [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111])),
    ('F', g(5, [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000])),
    ('G', g(5, [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111])),
    ('H', g(5, [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001])),
    ('I', g(3, [0b111, 0b010, 0b010, 0b010, 0b010, 0b010, 0b111])),
    ('J', g(5, [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100])),
    ('K', g(5, [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001])),
    ('L', g(5, [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111])),
    ('M', g(5, [0b10001, 0b11011, 0b10101, 0b10001, 0b10001, 0b10001, 0b10001])),
    ('N', g(5, [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001])),
    ('O', g(5, [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110])),
    ('P', g(5, [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000])),
    ('Q', g(5, [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101])),
    ('R', g(5, [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001])),
    ('S', g(5, [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110])),
    ('T', g(5, [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100])),
    ('U', g(5, [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110])),
    ('V', g(5, [0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b01010, 0b00100])),
    ('W', g(5, [0b10001, 0b10001, 0b10001, 0b10001, 0b10101, 0b11011, 0b10001])),
    ('X', g(5, [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001])),
    ('Y', g(5, [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100])),
    ('Z', g(5, [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111])),
    ('0', g(5, [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110])),
    ('1', g(3, [0b010, 0b110, 0b010, 0b010, 0b010, 0b010, 0b111])),
    ('2', g(5, [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111])),
    ('3', g(5, [0b11110, 0b00001, 0b00001, 0b00110, 0b00001, 0b00001, 0b11110])),
    ('4', g(5, [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010])),
    ('5', g(5, [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110])),
    ('6', g(5, [0b01110, 0b10001, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110])),
    ('7', g(5, [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000])),
    ('8', g(5, [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110])),
    ('9', g(5, [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b10001, 0b01110])),
    ('-', g(3, [0b000, 0b000, 0b000, 0b111, 0b000, 0b000, 0b000])),
    ('+', g(3, [0b000, 0b000, 0b010, 0b111, 0b010, 0b000, 0b000])),
    ('=', g(3, [0b000, 0b000, 0b111, 0b000, 0b111, 0b000, 0b000])),
    ('/', g(3, [0b001, 0b001, 0b010, 0b010, 0b100, 0b100, 0b100])),
    ('(', g(3, [0b001, 0b010, 0b100, 0b100, 0b100, 0b010, 0b001])),
    (')', g(3, [0b100, 0b010, 0b001, 0b001, 0b001, 0b010, 0b100])),
    (':', g(1, [0b0, 0b1, 0b0, 0b0, 0b0, 0b1, 0b0])),
    ('.', g(1, [0b0, 0b0, 0b0, 0b0, 0b0, 0b0, 0b1])),
    (',', g(2, [0b00, 0b00, 0b00, 0b00, 0b00, 0b01, 0b10])),
    ('%', g(5, [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011])),
    ('²', g(3, [0b110, 0b001, 0b010, 0b111, 0b000, 0b000, 0b000])),
];

fn glyph(ch: char) -> Option<Glyph> {
    let upper = ch.to_ascii_uppercase();
    GLYPHS
        .iter()
        .find(|(c, _)| *c == upper)
        .map(|(_, glyph)| *glyph)
}

/// Pixel multiplier for a font of `size` points.
fn glyph_scale(size: f64) -> i32 {
    (size / 10.0).round().max(1.0) as i32
}

fn text_extent(text: &str, scale: i32) -> (u32, u32) {
    let advance: i32 = text
        .chars()
        .map(|ch| match glyph(ch) {
            Some(glyph) => scale * (glyph.width as i32 + 1),
            None => scale * SPACE_WIDTH,
        })
        .sum();
    let width = (advance - scale).max(0);
    (width as u32, (GLYPH_HEIGHT as i32 * scale) as u32)
}
