//! Frame drawing. Everything here targets `RendererBackend`, so the browser
//! canvas and the recording backend used in tests see the same command
//! stream.

use app_shell::OverlayToggles;
use ta_engine::signals::{fmt_opt, MISSING, RSI_OVERBOUGHT, RSI_OVERSOLD};
use ta_engine::{
    default_line_styles, IndicatorKind, IndicatorSeries, LinePattern, LineStyle,
    BAND_FILL_COLOR, HIST_DOWN_COLOR, HIST_UP_COLOR, MACD_FAST, MACD_SIGNAL, MACD_SLOW,
    VOLUME_DOWN_COLOR, VOLUME_UP_COLOR,
};
use ts_core::{parse_date, RangePreset, TimeSeries};

use crate::view::ViewWindow;

pub const BACKGROUND: &str = "#ffffff";
pub const UP_COLOR: &str = "#089981";
pub const DOWN_COLOR: &str = "#F23645";
pub const GRID_COLOR: &str = "#e9edf5";
pub const AXIS_TEXT_COLOR: &str = "#333333";
pub const CROSSHAIR_COLOR: &str = "rgba(0,0,0,0.18)";
const PRICE_LINE_COLOR: &str = "#9598a1";
const PRICE_TAG_UP: &str = "#26a69a";
const PRICE_TAG_DOWN: &str = "#ef5350";
const TOOLTIP_FILL: &str = "rgba(255,255,255,0.92)";
const TOOLTIP_TEXT: &str = "#131722";
const LEGEND_TEXT: &str = "#222222";

const FONT: &str = "12px Arial";
const SMALL_FONT: &str = "11px Arial";
const BOLD_FONT: &str = "bold 12px Arial";

const GRID_DIVISIONS: usize = 6;
const DATE_LABELS: usize = 8;
const BODY_RATIO: f64 = 0.7;
const MIN_BODY: f64 = 2.0;
const PRICE_PAD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

pub const PADDING: Padding = Padding {
    top: 28.0,
    right: 110.0,
    bottom: 24.0,
    left: 50.0,
};

pub const PANE_GAP: f64 = 10.0;

const PRICE_SHARE: f64 = 0.5;
const MACD_SHARE: f64 = 0.13;
const RSI_SHARE: f64 = 0.12;
const VOLUME_SHARE: f64 = 0.12;

#[derive(Debug, Clone, PartialEq)]
pub struct PlotCandle {
    pub x: f64,
    pub half_w: f64,
    pub y_open: f64,
    pub y_close: f64,
    pub y_high: f64,
    pub y_low: f64,
    pub open: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub color: &'static str,
    pub font: &'static str,
    pub align: TextAlign,
}

impl TextStyle {
    const fn new(color: &'static str, font: &'static str, align: TextAlign) -> Self {
        Self { color, font, align }
    }
}

/// Drawing primitives a frame is made of.
pub trait RendererBackend {
    fn begin_frame(&mut self, width: f64, height: f64, clear_color: &str);
    fn draw_candles(&mut self, candles: &[PlotCandle], color_up: &str, color_down: &str);
    fn draw_polyline(&mut self, points: &[(f64, f64)], style: &LineStyle);
    fn draw_segments(&mut self, segments: &[(f64, f64, f64, f64)], color: &str, width: f64);
    fn fill_rects(&mut self, rects: &[(f64, f64, f64, f64)], color: &str);
    fn fill_polygon(&mut self, points: &[(f64, f64)], fill: &str);
    fn draw_text(&mut self, text: &str, x: f64, y: f64, style: &TextStyle);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaneRect {
    pub top: f64,
    pub height: f64,
}

impl PaneRect {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Pane geometry for one canvas size and set of enabled panes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub width: f64,
    pub height: f64,
    pub plot_left: f64,
    pub plot_right: f64,
    pub price: PaneRect,
    pub macd: Option<PaneRect>,
    pub rsi: Option<PaneRect>,
    pub volume: Option<PaneRect>,
}

impl Layout {
    pub fn compute(width: f64, height: f64, overlays: &OverlayToggles) -> Self {
        let plot_left = PADDING.left;
        let plot_right = (width - PADDING.right).max(plot_left);
        let price = PaneRect {
            top: PADDING.top,
            height: (height * PRICE_SHARE).floor(),
        };
        let mut next_top = price.bottom() + PANE_GAP;
        let mut stack = |enabled: bool, share: f64| {
            if !enabled {
                return None;
            }
            let pane = PaneRect {
                top: next_top,
                height: (height * share).floor(),
            };
            next_top = pane.bottom() + PANE_GAP;
            Some(pane)
        };
        let macd = stack(overlays.macd, MACD_SHARE);
        let rsi = stack(overlays.rsi, RSI_SHARE);
        let volume = stack(overlays.volume, VOLUME_SHARE);
        Self {
            width,
            height,
            plot_left,
            plot_right,
            price,
            macd,
            rsi,
            volume,
        }
    }

    pub fn plot_width(&self) -> f64 {
        self.plot_right - self.plot_left
    }
}

/// Linear value-to-y mapping over `[lo, hi]` inside a pane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    pub lo: f64,
    pub hi: f64,
    pane: PaneRect,
}

impl LinearScale {
    pub fn new(lo: f64, hi: f64, pane: PaneRect) -> Self {
        let hi = if hi > lo { hi } else { lo + 1.0 };
        Self { lo, hi, pane }
    }

    /// Price scale over the visible window: lowest low to highest high,
    /// padded by 5% of the range. `None` when the window has no valid
    /// high or low.
    pub fn fit_prices(series: &TimeSeries, window: ViewWindow, pane: PaneRect) -> Option<Self> {
        let highs = series.high.get(window.start..window.end)?;
        let lows = series.low.get(window.start..window.end)?;
        let max = highs.iter().flatten().copied().reduce(f64::max)?;
        let min = lows.iter().flatten().copied().reduce(f64::min)?;
        let range = if max - min == 0.0 { 1.0 } else { max - min };
        let pad = range * PRICE_PAD;
        Some(Self::new(min - pad, max + pad, pane))
    }

    pub fn to_y(&self, value: f64) -> f64 {
        self.pane.top + self.pane.height * (1.0 - (value - self.lo) / (self.hi - self.lo))
    }

    pub fn to_value(&self, y: f64) -> f64 {
        self.lo + (1.0 - (y - self.pane.top) / self.pane.height) * (self.hi - self.lo)
    }
}

/// Why a frame was not drawn. The previous frame stays on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ZeroSize,
    EmptyWindow,
    NoPriceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn,
    Skipped(SkipReason),
}

/// Inputs for one candlestick frame.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub series: &'a TimeSeries,
    pub indicators: &'a IndicatorSeries,
    pub window: ViewWindow,
    pub hover: Option<usize>,
    pub overlays: &'a OverlayToggles,
}

/// Horizontal placement of the visible candles.
#[derive(Debug, Clone, Copy)]
struct Columns {
    start: usize,
    count: usize,
    left: f64,
    spacing: f64,
    body: f64,
}

impl Columns {
    fn new(window: ViewWindow, layout: &Layout) -> Self {
        let count = window.visible();
        let spacing = layout.plot_width() / count.max(1) as f64;
        Self {
            start: window.start,
            count,
            left: layout.plot_left,
            spacing,
            body: (spacing * BODY_RATIO).max(MIN_BODY),
        }
    }

    fn x(&self, idx: usize) -> f64 {
        self.left + (idx - self.start) as f64 * self.spacing + self.spacing / 2.0
    }

    fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.count
    }
}

/// Draw one full candlestick frame.
pub fn render_chart<B: RendererBackend + ?Sized>(
    backend: &mut B,
    width: f64,
    height: f64,
    scene: &Scene<'_>,
) -> FrameOutcome {
    if width <= 0.0 || height <= 0.0 {
        return FrameOutcome::Skipped(SkipReason::ZeroSize);
    }
    let len = scene.series.len();
    let end = scene.window.end.min(len);
    let window = ViewWindow {
        start: scene.window.start.min(end),
        end,
    };
    if window.visible() == 0 {
        log::debug!("nothing to draw: empty window");
        return FrameOutcome::Skipped(SkipReason::EmptyWindow);
    }

    let layout = Layout::compute(width, height, scene.overlays);
    let Some(scale) = LinearScale::fit_prices(scene.series, window, layout.price) else {
        log::warn!(
            "no valid high/low in window {}..{}, keeping previous frame",
            window.start,
            window.end
        );
        return FrameOutcome::Skipped(SkipReason::NoPriceRange);
    };
    let cols = Columns::new(window, &layout);

    backend.begin_frame(width, height, BACKGROUND);
    draw_price_grid(backend, &layout, &scale);
    draw_overlays(backend, scene, &cols, &scale);
    draw_candles(backend, scene.series, &cols, &scale);
    draw_price_line(backend, scene.series, window, &layout, &scale);
    if let Some(pane) = layout.macd {
        draw_macd_pane(backend, scene.indicators, &cols, &layout, pane);
    }
    if let Some(pane) = layout.rsi {
        draw_rsi_pane(backend, scene.indicators, &cols, &layout, pane);
    }
    if let Some(pane) = layout.volume {
        draw_volume_pane(backend, scene.series, &cols, &layout, pane);
    }
    draw_date_labels(backend, scene.series, &cols, &layout);
    draw_legend(backend, scene, &layout);

    if let Some(idx) = scene.hover.filter(|i| window.contains(*i)) {
        draw_crosshair(backend, &layout, cols.x(idx));
        draw_tooltip(backend, scene.series, idx, &layout, cols.x(idx));
    }
    FrameOutcome::Drawn
}

fn draw_price_grid<B: RendererBackend + ?Sized>(
    backend: &mut B,
    layout: &Layout,
    scale: &LinearScale,
) {
    let step = layout.price.height / GRID_DIVISIONS as f64;
    let ys: Vec<f64> = (0..=GRID_DIVISIONS)
        .map(|i| layout.price.top + step * i as f64)
        .collect();
    let segments: Vec<_> = ys
        .iter()
        .map(|y| (layout.plot_left, *y, layout.plot_right, *y))
        .collect();
    backend.draw_segments(&segments, GRID_COLOR, 1.0);
    let style = TextStyle::new(AXIS_TEXT_COLOR, FONT, TextAlign::Right);
    for y in ys {
        let label = format!("{:.2}", scale.to_value(y));
        backend.draw_text(&label, layout.plot_left - 8.0, y + 4.0, &style);
    }
}

/// Split a value sequence into drawable runs; a `None` ends the current run.
fn line_runs(
    values: &[Option<f64>],
    cols: &Columns,
    to_y: impl Fn(f64) -> f64,
) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for idx in cols.indices() {
        match values.get(idx).copied().flatten() {
            Some(v) => current.push((cols.x(idx), to_y(v))),
            None => {
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn draw_lines<B: RendererBackend + ?Sized>(
    backend: &mut B,
    lines: &[&[Option<f64>]],
    styles: &[LineStyle],
    cols: &Columns,
    scale: &LinearScale,
) {
    for (values, style) in lines.iter().zip(styles) {
        for run in line_runs(values, cols, |v| scale.to_y(v)) {
            backend.draw_polyline(&run, style);
        }
    }
}

fn draw_overlays<B: RendererBackend + ?Sized>(
    backend: &mut B,
    scene: &Scene<'_>,
    cols: &Columns,
    scale: &LinearScale,
) {
    // Band fill goes under everything else in the price pane.
    if scene.overlays.bbands {
        draw_band_fill(backend, scene.indicators, cols, scale);
    }
    for kind in scene.overlays.enabled() {
        if kind.output() != ta_engine::OutputKind::Overlay {
            continue;
        }
        let lines = scene.indicators.lines(kind);
        draw_lines(backend, &lines, &default_line_styles(kind), cols, scale);
    }
}

fn draw_band_fill<B: RendererBackend + ?Sized>(
    backend: &mut B,
    indicators: &IndicatorSeries,
    cols: &Columns,
    scale: &LinearScale,
) {
    let bands = &indicators.bands;
    let mut upper = Vec::new();
    let mut lower = Vec::new();
    let mut flush = |upper: &mut Vec<(f64, f64)>, lower: &mut Vec<(f64, f64)>| {
        if upper.len() >= 2 {
            let mut polygon = std::mem::take(upper);
            polygon.extend(lower.drain(..).rev());
            backend.fill_polygon(&polygon, BAND_FILL_COLOR);
        }
        upper.clear();
        lower.clear();
    };
    for idx in cols.indices() {
        let hi = bands.upper.get(idx).copied().flatten();
        let lo = bands.lower.get(idx).copied().flatten();
        match (hi, lo) {
            (Some(hi), Some(lo)) => {
                let x = cols.x(idx);
                upper.push((x, scale.to_y(hi)));
                lower.push((x, scale.to_y(lo)));
            }
            _ => flush(&mut upper, &mut lower),
        }
    }
    flush(&mut upper, &mut lower);
}

fn draw_candles<B: RendererBackend + ?Sized>(
    backend: &mut B,
    series: &TimeSeries,
    cols: &Columns,
    scale: &LinearScale,
) {
    let candles: Vec<PlotCandle> = cols
        .indices()
        .filter_map(|idx| {
            let c = series.candle(idx)?;
            Some(PlotCandle {
                x: cols.x(idx),
                half_w: cols.body / 2.0,
                y_open: scale.to_y(c.open),
                y_close: scale.to_y(c.close),
                y_high: scale.to_y(c.high),
                y_low: scale.to_y(c.low),
                open: c.open,
                close: c.close,
            })
        })
        .collect();
    backend.draw_candles(&candles, UP_COLOR, DOWN_COLOR);
}

/// Dashed line at the latest close in view, with a price tag in the right
/// margin.
fn draw_price_line<B: RendererBackend + ?Sized>(
    backend: &mut B,
    series: &TimeSeries,
    window: ViewWindow,
    layout: &Layout,
    scale: &LinearScale,
) {
    let Some((idx, close)) = (window.start..window.end)
        .rev()
        .find_map(|i| series.close.get(i).copied().flatten().map(|c| (i, c)))
    else {
        return;
    };
    let y = scale.to_y(close);
    let dashed = LineStyle {
        color: PRICE_LINE_COLOR,
        width: 1.0,
        pattern: LinePattern::Dashed,
    };
    backend.draw_polyline(&[(layout.plot_left, y), (layout.plot_right, y)], &dashed);

    let up = series.open.get(idx).copied().flatten().map_or(true, |o| close >= o);
    let tag = if up { PRICE_TAG_UP } else { PRICE_TAG_DOWN };
    let tag_w = PADDING.right - 5.0;
    backend.fill_rects(&[(layout.plot_right, y - 10.0, tag_w, 20.0)], tag);
    backend.draw_text(
        &format!("{close:.2}"),
        layout.plot_right + tag_w / 2.0,
        y + 4.0,
        &TextStyle::new("#ffffff", BOLD_FONT, TextAlign::Center),
    );
}

fn pane_title<B: RendererBackend + ?Sized>(backend: &mut B, title: &str, layout: &Layout, pane: PaneRect) {
    backend.draw_text(
        title,
        layout.plot_left + 4.0,
        pane.top + 12.0,
        &TextStyle::new(AXIS_TEXT_COLOR, SMALL_FONT, TextAlign::Left),
    );
}

fn visible_extent(series: &[&[Option<f64>]], cols: &Columns) -> Option<(f64, f64)> {
    series
        .iter()
        .flat_map(|values| cols.indices().filter_map(move |i| values.get(i).copied().flatten()))
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

fn draw_macd_pane<B: RendererBackend + ?Sized>(
    backend: &mut B,
    indicators: &IndicatorSeries,
    cols: &Columns,
    layout: &Layout,
    pane: PaneRect,
) {
    let macd = &indicators.macd;
    let (lo, hi) = visible_extent(
        &[macd.macd.as_slice(), macd.signal.as_slice(), macd.hist.as_slice()],
        cols,
    )
        .unwrap_or((-1.0, 1.0));
    let scale = LinearScale::new(lo, hi, pane);

    let zero = scale.to_y(0.0).clamp(pane.top, pane.bottom());
    let bar_w = cols.body.max(1.0);
    let mut up = Vec::new();
    let mut down = Vec::new();
    for idx in cols.indices() {
        let Some(h) = macd.hist.get(idx).copied().flatten() else {
            continue;
        };
        let y = scale.to_y(h);
        let rect = (cols.x(idx) - bar_w / 2.0, y.min(zero), bar_w, (y - zero).abs());
        if h >= 0.0 {
            up.push(rect);
        } else {
            down.push(rect);
        }
    }
    backend.fill_rects(&up, HIST_UP_COLOR);
    backend.fill_rects(&down, HIST_DOWN_COLOR);

    let lines = indicators.lines(IndicatorKind::Macd);
    draw_lines(backend, &lines, &default_line_styles(IndicatorKind::Macd), cols, &scale);
    pane_title(
        backend,
        &format!("MACD ({MACD_FAST}, {MACD_SLOW}, {MACD_SIGNAL})"),
        layout,
        pane,
    );
}

fn draw_rsi_pane<B: RendererBackend + ?Sized>(
    backend: &mut B,
    indicators: &IndicatorSeries,
    cols: &Columns,
    layout: &Layout,
    pane: PaneRect,
) {
    let scale = LinearScale::new(0.0, 100.0, pane);
    let guides = [
        (RSI_OVERBOUGHT, "#c62828"),
        (50.0, "#9e9e9e"),
        (RSI_OVERSOLD, "#007f33"),
    ];
    let segments: Vec<_> = guides
        .iter()
        .map(|(level, _)| {
            let y = scale.to_y(*level);
            (layout.plot_left, y, layout.plot_right, y)
        })
        .collect();
    backend.draw_segments(&segments, GRID_COLOR, 1.0);
    for (level, color) in guides {
        backend.draw_text(
            &format!("{level:.0}"),
            layout.plot_left - 8.0,
            scale.to_y(level) + 4.0,
            &TextStyle::new(color, SMALL_FONT, TextAlign::Right),
        );
    }

    let lines = indicators.lines(IndicatorKind::Rsi);
    draw_lines(backend, &lines, &default_line_styles(IndicatorKind::Rsi), cols, &scale);
    pane_title(backend, &IndicatorKind::Rsi.legend_label(&indicators.params), layout, pane);
}

fn draw_volume_pane<B: RendererBackend + ?Sized>(
    backend: &mut B,
    series: &TimeSeries,
    cols: &Columns,
    layout: &Layout,
    pane: PaneRect,
) {
    let max = cols
        .indices()
        .filter_map(|i| series.volume.get(i).copied().flatten())
        .fold(0.0_f64, f64::max);
    let max = if max > 0.0 { max } else { 1.0 };
    let bar_w = cols.body.max(1.0);
    let mut up = Vec::new();
    let mut down = Vec::new();
    for idx in cols.indices() {
        let Some(v) = series.volume.get(idx).copied().flatten() else {
            continue;
        };
        let h = (v / max * pane.height).round();
        let rect = (cols.x(idx) - bar_w / 2.0, pane.bottom() - h, bar_w, h);
        let open = series.open.get(idx).copied().flatten();
        let close = series.close.get(idx).copied().flatten();
        let rising = match (open, close) {
            (Some(o), Some(c)) => c >= o,
            _ => true,
        };
        if rising {
            up.push(rect);
        } else {
            down.push(rect);
        }
    }
    backend.fill_rects(&up, VOLUME_UP_COLOR);
    backend.fill_rects(&down, VOLUME_DOWN_COLOR);
    pane_title(backend, "Volume", layout, pane);
}

fn short_date(raw: &str) -> String {
    parse_date(raw).map_or_else(|| raw.to_string(), |d| d.format("%b %-d").to_string())
}

fn draw_date_labels<B: RendererBackend + ?Sized>(
    backend: &mut B,
    series: &TimeSeries,
    cols: &Columns,
    layout: &Layout,
) {
    let step = (cols.count / DATE_LABELS).max(1);
    let style = TextStyle::new(AXIS_TEXT_COLOR, FONT, TextAlign::Center);
    let y = layout.height - PADDING.bottom + 16.0;
    for idx in cols.indices().step_by(step) {
        if let Some(raw) = series.dates.get(idx) {
            backend.draw_text(&short_date(raw), cols.x(idx), y, &style);
        }
    }
}

fn draw_legend<B: RendererBackend + ?Sized>(backend: &mut B, scene: &Scene<'_>, layout: &Layout) {
    let x = layout.width - PADDING.right + 8.0;
    let mut y = PADDING.top;
    let style = TextStyle::new(LEGEND_TEXT, FONT, TextAlign::Left);
    for kind in scene.overlays.enabled() {
        backend.fill_rects(&[(x, y, 12.0, 8.0)], kind.legend_color());
        backend.draw_text(
            &kind.legend_label(&scene.indicators.params),
            x + 18.0,
            y + 8.0,
            &style,
        );
        y += 18.0;
    }
}

fn draw_crosshair<B: RendererBackend + ?Sized>(backend: &mut B, layout: &Layout, x: f64) {
    backend.draw_segments(
        &[(x, PADDING.top, x, layout.height - PADDING.bottom)],
        CROSSHAIR_COLOR,
        1.0,
    );
}

fn group_thousands(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Tooltip rows for one candle. Missing values show as a dash.
pub fn tooltip_lines(series: &TimeSeries, idx: usize) -> Vec<String> {
    let at = |values: &[Option<f64>]| values.get(idx).copied().flatten();
    let date = series.dates.get(idx).cloned().unwrap_or_else(|| MISSING.to_string());
    vec![
        date,
        format!("O: {}", fmt_opt(at(&series.open), 2)),
        format!("H: {}", fmt_opt(at(&series.high), 2)),
        format!("L: {}", fmt_opt(at(&series.low), 2)),
        format!("C: {}", fmt_opt(at(&series.close), 2)),
        format!(
            "Vol: {}",
            at(&series.volume).map_or_else(|| MISSING.to_string(), group_thousands)
        ),
    ]
}

fn draw_tooltip<B: RendererBackend + ?Sized>(
    backend: &mut B,
    series: &TimeSeries,
    idx: usize,
    layout: &Layout,
    x: f64,
) {
    let lines = tooltip_lines(series, idx);
    let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let w = widest as f64 * 7.0 + 16.0;
    let h = lines.len() as f64 * 16.0 + 8.0;
    let left = if x + 12.0 + w > layout.plot_right {
        x - 12.0 - w
    } else {
        x + 12.0
    };
    let top = PADDING.top + 4.0;
    backend.fill_rects(&[(left, top, w, h)], TOOLTIP_FILL);
    for (i, line) in lines.iter().enumerate() {
        let font = if i == 0 { BOLD_FONT } else { FONT };
        backend.draw_text(
            line,
            left + 8.0,
            top + 16.0 * (i + 1) as f64,
            &TextStyle::new(TOOLTIP_TEXT, font, TextAlign::Left),
        );
    }
}

const INDEX_PADDING: f64 = 60.0;
const INDEX_LINE: &str = "#2CB74B";
const INDEX_FILL: &str = "rgba(198,241,219,0.8)";
const INDEX_AXIS: &str = "#cccccc";
const INDEX_GRID: &str = "#eeeeee";
const INDEX_TICKS: usize = 5;

/// Tick spacing and label format for the index chart's x axis.
fn index_ticks(preset: RangePreset, total: usize) -> (usize, &'static str) {
    let (parts, format) = match preset {
        RangePreset::OneWeek => (7, "%b %-d"),
        RangePreset::ThreeMonths => (3, "%b"),
        RangePreset::SixMonths => (6, "%b"),
        RangePreset::OneYear => (12, "%b"),
        RangePreset::FiveYears => (5, "%Y"),
        RangePreset::All => (6, "%Y"),
    };
    ((total / parts).max(1), format)
}

/// Index close line with an area fill underneath. Gaps in `closes` break
/// the line.
pub fn render_index_line<B: RendererBackend + ?Sized>(
    backend: &mut B,
    width: f64,
    height: f64,
    dates: &[String],
    closes: &[Option<f64>],
    preset: RangePreset,
    hover: Option<usize>,
) -> FrameOutcome {
    if width <= 0.0 || height <= 0.0 {
        return FrameOutcome::Skipped(SkipReason::ZeroSize);
    }
    let Some((min, max)) = closes.iter().flatten().fold(None, |acc: Option<(f64, f64)>, v| {
        Some(acc.map_or((*v, *v), |(lo, hi)| (lo.min(*v), hi.max(*v))))
    }) else {
        log::warn!("index chart has no closes to draw");
        return FrameOutcome::Skipped(SkipReason::NoPriceRange);
    };

    let pane = PaneRect {
        top: INDEX_PADDING,
        height: height - INDEX_PADDING * 2.0,
    };
    let scale = LinearScale::new(min, max, pane);
    let chart_w = width - INDEX_PADDING * 2.0;
    let last = closes.len().saturating_sub(1).max(1) as f64;
    let x_at = |i: usize| INDEX_PADDING + i as f64 / last * chart_w;
    let baseline = pane.bottom();

    backend.begin_frame(width, height, BACKGROUND);
    backend.draw_segments(
        &[
            (INDEX_PADDING, INDEX_PADDING, INDEX_PADDING, baseline),
            (INDEX_PADDING, baseline, width - INDEX_PADDING, baseline),
        ],
        INDEX_AXIS,
        1.0,
    );
    let label = TextStyle::new(AXIS_TEXT_COLOR, FONT, TextAlign::Left);
    let mut grid = Vec::with_capacity(INDEX_TICKS + 1);
    for i in 0..=INDEX_TICKS {
        let y = pane.top + pane.height * i as f64 / INDEX_TICKS as f64;
        grid.push((INDEX_PADDING, y, width - INDEX_PADDING, y));
        backend.draw_text(&format!("{:.2}", scale.to_value(y)), 5.0, y + 3.0, &label);
    }
    backend.draw_segments(&grid, INDEX_GRID, 1.0);

    let mut runs: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut current = Vec::new();
    for (i, close) in closes.iter().enumerate() {
        match close {
            Some(v) => current.push((x_at(i), scale.to_y(*v))),
            None if !current.is_empty() => runs.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    for run in &runs {
        if let (Some(first), Some(last)) = (run.first(), run.last()) {
            let mut area = run.clone();
            area.push((last.0, baseline));
            area.push((first.0, baseline));
            backend.fill_polygon(&area, INDEX_FILL);
        }
    }
    let line = LineStyle {
        color: INDEX_LINE,
        width: 2.0,
        pattern: LinePattern::Solid,
    };
    for run in &runs {
        backend.draw_polyline(run, &line);
    }

    let (step, format) = index_ticks(preset, dates.len());
    for i in (0..dates.len()).step_by(step) {
        let text = parse_date(&dates[i]).map_or_else(|| dates[i].clone(), |d| d.format(format).to_string());
        backend.draw_text(&text, x_at(i) - 10.0, baseline + 20.0, &label);
    }

    if let Some((idx, value)) = hover.and_then(|i| Some((i, closes.get(i).copied().flatten()?))) {
        let x = x_at(idx);
        draw_segments_marker(backend, x, pane);
        let tip = format!(
            "{}: {value:.2}",
            dates.get(idx).map(String::as_str).unwrap_or(MISSING)
        );
        backend.draw_text(
            &tip,
            x,
            pane.top - 8.0,
            &TextStyle::new(TOOLTIP_TEXT, BOLD_FONT, TextAlign::Center),
        );
    }
    FrameOutcome::Drawn
}

fn draw_segments_marker<B: RendererBackend + ?Sized>(backend: &mut B, x: f64, pane: PaneRect) {
    backend.draw_segments(&[(x, pane.top, x, pane.bottom())], CROSSHAIR_COLOR, 1.0);
}

/// Backing-store pixels and context scale for a canvas laid out at
/// `width` x `height` CSS pixels. Ratios below 1 are treated as 1.
pub fn backing_store(width: f64, height: f64, device_pixel_ratio: f64) -> (u32, u32, f64) {
    let dpr = if device_pixel_ratio.is_finite() {
        device_pixel_ratio.max(1.0)
    } else {
        1.0
    };
    let px = |v: f64| (v * dpr).floor().max(0.0) as u32;
    (px(width), px(height), dpr)
}

/// Index of the closest point on the index chart for a pointer x.
pub fn index_hover(x: f64, width: f64, count: usize) -> Option<usize> {
    let chart_w = width - INDEX_PADDING * 2.0;
    if count == 0 || chart_w <= 0.0 {
        return None;
    }
    let ratio = (x - INDEX_PADDING) / chart_w;
    if !(0.0..=1.0).contains(&ratio) {
        return None;
    }
    Some(((ratio * (count - 1) as f64).round() as usize).min(count - 1))
}
