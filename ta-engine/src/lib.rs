use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt, str::FromStr};
use ts_core::TimeSeries;

pub mod signals;

pub use signals::{evaluate, InfoSnapshot, Recommendation, SignalAssessment, SignalLabel};

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BB_PERIOD: usize = 20;
pub const BB_K: f64 = 2.0;

pub const SHORT_PERIOD_RANGE: (usize, usize) = (2, 200);
pub const LONG_PERIOD_RANGE: (usize, usize) = (2, 400);

/// Payload key of the moving average the backend computes itself.
pub const SERVER_SMA_FIELD: &str = "sma20";

/// Togglable chart layers.
///
/// Outputs:
/// - SmaShort/SmaLong/Ema: single line (overlay)
/// - ServerSma: the backend's precomputed `sma20` (overlay)
/// - Bbands: upper/lower with a filled band (overlay)
/// - Macd: macd, signal, histogram (separate pane)
/// - Rsi: single line with 70/50/30 guides (separate pane)
/// - Volume: bars (separate pane)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    SmaShort,
    SmaLong,
    Ema,
    ServerSma,
    Bbands,
    Macd,
    Rsi,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIndicatorKindError;

impl fmt::Display for ParseIndicatorKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown indicator kind")
    }
}

impl std::error::Error for ParseIndicatorKindError {}

impl FromStr for IndicatorKind {
    type Err = ParseIndicatorKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "sma_short" | "sma" | "sma20" | "short_sma" => Ok(IndicatorKind::SmaShort),
            "sma_long" | "sma50" | "long_sma" => Ok(IndicatorKind::SmaLong),
            "ema" | "ema20" | "ema_short" => Ok(IndicatorKind::Ema),
            "server_sma" | "backend_sma" | "sma20_server" => Ok(IndicatorKind::ServerSma),
            "bbands" | "bb" | "bollinger" | "bollinger_bands" => Ok(IndicatorKind::Bbands),
            "macd" => Ok(IndicatorKind::Macd),
            "rsi" | "rsi14" => Ok(IndicatorKind::Rsi),
            "volume" | "vol" => Ok(IndicatorKind::Volume),
            _ => Err(ParseIndicatorKindError),
        }
    }
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 8] = [
        IndicatorKind::SmaShort,
        IndicatorKind::SmaLong,
        IndicatorKind::Ema,
        IndicatorKind::ServerSma,
        IndicatorKind::Bbands,
        IndicatorKind::Macd,
        IndicatorKind::Rsi,
        IndicatorKind::Volume,
    ];

    pub fn output(&self) -> OutputKind {
        match self {
            IndicatorKind::SmaShort
            | IndicatorKind::SmaLong
            | IndicatorKind::Ema
            | IndicatorKind::ServerSma
            | IndicatorKind::Bbands => OutputKind::Overlay,
            IndicatorKind::Macd | IndicatorKind::Rsi | IndicatorKind::Volume => {
                OutputKind::SeparatePane
            }
        }
    }

    /// Legend text, using the live SMA/EMA periods.
    pub fn legend_label(&self, params: &IndicatorParams) -> String {
        match self {
            IndicatorKind::SmaShort => format!("SMA {}", params.short_period),
            IndicatorKind::SmaLong => format!("SMA {}", params.long_period),
            IndicatorKind::Ema => format!("EMA {}", params.short_period),
            IndicatorKind::ServerSma => "SMA 20 (server)".to_string(),
            IndicatorKind::Bbands => "Bollinger Bands".to_string(),
            IndicatorKind::Macd => "MACD Line".to_string(),
            IndicatorKind::Rsi => format!("RSI ({RSI_PERIOD})"),
            IndicatorKind::Volume => "Volume Up / Down".to_string(),
        }
    }

    /// Swatch colour used by the legend.
    pub fn legend_color(&self) -> &'static str {
        match self {
            IndicatorKind::Bbands => "rgba(66,133,244,0.9)",
            IndicatorKind::Volume => VOLUME_UP_COLOR,
            other => default_line_styles(*other)
                .first()
                .map(|s| s.color)
                .unwrap_or("#222222"),
        }
    }
}

/// Where to draw the indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Overlay,
    SeparatePane,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinePattern {
    Solid,
    Dashed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineStyle {
    pub color: &'static str,
    pub width: f64,
    pub pattern: LinePattern,
}

impl LineStyle {
    const fn solid(color: &'static str, width: f64) -> Self {
        Self {
            color,
            width,
            pattern: LinePattern::Solid,
        }
    }
}

pub const VOLUME_UP_COLOR: &str = "rgba(38,166,154,0.7)";
pub const VOLUME_DOWN_COLOR: &str = "rgba(239,83,80,0.7)";
pub const BAND_FILL_COLOR: &str = "rgba(66,133,244,0.08)";
pub const BAND_EDGE_COLOR: &str = "rgba(66,133,244,0.25)";
pub const HIST_UP_COLOR: &str = "rgba(76,175,80,0.6)";
pub const HIST_DOWN_COLOR: &str = "rgba(244,67,54,0.6)";

/// Line styles per output line, in output order.
pub fn default_line_styles(kind: IndicatorKind) -> Vec<LineStyle> {
    match kind {
        IndicatorKind::SmaShort => vec![LineStyle::solid("#ff8a65", 1.6)],
        IndicatorKind::SmaLong => vec![LineStyle::solid("#9fa8da", 1.6)],
        IndicatorKind::Ema => vec![LineStyle::solid("#4db6ac", 1.4)],
        IndicatorKind::ServerSma => vec![LineStyle::solid("#2962ff", 1.5)],
        IndicatorKind::Bbands => vec![
            LineStyle::solid(BAND_EDGE_COLOR, 1.0),
            LineStyle::solid(BAND_EDGE_COLOR, 1.0),
        ],
        IndicatorKind::Macd => vec![
            LineStyle::solid("#3f51b5", 1.2),
            LineStyle::solid("#ff5722", 1.2),
        ],
        IndicatorKind::Rsi => vec![LineStyle::solid("#9c27b0", 1.2)],
        IndicatorKind::Volume => Vec::new(),
    }
}

/// User-tunable moving average periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorParams {
    /// Period of the short SMA and the EMA overlay.
    pub short_period: usize,
    /// Period of the long SMA.
    pub long_period: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            short_period: 20,
            long_period: 50,
        }
    }
}

impl IndicatorParams {
    pub fn clamped(short_period: usize, long_period: usize) -> Self {
        Self {
            short_period: short_period.clamp(SHORT_PERIOD_RANGE.0, SHORT_PERIOD_RANGE.1),
            long_period: long_period.clamp(LONG_PERIOD_RANGE.0, LONG_PERIOD_RANGE.1),
        }
    }

    /// Apply free-form text typed into the short period box.
    pub fn with_short_input(self, text: &str) -> Self {
        Self {
            short_period: parse_period(text, self.short_period, SHORT_PERIOD_RANGE),
            ..self
        }
    }

    /// Apply free-form text typed into the long period box.
    pub fn with_long_input(self, text: &str) -> Self {
        Self {
            long_period: parse_period(text, self.long_period, LONG_PERIOD_RANGE),
            ..self
        }
    }
}

/// Keep the digits of `text`, parse and clamp; no digits keeps `current`.
pub fn parse_period(text: &str, current: usize, (min, max): (usize, usize)) -> usize {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return current;
    }
    // Overflowing input saturates at the upper bound.
    digits.parse::<usize>().unwrap_or(max).clamp(min, max)
}

fn normalized(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

// ---------- Pure indicator functions ----------------------------------------

/// Simple moving average over exactly `period` trailing elements.
///
/// A position is defined only when every element of its window is present.
pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let mut window: VecDeque<Option<f64>> = VecDeque::with_capacity(period + 1);
    let mut sum = 0.0;
    let mut valid = 0usize;
    for (i, v) in values.iter().enumerate() {
        window.push_back(*v);
        if let Some(x) = v {
            sum += x;
            valid += 1;
        }
        if window.len() > period {
            if let Some(Some(old)) = window.pop_front() {
                sum -= old;
                valid -= 1;
            }
        }
        if window.len() == period && valid == period {
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

/// Exponential moving average with `k = 2 / (period + 1)`.
///
/// Seeds at the first present input. Once seeded, a missing input repeats
/// the previous value.
pub fn ema(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut prev: Option<f64> = None;
    for (i, v) in values.iter().enumerate() {
        prev = match (prev, v) {
            (None, Some(x)) => Some(*x),
            (Some(p), Some(x)) => Some(p + k * (x - p)),
            (p, None) => p,
        };
        out[i] = prev;
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Relative strength index with Wilder smoothing.
///
/// The change at `i` is `values[i] - values[i - 1]` and is undefined when
/// either side is missing. The first `period` defined changes are averaged to
/// seed the gain/loss averages; later changes smooth them. Positions with an
/// undefined change stay `None` and leave the averages untouched.
pub fn rsi(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let p = period as f64;
    let mut seen = 0usize;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..values.len() {
        let (Some(a), Some(b)) = (values[i - 1], values[i]) else {
            continue;
        };
        let change = b - a;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        if seen < period {
            avg_gain += gain;
            avg_loss += loss;
            seen += 1;
            if seen == period {
                avg_gain /= p;
                avg_loss /= p;
                out[i] = Some(rsi_value(avg_gain, avg_loss));
            }
        } else {
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
            out[i] = Some(rsi_value(avg_gain, avg_loss));
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacdOutput {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub hist: Vec<Option<f64>>,
}

pub fn macd(values: &[Option<f64>], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    let fast_line = ema(values, fast);
    let slow_line = ema(values, slow);
    let macd: Vec<Option<f64>> = fast_line
        .iter()
        .zip(&slow_line)
        .map(|(f, s)| Some((*f)? - (*s)?))
        .collect();
    let signal = ema(&macd, signal);
    let hist = macd
        .iter()
        .zip(&signal)
        .map(|(m, s)| Some((*m)? - (*s)?))
        .collect();
    MacdOutput { macd, signal, hist }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<Option<f64>>,
    pub mid: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Bollinger bands: `mid ± k * sd` with population deviation over `period`.
pub fn bollinger(values: &[Option<f64>], period: usize, k: f64) -> BollingerBands {
    let mid = sma(values, period);
    let mut upper = vec![None; values.len()];
    let mut lower = vec![None; values.len()];
    if period > 0 {
        for i in (period - 1)..values.len() {
            let Some(mean) = mid[i] else {
                continue;
            };
            let window = &values[i + 1 - period..=i];
            let variance = window
                .iter()
                .flatten()
                .map(|x| (x - mean).powi(2))
                .sum::<f64>()
                / period as f64;
            let sd = variance.sqrt();
            upper[i] = Some(mean + k * sd);
            lower[i] = Some(mean - k * sd);
        }
    }
    BollingerBands { upper, mid, lower }
}

/// Every derived sequence the chart draws, aligned 1:1 with a `TimeSeries`.
///
/// Recomputed from scratch whenever the series or the periods change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSeries {
    pub params: IndicatorParams,
    pub sma_short: Vec<Option<f64>>,
    pub sma_long: Vec<Option<f64>>,
    pub ema_short: Vec<Option<f64>>,
    /// Backend `sma20` aligned to the series; all `None` when absent.
    pub server_sma: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: MacdOutput,
    pub bands: BollingerBands,
}

fn precomputed(series: &TimeSeries, key: &str) -> Vec<Option<f64>> {
    let mut values = series.extra(key).map(|v| v.to_vec()).unwrap_or_default();
    values.resize(series.len(), None);
    values
}

impl IndicatorSeries {
    pub fn compute(series: &TimeSeries, params: IndicatorParams) -> Self {
        let close = &series.close;
        Self {
            params,
            sma_short: sma(close, params.short_period),
            sma_long: sma(close, params.long_period),
            ema_short: ema(close, params.short_period),
            server_sma: precomputed(series, SERVER_SMA_FIELD),
            rsi: rsi(close, RSI_PERIOD),
            macd: macd(close, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
            bands: bollinger(close, BB_PERIOD, BB_K),
        }
    }

    pub fn len(&self) -> usize {
        self.sma_short.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sma_short.is_empty()
    }

    /// Line outputs of `kind`, in the order of `default_line_styles`.
    pub fn lines(&self, kind: IndicatorKind) -> Vec<&[Option<f64>]> {
        match kind {
            IndicatorKind::SmaShort => vec![self.sma_short.as_slice()],
            IndicatorKind::SmaLong => vec![self.sma_long.as_slice()],
            IndicatorKind::Ema => vec![self.ema_short.as_slice()],
            IndicatorKind::ServerSma => vec![self.server_sma.as_slice()],
            IndicatorKind::Bbands => vec![self.bands.upper.as_slice(), self.bands.lower.as_slice()],
            IndicatorKind::Macd => vec![self.macd.macd.as_slice(), self.macd.signal.as_slice()],
            IndicatorKind::Rsi => vec![self.rsi.as_slice()],
            IndicatorKind::Volume => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn sma_matches_window_mean() {
        let closes = some(&[10.0, 11.0, 12.0, 11.0, 10.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0]);
        let out = sma(&closes, 3);
        assert_eq!(out.len(), closes.len());
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert!(approx(out[2].unwrap(), 11.0));
        assert!(approx(out[3].unwrap(), 34.0 / 3.0));
        for i in 2..closes.len() {
            let mean = (closes[i - 2].unwrap() + closes[i - 1].unwrap() + closes[i].unwrap()) / 3.0;
            assert!(approx(out[i].unwrap(), mean));
        }
    }

    #[test]
    fn sma_gap_invalidates_window() {
        let closes = vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)];
        let out = sma(&closes, 2);
        assert_eq!(out, vec![None, Some(1.5), None, None, Some(4.5), Some(5.5)]);
        assert!(sma(&closes, 0).iter().all(Option::is_none));
        assert!(sma(&closes, 10).iter().all(Option::is_none));
    }

    #[test]
    fn ema_seeds_and_carries_gaps() {
        let values = vec![None, Some(10.0), Some(20.0), None, Some(20.0)];
        let out = ema(&values, 3);
        assert_eq!(out.len(), values.len());
        assert_eq!(out[0], None);
        assert_eq!(out[1], Some(10.0));
        assert!(approx(out[2].unwrap(), 15.0));
        assert_eq!(out[3], out[2]);
        assert!(approx(out[4].unwrap(), 17.5));
        assert!(ema(&values, 0).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_saturates_on_rising_input() {
        let out = rsi(&some(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 3);
        assert_eq!(&out[..3], &[None, None, None]);
        for v in out.iter().skip(3) {
            let v = v.unwrap();
            assert!((0.0..=100.0).contains(&v));
            assert!(approx(v, 100.0));
        }
    }

    #[test]
    fn rsi_stays_in_bounds_and_skips_gaps() {
        let values = vec![
            Some(44.0),
            Some(44.3),
            Some(44.1),
            None,
            Some(43.6),
            Some(44.3),
            Some(44.8),
            Some(45.1),
            Some(44.2),
            Some(44.9),
        ];
        let out = rsi(&values, 3);
        assert_eq!(out[3], None);
        assert_eq!(out[4], None);
        for v in out.iter().flatten() {
            assert!((0.0..=100.0).contains(v));
        }
        // Changes at 1, 2, 5 seed the averages; index 5 carries the first value.
        assert!(out[5].is_some());
        assert!(out[..5].iter().all(Option::is_none));

        let falling = rsi(&some(&[5.0, 4.0, 3.0, 2.0, 1.0]), 2);
        assert_eq!(falling[2], Some(0.0));
    }

    #[test]
    fn macd_histogram_is_line_minus_signal() {
        let closes: Vec<Option<f64>> = (0..80)
            .map(|i| Some(100.0 + (i as f64 * 0.3).sin() * 5.0 + i as f64 * 0.1))
            .collect();
        let out = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        assert_eq!(out.hist.len(), closes.len());
        for i in 0..closes.len() {
            if let (Some(m), Some(s)) = (out.macd[i], out.signal[i]) {
                assert_eq!(out.hist[i], Some(m - s));
            }
        }
        let with_gap = macd(&[None, Some(1.0)], 2, 3, 2);
        assert_eq!(with_gap.macd[0], None);
        assert_eq!(with_gap.hist[0], None);
    }

    #[test]
    fn bollinger_width_matches_population_sd() {
        let closes: Vec<Option<f64>> = (0..40).map(|i| Some((i % 7) as f64 + 10.0)).collect();
        let bands = bollinger(&closes, BB_PERIOD, BB_K);
        let mid = sma(&closes, BB_PERIOD);
        assert_eq!(bands.mid, mid);
        for i in 0..closes.len() {
            if i + 1 < BB_PERIOD {
                assert!(bands.upper[i].is_none());
                continue;
            }
            let window: Vec<f64> = closes[i + 1 - BB_PERIOD..=i].iter().flatten().copied().collect();
            let mean = window.iter().sum::<f64>() / BB_PERIOD as f64;
            let sd = (window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / BB_PERIOD as f64).sqrt();
            let width = bands.upper[i].unwrap() - bands.lower[i].unwrap();
            assert!((width - 2.0 * BB_K * sd).abs() < 1e-9);
        }
    }

    #[test]
    fn bollinger_needs_full_window() {
        let mut closes = some(&[1.0, 2.0, 3.0, 4.0]);
        closes[1] = None;
        let bands = bollinger(&closes, 2, 2.0);
        assert_eq!(bands.upper, vec![None, None, None, Some(3.5 + 1.0)]);
    }

    #[test]
    fn compute_aligns_every_output() {
        let series = TimeSeries::from_rows(
            (0..30).map(|i| (format!("d{i}"), [1.0, 2.0, 0.5, 1.0 + i as f64, 100.0])),
        );
        let ind = IndicatorSeries::compute(&series, IndicatorParams::default());
        assert_eq!(ind.len(), series.len());
        for kind in IndicatorKind::ALL {
            for line in ind.lines(kind) {
                assert_eq!(line.len(), series.len());
            }
        }
        assert!(ind.sma_long.iter().all(Option::is_none));
        assert!(ind.sma_short[19].is_some());
    }

    #[test]
    fn period_input_is_sanitized() {
        assert_eq!(parse_period("35", 20, SHORT_PERIOD_RANGE), 35);
        assert_eq!(parse_period("1", 20, SHORT_PERIOD_RANGE), 2);
        assert_eq!(parse_period("9999", 50, LONG_PERIOD_RANGE), 400);
        assert_eq!(parse_period("a1b5", 20, SHORT_PERIOD_RANGE), 15);
        assert_eq!(parse_period("", 20, SHORT_PERIOD_RANGE), 20);
        let p = IndicatorParams::default().with_short_input("300").with_long_input("x");
        assert_eq!(p, IndicatorParams { short_period: 200, long_period: 50 });
        assert_eq!(IndicatorParams::clamped(0, 1000).long_period, 400);
    }

    #[test]
    fn kind_parses_aliases() {
        assert_eq!("SMA-Short".parse::<IndicatorKind>(), Ok(IndicatorKind::SmaShort));
        assert_eq!("bollinger bands".parse::<IndicatorKind>(), Ok(IndicatorKind::Bbands));
        assert_eq!("rsi14".parse::<IndicatorKind>(), Ok(IndicatorKind::Rsi));
        assert!("stoch".parse::<IndicatorKind>().is_err());
        assert_eq!(IndicatorKind::Macd.output(), OutputKind::SeparatePane);
        assert_eq!(
            IndicatorKind::SmaLong.legend_label(&IndicatorParams::default()),
            "SMA 50"
        );
        assert_eq!(IndicatorKind::SmaShort.legend_color(), "#ff8a65");
        assert_eq!("server_sma".parse::<IndicatorKind>(), Ok(IndicatorKind::ServerSma));
        assert_eq!(IndicatorKind::ServerSma.output(), OutputKind::Overlay);
    }

    #[test]
    fn server_sma_passes_through_backend_values() {
        let mut series = TimeSeries::from_rows((0..4).map(|i| (format!("d{i}"), [1.0; 5])));
        series
            .extras
            .insert(SERVER_SMA_FIELD.to_string(), vec![None, Some(2.5), Some(3.0)]);
        let ind = IndicatorSeries::compute(&series, IndicatorParams::default());
        assert_eq!(
            ind.lines(IndicatorKind::ServerSma),
            vec![&[None, Some(2.5), Some(3.0), None][..]]
        );

        series.extras.clear();
        let ind = IndicatorSeries::compute(&series, IndicatorParams::default());
        assert!(ind.server_sma.iter().all(Option::is_none));
        assert_eq!(ind.server_sma.len(), 4);
    }
}
