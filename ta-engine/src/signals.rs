//! Qualitative labels and the additive buy/sell score shown in the info panel.

use serde::Serialize;
use ts_core::TimeSeries;

use crate::IndicatorSeries;

pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const RSI_OVERSOLD: f64 = 30.0;

/// Placeholder for a missing value in formatted output.
pub const MISSING: &str = "—";

/// Format an optional number with fixed decimals, or the missing marker.
pub fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => MISSING.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalLabel {
    Overbought,
    Oversold,
    Bullish,
    Bearish,
    Neutral,
    #[serde(rename = "N/A")]
    NotAvailable,
}

impl SignalLabel {
    pub fn score(&self) -> i32 {
        match self {
            SignalLabel::Oversold | SignalLabel::Bullish => 1,
            SignalLabel::Overbought | SignalLabel::Bearish => -1,
            SignalLabel::Neutral | SignalLabel::NotAvailable => 0,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            SignalLabel::Overbought => "Overbought",
            SignalLabel::Oversold => "Oversold",
            SignalLabel::Bullish => "Bullish",
            SignalLabel::Bearish => "Bearish",
            SignalLabel::Neutral => "Neutral",
            SignalLabel::NotAvailable => "N/A",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            SignalLabel::Oversold | SignalLabel::Bullish => "#007f33",
            SignalLabel::Overbought | SignalLabel::Bearish => "#c62828",
            SignalLabel::Neutral => "#9e9e9e",
            SignalLabel::NotAvailable => "#bdbdbd",
        }
    }
}

pub fn rsi_label(rsi: Option<f64>) -> SignalLabel {
    match rsi {
        None => SignalLabel::NotAvailable,
        Some(r) if r > RSI_OVERBOUGHT => SignalLabel::Overbought,
        Some(r) if r < RSI_OVERSOLD => SignalLabel::Oversold,
        Some(_) => SignalLabel::Neutral,
    }
}

pub fn macd_label(macd: Option<f64>, signal: Option<f64>, hist: Option<f64>) -> SignalLabel {
    let (Some(m), Some(s), Some(h)) = (macd, signal, hist) else {
        return SignalLabel::NotAvailable;
    };
    if m > s && h > 0.0 {
        SignalLabel::Bullish
    } else if m < s && h < 0.0 {
        SignalLabel::Bearish
    } else {
        SignalLabel::Neutral
    }
}

pub fn trend_label(price: Option<f64>, sma_short: Option<f64>, sma_long: Option<f64>) -> SignalLabel {
    let (Some(p), Some(s), Some(l)) = (price, sma_short, sma_long) else {
        return SignalLabel::NotAvailable;
    };
    if p > s && s > l {
        SignalLabel::Bullish
    } else if p < s && s < l {
        SignalLabel::Bearish
    } else {
        SignalLabel::Neutral
    }
}

/// One-line reading of the RSI label.
pub fn rsi_hint(label: SignalLabel) -> &'static str {
    match label {
        SignalLabel::Overbought => "Momentum: Price may drop soon.",
        SignalLabel::Oversold => "Momentum: Price may rise soon.",
        _ => "Momentum: Stable zone.",
    }
}

/// One-line reading of the MACD label.
pub fn macd_hint(label: SignalLabel) -> &'static str {
    match label {
        SignalLabel::Bullish => "Signal: Upward momentum (Buy)",
        SignalLabel::Bearish => "Signal: Downward momentum (Sell)",
        _ => "Signal: Neutral / Hold",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recommendation {
    #[serde(rename = "Strong Buy")]
    StrongBuy,
    Buy,
    Hold,
    Sell,
    #[serde(rename = "Strong Sell")]
    StrongSell,
}

impl Recommendation {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 2 => Recommendation::StrongBuy,
            1 => Recommendation::Buy,
            0 => Recommendation::Hold,
            -1 => Recommendation::Sell,
            _ => Recommendation::StrongSell,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Recommendation::StrongBuy => "Strong Buy",
            Recommendation::Buy => "Buy",
            Recommendation::Hold => "Hold",
            Recommendation::Sell => "Sell",
            Recommendation::StrongSell => "Strong Sell",
        }
    }

    /// Badge `(background, foreground)` colours.
    pub fn badge_colors(&self) -> (&'static str, &'static str) {
        match self {
            Recommendation::StrongBuy => ("#007f33", "#fff"),
            Recommendation::Buy => ("#2e7d32", "#fff"),
            Recommendation::Hold => ("#9e9e9e", "#fff"),
            Recommendation::Sell => ("#c62828", "#fff"),
            Recommendation::StrongSell => ("#8b0000", "#fff"),
        }
    }
}

/// Labels, score and recommendation at one index. Derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalAssessment {
    pub index: usize,
    pub price: Option<f64>,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub rsi_value: Option<f64>,
    pub macd_value: Option<f64>,
    pub signal_value: Option<f64>,
    pub hist_value: Option<f64>,
    pub rsi: SignalLabel,
    pub macd: SignalLabel,
    pub trend: SignalLabel,
    pub score: i32,
    pub recommendation: Recommendation,
}

fn at(values: &[Option<f64>], idx: usize) -> Option<f64> {
    values.get(idx).copied().flatten()
}

/// Assess signals at `index`, or at the latest index when `None`.
///
/// Returns `None` for an empty or out-of-range index.
pub fn evaluate(
    series: &TimeSeries,
    indicators: &IndicatorSeries,
    index: Option<usize>,
) -> Option<SignalAssessment> {
    let idx = match index {
        Some(i) => i,
        None => series.len().checked_sub(1)?,
    };
    if idx >= series.len() {
        return None;
    }

    let price = at(&series.close, idx);
    let sma_short = at(&indicators.sma_short, idx);
    let sma_long = at(&indicators.sma_long, idx);
    let rsi_value = at(&indicators.rsi, idx);
    let macd_value = at(&indicators.macd.macd, idx);
    let signal_value = at(&indicators.macd.signal, idx);
    let hist_value = at(&indicators.macd.hist, idx);

    let rsi = rsi_label(rsi_value);
    let macd = macd_label(macd_value, signal_value, hist_value);
    let trend = trend_label(price, sma_short, sma_long);
    let score = rsi.score() + macd.score() + trend.score();

    Some(SignalAssessment {
        index: idx,
        price,
        sma_short,
        sma_long,
        rsi_value,
        macd_value,
        signal_value,
        hist_value,
        rsi,
        macd,
        trend,
        score,
        recommendation: Recommendation::from_score(score),
    })
}

/// Index the info panel describes: a valid pin, then the hover, then the
/// last index with a close price, then the last index.
pub fn info_index(series: &TimeSeries, pinned: Option<usize>, hovered: Option<usize>) -> Option<usize> {
    if series.is_empty() {
        return None;
    }
    if let Some(p) = pinned.filter(|p| *p < series.len()) {
        return Some(p);
    }
    if hovered.is_some() {
        return hovered;
    }
    series
        .last_valid_close_index()
        .or_else(|| series.len().checked_sub(1))
}

/// Raw values shown in the info panel for one index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoSnapshot {
    pub index: usize,
    pub date: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub sma_short: Option<f64>,
    pub sma_long: Option<f64>,
    pub ema_short: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_lower: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
}

impl InfoSnapshot {
    pub fn at(series: &TimeSeries, indicators: &IndicatorSeries, idx: usize) -> Option<Self> {
        let date = series.dates.get(idx)?.clone();
        Some(Self {
            index: idx,
            date,
            open: at(&series.open, idx),
            high: at(&series.high, idx),
            low: at(&series.low, idx),
            close: at(&series.close, idx),
            volume: at(&series.volume, idx),
            sma_short: at(&indicators.sma_short, idx),
            sma_long: at(&indicators.sma_long, idx),
            ema_short: at(&indicators.ema_short, idx),
            bb_upper: at(&indicators.bands.upper, idx),
            bb_lower: at(&indicators.bands.lower, idx),
            rsi: at(&indicators.rsi, idx),
            macd: at(&indicators.macd.macd, idx),
            macd_signal: at(&indicators.macd.signal, idx),
            macd_hist: at(&indicators.macd.hist, idx),
        })
    }
}
