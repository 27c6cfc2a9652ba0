use std::collections::BTreeMap;

use chrono::{Datelike, Duration, Months};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use chrono::NaiveDate;

/// Precomputed indicator sequences the backend may ship next to OHLCV.
pub const EXTRA_FIELDS: [&str; 10] = [
    "sma20",
    "sma50",
    "ema20",
    "bb_upper",
    "bb_lower",
    "rsi14",
    "macd",
    "macd_signal",
    "atr14",
    "obv",
];

/// Date format used by every StockPal endpoint.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no `{0}` object")]
    MissingField(&'static str),
    #[error("unsupported payload shape: {0}")]
    Shape(&'static str),
}

/// Coerce a loosely typed JSON value into a finite number.
///
/// Finite numbers pass through. Strings are trimmed, stripped of thousands
/// separators and parsed. Everything else yields `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                return None;
            }
            cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// Force an optional raw sequence to exactly `len` coerced entries.
///
/// Shorter sequences are right-padded with `None`, longer ones truncated, and
/// anything that is not an array becomes all `None`.
pub fn align_values(raw: Option<&Value>, len: usize) -> Vec<Option<f64>> {
    let mut out: Vec<Option<f64>> = match raw {
        Some(Value::Array(items)) => items.iter().take(len).map(coerce_number).collect(),
        _ => Vec::with_capacity(len),
    };
    out.resize(len, None);
    out
}

fn date_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// A complete candle at one index (every OHLC field present).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl Candle {
    pub fn is_up(&self) -> bool {
        self.close >= self.open
    }
}

/// Daily price history with every attribute aligned to `dates`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub dates: Vec<String>,
    pub open: Vec<Option<f64>>,
    pub high: Vec<Option<f64>>,
    pub low: Vec<Option<f64>>,
    pub close: Vec<Option<f64>>,
    pub volume: Vec<Option<f64>>,
    /// Backend precomputed sequences keyed by their payload name.
    #[serde(default)]
    pub extras: BTreeMap<String, Vec<Option<f64>>>,
}

impl TimeSeries {
    /// Build a series from the `chart` object of a payload.
    ///
    /// `dates` defines the length and is never truncated. Malformed or
    /// missing attribute sequences degrade to `None` entries.
    pub fn align(chart: &Map<String, Value>) -> Self {
        let dates: Vec<String> = match chart.get("dates") {
            Some(Value::Array(items)) => items.iter().map(date_label).collect(),
            _ => Vec::new(),
        };
        let len = dates.len();
        let field = |key: &str| align_values(chart.get(key), len);

        let extras = EXTRA_FIELDS
            .iter()
            .filter(|key| chart.contains_key(**key))
            .map(|key| (key.to_string(), field(key)))
            .collect();

        Self {
            open: field("open"),
            high: field("high"),
            low: field("low"),
            close: field("close"),
            volume: field("volume"),
            dates,
            extras,
        }
    }

    /// Build a series from in-memory OHLCV rows (all fields present).
    pub fn from_rows<S: Into<String>>(rows: impl IntoIterator<Item = (S, [f64; 5])>) -> Self {
        let mut series = Self::default();
        for (date, [o, h, l, c, v]) in rows {
            series.dates.push(date.into());
            series.open.push(Some(o));
            series.high.push(Some(h));
            series.low.push(Some(l));
            series.close.push(Some(c));
            series.volume.push(Some(v));
        }
        series
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn extra(&self, key: &str) -> Option<&[Option<f64>]> {
        self.extras.get(key).map(Vec::as_slice)
    }

    /// Candle at `idx` when all of open/high/low/close are present.
    pub fn candle(&self, idx: usize) -> Option<Candle> {
        Some(Candle {
            open: (*self.open.get(idx)?)?,
            high: (*self.high.get(idx)?)?,
            low: (*self.low.get(idx)?)?,
            close: (*self.close.get(idx)?)?,
            volume: self.volume.get(idx).copied().flatten(),
        })
    }

    /// Last index holding a close price.
    pub fn last_valid_close_index(&self) -> Option<usize> {
        self.close.iter().rposition(Option::is_some)
    }
}

/// Extract and align the `chart` object of a `/api/<symbol>/` response.
///
/// A bare object that already carries `dates` is accepted as the chart.
pub fn decode_chart(payload: &Value) -> Result<TimeSeries, DecodeError> {
    let obj = payload
        .as_object()
        .ok_or(DecodeError::Shape("chart payload must be an object"))?;
    if let Some(chart) = obj.get("chart") {
        let chart = chart
            .as_object()
            .ok_or(DecodeError::Shape("`chart` must be an object"))?;
        return Ok(TimeSeries::align(chart));
    }
    if obj.contains_key("dates") {
        return Ok(TimeSeries::align(obj));
    }
    Err(DecodeError::MissingField("chart"))
}

/// Normalize the row payloads of the listing endpoints into a list of rows.
///
/// Accepts a bare array, `results` or `data` wrappers, objects keyed by
/// array indices (`{"0": .., "1": ..}`), JSON text holding any of those, and
/// a single object (one row). `null` decodes to no rows.
pub fn decode_rows(payload: &Value) -> Result<Vec<Value>, DecodeError> {
    match payload {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => Ok(rows.clone()),
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(text)?;
            match parsed {
                Value::String(_) => Err(DecodeError::Shape("doubly encoded JSON text")),
                Value::Array(rows) => Ok(rows),
                other => Ok(vec![other]),
            }
        }
        Value::Object(obj) => {
            for key in ["results", "data"] {
                if let Some(Value::Array(rows)) = obj.get(key) {
                    return Ok(rows.clone());
                }
            }
            if let Some(rows) = index_keyed_rows(obj) {
                return Ok(rows);
            }
            Ok(vec![payload.clone()])
        }
        Value::Bool(_) | Value::Number(_) => Err(DecodeError::Shape("scalar is not a row set")),
    }
}

fn index_keyed_rows(obj: &Map<String, Value>) -> Option<Vec<Value>> {
    if obj.is_empty() {
        return None;
    }
    let mut keyed = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        if !k.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        keyed.push((k.parse::<u64>().ok()?, v.clone()));
    }
    keyed.sort_by_key(|(k, _)| *k);
    Some(keyed.into_iter().map(|(_, v)| v).collect())
}

/// Parse a `YYYY-MM-DD` date, ignoring any trailing time component.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let head = s.trim().get(..10)?;
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Lookback windows offered for the NEPSE index chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RangePreset {
    #[serde(rename = "1W")]
    OneWeek,
    #[default]
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "5Y")]
    FiveYears,
    #[serde(rename = "ALL")]
    All,
}

impl RangePreset {
    pub fn label(&self) -> &'static str {
        match self {
            RangePreset::OneWeek => "1W",
            RangePreset::ThreeMonths => "3M",
            RangePreset::SixMonths => "6M",
            RangePreset::OneYear => "1Y",
            RangePreset::FiveYears => "5Y",
            RangePreset::All => "ALL",
        }
    }

    /// Parse a button label; unknown labels fall back to one year.
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "1W" => RangePreset::OneWeek,
            "3M" => RangePreset::ThreeMonths,
            "6M" => RangePreset::SixMonths,
            "5Y" => RangePreset::FiveYears,
            "ALL" => RangePreset::All,
            _ => RangePreset::OneYear,
        }
    }

    /// Earliest date kept relative to `today`; `None` keeps everything.
    ///
    /// Month arithmetic clamps to the end of shorter months.
    pub fn cutoff(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            RangePreset::OneWeek => today.checked_sub_signed(Duration::days(7)),
            RangePreset::ThreeMonths => today.checked_sub_months(Months::new(3)),
            RangePreset::SixMonths => today.checked_sub_months(Months::new(6)),
            RangePreset::OneYear => today.with_year(today.year() - 1).or_else(|| {
                today.checked_sub_months(Months::new(12))
            }),
            RangePreset::FiveYears => today.checked_sub_months(Months::new(60)),
            RangePreset::All => None,
        }
    }
}
