use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_core::{
    coerce_number, decode_chart, decode_rows, parse_date, DecodeError, NaiveDate, RangePreset,
    TimeSeries,
};

/// Rows per page of the price history table.
pub const HISTORY_PAGE_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("server responded with status {0}")]
    Status(u16),
}

/// REST endpoints served by the StockPal backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Chart(String),
    Prediction(String),
    History(String),
    Announcement(String),
    Nepse,
    CompanyTop,
    Companies,
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Endpoint::Chart(s) => format!("/api/{}/", encode_segment(s)),
            Endpoint::Prediction(s) => format!("/api/prediction/{}/", encode_segment(s)),
            Endpoint::History(s) => format!("/api/history/{}/", encode_segment(s)),
            Endpoint::Announcement(s) => format!("/api/announcement/{}/", encode_segment(s)),
            Endpoint::Nepse => "/api/nepse/".to_string(),
            Endpoint::CompanyTop => "/api/company/top/".to_string(),
            Endpoint::Companies => "/api/companies/".to_string(),
        }
    }

    pub fn url(&self, api_base: &str) -> String {
        format!("{}{}", api_base.trim_end_matches('/'), self.path())
    }
}

fn encode_segment(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for b in symbol.trim().bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn lenient_f64<'de, D>(de: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(de)?;
    Ok(match &raw {
        // "-5.88%" style percentages
        Value::String(s) => coerce_number(&Value::String(s.trim_end_matches('%').to_string())),
        other => coerce_number(other),
    })
}

fn lenient_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// `latest` block of the chart payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuote {
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub turnover: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub prev_close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub high_change_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub low_change_pct: Option<f64>,
}

/// Decoded `/api/<symbol>/` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartPayload {
    pub symbol: Option<String>,
    pub series: TimeSeries,
    pub latest: Option<LatestQuote>,
}

pub fn decode_chart_payload(payload: &Value) -> Result<ChartPayload, FeedError> {
    let series = decode_chart(payload)?;
    let latest = match payload.get("latest") {
        Some(v @ Value::Object(_)) => Some(LatestQuote::deserialize(v)?),
        _ => None,
    };
    let symbol = payload
        .get("symbol")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(ChartPayload {
        symbol,
        series,
        latest,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextDayPrediction {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub pred_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pred_movement: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub last_close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_date: Option<String>,
}

/// Decoded `/api/prediction/<symbol>/` response. Metrics and the prediction
/// table are passed through untouched for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionPayload {
    #[serde(default)]
    pub next_day_prediction: NextDayPrediction,
    #[serde(default)]
    pub classification_metrics: Value,
    #[serde(default)]
    pub predictions: Vec<Value>,
}

pub fn decode_prediction(payload: &Value) -> Result<PredictionPayload, FeedError> {
    if !payload.is_object() {
        return Err(DecodeError::Shape("prediction payload must be an object").into());
    }
    Ok(PredictionPayload::deserialize(payload)?)
}

/// One row of `/api/history/<symbol>/` (latest first).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub open: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub low: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub close: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub turnover: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub change_percent: Option<f64>,
}

/// One row of `/api/nepse/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NepseRow {
    #[serde(rename = "Date", default, deserialize_with = "lenient_string")]
    pub date: Option<String>,
    #[serde(rename = "Close", default, deserialize_with = "lenient_f64")]
    pub close: Option<f64>,
    #[serde(rename = "Change", default, deserialize_with = "lenient_f64")]
    pub change: Option<f64>,
    #[serde(rename = "Per Change (%)", default, deserialize_with = "lenient_f64")]
    pub percent_change: Option<f64>,
}

/// Entry of `/api/companies/` and `/api/company/top/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default, deserialize_with = "lenient_string")]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

/// Decode any row listing into typed rows. Rows that fail to decode are
/// skipped with a warning rather than failing the whole table.
pub fn decode_typed_rows<T>(payload: &Value) -> Result<Vec<T>, FeedError>
where
    T: for<'de> Deserialize<'de>,
{
    let rows = decode_rows(payload)?;
    let total = rows.len();
    let out: Vec<T> = rows
        .into_iter()
        .filter_map(|row| T::deserialize(row).ok())
        .collect();
    if out.len() < total {
        log::warn!("skipped {} undecodable rows of {}", total - out.len(), total);
    }
    Ok(out)
}

/// Announcements are displayed as-is.
pub fn decode_announcements(payload: &Value) -> Result<Vec<Value>, FeedError> {
    Ok(decode_rows(payload)?)
}

/// Inclusive `YYYY-MM-DD` bounds for the history table; empty bounds are open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl HistoryFilter {
    pub fn new(from: &str, to: &str) -> Self {
        let bound = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            from: bound(from),
            to: bound(to),
        }
    }

    /// Inclusive comparison on `YYYY-MM-DD` text. Rows without a date fail.
    pub fn accepts(&self, date: Option<&str>) -> bool {
        let Some(d) = date else {
            return false;
        };
        if d.is_empty() {
            return false;
        }
        if self.from.as_deref().is_some_and(|from| d < from) {
            return false;
        }
        if self.to.as_deref().is_some_and(|to| d > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a, T> {
    pub items: &'a [T],
    /// 1-based page actually shown.
    pub page: usize,
    pub total_pages: usize,
    pub total_rows: usize,
}

/// Slice `rows` into fixed-size pages; `page` is clamped to `1..=total_pages`.
pub fn paginate<T>(rows: &[T], page: usize, per_page: usize) -> Page<'_, T> {
    let per_page = per_page.max(1);
    let total_pages = rows.len().div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);
    let start = ((page - 1) * per_page).min(rows.len());
    let end = (start + per_page).min(rows.len());
    Page {
        items: &rows[start..end],
        page,
        total_pages,
        total_rows: rows.len(),
    }
}

pub fn filter_history<'a>(rows: &'a [HistoryRow], filter: &HistoryFilter) -> Vec<&'a HistoryRow> {
    rows.iter()
        .filter(|r| filter.accepts(r.date.as_deref()))
        .collect()
}

/// NEPSE rows inside `preset` counted back from `today`.
///
/// Rows with an unparseable date are dropped unless the preset keeps all.
pub fn nepse_window<'a>(rows: &'a [NepseRow], preset: RangePreset, today: NaiveDate) -> Vec<&'a NepseRow> {
    let Some(cutoff) = preset.cutoff(today) else {
        return rows.iter().collect();
    };
    rows.iter()
        .filter(|r| {
            r.date
                .as_deref()
                .and_then(parse_date)
                .is_some_and(|d| d >= cutoff)
        })
        .collect()
}

/// Dates and closes of `rows`, ready for the index line chart.
pub fn nepse_closes(rows: &[&NepseRow]) -> (Vec<String>, Vec<Option<f64>>) {
    rows.iter()
        .map(|r| (r.date.clone().unwrap_or_default(), r.close))
        .unzip()
}

// ---------- Generation-guarded feed store ------------------------------------

/// Identifies one chart request; only the newest ticket may land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub generation: u64,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub enum DataEvent {
    /// Chart payload for the request identified by `ticket`.
    Loaded {
        ticket: RequestTicket,
        payload: ChartPayload,
    },
    /// Transport or decode failure for the request.
    Failed {
        ticket: RequestTicket,
        reason: String,
    },
    /// Drop everything (symbol cleared or chart torn down).
    Reset,
}

/// Consumer interface for feed events.
pub trait DataSink {
    fn on_event(&mut self, event: DataEvent);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum FeedState {
    #[default]
    Idle,
    Loading,
    Ready(ChartPayload),
    /// Non-fatal empty state after a failed request.
    NoData(String),
}

/// Latest chart payload for the active symbol.
///
/// Every request takes a ticket from `begin`; events carrying an older
/// ticket than the last issued one are discarded.
#[derive(Debug, Default)]
pub struct FeedStore {
    symbol: String,
    generation: u64,
    state: FeedState,
}

impl FeedStore {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn payload(&self) -> Option<&ChartPayload> {
        match &self.state {
            FeedState::Ready(p) => Some(p),
            _ => None,
        }
    }

    /// Start a request, superseding every request still in flight.
    pub fn begin(&mut self, symbol: impl Into<String>) -> RequestTicket {
        self.generation += 1;
        self.symbol = symbol.into();
        self.state = FeedState::Loading;
        RequestTicket {
            generation: self.generation,
            symbol: self.symbol.clone(),
        }
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        ticket.generation == self.generation
    }
}

impl DataSink for FeedStore {
    fn on_event(&mut self, event: DataEvent) {
        match event {
            DataEvent::Loaded { ticket, payload } => {
                if !self.is_current(&ticket) {
                    log::debug!(
                        "dropping stale response for {} (generation {} < {})",
                        ticket.symbol,
                        ticket.generation,
                        self.generation
                    );
                    return;
                }
                self.state = if payload.series.is_empty() {
                    FeedState::NoData(format!("no data for {}", ticket.symbol))
                } else {
                    FeedState::Ready(payload)
                };
            }
            DataEvent::Failed { ticket, reason } => {
                if !self.is_current(&ticket) {
                    log::debug!("dropping stale failure for {}", ticket.symbol);
                    return;
                }
                log::warn!("chart request for {} failed: {}", ticket.symbol, reason);
                self.state = FeedState::NoData(reason);
            }
            DataEvent::Reset => {
                // In-flight tickets become stale.
                self.generation += 1;
                self.state = FeedState::Idle;
            }
        }
    }
}

// ---------- HTTP (browser) ---------------------------------------------------

/// GET `url` as JSON. `authorization` is sent verbatim as the
/// `Authorization` header.
#[cfg(target_arch = "wasm32")]
pub async fn fetch_json(url: &str, authorization: Option<&str>) -> Result<Value, FeedError> {
    use gloo_net::http::Request;

    let mut req = Request::get(url);
    if let Some(value) = authorization {
        req = req.header("Authorization", value);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| FeedError::Transport(e.to_string()))?;
    if !resp.ok() {
        return Err(FeedError::Status(resp.status()));
    }
    resp.json::<Value>()
        .await
        .map_err(|e| FeedError::Transport(e.to_string()))
}

/// Fetch and decode the chart payload for `symbol`.
#[cfg(target_arch = "wasm32")]
pub async fn fetch_chart(
    api_base: &str,
    symbol: &str,
    authorization: Option<&str>,
) -> Result<ChartPayload, FeedError> {
    let url = Endpoint::Chart(symbol.to_string()).url(api_base);
    let value = fetch_json(&url, authorization).await?;
    decode_chart_payload(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: usize) -> ChartPayload {
        ChartPayload {
            symbol: None,
            series: TimeSeries::from_rows((0..n).map(|i| (format!("d{i}"), [1.0; 5]))),
            latest: None,
        }
    }

    #[test]
    fn endpoint_urls() {
        let base = "http://127.0.0.1:8000/";
        assert_eq!(
            Endpoint::Chart("NABIL".into()).url(base),
            "http://127.0.0.1:8000/api/NABIL/"
        );
        assert_eq!(
            Endpoint::Prediction("a b".into()).path(),
            "/api/prediction/a%20b/"
        );
        assert_eq!(Endpoint::CompanyTop.url(base), "http://127.0.0.1:8000/api/company/top/");
        assert_eq!(Endpoint::Companies.path(), "/api/companies/");
        assert_eq!(Endpoint::Announcement("NABIL".into()).path(), "/api/announcement/NABIL/");
        assert_eq!(Endpoint::History(" NICA ".into()).path(), "/api/history/NICA/");
    }

    #[test]
    fn chart_payload_decodes_latest_with_strings() {
        let raw = json!({
            "symbol": "NABIL",
            "latest": {"date": "2024-01-02", "close": "1,050.5", "prevClose": 1000, "turnover": null},
            "chart": {"dates": ["2024-01-01", "2024-01-02"], "close": ["1,000", "1,050.5"]}
        });
        let p = decode_chart_payload(&raw).unwrap();
        assert_eq!(p.symbol.as_deref(), Some("NABIL"));
        assert_eq!(p.series.close, vec![Some(1000.0), Some(1050.5)]);
        let latest = p.latest.unwrap();
        assert_eq!(latest.close, Some(1050.5));
        assert_eq!(latest.prev_close, Some(1000.0));
        assert_eq!(latest.turnover, None);
        assert!(decode_chart_payload(&json!({"latest": {}})).is_err());
    }

    #[test]
    fn prediction_payload_decodes() {
        let raw = json!({
            "next_day_prediction": {"pred_price": "512.3", "pred_movement": "UP", "last_close": 500, "last_date": "2024-02-01"},
            "classification_metrics": {"accuracy": 0.61},
            "predictions": [{"date": "2024-01-31", "actual": 499.0, "predicted": 501.0}]
        });
        let p = decode_prediction(&raw).unwrap();
        assert_eq!(p.next_day_prediction.pred_price, Some(512.3));
        assert_eq!(p.next_day_prediction.pred_movement.as_deref(), Some("UP"));
        assert_eq!(p.predictions.len(), 1);
        assert_eq!(decode_prediction(&json!({})).unwrap(), PredictionPayload::default());
        assert!(decode_prediction(&json!([1])).is_err());
    }

    #[test]
    fn history_rows_tolerate_wrappers_and_percentages() {
        let raw = json!({"results": [
            {"date": "2024-01-03", "close": "1,100", "change_percent": "-5.88%"},
            {"date": "2024-01-02", "close": 1000, "change_percent": null},
            "garbage"
        ]});
        let rows: Vec<HistoryRow> = decode_typed_rows(&raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].close, Some(1100.0));
        assert_eq!(rows[0].change_percent, Some(-5.88));
        assert_eq!(rows[1].change_percent, None);
    }

    #[test]
    fn nepse_and_company_rows() {
        let nepse: Vec<NepseRow> = decode_typed_rows(&json!({"data": [
            {"Date": "2024-01-01", "Close": "2,100.5", "Change": -3.2, "Per Change (%)": "-0.15"}
        ]}))
        .unwrap();
        assert_eq!(nepse[0].close, Some(2100.5));
        assert_eq!(nepse[0].percent_change, Some(-0.15));

        let companies: Vec<Company> =
            decode_typed_rows(&json!([{"symbol": "NABIL", "name": "Nabil Bank", "sector": "Banking"}]))
                .unwrap();
        assert_eq!(companies[0].symbol.as_deref(), Some("NABIL"));
        assert_eq!(companies[0].details.get("sector"), Some(&json!("Banking")));
        assert_eq!(decode_announcements(&json!({"0": {"title": "AGM"}})).unwrap().len(), 1);
        let wrapped = json!(r#"{"title": "Dividend", "date": "2024-02-01"}"#);
        assert_eq!(
            decode_announcements(&wrapped).unwrap(),
            vec![json!({"title": "Dividend", "date": "2024-02-01"})]
        );
    }

    #[test]
    fn nepse_window_filters_by_preset() {
        let rows: Vec<NepseRow> = ["2023-01-15", "2024-03-20", "2024-05-30", "not a date"]
            .iter()
            .enumerate()
            .map(|(i, d)| NepseRow {
                date: Some(d.to_string()),
                close: Some(2000.0 + i as f64),
                ..Default::default()
            })
            .collect();
        let today = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        assert_eq!(nepse_window(&rows, RangePreset::OneWeek, today).len(), 1);
        assert_eq!(nepse_window(&rows, RangePreset::ThreeMonths, today).len(), 2);
        assert_eq!(nepse_window(&rows, RangePreset::FiveYears, today).len(), 3);
        assert_eq!(nepse_window(&rows, RangePreset::All, today).len(), 4);

        let window = nepse_window(&rows, RangePreset::ThreeMonths, today);
        let (dates, closes) = nepse_closes(&window);
        assert_eq!(dates, vec!["2024-03-20", "2024-05-30"]);
        assert_eq!(closes, vec![Some(2001.0), Some(2002.0)]);
    }

    #[test]
    fn history_filter_is_inclusive() {
        let rows: Vec<HistoryRow> = ["2024-01-03", "2024-01-02", "2024-01-01", ""]
            .iter()
            .map(|d| HistoryRow {
                date: Some(d.to_string()),
                ..Default::default()
            })
            .collect();
        let f = HistoryFilter::new("2024-01-02", "2024-01-03");
        assert_eq!(filter_history(&rows, &f).len(), 2);
        let open = HistoryFilter::new(" ", "");
        assert_eq!(filter_history(&rows, &open).len(), 3);
    }

    #[test]
    fn pagination_clamps_page() {
        let rows: Vec<u32> = (0..25).collect();
        let p = paginate(&rows, 3, HISTORY_PAGE_SIZE);
        assert_eq!(p.items, &[20, 21, 22, 23, 24]);
        assert_eq!(p.total_pages, 3);
        assert_eq!(paginate(&rows, 99, HISTORY_PAGE_SIZE).page, 3);
        assert_eq!(paginate(&rows, 0, HISTORY_PAGE_SIZE).page, 1);
        let empty: Vec<u32> = Vec::new();
        let p = paginate(&empty, 1, HISTORY_PAGE_SIZE);
        assert_eq!((p.total_pages, p.items.len()), (1, 0));
    }

    #[test]
    fn stale_responses_are_discarded() {
        let mut store = FeedStore::new("A");
        let first = store.begin("A");
        let second = store.begin("B");
        store.on_event(DataEvent::Loaded {
            ticket: first,
            payload: payload(3),
        });
        assert_eq!(store.state(), &FeedState::Loading);

        store.on_event(DataEvent::Loaded {
            ticket: second.clone(),
            payload: payload(2),
        });
        assert_eq!(store.payload().map(|p| p.series.len()), Some(2));
        assert_eq!(store.symbol(), "B");
    }

    #[test]
    fn failures_and_reset() {
        let mut store = FeedStore::new("A");
        let t = store.begin("A");
        store.on_event(DataEvent::Failed {
            ticket: t.clone(),
            reason: "offline".into(),
        });
        assert_eq!(store.state(), &FeedState::NoData("offline".into()));

        let t2 = store.begin("A");
        store.on_event(DataEvent::Reset);
        store.on_event(DataEvent::Loaded {
            ticket: t2,
            payload: payload(1),
        });
        assert_eq!(store.state(), &FeedState::Idle);

        let t3 = store.begin("A");
        store.on_event(DataEvent::Loaded {
            ticket: t3,
            payload: payload(0),
        });
        assert!(matches!(store.state(), FeedState::NoData(_)));
    }
}
