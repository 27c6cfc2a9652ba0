//! StockPal indicator chart.
//!
//! `ChartModel` holds everything a chart instance owns (series, indicators,
//! view window, hover and pin) and is plain Rust so it can be driven from
//! tests. The browser wiring lives in `web` and only builds for wasm32.

pub mod render;
pub mod view;
#[cfg(target_arch = "wasm32")]
mod web;

#[cfg(target_arch = "wasm32")]
pub use web::{ApiClient, ChartHandle, IndexChartHandle};

use app_shell::{ChartPrefs, OverlayToggles, ViewPreset};
use serde::Serialize;
use ta_engine::signals::{info_index, macd_hint, rsi_hint};
use ta_engine::{evaluate, IndicatorKind, IndicatorParams, IndicatorSeries, InfoSnapshot, SignalAssessment};
use ts_core::TimeSeries;

use crate::render::{render_chart, FrameOutcome, Layout, RendererBackend, Scene, PADDING};
use crate::view::{anchor_ratio, ViewController, ViewWindow};

/// Events forwarded to JS subscribers as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ChartEvent {
    Hover {
        index: Option<usize>,
        date: Option<String>,
    },
    ViewChanged {
        start: usize,
        end: usize,
    },
    Pinned {
        index: Option<usize>,
    },
    DataLoaded {
        symbol: String,
        len: usize,
    },
    NoData {
        symbol: String,
        reason: String,
    },
}

/// Info panel contents for the resolved index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoPanel {
    pub pinned: bool,
    pub snapshot: InfoSnapshot,
    pub assessment: SignalAssessment,
    pub rsi_hint: &'static str,
    pub macd_hint: &'static str,
}

/// State of one chart instance.
#[derive(Debug, Clone)]
pub struct ChartModel {
    series: TimeSeries,
    indicators: IndicatorSeries,
    params: IndicatorParams,
    overlays: OverlayToggles,
    view: ViewController,
    hover: Option<usize>,
    pinned: Option<usize>,
    pointer: Option<(f64, f64)>,
    width: f64,
    height: f64,
    dirty: bool,
}

impl ChartModel {
    pub fn new(prefs: &ChartPrefs, min_visible: usize) -> Self {
        Self {
            series: TimeSeries::default(),
            indicators: IndicatorSeries::default(),
            params: prefs.params,
            overlays: prefs.overlays,
            view: ViewController::new(min_visible, prefs.preset),
            hover: None,
            pinned: None,
            pointer: None,
            width: 0.0,
            height: 0.0,
            dirty: true,
        }
    }

    /// Replace the series. Indicators are recomputed, the view goes back to
    /// the preset window and hover/pin are cleared.
    pub fn load(&mut self, series: TimeSeries) {
        self.indicators = IndicatorSeries::compute(&series, self.params);
        self.view.initialize(series.len());
        self.series = series;
        self.hover = None;
        self.pinned = None;
        self.dirty = true;
    }

    pub fn clear(&mut self) {
        self.load(TimeSeries::default());
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    pub fn indicators(&self) -> &IndicatorSeries {
        &self.indicators
    }

    pub fn params(&self) -> IndicatorParams {
        self.params
    }

    pub fn overlays(&self) -> &OverlayToggles {
        &self.overlays
    }

    pub fn window(&self) -> ViewWindow {
        self.view.window()
    }

    pub fn hover(&self) -> Option<usize> {
        self.hover
    }

    pub fn pinned(&self) -> Option<usize> {
        self.pinned
    }

    pub fn prefs(&self) -> ChartPrefs {
        ChartPrefs {
            params: self.params,
            overlays: self.overlays,
            preset: self.view.preset(),
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::compute(self.width, self.height, &self.overlays)
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.dirty = true;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Whether a redraw is owed; clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn view_changed(&mut self) -> ChartEvent {
        self.dirty = true;
        self.refresh_hover();
        let w = self.view.window();
        ChartEvent::ViewChanged {
            start: w.start,
            end: w.end,
        }
    }

    fn hover_at(&self, x: f64, y: f64) -> Option<usize> {
        let layout = self.layout();
        if y < PADDING.top || y > self.height - PADDING.bottom {
            return None;
        }
        self.view.index_at(x, layout.plot_left, layout.plot_width())
    }

    fn refresh_hover(&mut self) -> bool {
        let next = self.pointer.and_then(|(x, y)| self.hover_at(x, y));
        let changed = next != self.hover;
        self.hover = next;
        changed
    }

    fn hover_event(&self) -> ChartEvent {
        ChartEvent::Hover {
            index: self.hover,
            date: self.hover.and_then(|i| self.series.dates.get(i).cloned()),
        }
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) {
        self.pointer = Some((x, y));
        let layout = self.layout();
        if (layout.plot_left..=layout.plot_right).contains(&x) {
            self.view.pan_start(x);
        }
    }

    /// Pointer moved over the canvas. Hover changes never touch the view.
    pub fn pointer_move(&mut self, x: f64, y: f64) -> Vec<ChartEvent> {
        self.pointer = Some((x, y));
        let mut events = Vec::new();
        if self.view.is_dragging() {
            let ppc = self.view.pixels_per_candle(self.layout().plot_width());
            if self.view.pan_move(x, ppc) {
                events.push(self.view_changed());
            }
        }
        if self.refresh_hover() {
            self.dirty = true;
            events.push(self.hover_event());
        }
        events
    }

    pub fn pointer_up(&mut self) {
        self.view.pan_end();
    }

    pub fn pointer_leave(&mut self) -> Option<ChartEvent> {
        self.pointer = None;
        if self.hover.take().is_some() {
            self.dirty = true;
            return Some(self.hover_event());
        }
        None
    }

    pub fn wheel(&mut self, delta_y: f64, x: f64) -> Option<ChartEvent> {
        let layout = self.layout();
        let ratio = anchor_ratio(x, layout.plot_left, layout.plot_width());
        self.view.wheel(delta_y, ratio).then(|| self.view_changed())
    }

    pub fn set_preset(&mut self, preset: ViewPreset) -> ChartEvent {
        self.view.set_preset(preset);
        self.view_changed()
    }

    pub fn reset_view(&mut self) -> ChartEvent {
        self.view.reset();
        self.view_changed()
    }

    /// Flip an overlay or pane, returning the new state.
    pub fn toggle_overlay(&mut self, kind: IndicatorKind) -> bool {
        self.dirty = true;
        let on = self.overlays.toggle(kind);
        self.refresh_hover();
        on
    }

    pub fn set_params(&mut self, params: IndicatorParams) {
        if params == self.params {
            return;
        }
        self.params = params;
        self.indicators = IndicatorSeries::compute(&self.series, params);
        self.dirty = true;
    }

    /// Apply typed short-period input; returns the period in effect.
    pub fn set_short_period(&mut self, text: &str) -> usize {
        self.set_params(self.params.with_short_input(text));
        self.params.short_period
    }

    pub fn set_long_period(&mut self, text: &str) -> usize {
        self.set_params(self.params.with_long_input(text));
        self.params.long_period
    }

    /// Pin `index`, or whatever the info panel currently shows.
    pub fn pin(&mut self, index: Option<usize>) -> ChartEvent {
        let target = index.or_else(|| self.info_index());
        self.pinned = target.filter(|i| *i < self.series.len());
        self.dirty = true;
        ChartEvent::Pinned { index: self.pinned }
    }

    pub fn unpin(&mut self) -> ChartEvent {
        self.pinned = None;
        self.dirty = true;
        ChartEvent::Pinned { index: None }
    }

    pub fn info_index(&self) -> Option<usize> {
        info_index(&self.series, self.pinned, self.hover)
    }

    pub fn info(&self) -> Option<InfoPanel> {
        let idx = self.info_index()?;
        let snapshot = InfoSnapshot::at(&self.series, &self.indicators, idx)?;
        let assessment = evaluate(&self.series, &self.indicators, Some(idx))?;
        Some(InfoPanel {
            pinned: self.pinned == Some(idx),
            rsi_hint: rsi_hint(assessment.rsi),
            macd_hint: macd_hint(assessment.macd),
            snapshot,
            assessment,
        })
    }

    /// Draw the current state. Skipped frames leave the backend untouched.
    pub fn render<B: RendererBackend + ?Sized>(&self, backend: &mut B) -> FrameOutcome {
        let scene = Scene {
            series: &self.series,
            indicators: &self.indicators,
            window: self.view.window(),
            hover: self.hover,
            overlays: &self.overlays,
        };
        render_chart(backend, self.width, self.height, &scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{PlotCandle, TextStyle};
    use crate::view::MIN_VISIBLE;
    use app_shell::ChartConfig;
    use ta_engine::{LineStyle, SignalLabel};

    #[derive(Default)]
    struct CountingBackend {
        frames: usize,
        candles: usize,
    }

    impl RendererBackend for CountingBackend {
        fn begin_frame(&mut self, _w: f64, _h: f64, _c: &str) {
            self.frames += 1;
        }
        fn draw_candles(&mut self, candles: &[PlotCandle], _u: &str, _d: &str) {
            self.candles += candles.len();
        }
        fn draw_polyline(&mut self, _p: &[(f64, f64)], _s: &LineStyle) {}
        fn draw_segments(&mut self, _s: &[(f64, f64, f64, f64)], _c: &str, _w: f64) {}
        fn fill_rects(&mut self, _r: &[(f64, f64, f64, f64)], _c: &str) {}
        fn fill_polygon(&mut self, _p: &[(f64, f64)], _f: &str) {}
        fn draw_text(&mut self, _t: &str, _x: f64, _y: f64, _s: &TextStyle) {}
    }

    fn rising(n: usize) -> TimeSeries {
        TimeSeries::from_rows((0..n).map(|i| {
            let c = 100.0 + i as f64;
            (
                format!("2023-{:02}-{:02}", i / 28 + 1, i % 28 + 1),
                [c - 0.5, c + 1.0, c - 1.0, c, 500.0],
            )
        }))
    }

    fn prefs() -> ChartPrefs {
        ChartPrefs::from_config(&ChartConfig::default())
    }

    fn model(n: usize) -> ChartModel {
        let mut m = ChartModel::new(&prefs(), MIN_VISIBLE);
        m.resize(900.0, 640.0);
        m.load(rising(n));
        m
    }

    #[test]
    fn load_resets_view_hover_and_pin() {
        let mut m = model(300);
        assert_eq!(m.window(), ViewWindow { start: 180, end: 300 });
        m.pointer_move(300.0, 100.0);
        m.pin(None);
        assert!(m.hover().is_some());
        assert!(m.pinned().is_some());

        m.load(rising(50));
        assert_eq!(m.window(), ViewWindow { start: 0, end: 50 });
        assert_eq!(m.hover(), None);
        assert_eq!(m.pinned(), None);
        assert_eq!(m.indicators().len(), 50);
    }

    #[test]
    fn hover_tracks_plot_area_only() {
        let mut m = model(300);
        // 120 candles over 740px.
        let events = m.pointer_move(50.0, 100.0);
        assert_eq!(m.hover(), Some(180));
        assert!(matches!(events.as_slice(), [ChartEvent::Hover { index: Some(180), .. }]));
        let before = m.window();
        m.pointer_move(60.0, 100.0);
        assert_eq!(m.window(), before);

        m.pointer_move(20.0, 100.0);
        assert_eq!(m.hover(), None);
        m.pointer_move(300.0, 630.0);
        assert_eq!(m.hover(), None);

        m.pointer_move(300.0, 100.0);
        assert!(m.pointer_leave().is_some());
        assert_eq!(m.hover(), None);
        assert!(m.pointer_leave().is_none());
    }

    #[test]
    fn drag_pans_and_emits_view_change() {
        let mut m = model(300);
        m.take_dirty();
        m.pointer_down(400.0, 100.0);
        let events = m.pointer_move(400.0 + 740.0 / 120.0 * 10.0, 100.0);
        assert!(events.contains(&ChartEvent::ViewChanged { start: 170, end: 290 }));
        assert!(m.take_dirty());
        m.pointer_up();
        m.pointer_move(100.0, 100.0);
        assert_eq!(m.window(), ViewWindow { start: 170, end: 290 });
    }

    #[test]
    fn wheel_zooms_around_pointer() {
        let mut m = model(300);
        let event = m.wheel(1.0, 790.0);
        assert_eq!(event, Some(ChartEvent::ViewChanged { start: 162, end: 300 }));
        assert_eq!(m.reset_view(), ChartEvent::ViewChanged { start: 180, end: 300 });
        m.set_preset(ViewPreset::Last30);
        assert_eq!(m.window(), ViewWindow { start: 270, end: 300 });
        assert_eq!(m.prefs().preset, ViewPreset::Last30);
    }

    #[test]
    fn info_prefers_pin_then_hover_then_latest() {
        let mut m = model(100);
        m.load({
            let mut s = rising(100);
            s.close[99] = None;
            s
        });
        assert_eq!(m.info_index(), Some(98));

        m.set_preset(ViewPreset::All);
        m.pointer_move(50.0, 100.0);
        assert_eq!(m.info_index(), Some(0));

        assert_eq!(m.pin(Some(42)), ChartEvent::Pinned { index: Some(42) });
        let info = m.info().unwrap();
        assert!(info.pinned);
        assert_eq!(info.snapshot.index, 42);
        assert_eq!(info.snapshot.date, "2023-02-15");

        m.unpin();
        assert_eq!(m.info_index(), Some(0));
        assert_eq!(m.pin(Some(1000)), ChartEvent::Pinned { index: None });
    }

    #[test]
    fn info_on_rising_series_is_bullish() {
        let m = model(120);
        let info = m.info().unwrap();
        assert_eq!(info.snapshot.index, 119);
        assert!(!info.pinned);
        assert_eq!(info.assessment.trend, SignalLabel::Bullish);
        assert_eq!(info.assessment.rsi, SignalLabel::Overbought);
        assert_eq!(info.rsi_hint, "Momentum: Price may drop soon.");
    }

    #[test]
    fn period_input_recomputes_indicators() {
        let mut m = model(80);
        assert_eq!(m.set_short_period("5"), 5);
        assert_eq!(m.indicators().params.short_period, 5);
        assert!(m.indicators().sma_short[4].is_some());
        assert_eq!(m.set_long_period("abc"), 50);
        assert_eq!(m.set_long_period("9999"), 400);
        assert_eq!(m.prefs().params.long_period, 400);
    }

    #[test]
    fn toggles_change_layout() {
        let mut m = model(80);
        assert!(m.layout().macd.is_none());
        assert!(m.toggle_overlay(IndicatorKind::Macd));
        assert!(m.layout().macd.is_some());
        assert!(!m.toggle_overlay(IndicatorKind::Volume));
        assert!(m.layout().volume.is_none());
    }

    #[test]
    fn render_draws_visible_candles() {
        let m = model(300);
        let mut backend = CountingBackend::default();
        assert_eq!(m.render(&mut backend), FrameOutcome::Drawn);
        assert_eq!(backend.frames, 1);
        assert_eq!(backend.candles, 120);

        let mut empty = ChartModel::new(&prefs(), MIN_VISIBLE);
        empty.resize(900.0, 640.0);
        let mut backend = CountingBackend::default();
        assert!(matches!(empty.render(&mut backend), FrameOutcome::Skipped(_)));
        assert_eq!(backend.frames, 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(ChartEvent::ViewChanged { start: 1, end: 9 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ViewChanged", "start": 1, "end": 9}));
    }
}
