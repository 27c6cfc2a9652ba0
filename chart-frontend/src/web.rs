//! Browser bindings: canvas backend, listener wiring and the JS-facing
//! handles.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::Once;

use app_shell::{BrowserStorage, ChartConfig, ChartPrefs, Session, SessionKeys, ViewPreset};
use data_feed::{
    decode_announcements, decode_prediction, decode_typed_rows, fetch_chart, fetch_json,
    filter_history, nepse_closes, nepse_window, paginate, Company, DataEvent, DataSink, Endpoint,
    FeedState, FeedStore, HistoryFilter, HistoryRow, NepseRow, HISTORY_PAGE_SIZE,
};
use js_sys::{Array, Function, Promise};
use ta_engine::{IndicatorKind, LinePattern, LineStyle};
use ts_core::{NaiveDate, RangePreset};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, spawn_local};
use web_sys::{
    AddEventListenerOptions, CanvasRenderingContext2d, Event, EventTarget, HtmlCanvasElement,
    PointerEvent, WheelEvent,
};

use crate::render::{
    backing_store, index_hover, render_index_line, PlotCandle, RendererBackend, TextAlign,
    TextStyle,
};
use crate::{ChartEvent, ChartModel};

fn js_err(e: impl Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn init_runtime(level: log::Level) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        console_error_panic_hook::set_once();
        if console_log::init_with_level(level).is_err() {
            log::debug!("logger already installed");
        }
    });
}

fn canvas_by_id(canvas_id: &str) -> Result<(HtmlCanvasElement, CanvasRenderingContext2d), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let document = window
        .document()
        .ok_or_else(|| JsValue::from_str("no document"))?;
    let element = document
        .get_element_by_id(canvas_id)
        .ok_or_else(|| JsValue::from_str("canvas not found"))?;
    let canvas: HtmlCanvasElement = element
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| JsValue::from_str("element is not a canvas"))?;
    let context = canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("no 2d context"))?
        .dyn_into::<CanvasRenderingContext2d>()?;
    Ok((canvas, context))
}

/// Pointer position relative to the canvas' top-left corner.
fn local_point(canvas: &HtmlCanvasElement, client_x: i32, client_y: i32) -> (f64, f64) {
    let rect = canvas.get_bounding_client_rect();
    (client_x as f64 - rect.left(), client_y as f64 - rect.top())
}

fn canvas_size(canvas: &HtmlCanvasElement) -> (f64, f64) {
    let rect = canvas.get_bounding_client_rect();
    (rect.width().max(1.0), rect.height().max(1.0))
}

fn session_from(storage: Option<&BrowserStorage>, keys: SessionKeys) -> Session {
    match storage {
        Some(store) => Session::restore(keys, store),
        None => Session::anonymous(keys),
    }
}

fn open_storage() -> Option<BrowserStorage> {
    BrowserStorage::open()
        .map_err(|e| log::warn!("preferences will not persist: {e}"))
        .ok()
}

// ---------- Canvas backend ----------------------------------------------------

struct CanvasBackend {
    canvas: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
}

impl CanvasBackend {
    fn new(canvas: HtmlCanvasElement, ctx: CanvasRenderingContext2d) -> Self {
        Self { canvas, ctx }
    }

    fn set_dash(&self, pattern: LinePattern) {
        let dash = match pattern {
            LinePattern::Solid => Array::new(),
            LinePattern::Dashed => Array::of2(&JsValue::from_f64(5.0), &JsValue::from_f64(5.0)),
        };
        if let Err(e) = self.ctx.set_line_dash(&dash) {
            log::debug!("set_line_dash failed: {e:?}");
        }
    }

    fn trace(&self, points: &[(f64, f64)]) -> bool {
        let Some((first, rest)) = points.split_first() else {
            return false;
        };
        self.ctx.begin_path();
        self.ctx.move_to(first.0, first.1);
        for p in rest {
            self.ctx.line_to(p.0, p.1);
        }
        true
    }
}

impl RendererBackend for CanvasBackend {
    fn begin_frame(&mut self, width: f64, height: f64, clear_color: &str) {
        let ratio = web_sys::window().map_or(1.0, |w| w.device_pixel_ratio());
        let (px_w, px_h, dpr) = backing_store(width, height, ratio);
        // Layout size stays in CSS pixels while the backing store grows.
        let style = self.canvas.style();
        for (name, value) in [("width", width), ("height", height)] {
            if let Err(e) = style.set_property(name, &format!("{value}px")) {
                log::debug!("could not pin canvas {name}: {e:?}");
            }
        }
        self.canvas.set_width(px_w);
        self.canvas.set_height(px_h);
        if let Err(e) = self.ctx.set_transform(dpr, 0.0, 0.0, dpr, 0.0, 0.0) {
            log::debug!("set_transform failed: {e:?}");
        }
        self.ctx.set_fill_style_str(clear_color);
        self.ctx.fill_rect(0.0, 0.0, width, height);
    }

    fn draw_candles(&mut self, candles: &[PlotCandle], color_up: &str, color_down: &str) {
        let ctx = &self.ctx;
        ctx.set_line_width(1.0);
        for c in candles {
            let up = c.close >= c.open;
            let color = if up { color_up } else { color_down };
            ctx.set_stroke_style_str(color);
            ctx.set_fill_style_str(color);
            ctx.begin_path();
            ctx.move_to(c.x, c.y_high);
            ctx.line_to(c.x, c.y_low);
            ctx.stroke();

            let body_top = c.y_open.min(c.y_close);
            let body_bottom = c.y_open.max(c.y_close);
            let body_h = (body_bottom - body_top).max(1.0);
            ctx.fill_rect(c.x - c.half_w, body_top, c.half_w * 2.0, body_h);
        }
    }

    fn draw_polyline(&mut self, points: &[(f64, f64)], style: &LineStyle) {
        if points.len() < 2 {
            return;
        }
        self.set_dash(style.pattern);
        self.ctx.set_stroke_style_str(style.color);
        self.ctx.set_line_width(style.width);
        self.trace(points);
        self.ctx.stroke();
        self.set_dash(LinePattern::Solid);
    }

    fn draw_segments(&mut self, segments: &[(f64, f64, f64, f64)], color: &str, width: f64) {
        if segments.is_empty() {
            return;
        }
        let ctx = &self.ctx;
        ctx.set_stroke_style_str(color);
        ctx.set_line_width(width);
        for (x1, y1, x2, y2) in segments {
            ctx.begin_path();
            ctx.move_to(*x1, *y1);
            ctx.line_to(*x2, *y2);
            ctx.stroke();
        }
    }

    fn fill_rects(&mut self, rects: &[(f64, f64, f64, f64)], color: &str) {
        if rects.is_empty() {
            return;
        }
        self.ctx.set_fill_style_str(color);
        for (x, y, w, h) in rects {
            self.ctx.fill_rect(*x, *y, *w, *h);
        }
    }

    fn fill_polygon(&mut self, points: &[(f64, f64)], fill: &str) {
        if points.len() < 3 || !self.trace(points) {
            return;
        }
        self.ctx.close_path();
        self.ctx.set_fill_style_str(fill);
        self.ctx.fill();
    }

    fn draw_text(&mut self, text: &str, x: f64, y: f64, style: &TextStyle) {
        self.ctx.set_fill_style_str(style.color);
        self.ctx.set_font(style.font);
        self.ctx.set_text_align(match style.align {
            TextAlign::Left => "left",
            TextAlign::Center => "center",
            TextAlign::Right => "right",
        });
        if let Err(e) = self.ctx.fill_text(text, x, y) {
            log::debug!("fill_text failed: {e:?}");
        }
    }
}

// ---------- Listener ownership ------------------------------------------------

struct Listener {
    target: EventTarget,
    kind: &'static str,
    closure: Closure<dyn FnMut(Event)>,
}

/// Owns every DOM listener a handle registers. Dropping the guard detaches
/// them all, so a torn-down chart stops receiving events.
#[derive(Default)]
pub(crate) struct ListenerGuard {
    listeners: Vec<Listener>,
}

impl ListenerGuard {
    fn listen(
        &mut self,
        target: &EventTarget,
        kind: &'static str,
        passive: Option<bool>,
        handler: impl FnMut(Event) + 'static,
    ) -> Result<(), JsValue> {
        let closure = Closure::wrap(Box::new(handler) as Box<dyn FnMut(Event)>);
        match passive {
            Some(passive) => {
                let opts = AddEventListenerOptions::new();
                opts.set_passive(passive);
                target.add_event_listener_with_callback_and_add_event_listener_options(
                    kind,
                    closure.as_ref().unchecked_ref(),
                    &opts,
                )?;
            }
            None => {
                target.add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())?
            }
        }
        self.listeners.push(Listener {
            target: target.clone(),
            kind,
            closure,
        });
        Ok(())
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        for l in self.listeners.drain(..) {
            if let Err(e) = l
                .target
                .remove_event_listener_with_callback(l.kind, l.closure.as_ref().unchecked_ref())
            {
                log::warn!("failed to detach {} listener: {e:?}", l.kind);
            }
        }
    }
}

// ---------- Chart handle --------------------------------------------------------

struct EventSubscription {
    id: u32,
    callback: Function,
}

struct ChartHandleInner {
    config: ChartConfig,
    session: Session,
    storage: Option<BrowserStorage>,
    feed: FeedStore,
    model: ChartModel,
    canvas: HtmlCanvasElement,
    backend: CanvasBackend,

    next_event_id: u32,
    subscribers: Vec<EventSubscription>,
    frame_pending: bool,
    destroyed: bool,
}

impl ChartHandleInner {
    fn add_subscription(&mut self, cb: Function) -> u32 {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.subscribers.push(EventSubscription { id, callback: cb });
        id
    }

    fn remove_subscription(&mut self, id: u32) {
        if let Some(idx) = self.subscribers.iter().position(|s| s.id == id) {
            self.subscribers.remove(idx);
        }
    }

    fn fit_to_canvas(&mut self) {
        let (width, height) = canvas_size(&self.canvas);
        self.model.resize(width, height);
    }

    fn draw(&mut self) {
        if self.model.take_dirty() {
            self.model.render(&mut self.backend);
        }
    }

    fn save_prefs(&mut self) {
        let prefs = self.model.prefs();
        if let Some(store) = self.storage.as_mut() {
            if let Err(e) = prefs.save(store) {
                log::warn!("could not save chart preferences: {e}");
            }
        }
    }

    fn shutdown(&mut self) {
        self.destroyed = true;
        self.feed.on_event(DataEvent::Reset);
        self.subscribers.clear();
    }
}

type Shared = Rc<RefCell<ChartHandleInner>>;

/// Call subscribers outside of any borrow so callbacks may call back into
/// the handle.
fn emit(inner: &Shared, events: Vec<ChartEvent>) {
    if events.is_empty() {
        return;
    }
    let callbacks: Vec<Function> = inner
        .borrow()
        .subscribers
        .iter()
        .map(|s| s.callback.clone())
        .collect();
    for event in &events {
        match serde_json::to_string(event) {
            Ok(json) => {
                let val = JsValue::from_str(&json);
                for cb in &callbacks {
                    if let Err(e) = cb.call1(&JsValue::NULL, &val) {
                        log::warn!("event subscriber threw: {e:?}");
                    }
                }
            }
            Err(e) => log::warn!("could not serialize chart event: {e}"),
        }
    }
}

/// Ask for one redraw on the next animation frame. Repeated calls before
/// the frame fires collapse into one.
fn schedule_frame(inner: &Shared) {
    {
        let mut state = inner.borrow_mut();
        if state.destroyed || state.frame_pending {
            return;
        }
        state.frame_pending = true;
    }
    let rc = inner.clone();
    let callback = Closure::once_into_js(move |_timestamp: f64| {
        let mut state = rc.borrow_mut();
        state.frame_pending = false;
        if !state.destroyed {
            state.draw();
        }
    });
    let requested = web_sys::window()
        .ok_or_else(|| JsValue::from_str("no window"))
        .and_then(|w| w.request_animation_frame(callback.unchecked_ref()));
    if let Err(e) = requested {
        log::warn!("requestAnimationFrame failed: {e:?}");
        inner.borrow_mut().frame_pending = false;
    }
}

/// Start a fetch for `symbol`. Anything still in flight becomes stale.
fn load_symbol(inner: &Shared, symbol: String) {
    let (ticket, api_base, authorization) = {
        let mut state = inner.borrow_mut();
        let ticket = state.feed.begin(symbol);
        state.model.clear();
        let authorization = state.session.auth_header();
        (ticket, state.config.api_base.clone(), authorization)
    };
    schedule_frame(inner);

    let rc = inner.clone();
    spawn_local(async move {
        let event = match fetch_chart(&api_base, &ticket.symbol, authorization.as_deref()).await {
            Ok(payload) => DataEvent::Loaded {
                ticket: ticket.clone(),
                payload,
            },
            Err(e) => DataEvent::Failed {
                ticket: ticket.clone(),
                reason: e.to_string(),
            },
        };

        let chart_event = {
            let mut guard = rc.borrow_mut();
            let state = &mut *guard;
            if state.destroyed {
                return;
            }
            state.feed.on_event(event);
            if !state.feed.is_current(&ticket) {
                return;
            }
            match state.feed.state() {
                FeedState::Ready(payload) => {
                    let series = payload.series.clone();
                    let len = series.len();
                    state.model.load(series);
                    ChartEvent::DataLoaded {
                        symbol: ticket.symbol.clone(),
                        len,
                    }
                }
                FeedState::NoData(reason) => {
                    let reason = reason.clone();
                    state.model.clear();
                    ChartEvent::NoData {
                        symbol: ticket.symbol.clone(),
                        reason,
                    }
                }
                FeedState::Idle | FeedState::Loading => return,
            }
        };
        emit(&rc, vec![chart_event]);
        schedule_frame(&rc);
    });
}

fn wire_listeners(inner: &Shared) -> Result<ListenerGuard, JsValue> {
    let canvas = inner.borrow().canvas.clone();
    let mut guard = ListenerGuard::default();

    {
        let rc = inner.clone();
        let canvas_el = canvas.clone();
        guard.listen(&canvas, "pointerdown", None, move |event| {
            let Some(ev) = event.dyn_ref::<PointerEvent>() else {
                return;
            };
            ev.prevent_default();
            let (x, y) = local_point(&canvas_el, ev.client_x(), ev.client_y());
            if let Err(e) = canvas_el.set_pointer_capture(ev.pointer_id()) {
                log::debug!("pointer capture unavailable: {e:?}");
            }
            rc.borrow_mut().model.pointer_down(x, y);
        })?;
    }

    {
        let rc = inner.clone();
        let canvas_el = canvas.clone();
        guard.listen(&canvas, "pointermove", None, move |event| {
            let Some(ev) = event.dyn_ref::<PointerEvent>() else {
                return;
            };
            let (x, y) = local_point(&canvas_el, ev.client_x(), ev.client_y());
            let events = rc.borrow_mut().model.pointer_move(x, y);
            emit(&rc, events);
            schedule_frame(&rc);
        })?;
    }

    for kind in ["pointerup", "pointercancel"] {
        let rc = inner.clone();
        guard.listen(&canvas, kind, None, move |_event| {
            rc.borrow_mut().model.pointer_up();
        })?;
    }

    {
        let rc = inner.clone();
        guard.listen(&canvas, "pointerleave", None, move |_event| {
            let event = rc.borrow_mut().model.pointer_leave();
            emit(&rc, event.into_iter().collect());
            schedule_frame(&rc);
        })?;
    }

    {
        let rc = inner.clone();
        let canvas_el = canvas.clone();
        guard.listen(&canvas, "wheel", Some(false), move |event| {
            let Some(ev) = event.dyn_ref::<WheelEvent>() else {
                return;
            };
            ev.prevent_default();
            let (x, _) = local_point(&canvas_el, ev.client_x(), ev.client_y());
            let event = rc.borrow_mut().model.wheel(ev.delta_y(), x);
            emit(&rc, event.into_iter().collect());
            schedule_frame(&rc);
        })?;
    }

    if let Some(window) = web_sys::window() {
        let rc = inner.clone();
        guard.listen(&window, "resize", None, move |_event| {
            rc.borrow_mut().fit_to_canvas();
            schedule_frame(&rc);
        })?;
    }

    Ok(guard)
}

/// Public chart handle for JS.
#[wasm_bindgen]
pub struct ChartHandle {
    inner: Shared,
    _listeners: ListenerGuard,
}

#[wasm_bindgen]
impl ChartHandle {
    /// Attach to `<canvas id=canvas_id>` and start loading `symbol`.
    ///
    /// Configuration comes from `window.STOCKPAL_CONFIG`; preferences and
    /// the login session from `localStorage`.
    #[wasm_bindgen(constructor)]
    pub fn new(canvas_id: &str, symbol: &str) -> Result<ChartHandle, JsValue> {
        let config = ChartConfig::from_global();
        init_runtime(config.log_level());

        let (canvas, context) = canvas_by_id(canvas_id)?;
        let storage = open_storage();
        let session = session_from(storage.as_ref(), config.session.keys());
        let fallback = ChartPrefs::from_config(&config);
        let prefs = match storage.as_ref() {
            Some(store) => ChartPrefs::load(store, fallback),
            None => fallback,
        };
        let model = ChartModel::new(&prefs, config.min_visible);

        let inner = Rc::new(RefCell::new(ChartHandleInner {
            config,
            session,
            storage,
            feed: FeedStore::new(symbol),
            model,
            canvas: canvas.clone(),
            backend: CanvasBackend::new(canvas, context),
            next_event_id: 1,
            subscribers: Vec::new(),
            frame_pending: false,
            destroyed: false,
        }));
        inner.borrow_mut().fit_to_canvas();
        let listeners = wire_listeners(&inner)?;
        load_symbol(&inner, symbol.to_string());

        Ok(ChartHandle {
            inner,
            _listeners: listeners,
        })
    }

    pub fn symbol(&self) -> String {
        self.inner.borrow().feed.symbol().to_string()
    }

    /// Switch symbols. A blank symbol clears the chart.
    pub fn set_symbol(&self, symbol: &str) {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            {
                let mut state = self.inner.borrow_mut();
                state.feed.on_event(DataEvent::Reset);
                state.model.clear();
            }
            schedule_frame(&self.inner);
            return;
        }
        load_symbol(&self.inner, symbol.to_string());
    }

    pub fn reload(&self) {
        let symbol = self.symbol();
        if !symbol.is_empty() {
            load_symbol(&self.inner, symbol);
        }
    }

    /// Visible window preset: "30", "60", "120", "250" or "all".
    pub fn set_preset(&self, preset: &str) -> Result<(), JsValue> {
        let preset =
            ViewPreset::from_label(preset).ok_or_else(|| JsValue::from_str("unknown view preset"))?;
        let event = {
            let mut state = self.inner.borrow_mut();
            let event = state.model.set_preset(preset);
            state.save_prefs();
            event
        };
        emit(&self.inner, vec![event]);
        schedule_frame(&self.inner);
        Ok(())
    }

    pub fn reset_view(&self) {
        let event = self.inner.borrow_mut().model.reset_view();
        emit(&self.inner, vec![event]);
        schedule_frame(&self.inner);
    }

    /// Flip an overlay or pane ("sma_short", "ema", "bbands", "macd",
    /// "rsi", "volume", ...). Returns the new state.
    pub fn toggle_overlay(&self, kind: &str) -> Result<bool, JsValue> {
        let kind = IndicatorKind::from_str(kind).map_err(js_err)?;
        let on = {
            let mut state = self.inner.borrow_mut();
            let on = state.model.toggle_overlay(kind);
            state.save_prefs();
            on
        };
        schedule_frame(&self.inner);
        Ok(on)
    }

    /// Apply typed input for the short period; returns the period in effect.
    pub fn set_short_period(&self, text: &str) -> u32 {
        let period = {
            let mut state = self.inner.borrow_mut();
            let p = state.model.set_short_period(text);
            state.save_prefs();
            p
        };
        schedule_frame(&self.inner);
        period as u32
    }

    pub fn set_long_period(&self, text: &str) -> u32 {
        let period = {
            let mut state = self.inner.borrow_mut();
            let p = state.model.set_long_period(text);
            state.save_prefs();
            p
        };
        schedule_frame(&self.inner);
        period as u32
    }

    /// Lock the info panel on the index it currently shows.
    pub fn pin(&self) -> Option<u32> {
        let event = self.inner.borrow_mut().model.pin(None);
        let pinned = match &event {
            ChartEvent::Pinned { index } => index.map(|i| i as u32),
            _ => None,
        };
        emit(&self.inner, vec![event]);
        schedule_frame(&self.inner);
        pinned
    }

    pub fn unpin(&self) {
        let event = self.inner.borrow_mut().model.unpin();
        emit(&self.inner, vec![event]);
        schedule_frame(&self.inner);
    }

    /// Info panel for the pinned, hovered or latest index, as JSON.
    pub fn info_json(&self) -> Result<Option<String>, JsValue> {
        let state = self.inner.borrow();
        state
            .model
            .info()
            .map(|info| serde_json::to_string(&info).map_err(js_err))
            .transpose()
    }

    /// `latest` quote block of the last payload, as JSON.
    pub fn latest_json(&self) -> Result<Option<String>, JsValue> {
        let state = self.inner.borrow();
        state
            .feed
            .payload()
            .and_then(|p| p.latest.as_ref())
            .map(|latest| serde_json::to_string(latest).map_err(js_err))
            .transpose()
    }

    /// Resize chart (call from JS when the container changes size).
    pub fn resize(&self, width: f64, height: f64) {
        self.inner.borrow_mut().model.resize(width, height);
        schedule_frame(&self.inner);
    }

    pub fn subscribe_events(&self, callback: &Function) -> u32 {
        self.inner.borrow_mut().add_subscription(callback.clone())
    }

    pub fn unsubscribe_events(&self, id: u32) {
        self.inner.borrow_mut().remove_subscription(id);
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.borrow().session.is_authenticated()
    }

    /// Logged-in user record as JSON.
    pub fn user_json(&self) -> Option<String> {
        self.inner.borrow().session.user().map(|u| u.to_string())
    }

    /// Persist a login and refetch with the new token.
    pub fn login(&self, user_json: &str, token: &str) -> Result<(), JsValue> {
        let user: serde_json::Value = serde_json::from_str(user_json).map_err(js_err)?;
        {
            let mut guard = self.inner.borrow_mut();
            let state = &mut *guard;
            let store = state
                .storage
                .as_mut()
                .ok_or_else(|| JsValue::from_str("storage unavailable"))?;
            state.session.login(store, user, token).map_err(js_err)?;
        }
        self.reload();
        Ok(())
    }

    pub fn logout(&self) -> Result<(), JsValue> {
        let mut guard = self.inner.borrow_mut();
        let state = &mut *guard;
        match state.storage.as_mut() {
            Some(store) => state.session.logout(store).map_err(js_err),
            None => {
                state.session = Session::anonymous(state.config.session.keys());
                Ok(())
            }
        }
    }

    /// Tear down: pending responses are ignored and every listener detached.
    pub fn destroy(self) {
        log::debug!("destroying chart for {}", self.symbol());
    }
}

impl Drop for ChartHandle {
    fn drop(&mut self) {
        match self.inner.try_borrow_mut() {
            Ok(mut state) => state.shutdown(),
            Err(_) => log::warn!("chart dropped while busy"),
        }
    }
}


// ---------- NEPSE index chart ---------------------------------------------------

struct IndexChartInner {
    canvas: HtmlCanvasElement,
    backend: CanvasBackend,
    session: Session,
    rows: Vec<NepseRow>,
    preset: RangePreset,
    hover: Option<usize>,
    generation: u64,
    destroyed: bool,
}

impl IndexChartInner {
    fn visible(&self) -> (Vec<String>, Vec<Option<f64>>) {
        let today = today();
        let rows = match today {
            Some(today) => nepse_window(&self.rows, self.preset, today),
            None => self.rows.iter().collect(),
        };
        nepse_closes(&rows)
    }

    fn draw(&mut self) {
        if self.destroyed {
            return;
        }
        let (width, height) = canvas_size(&self.canvas);
        let (dates, closes) = self.visible();
        render_index_line(
            &mut self.backend,
            width,
            height,
            &dates,
            &closes,
            self.preset,
            self.hover,
        );
    }
}

fn today() -> Option<NaiveDate> {
    let now = js_sys::Date::new_0();
    NaiveDate::from_ymd_opt(now.get_full_year() as i32, now.get_month() + 1, now.get_date())
}

/// NEPSE index line chart with a range selector.
#[wasm_bindgen]
pub struct IndexChartHandle {
    inner: Rc<RefCell<IndexChartInner>>,
    _listeners: ListenerGuard,
}

#[wasm_bindgen]
impl IndexChartHandle {
    #[wasm_bindgen(constructor)]
    pub fn new(canvas_id: &str) -> Result<IndexChartHandle, JsValue> {
        let config = ChartConfig::from_global();
        init_runtime(config.log_level());
        let (canvas, context) = canvas_by_id(canvas_id)?;
        let session = session_from(open_storage().as_ref(), config.session.keys());
        let inner = Rc::new(RefCell::new(IndexChartInner {
            canvas: canvas.clone(),
            backend: CanvasBackend::new(canvas.clone(), context),
            session,
            rows: Vec::new(),
            preset: RangePreset::default(),
            hover: None,
            generation: 0,
            destroyed: false,
        }));

        let mut guard = ListenerGuard::default();
        {
            let rc = inner.clone();
            let canvas_el = canvas.clone();
            guard.listen(&canvas, "pointermove", None, move |event| {
                let Some(ev) = event.dyn_ref::<PointerEvent>() else {
                    return;
                };
                let (x, _) = local_point(&canvas_el, ev.client_x(), ev.client_y());
                let (width, _) = canvas_size(&canvas_el);
                let mut state = rc.borrow_mut();
                let count = state.visible().1.len();
                let hover = index_hover(x, width, count);
                if hover != state.hover {
                    state.hover = hover;
                    state.draw();
                }
            })?;
        }
        {
            let rc = inner.clone();
            guard.listen(&canvas, "pointerleave", None, move |_event| {
                let mut state = rc.borrow_mut();
                if state.hover.take().is_some() {
                    state.draw();
                }
            })?;
        }

        let handle = IndexChartHandle {
            inner,
            _listeners: guard,
        };
        handle.fetch(config.api_base);
        Ok(handle)
    }

    fn fetch(&self, api_base: String) {
        let (generation, authorization) = {
            let mut state = self.inner.borrow_mut();
            state.generation += 1;
            (state.generation, state.session.auth_header())
        };
        let rc = self.inner.clone();
        spawn_local(async move {
            let url = Endpoint::Nepse.url(&api_base);
            let rows = match fetch_json(&url, authorization.as_deref()).await {
                Ok(payload) => decode_typed_rows::<NepseRow>(&payload),
                Err(e) => Err(e),
            };
            let mut state = rc.borrow_mut();
            if state.destroyed || state.generation != generation {
                log::debug!("dropping stale index response");
                return;
            }
            match rows {
                Ok(mut rows) => {
                    rows.sort_by(|a, b| a.date.cmp(&b.date));
                    state.rows = rows;
                }
                Err(e) => {
                    log::warn!("index data unavailable: {e}");
                    state.rows.clear();
                }
            }
            state.draw();
        });
    }

    /// "1W", "3M", "6M", "1Y", "5Y" or "ALL"; anything else means 1Y.
    pub fn set_range(&self, label: &str) {
        let mut state = self.inner.borrow_mut();
        state.preset = RangePreset::from_label(label);
        state.hover = None;
        state.draw();
    }

    pub fn range(&self) -> String {
        self.inner.borrow().preset.label().to_string()
    }

    pub fn redraw(&self) {
        self.inner.borrow_mut().draw();
    }

    /// Detach listeners and ignore any response still in flight.
    pub fn destroy(self) {}
}

impl Drop for IndexChartHandle {
    fn drop(&mut self) {
        if let Ok(mut state) = self.inner.try_borrow_mut() {
            state.destroyed = true;
        }
    }
}

// ---------- Table fetches -------------------------------------------------------

/// REST access for the table views (price history, prediction,
/// announcements, company listings). Owns the login session its requests
/// are authorized with.
#[wasm_bindgen]
pub struct ApiClient {
    config: ChartConfig,
    storage: Option<BrowserStorage>,
    session: Session,
}

impl ApiClient {
    fn request(&self, endpoint: Endpoint) -> (String, Option<String>) {
        (
            endpoint.url(&self.config.api_base),
            self.session.auth_header(),
        )
    }
}

#[wasm_bindgen]
impl ApiClient {
    #[wasm_bindgen(constructor)]
    pub fn new() -> ApiClient {
        let config = ChartConfig::from_global();
        init_runtime(config.log_level());
        let storage = open_storage();
        let session = session_from(storage.as_ref(), config.session.keys());
        ApiClient {
            config,
            storage,
            session,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Logged-in user record as JSON.
    pub fn user_json(&self) -> Option<String> {
        self.session.user().map(|u| u.to_string())
    }

    pub fn login(&mut self, user_json: &str, token: &str) -> Result<(), JsValue> {
        let user: serde_json::Value = serde_json::from_str(user_json).map_err(js_err)?;
        let store = self
            .storage
            .as_mut()
            .ok_or_else(|| JsValue::from_str("storage unavailable"))?;
        self.session.login(store, user, token).map_err(js_err)
    }

    pub fn logout(&mut self) -> Result<(), JsValue> {
        match self.storage.as_mut() {
            Some(store) => self.session.logout(store).map_err(js_err),
            None => {
                self.session = Session::anonymous(self.config.session.keys());
                Ok(())
            }
        }
    }

    /// One page of price history for `symbol` within `[from, to]` (either
    /// may be empty). Resolves to JSON `{rows, page, totalPages, totalRows}`.
    pub fn history_page(&self, symbol: &str, from: &str, to: &str, page: u32) -> Promise {
        let (url, authorization) = self.request(Endpoint::History(symbol.to_string()));
        let filter = HistoryFilter::new(from, to);
        future_to_promise(async move {
            let payload = fetch_json(&url, authorization.as_deref())
                .await
                .map_err(js_err)?;
            let rows: Vec<HistoryRow> = decode_typed_rows(&payload).map_err(js_err)?;
            let filtered = filter_history(&rows, &filter);
            let page = paginate(&filtered, page as usize, HISTORY_PAGE_SIZE);
            let body = serde_json::json!({
                "rows": page.items,
                "page": page.page,
                "totalPages": page.total_pages,
                "totalRows": page.total_rows,
            });
            Ok(JsValue::from_str(&body.to_string()))
        })
    }

    /// Next-day prediction block for `symbol`, as JSON.
    pub fn prediction(&self, symbol: &str) -> Promise {
        let (url, authorization) = self.request(Endpoint::Prediction(symbol.to_string()));
        future_to_promise(async move {
            let payload = fetch_json(&url, authorization.as_deref())
                .await
                .map_err(js_err)?;
            let prediction = decode_prediction(&payload).map_err(js_err)?;
            serde_json::to_string(&prediction)
                .map(|json| JsValue::from_str(&json))
                .map_err(js_err)
        })
    }

    /// Announcements for `symbol` as a JSON array; odd payload shapes are
    /// normalized and an unusable one resolves to `[]`.
    pub fn announcements(&self, symbol: &str) -> Promise {
        let (url, authorization) = self.request(Endpoint::Announcement(symbol.to_string()));
        future_to_promise(async move {
            let payload = fetch_json(&url, authorization.as_deref())
                .await
                .map_err(js_err)?;
            let rows = decode_announcements(&payload).unwrap_or_else(|e| {
                log::warn!("announcements unreadable: {e}");
                Vec::new()
            });
            Ok(JsValue::from_str(&serde_json::Value::Array(rows).to_string()))
        })
    }

    /// Company listing as a JSON array; `top` selects the top movers list.
    pub fn companies(&self, top: bool) -> Promise {
        let endpoint = if top {
            Endpoint::CompanyTop
        } else {
            Endpoint::Companies
        };
        let (url, authorization) = self.request(endpoint);
        future_to_promise(async move {
            let payload = fetch_json(&url, authorization.as_deref())
                .await
                .map_err(js_err)?;
            let companies: Vec<Company> = decode_typed_rows(&payload).map_err(js_err)?;
            serde_json::to_string(&companies)
                .map(|json| JsValue::from_str(&json))
                .map_err(js_err)
        })
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}
