//! Visible index window over the full series, driven by drag and wheel.

use app_shell::ViewPreset;

pub const MIN_VISIBLE: usize = 10;
pub const ZOOM_OUT_FACTOR: f64 = 1.15;
pub const ZOOM_IN_FACTOR: f64 = 0.85;

/// Half-open `[start, end)` range of candle indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewWindow {
    pub start: usize,
    pub end: usize,
}

impl ViewWindow {
    pub fn visible(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, idx: usize) -> bool {
        (self.start..self.end).contains(&idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DragState {
    origin_x: f64,
    origin_start: usize,
}

/// Owns the window and the pan gesture. Every transition is synchronous.
#[derive(Debug, Clone)]
pub struct ViewController {
    total: usize,
    window: ViewWindow,
    min_visible: usize,
    preset: ViewPreset,
    drag: Option<DragState>,
}

impl Default for ViewController {
    fn default() -> Self {
        Self::new(MIN_VISIBLE, ViewPreset::default())
    }
}

impl ViewController {
    pub fn new(min_visible: usize, preset: ViewPreset) -> Self {
        Self {
            total: 0,
            window: ViewWindow::default(),
            min_visible: min_visible.max(1),
            preset,
            drag: None,
        }
    }

    pub fn window(&self) -> ViewWindow {
        self.window
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn preset(&self) -> ViewPreset {
        self.preset
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    fn floor(&self) -> usize {
        self.min_visible.min(self.total)
    }

    /// Fresh data: show the newest `preset` candles.
    pub fn initialize(&mut self, total: usize) {
        self.total = total;
        self.drag = None;
        self.reset();
    }

    /// Back to the preset window for the current series.
    pub fn reset(&mut self) {
        let wanted = self.preset.size().unwrap_or(self.total);
        let visible = wanted.max(self.floor()).min(self.total);
        self.window = ViewWindow {
            start: self.total - visible,
            end: self.total,
        };
    }

    pub fn set_preset(&mut self, preset: ViewPreset) {
        self.preset = preset;
        self.reset();
    }

    pub fn pan_start(&mut self, x: f64) {
        if self.total == 0 {
            return;
        }
        self.drag = Some(DragState {
            origin_x: x,
            origin_start: self.window.start,
        });
    }

    /// Move the window by whole candles relative to the gesture origin.
    /// Returns whether the window changed.
    pub fn pan_move(&mut self, x: f64, pixels_per_candle: f64) -> bool {
        let Some(drag) = self.drag else {
            return false;
        };
        if !(pixels_per_candle.is_finite() && pixels_per_candle > 0.0) {
            return false;
        }
        let visible = self.window.visible();
        let moved = (-(x - drag.origin_x) / pixels_per_candle).round() as i64;
        let max_start = (self.total - visible) as i64;
        let start = (drag.origin_start as i64 + moved).clamp(0, max_start) as usize;
        let next = ViewWindow {
            start,
            end: start + visible,
        };
        let changed = next != self.window;
        self.window = next;
        changed
    }

    pub fn pan_end(&mut self) {
        self.drag = None;
    }

    /// Wheel zoom: positive `delta_y` zooms out.
    pub fn wheel(&mut self, delta_y: f64, anchor_ratio: Option<f64>) -> bool {
        let factor = if delta_y > 0.0 {
            ZOOM_OUT_FACTOR
        } else {
            ZOOM_IN_FACTOR
        };
        self.zoom_by(factor, anchor_ratio)
    }

    /// Scale the visible count by `factor`, keeping the index under
    /// `anchor_ratio` (0 = left edge, 1 = right edge) in place. An anchor
    /// outside the plot zooms around the centre.
    pub fn zoom_by(&mut self, factor: f64, anchor_ratio: Option<f64>) -> bool {
        if self.total == 0 || !(factor.is_finite() && factor > 0.0) {
            return false;
        }
        let ratio = anchor_ratio
            .filter(|r| (0.0..=1.0).contains(r))
            .unwrap_or(0.5);
        let visible = self.window.visible() as f64;
        let next_visible =
            ((visible * factor).round() as usize).clamp(self.floor(), self.total);
        let center = self.window.start as f64 + visible * ratio;
        let max_start = (self.total - next_visible) as f64;
        let start = (center - next_visible as f64 * ratio)
            .round()
            .clamp(0.0, max_start) as usize;
        let next = ViewWindow {
            start,
            end: start + next_visible,
        };
        let changed = next != self.window;
        self.window = next;
        changed
    }

    /// Series index under plot-relative `x`, if inside the window.
    pub fn index_at(&self, x: f64, plot_left: f64, plot_width: f64) -> Option<usize> {
        let visible = self.window.visible();
        if visible == 0 || plot_width <= 0.0 {
            return None;
        }
        let spacing = plot_width / visible as f64;
        let local = ((x - plot_left) / spacing).floor();
        if local < 0.0 || local >= visible as f64 {
            return None;
        }
        Some(self.window.start + local as usize)
    }

    pub fn pixels_per_candle(&self, plot_width: f64) -> f64 {
        plot_width / self.window.visible().max(1) as f64
    }
}

/// Horizontal position of `x` inside the plot, `None` when outside.
pub fn anchor_ratio(x: f64, plot_left: f64, plot_width: f64) -> Option<f64> {
    if plot_width <= 0.0 {
        return None;
    }
    Some((x - plot_left) / plot_width).filter(|r| (0.0..=1.0).contains(r))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(total: usize) -> ViewController {
        let mut c = ViewController::default();
        c.initialize(total);
        c
    }

    #[test]
    fn initialize_uses_preset() {
        let c = controller(500);
        assert_eq!(c.window(), ViewWindow { start: 380, end: 500 });

        let short = controller(40);
        assert_eq!(short.window(), ViewWindow { start: 0, end: 40 });

        let mut all = ViewController::new(MIN_VISIBLE, ViewPreset::All);
        all.initialize(300);
        assert_eq!(all.window().visible(), 300);

        let empty = controller(0);
        assert_eq!(empty.window(), ViewWindow::default());
    }

    #[test]
    fn preset_change_and_reset() {
        let mut c = controller(500);
        c.zoom_by(0.5, None);
        c.reset();
        assert_eq!(c.window(), ViewWindow { start: 380, end: 500 });
        c.set_preset(ViewPreset::Last30);
        assert_eq!(c.window(), ViewWindow { start: 470, end: 500 });
    }

    #[test]
    fn pan_moves_whole_candles_and_clamps() {
        let mut c = controller(500);
        c.pan_start(300.0);
        assert!(c.is_dragging());
        // Dragging right reveals older candles.
        assert!(c.pan_move(340.0, 10.0));
        assert_eq!(c.window(), ViewWindow { start: 376, end: 496 });
        c.pan_move(100_000.0, 10.0);
        assert_eq!(c.window().start, 0);
        c.pan_move(-100_000.0, 10.0);
        assert_eq!(c.window(), ViewWindow { start: 380, end: 500 });
        c.pan_end();
        assert!(!c.is_dragging());
        assert!(!c.pan_move(0.0, 10.0));
    }

    #[test]
    fn pan_never_leaves_bounds() {
        let mut c = controller(200);
        for (i, dx) in [-5000.0, 37.0, 12.5, -999.0, 4321.0, 0.4].iter().enumerate() {
            c.pan_start(0.0);
            c.pan_move(*dx, 3.0 + i as f64);
            let w = c.window();
            assert!(w.start <= c.total() - w.visible());
            assert_eq!(w.visible(), 120);
            c.pan_end();
        }
    }

    #[test]
    fn wheel_out_scales_by_fifteen_percent() {
        let mut c = controller(500);
        assert!(c.wheel(1.0, Some(1.0)));
        assert_eq!(c.window().visible(), 138);
        assert_eq!(c.window().end, 500);

        let mut small = controller(130);
        small.wheel(1.0, None);
        assert_eq!(small.window().visible(), 130);
    }

    #[test]
    fn wheel_in_respects_floor() {
        let mut c = controller(500);
        for _ in 0..40 {
            c.wheel(-1.0, Some(0.5));
        }
        assert_eq!(c.window().visible(), MIN_VISIBLE);

        let mut tiny = controller(6);
        tiny.wheel(-1.0, None);
        assert_eq!(tiny.window().visible(), 6);
    }

    #[test]
    fn zoom_keeps_anchor_index() {
        let mut c = controller(1000);
        let w = c.window();
        let ratio = 0.25;
        let anchored = w.start as f64 + w.visible() as f64 * ratio;
        c.zoom_by(0.5, Some(ratio));
        let w2 = c.window();
        let after = w2.start as f64 + w2.visible() as f64 * ratio;
        assert!((after - anchored).abs() <= 1.0);
    }

    #[test]
    fn zoom_is_inverse_consistent() {
        for visible in [30usize, 57, 120, 250] {
            for factor in [0.85, 0.8, 0.6] {
                let mut c = ViewController::new(MIN_VISIBLE, ViewPreset::All);
                c.initialize(5000);
                c.zoom_by(visible as f64 / 5000.0, Some(0.5));
                let before = c.window().visible();
                c.zoom_by(factor, Some(0.5));
                c.zoom_by(1.0 / factor, Some(0.5));
                let after = c.window().visible();
                assert!(before.abs_diff(after) <= 1, "{visible} {factor}: {before} -> {after}");
            }
        }
    }

    #[test]
    fn hover_index_maps_pixels() {
        let c = controller(500);
        // 120 candles over 600px: 5px each.
        assert_eq!(c.index_at(50.0, 50.0, 600.0), Some(380));
        assert_eq!(c.index_at(57.0, 50.0, 600.0), Some(381));
        assert_eq!(c.index_at(649.9, 50.0, 600.0), Some(499));
        assert_eq!(c.index_at(650.0, 50.0, 600.0), None);
        assert_eq!(c.index_at(10.0, 50.0, 600.0), None);
        assert_eq!(anchor_ratio(350.0, 50.0, 600.0), Some(0.5));
        assert_eq!(anchor_ratio(700.0, 50.0, 600.0), None);
    }
}
