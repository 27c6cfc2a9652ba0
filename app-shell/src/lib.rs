use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ta_engine::{IndicatorKind, IndicatorParams};
use thiserror::Error;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;
#[cfg(target_arch = "wasm32")]
use web_sys::Storage;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const CONFIG_GLOBAL: &str = "STOCKPAL_CONFIG";
pub const PREFS_KEY: &str = "stockpal.chart.prefs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("storage unavailable: {0}")]
    Storage(String),
}

// ---------- Key/value persistence ------------------------------------------

/// String key/value storage (browser `localStorage`, or memory in tests).
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn remove(&mut self, key: &str) -> Result<(), ConfigError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// `window.localStorage`.
#[cfg(target_arch = "wasm32")]
pub struct BrowserStorage {
    storage: Storage,
}

#[cfg(target_arch = "wasm32")]
impl BrowserStorage {
    pub fn open() -> Result<Self, ConfigError> {
        let window = web_sys::window().ok_or_else(|| ConfigError::Storage("no window".into()))?;
        let storage = window
            .local_storage()
            .map_err(|e| ConfigError::Storage(format!("{e:?}")))?
            .ok_or_else(|| ConfigError::Storage("localStorage unavailable".into()))?;
        Ok(Self { storage })
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for BrowserStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.storage.get_item(key).ok().flatten()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.storage
            .set_item(key, value)
            .map_err(|e| ConfigError::Storage(format!("{e:?}")))
    }

    fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        self.storage
            .remove_item(key)
            .map_err(|e| ConfigError::Storage(format!("{e:?}")))
    }
}

// ---------- Session ----------------------------------------------------------

/// Storage keys for one login realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKeys {
    pub user: &'static str,
    pub token: &'static str,
}

impl SessionKeys {
    pub const USER: SessionKeys = SessionKeys {
        user: "user",
        token: "accessToken",
    };
    pub const ADMIN: SessionKeys = SessionKeys {
        user: "adminUser",
        token: "adminAccessToken",
    };
}

/// Which login realm a page authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRealm {
    #[default]
    User,
    Admin,
}

impl SessionRealm {
    pub fn keys(self) -> SessionKeys {
        match self {
            SessionRealm::User => SessionKeys::USER,
            SessionRealm::Admin => SessionKeys::ADMIN,
        }
    }
}

/// Logged-in user and bearer token. Created once at startup and handed to
/// whatever needs it by reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    keys: SessionKeys,
    user: Option<Value>,
    access_token: Option<String>,
}

impl Session {
    pub fn anonymous(keys: SessionKeys) -> Self {
        Self {
            keys,
            user: None,
            access_token: None,
        }
    }

    /// Read persisted credentials. A corrupt user record is ignored.
    pub fn restore(keys: SessionKeys, store: &impl KeyValueStore) -> Self {
        let user = store.get(keys.user).and_then(|raw| {
            serde_json::from_str::<Value>(&raw)
                .map_err(|e| log::warn!("ignoring stored user: {e}"))
                .ok()
                .filter(|v| !v.is_null())
        });
        let access_token = store.get(keys.token).filter(|t| !t.is_empty());
        Self {
            keys,
            user,
            access_token,
        }
    }

    pub fn login(
        &mut self,
        store: &mut impl KeyValueStore,
        user: Value,
        token: impl Into<String>,
    ) -> Result<(), ConfigError> {
        let token = token.into();
        store.set(self.keys.user, &serde_json::to_string(&user)?)?;
        store.set(self.keys.token, &token)?;
        self.user = Some(user);
        self.access_token = Some(token);
        Ok(())
    }

    pub fn logout(&mut self, store: &mut impl KeyValueStore) -> Result<(), ConfigError> {
        self.user = None;
        self.access_token = None;
        store.remove(self.keys.user)?;
        store.remove(self.keys.token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    /// `Authorization` header value, if logged in.
    pub fn auth_header(&self) -> Option<String> {
        self.access_token.as_ref().map(|t| format!("Bearer {t}"))
    }
}

// ---------- Chart configuration ---------------------------------------------

/// Initial visible window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewPreset {
    #[serde(rename = "30")]
    Last30,
    #[serde(rename = "60")]
    Last60,
    #[default]
    #[serde(rename = "120")]
    Last120,
    #[serde(rename = "250")]
    Last250,
    #[serde(rename = "all")]
    All,
}

impl ViewPreset {
    /// Candles to show; `None` shows the whole series.
    pub fn size(&self) -> Option<usize> {
        match self {
            ViewPreset::Last30 => Some(30),
            ViewPreset::Last60 => Some(60),
            ViewPreset::Last120 => Some(120),
            ViewPreset::Last250 => Some(250),
            ViewPreset::All => None,
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "30" => Some(ViewPreset::Last30),
            "60" => Some(ViewPreset::Last60),
            "120" => Some(ViewPreset::Last120),
            "250" => Some(ViewPreset::Last250),
            "all" => Some(ViewPreset::All),
            _ => None,
        }
    }
}

/// Which chart layers are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayToggles {
    pub sma_short: bool,
    pub sma_long: bool,
    pub ema: bool,
    pub server_sma: bool,
    pub bbands: bool,
    pub macd: bool,
    pub rsi: bool,
    pub volume: bool,
}

impl Default for OverlayToggles {
    fn default() -> Self {
        Self {
            sma_short: true,
            sma_long: true,
            ema: false,
            server_sma: false,
            bbands: false,
            macd: false,
            rsi: false,
            volume: true,
        }
    }
}

impl OverlayToggles {
    fn slot(&mut self, kind: IndicatorKind) -> &mut bool {
        match kind {
            IndicatorKind::SmaShort => &mut self.sma_short,
            IndicatorKind::SmaLong => &mut self.sma_long,
            IndicatorKind::Ema => &mut self.ema,
            IndicatorKind::ServerSma => &mut self.server_sma,
            IndicatorKind::Bbands => &mut self.bbands,
            IndicatorKind::Macd => &mut self.macd,
            IndicatorKind::Rsi => &mut self.rsi,
            IndicatorKind::Volume => &mut self.volume,
        }
    }

    pub fn is_enabled(&self, kind: IndicatorKind) -> bool {
        match kind {
            IndicatorKind::SmaShort => self.sma_short,
            IndicatorKind::SmaLong => self.sma_long,
            IndicatorKind::Ema => self.ema,
            IndicatorKind::ServerSma => self.server_sma,
            IndicatorKind::Bbands => self.bbands,
            IndicatorKind::Macd => self.macd,
            IndicatorKind::Rsi => self.rsi,
            IndicatorKind::Volume => self.volume,
        }
    }

    pub fn set(&mut self, kind: IndicatorKind, enabled: bool) {
        *self.slot(kind) = enabled;
    }

    /// Flip `kind`, returning the new state.
    pub fn toggle(&mut self, kind: IndicatorKind) -> bool {
        let slot = self.slot(kind);
        *slot = !*slot;
        *slot
    }

    /// Enabled layers in legend order.
    pub fn enabled(&self) -> impl Iterator<Item = IndicatorKind> + '_ {
        IndicatorKind::ALL
            .into_iter()
            .filter(move |k| self.is_enabled(*k))
    }
}

/// Runtime configuration. Every field has a default, so a partial JSON
/// object is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub api_base: String,
    pub default_preset: ViewPreset,
    pub short_period: usize,
    pub long_period: usize,
    /// Lower bound on visible candles when zooming in.
    pub min_visible: usize,
    /// `log` level name for the console logger.
    pub log_level: String,
    pub overlays: OverlayToggles,
    pub session: SessionRealm,
}

impl Default for ChartConfig {
    fn default() -> Self {
        let params = IndicatorParams::default();
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            default_preset: ViewPreset::default(),
            short_period: params.short_period,
            long_period: params.long_period,
            min_visible: 10,
            log_level: "info".to_string(),
            overlays: OverlayToggles::default(),
            session: SessionRealm::User,
        }
    }
}

impl ChartConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: ChartConfig = serde_json::from_str(json)?;
        cfg.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("api_base must not be empty".into()));
        }
        if self.min_visible == 0 {
            return Err(ConfigError::Invalid("min_visible must be positive".into()));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level `{}`",
                self.log_level
            )));
        }
        Ok(self)
    }

    /// Periods after clamping to the accepted input ranges.
    pub fn indicator_params(&self) -> IndicatorParams {
        IndicatorParams::clamped(self.short_period, self.long_period)
    }

    pub fn log_level(&self) -> log::Level {
        self.log_level.parse().unwrap_or(log::Level::Info)
    }

    /// Read `window.STOCKPAL_CONFIG` (object or JSON text), falling back to
    /// defaults with a warning.
    #[cfg(target_arch = "wasm32")]
    pub fn from_global() -> Self {
        let raw = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str(CONFIG_GLOBAL))
            .ok()
            .filter(|v| !v.is_undefined() && !v.is_null());
        let Some(raw) = raw else {
            return Self::default();
        };
        let text = match raw.as_string() {
            Some(s) => Some(s),
            None => js_sys::JSON::stringify(&raw).ok().and_then(|s| s.as_string()),
        };
        match text.map(|t| Self::from_json(&t)) {
            Some(Ok(cfg)) => cfg,
            Some(Err(e)) => {
                log::warn!("{CONFIG_GLOBAL} rejected, using defaults: {e}");
                Self::default()
            }
            None => Self::default(),
        }
    }
}

/// User choices that survive a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPrefs {
    pub params: IndicatorParams,
    pub overlays: OverlayToggles,
    pub preset: ViewPreset,
}

impl ChartPrefs {
    pub fn from_config(cfg: &ChartConfig) -> Self {
        Self {
            params: cfg.indicator_params(),
            overlays: cfg.overlays,
            preset: cfg.default_preset,
        }
    }

    /// Saved prefs, or `fallback` when absent or unreadable.
    pub fn load(store: &impl KeyValueStore, fallback: ChartPrefs) -> ChartPrefs {
        let Some(raw) = store.get(PREFS_KEY) else {
            return fallback;
        };
        match serde_json::from_str::<ChartPrefs>(&raw) {
            Ok(mut prefs) => {
                prefs.params =
                    IndicatorParams::clamped(prefs.params.short_period, prefs.params.long_period);
                prefs
            }
            Err(e) => {
                log::warn!("discarding stored chart prefs: {e}");
                fallback
            }
        }
    }

    pub fn save(&self, store: &mut impl KeyValueStore) -> Result<(), ConfigError> {
        store.set(PREFS_KEY, &serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_round_trips_through_store() {
        let mut store = MemoryStore::default();
        let mut session = Session::restore(SessionKeys::USER, &store);
        assert!(!session.is_authenticated());
        assert_eq!(session.auth_header(), None);

        session
            .login(&mut store, json!({"username": "ram"}), "tok123")
            .unwrap();
        assert_eq!(store.get("accessToken").as_deref(), Some("tok123"));

        let restored = Session::restore(SessionKeys::USER, &store);
        assert_eq!(restored.auth_header().as_deref(), Some("Bearer tok123"));
        assert_eq!(restored.user(), Some(&json!({"username": "ram"})));

        let admin = Session::restore(SessionKeys::ADMIN, &store);
        assert!(!admin.is_authenticated());

        session.logout(&mut store).unwrap();
        assert!(store.get("user").is_none());
        assert!(!Session::restore(SessionKeys::USER, &store).is_authenticated());
    }

    #[test]
    fn configured_realm_authorizes_requests() {
        let mut store = MemoryStore::default();
        store.set("accessToken", "user-tok").unwrap();
        store.set("adminAccessToken", "admin-tok").unwrap();

        let cfg = ChartConfig::from_json(r#"{"session": "admin"}"#).unwrap();
        let session = Session::restore(cfg.session.keys(), &store);
        assert_eq!(session.auth_header().as_deref(), Some("Bearer admin-tok"));

        let session = Session::restore(ChartConfig::default().session.keys(), &store);
        assert_eq!(session.auth_header().as_deref(), Some("Bearer user-tok"));
        assert_eq!(session.user(), None);
    }

    #[test]
    fn corrupt_user_record_is_ignored() {
        let mut store = MemoryStore::default();
        store.set("user", "{not json").unwrap();
        store.set("accessToken", "").unwrap();
        let s = Session::restore(SessionKeys::USER, &store);
        assert_eq!(s, Session::anonymous(SessionKeys::USER));
    }

    #[test]
    fn config_defaults_and_partial_json() {
        let cfg = ChartConfig::from_json(r#"{"api_base": "https://api.example", "default_preset": "all"}"#)
            .unwrap();
        assert_eq!(cfg.api_base, "https://api.example");
        assert_eq!(cfg.default_preset, ViewPreset::All);
        assert_eq!(cfg.short_period, 20);
        assert_eq!(cfg.overlays, OverlayToggles::default());
        assert_eq!(ChartConfig::from_json("{}").unwrap(), ChartConfig::default());
        assert_eq!(cfg.log_level(), log::Level::Info);
        assert_eq!(cfg.session.keys(), SessionKeys::USER);

        let admin = ChartConfig::from_json(r#"{"session": "admin"}"#).unwrap();
        assert_eq!(admin.session.keys().token, "adminAccessToken");
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(matches!(ChartConfig::from_json("[1"), Err(ConfigError::Json(_))));
        assert!(matches!(
            ChartConfig::from_json(r#"{"api_base": " "}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(ChartConfig::from_json(r#"{"min_visible": 0}"#).is_err());
        assert!(ChartConfig::from_json(r#"{"log_level": "loud"}"#).is_err());
        assert!(ChartConfig::from_json(r#"{"default_preset": "90"}"#).is_err());
    }

    #[test]
    fn config_periods_are_clamped() {
        let cfg = ChartConfig {
            short_period: 1,
            long_period: 900,
            ..ChartConfig::default()
        };
        assert_eq!(
            cfg.indicator_params(),
            IndicatorParams {
                short_period: 2,
                long_period: 400
            }
        );
    }

    #[test]
    fn presets() {
        assert_eq!(ViewPreset::default().size(), Some(120));
        assert_eq!(ViewPreset::All.size(), None);
        assert_eq!(ViewPreset::from_label("ALL"), Some(ViewPreset::All));
        assert_eq!(ViewPreset::from_label("250"), Some(ViewPreset::Last250));
        assert_eq!(ViewPreset::from_label("7"), None);
    }

    #[test]
    fn toggles_flip_single_layers() {
        let mut t = OverlayToggles::default();
        assert!(t.toggle(IndicatorKind::Rsi));
        assert!(!t.toggle(IndicatorKind::Volume));
        t.set(IndicatorKind::SmaLong, false);
        let enabled: Vec<_> = t.enabled().collect();
        assert_eq!(enabled, vec![IndicatorKind::SmaShort, IndicatorKind::Rsi]);
    }

    #[test]
    fn prefs_persist_and_recover() {
        let mut store = MemoryStore::default();
        let fallback = ChartPrefs::from_config(&ChartConfig::default());
        assert_eq!(ChartPrefs::load(&store, fallback.clone()), fallback);

        let mut prefs = fallback.clone();
        prefs.params.short_period = 35;
        prefs.preset = ViewPreset::Last30;
        prefs.save(&mut store).unwrap();
        assert_eq!(ChartPrefs::load(&store, fallback.clone()), prefs);

        store.set(PREFS_KEY, "garbage").unwrap();
        assert_eq!(ChartPrefs::load(&store, fallback.clone()), fallback);
    }
}
