//! Distance estimation and trust-zone classification
//!
//! RSSI readings stream in from the transport several times per second.
//! Each device gets a ring buffer of recent readings; the mean smooths out
//! jitter before the log-distance path-loss model converts it to meters
//! and a [`TrustZone`]. Zone changes are reported at most once per
//! hysteresis window per device, and a drop to `Far` from a known closer
//! zone raises a security alert.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::{DeviceId, TrustZone};

/// Default measured RSSI at one meter.
pub const DEFAULT_TX_POWER: i32 = -59;

/// Default path-loss exponent (free-space-ish indoor).
pub const DEFAULT_PATH_LOSS_EXPONENT: f32 = 2.0;

/// Default smoothing window (readings).
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Smoothing window bounds.
pub const SMOOTHING_WINDOW_MIN: usize = 1;
pub const SMOOTHING_WINDOW_MAX: usize = 20;

/// Default minimum interval between zone-change reports per device.
pub const DEFAULT_ZONE_HYSTERESIS: Duration = Duration::from_secs(2);

/// Message delivered with every security alert.
pub const SECURITY_ALERT_MESSAGE: &str =
    "Device moved to far zone unexpectedly. Verify before accepting transfers.";

/// One raw RSSI reading.
#[derive(Debug, Clone, Copy)]
pub struct RssiReading {
    pub rssi_dbm: i32,
    pub timestamp: Instant,
    pub source_is_bluetooth: bool,
}

impl RssiReading {
    pub fn now(rssi_dbm: i32, source_is_bluetooth: bool) -> Self {
        RssiReading {
            rssi_dbm,
            timestamp: Instant::now(),
            source_is_bluetooth,
        }
    }
}

/// Current distance estimate for one device.
#[derive(Debug, Clone, Copy)]
pub struct DistanceInfo {
    /// Most recent raw reading.
    pub rssi_dbm: i32,
    /// Mean over the smoothing window.
    pub rssi_smoothed: i32,
    pub distance_meters: f32,
    pub zone: TrustZone,
    /// 1..=4 from fixed RSSI cutoffs.
    pub signal_bars: u8,
    /// 0.0..=1.0, falls as readings spread out.
    pub confidence: f32,
    /// Spread below 10 dBm over a full window.
    pub is_stable: bool,
    pub last_update: Instant,
}

impl DistanceInfo {
    fn initial() -> Self {
        DistanceInfo {
            rssi_dbm: -100,
            rssi_smoothed: -100,
            distance_meters: 0.0,
            zone: TrustZone::Unknown,
            signal_bars: 1,
            confidence: 0.0,
            is_stable: false,
            last_update: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.last_update.elapsed()
    }
}

/// Zone boundaries in meters, with the derived RSSI cutoffs.
///
/// RSSI cutoffs are always computed from the distances, never stored
/// independently.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneThresholds {
    pub intimate_max_m: f32,
    pub close_max_m: f32,
    pub nearby_max_m: f32,
    intimate_rssi: i32,
    close_rssi: i32,
    nearby_rssi: i32,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        // 3 m / 10 m / 30 m
        ZoneThresholds::new(3.0, 10.0, 30.0)
            .unwrap_or(ZoneThresholds {
                intimate_max_m: 3.0,
                close_max_m: 10.0,
                nearby_max_m: 30.0,
                intimate_rssi: -68,
                close_rssi: -79,
                nearby_rssi: -88,
            })
    }
}

impl ZoneThresholds {
    /// Build thresholds; distances must be strictly increasing and positive.
    pub fn new(intimate_max_m: f32, close_max_m: f32, nearby_max_m: f32) -> Result<Self> {
        if !(intimate_max_m > 0.0 && intimate_max_m < close_max_m && close_max_m < nearby_max_m) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "zone thresholds must satisfy 0 < {} < {} < {}",
                    intimate_max_m, close_max_m, nearby_max_m
                ),
            ));
        }
        let mut t = ZoneThresholds {
            intimate_max_m,
            close_max_m,
            nearby_max_m,
            intimate_rssi: 0,
            close_rssi: 0,
            nearby_rssi: 0,
        };
        t.recompute_rssi(DEFAULT_TX_POWER, DEFAULT_PATH_LOSS_EXPONENT);
        Ok(t)
    }

    fn recompute_rssi(&mut self, tx_power: i32, path_loss_exponent: f32) {
        self.intimate_rssi = distance_to_rssi(self.intimate_max_m, tx_power, path_loss_exponent);
        self.close_rssi = distance_to_rssi(self.close_max_m, tx_power, path_loss_exponent);
        self.nearby_rssi = distance_to_rssi(self.nearby_max_m, tx_power, path_loss_exponent);
    }

    pub fn intimate_rssi(&self) -> i32 {
        self.intimate_rssi
    }

    pub fn close_rssi(&self) -> i32 {
        self.close_rssi
    }

    pub fn nearby_rssi(&self) -> i32 {
        self.nearby_rssi
    }
}

/// Log-distance path-loss model: `d = 10 ^ ((tx - rssi) / (10 n))`.
///
/// Signal at or above the reference power clamps to 0.1 m.
pub fn rssi_to_distance(rssi_dbm: i32, tx_power: i32, path_loss_exponent: f32) -> f32 {
    if rssi_dbm >= tx_power {
        return 0.1;
    }
    let exponent = (tx_power - rssi_dbm) as f32 / (10.0 * path_loss_exponent);
    10f32.powf(exponent)
}

/// Inverse of [`rssi_to_distance`].
pub fn distance_to_rssi(distance_m: f32, tx_power: i32, path_loss_exponent: f32) -> i32 {
    let distance_m = distance_m.max(0.1);
    (tx_power as f32 - 10.0 * path_loss_exponent * distance_m.log10()) as i32
}

/// Signal quality as 1-4 bars from fixed cutoffs.
pub fn rssi_to_signal_bars(rssi_dbm: i32) -> u8 {
    if rssi_dbm >= -55 {
        4
    } else if rssi_dbm >= -70 {
        3
    } else if rssi_dbm >= -85 {
        2
    } else {
        1
    }
}

/// Classify an RSSI value against the thresholds.
pub fn rssi_to_zone(rssi_dbm: i32, thresholds: &ZoneThresholds) -> TrustZone {
    if rssi_dbm >= thresholds.intimate_rssi {
        TrustZone::Intimate
    } else if rssi_dbm >= thresholds.close_rssi {
        TrustZone::Close
    } else if rssi_dbm >= thresholds.nearby_rssi {
        TrustZone::Nearby
    } else {
        TrustZone::Far
    }
}

/// Emitted when a device's reported zone changes.
#[derive(Debug, Clone)]
pub struct ZoneChangeEvent {
    pub device_id: DeviceId,
    pub previous_zone: TrustZone,
    pub current_zone: TrustZone,
    pub distance_info: DistanceInfo,
    pub is_moving_closer: bool,
    /// Set when entering `Far` from a known, closer zone.
    pub requires_security_alert: bool,
}

type ZoneChangedCallback = Box<dyn Fn(&ZoneChangeEvent) + Send + Sync>;
type DistanceUpdatedCallback = Box<dyn Fn(&DeviceId, &DistanceInfo) + Send + Sync>;
type SecurityAlertCallback = Box<dyn Fn(&DeviceId, &str) + Send + Sync>;

struct DeviceData {
    readings: VecDeque<RssiReading>,
    info: DistanceInfo,
    last_reported_zone: TrustZone,
    last_zone_change: Option<Instant>,
}

impl DeviceData {
    fn new() -> Self {
        DeviceData {
            readings: VecDeque::new(),
            info: DistanceInfo::initial(),
            last_reported_zone: TrustZone::Unknown,
            last_zone_change: None,
        }
    }
}

struct MonitorConfig {
    thresholds: ZoneThresholds,
    smoothing_window: usize,
    hysteresis: Duration,
    tx_power: i32,
    path_loss_exponent: f32,
}

/// Per-device RSSI smoothing and zone tracking.
pub struct DistanceMonitor {
    state: Mutex<(MonitorConfig, HashMap<DeviceId, DeviceData>)>,
    zone_changed_cb: Mutex<Option<ZoneChangedCallback>>,
    distance_updated_cb: Mutex<Option<DistanceUpdatedCallback>>,
    security_alert_cb: Mutex<Option<SecurityAlertCallback>>,
}

impl Default for DistanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl DistanceMonitor {
    pub fn new() -> Self {
        DistanceMonitor {
            state: Mutex::new((
                MonitorConfig {
                    thresholds: ZoneThresholds::default(),
                    smoothing_window: DEFAULT_SMOOTHING_WINDOW,
                    hysteresis: DEFAULT_ZONE_HYSTERESIS,
                    tx_power: DEFAULT_TX_POWER,
                    path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
                },
                HashMap::new(),
            )),
            zone_changed_cb: Mutex::new(None),
            distance_updated_cb: Mutex::new(None),
            security_alert_cb: Mutex::new(None),
        }
    }

    pub fn set_zone_thresholds(&self, thresholds: ZoneThresholds) {
        if let Ok(mut state) = self.state.lock() {
            let (tx, n) = (state.0.tx_power, state.0.path_loss_exponent);
            let mut thresholds = thresholds;
            thresholds.recompute_rssi(tx, n);
            state.0.thresholds = thresholds;
        }
    }

    pub fn zone_thresholds(&self) -> ZoneThresholds {
        self.state
            .lock()
            .map(|s| s.0.thresholds)
            .unwrap_or_default()
    }

    /// Clamped to `[1, 20]` regardless of caller input.
    pub fn set_smoothing_window(&self, samples: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.0.smoothing_window =
                samples.clamp(SMOOTHING_WINDOW_MIN, SMOOTHING_WINDOW_MAX);
        }
    }

    pub fn smoothing_window(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.0.smoothing_window)
            .unwrap_or(DEFAULT_SMOOTHING_WINDOW)
    }

    pub fn set_zone_hysteresis(&self, hysteresis: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.0.hysteresis = hysteresis;
        }
    }

    /// Radio calibration; re-derives all RSSI thresholds.
    pub fn set_calibration(&self, tx_power: i32, path_loss_exponent: f32) {
        if let Ok(mut state) = self.state.lock() {
            state.0.tx_power = tx_power;
            state.0.path_loss_exponent = path_loss_exponent;
            let (tx, n) = (tx_power, path_loss_exponent);
            state.0.thresholds.recompute_rssi(tx, n);
        }
    }

    pub fn on_zone_changed(&self, callback: impl Fn(&ZoneChangeEvent) + Send + Sync + 'static) {
        if let Ok(mut cb) = self.zone_changed_cb.lock() {
            *cb = Some(Box::new(callback));
        }
    }

    pub fn on_distance_updated(
        &self,
        callback: impl Fn(&DeviceId, &DistanceInfo) + Send + Sync + 'static,
    ) {
        if let Ok(mut cb) = self.distance_updated_cb.lock() {
            *cb = Some(Box::new(callback));
        }
    }

    pub fn on_security_alert(&self, callback: impl Fn(&DeviceId, &str) + Send + Sync + 'static) {
        if let Ok(mut cb) = self.security_alert_cb.lock() {
            *cb = Some(Box::new(callback));
        }
    }

    /// Ingest one reading for a device.
    ///
    /// Updates the smoothed estimate, re-classifies the zone, and fires
    /// callbacks outside the state lock.
    pub fn feed_rssi(&self, device_id: &DeviceId, reading: RssiReading) {
        let (info, change) = {
            let mut state = match self.state.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            let (config, devices) = &mut *state;
            let data = devices.entry(*device_id).or_insert_with(DeviceData::new);

            data.readings.push_back(reading);
            while data.readings.len() > config.smoothing_window {
                data.readings.pop_front();
            }

            let smoothed = {
                let sum: i64 = data.readings.iter().map(|r| i64::from(r.rssi_dbm)).sum();
                (sum / data.readings.len() as i64) as i32
            };
            let distance =
                rssi_to_distance(smoothed, config.tx_power, config.path_loss_exponent);
            let zone = rssi_to_zone(smoothed, &config.thresholds);

            data.info.rssi_dbm = reading.rssi_dbm;
            data.info.rssi_smoothed = smoothed;
            data.info.distance_meters = distance;
            data.info.zone = zone;
            data.info.signal_bars = rssi_to_signal_bars(smoothed);
            data.info.last_update = reading.timestamp;

            if data.readings.len() >= config.smoothing_window {
                let min = data.readings.iter().map(|r| r.rssi_dbm).min().unwrap_or(0);
                let max = data.readings.iter().map(|r| r.rssi_dbm).max().unwrap_or(0);
                let spread = max - min;
                data.info.confidence = (1.0 - spread as f32 / 30.0).max(0.0);
                data.info.is_stable = spread < 10;
            }

            // Zone change with hysteresis: report only when the classification
            // differs from the last *reported* zone and enough time passed.
            let mut change = None;
            if zone != data.last_reported_zone {
                let now = reading.timestamp;
                let elapsed_ok = match data.last_zone_change {
                    None => true,
                    Some(at) => now.duration_since(at) >= config.hysteresis,
                };
                if elapsed_ok {
                    let previous = data.last_reported_zone;
                    data.last_reported_zone = zone;
                    data.last_zone_change = Some(now);

                    change = Some(ZoneChangeEvent {
                        device_id: *device_id,
                        previous_zone: previous,
                        current_zone: zone,
                        distance_info: data.info,
                        is_moving_closer: zone.rank().unwrap_or(4)
                            < previous.rank().unwrap_or(4),
                        requires_security_alert: zone == TrustZone::Far
                            && previous != TrustZone::Far
                            && previous != TrustZone::Unknown,
                    });
                }
            }

            (data.info, change)
        };

        if let Ok(cb) = self.distance_updated_cb.lock() {
            if let Some(cb) = cb.as_ref() {
                cb(device_id, &info);
            }
        }

        if let Some(event) = change {
            debug!(
                device = %device_id,
                previous = event.previous_zone.name(),
                current = event.current_zone.name(),
                "zone change"
            );
            if let Ok(cb) = self.zone_changed_cb.lock() {
                if let Some(cb) = cb.as_ref() {
                    cb(&event);
                }
            }
            if event.requires_security_alert {
                if let Ok(cb) = self.security_alert_cb.lock() {
                    if let Some(cb) = cb.as_ref() {
                        cb(device_id, SECURITY_ALERT_MESSAGE);
                    }
                }
            }
        }
    }

    /// Current estimate for a device; `PeerNotFound` before any reading.
    pub fn get_distance(&self, device_id: &DeviceId) -> Result<DistanceInfo> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::new(ErrorKind::InvalidState, "distance state poisoned"))?;
        state
            .1
            .get(device_id)
            .map(|d| d.info)
            .ok_or_else(|| Error::new(ErrorKind::PeerNotFound, format!("no readings for {}", device_id)))
    }

    /// Current zone; `Unknown` when the device has no readings.
    pub fn get_zone(&self, device_id: &DeviceId) -> TrustZone {
        self.get_distance(device_id)
            .map(|info| info.zone)
            .unwrap_or(TrustZone::Unknown)
    }

    /// Whether the device is at least as close as the given zone.
    pub fn is_within_zone(&self, device_id: &DeviceId, zone: TrustZone) -> bool {
        match (self.get_zone(device_id).rank(), zone.rank()) {
            (Some(current), Some(limit)) => current <= limit,
            _ => false,
        }
    }

    /// When the last zone-change report for a device fired.
    pub fn last_zone_change(&self, device_id: &DeviceId) -> Option<Instant> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.1.get(device_id).and_then(|d| d.last_zone_change))
    }

    /// Drop all state for a device.
    pub fn remove_device(&self, device_id: &DeviceId) {
        if let Ok(mut state) = self.state.lock() {
            state.1.remove(device_id);
        }
    }
}
