//! Per-vehicle state for dashboards
//!
//! Decodes the messages a ground station summarises per vehicle and keeps
//! one [`VehicleState`] per MAVLink system id. Snapshots are published on a
//! `watch` channel; readers never touch the sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::mavlink::messages::{decode_message, TelemetryMessage};
use crate::session::TelemetryFrame;
use crate::sinks::FrameSink;

/// MAV_MODE_FLAG_SAFETY_ARMED
const MODE_FLAG_ARMED: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Online,
    Offline,
}

/// Last known state of one vehicle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleState {
    pub system_id: u8,
    pub vehicle_type: Option<u8>,
    pub autopilot: Option<u8>,
    pub base_mode: Option<u8>,
    pub system_status: Option<u8>,
    pub armed: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub relative_altitude: Option<f32>,
    pub heading: Option<f32>,
    pub ground_speed: Option<f32>,
    pub gps_fix_type: Option<u8>,
    pub satellites_visible: Option<u8>,
    pub battery_percent: Option<u8>,
    pub battery_voltage: Option<f32>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

impl VehicleState {
    pub fn new(system_id: u8) -> Self {
        Self {
            system_id,
            ..Self::default()
        }
    }

    /// Fold one decoded message into the state
    pub fn apply(&mut self, message: &TelemetryMessage, now: DateTime<Utc>) {
        match message {
            TelemetryMessage::Heartbeat(hb) => {
                self.vehicle_type = Some(hb.vehicle_type);
                self.autopilot = Some(hb.autopilot);
                self.base_mode = Some(hb.base_mode);
                self.system_status = Some(hb.system_status);
                self.armed = hb.base_mode & MODE_FLAG_ARMED != 0;
                self.last_heartbeat = Some(now);
            }
            TelemetryMessage::GlobalPosition(pos) => {
                self.latitude = Some(pos.latitude);
                self.longitude = Some(pos.longitude);
                self.relative_altitude = Some(pos.relative_altitude);
                if pos.heading.is_some() {
                    self.heading = pos.heading;
                }
            }
            TelemetryMessage::VfrHud(hud) => {
                self.ground_speed = Some(hud.ground_speed);
            }
            TelemetryMessage::GpsRaw(gps) => {
                self.gps_fix_type = Some(gps.fix_type);
                self.satellites_visible = Some(gps.satellites_visible);
            }
            TelemetryMessage::SysStatus(status) => {
                if status.battery_remaining >= 0 {
                    self.battery_percent = Some(status.battery_remaining as u8);
                }
                if status.voltage_battery_mv > 0 {
                    self.battery_voltage = Some(status.voltage_battery_mv as f32 / 1000.0);
                }
            }
        }
        self.last_update = Some(now);
    }

    pub fn status(&self, now: DateTime<Utc>, heartbeat_timeout: Duration) -> LinkStatus {
        let Some(last) = self.last_heartbeat else {
            return LinkStatus::Offline;
        };
        match (now - last).to_std() {
            Ok(age) if age >= heartbeat_timeout => LinkStatus::Offline,
            _ => LinkStatus::Online,
        }
    }
}

pub type Vehicles = BTreeMap<u8, VehicleState>;

/// Sink that maintains [`Vehicles`] from the relayed frames
pub struct VehicleStateSink {
    name: String,
    tx: watch::Sender<Vehicles>,
}

impl VehicleStateSink {
    pub fn new(name: impl Into<String>, heartbeat_timeout: Duration) -> (Self, VehicleMonitor) {
        let (tx, rx) = watch::channel(Vehicles::new());
        let sink = Self { name: name.into(), tx };
        (sink, VehicleMonitor { rx, heartbeat_timeout })
    }
}

#[async_trait]
impl FrameSink for VehicleStateSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&mut self, frame: TelemetryFrame) -> Result<()> {
        let Some((header, message)) = decode_message(frame.payload()) else {
            return Ok(());
        };

        let now = Utc::now();
        self.tx.send_modify(|vehicles| {
            let state = vehicles.entry(header.system_id).or_insert_with(|| {
                info!(system_id = header.system_id, "New vehicle seen");
                VehicleState::new(header.system_id)
            });
            state.apply(&message, now);
        });
        Ok(())
    }
}

/// Read side of a [`VehicleStateSink`]
#[derive(Clone)]
pub struct VehicleMonitor {
    rx: watch::Receiver<Vehicles>,
    heartbeat_timeout: Duration,
}

impl VehicleMonitor {
    pub fn vehicle(&self, system_id: u8) -> Option<VehicleState> {
        self.rx.borrow().get(&system_id).cloned()
    }

    pub fn vehicles(&self) -> Vehicles {
        self.rx.borrow().clone()
    }

    /// Online/offline per vehicle as of now
    pub fn statuses(&self) -> Vec<(u8, LinkStatus)> {
        let now = Utc::now();
        self.rx
            .borrow()
            .values()
            .map(|v| (v.system_id, v.status(now, self.heartbeat_timeout)))
            .collect()
    }

    /// Wait until the state changes; `false` once the sink is gone
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Log a one-line summary per vehicle every `period` until cancelled
    pub async fn log_periodically(self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.rx.has_changed().is_err() {
                debug!("Vehicle state sink gone, stopping summary");
                return;
            }

            let now = Utc::now();
            for vehicle in self.rx.borrow().values() {
                info!(
                    system_id = vehicle.system_id,
                    status = ?vehicle.status(now, self.heartbeat_timeout),
                    armed = vehicle.armed,
                    lat = ?vehicle.latitude,
                    lon = ?vehicle.longitude,
                    alt = ?vehicle.relative_altitude,
                    battery = ?vehicle.battery_percent,
                    "Vehicle"
                );
            }
        }
    }
}
