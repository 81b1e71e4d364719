//! Collar position model
//!
//! Devices start scattered around an origin and drift toward a fixed
//! destination: every tick closes 1% of the remaining distance on each axis
//! and adds uniform jitter. The path converges but never snaps, and the model
//! never runs out of samples.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{GeoPoint, TelemetryModel};

/// Fraction of the remaining distance covered per tick is `1 / STEP_DIVISOR`
pub const STEP_DIVISOR: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionSettings {
    pub devices: usize,
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    /// Seeding radius around the origin
    pub radius_km: f64,
    /// Per-axis jitter bound in degrees
    pub jitter_deg: f64,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            devices: 8,
            origin: GeoPoint::new(53.0, -127.0),
            destination: GeoPoint::new(53.2, -128.0),
            radius_km: 1.0,
            jitter_deg: 0.002,
        }
    }
}

/// One tracked device. Identity is assigned at seeding and never changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: u32,
    pub position: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSample {
    pub elk_id: u32,
    pub lat: f64,
    pub lon: f64,
}

pub struct PositionModel<R> {
    devices: Vec<Device>,
    destination: GeoPoint,
    jitter_deg: f64,
    rng: R,
}

impl<R: Rng> PositionModel<R> {
    pub fn new(settings: &PositionSettings, mut rng: R) -> Self {
        let devices = (1..=settings.devices as u32)
            .map(|id| Device {
                id,
                position: settings.origin.scatter(&mut rng, settings.radius_km),
            })
            .collect();

        Self {
            devices,
            destination: settings.destination,
            jitter_deg: settings.jitter_deg.abs(),
            rng,
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    fn jitter(&mut self) -> f64 {
        if self.jitter_deg == 0.0 {
            0.0
        } else {
            self.rng.gen_range(-self.jitter_deg..=self.jitter_deg)
        }
    }
}

impl<R: Rng + Send> TelemetryModel for PositionModel<R> {
    type Sample = PositionSample;

    fn tick(&mut self) -> Vec<PositionSample> {
        let destination = self.destination;
        for i in 0..self.devices.len() {
            let current = self.devices[i].position;
            let lat_step = (destination.lat - current.lat) / STEP_DIVISOR;
            let lon_step = (destination.lon - current.lon) / STEP_DIVISOR;
            let lat = current.lat + lat_step + self.jitter();
            let lon = current.lon + lon_step + self.jitter();
            self.devices[i].position = GeoPoint::new(lat, lon).clamped();
        }

        self.devices
            .iter()
            .map(|d| {
                let point = d.position.rounded();
                PositionSample {
                    elk_id: d.id,
                    lat: point.lat,
                    lon: point.lon,
                }
            })
            .collect()
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }
}
