//! # Telemetry Models
//!
//! Stateful, in-memory generators for the simulated device classes. Each model
//! owns its device state and its random source, and produces one batch per
//! call to [`TelemetryModel::tick`]. Nothing in here does I/O.
//!
//! ```text
//! telemetry/
//! ├── position.rs     - collar GPS positions drifting toward a destination
//! ├── environment.rs  - fixed weather sensors with per-tick readings
//! └── vitals.rs       - memoryless vital-sign draws per subject
//! ```
//!
//! Models are generic over `rand::Rng`. Production code seeds a `StdRng` from
//! entropy; tests seed it with a constant to get reproducible batches.

pub mod environment;
pub mod position;
pub mod vitals;

pub use environment::{CompassPoint, EnvironmentModel, EnvironmentSample};
pub use position::{PositionModel, PositionSample};
pub use vitals::{Posture, VitalsModel, VitalsSample};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kilometres per degree of latitude, flat-earth approximation
pub const KM_PER_DEGREE: f64 = 111.0;

/// A stateful sample generator for one device class
pub trait TelemetryModel: Send {
    type Sample: Serialize + Send;

    /// Advances the model one step and returns the full batch, ordered by
    /// device identity
    fn tick(&mut self) -> Vec<Self::Sample>;

    /// Number of devices in every batch
    fn device_count(&self) -> usize;
}

/// Simulated sensor category. Each class runs its own scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Gps,
    Env,
    Hea,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 3] = [DeviceClass::Gps, DeviceClass::Env, DeviceClass::Hea];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::Gps => "gps",
            DeviceClass::Env => "env",
            DeviceClass::Hea => "hea",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "gps" | "position" => Some(DeviceClass::Gps),
            "env" | "environment" => Some(DeviceClass::Env),
            "hea" | "vitals" | "health" => Some(DeviceClass::Hea),
            _ => None,
        }
    }

    /// Settings key holding the channel name for this class
    pub fn default_channel_key(&self) -> String {
        format!("/iot-topics/{}-topic-name", self.name())
    }

    /// Settings key holding the publish interval (seconds) for this class
    pub fn default_interval_key(&self) -> String {
        format!("/iot-settings/{}-publish-interval", self.name())
    }

    /// Payload fields the ingestion side stores as numbers
    pub fn numeric_fields(&self) -> &'static [&'static str] {
        match self {
            DeviceClass::Gps => &["lat", "lon"],
            DeviceClass::Env => &["lat", "lon", "temperature", "humidity"],
            DeviceClass::Hea => &[
                "body_temperature",
                "heart_rate",
                "respiration_rate",
                "activity_level",
                "hydration_level",
                "stress_level",
            ],
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Random point within `radius_km` of `self`, uniform in angle and radius
    pub fn scatter<R: Rng + ?Sized>(&self, rng: &mut R, radius_km: f64) -> GeoPoint {
        let angle = rng.gen_range(0.0..std::f64::consts::TAU);
        let distance = if radius_km > 0.0 {
            rng.gen_range(0.0..=radius_km)
        } else {
            0.0
        };
        let delta_lat = distance * angle.cos() / KM_PER_DEGREE;
        let delta_lon = distance * angle.sin() / (KM_PER_DEGREE * self.lat.to_radians().cos());
        GeoPoint::new(self.lat + delta_lat, self.lon + delta_lon).clamped()
    }

    /// Keeps the point finite and inside ±90 / ±180
    pub fn clamped(self) -> GeoPoint {
        let lat = if self.lat.is_finite() { self.lat.clamp(-90.0, 90.0) } else { 0.0 };
        let lon = if self.lon.is_finite() { self.lon.clamp(-180.0, 180.0) } else { 0.0 };
        GeoPoint { lat, lon }
    }

    /// Point as emitted on the wire
    pub fn rounded(self) -> GeoPoint {
        GeoPoint {
            lat: round_to(self.lat, COORDINATE_DECIMALS),
            lon: round_to(self.lon, COORDINATE_DECIMALS),
        }
    }
}

/// Decimals kept on emitted coordinates, about 1 m. Anything finer would
/// serialize in exponent form near the equator or the prime meridian.
pub const COORDINATE_DECIMALS: i32 = 5;

/// Rounds to a fixed number of decimals so serialized numbers stay in plain
/// decimal notation
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
