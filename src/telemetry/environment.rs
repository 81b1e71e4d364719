//! Environment sensor model
//!
//! Sensors sit at fixed positions scattered around an origin. Readings are
//! redrawn independently every tick; wind direction is a base heading
//! perturbed by a bounded random angle and snapped to the nearest compass
//! point.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{round_to, GeoPoint, TelemetryModel};

/// The 8 compass points, clockwise from north
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompassPoint {
    #[serde(rename = "North")]
    North,
    #[serde(rename = "North-East")]
    NorthEast,
    #[serde(rename = "East")]
    East,
    #[serde(rename = "South-East")]
    SouthEast,
    #[serde(rename = "South")]
    South,
    #[serde(rename = "South-West")]
    SouthWest,
    #[serde(rename = "West")]
    West,
    #[serde(rename = "North-West")]
    NorthWest,
}

impl CompassPoint {
    pub const ALL: [CompassPoint; 8] = [
        CompassPoint::North,
        CompassPoint::NorthEast,
        CompassPoint::East,
        CompassPoint::SouthEast,
        CompassPoint::South,
        CompassPoint::SouthWest,
        CompassPoint::West,
        CompassPoint::NorthWest,
    ];

    const SECTOR_DEG: f64 = 360.0 / 8.0;

    pub fn heading_deg(&self) -> f64 {
        let index = Self::ALL.iter().position(|p| p == self).unwrap_or(0);
        index as f64 * Self::SECTOR_DEG
    }

    /// Nearest compass point to an arbitrary heading, wrapping at 360°
    pub fn nearest(heading_deg: f64) -> CompassPoint {
        let sector = (heading_deg / Self::SECTOR_DEG).round() as i64;
        Self::ALL[sector.rem_euclid(8) as usize]
    }

    pub fn label(&self) -> &'static str {
        match self {
            CompassPoint::North => "North",
            CompassPoint::NorthEast => "North-East",
            CompassPoint::East => "East",
            CompassPoint::SouthEast => "South-East",
            CompassPoint::South => "South",
            CompassPoint::SouthWest => "South-West",
            CompassPoint::West => "West",
            CompassPoint::NorthWest => "North-West",
        }
    }
}

/// Inclusive value band for uniform draws
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub max: f64,
}

impl Band {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max > self.min {
            rng.gen_range(self.min..=self.max)
        } else {
            self.min
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    pub sensors: usize,
    pub origin: GeoPoint,
    pub radius_km: f64,
    pub temperature_c: Band,
    pub humidity_pct: Band,
    pub base_heading: CompassPoint,
    /// Maximum random deviation from the base heading, in degrees
    pub heading_variability_deg: f64,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            sensors: 10,
            origin: GeoPoint::new(53.0, -127.0),
            radius_km: 5.0,
            temperature_c: Band::new(-5.0, 30.0),
            humidity_pct: Band::new(20.0, 100.0),
            base_heading: CompassPoint::East,
            heading_variability_deg: 30.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSample {
    pub lat: f64,
    pub lon: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub wind_direction: CompassPoint,
}

pub struct EnvironmentModel<R> {
    sensors: Vec<GeoPoint>,
    settings: EnvironmentSettings,
    rng: R,
}

impl<R: Rng> EnvironmentModel<R> {
    pub fn new(settings: &EnvironmentSettings, mut rng: R) -> Self {
        let sensors = (0..settings.sensors)
            .map(|_| settings.origin.scatter(&mut rng, settings.radius_km))
            .collect();

        Self {
            sensors,
            settings: settings.clone(),
            rng,
        }
    }

    pub fn sensor_positions(&self) -> &[GeoPoint] {
        &self.sensors
    }

    fn wind_direction(&mut self) -> CompassPoint {
        let spread = self.settings.heading_variability_deg.abs();
        let change = if spread > 0.0 {
            self.rng.gen_range(-spread..=spread)
        } else {
            0.0
        };
        CompassPoint::nearest(self.settings.base_heading.heading_deg() + change)
    }
}

impl<R: Rng + Send> TelemetryModel for EnvironmentModel<R> {
    type Sample = EnvironmentSample;

    fn tick(&mut self) -> Vec<EnvironmentSample> {
        let mut batch = Vec::with_capacity(self.sensors.len());
        for i in 0..self.sensors.len() {
            let position = self.sensors[i].rounded();
            let temperature = round_to(self.settings.temperature_c.draw(&mut self.rng), 2);
            let humidity = round_to(self.settings.humidity_pct.draw(&mut self.rng), 2);
            let wind_direction = self.wind_direction();
            batch.push(EnvironmentSample {
                lat: position.lat,
                lon: position.lon,
                temperature,
                humidity,
                wind_direction,
            });
        }
        batch
    }

    fn device_count(&self) -> usize {
        self.sensors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn nearest_wraps_around_north() {
        assert_eq!(CompassPoint::nearest(350.0), CompassPoint::North);
        assert_eq!(CompassPoint::nearest(-10.0), CompassPoint::North);
        assert_eq!(CompassPoint::nearest(-30.0), CompassPoint::NorthWest);
        assert_eq!(CompassPoint::nearest(720.0 + 90.0), CompassPoint::East);
        assert_eq!(CompassPoint::nearest(100.0), CompassPoint::East);
        assert_eq!(CompassPoint::nearest(120.0), CompassPoint::SouthEast);
    }

    #[test]
    fn wind_is_always_a_compass_label() {
        let settings = EnvironmentSettings {
            base_heading: CompassPoint::North,
            heading_variability_deg: 180.0,
            ..EnvironmentSettings::default()
        };
        let mut model = EnvironmentModel::new(&settings, StdRng::seed_from_u64(11));
        for _ in 0..200 {
            for sample in model.tick() {
                assert!(CompassPoint::ALL.contains(&sample.wind_direction));
                let json = serde_json::to_value(&sample).unwrap();
                let label = json["wind_direction"].as_str().unwrap();
                assert_eq!(label, sample.wind_direction.label());
            }
        }
    }

    #[test]
    fn readings_stay_in_band_and_positions_fixed() {
        let settings = EnvironmentSettings::default();
        let mut model = EnvironmentModel::new(&settings, StdRng::seed_from_u64(2));
        let positions = model.sensor_positions().to_vec();
        for _ in 0..100 {
            let batch = model.tick();
            assert_eq!(batch.len(), 10);
            for (sample, pos) in batch.iter().zip(&positions) {
                let pos = pos.rounded();
                assert_eq!((sample.lat, sample.lon), (pos.lat, pos.lon));
                assert!((-5.0..=30.0).contains(&sample.temperature));
                assert!((20.0..=100.0).contains(&sample.humidity));
            }
        }
    }

    #[test]
    fn small_spread_keeps_base_heading() {
        let settings = EnvironmentSettings {
            heading_variability_deg: 10.0,
            ..EnvironmentSettings::default()
        };
        let mut model = EnvironmentModel::new(&settings, StdRng::seed_from_u64(8));
        assert!(model
            .tick()
            .iter()
            .all(|s| s.wind_direction == CompassPoint::East));
    }
}
