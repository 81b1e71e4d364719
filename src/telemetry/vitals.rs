//! Vital-sign model
//!
//! Every subject gets fresh, independent draws each tick. There is no
//! smoothing between ticks; each sample carries the wall-clock time of its
//! own draw.

use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{round_to, TelemetryModel};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Posture {
    Standing,
    #[serde(rename = "Lying Down")]
    LyingDown,
    #[serde(rename = "On Side")]
    OnSide,
}

impl Posture {
    pub const ALL: [Posture; 3] = [Posture::Standing, Posture::LyingDown, Posture::OnSide];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsSettings {
    pub subjects: usize,
}

impl Default for VitalsSettings {
    fn default() -> Self {
        Self { subjects: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalsSample {
    pub elk_id: u32,
    pub timestamp: String,
    /// °C, one decimal
    pub body_temperature: f64,
    /// beats per minute
    pub heart_rate: u32,
    /// breaths per minute
    pub respiration_rate: u32,
    /// 0 resting, 1 high movement
    pub activity_level: f64,
    pub posture: Posture,
    /// percent
    pub hydration_level: f64,
    /// 0 calm, 10 high stress
    pub stress_level: f64,
}

pub struct VitalsModel<R> {
    subjects: Vec<u32>,
    rng: R,
}

impl<R: Rng> VitalsModel<R> {
    pub fn new(settings: &VitalsSettings, rng: R) -> Self {
        Self {
            subjects: (1..=settings.subjects as u32).collect(),
            rng,
        }
    }

    fn draw(&mut self, elk_id: u32) -> VitalsSample {
        let rng = &mut self.rng;
        VitalsSample {
            elk_id,
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            body_temperature: round_to(rng.gen_range(36.5..=39.5), 1),
            heart_rate: rng.gen_range(30..=50),
            respiration_rate: rng.gen_range(10..=35),
            activity_level: round_to(rng.gen_range(0.0..=1.0), 2),
            posture: Posture::ALL[rng.gen_range(0..Posture::ALL.len())],
            hydration_level: round_to(rng.gen_range(50.0..=100.0), 1),
            stress_level: round_to(rng.gen_range(0.0..=10.0), 2),
        }
    }
}

impl<R: Rng + Send> TelemetryModel for VitalsModel<R> {
    type Sample = VitalsSample;

    fn tick(&mut self) -> Vec<VitalsSample> {
        let subjects = self.subjects.clone();
        subjects.into_iter().map(|id| self.draw(id)).collect()
    }

    fn device_count(&self) -> usize {
        self.subjects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn draws_stay_in_range() {
        let mut model = VitalsModel::new(&VitalsSettings::default(), StdRng::seed_from_u64(4));
        for _ in 0..500 {
            let batch = model.tick();
            assert_eq!(batch.len(), 8);
            for s in batch {
                assert!((0.0..=1.0).contains(&s.activity_level));
                assert!((50.0..=100.0).contains(&s.hydration_level));
                assert!((0.0..=10.0).contains(&s.stress_level));
                assert!((36.5..=39.5).contains(&s.body_temperature));
                assert!((30..=50).contains(&s.heart_rate));
                assert!((10..=35).contains(&s.respiration_rate));
            }
        }
    }

    #[test]
    fn timestamp_uses_plain_datetime_format() {
        let mut model = VitalsModel::new(&VitalsSettings { subjects: 1 }, StdRng::seed_from_u64(0));
        let sample = &model.tick()[0];
        assert!(NaiveDateTime::parse_from_str(&sample.timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn posture_serializes_with_spaces() {
        assert_eq!(
            serde_json::to_string(&Posture::LyingDown).unwrap(),
            "\"Lying Down\""
        );
        assert_eq!(serde_json::to_string(&Posture::OnSide).unwrap(), "\"On Side\"");
    }

    #[test]
    fn every_posture_eventually_drawn() {
        let mut model = VitalsModel::new(&VitalsSettings::default(), StdRng::seed_from_u64(12));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            seen.extend(model.tick().into_iter().map(|s| s.posture));
        }
        assert_eq!(seen.len(), 3);
    }
}
