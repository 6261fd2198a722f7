//! Band scores on the 0–9 scale with half-band granularity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::ValidationError;

/// A band score between 0 and 9 in steps of 0.5.
///
/// Stored as a count of half bands so equality, ordering and hashing are exact.
/// Serialised as a plain JSON number (`6.5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Band(u8);

impl Band {
    pub const MIN: Band = Band(0);
    pub const MAX: Band = Band(18);

    /// Parse a numeric band, rejecting values off the half-band grid.
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        let doubled = value * 2.0;
        if !value.is_finite() || !(0.0..=9.0).contains(&value) || doubled.fract() != 0.0 {
            return Err(ValidationError::InvalidBand {
                value: value.to_string(),
            });
        }
        Ok(Band(doubled as u8))
    }

    /// Build from a whole band (0–9).
    pub fn whole(value: u8) -> Result<Self, ValidationError> {
        Self::new(f64::from(value))
    }

    pub fn from_half_steps(steps: u8) -> Option<Self> {
        (steps <= Self::MAX.0).then_some(Band(steps))
    }

    pub fn half_steps(self) -> u8 {
        self.0
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / 2.0
    }

    /// The whole band at or below this score, used for descriptor lookups.
    pub fn floor_whole(self) -> u8 {
        self.0 / 2
    }

    /// Signed distance from `self` up to `target`, in half bands.
    pub fn half_steps_below(self, target: Band) -> i16 {
        i16::from(target.0) - i16::from(self.0)
    }

    /// Mean of `scores`, rounded down to the nearest half band.
    ///
    /// Returns `None` for an empty slice.
    pub fn floor_mean(scores: &[Band]) -> Option<Band> {
        if scores.is_empty() {
            return None;
        }
        let total: usize = scores.iter().map(|b| usize::from(b.0)).sum();
        // Every score is <= 18, so the mean is too.
        Some(Band((total / scores.len()) as u8))
    }
}

impl TryFrom<f64> for Band {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Band::new(value)
    }
}

impl From<Band> for f64 {
    fn from(band: Band) -> Self {
        band.value()
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 2 == 0 {
            write!(f, "{}", self.0 / 2)
        } else {
            write!(f, "{}.5", self.0 / 2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands(values: &[f64]) -> Vec<Band> {
        values.iter().map(|v| Band::new(*v).unwrap()).collect()
    }

    #[test]
    fn test_band_accepts_half_steps_only() {
        assert!(Band::new(0.0).is_ok());
        assert!(Band::new(6.5).is_ok());
        assert!(Band::new(9.0).is_ok());
        assert!(Band::new(6.25).is_err());
        assert!(Band::new(-0.5).is_err());
        assert!(Band::new(9.5).is_err());
        assert!(Band::new(f64::NAN).is_err());
    }

    #[test]
    fn test_floor_mean_rounds_down_to_half_band() {
        assert_eq!(Band::floor_mean(&bands(&[7.0, 7.0, 7.0, 7.0])), Band::new(7.0).ok());
        assert_eq!(Band::floor_mean(&bands(&[6.0, 6.0, 6.0, 7.0])), Band::new(6.0).ok());
        assert_eq!(Band::floor_mean(&bands(&[6.0, 7.0, 7.0, 7.0])), Band::new(6.5).ok());
        assert_eq!(Band::floor_mean(&bands(&[6.0, 6.0, 7.0, 7.0])), Band::new(6.5).ok());
        assert_eq!(Band::floor_mean(&bands(&[4.0, 8.0, 8.0, 8.0])), Band::new(7.0).ok());
        assert_eq!(Band::floor_mean(&bands(&[8.0, 9.0, 9.0, 9.0])), Band::new(8.5).ok());
        assert_eq!(Band::floor_mean(&bands(&[0.0, 0.0, 0.0, 0.0])), Band::new(0.0).ok());
        assert_eq!(Band::floor_mean(&[]), None);
    }

    #[test]
    fn test_band_serializes_as_number() {
        let band = Band::new(6.5).unwrap();
        assert_eq!(serde_json::to_string(&band).unwrap(), "6.5");
        let parsed: Band = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, Band::new(7.0).unwrap());
        assert!(serde_json::from_str::<Band>("7.3").is_err());
    }

    #[test]
    fn test_band_display_and_gap() {
        assert_eq!(Band::new(6.5).unwrap().to_string(), "6.5");
        assert_eq!(Band::new(7.0).unwrap().to_string(), "7");
        let score = Band::new(4.0).unwrap();
        let target = Band::new(7.0).unwrap();
        assert_eq!(score.half_steps_below(target), 6);
        assert_eq!(target.half_steps_below(score), -6);
        assert_eq!(Band::new(6.5).unwrap().floor_whole(), 6);
    }
}
