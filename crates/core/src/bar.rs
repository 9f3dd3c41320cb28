use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV bar. Sequences of bars are ordered by timestamp and
/// treated as immutable once fetched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Directional class used for labels and predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    /// The fixed label set classification metrics are computed over.
    pub const ALL: [Self; 3] = [Self::Bullish, Self::Neutral, Self::Bearish];

    /// Classifies a realized return. Returns strictly inside `±neutral_band`
    /// are neutral.
    #[must_use]
    pub fn from_return(realized_return: f64, neutral_band: f64) -> Self {
        if realized_return > neutral_band {
            Self::Bullish
        } else if realized_return < -neutral_band {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    /// Position taken when acting on this direction: long, flat or short.
    #[must_use]
    pub const fn position(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Neutral => 0.0,
            Self::Bearish => -1.0,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Neutral => "neutral",
            Self::Bearish => "bearish",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_return_respects_neutral_band() {
        assert_eq!(Direction::from_return(0.002, 0.001), Direction::Bullish);
        assert_eq!(Direction::from_return(-0.002, 0.001), Direction::Bearish);
        assert_eq!(Direction::from_return(0.001, 0.001), Direction::Neutral);
        assert_eq!(Direction::from_return(0.0, 0.0), Direction::Neutral);
    }

    #[test]
    fn position_maps_to_long_flat_short() {
        assert!((Direction::Bullish.position() - 1.0).abs() < f64::EPSILON);
        assert!(Direction::Neutral.position().abs() < f64::EPSILON);
        assert!((Direction::Bearish.position() + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn direction_serializes_snake_case() {
        let json = serde_json::to_string(&Direction::Bearish).unwrap();
        assert_eq!(json, "\"bearish\"");
    }
}
