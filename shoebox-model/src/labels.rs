use std::fmt;

use crate::error::{ModelError, Result};

/// Culling state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PickLabel {
    #[default]
    None,
    Rejected,
    Pending,
    Accepted,
}

impl TryFrom<u8> for PickLabel {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PickLabel::None),
            1 => Ok(PickLabel::Rejected),
            2 => Ok(PickLabel::Pending),
            3 => Ok(PickLabel::Accepted),
            other => Err(ModelError::OutOfRange {
                field: "pick label",
                value: other.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColorLabel {
    #[default]
    None,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Magenta,
    Gray,
    Black,
    White,
}

impl TryFrom<u8> for ColorLabel {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self> {
        const LABELS: [ColorLabel; 10] = [
            ColorLabel::None,
            ColorLabel::Red,
            ColorLabel::Orange,
            ColorLabel::Yellow,
            ColorLabel::Green,
            ColorLabel::Blue,
            ColorLabel::Magenta,
            ColorLabel::Gray,
            ColorLabel::Black,
            ColorLabel::White,
        ];
        LABELS
            .get(usize::from(value))
            .copied()
            .ok_or(ModelError::OutOfRange {
                field: "color label",
                value: value.into(),
            })
    }
}

/// Star rating, 0 (unrated) through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 5;

    pub fn new(stars: u8) -> Result<Self> {
        if stars > Self::MAX {
            return Err(ModelError::OutOfRange {
                field: "rating",
                value: stars.into(),
            });
        }
        Ok(Rating(stars))
    }

    pub fn stars(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, Self::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_rejects_more_than_five_stars() {
        assert!(Rating::new(5).is_ok());
        assert_eq!(
            Rating::new(6),
            Err(ModelError::OutOfRange {
                field: "rating",
                value: 6
            })
        );
    }

    #[test]
    fn color_label_from_raw_value() {
        assert_eq!(ColorLabel::try_from(2), Ok(ColorLabel::Orange));
        assert_eq!(ColorLabel::try_from(9), Ok(ColorLabel::White));
        assert!(ColorLabel::try_from(10).is_err());
    }

    #[test]
    fn pick_label_from_raw_value() {
        assert_eq!(PickLabel::try_from(3), Ok(PickLabel::Accepted));
        assert!(PickLabel::try_from(4).is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn rating_deserialization_is_validated() {
        let ok: Rating = serde_json::from_str("4").unwrap();
        assert_eq!(ok.stars(), 4);
        assert!(serde_json::from_str::<Rating>("9").is_err());
    }
}
