use crate::error::{ModelError, Result};

/// EXIF orientation tag values (1..=8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Orientation {
    #[default]
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    pub fn exif_value(&self) -> u16 {
        match self {
            Orientation::Normal => 1,
            Orientation::FlipHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::FlipVertical => 4,
            Orientation::Transpose => 5,
            Orientation::Rotate90 => 6,
            Orientation::Transverse => 7,
            Orientation::Rotate270 => 8,
        }
    }
}

impl TryFrom<u16> for Orientation {
    type Error = ModelError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Orientation::Normal),
            2 => Ok(Orientation::FlipHorizontal),
            3 => Ok(Orientation::Rotate180),
            4 => Ok(Orientation::FlipVertical),
            5 => Ok(Orientation::Transpose),
            6 => Ok(Orientation::Rotate90),
            7 => Ok(Orientation::Transverse),
            8 => Ok(Orientation::Rotate270),
            other => Err(ModelError::OutOfRange {
                field: "exif orientation",
                value: other.into(),
            }),
        }
    }
}

/// Pixel-level transform applied by the file-write stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransformAction {
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
    Transpose,
    Transverse,
    /// Resolve the action from the file's current embedded orientation.
    Auto,
}

impl TransformAction {
    /// Action that bakes `orientation` into the pixels, leaving the image
    /// upright with a `Normal` tag. `None` when nothing needs to change.
    pub fn for_orientation(orientation: Orientation) -> Option<TransformAction> {
        match orientation {
            Orientation::Normal => None,
            Orientation::FlipHorizontal => Some(TransformAction::FlipHorizontal),
            Orientation::Rotate180 => Some(TransformAction::Rotate180),
            Orientation::FlipVertical => Some(TransformAction::FlipVertical),
            Orientation::Transpose => Some(TransformAction::Transpose),
            Orientation::Rotate90 => Some(TransformAction::Rotate90),
            Orientation::Transverse => Some(TransformAction::Transverse),
            Orientation::Rotate270 => Some(TransformAction::Rotate270),
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, TransformAction::Auto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exif_values_round_trip_through_try_from() {
        for raw in 1..=8u16 {
            let orientation = Orientation::try_from(raw).unwrap();
            assert_eq!(orientation.exif_value(), raw);
        }
        assert!(Orientation::try_from(0).is_err());
        assert!(Orientation::try_from(9).is_err());
    }

    #[test]
    fn normal_orientation_needs_no_transform() {
        assert_eq!(TransformAction::for_orientation(Orientation::Normal), None);
        assert_eq!(
            TransformAction::for_orientation(Orientation::Rotate90),
            Some(TransformAction::Rotate90)
        );
    }
}
