use std::collections::BTreeSet;

use crate::ids::TagId;
use crate::labels::{ColorLabel, PickLabel, Rating};
use crate::orientation::Orientation;

/// Editable, file-relevant metadata of one item.
///
/// Used both as the record store's editable view of a row and as the value
/// written into a file's embedded metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MetadataSnapshot {
    pub tags: BTreeSet<TagId>,
    pub pick_label: PickLabel,
    pub color_label: ColorLabel,
    pub rating: Rating,
    pub orientation: Orientation,
    pub title: Option<String>,
    pub comment: Option<String>,
}

impl MetadataSnapshot {
    /// Returns a copy with `update` applied.
    pub fn with_update(&self, update: &FieldUpdate) -> MetadataSnapshot {
        let mut next = self.clone();
        match update {
            FieldUpdate::Tags(tags) => next.tags = tags.clone(),
            FieldUpdate::PickLabel(label) => next.pick_label = *label,
            FieldUpdate::ColorLabel(label) => next.color_label = *label,
            FieldUpdate::Rating(rating) => next.rating = *rating,
            FieldUpdate::Orientation(orientation) => next.orientation = *orientation,
        }
        next
    }
}

/// Single-field update written back to the record store without touching
/// the other fields of the row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FieldUpdate {
    Tags(BTreeSet<TagId>),
    PickLabel(PickLabel),
    ColorLabel(ColorLabel),
    Rating(Rating),
    Orientation(Orientation),
}

/// Relational (grouping) edits between records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RelationChange {
    AddToGroup,
    RemoveFromGroup,
    Ungroup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_update_only_touches_the_named_field() {
        let base = MetadataSnapshot {
            title: Some("dunes".into()),
            ..Default::default()
        };
        let updated = base.with_update(&FieldUpdate::ColorLabel(ColorLabel::Green));
        assert_eq!(updated.color_label, ColorLabel::Green);
        assert_eq!(updated.title.as_deref(), Some("dunes"));
        assert_eq!(updated.tags, base.tags);
    }
}
