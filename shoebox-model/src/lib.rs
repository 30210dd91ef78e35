//! Value types shared by the shoebox crates: record identity, editable
//! metadata fields and the partial/full update shapes the record store
//! accepts.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod labels;
pub mod metadata;
pub mod orientation;
pub mod record;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{AlbumId, ImageId, TagId};
pub use labels::{ColorLabel, PickLabel, Rating};
pub use metadata::{FieldUpdate, MetadataSnapshot, RelationChange};
pub use orientation::{Orientation, TransformAction};
pub use record::ImageRecord;
