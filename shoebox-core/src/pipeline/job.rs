use std::{fmt, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};
use shoebox_model::{
    ColorLabel, ImageRecord, MetadataSnapshot, Orientation, PickLabel, Rating, RelationChange,
    TagId, TransformAction,
};
use uuid::Uuid;

/// Unique identifier for one scheduled intent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record mutations handled by the database stage.
#[derive(Clone, Debug, PartialEq)]
pub enum DatabaseOperation {
    AssignTags(Vec<TagId>),
    RemoveTags(Vec<TagId>),
    AssignPickLabel(PickLabel),
    AssignColorLabel(ColorLabel),
    AssignRating(Rating),
    AddToGroup { leader: ImageRecord },
    RemoveFromGroup,
    Ungroup,
    SetExifOrientation(Orientation),
    ApplyMetadata(Arc<MetadataSnapshot>),
}

impl DatabaseOperation {
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseOperation::AssignTags(_) => "assign_tags",
            DatabaseOperation::RemoveTags(_) => "remove_tags",
            DatabaseOperation::AssignPickLabel(_) => "assign_pick_label",
            DatabaseOperation::AssignColorLabel(_) => "assign_color_label",
            DatabaseOperation::AssignRating(_) => "assign_rating",
            DatabaseOperation::AddToGroup { .. } => "add_to_group",
            DatabaseOperation::RemoveFromGroup => "remove_from_group",
            DatabaseOperation::Ungroup => "ungroup",
            DatabaseOperation::SetExifOrientation(_) => "set_exif_orientation",
            DatabaseOperation::ApplyMetadata(_) => "apply_metadata",
        }
    }

    pub fn relation(&self) -> Option<RelationChange> {
        match self {
            DatabaseOperation::AddToGroup { .. } => Some(RelationChange::AddToGroup),
            DatabaseOperation::RemoveFromGroup => Some(RelationChange::RemoveFromGroup),
            DatabaseOperation::Ungroup => Some(RelationChange::Ungroup),
            _ => None,
        }
    }
}

/// One high-level intent and its ordered input; consumed once by the
/// database stage.
#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub operation: DatabaseOperation,
    pub records: Vec<ImageRecord>,
}

impl Job {
    pub fn new(operation: DatabaseOperation, records: Vec<ImageRecord>) -> Self {
        Self {
            id: JobId::new(),
            operation,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// On-disk action performed by the file stage.
#[derive(Clone, Debug, PartialEq)]
pub enum FileOperation {
    /// Rewrite embedded metadata from the record's stored state, read when
    /// the write starts so edits collapsed into this write are included.
    WriteMetadata,
    WriteOrientation(Orientation),
    Transform(TransformAction),
    CopyAttributes { derived_paths: Vec<PathBuf> },
}

impl FileOperation {
    pub fn name(&self) -> &'static str {
        match self {
            FileOperation::WriteMetadata => "write_metadata",
            FileOperation::WriteOrientation(_) => "write_orientation",
            FileOperation::Transform(_) => "transform",
            FileOperation::CopyAttributes { .. } => "copy_attributes",
        }
    }

    /// Whether records of this operation went through the pending-write set
    /// and must release it when their write begins.
    pub fn clears_pending_guard(&self) -> bool {
        matches!(
            self,
            FileOperation::WriteMetadata | FileOperation::WriteOrientation(_)
        )
    }

    pub fn failure_message(&self) -> &'static str {
        match self {
            FileOperation::WriteMetadata => "Failed to write metadata to these files",
            FileOperation::WriteOrientation(_) => {
                "Failed to revise the Exif orientation of these files"
            }
            FileOperation::Transform(_) => "Failed to transform these files",
            FileOperation::CopyAttributes { .. } => {
                "Failed to copy attributes to the derived files of these items"
            }
        }
    }
}

/// Records of one job that need an on-disk rewrite.
#[derive(Clone, Debug)]
pub struct WriteCandidate {
    pub job_id: JobId,
    pub operation: Arc<FileOperation>,
    pub records: Vec<ImageRecord>,
}

impl WriteCandidate {
    pub fn new(job_id: JobId, operation: FileOperation, records: Vec<ImageRecord>) -> Self {
        Self {
            job_id,
            operation: Arc::new(operation),
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
