use std::path::Path;

use shoebox_model::{FieldUpdate, ImageId, MetadataSnapshot, RelationChange};

use crate::error::Result;

/// Structured record store holding the library's rows.
///
/// Transactions are serial: the pipeline opens at most one at a time and only
/// from the database stage.
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore: Send + Sync {
    /// Editable metadata view of one row.
    fn load(&self, id: ImageId) -> Result<MetadataSnapshot>;

    /// Stores without a transaction concept return `false`; the grouper then
    /// never calls the transaction methods.
    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin_transaction(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    /// Commit the open transaction and immediately open the next one.
    fn reopen(&self) -> Result<()> {
        self.commit()?;
        self.begin_transaction()
    }

    fn write_partial(&self, id: ImageId, update: &FieldUpdate) -> Result<()>;

    fn write_full(&self, id: ImageId, snapshot: &MetadataSnapshot) -> Result<()>;

    fn mutate_relation(
        &self,
        change: RelationChange,
        leader: Option<ImageId>,
        records: &[ImageId],
    ) -> Result<()>;

    /// Copy the stored attributes of `source` onto the (already scanned)
    /// derived file at `derived`.
    fn copy_attributes(&self, source: ImageId, derived: &Path) -> Result<()>;
}
