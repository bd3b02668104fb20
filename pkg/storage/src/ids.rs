use common::uuid::Uuid;

/// A 128-bit value uniquely identifying a row within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub u128);

impl RowId {
    pub fn from_parts(high: u64, low: u64) -> Self {
        RowId(((high as u128) << 64) | low as u128)
    }
}

/// Identifies a partition: the owning table plus the partition index
/// within that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub table_id: Uuid,
    pub partition_id: u16,
}
