//! Striping layout of a regular file.

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

/// Stripe units must be a multiple of this.
pub const STRIPE_ALIGNMENT: u32 = 64 * 1024;

/// How a file's bytes are spread over objects in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLayout {
    /// Bytes written to one object before moving to the next in a stripe.
    pub stripe_unit: u32,
    /// Objects per stripe.
    pub stripe_count: u32,
    /// Maximum bytes per object.
    pub object_size: u32,
    /// Storage pool name.
    pub pool: String,
}

impl FileLayout {
    pub fn new(stripe_unit: u32, stripe_count: u32, object_size: u32, pool: impl Into<String>) -> Self {
        Self {
            stripe_unit,
            stripe_count,
            object_size,
            pool: pool.into(),
        }
    }

    /// Check the numeric rules. Pool existence is the namespace's call.
    pub fn validate(&self) -> FsResult<()> {
        if self.stripe_unit == 0 || self.stripe_unit % STRIPE_ALIGNMENT != 0 {
            return Err(FsError::invalid(format!(
                "stripe_unit {} is not a positive multiple of {}",
                self.stripe_unit, STRIPE_ALIGNMENT
            )));
        }
        if self.stripe_count == 0 {
            return Err(FsError::invalid("stripe_count must be at least 1"));
        }
        if self.object_size == 0 || self.object_size % self.stripe_unit != 0 {
            return Err(FsError::invalid(format!(
                "object_size {} is not a positive multiple of stripe_unit {}",
                self.object_size, self.stripe_unit
            )));
        }
        if self.pool.is_empty() {
            return Err(FsError::invalid("empty pool name"));
        }
        Ok(())
    }

    /// Preferred I/O size reported in `st_blksize`.
    pub fn blksize(&self) -> u64 {
        u64::from(self.stripe_unit).max(4096)
    }
}

impl Default for FileLayout {
    fn default() -> Self {
        Self::new(4 << 20, 1, 4 << 20, "data")
    }
}
