//! Batch window planning.

use crate::error::{Error, Result};
use crate::types::BatchWindow;

/// Split `[0, total_count)` into `ceil(total_count / page_size)` windows.
///
/// Every window reports `page_size` as its size, including the last one.
pub fn plan_batches(total_count: u64, page_size: u64) -> Result<Vec<BatchWindow>> {
    if page_size == 0 {
        return Err(Error::InvalidPlan("page size must be positive".to_string()));
    }

    let num_batches = total_count.div_ceil(page_size);
    Ok((0..num_batches)
        .map(|i| BatchWindow::new(i * page_size, page_size))
        .collect())
}
