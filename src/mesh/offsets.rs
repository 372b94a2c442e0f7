//! Turning per-cube vertex counts into write offsets.

use anyhow::{Result, anyhow};

/// Replaces each count in the given array with the sum of all preceding
/// counts, so that each entry becomes the offset where the cube's vertices
/// start in the chunk's vertex buffer. Returns the total number of vertices.
///
/// # Errors
/// Returns an error if the total does not fit in a `u32`.
pub fn exclusive_prefix_sum(count_offsets: &mut [u32]) -> Result<u32> {
    let mut total: u32 = 0;
    for entry in count_offsets.iter_mut() {
        let count = *entry;
        *entry = total;
        total = total
            .checked_add(count)
            .ok_or_else(|| anyhow!("Chunk vertex count exceeds {}", u32::MAX))?;
    }
    Ok(total)
}
