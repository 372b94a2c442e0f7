//! Counting the vertices emitted by each cube of a chunk.

use super::ChunkBuildContext;
use rayon::prelude::*;

/// Smallest number of cubes handled by a single parallel task.
const MIN_CUBES_PER_TASK: usize = 256;

/// Computes the number of vertices emitted by each cube in the chunk's index
/// space and stores it in `counts` at the cube's index. Cubes are processed
/// in parallel on the current thread pool.
///
/// # Panics
/// If `cube_coords` and `counts` differ in length.
pub(super) fn count_cube_vertices(
    context: &ChunkBuildContext<'_>,
    cube_coords: &[[u8; 3]],
    counts: &mut [u32],
) {
    assert_eq!(cube_coords.len(), counts.len());

    counts
        .par_iter_mut()
        .zip(cube_coords.par_iter())
        .with_min_len(MIN_CUBES_PER_TASK)
        .for_each(|(count, &coords)| {
            *count = context.cube_vertex_count(coords);
        });
}
