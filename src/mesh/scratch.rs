//! Reusable per-build scratch arrays.

use crate::{lod::ChunkLevel, utils};
use cubemesh_log::with_timing_info_logging;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

/// The arrays needed for meshing a chunk whose cube index space has a given
/// edge length. They are allocated once and reused for every build sharing
/// that index space.
#[derive(Clone, Debug)]
pub struct CubeScratch {
    cube_coords: Vec<[u8; 3]>,
    count_offsets: Vec<u32>,
}

/// Lazily allocated [`CubeScratch`] for every index space level, each behind
/// its own lock so that at most one build uses a given set of arrays at a
/// time.
#[derive(Debug)]
pub(super) struct ScratchRegistry {
    levels: Vec<Mutex<Option<CubeScratch>>>,
}

impl CubeScratch {
    /// Creates the scratch arrays for the cube index space at the given level.
    pub fn for_level(level: ChunkLevel) -> Self {
        let edge = level.edge_voxels();
        let n_cubes = edge.pow(3);

        let mut cube_coords = Vec::with_capacity(n_cubes);
        for i in 0..edge {
            for j in 0..edge {
                for k in 0..edge {
                    debug_assert_eq!(utils::linear_index(edge, i, j, k), cube_coords.len());
                    cube_coords.push([i as u8, j as u8, k as u8]);
                }
            }
        }

        Self {
            cube_coords,
            count_offsets: vec![0; n_cubes],
        }
    }

    /// Returns the number of cubes in the index space.
    pub fn n_cubes(&self) -> usize {
        self.cube_coords.len()
    }

    /// Returns the local coordinates of every cube, in cube index order.
    pub fn cube_coords(&self) -> &[[u8; 3]] {
        &self.cube_coords
    }

    /// Returns the cube coordinates together with the array holding first the
    /// vertex count and then the write offset of every cube.
    pub fn coords_and_count_offsets_mut(&mut self) -> (&[[u8; 3]], &mut [u32]) {
        (&self.cube_coords, &mut self.count_offsets)
    }
}

impl ScratchRegistry {
    pub(super) fn new() -> Self {
        Self {
            levels: (0..ChunkLevel::COUNT).map(|_| Mutex::new(None)).collect(),
        }
    }

    /// Locks the scratch arrays for the given index space level, allocating
    /// them first if this is their first use.
    pub(super) fn lock(&self, level: ChunkLevel) -> MappedMutexGuard<'_, CubeScratch> {
        MutexGuard::map(self.levels[level.idx()].lock(), |scratch| {
            scratch.get_or_insert_with(|| CubeScratch::for_level(level))
        })
    }

    /// Allocates the scratch arrays for all index space levels up to and
    /// including the given one that are not already allocated.
    pub(super) fn preallocate_up_to(&self, max_level: ChunkLevel) {
        with_timing_info_logging!("Allocating scratch arrays up to level {}", max_level; {
            for level in (0..=max_level.number()).filter_map(|level| ChunkLevel::new(level).ok()) {
                drop(self.lock(level));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_list_cube_coords_in_linear_index_order() {
        let scratch = CubeScratch::for_level(ChunkLevel::new(2).unwrap());
        assert_eq!(scratch.n_cubes(), 64);
        assert_eq!(scratch.cube_coords()[0], [0, 0, 0]);
        assert_eq!(scratch.cube_coords()[1], [0, 0, 1]);
        assert_eq!(scratch.cube_coords()[4], [0, 1, 0]);
        assert_eq!(scratch.cube_coords()[16], [1, 0, 0]);
        assert_eq!(scratch.cube_coords()[63], [3, 3, 3]);
    }

    #[test]
    fn should_reuse_allocated_scratch_for_same_level() {
        let registry = ScratchRegistry::new();
        let level = ChunkLevel::new(1).unwrap();
        {
            let mut scratch = registry.lock(level);
            scratch.coords_and_count_offsets_mut().1[3] = 42;
        }
        let mut scratch = registry.lock(level);
        assert_eq!(scratch.coords_and_count_offsets_mut().1[3], 42);
    }
}
