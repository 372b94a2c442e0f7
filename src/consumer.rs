//! The interface through which built chunk meshes leave the mesher.

use crate::{geometry::AxisAlignedBox, lod::ChunkLevel, mesh::ChunkMesh, octree::ChunkID};
use nalgebra::Vector3;
use std::collections::HashMap;

/// Where a chunk mesh belongs in the volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPlacement {
    pub level: ChunkLevel,
    /// Voxel indices of the chunk's lower corner.
    pub offset: [usize; 3],
}

/// Receives chunk meshes as the octree builds, replaces and discards them.
///
/// Calls for a given [`ChunkID`] alternate between building and releasing
/// (or detaching), so a consumer holds at most one mesh per chunk.
pub trait ChunkMeshConsumer: Send {
    /// A mesh was built for the given chunk, and the consumer now owns it.
    fn mesh_built(&mut self, chunk: ChunkID, placement: ChunkPlacement, mesh: ChunkMesh);

    /// The mesh previously built for the given chunk is no longer part of the
    /// world and should be discarded.
    fn mesh_released(&mut self, chunk: ChunkID);

    /// The single-voxel mesh previously built for the given chunk was mined
    /// out of the volume. It is no longer part of the chunk, but the consumer
    /// may keep it around as a free object. Discards it by default.
    fn mesh_detached(&mut self, chunk: ChunkID, _placement: ChunkPlacement) {
        self.mesh_released(chunk);
    }
}

/// A mesh held by a [`RecordingMeshConsumer`].
#[derive(Clone, Debug)]
pub struct RecordedMesh {
    pub placement: ChunkPlacement,
    pub mesh: ChunkMesh,
}

/// A [`ChunkMeshConsumer`] that keeps every live mesh in memory and counts
/// what it receives.
#[derive(Debug, Default)]
pub struct RecordingMeshConsumer {
    live: HashMap<ChunkID, RecordedMesh>,
    detached: Vec<(ChunkID, RecordedMesh)>,
    n_built: usize,
    n_released: usize,
}

impl ChunkPlacement {
    /// Returns the displacement from the volume origin to the chunk's lower
    /// corner, which maps chunk-local mesh positions to volume positions.
    pub fn translation(&self) -> Vector3<f32> {
        Vector3::from(self.offset.map(|x| x as f32))
    }

    /// Returns the bounding box of the given mesh of this chunk in volume
    /// coordinates.
    pub fn world_aabb(&self, mesh: &ChunkMesh) -> AxisAlignedBox {
        mesh.aabb().translated(&self.translation())
    }
}

impl RecordingMeshConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live mesh of the given chunk, if any.
    pub fn live_mesh(&self, chunk: ChunkID) -> Option<&RecordedMesh> {
        self.live.get(&chunk)
    }

    /// Returns the identifiers of all chunks with a live mesh, in no
    /// particular order.
    pub fn live_chunk_ids(&self) -> Vec<ChunkID> {
        self.live.keys().copied().collect()
    }

    /// Returns the total number of vertices in all live meshes.
    pub fn live_vertex_count(&self) -> usize {
        self.live
            .values()
            .map(|recorded| recorded.mesh.vertex_count())
            .sum()
    }

    /// Returns the meshes detached by mining, in the order they were mined.
    pub fn detached(&self) -> &[(ChunkID, RecordedMesh)] {
        &self.detached
    }

    /// Returns the number of meshes built so far.
    pub fn n_built(&self) -> usize {
        self.n_built
    }

    /// Returns the number of meshes released so far, not counting detached
    /// ones.
    pub fn n_released(&self) -> usize {
        self.n_released
    }
}

impl ChunkMeshConsumer for RecordingMeshConsumer {
    fn mesh_built(&mut self, chunk: ChunkID, placement: ChunkPlacement, mesh: ChunkMesh) {
        let previous = self.live.insert(chunk, RecordedMesh { placement, mesh });
        debug_assert!(previous.is_none(), "Chunk {chunk} already had a live mesh");
        self.n_built += 1;
    }

    fn mesh_released(&mut self, chunk: ChunkID) {
        let removed = self.live.remove(&chunk);
        debug_assert!(removed.is_some(), "Chunk {chunk} had no live mesh to release");
        self.n_released += 1;
    }

    fn mesh_detached(&mut self, chunk: ChunkID, placement: ChunkPlacement) {
        if let Some(recorded) = self.live.remove(&chunk) {
            debug_assert_eq!(recorded.placement, placement);
            self.detached.push((chunk, recorded));
        }
    }
}
