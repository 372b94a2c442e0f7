//! Octree of chunks covering a voxel volume at varying levels of detail.

use crate::{
    config::LODConfig,
    consumer::{ChunkMeshConsumer, ChunkPlacement},
    geometry::AxisAlignedBox,
    lod::{AggregationFactor, ChunkLevel},
    mesh::MeshingEngine,
    volume::VoxelVolume,
};
use anyhow::{Result, bail};
use cubemesh_log::debug;
use nalgebra::{Point3, point};
use std::{fmt, mem};

/// Identifier for a [`Chunk`] in a [`ChunkOctree`]. Identifiers of destroyed
/// chunks may be reused for chunks created later.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkID(u32);

/// A cubic region of the voxel volume at a specific level of the octree.
#[derive(Clone, Debug)]
pub struct Chunk {
    level: ChunkLevel,
    offset: [usize; 3],
    aggregation_factor: AggregationFactor,
    bounds: AxisAlignedBox,
    center: Point3<f32>,
    state: ChunkState,
}

/// What a chunk currently consists of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkState {
    /// The chunk has never been evaluated.
    Unbuilt,
    /// The chunk is represented by a single mesh, or by nothing if it has no
    /// visible geometry.
    Leaf { mesh: Option<MeshSummary> },
    /// The chunk is represented by its eight children.
    Subdivided { children: [ChunkID; 8] },
}

/// What the octree remembers about a mesh it has handed to the consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshSummary {
    pub vertex_count: usize,
    pub aggregation_factor: AggregationFactor,
}

/// Decides how each chunk should be represented given the viewer distance
/// and the current interest points.
#[derive(Clone, Debug)]
pub struct LODPolicy {
    root_level: ChunkLevel,
    subdivision_distance: f32,
    near_aggregation_distance: f32,
    interest_margin: f32,
}

/// The outcome of evaluating the [`LODPolicy`] for a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LODDecision {
    /// Represent the chunk by its children.
    Subdivide,
    /// Mesh the chunk anew with the given aggregation factor.
    Rebuild(AggregationFactor),
    /// The current representation is still valid.
    Keep,
}

/// Counts of what happened during refreshes of the octree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub chunks_visited: usize,
    pub chunks_subdivided: usize,
    pub meshes_built: usize,
    pub empty_builds: usize,
    pub meshes_released: usize,
    pub chunks_destroyed: usize,
    pub vertices_built: usize,
}

/// Everything a refresh needs besides the octree itself.
pub struct ChunkRefresher<'a> {
    pub engine: &'a MeshingEngine,
    pub volume: &'a VoxelVolume,
    pub policy: &'a LODPolicy,
    pub interest_points: &'a [Point3<f32>],
    pub consumer: &'a mut dyn ChunkMeshConsumer,
    pub stats: &'a mut RefreshStats,
}

/// Arena of chunks forming an octree over a voxel volume. The volume is tiled
/// by top-level chunks at the root level, each of which may be recursively
/// split into eight children down to single voxels.
#[derive(Debug)]
pub struct ChunkOctree {
    slots: Vec<Option<Chunk>>,
    free_slots: Vec<ChunkID>,
    roots: Vec<ChunkID>,
    root_level: ChunkLevel,
    volume_edge: usize,
}

impl fmt::Display for ChunkID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Chunk {
    fn new(level: ChunkLevel, offset: [usize; 3]) -> Self {
        let edge = level.edge_voxels() as f32;
        let lower = point![offset[0] as f32, offset[1] as f32, offset[2] as f32];
        let bounds = AxisAlignedBox::new(lower.map(|x| x - 1.0), lower.map(|x| x + edge + 1.0));
        let center = bounds.center();
        Self {
            level,
            offset,
            aggregation_factor: AggregationFactor::One,
            bounds,
            center,
            state: ChunkState::Unbuilt,
        }
    }

    pub fn level(&self) -> ChunkLevel {
        self.level
    }

    /// Returns the voxel indices of the chunk's lower corner.
    pub fn offset(&self) -> [usize; 3] {
        self.offset
    }

    /// Returns the aggregation factor the chunk was last meshed with.
    pub fn aggregation_factor(&self) -> AggregationFactor {
        self.aggregation_factor
    }

    /// Returns the chunk's bounds, which extend one voxel beyond the chunk on
    /// every side.
    pub fn bounds(&self) -> &AxisAlignedBox {
        &self.bounds
    }

    pub fn center(&self) -> &Point3<f32> {
        &self.center
    }

    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    pub fn placement(&self) -> ChunkPlacement {
        ChunkPlacement {
            level: self.level,
            offset: self.offset,
        }
    }

    /// Returns the chunk's mesh, if it is a leaf with geometry.
    pub fn mesh(&self) -> Option<&MeshSummary> {
        match &self.state {
            ChunkState::Leaf { mesh } => mesh.as_ref(),
            _ => None,
        }
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh().is_some()
    }

    /// Returns the chunk's children, if it is subdivided.
    pub fn children(&self) -> Option<&[ChunkID; 8]> {
        match &self.state {
            ChunkState::Subdivided { children } => Some(children),
            _ => None,
        }
    }

    /// Whether any of the given points lies strictly inside the chunk's bounds
    /// expanded by the given margin.
    pub fn is_near_any(&self, points: &[Point3<f32>], margin: f32) -> bool {
        if points.is_empty() {
            return false;
        }
        let expanded = self.bounds.expanded(margin);
        points
            .iter()
            .any(|point| expanded.strictly_contains_point(point))
    }
}

impl LODPolicy {
    /// Creates the policy for an octree whose top-level chunks are at the
    /// given level.
    pub fn new(config: &LODConfig, root_level: ChunkLevel) -> Self {
        Self {
            root_level,
            subdivision_distance: config.subdivision_distance,
            near_aggregation_distance: config.near_aggregation_distance,
            interest_margin: config.interest_margin,
        }
    }

    pub fn root_level(&self) -> ChunkLevel {
        self.root_level
    }

    /// Returns the aggregation factor a chunk at the given level and viewer
    /// distance should be meshed with. Only top-level chunks aggregate.
    pub fn desired_factor(&self, level: ChunkLevel, distance: f32) -> AggregationFactor {
        if level < self.root_level {
            return AggregationFactor::One;
        }
        let factor = if distance < self.near_aggregation_distance {
            AggregationFactor::Two
        } else {
            AggregationFactor::Four
        };
        factor.clamped_to_level(level)
    }

    /// Decides what to do with the given chunk. The distance is that of the
    /// top-level chunk containing it, and only matters at the root level.
    pub fn decide(&self, chunk: &Chunk, distance: f32, interest_points: &[Point3<f32>]) -> LODDecision {
        let has_interest = chunk.is_near_any(interest_points, self.interest_margin);
        let is_root = chunk.level >= self.root_level;

        if !chunk.level.is_finest()
            && (has_interest || (is_root && distance < self.subdivision_distance))
        {
            return LODDecision::Subdivide;
        }

        let desired = self.desired_factor(chunk.level, distance);
        if has_interest || !chunk.has_mesh() || chunk.aggregation_factor != desired {
            LODDecision::Rebuild(desired)
        } else {
            LODDecision::Keep
        }
    }
}

impl ChunkOctree {
    /// Creates an octree of unbuilt top-level chunks at the given level tiling
    /// a volume with the given edge length.
    ///
    /// # Errors
    /// Returns an error if top-level chunks at the given level are larger
    /// than the volume.
    pub fn new(volume_edge: usize, root_level: ChunkLevel) -> Result<Self> {
        let root_edge = root_level.edge_voxels();
        if root_edge > volume_edge {
            bail!(
                "Top-level chunks at level {} span {} voxels, which exceeds the volume edge length {}",
                root_level,
                root_edge,
                volume_edge
            );
        }

        let mut octree = Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            roots: Vec::new(),
            root_level,
            volume_edge,
        };

        let n_roots_per_axis = volume_edge / root_edge;
        for i in 0..n_roots_per_axis {
            for j in 0..n_roots_per_axis {
                for k in 0..n_roots_per_axis {
                    let offset = [i * root_edge, j * root_edge, k * root_edge];
                    let root = octree.insert_chunk(Chunk::new(root_level, offset));
                    octree.roots.push(root);
                }
            }
        }

        debug!(
            "Created chunk octree with {} top-level chunks at level {}",
            octree.roots.len(),
            root_level
        );

        Ok(octree)
    }

    pub fn root_level(&self) -> ChunkLevel {
        self.root_level
    }

    pub fn volume_edge(&self) -> usize {
        self.volume_edge
    }

    /// Returns the identifiers of the top-level chunks.
    pub fn roots(&self) -> &[ChunkID] {
        &self.roots
    }

    /// Returns the number of live chunks.
    pub fn n_chunks(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    /// Returns the chunk with the given identifier.
    ///
    /// # Panics
    /// If no live chunk has the identifier.
    pub fn chunk(&self, id: ChunkID) -> &Chunk {
        self.slots[id.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("Chunk {id} does not exist"))
    }

    /// Returns the chunk with the given identifier, or [`None`] if it does
    /// not exist.
    pub fn get_chunk(&self, id: ChunkID) -> Option<&Chunk> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Returns the identifiers of the chunk and all its descendants, parents
    /// before children.
    pub fn subtree(&self, id: ChunkID) -> Vec<ChunkID> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            ids.push(id);
            if let Some(children) = self.chunk(id).children() {
                stack.extend(children.iter().rev());
            }
        }
        ids
    }

    /// Returns the identifiers of all chunks currently holding a mesh.
    pub fn meshed_chunks(&self) -> Vec<ChunkID> {
        self.roots
            .iter()
            .flat_map(|&root| self.subtree(root))
            .filter(|&id| self.chunk(id).has_mesh())
            .collect()
    }

    /// Returns the deepest chunk whose extent contains the given point, or
    /// [`None`] if the point is outside the volume.
    pub fn deepest_chunk_containing(&self, point: &Point3<f32>) -> Option<ChunkID> {
        let contains = |id: ChunkID| {
            let chunk = self.chunk(id);
            let edge = chunk.level.edge_voxels() as f32;
            let lower = chunk.offset.map(|x| x as f32);
            AxisAlignedBox::new(lower.into(), lower.map(|x| x + edge).into()).contains_point(point)
        };

        let mut current = self.roots.iter().copied().find(|&root| contains(root))?;
        while let Some(child) = self
            .chunk(current)
            .children()
            .and_then(|children| children.iter().copied().find(|&child| contains(child)))
        {
            current = child;
        }
        Some(current)
    }

    /// Evaluates the [`LODPolicy`] for the given chunk and applies the
    /// decision, recursing into children when the chunk is subdivided.
    ///
    /// A chunk's previous mesh is only released once its replacement (a new
    /// mesh or a complete set of refreshed children) exists.
    ///
    /// # Errors
    /// Returns an error if a chunk mesh can not be built.
    pub fn refresh_chunk(
        &mut self,
        id: ChunkID,
        distance: f32,
        refresher: &mut ChunkRefresher<'_>,
    ) -> Result<()> {
        refresher.stats.chunks_visited += 1;

        let chunk = self.chunk(id);
        match refresher
            .policy
            .decide(chunk, distance, refresher.interest_points)
        {
            LODDecision::Subdivide => self.subdivide(id, distance, refresher),
            LODDecision::Rebuild(factor) => self.rebuild(id, factor, refresher),
            LODDecision::Keep => Ok(()),
        }
    }

    /// Clears the voxel of every finest-level chunk in the subtree of the
    /// given chunk that has a mesh and lies near one of the given points, and
    /// hands the mesh over to the consumer as detached. Returns the number of
    /// chunks mined.
    pub fn mine_finest_chunks(
        &mut self,
        id: ChunkID,
        points: &[Point3<f32>],
        margin: f32,
        volume: &mut VoxelVolume,
        consumer: &mut dyn ChunkMeshConsumer,
    ) -> usize {
        let mut n_mined = 0;
        for id in self.subtree(id) {
            let chunk = self.chunk_mut(id);
            if !(chunk.level.is_finest() && chunk.has_mesh() && chunk.is_near_any(points, margin)) {
                continue;
            }
            let [i, j, k] = chunk.offset;
            volume.clear_voxel(i, j, k);
            chunk.state = ChunkState::Leaf { mesh: None };
            consumer.mesh_detached(id, chunk.placement());
            n_mined += 1;
        }
        if n_mined > 0 {
            debug!("Mined {n_mined} voxels below chunk {id}");
        }
        n_mined
    }

    fn subdivide(
        &mut self,
        id: ChunkID,
        distance: f32,
        refresher: &mut ChunkRefresher<'_>,
    ) -> Result<()> {
        let existing_children = self.chunk(id).children().copied();
        let (children, created) = match existing_children {
            Some(children) => (children, false),
            None => (self.create_children(id), true),
        };

        for &child in &children {
            if let Err(error) = self.refresh_chunk(child, distance, refresher) {
                if created {
                    for &child in &children {
                        self.destroy_subtree(child, refresher);
                    }
                }
                return Err(error);
            }
        }

        let chunk = self.chunk_mut(id);
        let previous = mem::replace(&mut chunk.state, ChunkState::Subdivided { children });
        if created {
            refresher.stats.chunks_subdivided += 1;
            debug!(
                "Subdivided level {} chunk {} at {:?}",
                chunk.level, id, chunk.offset
            );
        }
        if let ChunkState::Leaf { mesh: Some(_) } = previous {
            refresher.consumer.mesh_released(id);
            refresher.stats.meshes_released += 1;
        }
        Ok(())
    }

    fn rebuild(
        &mut self,
        id: ChunkID,
        factor: AggregationFactor,
        refresher: &mut ChunkRefresher<'_>,
    ) -> Result<()> {
        let chunk = self.chunk(id);
        let mesh = refresher.engine.build_chunk_mesh(
            refresher.volume,
            chunk.offset,
            chunk.level,
            factor,
        )?;

        let chunk = self.chunk_mut(id);
        chunk.aggregation_factor = factor;
        let placement = chunk.placement();

        let summary = mesh.as_ref().map(|mesh| MeshSummary {
            vertex_count: mesh.vertex_count(),
            aggregation_factor: factor,
        });
        let previous = mem::replace(&mut chunk.state, ChunkState::Leaf { mesh: summary });

        match previous {
            ChunkState::Leaf { mesh: Some(_) } => {
                refresher.consumer.mesh_released(id);
                refresher.stats.meshes_released += 1;
            }
            ChunkState::Subdivided { children } => {
                debug!(
                    "Collapsed level {} chunk {} at {:?}",
                    placement.level, id, placement.offset
                );
                for child in children {
                    self.destroy_subtree(child, refresher);
                }
            }
            ChunkState::Leaf { mesh: None } | ChunkState::Unbuilt => {}
        }

        match mesh {
            Some(mesh) => {
                refresher.stats.meshes_built += 1;
                refresher.stats.vertices_built += mesh.vertex_count();
                refresher.consumer.mesh_built(id, placement, mesh);
            }
            None => {
                refresher.stats.empty_builds += 1;
            }
        }
        Ok(())
    }

    fn create_children(&mut self, id: ChunkID) -> [ChunkID; 8] {
        let parent = self.chunk(id);
        let Some(child_level) = parent.level.child() else {
            panic!("Can not subdivide finest-level chunk {id}");
        };
        let parent_offset = parent.offset;
        let child_edge = child_level.edge_voxels();

        let mut children = [ChunkID(0); 8];
        let mut child_idx = 0;
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    let offset = [
                        parent_offset[0] + i * child_edge,
                        parent_offset[1] + j * child_edge,
                        parent_offset[2] + k * child_edge,
                    ];
                    children[child_idx] = self.insert_chunk(Chunk::new(child_level, offset));
                    child_idx += 1;
                }
            }
        }
        children
    }

    fn destroy_subtree(&mut self, id: ChunkID, refresher: &mut ChunkRefresher<'_>) {
        for id in self.subtree(id) {
            if self.chunk(id).has_mesh() {
                refresher.consumer.mesh_released(id);
                refresher.stats.meshes_released += 1;
            }
            self.slots[id.0 as usize] = None;
            self.free_slots.push(id);
            refresher.stats.chunks_destroyed += 1;
        }
    }

    fn insert_chunk(&mut self, chunk: Chunk) -> ChunkID {
        if let Some(id) = self.free_slots.pop() {
            self.slots[id.0 as usize] = Some(chunk);
            id
        } else {
            // A 256³ volume fully subdivided has fewer than 2^25 chunks
            let id = ChunkID(self.slots.len() as u32);
            self.slots.push(Some(chunk));
            id
        }
    }

    fn chunk_mut(&mut self, id: ChunkID) -> &mut Chunk {
        self.slots[id.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("Chunk {id} does not exist"))
    }
}
