//! Building triangle meshes for chunks of a voxel volume from a cube
//! template.
//!
//! A chunk is meshed in three passes over its cube index space. The first
//! counts the vertices each cube emits in parallel, the second turns the
//! counts into write offsets with a sequential prefix sum, and the third
//! writes every cube's vertices in parallel into a buffer allocated to the
//! exact total. All cubes make their visibility decisions through the same
//! [`ChunkBuildContext`], so the two parallel passes always agree.

mod count;
mod offsets;
mod scratch;
mod write;

pub use offsets::exclusive_prefix_sum;
pub use scratch::CubeScratch;

use crate::{
    geometry::AxisAlignedBox,
    lod::{AggregationFactor, ChunkLevel},
    template::{CubeTemplate, CubeVertex, FaceGroups},
    visibility::{self, CubeLocation},
    volume::VoxelVolume,
};
use anyhow::{Result, bail};
use bytemuck::Zeroable;
use cubemesh_log::with_trace_logging;
use cubemesh_thread::rayon::RayonThreadPool;
use rayon::prelude::*;
use scratch::ScratchRegistry;

/// Builds chunk meshes from a fixed cube template, running the data-parallel
/// passes on its own thread pool.
#[derive(Debug)]
pub struct MeshingEngine {
    template: CubeTemplate,
    thread_pool: RayonThreadPool,
    scratch: ScratchRegistry,
}

/// The geometry built for a single chunk. Vertex positions are relative to
/// the chunk's lower corner in units of raw voxels.
#[derive(Clone, Debug)]
pub struct ChunkMesh {
    level: ChunkLevel,
    aggregation_factor: AggregationFactor,
    vertices: Vec<CubeVertex>,
    indices: Vec<u32>,
    aabb: AxisAlignedBox,
}

/// Everything needed to decide what a cube in a specific chunk build emits.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChunkBuildContext<'a> {
    template: &'a CubeTemplate,
    volume: &'a VoxelVolume,
    chunk_offset: [usize; 3],
    factor: AggregationFactor,
    chunk_edge_index_max: usize,
}

impl MeshingEngine {
    /// Creates an engine meshing with the given template.
    ///
    /// # Errors
    /// Returns an error if the template has no vertices, since no geometry
    /// could ever be produced with it.
    pub fn new(template: CubeTemplate, thread_pool: RayonThreadPool) -> Result<Self> {
        if template.is_empty() {
            bail!("Can not mesh with an empty cube template");
        }
        Ok(Self {
            template,
            thread_pool,
            scratch: ScratchRegistry::new(),
        })
    }

    /// Returns the cube template used for meshing.
    pub fn template(&self) -> &CubeTemplate {
        &self.template
    }

    /// Returns the thread pool used for the parallel passes.
    pub fn thread_pool(&self) -> &RayonThreadPool {
        &self.thread_pool
    }

    /// Allocates the scratch arrays for every build whose cube index space is
    /// at most as large as that of the given chunk level, so that they do not
    /// have to be allocated during the first builds.
    pub fn preallocate_scratch(&self, max_level: ChunkLevel) {
        self.scratch.preallocate_up_to(max_level);
    }

    /// Meshes the chunk at the given level whose lower corner is at the given
    /// voxel offset, with each meshed cube covering `factor` voxels along each
    /// axis.
    ///
    /// Returns [`None`] if the chunk has no visible geometry.
    ///
    /// # Errors
    /// Returns an error if the mesh would have more vertices than can be
    /// indexed with `u32`.
    ///
    /// # Panics
    /// If the chunk is not aligned to its own size or extends outside the
    /// volume, or if the factor is larger than the chunk.
    pub fn build_chunk_mesh(
        &self,
        volume: &VoxelVolume,
        chunk_offset: [usize; 3],
        level: ChunkLevel,
        factor: AggregationFactor,
    ) -> Result<Option<ChunkMesh>> {
        let chunk_edge = level.edge_voxels();
        assert!(
            chunk_offset
                .iter()
                .all(|&offset| offset % chunk_edge == 0 && offset + chunk_edge <= volume.edge()),
            "Level {level} chunk at {chunk_offset:?} does not fit volume of edge length {}",
            volume.edge()
        );

        let index_level = level.index_space_level(factor);
        let context = ChunkBuildContext::new(&self.template, volume, chunk_offset, level, factor);

        let mut scratch = self.scratch.lock(index_level);
        let (cube_coords, count_offsets) = scratch.coords_and_count_offsets_mut();

        with_trace_logging!(
            "Counting vertices for level {} chunk at {:?} with factor {}",
            level,
            chunk_offset,
            factor;
            self.thread_pool.install(|| {
                count::count_cube_vertices(&context, cube_coords, count_offsets);
            })
        );

        let total = with_trace_logging!(
            "Computing vertex offsets for level {} chunk at {:?}", level, chunk_offset;
            exclusive_prefix_sum(count_offsets)
        )?;

        if total == 0 {
            return Ok(None);
        }

        let mut vertices = vec![CubeVertex::zeroed(); total as usize];

        with_trace_logging!(
            "Writing {} vertices for level {} chunk at {:?}", total, level, chunk_offset;
            self.thread_pool.install(|| {
                write::write_cube_vertices(&context, cube_coords, count_offsets, &mut vertices);
            })
        );

        drop(scratch);

        let indices: Vec<u32> = self
            .thread_pool
            .install(|| (0..total).into_par_iter().collect());

        Ok(Some(ChunkMesh {
            level,
            aggregation_factor: factor,
            vertices,
            indices,
            aabb: AxisAlignedBox::cube(-0.5, chunk_edge as f32 + 0.5),
        }))
    }
}

impl ChunkMesh {
    /// Returns the level of the chunk the mesh was built for.
    pub fn level(&self) -> ChunkLevel {
        self.level
    }

    /// Returns the aggregation factor the mesh was built with.
    pub fn aggregation_factor(&self) -> AggregationFactor {
        self.aggregation_factor
    }

    /// Returns the number of vertices in the mesh (always non-zero).
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[CubeVertex] {
        &self.vertices
    }

    /// Returns the vertex buffer as raw bytes, suitable for uploading.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Returns the index buffer, which simply enumerates the vertices since
    /// no vertex is shared between triangles.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Returns the index buffer as raw bytes, suitable for uploading.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Returns the bounding box of the mesh in chunk-local coordinates.
    pub fn aabb(&self) -> &AxisAlignedBox {
        &self.aabb
    }

    /// Consumes the mesh and returns its vertex and index buffers.
    pub fn into_buffers(self) -> (Vec<CubeVertex>, Vec<u32>) {
        (self.vertices, self.indices)
    }
}

impl<'a> ChunkBuildContext<'a> {
    pub(crate) fn new(
        template: &'a CubeTemplate,
        volume: &'a VoxelVolume,
        chunk_offset: [usize; 3],
        level: ChunkLevel,
        factor: AggregationFactor,
    ) -> Self {
        Self {
            template,
            volume,
            chunk_offset,
            factor,
            chunk_edge_index_max: level.index_space_level(factor).edge_voxels() - 1,
        }
    }

    /// Returns the location of the cube with the given local coordinates.
    #[inline]
    pub(crate) fn cube_location(&self, coords: [u8; 3]) -> CubeLocation {
        let factor = self.factor.value();
        let local = coords.map(usize::from);
        CubeLocation {
            local,
            voxel: [0, 1, 2].map(|dim| self.chunk_offset[dim] + local[dim] * factor),
            factor,
            chunk_edge_index_max: self.chunk_edge_index_max,
        }
    }

    /// Returns the groups emitted by the cube with the given local
    /// coordinates, or [`None`] if the cube is empty.
    #[inline]
    pub(crate) fn visible_groups(&self, coords: [u8; 3]) -> Option<FaceGroups> {
        visibility::visible_groups(&self.cube_location(coords), self.volume)
    }

    /// Returns the number of vertices emitted by the cube with the given local
    /// coordinates.
    #[inline]
    pub(crate) fn cube_vertex_count(&self, coords: [u8; 3]) -> u32 {
        self.visible_groups(coords)
            .map_or(0, |groups| self.template.vertex_count_for_groups(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{FaceGroup, N_FACE_GROUPS};
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;
    use std::num::NonZeroUsize;

    fn engine(template: CubeTemplate) -> MeshingEngine {
        let thread_pool = RayonThreadPool::new(NonZeroUsize::new(2).unwrap()).unwrap();
        MeshingEngine::new(template, thread_pool).unwrap()
    }

    fn four_vertices_per_face_template() -> CubeTemplate {
        let mut group_counts = [4; N_FACE_GROUPS];
        group_counts[FaceGroup::Remain.idx()] = 0;
        let vertices = (0..24)
            .map(|idx| CubeVertex::new([0.0, 0.0, idx as f32 * 0.01], [1.0, 0.0, 0.0]))
            .collect();
        CubeTemplate::new(group_counts, vertices).unwrap()
    }

    fn level(number: u8) -> ChunkLevel {
        ChunkLevel::new(number).unwrap()
    }

    #[test]
    fn should_reject_empty_template() {
        let thread_pool = RayonThreadPool::new(NonZeroUsize::MIN).unwrap();
        assert!(MeshingEngine::new(CubeTemplate::empty(), thread_pool).is_err());
    }

    #[test]
    fn should_emit_boundary_faces_of_solid_two_voxel_volume() {
        let engine = engine(four_vertices_per_face_template());
        let volume = VoxelVolume::filled(2, 1).unwrap();

        let mesh = engine
            .build_chunk_mesh(&volume, [0; 3], level(1), AggregationFactor::One)
            .unwrap()
            .unwrap();

        assert_eq!(mesh.vertex_count(), 96);
        assert_eq!(mesh.vertex_bytes().len(), 96 * 16);
        assert!(mesh.indices().iter().copied().eq(0..96));
    }

    #[test]
    fn should_produce_no_mesh_for_empty_volume() {
        let engine = engine(CubeTemplate::unit_cube());
        let volume = VoxelVolume::filled(16, 0).unwrap();

        for (chunk_level, factor) in [
            (0, AggregationFactor::One),
            (2, AggregationFactor::One),
            (4, AggregationFactor::Two),
            (4, AggregationFactor::Four),
        ] {
            let mesh = engine
                .build_chunk_mesh(&volume, [0; 3], level(chunk_level), factor)
                .unwrap();
            assert!(mesh.is_none());
        }
    }

    #[test]
    fn should_bound_mesh_by_chunk_extent_with_half_voxel_margin() {
        let engine = engine(CubeTemplate::unit_cube());
        let volume = VoxelVolume::filled(8, 1).unwrap();

        let mesh = engine
            .build_chunk_mesh(&volume, [0; 3], level(3), AggregationFactor::Four)
            .unwrap()
            .unwrap();

        assert_eq!(mesh.level(), level(3));
        assert_eq!(mesh.aggregation_factor(), AggregationFactor::Four);
        assert_abs_diff_eq!(mesh.aabb().lower_corner().x, -0.5);
        assert_abs_diff_eq!(mesh.aabb().upper_corner().z, 8.5);
        for vertex in mesh.vertices() {
            for coord in vertex.position_f32() {
                assert!((-0.5..=8.5).contains(&coord));
            }
        }
    }

    #[test]
    fn should_place_vertices_relative_to_chunk_offset() {
        let engine = engine(CubeTemplate::unit_cube());
        let mut volume = VoxelVolume::filled(8, 0).unwrap();
        volume.set_voxel(5, 1, 2, 1);

        assert!(
            engine
                .build_chunk_mesh(&volume, [0; 3], level(2), AggregationFactor::One)
                .unwrap()
                .is_none()
        );

        let mesh = engine
            .build_chunk_mesh(&volume, [4, 0, 0], level(2), AggregationFactor::One)
            .unwrap()
            .unwrap();
        assert_eq!(mesh.vertex_count(), 36);

        let (vertices, indices) = mesh.into_buffers();
        assert_eq!(indices.len(), 36);
        let n = vertices.len() as f32;
        let mean = vertices.iter().fold([0.0; 3], |mut sum, vertex| {
            let position = vertex.position_f32();
            for dim in 0..3 {
                sum[dim] += position[dim] / n;
            }
            sum
        });
        assert_abs_diff_eq!(mean[0], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(mean[1], 1.0, epsilon = 1e-4);
        assert_abs_diff_eq!(mean[2], 2.0, epsilon = 1e-4);
    }

    #[test]
    #[should_panic]
    fn should_panic_for_misaligned_chunk() {
        let engine = engine(CubeTemplate::unit_cube());
        let volume = VoxelVolume::filled(8, 1).unwrap();
        let _ = engine.build_chunk_mesh(&volume, [2, 0, 0], level(2), AggregationFactor::One);
    }

    #[test]
    fn should_reuse_scratch_between_consecutive_builds() {
        let engine = engine(CubeTemplate::unit_cube());
        engine.preallocate_scratch(level(3));

        let solid = VoxelVolume::filled(8, 1).unwrap();
        let mut single = VoxelVolume::filled(8, 0).unwrap();
        single.set_voxel(3, 3, 3, 1);

        let solid_count = engine
            .build_chunk_mesh(&solid, [0; 3], level(3), AggregationFactor::One)
            .unwrap()
            .map(|mesh| mesh.vertex_count());
        let single_count = engine
            .build_chunk_mesh(&single, [0; 3], level(3), AggregationFactor::One)
            .unwrap()
            .map(|mesh| mesh.vertex_count());

        // Each of the six faces of the solid volume is covered by 8 x 8
        // cube faces of 6 vertices
        assert_eq!(solid_count, Some(6 * 64 * 6));
        assert_eq!(single_count, Some(36));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn should_write_exactly_the_counted_vertices(
            voxels in prop::collection::vec(prop_oneof![2 => Just(0_u8), 1 => Just(1_u8)], 512),
            factor in prop_oneof![
                Just(AggregationFactor::One),
                Just(AggregationFactor::Two),
                Just(AggregationFactor::Four),
            ],
            chunk_level in 2_u8..=3,
        ) {
            let template = four_vertices_per_face_template();
            let volume = VoxelVolume::new(8, voxels).unwrap();
            let chunk_level = level(chunk_level);
            let engine = engine(template.clone());

            let chunk_edge = chunk_level.edge_voxels();
            for offset in (0..8).step_by(chunk_edge) {
                let chunk_offset = [offset, 0, offset];
                let context =
                    ChunkBuildContext::new(&template, &volume, chunk_offset, chunk_level, factor);
                let scratch = CubeScratch::for_level(chunk_level.index_space_level(factor));
                let expected: u32 = scratch
                    .cube_coords()
                    .iter()
                    .map(|&coords| context.cube_vertex_count(coords))
                    .sum();

                let mesh = engine
                    .build_chunk_mesh(&volume, chunk_offset, chunk_level, factor)
                    .unwrap();
                let actual = mesh.as_ref().map_or(0, |mesh| mesh.vertex_count());
                prop_assert_eq!(actual, expected as usize);
                if let Some(mesh) = mesh {
                    prop_assert_eq!(mesh.indices().len(), mesh.vertex_count());
                }
            }
        }
    }
}
