//! Writing the vertices of each cube into the chunk's vertex buffer.

use super::ChunkBuildContext;
use crate::template::{CubeVertex, FaceGroup};
use rayon::prelude::*;
use std::{mem, ops::Range};

/// Number of consecutive cubes whose vertices are written by a single
/// parallel task.
const CUBES_PER_BLOCK: usize = 4096;

/// A run of consecutive cubes together with the part of the vertex buffer
/// their vertices go into.
#[derive(Debug)]
struct CubeBlock<'a> {
    cubes: Range<usize>,
    vertices: &'a mut [CubeVertex],
}

/// Writes the transformed template vertices of every cube into `vertices`,
/// starting at the cube's offset in `offsets`. The offsets must be the
/// exclusive prefix sum of the counts produced by
/// [`count_cube_vertices`](super::count::count_cube_vertices) for the same
/// context, and `vertices` must have room for exactly the total.
///
/// Each cube owns the disjoint range between its offset and the next, so the
/// buffer is split into independent mutable blocks up front and the blocks
/// are filled in parallel on the current thread pool.
///
/// # Panics
/// If the offsets do not match the vertices the cubes actually emit.
pub(super) fn write_cube_vertices(
    context: &ChunkBuildContext<'_>,
    cube_coords: &[[u8; 3]],
    offsets: &[u32],
    vertices: &mut [CubeVertex],
) {
    assert_eq!(cube_coords.len(), offsets.len());

    let n_cubes = cube_coords.len();
    let total = vertices.len();
    let offset_at = |cube_idx: usize| {
        offsets
            .get(cube_idx)
            .map_or(total, |&offset| offset as usize)
    };

    let mut blocks = Vec::with_capacity(n_cubes.div_ceil(CUBES_PER_BLOCK));
    let mut remaining = vertices;

    for block_start in (0..n_cubes).step_by(CUBES_PER_BLOCK) {
        let block_end = (block_start + CUBES_PER_BLOCK).min(n_cubes);
        let block_len = offset_at(block_end) - offset_at(block_start);

        let (block_vertices, rest) = mem::take(&mut remaining).split_at_mut(block_len);
        blocks.push(CubeBlock {
            cubes: block_start..block_end,
            vertices: block_vertices,
        });
        remaining = rest;
    }
    assert!(
        remaining.is_empty(),
        "Vertex buffer has {} slots beyond the last cube",
        remaining.len()
    );

    blocks.into_par_iter().for_each(|block| {
        let block_offset = offset_at(block.cubes.start);
        for cube_idx in block.cubes {
            let start = offset_at(cube_idx) - block_offset;
            let end = offset_at(cube_idx + 1) - block_offset;
            let written = write_single_cube(
                context,
                cube_coords[cube_idx],
                &mut block.vertices[start..end],
            );
            assert_eq!(
                written,
                end - start,
                "Cube {cube_idx} wrote a different number of vertices than was counted"
            );
        }
    });
}

/// Writes the vertices of the visible groups of the cube with the given
/// local coordinates to the start of `destination` and returns how many
/// were written.
fn write_single_cube(
    context: &ChunkBuildContext<'_>,
    coords: [u8; 3],
    destination: &mut [CubeVertex],
) -> usize {
    let Some(groups) = context.visible_groups(coords) else {
        return 0;
    };

    let scale = context.factor.value() as f32;
    let centering_offset = context.factor.centering_offset();
    let translation = coords.map(|coord| f32::from(coord) * scale + centering_offset);

    let mut cursor = 0;
    for group in FaceGroup::ALL {
        if !groups.contains(group.as_set()) {
            continue;
        }
        let source = context.template.group_vertices(group);
        for (target, vertex) in destination[cursor..cursor + source.len()]
            .iter_mut()
            .zip(source)
        {
            *target = vertex.scaled_and_translated(scale, translation);
        }
        cursor += source.len();
    }
    cursor
}
