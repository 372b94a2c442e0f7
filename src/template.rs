//! Cube templates: precomputed vertex data for a single unit cube, with the
//! vertices split into groups according to which face of the cube they belong
//! to.
//!
//! Templates are stored in the `.caw` binary format:
//!
//! | Bytes    | Content                                                    |
//! |----------|------------------------------------------------------------|
//! | `0..3`   | Magic bytes `"caw"`                                        |
//! | `3`      | Unused padding                                             |
//! | `4..32`  | Seven little-endian `u32` vertex counts, one per group     |
//! | `32..`   | Fixed-size little-endian [`CubeVertex`] records by group   |
//!
//! The groups always appear in the order `+X, +Y, +Z, -X, -Y, -Z, REMAIN`.

use crate::{
    io,
    utils::{Dimension, Side},
};
use anyhow::{Result, bail};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use cubemesh_log::warn;
use half::f16;
use std::path::Path;

/// The magic bytes every `.caw` file starts with.
pub const CAW_MAGIC: [u8; 3] = *b"caw";

/// Size of the `.caw` header in bytes (magic, padding and group counts).
pub const CAW_HEADER_SIZE: usize = 4 + N_FACE_GROUPS * 4;

/// The number of vertex groups in a cube template.
pub const N_FACE_GROUPS: usize = 7;

/// A group of vertices in a [`CubeTemplate`]. The six directional groups hold
/// the triangles lying on the corresponding face of the cube, which can be
/// omitted when an adjacent cube covers that face. The remaining group holds
/// interior triangles that never face an axis-aligned neighbor.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FaceGroup {
    PlusX = 0,
    PlusY = 1,
    PlusZ = 2,
    MinusX = 3,
    MinusY = 4,
    MinusZ = 5,
    Remain = 6,
}

bitflags! {
    /// A set of [`FaceGroup`]s, typically the groups that are visible for a
    /// specific cube.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FaceGroups: u8 {
        const PLUS_X  = 1 << 0;
        const PLUS_Y  = 1 << 1;
        const PLUS_Z  = 1 << 2;
        const MINUS_X = 1 << 3;
        const MINUS_Y = 1 << 4;
        const MINUS_Z = 1 << 5;
        const REMAIN  = 1 << 6;
    }
}

/// A vertex in a [`CubeTemplate`] or in a chunk mesh built from one.
///
/// The layout matches the fixed-size vertex records of the `.caw` format, so
/// a slice of vertices can be handed directly to a renderer as bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Zeroable, Pod)]
pub struct CubeVertex {
    /// Position, with the fourth component unused.
    pub position: [f16; 4],
    /// Normal vector, with the fourth component unused.
    pub normal: [f16; 4],
}

/// Vertex data for a single cube, grouped by [`FaceGroup`].
#[derive(Clone, Debug, PartialEq)]
pub struct CubeTemplate {
    header_padding: u8,
    group_counts: [u32; N_FACE_GROUPS],
    group_offsets: [usize; N_FACE_GROUPS + 1],
    vertices: Vec<CubeVertex>,
}

const CUBE_VERTEX_SIZE: usize = std::mem::size_of::<CubeVertex>();

impl FaceGroup {
    /// All groups in template order.
    pub const ALL: [Self; N_FACE_GROUPS] = [
        Self::PlusX,
        Self::PlusY,
        Self::PlusZ,
        Self::MinusX,
        Self::MinusY,
        Self::MinusZ,
        Self::Remain,
    ];

    /// The six groups associated with a face of the cube, in template order.
    pub const DIRECTIONAL: [Self; 6] = [
        Self::PlusX,
        Self::PlusY,
        Self::PlusZ,
        Self::MinusX,
        Self::MinusY,
        Self::MinusZ,
    ];

    /// Returns the index of the group in template order.
    pub const fn idx(self) -> usize {
        self as usize
    }

    /// Returns the dimension and side of the cube face the group lies on, or
    /// [`None`] for [`FaceGroup::Remain`].
    pub const fn face(self) -> Option<(Dimension, Side)> {
        match self {
            Self::PlusX => Some((Dimension::X, Side::Upper)),
            Self::PlusY => Some((Dimension::Y, Side::Upper)),
            Self::PlusZ => Some((Dimension::Z, Side::Upper)),
            Self::MinusX => Some((Dimension::X, Side::Lower)),
            Self::MinusY => Some((Dimension::Y, Side::Lower)),
            Self::MinusZ => Some((Dimension::Z, Side::Lower)),
            Self::Remain => None,
        }
    }

    /// Returns the corresponding single-group [`FaceGroups`] set.
    pub const fn as_set(self) -> FaceGroups {
        FaceGroups::from_bits_truncate(1 << self as u8)
    }
}

impl CubeVertex {
    /// Creates a new vertex with the given position and normal vector.
    pub fn new(position: [f32; 3], normal: [f32; 3]) -> Self {
        Self {
            position: to_f16x4(position),
            normal: to_f16x4(normal),
        }
    }

    /// Returns the position as `f32` components.
    pub fn position_f32(&self) -> [f32; 3] {
        [
            self.position[0].to_f32(),
            self.position[1].to_f32(),
            self.position[2].to_f32(),
        ]
    }

    /// Returns a copy of the vertex with the position scaled uniformly by
    /// `scale` and then translated by `translation`.
    #[inline]
    pub fn scaled_and_translated(&self, scale: f32, translation: [f32; 3]) -> Self {
        let mut vertex = *self;
        for dim in 0..3 {
            let position = self.position[dim].to_f32() * scale + translation[dim];
            vertex.position[dim] = f16::from_f32(position);
        }
        vertex
    }

    fn from_le_bytes(bytes: &[u8]) -> Self {
        debug_assert_eq!(bytes.len(), CUBE_VERTEX_SIZE);
        let mut components = bytes
            .chunks_exact(2)
            .map(|pair| f16::from_bits(u16::from_le_bytes([pair[0], pair[1]])));
        let mut next = || components.next().unwrap_or(f16::ZERO);
        Self {
            position: [next(), next(), next(), next()],
            normal: [next(), next(), next(), next()],
        }
    }

    fn write_le_bytes(&self, bytes: &mut Vec<u8>) {
        for component in self.position.iter().chain(&self.normal) {
            bytes.extend_from_slice(&component.to_bits().to_le_bytes());
        }
    }
}

impl CubeTemplate {
    /// Creates a new template from the given vertex count for each group and
    /// the vertices of all groups laid out contiguously in group order.
    ///
    /// # Errors
    /// Returns an error if the number of vertices does not equal the sum of
    /// the group counts.
    pub fn new(group_counts: [u32; N_FACE_GROUPS], vertices: Vec<CubeVertex>) -> Result<Self> {
        Self::with_header_padding(0, group_counts, vertices)
    }

    /// Creates a template without any vertices. This is what parsing yields
    /// for data without the `.caw` magic bytes.
    pub fn empty() -> Self {
        Self {
            header_padding: 0,
            group_counts: [0; N_FACE_GROUPS],
            group_offsets: [0; N_FACE_GROUPS + 1],
            vertices: Vec::new(),
        }
    }

    /// Creates a template for an axis-aligned cube spanning `[-0.5, 0.5]`
    /// along each axis, with two triangles for each face and no remaining
    /// vertices. Triangles are wound counter-clockwise when viewed from
    /// outside the cube.
    pub fn unit_cube() -> Self {
        let mut group_counts = [0; N_FACE_GROUPS];
        let mut vertices = Vec::with_capacity(36);

        for group in FaceGroup::DIRECTIONAL {
            let Some((dim, side)) = group.face() else {
                continue;
            };
            let sign = match side {
                Side::Lower => -1.0,
                Side::Upper => 1.0,
            };
            let normal_dim = dim.idx();
            let u_dim = (normal_dim + 1) % 3;
            let v_dim = (normal_dim + 2) % 3;

            let mut quad_uv = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
            if side == Side::Lower {
                quad_uv.reverse();
            }

            let corner = |(u, v): (f32, f32)| {
                let mut position = [0.0; 3];
                position[normal_dim] = 0.5 * sign;
                position[u_dim] = u;
                position[v_dim] = v;
                let mut normal = [0.0; 3];
                normal[normal_dim] = sign;
                CubeVertex::new(position, normal)
            };

            for quad_idx in [0, 1, 2, 0, 2, 3] {
                vertices.push(corner(quad_uv[quad_idx]));
            }
            group_counts[group.idx()] = 6;
        }

        Self::new(group_counts, vertices).unwrap_or_else(|_| Self::empty())
    }

    /// Parses a template from the given `.caw` data.
    ///
    /// Data that does not start with the `.caw` magic bytes yields an empty
    /// template rather than an error, and callers should check
    /// [`Self::is_empty`] before using the template for meshing.
    ///
    /// # Errors
    /// Returns an error if the data is too short to hold the header, if the
    /// vertex data is not a whole number of vertex records, or if the number
    /// of vertex records does not match the sum of the group counts.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < CAW_HEADER_SIZE {
            bail!(
                "Cube template data has {} bytes, which is too short for the {}-byte header",
                bytes.len(),
                CAW_HEADER_SIZE
            );
        }

        if bytes[..CAW_MAGIC.len()] != CAW_MAGIC {
            warn!(
                "Cube template data starts with {:?} instead of the magic bytes {:?}, using empty template",
                &bytes[..CAW_MAGIC.len()],
                CAW_MAGIC
            );
            return Ok(Self::empty());
        }

        let header_padding = bytes[CAW_MAGIC.len()];

        let mut group_counts = [0; N_FACE_GROUPS];
        for (count, count_bytes) in group_counts
            .iter_mut()
            .zip(bytes[4..CAW_HEADER_SIZE].chunks_exact(4))
        {
            *count = u32::from_le_bytes(count_bytes.try_into()?);
        }

        let vertex_bytes = &bytes[CAW_HEADER_SIZE..];
        if vertex_bytes.len() % CUBE_VERTEX_SIZE != 0 {
            bail!(
                "Cube template vertex data has {} bytes, which is not a multiple of the {}-byte vertex record size",
                vertex_bytes.len(),
                CUBE_VERTEX_SIZE
            );
        }

        let vertices = vertex_bytes
            .chunks_exact(CUBE_VERTEX_SIZE)
            .map(CubeVertex::from_le_bytes)
            .collect();

        Self::with_header_padding(header_padding, group_counts, vertices)
    }

    /// Reads and parses the `.caw` file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or if parsing fails (see
    /// [`Self::from_bytes`]).
    pub fn read_from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let bytes = io::read_binary_file(file_path)?;
        Self::from_bytes(&bytes)
    }

    /// Serializes the template into the `.caw` format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CAW_HEADER_SIZE + self.vertices.len() * CUBE_VERTEX_SIZE);
        bytes.extend_from_slice(&CAW_MAGIC);
        bytes.push(self.header_padding);
        for count in self.group_counts {
            bytes.extend_from_slice(&count.to_le_bytes());
        }
        for vertex in &self.vertices {
            vertex.write_le_bytes(&mut bytes);
        }
        bytes
    }

    /// Writes the template in `.caw` format to the given path, creating any
    /// missing parent directories.
    ///
    /// # Errors
    /// Returns an error if the file can not be written.
    pub fn write_to_file(&self, file_path: impl AsRef<Path>) -> Result<()> {
        io::save_data_as_binary(file_path, &self.to_bytes())
    }

    /// Whether the template has no vertices at all.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Returns the vertex count of each group, in template order.
    pub fn group_counts(&self) -> &[u32; N_FACE_GROUPS] {
        &self.group_counts
    }

    /// Returns the number of vertices in the given group.
    pub fn group_count(&self, group: FaceGroup) -> u32 {
        self.group_counts[group.idx()]
    }

    /// Returns the vertices of the given group.
    pub fn group_vertices(&self, group: FaceGroup) -> &[CubeVertex] {
        let idx = group.idx();
        &self.vertices[self.group_offsets[idx]..self.group_offsets[idx + 1]]
    }

    /// Returns all vertices of the template, grouped in template order.
    pub fn vertices(&self) -> &[CubeVertex] {
        &self.vertices
    }

    /// Returns the total number of vertices of a single cube instance.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Returns the number of vertices emitted for a cube whose visible groups
    /// are the given ones.
    #[inline]
    pub fn vertex_count_for_groups(&self, groups: FaceGroups) -> u32 {
        FaceGroup::ALL
            .iter()
            .filter(|group| groups.contains(group.as_set()))
            .map(|group| self.group_counts[group.idx()])
            .sum()
    }

    fn with_header_padding(
        header_padding: u8,
        group_counts: [u32; N_FACE_GROUPS],
        vertices: Vec<CubeVertex>,
    ) -> Result<Self> {
        let mut group_offsets = [0; N_FACE_GROUPS + 1];
        for (idx, &count) in group_counts.iter().enumerate() {
            group_offsets[idx + 1] = group_offsets[idx] + usize::try_from(count)?;
        }

        let declared_count = group_offsets[N_FACE_GROUPS];
        if declared_count != vertices.len() {
            bail!(
                "Cube template group counts {:?} sum to {} vertices, but {} vertices were provided",
                group_counts,
                declared_count,
                vertices.len()
            );
        }

        Ok(Self {
            header_padding,
            group_counts,
            group_offsets,
            vertices,
        })
    }
}

fn to_f16x4(values: [f32; 3]) -> [f16; 4] {
    [
        f16::from_f32(values[0]),
        f16::from_f32(values[1]),
        f16::from_f32(values[2]),
        f16::ZERO,
    ]
}
