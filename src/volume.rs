//! Dense voxel volumes.

use crate::{io, utils};
use anyhow::{Result, bail};
use std::path::Path;

/// The largest supported number of voxels along each axis of a
/// [`VoxelVolume`]. Cube coordinates within a chunk are stored as bytes, which
/// bounds the edge length.
pub const MAX_VOLUME_EDGE: usize = 256;

/// A cubic dense grid of byte occupancy codes. A value of zero means the voxel
/// is empty, any other value means it is solid (the value may identify a
/// material, but is otherwise opaque to meshing).
///
/// The voxel at indices `(i, j, k)` is stored at linear index
/// `i * E * E + j * E + k`, where `E` is the edge length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelVolume {
    edge: usize,
    voxels: Vec<u8>,
}

impl VoxelVolume {
    /// Creates a volume with the given edge length from the given voxel
    /// occupancy codes.
    ///
    /// # Errors
    /// Returns an error if the edge length is not a power of two no larger
    /// than [`MAX_VOLUME_EDGE`], or if the number of voxels is not the cube of
    /// the edge length.
    pub fn new(edge: usize, voxels: Vec<u8>) -> Result<Self> {
        if !edge.is_power_of_two() || edge > MAX_VOLUME_EDGE {
            bail!(
                "Voxel volume edge length {} is not a power of two between 1 and {}",
                edge,
                MAX_VOLUME_EDGE
            );
        }
        let expected_len = edge * edge * edge;
        if voxels.len() != expected_len {
            bail!(
                "Voxel volume with edge length {} needs {} voxels, got {}",
                edge,
                expected_len,
                voxels.len()
            );
        }
        Ok(Self { edge, voxels })
    }

    /// Creates a volume where every voxel has the given value.
    ///
    /// # Errors
    /// See [`Self::new`].
    pub fn filled(edge: usize, value: u8) -> Result<Self> {
        Self::new(edge, vec![value; edge.pow(3)])
    }

    /// Creates a volume with the value of each voxel given by evaluating the
    /// given closure at the voxel's indices.
    ///
    /// # Errors
    /// See [`Self::new`].
    pub fn from_fn(edge: usize, mut voxel_at: impl FnMut(usize, usize, usize) -> u8) -> Result<Self> {
        let mut voxels = Vec::with_capacity(edge.pow(3));
        for i in 0..edge {
            for j in 0..edge {
                for k in 0..edge {
                    voxels.push(voxel_at(i, j, k));
                }
            }
        }
        Self::new(edge, voxels)
    }

    /// Creates a volume from the given raw voxel bytes, inferring the edge
    /// length from the number of bytes.
    ///
    /// # Errors
    /// Returns an error if the number of bytes is not the cube of a supported
    /// edge length.
    pub fn from_raw_bytes(voxels: Vec<u8>) -> Result<Self> {
        let Some(edge) = (0..=MAX_VOLUME_EDGE.trailing_zeros())
            .map(|exponent| 1_usize << exponent)
            .find(|edge| edge.pow(3) == voxels.len())
        else {
            bail!(
                "{} voxel bytes do not form a cubic volume with power-of-two edge length",
                voxels.len()
            );
        };
        Self::new(edge, voxels)
    }

    /// Reads the raw (already decompressed) voxel bytes in the given file as
    /// a volume, inferring the edge length from the file size.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or does not hold a valid
    /// volume (see [`Self::from_raw_bytes`]).
    pub fn read_raw_file(file_path: impl AsRef<Path>) -> Result<Self> {
        Self::from_raw_bytes(io::read_binary_file(file_path)?)
    }

    /// Returns the number of voxels along each axis.
    pub fn edge(&self) -> usize {
        self.edge
    }

    /// Returns the base-2 logarithm of the edge length.
    pub fn log2_edge(&self) -> u32 {
        self.edge.trailing_zeros()
    }

    /// Returns all voxels as a flat slice.
    pub fn voxels(&self) -> &[u8] {
        &self.voxels
    }

    /// Whether the given indices are inside the volume.
    pub fn contains(&self, i: usize, j: usize, k: usize) -> bool {
        i < self.edge && j < self.edge && k < self.edge
    }

    /// Returns the voxel value at the given indices.
    ///
    /// # Panics
    /// If the indices are outside the volume.
    #[inline]
    pub fn voxel(&self, i: usize, j: usize, k: usize) -> u8 {
        self.voxels[self.linear_index(i, j, k)]
    }

    /// Sets the voxel at the given indices to the given value and returns the
    /// previous value.
    ///
    /// # Panics
    /// If the indices are outside the volume.
    pub fn set_voxel(&mut self, i: usize, j: usize, k: usize, value: u8) -> u8 {
        let idx = self.linear_index(i, j, k);
        std::mem::replace(&mut self.voxels[idx], value)
    }

    /// Empties the voxel at the given indices and returns its previous value.
    ///
    /// # Panics
    /// If the indices are outside the volume.
    pub fn clear_voxel(&mut self, i: usize, j: usize, k: usize) -> u8 {
        self.set_voxel(i, j, k, 0)
    }

    /// Returns the occupancy of the `d x d x d` block of voxels whose lower
    /// corner is at the given indices: the first non-zero voxel value
    /// encountered in the block, or zero if the whole block is empty. Only
    /// the distinction between zero and non-zero is meaningful.
    ///
    /// # Panics
    /// If any part of the block is outside the volume.
    #[inline]
    pub fn block_occupancy(&self, i: usize, j: usize, k: usize, d: usize) -> u8 {
        debug_assert!(d > 0);
        debug_assert!(
            self.contains(i + d - 1, j + d - 1, k + d - 1),
            "Block of size {d} at ({i}, {j}, {k}) exceeds volume of edge length {}",
            self.edge
        );
        for bi in i..i + d {
            for bj in j..j + d {
                let row_start = self.linear_index(bi, bj, k);
                if let Some(&value) = self.voxels[row_start..row_start + d]
                    .iter()
                    .find(|&&value| value != 0)
                {
                    return value;
                }
            }
        }
        0
    }

    /// Whether the volume contains no solid voxels.
    pub fn is_empty(&self) -> bool {
        self.voxels.iter().all(|&value| value == 0)
    }

    #[inline]
    fn linear_index(&self, i: usize, j: usize, k: usize) -> usize {
        assert!(
            self.contains(i, j, k),
            "Voxel indices ({i}, {j}, {k}) outside volume of edge length {}",
            self.edge
        );
        utils::linear_index(self.edge, i, j, k)
    }
}
