//! Chunk levels and voxel aggregation factors.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The level of a chunk in the chunk octree. A chunk at level `k` spans `2^k`
/// voxels along each axis, so level 0 is a single voxel and level
/// [`ChunkLevel::MAX`] spans a full 256³ volume.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChunkLevel(u8);

/// The number of raw voxels along each axis that one meshed cube represents.
/// Coarser factors replace each `d x d x d` block of voxels with a single
/// scaled cube.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AggregationFactor {
    One = 1,
    Two = 2,
    Four = 4,
}

impl ChunkLevel {
    /// The finest level, where a chunk is a single voxel.
    pub const FINEST: Self = Self(0);

    /// The coarsest supported level.
    pub const MAX: Self = Self(8);

    /// The number of distinct levels.
    pub const COUNT: usize = Self::MAX.0 as usize + 1;

    /// Creates the level with the given number, or returns an error if it
    /// exceeds [`Self::MAX`].
    pub fn new(level: u8) -> Result<Self> {
        if level > Self::MAX.0 {
            Err(anyhow!(
                "Chunk level {} exceeds the maximum level {}",
                level,
                Self::MAX.0
            ))
        } else {
            Ok(Self(level))
        }
    }

    /// Returns the level whose chunks span the given number of voxels along
    /// each axis, which must be a supported power of two.
    pub fn for_edge_voxels(edge: usize) -> Result<Self> {
        if !edge.is_power_of_two() {
            return Err(anyhow!("Chunk edge {} is not a power of two", edge));
        }
        Self::new(u8::try_from(edge.trailing_zeros())?)
    }

    /// Returns the level number.
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Returns the level number as an index.
    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    /// Returns the number of raw voxels spanned by a chunk at this level
    /// along each axis.
    pub const fn edge_voxels(self) -> usize {
        1 << self.0
    }

    /// Whether this is the finest level.
    pub const fn is_finest(self) -> bool {
        self.0 == 0
    }

    /// Returns the level of the children of a chunk at this level, or
    /// [`None`] if this is the finest level.
    pub const fn child(self) -> Option<Self> {
        if self.0 == 0 {
            None
        } else {
            Some(Self(self.0 - 1))
        }
    }

    /// Returns the level of the cube index space used when meshing a chunk at
    /// this level with the given aggregation factor, i.e. the level whose
    /// edge length equals the number of meshed cubes along each axis.
    ///
    /// # Panics
    /// If the aggregation factor is larger than the chunk.
    pub fn index_space_level(self, factor: AggregationFactor) -> Self {
        assert!(
            factor.log2() <= self.0,
            "Aggregation factor {factor} is too large for chunk level {self}"
        );
        Self(self.0 - factor.log2())
    }
}

impl TryFrom<u8> for ChunkLevel {
    type Error = anyhow::Error;

    fn try_from(level: u8) -> Result<Self> {
        Self::new(level)
    }
}

impl From<ChunkLevel> for u8 {
    fn from(level: ChunkLevel) -> Self {
        level.0
    }
}

impl fmt::Display for ChunkLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AggregationFactor {
    /// Returns the number of raw voxels per meshed cube along each axis.
    pub const fn value(self) -> usize {
        self as usize
    }

    /// Returns the base-2 logarithm of the factor.
    pub const fn log2(self) -> u8 {
        match self {
            Self::One => 0,
            Self::Two => 1,
            Self::Four => 2,
        }
    }

    /// Returns the offset added to every vertex coordinate so that cubes
    /// scaled by this factor cover the same voxel grid as unscaled cubes.
    pub const fn centering_offset(self) -> f32 {
        match self {
            Self::One => 0.0,
            Self::Two => 0.5,
            Self::Four => 1.5,
        }
    }

    /// Returns the largest factor not exceeding `self` that fits within a
    /// chunk at the given level.
    pub const fn clamped_to_level(self, level: ChunkLevel) -> Self {
        match (self, level.0) {
            (_, 0) => Self::One,
            (Self::Four, 1) => Self::Two,
            (factor, _) => factor,
        }
    }
}

impl fmt::Display for AggregationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}
