//! Configuration of meshing and chunk scheduling.

use crate::{
    io,
    lod::{AggregationFactor, ChunkLevel},
};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration options for a chunked voxel mesher.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshingConfig {
    /// The number of worker threads used for the data-parallel meshing
    /// passes. Zero means one thread per available CPU.
    pub n_worker_threads: usize,
    pub lod: LODConfig,
    pub scheduling: SchedulingConfig,
}

/// Configuration options for the level-of-detail policy of the chunk octree.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LODConfig {
    /// The level of the top-level chunks tiling the volume. When absent, a
    /// single top-level chunk covers the whole volume.
    pub root_level: Option<ChunkLevel>,
    /// Top-level chunks closer to the viewer than this are subdivided.
    pub subdivision_distance: f32,
    /// Top-level chunks closer to the viewer than this are meshed with an
    /// aggregation factor of two, farther ones with four.
    pub near_aggregation_distance: f32,
    /// How far outside its bounds a chunk still counts as containing an
    /// interest point.
    pub interest_margin: f32,
}

/// Configuration options for ordering, culling and triggering rebuild
/// passes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Top-level chunks behind the viewer are only skipped when farther away
    /// than this.
    pub cull_distance: f32,
    /// Top-level chunks behind the viewer are only skipped when their current
    /// aggregation factor is at least this.
    pub cull_min_aggregation_factor: AggregationFactor,
    /// Size of the grid cells the viewer position is snapped to. A rebuild
    /// is requested whenever the viewer enters a new cell.
    pub viewer_grid_size: f32,
    /// The number of interest points kept before the oldest is evicted.
    pub max_interest_points: usize,
    /// Whether finest-level chunks touching an interest point are dug out of
    /// the volume after each top-level chunk is built.
    pub mine_interest_points: bool,
    /// How close to an interest point a finest-level chunk must be to be
    /// mined.
    pub mining_margin: f32,
}

impl MeshingConfig {
    /// Reads the configuration from the given RON file.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or parsed, or if the
    /// parsed configuration is invalid.
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = io::parse_ron_file(file_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration values are usable.
    ///
    /// # Errors
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let grid_size = self.scheduling.viewer_grid_size;
        if grid_size.is_nan() || grid_size <= 0.0 {
            bail!(
                "Viewer grid size must be positive, got {}",
                self.scheduling.viewer_grid_size
            );
        }
        if self.scheduling.max_interest_points == 0 {
            bail!("At least one interest point must be retained");
        }
        if self.lod.interest_margin < 0.0 || self.scheduling.mining_margin < 0.0 {
            bail!("Interest and mining margins can not be negative");
        }
        Ok(())
    }
}

impl Default for LODConfig {
    fn default() -> Self {
        Self {
            root_level: None,
            subdivision_distance: 512.0,
            near_aggregation_distance: 768.0,
            interest_margin: 3.0,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            cull_distance: 256.0,
            cull_min_aggregation_factor: AggregationFactor::Two,
            viewer_grid_size: 128.0,
            max_interest_points: 10,
            mine_interest_points: false,
            mining_margin: 2.0,
        }
    }
}
