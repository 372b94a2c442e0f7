//! Cube-template voxel meshing with an octree of level-of-detail chunks.

pub mod config;
pub mod consumer;
pub mod geometry;
pub mod io;
pub mod lod;
pub mod mesh;
pub mod octree;
pub mod scheduler;
pub mod template;
pub mod utils;
pub mod visibility;
pub mod volume;
pub mod world;

pub use config::MeshingConfig;
pub use consumer::{ChunkMeshConsumer, ChunkPlacement, RecordingMeshConsumer};
pub use lod::{AggregationFactor, ChunkLevel};
pub use mesh::{ChunkMesh, MeshingEngine};
pub use octree::{ChunkID, ChunkOctree};
pub use scheduler::{RebuildStats, Viewer};
pub use template::{CubeTemplate, CubeVertex, FaceGroup};
pub use volume::VoxelVolume;
pub use world::ChunkWorld;
