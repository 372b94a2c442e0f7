//! Threading for the cubemesh voxel mesher.

pub mod rayon;
