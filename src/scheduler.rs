//! Ordering and running rebuild passes over the top-level chunks.

use crate::{
    config::{MeshingConfig, SchedulingConfig},
    consumer::ChunkMeshConsumer,
    lod::ChunkLevel,
    mesh::MeshingEngine,
    octree::{Chunk, ChunkID, ChunkOctree, ChunkRefresher, LODPolicy, RefreshStats},
    volume::VoxelVolume,
};
use anyhow::Result;
use cubemesh_log::{debug, info};
use nalgebra::{Point3, UnitVector3, Vector3};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Position and viewing direction of the observer that chunks are ordered
/// and culled relative to. Both are in voxel units relative to the volume
/// origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewer {
    pub position: Point3<f32>,
    pub direction: UnitVector3<f32>,
}

/// Distance and direction of a top-level chunk's center relative to the
/// viewer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewMetrics {
    pub distance: f32,
    /// Dot product of the viewing direction with the unit vector from the
    /// viewer to the chunk center. Negative when the chunk is behind the
    /// viewer.
    pub dot: f32,
}

/// Shared flag used to ask an in-flight rebuild pass to stop at the next
/// top-level chunk.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

/// Points of interest around which chunks are meshed at full detail, kept in
/// insertion order with the oldest evicted first.
#[derive(Clone, Debug)]
pub struct InterestPoints {
    points: Vec<Point3<f32>>,
    capacity: usize,
}

/// Tracks which cell of a coarse grid the viewer is in, so that rebuilds are
/// only triggered by substantial movement.
#[derive(Clone, Debug)]
pub struct ViewerGridTracker {
    grid_size: f32,
    cell: [i64; 3],
}

/// What happened during a rebuild pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    /// Top-level chunks that were refreshed.
    pub roots_refreshed: usize,
    /// Top-level chunks skipped for being far behind the viewer.
    pub roots_culled: usize,
    /// Top-level chunks left untouched because the pass was cancelled.
    pub roots_abandoned: usize,
    /// Finest-level chunks mined out of the volume.
    pub chunks_mined: usize,
    pub refresh: RefreshStats,
    pub cancelled: bool,
}

/// Runs rebuild passes: orders top-level chunks by distance to the viewer,
/// culls those far behind it and refreshes the rest in order, checking for
/// cancellation between chunks.
#[derive(Clone, Debug)]
pub struct ChunkScheduler {
    config: SchedulingConfig,
    policy: LODPolicy,
}

impl Viewer {
    pub fn new(position: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            position,
            direction: UnitVector3::try_new(direction, f32::EPSILON)
                .unwrap_or_else(Vector3::z_axis),
        }
    }

    /// Computes the distance and direction of the given point relative to the
    /// viewer. A point at the viewer position counts as straight ahead.
    pub fn metrics_for(&self, point: &Point3<f32>) -> ViewMetrics {
        let displacement = point - self.position;
        let distance = displacement.norm();
        let dot = if distance > f32::EPSILON {
            self.direction.dot(&(displacement / distance))
        } else {
            1.0
        };
        ViewMetrics { distance, dot }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl InterestPoints {
    /// Creates an empty set holding at most `capacity` points.
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Adds the given point rounded to the nearest voxel corner, evicting the
    /// oldest point if the set is full.
    pub fn add(&mut self, point: Point3<f32>) {
        if self.points.len() == self.capacity {
            self.points.remove(0);
        }
        self.points.push(point.map(f32::round));
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Returns the points, oldest first.
    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl ViewerGridTracker {
    /// Creates a tracker with the given grid cell size, starting in the cell
    /// containing the given position.
    pub fn new(grid_size: f32, position: &Point3<f32>) -> Self {
        Self {
            grid_size,
            cell: Self::cell_containing(grid_size, position),
        }
    }

    /// Records the given viewer position and returns whether it lies in a
    /// different cell than the previous one.
    pub fn update(&mut self, position: &Point3<f32>) -> bool {
        let cell = Self::cell_containing(self.grid_size, position);
        let changed = cell != self.cell;
        self.cell = cell;
        changed
    }

    pub fn cell(&self) -> [i64; 3] {
        self.cell
    }

    fn cell_containing(grid_size: f32, position: &Point3<f32>) -> [i64; 3] {
        [0, 1, 2].map(|dim| (position[dim] / grid_size).floor() as i64)
    }
}

impl ChunkScheduler {
    /// Creates a scheduler for an octree whose top-level chunks are at the
    /// given level.
    pub fn new(config: &MeshingConfig, root_level: ChunkLevel) -> Self {
        Self {
            config: config.scheduling.clone(),
            policy: LODPolicy::new(&config.lod, root_level),
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    pub fn policy(&self) -> &LODPolicy {
        &self.policy
    }

    /// Returns the top-level chunks of the octree with their view metrics,
    /// nearest first. The metrics are computed in parallel on the engine's
    /// thread pool.
    pub fn view_order(
        &self,
        octree: &ChunkOctree,
        engine: &MeshingEngine,
        viewer: &Viewer,
    ) -> Vec<(ChunkID, ViewMetrics)> {
        let mut order: Vec<_> = engine.thread_pool().install(|| {
            octree
                .roots()
                .par_iter()
                .map(|&root| (root, viewer.metrics_for(octree.chunk(root).center())))
                .collect()
        });
        order.sort_unstable_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance));
        order
    }

    /// Whether the given top-level chunk can be skipped this pass because it
    /// is far behind the viewer and already meshed coarsely.
    pub fn should_cull(&self, chunk: &Chunk, metrics: &ViewMetrics) -> bool {
        metrics.dot < 0.0
            && metrics.distance > self.config.cull_distance
            && chunk.aggregation_factor() >= self.config.cull_min_aggregation_factor
    }

    /// Runs a full rebuild pass over the top-level chunks of the octree.
    ///
    /// The volume is locked for reading while each top-level chunk is
    /// refreshed, and for writing while chunks near interest points are
    /// mined. Cancellation is checked before each top-level chunk, so a chunk
    /// that has been started is always completed.
    ///
    /// # Errors
    /// Returns an error if a chunk mesh can not be built.
    #[allow(clippy::too_many_arguments)]
    pub fn run_pass(
        &self,
        octree: &mut ChunkOctree,
        engine: &MeshingEngine,
        volume: &RwLock<VoxelVolume>,
        viewer: &Viewer,
        interest_points: &[Point3<f32>],
        cancellation: &CancellationToken,
        consumer: &mut dyn ChunkMeshConsumer,
    ) -> Result<RebuildStats> {
        let order = self.view_order(octree, engine, viewer);
        let mut stats = RebuildStats::default();

        for (idx, &(root, metrics)) in order.iter().enumerate() {
            if cancellation.is_cancelled() {
                stats.cancelled = true;
                stats.roots_abandoned = order.len() - idx;
                debug!(
                    "Rebuild pass cancelled with {} top-level chunks remaining",
                    stats.roots_abandoned
                );
                break;
            }

            if self.should_cull(octree.chunk(root), &metrics) {
                stats.roots_culled += 1;
                continue;
            }

            {
                let volume = volume.read();
                let mut refresher = ChunkRefresher {
                    engine,
                    volume: &volume,
                    policy: &self.policy,
                    interest_points,
                    consumer: &mut *consumer,
                    stats: &mut stats.refresh,
                };
                octree.refresh_chunk(root, metrics.distance, &mut refresher)?;
            }
            stats.roots_refreshed += 1;

            if self.config.mine_interest_points && !interest_points.is_empty() {
                let mut volume = volume.write();
                stats.chunks_mined += octree.mine_finest_chunks(
                    root,
                    interest_points,
                    self.config.mining_margin,
                    &mut volume,
                    &mut *consumer,
                );
            }
        }

        info!(
            "Rebuild pass {}: {} top-level chunks refreshed, {} culled, {} meshes built with {} vertices, {} empty, {} released",
            if stats.cancelled {
                "cancelled"
            } else {
                "completed"
            },
            stats.roots_refreshed,
            stats.roots_culled,
            stats.refresh.meshes_built,
            stats.refresh.vertices_built,
            stats.refresh.empty_builds,
            stats.refresh.meshes_released
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consumer::RecordingMeshConsumer, lod::AggregationFactor, octree::ChunkState,
        template::CubeTemplate,
    };
    use approx::assert_abs_diff_eq;
    use cubemesh_thread::rayon::RayonThreadPool;
    use nalgebra::{point, vector};
    use std::num::NonZeroUsize;

    fn engine() -> MeshingEngine {
        let thread_pool = RayonThreadPool::new(NonZeroUsize::new(2).unwrap()).unwrap();
        MeshingEngine::new(CubeTemplate::unit_cube(), thread_pool).unwrap()
    }

    fn level(number: u8) -> ChunkLevel {
        ChunkLevel::new(number).unwrap()
    }

    #[test]
    fn should_compute_distance_and_dot_to_point() {
        let viewer = Viewer::new(point![0.0, 0.0, 0.0], vector![0.0, 0.0, 2.0]);
        let ahead = viewer.metrics_for(&point![0.0, 3.0, 4.0]);
        assert_abs_diff_eq!(ahead.distance, 5.0);
        assert_abs_diff_eq!(ahead.dot, 0.8);

        let behind = viewer.metrics_for(&point![0.0, 0.0, -1.0]);
        assert_abs_diff_eq!(behind.dot, -1.0);

        let at_viewer = viewer.metrics_for(&point![0.0, 0.0, 0.0]);
        assert_abs_diff_eq!(at_viewer.distance, 0.0);
        assert_abs_diff_eq!(at_viewer.dot, 1.0);
    }

    #[test]
    fn should_round_and_evict_interest_points() {
        let mut points = InterestPoints::new(2);
        points.add(point![0.4, 1.6, -2.5]);
        points.add(point![1.0, 1.0, 1.0]);
        points.add(point![2.0, 2.0, 2.0]);
        assert_eq!(points.len(), 2);
        assert_eq!(points.points()[0], point![1.0, 1.0, 1.0]);
        assert_eq!(points.points()[1], point![2.0, 2.0, 2.0]);

        points.clear();
        points.add(point![0.4, 1.6, -2.5]);
        assert_eq!(points.points()[0], point![0.0, 2.0, -3.0]);
    }

    #[test]
    fn should_report_grid_cell_changes_only() {
        let mut tracker = ViewerGridTracker::new(128.0, &point![10.0, 10.0, 10.0]);
        assert!(!tracker.update(&point![120.0, 0.0, 50.0]));
        assert!(tracker.update(&point![130.0, 0.0, 50.0]));
        assert_eq!(tracker.cell(), [1, 0, 0]);
        assert!(tracker.update(&point![130.0, -1.0, 50.0]));
        assert_eq!(tracker.cell(), [1, -1, 0]);
    }

    #[test]
    fn should_share_cancellation_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn should_order_roots_by_distance() {
        let engine = engine();
        let octree = ChunkOctree::new(16, level(3)).unwrap();
        let scheduler = ChunkScheduler::new(&MeshingConfig::default(), level(3));
        let viewer = Viewer::new(point![20.0, 20.0, 20.0], vector![1.0, 0.0, 0.0]);

        let order = scheduler.view_order(&octree, &engine, &viewer);
        assert_eq!(order.len(), 8);
        assert_eq!(octree.chunk(order[0].0).offset(), [8, 8, 8]);
        assert_eq!(octree.chunk(order[7].0).offset(), [0, 0, 0]);
        assert!(order.windows(2).all(|pair| pair[0].1.distance <= pair[1].1.distance));
    }

    #[test]
    fn should_cull_only_far_coarse_chunks_behind_viewer() {
        let scheduler = ChunkScheduler::new(&MeshingConfig::default(), level(4));
        let mut octree = ChunkOctree::new(16, level(4)).unwrap();
        let root = octree.roots()[0];

        let behind_far = ViewMetrics {
            distance: 300.0,
            dot: -0.5,
        };
        // Never meshed, so the aggregation factor is still one
        assert!(!scheduler.should_cull(octree.chunk(root), &behind_far));

        let engine = engine();
        let volume = RwLock::new(VoxelVolume::filled(16, 1).unwrap());
        let mut consumer = RecordingMeshConsumer::new();
        let far_viewer = Viewer::new(point![5000.0, 8.0, 8.0], vector![1.0, 0.0, 0.0]);
        scheduler
            .run_pass(
                &mut octree,
                &engine,
                &volume,
                &far_viewer,
                &[],
                &CancellationToken::new(),
                &mut consumer,
            )
            .unwrap();
        let meshed = octree.chunk(root);
        assert_eq!(meshed.aggregation_factor(), AggregationFactor::Four);

        assert!(scheduler.should_cull(meshed, &behind_far));
        assert!(!scheduler.should_cull(
            meshed,
            &ViewMetrics {
                distance: 200.0,
                dot: -0.5
            }
        ));
        assert!(!scheduler.should_cull(
            meshed,
            &ViewMetrics {
                distance: 300.0,
                dot: 0.5
            }
        ));
    }

    #[test]
    fn should_skip_culled_roots_in_later_pass() {
        let engine = engine();
        let scheduler = ChunkScheduler::new(&MeshingConfig::default(), level(4));
        let mut octree = ChunkOctree::new(16, level(4)).unwrap();
        let volume = RwLock::new(VoxelVolume::filled(16, 1).unwrap());
        let mut consumer = RecordingMeshConsumer::new();
        let cancellation = CancellationToken::new();

        let facing = Viewer::new(point![-1000.0, 8.0, 8.0], vector![1.0, 0.0, 0.0]);
        let first = scheduler
            .run_pass(&mut octree, &engine, &volume, &facing, &[], &cancellation, &mut consumer)
            .unwrap();
        assert_eq!(first.roots_refreshed, 1);
        assert_eq!(first.refresh.meshes_built, 1);

        let facing_away = Viewer::new(point![-1000.0, 8.0, 8.0], vector![-1.0, 0.0, 0.0]);
        let second = scheduler
            .run_pass(
                &mut octree,
                &engine,
                &volume,
                &facing_away,
                &[],
                &cancellation,
                &mut consumer,
            )
            .unwrap();
        assert_eq!(second.roots_culled, 1);
        assert_eq!(second.roots_refreshed, 0);
    }

    #[test]
    fn should_abandon_all_roots_when_cancelled_before_start() {
        let engine = engine();
        let scheduler = ChunkScheduler::new(&MeshingConfig::default(), level(2));
        let mut octree = ChunkOctree::new(8, level(2)).unwrap();
        let volume = RwLock::new(VoxelVolume::filled(8, 1).unwrap());
        let mut consumer = RecordingMeshConsumer::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let viewer = Viewer::new(point![0.0, 0.0, 0.0], vector![1.0, 0.0, 0.0]);
        let stats = scheduler
            .run_pass(&mut octree, &engine, &volume, &viewer, &[], &cancellation, &mut consumer)
            .unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.roots_abandoned, 8);
        assert_eq!(consumer.n_built(), 0);
        for &root in octree.roots() {
            assert_eq!(octree.chunk(root).state(), &ChunkState::Unbuilt);
        }
    }

    #[test]
    fn should_mine_voxels_near_interest_points_when_enabled() {
        let engine = engine();
        let mut config = MeshingConfig::default();
        config.scheduling.mine_interest_points = true;
        let scheduler = ChunkScheduler::new(&config, level(3));
        let mut octree = ChunkOctree::new(8, level(3)).unwrap();
        let volume = RwLock::new(VoxelVolume::filled(8, 1).unwrap());
        let mut consumer = RecordingMeshConsumer::new();
        let viewer = Viewer::new(point![4.0, 4.0, 20.0], vector![0.0, 0.0, -1.0]);
        let interest = [point![4.0, 4.0, 8.0]];

        let stats = scheduler
            .run_pass(
                &mut octree,
                &engine,
                &volume,
                &viewer,
                &interest,
                &CancellationToken::new(),
                &mut consumer,
            )
            .unwrap();

        assert!(stats.chunks_mined > 0);
        assert_eq!(consumer.detached().len(), stats.chunks_mined);
        assert_eq!(volume.read().voxel(4, 4, 7), 0);
        assert_eq!(volume.read().voxel(0, 0, 0), 1);
    }
}
