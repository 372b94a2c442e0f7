//! A voxel volume meshed as a chunk octree, with rebuild passes running in
//! the background.

use crate::{
    config::MeshingConfig,
    consumer::ChunkMeshConsumer,
    lod::ChunkLevel,
    mesh::MeshingEngine,
    octree::ChunkOctree,
    scheduler::{
        CancellationToken, ChunkScheduler, InterestPoints, RebuildStats, Viewer,
        ViewerGridTracker,
    },
    template::CubeTemplate,
    volume::VoxelVolume,
};
use anyhow::{Context, Result, anyhow, bail};
use cubemesh_log::{debug, info, with_timing_info_logging};
use cubemesh_thread::rayon::RayonThreadPool;
use nalgebra::Point3;
use parking_lot::{Mutex, RwLock};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

/// A voxel volume together with the chunk octree meshing it and the consumer
/// receiving the meshes.
///
/// At most one rebuild pass is in flight at a time. Requesting a new one
/// cancels the current pass and waits for it to stop before starting over
/// with the latest viewer and interest points.
#[derive(Debug)]
pub struct ChunkWorld<C> {
    volume: Arc<RwLock<VoxelVolume>>,
    state: Arc<Mutex<WorldState<C>>>,
    engine: Arc<MeshingEngine>,
    scheduler: Arc<ChunkScheduler>,
    viewer: Viewer,
    viewer_grid: ViewerGridTracker,
    interest_points: InterestPoints,
    cancellation: CancellationToken,
    in_flight: Option<JoinHandle<Result<RebuildStats>>>,
}

#[derive(Debug)]
struct WorldState<C> {
    octree: ChunkOctree,
    consumer: C,
}

impl<C: ChunkMeshConsumer + 'static> ChunkWorld<C> {
    /// Creates a world for the given volume, meshed with the given template.
    /// No meshes are built until a rebuild is requested.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, if the template is
    /// empty, if the configured top-level chunks do not fit in the volume or
    /// if the worker threads can not be created.
    pub fn new(
        config: &MeshingConfig,
        template: CubeTemplate,
        volume: VoxelVolume,
        consumer: C,
        viewer: Viewer,
    ) -> Result<Self> {
        config.validate()?;

        let root_level = match config.lod.root_level {
            Some(root_level) => root_level,
            None => ChunkLevel::for_edge_voxels(volume.edge())?,
        };

        let thread_pool = RayonThreadPool::with_thread_count_or_available(config.n_worker_threads)?;
        let engine = MeshingEngine::new(template, thread_pool)?;

        // Top-level chunks aggregate at least two voxels per cube, so no
        // index space is larger than that of the level below the root
        engine.preallocate_scratch(root_level.child().unwrap_or(ChunkLevel::FINEST));

        let octree = ChunkOctree::new(volume.edge(), root_level)?;
        let scheduler = ChunkScheduler::new(config, root_level);

        info!(
            "Created chunk world for volume of edge length {} with {} top-level chunks at level {}",
            volume.edge(),
            octree.roots().len(),
            root_level
        );

        Ok(Self {
            volume: Arc::new(RwLock::new(volume)),
            state: Arc::new(Mutex::new(WorldState { octree, consumer })),
            engine: Arc::new(engine),
            viewer_grid: ViewerGridTracker::new(
                config.scheduling.viewer_grid_size,
                &viewer.position,
            ),
            scheduler: Arc::new(scheduler),
            viewer,
            interest_points: InterestPoints::new(config.scheduling.max_interest_points),
            cancellation: CancellationToken::new(),
            in_flight: None,
        })
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Returns the current interest points, oldest first.
    pub fn interest_points(&self) -> &[Point3<f32>] {
        self.interest_points.points()
    }

    pub fn engine(&self) -> &MeshingEngine {
        &self.engine
    }

    /// Whether a rebuild pass is currently running.
    pub fn is_rebuilding(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts a rebuild pass on a background thread, after cancelling any
    /// pass in flight and waiting for it to stop. Returns the statistics of
    /// the previous pass if there was one.
    ///
    /// # Errors
    /// Returns an error if the previous pass failed or if the rebuild thread
    /// can not be spawned.
    pub fn request_rebuild(&mut self) -> Result<Option<RebuildStats>> {
        let previous = self.cancel_rebuild()?;
        self.cancellation.reset();

        let volume = Arc::clone(&self.volume);
        let state = Arc::clone(&self.state);
        let engine = Arc::clone(&self.engine);
        let scheduler = Arc::clone(&self.scheduler);
        let viewer = self.viewer;
        let interest_points = self.interest_points.points().to_vec();
        let cancellation = self.cancellation.clone();

        let handle = thread::Builder::new()
            .name("cubemesh-rebuild".to_string())
            .spawn(move || {
                let mut state = state.lock();
                let WorldState { octree, consumer } = &mut *state;
                scheduler.run_pass(
                    octree,
                    &engine,
                    &volume,
                    &viewer,
                    &interest_points,
                    &cancellation,
                    consumer,
                )
            })
            .context("Failed to spawn rebuild thread")?;

        self.in_flight = Some(handle);
        Ok(previous)
    }

    /// Asks the pass in flight, if any, to stop at the next top-level chunk
    /// and waits for it. Returns its statistics.
    ///
    /// # Errors
    /// Returns an error if the pass failed.
    pub fn cancel_rebuild(&mut self) -> Result<Option<RebuildStats>> {
        if self.in_flight.is_some() {
            debug!("Cancelling rebuild pass in flight");
            self.cancellation.cancel();
        }
        self.wait_for_rebuild()
    }

    /// Waits for the pass in flight, if any, to finish and returns its
    /// statistics.
    ///
    /// # Errors
    /// Returns an error if the pass failed.
    pub fn wait_for_rebuild(&mut self) -> Result<Option<RebuildStats>> {
        let Some(handle) = self.in_flight.take() else {
            return Ok(None);
        };
        match handle.join() {
            Ok(result) => result.map(Some),
            Err(_) => Err(anyhow!("Rebuild thread panicked")),
        }
    }

    /// Runs a full rebuild pass on the calling thread, after cancelling any
    /// pass in flight.
    ///
    /// # Errors
    /// Returns an error if the previous pass failed or if a chunk mesh can
    /// not be built.
    pub fn rebuild_blocking(&mut self) -> Result<RebuildStats> {
        self.cancel_rebuild()?;
        self.cancellation.reset();

        let mut state = self.state.lock();
        let WorldState { octree, consumer } = &mut *state;
        with_timing_info_logging!("Rebuilding chunk meshes"; self.scheduler.run_pass(
            octree,
            &self.engine,
            &self.volume,
            &self.viewer,
            self.interest_points.points(),
            &self.cancellation,
            consumer,
        ))
    }

    /// Records the new viewer and starts a rebuild if the viewer has moved
    /// into a different grid cell. Returns whether a rebuild was started.
    ///
    /// # Errors
    /// See [`Self::request_rebuild`].
    pub fn update_viewer(&mut self, viewer: Viewer) -> Result<bool> {
        self.viewer = viewer;
        if self.viewer_grid.update(&viewer.position) {
            debug!("Viewer entered grid cell {:?}", self.viewer_grid.cell());
            self.request_rebuild()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Adds an interest point (evicting the oldest if there are too many) and
    /// starts a rebuild.
    ///
    /// # Errors
    /// See [`Self::request_rebuild`].
    pub fn add_interest_point(&mut self, point: Point3<f32>) -> Result<()> {
        self.interest_points.add(point);
        self.request_rebuild()?;
        Ok(())
    }

    /// Empties the voxel at the given indices once any pass in flight has
    /// finished, and returns its previous value. The change shows up in the
    /// meshes after the next rebuild.
    ///
    /// # Errors
    /// Returns an error if the indices are outside the volume or if the pass
    /// in flight failed.
    pub fn clear_voxel(&mut self, [i, j, k]: [usize; 3]) -> Result<u8> {
        self.wait_for_rebuild()?;
        let mut volume = self.volume.write();
        if !volume.contains(i, j, k) {
            bail!(
                "Voxel ({}, {}, {}) is outside volume of edge length {}",
                i,
                j,
                k,
                volume.edge()
            );
        }
        Ok(volume.clear_voxel(i, j, k))
    }

    /// Calls the given closure with the volume. Blocks while mining in a
    /// pass in flight holds the volume.
    pub fn with_volume<R>(&self, f: impl FnOnce(&VoxelVolume) -> R) -> R {
        f(&self.volume.read())
    }

    /// Calls the given closure with the octree and the consumer. Blocks while
    /// a pass is in flight.
    pub fn with_octree_and_consumer<R>(&self, f: impl FnOnce(&ChunkOctree, &C) -> R) -> R {
        let state = self.state.lock();
        f(&state.octree, &state.consumer)
    }
}

impl<C> Drop for ChunkWorld<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            self.cancellation.cancel();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::RecordingMeshConsumer;
    use nalgebra::{point, vector};

    fn config() -> MeshingConfig {
        let mut config = MeshingConfig::default();
        config.n_worker_threads = 2;
        config
    }

    fn far_viewer() -> Viewer {
        Viewer::new(point![-1000.0, 8.0, 8.0], vector![1.0, 0.0, 0.0])
    }

    fn world(volume: VoxelVolume) -> ChunkWorld<RecordingMeshConsumer> {
        ChunkWorld::new(
            &config(),
            CubeTemplate::unit_cube(),
            volume,
            RecordingMeshConsumer::new(),
            far_viewer(),
        )
        .unwrap()
    }

    #[test]
    fn should_reject_empty_template() {
        let result = ChunkWorld::new(
            &config(),
            CubeTemplate::empty(),
            VoxelVolume::filled(4, 1).unwrap(),
            RecordingMeshConsumer::new(),
            far_viewer(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn should_reject_root_level_larger_than_volume() {
        let mut config = config();
        config.lod.root_level = Some(ChunkLevel::new(5).unwrap());
        let result = ChunkWorld::new(
            &config,
            CubeTemplate::unit_cube(),
            VoxelVolume::filled(16, 1).unwrap(),
            RecordingMeshConsumer::new(),
            far_viewer(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn should_mesh_far_volume_as_single_coarse_chunk() {
        let mut world = world(VoxelVolume::filled(16, 1).unwrap());
        let stats = world.rebuild_blocking().unwrap();

        assert_eq!(stats.roots_refreshed, 1);
        assert_eq!(stats.refresh.meshes_built, 1);
        world.with_octree_and_consumer(|octree, consumer| {
            assert_eq!(octree.n_chunks(), 1);
            assert_eq!(consumer.live_chunk_ids(), octree.meshed_chunks());
            // 4 x 4 aggregated cube faces of 6 vertices on each volume face
            assert_eq!(consumer.live_vertex_count(), 6 * 16 * 6);
        });
    }

    #[test]
    fn should_finish_background_rebuild() {
        let mut world = world(VoxelVolume::filled(16, 1).unwrap());
        assert!(world.request_rebuild().unwrap().is_none());
        let stats = world.wait_for_rebuild().unwrap().unwrap();
        assert!(!stats.cancelled);
        assert!(!world.is_rebuilding());
        assert!(world.wait_for_rebuild().unwrap().is_none());
    }

    #[test]
    fn should_rebuild_only_when_viewer_changes_grid_cell() {
        let mut world = world(VoxelVolume::filled(16, 1).unwrap());
        let nearby = Viewer::new(point![-1010.0, 8.0, 8.0], vector![1.0, 0.0, 0.0]);
        assert!(!world.update_viewer(nearby).unwrap());
        assert!(!world.is_rebuilding());

        let moved = Viewer::new(point![-2000.0, 8.0, 8.0], vector![1.0, 0.0, 0.0]);
        assert!(world.update_viewer(moved).unwrap());
        assert!(world.wait_for_rebuild().unwrap().is_some());
    }

    #[test]
    fn should_refine_around_interest_point() {
        let mut world = world(VoxelVolume::filled(16, 1).unwrap());
        world.rebuild_blocking().unwrap();

        world.add_interest_point(point![8.2, 8.4, 7.6]).unwrap();
        assert_eq!(world.interest_points(), &[point![8.0, 8.0, 8.0]]);
        world.wait_for_rebuild().unwrap();

        world.with_octree_and_consumer(|octree, consumer| {
            let deepest = octree
                .deepest_chunk_containing(&point![8.0, 8.0, 8.0])
                .unwrap();
            assert!(octree.chunk(deepest).level().is_finest());
            let mut meshed = octree.meshed_chunks();
            meshed.sort();
            let mut live = consumer.live_chunk_ids();
            live.sort();
            assert_eq!(meshed, live);
        });
    }

    #[test]
    fn should_keep_mesh_of_cleared_voxel_until_chunk_is_rebuilt() {
        let mut volume = VoxelVolume::filled(16, 0).unwrap();
        volume.set_voxel(3, 3, 3, 7);
        let mut world = world(volume);
        world.rebuild_blocking().unwrap();
        world.with_octree_and_consumer(|_, consumer| {
            assert_eq!(consumer.live_vertex_count(), 36);
        });

        assert_eq!(world.clear_voxel([3, 3, 3]).unwrap(), 7);
        assert!(world.clear_voxel([16, 0, 0]).is_err());
        world.with_volume(|volume| assert!(volume.is_empty()));

        // Edits do not invalidate kept meshes by themselves
        world.rebuild_blocking().unwrap();
        world.with_octree_and_consumer(|_, consumer| {
            assert_eq!(consumer.live_vertex_count(), 36);
        });

        // Moving closer changes the desired aggregation factor, and the
        // rebuilt mesh is empty
        let closer = Viewer::new(point![8.0, 8.0, -600.0], vector![0.0, 0.0, 1.0]);
        assert!(world.update_viewer(closer).unwrap());
        world.wait_for_rebuild().unwrap();
        world.with_octree_and_consumer(|octree, consumer| {
            assert_eq!(consumer.live_vertex_count(), 0);
            assert!(octree.meshed_chunks().is_empty());
        });
    }
}
