use criterion::{Criterion, black_box, criterion_group, criterion_main};
use cubemesh::{
    AggregationFactor, ChunkLevel, ChunkOctree, CubeTemplate, MeshingConfig, MeshingEngine,
    RecordingMeshConsumer, Viewer, VoxelVolume,
    scheduler::{CancellationToken, ChunkScheduler, InterestPoints},
};
use cubemesh_thread::rayon::RayonThreadPool;
use nalgebra::{point, vector};
use parking_lot::RwLock;

fn sphere_volume(edge: usize) -> VoxelVolume {
    let center = 0.5 * edge as f32;
    let radius_squared = (0.4 * edge as f32).powi(2);
    VoxelVolume::from_fn(edge, |i, j, k| {
        let [x, y, z] = [i, j, k].map(|idx| idx as f32 + 0.5 - center);
        u8::from(x * x + y * y + z * z <= radius_squared)
    })
    .unwrap()
}

fn engine() -> MeshingEngine {
    let thread_pool = RayonThreadPool::with_thread_count_or_available(0).unwrap();
    MeshingEngine::new(CubeTemplate::unit_cube(), thread_pool).unwrap()
}

pub fn bench_build_full_resolution_chunk_mesh(c: &mut Criterion) {
    let volume = sphere_volume(64);
    let engine = engine();
    let level = ChunkLevel::new(6).unwrap();
    c.bench_function("build_full_resolution_chunk_mesh", |b| {
        b.iter(|| {
            black_box(
                engine
                    .build_chunk_mesh(&volume, [0; 3], level, AggregationFactor::One)
                    .unwrap(),
            );
        })
    });
}

pub fn bench_build_aggregated_chunk_mesh(c: &mut Criterion) {
    let volume = sphere_volume(128);
    let engine = engine();
    let level = ChunkLevel::new(7).unwrap();
    c.bench_function("build_aggregated_chunk_mesh", |b| {
        b.iter(|| {
            black_box(
                engine
                    .build_chunk_mesh(&volume, [0; 3], level, AggregationFactor::Two)
                    .unwrap(),
            );
        })
    });
}

pub fn bench_rebuild_octree_near_viewer(c: &mut Criterion) {
    let volume = RwLock::new(sphere_volume(64));
    let engine = engine();
    let root_level = ChunkLevel::new(6).unwrap();
    let scheduler = ChunkScheduler::new(&MeshingConfig::default(), root_level);
    let viewer = Viewer::new(point![32.0, 32.0, -16.0], vector![0.0, 0.0, 1.0]);
    let mut interest_points = InterestPoints::new(10);
    interest_points.add(point![32.0, 32.0, 6.0]);
    let cancellation = CancellationToken::new();
    c.bench_function("rebuild_octree_near_viewer", |b| {
        b.iter(|| {
            let mut octree = ChunkOctree::new(64, root_level).unwrap();
            let mut consumer = RecordingMeshConsumer::new();
            let stats = scheduler
                .run_pass(
                    &mut octree,
                    &engine,
                    &volume,
                    &viewer,
                    interest_points.points(),
                    &cancellation,
                    &mut consumer,
                )
                .unwrap();
            black_box(stats);
        })
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default();
    targets =
        bench_build_full_resolution_chunk_mesh,
        bench_build_aggregated_chunk_mesh,
        bench_rebuild_octree_near_viewer,
);
criterion_main!(benches);
