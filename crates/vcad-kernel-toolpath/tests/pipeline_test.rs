use approx::assert_relative_eq;
use tracing_subscriber::EnvFilter;
use vcad_kernel_raster::{
    shapes, triangles_from_flat, BoundingBox, FilterMode, HeightMap, SparseTool, Aggregation, Vec3,
};
use vcad_kernel_toolpath::{
    Device, DeviceCapabilities, EngineConfig, ErrorKind, ExecutionMode, PlanarParams,
    RadialParams, SearchStrategy, ToolpathEngine,
};

const TOLERANCE: f64 = 1e-3;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine(config: EngineConfig) -> ToolpathEngine {
    init_tracing();
    ToolpathEngine::new(Device::cpu(), config).unwrap()
}

fn sequential() -> EngineConfig {
    EngineConfig {
        parallel_worker_count: 0,
        ..Default::default()
    }
}

fn tool_points(engine: &mut ToolpathEngine, diameter: f64, step: f64) -> Vec<Vec3> {
    let tris = triangles_from_flat(&shapes::ball_end_mill(diameter, 24)).unwrap();
    engine.rasterize(&tris, step, FilterMode::Tool, None).unwrap().points
}

// ---------------------------------------------------------------------------
// Rasterization
// ---------------------------------------------------------------------------

/// Two runs over the same block give the same point set and bounds.
#[test]
fn terrain_block_rasterization_is_deterministic() {
    let mut engine = engine(EngineConfig::default());
    let tris = triangles_from_flat(&shapes::terrain_block(84.0, 84.0, 28.0, 1.6, 1.5)).unwrap();
    assert!(tris.len() > 6000);

    let a = engine.rasterize(&tris, 0.5, FilterMode::Terrain, None).unwrap();
    let b = engine.rasterize(&tris, 0.5, FilterMode::Terrain, None).unwrap();
    assert_eq!(a.points, b.points);
    assert_eq!(a.bounds, b.bounds);
    assert!(a.point_count() <= 169 * 169);
    assert!(a.point_count() > 160 * 160);
    assert!(a.points.iter().all(|p| p.z <= 28.0 + 1e-6 && p.z >= 25.0 - 1e-6));
}

/// Same block at the fine step; slow in debug builds.
#[test]
#[ignore = "fine-step regression, run with --ignored"]
fn terrain_block_fine_step_is_deterministic() {
    let mut engine = engine(EngineConfig::default());
    let tris = triangles_from_flat(&shapes::terrain_block(84.0, 84.0, 28.0, 1.6, 1.5)).unwrap();
    let a = engine.rasterize(&tris, 0.1, FilterMode::Terrain, None).unwrap();
    let b = engine.rasterize(&tris, 0.1, FilterMode::Terrain, None).unwrap();
    assert_eq!(a.point_count(), b.point_count());
    assert_eq!(a.points, b.points);
}

/// Terrain keeps the upper half of a sphere, tool the lower half.
#[test]
fn sphere_filtering_splits_hemispheres() {
    let mut engine = engine(sequential());
    let tris = triangles_from_flat(&shapes::uv_sphere([1.0, 2.0, 3.0], 4.0, 32, 16)).unwrap();

    let up = engine.rasterize(&tris, 0.25, FilterMode::Terrain, None).unwrap();
    let down = engine.rasterize(&tris, 0.25, FilterMode::Tool, None).unwrap();
    assert!(!up.points.is_empty());
    assert!(!down.points.is_empty());
    assert!(up.points.iter().all(|p| p.z >= 3.0 - 1e-9));
    assert!(down.points.iter().all(|p| p.z <= 3.0 + 1e-9));
    let top = up.points.iter().map(|p| p.z).fold(f64::MIN, f64::max);
    assert_relative_eq!(top, 7.0, epsilon = 0.05);
}

/// A hemispherical cutter compacts below its bounding rectangle and keeps its tip.
#[test]
fn sparse_ball_tool_keeps_tip() {
    let mut engine = engine(sequential());
    let points = tool_points(&mut engine, 6.0, 0.2);
    let map = HeightMap::from_points(&points, 0.2, Aggregation::Min).unwrap();
    let tool = SparseTool::from_height_map(&map).unwrap();

    assert!(tool.len() < tool.dense_cell_count());
    assert!(tool.offsets().iter().any(|o| o.dx == 0 && o.dy == 0 && o.dz == 0.0));
    assert_relative_eq!(tool.tip_z(), 0.0, epsilon = 0.05);
}

// ---------------------------------------------------------------------------
// Planar toolpaths
// ---------------------------------------------------------------------------

/// Dense, sparse and tiled searches agree at every sample.
#[test]
fn planar_strategies_agree() {
    let config = EngineConfig {
        max_compute_budget_mb: 0.05,
        min_tile_size: 5.0,
        tile_overlap_distance: 3.0,
        parallel_worker_count: 0,
        ..Default::default()
    };
    let mut engine = engine(config);
    let terrain_tris = triangles_from_flat(&shapes::wavy_terrain(40.0, 30.0, 1.0, 2.0)).unwrap();
    let terrain = engine.rasterize(&terrain_tris, 0.5, FilterMode::Terrain, None).unwrap();
    let tool = tool_points(&mut engine, 3.0, 0.5);

    let run = |engine: &mut ToolpathEngine, strategy| {
        let params = PlanarParams {
            terrain_bounds: Some(terrain.bounds),
            strategy: Some(strategy),
            ..PlanarParams::new(0.5, -20.0)
        };
        engine.generate_planar(&terrain.points, &tool, &params).unwrap()
    };
    let dense = run(&mut engine, SearchStrategy::Dense);
    let sparse = run(&mut engine, SearchStrategy::Sparse);
    let tiled = run(&mut engine, SearchStrategy::Tiled);

    assert_eq!(sparse.toolpath.points_per_line, 81);
    assert_eq!(sparse.toolpath.num_scanlines, 61);
    assert!(tiled.tile_count > 1);
    assert!(dense.toolpath.max_abs_diff(&sparse.toolpath).unwrap() < TOLERANCE);
    assert!(sparse.toolpath.max_abs_diff(&tiled.toolpath).unwrap() < TOLERANCE);
    // Every sample has terrain somewhere under the tool.
    assert!(sparse.toolpath.path_data.iter().all(|&z| z > -20.0));
}

/// Padding the domain adds `pad / (step * x_step)` samples per line without
/// touching existing ones.
#[test]
fn padding_adds_coverage_only() {
    let mut engine = engine(sequential());
    let terrain_tris = triangles_from_flat(&shapes::wavy_terrain(30.0, 20.0, 1.0, 1.5)).unwrap();
    let terrain = engine.rasterize(&terrain_tris, 0.5, FilterMode::Terrain, None).unwrap();
    let tool = tool_points(&mut engine, 2.0, 0.5);
    let mut padded_bounds = terrain.bounds;
    padded_bounds.max.x += 5.0;

    for x_step in [1, 2, 5] {
        let base = PlanarParams {
            x_step,
            terrain_bounds: Some(terrain.bounds),
            ..PlanarParams::new(0.5, -20.0)
        };
        let padded = PlanarParams {
            terrain_bounds: Some(padded_bounds),
            ..base.clone()
        };

        let a = engine.generate_planar(&terrain.points, &tool, &base).unwrap().toolpath;
        let b = engine.generate_planar(&terrain.points, &tool, &padded).unwrap().toolpath;
        assert_eq!(a.points_per_line, 61usize.div_ceil(x_step));
        assert_eq!(b.points_per_line, a.points_per_line + 10 / x_step, "x_step {x_step}");
        assert_eq!(b.num_scanlines, a.num_scanlines);
        for row in 0..a.num_scanlines {
            for col in 0..a.points_per_line {
                assert_relative_eq!(a.get(col, row).unwrap(), b.get(col, row).unwrap(), epsilon = 1e-9);
            }
            // Far beyond the terrain only the floor remains.
            assert_eq!(b.get(b.points_per_line - 1, row), Some(-20.0));
        }
    }
}

/// Strides thin out samples: ceil(width / step) per line.
#[test]
fn planar_strides() {
    let mut engine = engine(sequential());
    let terrain_tris = triangles_from_flat(&shapes::wavy_terrain(10.0, 10.0, 1.0, 1.0)).unwrap();
    let terrain = engine.rasterize(&terrain_tris, 0.5, FilterMode::Terrain, None).unwrap();
    let tool = tool_points(&mut engine, 2.0, 0.5);
    let params = PlanarParams {
        x_step: 3,
        y_step: 2,
        terrain_bounds: Some(terrain.bounds),
        ..PlanarParams::new(0.5, -1.0)
    };
    let result = engine.generate_planar(&terrain.points, &tool, &params).unwrap();
    assert_eq!(result.toolpath.points_per_line, 7);
    assert_eq!(result.toolpath.num_scanlines, 11);
    assert_eq!(result.toolpath.path_data.len(), 77);
}

// ---------------------------------------------------------------------------
// Radial sweeps
// ---------------------------------------------------------------------------

fn lathe_blank() -> Vec<vcad_kernel_raster::Triangle> {
    triangles_from_flat(&shapes::cylinder_x(20.0, 5.0, 48)).unwrap()
}

/// Pool and single-context sweeps give the same rows in the same order.
#[test]
fn radial_parallel_matches_sequential() {
    let mut parallel = engine(EngineConfig {
        parallel_worker_count: 4,
        ..Default::default()
    });
    let mut single = engine(sequential());
    assert_eq!(parallel.worker_count(), 4);

    let tool = tool_points(&mut single, 2.0, 0.25);
    let terrain = lathe_blank();
    let params = RadialParams::new(30.0, 0.25, -50.0);

    let mut seen = Vec::new();
    let mut on_progress = |n: usize| seen.push(n);
    let a = parallel
        .generate_radial(&terrain, &tool, &params, Some(&mut on_progress))
        .unwrap();
    let b = single.generate_radial(&terrain, &tool, &params, None).unwrap();

    assert_eq!(a.execution, ExecutionMode::Parallel { workers: 4 });
    assert_eq!(b.execution, ExecutionMode::Sequential);
    assert_eq!(a.num_rotations, 12);
    assert_eq!(a.toolpath.num_scanlines, 12);
    assert_eq!(a.toolpath.points_per_line, 81);
    assert!(a.toolpath.max_abs_diff(&b.toolpath).unwrap() < TOLERANCE);

    assert_eq!(seen.last(), Some(&12));
    assert!(seen.windows(2).all(|w| w[0] < w[1]));

    // Every angle sees the same radius on a cylinder.
    for row in 0..12 {
        assert_relative_eq!(a.toolpath.get(40, row).unwrap(), 5.0, epsilon = 0.1);
    }
}

/// A blank away from the world origin turns about its own centre line.
#[test]
fn radial_sweep_follows_translated_axis() {
    let mut engine = engine(EngineConfig {
        parallel_worker_count: 4,
        ..Default::default()
    });
    let tool = tool_points(&mut engine, 2.0, 0.25);
    let offset = Vec3::new(0.0, 20.0, 10.0);
    let terrain: Vec<_> = lathe_blank().iter().map(|t| t.translated(&offset)).collect();
    let params = RadialParams {
        terrain_bounds: BoundingBox::from_triangles(&terrain),
        ..RadialParams::new(30.0, 0.25, -50.0)
    };

    let result = engine.generate_radial(&terrain, &tool, &params, None).unwrap();
    assert_eq!(result.execution, ExecutionMode::Parallel { workers: 4 });
    for row in 0..12 {
        assert_relative_eq!(result.toolpath.get(40, row).unwrap(), 5.0, epsilon = 0.1);
    }
}

/// Below the threshold the pool is skipped.
#[test]
fn few_rotations_run_sequentially() {
    let mut engine = engine(EngineConfig {
        parallel_worker_count: 2,
        ..Default::default()
    });
    let tool = tool_points(&mut engine, 2.0, 0.5);
    let params = RadialParams::new(120.0, 0.5, -50.0);
    let result = engine.generate_radial(&lathe_blank(), &tool, &params, None).unwrap();
    assert_eq!(result.num_rotations, 3);
    assert_eq!(result.execution, ExecutionMode::Sequential);
}

#[test]
fn rotation_step_sets_scanline_count() {
    let mut engine = engine(EngineConfig::default());
    let terrain = triangles_from_flat(&shapes::cylinder_x(4.0, 1.0, 12)).unwrap();
    let tool = tool_points(&mut engine, 1.0, 0.5);

    let coarse = engine
        .generate_radial(&terrain, &tool, &RadialParams::new(30.0, 0.5, -5.0), None)
        .unwrap();
    assert_eq!(coarse.toolpath.num_scanlines, 12);

    let fine = engine
        .generate_radial(&terrain, &tool, &RadialParams::new(1.0, 0.5, -5.0), None)
        .unwrap();
    assert_eq!(fine.toolpath.num_scanlines, 360);
    assert_eq!(fine.toolpath.path_data.len(), 360 * fine.toolpath.points_per_line);
    assert_eq!(fine.rotation_step_degrees, 1.0);
}

// ---------------------------------------------------------------------------
// Planning and resources
// ---------------------------------------------------------------------------

#[test]
fn large_domain_estimate_needs_tiling() {
    init_tracing();
    let caps = DeviceCapabilities::with_buffer_size("accelerator", 1 << 30);
    let engine = ToolpathEngine::new(Device::with_capabilities(caps), sequential()).unwrap();
    let bounds = BoundingBox::new(Vec3::zeros(), Vec3::new(500.0, 500.0, 10.0));

    let estimate = engine.estimate_memory(&bounds, 0.05).unwrap();
    assert!(estimate.needs_tiling);
    assert!(estimate.tile_count_estimate > 1);
    assert!(engine.will_use_tiling(&bounds, 0.05).unwrap());
    assert!(!engine.will_use_tiling(&bounds, 5.0).unwrap());
    assert_eq!(engine.capabilities().max_buffer_size, 1 << 30);
}

/// A grid too large to count asks for a coarser step instead of panicking.
#[test]
fn oversized_grid_reports_budget_exceeded() {
    let engine = engine(sequential());
    let bounds = BoundingBox::new(Vec3::zeros(), Vec3::new(1e7, 1e7, 1.0));
    let err = engine.estimate_memory(&bounds, 1e-3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BudgetExceeded);
    assert_eq!(engine.will_use_tiling(&bounds, 1e-3).unwrap_err().kind(), ErrorKind::BudgetExceeded);
    assert!(engine.estimate_memory(&bounds, 100.0).unwrap().total_points > 0);
}

/// A device that cannot host the pool still serves sweeps sequentially.
#[test]
fn pool_failure_falls_back_to_sequential() {
    init_tracing();
    let device = Device::cpu().with_context_limit(2);
    let mut engine = ToolpathEngine::new(device.clone(), EngineConfig::default()).unwrap();
    assert_eq!(engine.worker_count(), 0);
    assert_eq!(device.live_contexts(), 1);

    let tool = tool_points(&mut engine, 2.0, 0.5);
    let result = engine
        .generate_radial(&lathe_blank(), &tool, &RadialParams::new(30.0, 0.5, -50.0), None)
        .unwrap();
    assert_eq!(result.execution, ExecutionMode::Sequential);
    assert_eq!(result.num_rotations, 12);

    drop(engine);
    assert_eq!(device.live_contexts(), 0);
}

#[test]
fn errors_are_classified() {
    let config = EngineConfig {
        max_compute_budget_mb: 0.001,
        min_tile_size: 5.0,
        parallel_worker_count: 0,
        ..Default::default()
    };
    let mut engine = engine(config);
    let terrain_tris = triangles_from_flat(&shapes::wavy_terrain(20.0, 20.0, 1.0, 1.0)).unwrap();
    let terrain = engine.rasterize(&terrain_tris, 0.5, FilterMode::Terrain, None);
    // Rasterization over budget cannot be tiled small enough either.
    assert_eq!(terrain.unwrap_err().kind(), ErrorKind::BudgetExceeded);

    let points: Vec<Vec3> = (0..40)
        .flat_map(|y| (0..40).map(move |x| Vec3::new(x as f64 * 0.5, y as f64 * 0.5, 0.0)))
        .collect();
    let tool = vec![Vec3::zeros()];
    let params = PlanarParams {
        strategy: Some(SearchStrategy::Tiled),
        ..PlanarParams::new(0.5, -1.0)
    };
    let err = engine.generate_planar(&points, &tool, &params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BudgetExceeded);

    let err = engine.generate_planar(&points, &[], &params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadInput);

    assert_eq!(
        engine
            .generate_radial(&terrain_tris, &tool, &RadialParams::new(0.0, 0.5, 0.0), None)
            .unwrap_err()
            .kind(),
        ErrorKind::BadInput
    );
    assert!(triangles_from_flat(&[0.0; 10]).is_err());
}

#[test]
fn config_from_json_drives_engine() {
    let config = EngineConfig::from_json(r#"{"parallelWorkerCount": 2, "minTileSize": 25}"#).unwrap();
    let engine = engine(config);
    assert_eq!(engine.worker_count(), 2);
    assert_eq!(engine.config().min_tile_size, 25.0);
    assert_eq!(engine.config().max_compute_budget_mb, 256.0);
}
