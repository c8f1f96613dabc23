//! Synthetic road-scene frame generation for demos and tests.
//!
//! Produces point clouds that mimic a LiDAR sweep over a road: a Gaussian
//! ground-return scatter plus high-intensity lane-marking stripes. Useful
//! for exercising the pipeline end to end without real sensor data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::loaders::Point;

/// Lateral positions of the synthetic lane markings, in meters.
const LANE_Y_POSITIONS: [f32; 3] = [-3.5, 0.0, 3.5];

/// Intensity assigned to lane-marking returns; well above the scatter so
/// markings dominate max-reduced cells.
const MARKING_INTENSITY: f32 = 200.0;

/// Number of scatter points drawn before road-level filtering.
const SCATTER_POINTS: usize = 50_000;

/// Generates one synthetic road-scene frame.
///
/// Ground returns are drawn from Gaussians (x ~ N(0, 30), y ~ N(0, 15),
/// z ~ N(0, 2)) with uniform 0..255 intensity, filtered to road level
/// (|z| < 1, |y| < 20, -20 < x < 80). Three lane-marking stripes are laid
/// over the scatter at fixed lateral offsets. `shift_x` translates the
/// whole scene forward to simulate vehicle motion between frames.
pub fn synthetic_road_frame(seed: u64, shift_x: f32) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);

    let x_dist = Normal::new(0.0_f32, 30.0).expect("valid stddev");
    let y_dist = Normal::new(0.0_f32, 15.0).expect("valid stddev");
    let z_dist = Normal::new(0.0_f32, 2.0).expect("valid stddev");
    let jitter = Normal::new(0.0_f32, 0.1).expect("valid stddev");

    let mut points = Vec::with_capacity(SCATTER_POINTS / 4);

    for _ in 0..SCATTER_POINTS {
        let x: f32 = x_dist.sample(&mut rng);
        let y: f32 = y_dist.sample(&mut rng);
        let z: f32 = z_dist.sample(&mut rng);

        // Keep only road-level returns.
        if z.abs() < 1.0 && y.abs() < 20.0 && x > -20.0 && x < 80.0 {
            points.push(Point {
                x: x + shift_x,
                y,
                z,
                intensity: rng.gen_range(0.0..255.0),
            });
        }
    }

    // Lane-marking stripes along the road direction.
    for &lane_y in &LANE_Y_POSITIONS {
        for i in 0..100 {
            let x = -10.0 + 70.0 * (i as f32) / 99.0;
            points.push(Point {
                x: x + shift_x,
                y: lane_y + jitter.sample(&mut rng),
                z: 0.0,
                intensity: MARKING_INTENSITY,
            });
        }
    }

    points
}
