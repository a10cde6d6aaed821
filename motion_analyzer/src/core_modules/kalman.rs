// THEORY:
// Every track carries a linear-Gaussian estimate of its centroid and velocity.
// The state is `[x, y, vx, vy]` in pixels and pixels per second; the only
// observation is the detection centroid `[x, y]`.
//
// Key principles:
// 1.  **Constant velocity**: prediction moves position by `velocity * dt` and
//     leaves velocity unchanged. `dt` is the wall-clock gap between frames,
//     not a frame count, so a stride or a dropped frame is handled for free.
// 2.  **Growing uncertainty**: each prediction adds `process_noise * dt` to the
//     covariance diagonal. An unobserved track becomes less certain the
//     longer it goes unseen.
// 3.  **Standard correction**: the update is the textbook gain
//     `K = P Hᵀ (H P Hᵀ + R)⁻¹`. If the innovation covariance is not
//     invertible the correction is skipped rather than corrupting the state.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    state: Vector4<f64>,
    covariance: Matrix4<f64>,
    process_noise: f64,
    measurement_noise: Matrix2<f64>,
}

impl KalmanFilter {
    /// Starts a filter at a first observed centroid with zero velocity.
    pub fn new(
        position: (f64, f64),
        measurement_noise: f64,
        initial_velocity_variance: f64,
        process_noise: f64,
    ) -> Self {
        let covariance = Matrix4::from_diagonal(&Vector4::new(
            measurement_noise,
            measurement_noise,
            initial_velocity_variance,
            initial_velocity_variance,
        ));
        Self {
            state: Vector4::new(position.0, position.1, 0.0, 0.0),
            covariance,
            process_noise,
            measurement_noise: Matrix2::identity() * measurement_noise,
        }
    }

    fn observation() -> Matrix2x4<f64> {
        Matrix2x4::new(1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    fn transition(dt: f64) -> Matrix4<f64> {
        let mut f = Matrix4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    /// Advances the estimate by `dt` seconds.
    pub fn predict(&mut self, dt: f64) {
        let dt = dt.max(0.0);
        let f = Self::transition(dt);
        self.state = f * self.state;
        let process = Matrix4::identity() * (self.process_noise * dt);
        self.covariance = f * self.covariance * f.transpose() + process;
    }

    /// Folds in an observed centroid. Returns `false` when the innovation
    /// covariance was singular and the state was left as predicted.
    pub fn update(&mut self, measurement: (f64, f64)) -> bool {
        let h = Self::observation();
        let z = Vector2::new(measurement.0, measurement.1);
        let innovation = z - h * self.state;
        let s = h * self.covariance * h.transpose() + self.measurement_noise;
        let Some(s_inv) = s.try_inverse() else {
            return false;
        };
        let gain = self.covariance * h.transpose() * s_inv;
        self.state += gain * innovation;
        self.covariance = (Matrix4::identity() - gain * h) * self.covariance;
        true
    }

    pub fn position(&self) -> (f64, f64) {
        (self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> (f64, f64) {
        (self.state[2], self.state[3])
    }
}
