//! Polynomial orbit model fitted to state vectors
//!
//! Each ECEF axis is a least-squares polynomial in the scaled time
//! `tau = (t - epoch) / half_span`, with `epoch` the middle of the sample span,
//! so `tau` stays within [-1, 1] over the samples. Derivatives are analytic.

use crate::config::OrbitFitConfig;
use crate::types::{LiaError, LiaResult, OrbitSamples, Vector3};
use chrono::{DateTime, Duration, Utc};

/// Satellite position, velocity and acceleration at one instant (ECEF)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitState {
    pub position: Vector3,
    pub velocity: Vector3,
    pub acceleration: Vector3,
}

/// Immutable orbit model, shared read-only across threads
#[derive(Debug, Clone)]
pub struct OrbitInterpolator {
    epoch: DateTime<Utc>,
    half_span: f64,
    /// Coefficients per axis in ascending powers of tau
    coefficients: [Vec<f64>; 3],
    sample_times: Vec<f64>,
    sample_positions: Vec<Vector3>,
    valid_start: f64,
    valid_end: f64,
}

impl OrbitInterpolator {
    /// Fit the orbit model and verify it reproduces the samples
    pub fn new(samples: &OrbitSamples, config: &OrbitFitConfig) -> LiaResult<Self> {
        let svs = samples.state_vectors();
        let start = samples.start();
        let stop = samples.stop();
        let epoch = start + (stop - start) / 2;

        let sample_times: Vec<f64> = svs.iter().map(|sv| seconds_between(epoch, sv.time)).collect();
        let half_span = (sample_times[sample_times.len() - 1] - sample_times[0]) / 2.0;
        if !(half_span > 0.0) {
            return Err(LiaError::OrbitFitFailed("orbit samples span no time".to_string()));
        }

        let degree = config.degree.min(svs.len() - 1);
        if degree < config.degree {
            log::warn!(
                "Only {} state vectors, reducing orbit polynomial degree from {} to {}",
                svs.len(),
                config.degree,
                degree
            );
        }

        let taus: Vec<f64> = sample_times.iter().map(|t| t / half_span).collect();
        let sample_positions: Vec<Vector3> = svs.iter().map(|sv| Vector3::from_array(sv.position)).collect();

        let mut coefficients: [Vec<f64>; 3] = Default::default();
        for (axis, coeffs) in coefficients.iter_mut().enumerate() {
            let values: Vec<f64> = svs.iter().map(|sv| sv.position[axis]).collect();
            *coeffs = least_squares_polynomial(&taus, &values, degree)?;
        }

        let margin = config.extrapolation_margin_s;
        let interpolator = Self {
            epoch,
            half_span,
            coefficients,
            valid_start: sample_times[0] - margin,
            valid_end: sample_times[sample_times.len() - 1] + margin,
            sample_times,
            sample_positions,
        };
        interpolator.check_fit(samples, config.fit_tolerance_m)?;

        log::info!(
            "✅ Orbit fitted: {} state vectors, degree {}, epoch {}",
            svs.len(),
            degree,
            epoch.format("%Y-%m-%dT%H:%M:%S%.3f")
        );
        Ok(interpolator)
    }

    fn check_fit(&self, samples: &OrbitSamples, tolerance: f64) -> LiaResult<()> {
        let mut max_position_residual: f64 = 0.0;
        let mut max_velocity_residual: f64 = 0.0;

        for (sv, &t) in samples.state_vectors().iter().zip(&self.sample_times) {
            let state = self.evaluate_unchecked(t);
            let dp = (state.position - Vector3::from_array(sv.position)).norm();
            let dv = (state.velocity - Vector3::from_array(sv.velocity)).norm();
            if !dp.is_finite() {
                return Err(LiaError::OrbitFitFailed(format!(
                    "non-finite fitted position at {}",
                    sv.time
                )));
            }
            max_position_residual = max_position_residual.max(dp);
            max_velocity_residual = max_velocity_residual.max(dv);
        }

        log::debug!(
            "Orbit fit residuals: position {:.3e} m, velocity {:.3e} m/s",
            max_position_residual,
            max_velocity_residual
        );
        if max_velocity_residual > 1.0 {
            log::warn!(
                "Fitted orbit velocity differs from state vectors by up to {:.3} m/s",
                max_velocity_residual
            );
        }
        if max_position_residual > tolerance {
            return Err(LiaError::OrbitFitFailed(format!(
                "position residual {:.3} m exceeds tolerance {:.3} m",
                max_position_residual, tolerance
            )));
        }
        Ok(())
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Valid time range in seconds relative to the epoch
    pub fn valid_range(&self) -> (f64, f64) {
        (self.valid_start, self.valid_end)
    }

    pub fn seconds_since_epoch(&self, time: DateTime<Utc>) -> f64 {
        seconds_between(self.epoch, time)
    }

    pub fn time_at(&self, seconds: f64) -> DateTime<Utc> {
        self.epoch + Duration::nanoseconds((seconds * 1e9).round() as i64)
    }

    /// Middle of the sample span (the epoch itself)
    pub fn mid_time(&self) -> f64 {
        (self.sample_times[0] + self.sample_times[self.sample_times.len() - 1]) / 2.0
    }

    /// Time of the state vector closest to `point`
    pub fn nearest_sample_time(&self, point: Vector3) -> f64 {
        let mut best = (f64::INFINITY, self.mid_time());
        for (p, &t) in self.sample_positions.iter().zip(&self.sample_times) {
            let d = (*p - point).norm();
            if d < best.0 {
                best = (d, t);
            }
        }
        best.1
    }

    fn check_time(&self, t: f64) -> LiaResult<()> {
        if t >= self.valid_start && t <= self.valid_end {
            Ok(())
        } else {
            Err(LiaError::OrbitTimeOutOfRange {
                time: t,
                valid_start: self.valid_start,
                valid_end: self.valid_end,
            })
        }
    }

    /// Position, velocity and acceleration at `t` seconds from the epoch
    pub fn evaluate(&self, t: f64) -> LiaResult<OrbitState> {
        self.check_time(t)?;
        Ok(self.evaluate_unchecked(t))
    }

    pub fn position(&self, t: f64) -> LiaResult<Vector3> {
        self.evaluate(t).map(|s| s.position)
    }

    pub fn velocity(&self, t: f64) -> LiaResult<Vector3> {
        self.evaluate(t).map(|s| s.velocity)
    }

    fn evaluate_unchecked(&self, t: f64) -> OrbitState {
        let tau = t / self.half_span;
        let scale = 1.0 / self.half_span;

        let mut p = [0.0; 3];
        let mut v = [0.0; 3];
        let mut a = [0.0; 3];
        for axis in 0..3 {
            let (value, d1, d2) = horner_with_derivatives(&self.coefficients[axis], tau);
            p[axis] = value;
            v[axis] = d1 * scale;
            a[axis] = d2 * scale * scale;
        }
        OrbitState {
            position: Vector3::from_array(p),
            velocity: Vector3::from_array(v),
            acceleration: Vector3::from_array(a),
        }
    }
}

/// Seconds from `epoch` to `time` with nanosecond resolution
fn seconds_between(epoch: DateTime<Utc>, time: DateTime<Utc>) -> f64 {
    let d = time - epoch;
    let whole = d.num_seconds();
    let frac = (d - Duration::seconds(whole)).num_nanoseconds().unwrap_or(0);
    whole as f64 + frac as f64 * 1e-9
}

/// Value, first and second derivative of `sum c_k x^k`
fn horner_with_derivatives(coeffs: &[f64], x: f64) -> (f64, f64, f64) {
    let mut p = 0.0;
    let mut dp = 0.0;
    let mut ddp = 0.0;
    for &c in coeffs.iter().rev() {
        ddp = ddp * x + 2.0 * dp;
        dp = dp * x + p;
        p = p * x + c;
    }
    (p, dp, ddp)
}

/// Least-squares polynomial coefficients (ascending) via the normal equations
fn least_squares_polynomial(x: &[f64], y: &[f64], degree: usize) -> LiaResult<Vec<f64>> {
    let m = degree + 1;
    let mut ata = vec![vec![0.0; m]; m];
    let mut atb = vec![0.0; m];

    for (&xi, &yi) in x.iter().zip(y) {
        let mut powers = vec![1.0; m];
        for k in 1..m {
            powers[k] = powers[k - 1] * xi;
        }
        for r in 0..m {
            atb[r] += powers[r] * yi;
            for c in 0..m {
                ata[r][c] += powers[r] * powers[c];
            }
        }
    }

    solve_linear_system(ata, atb)
}

/// Gaussian elimination with partial pivoting
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> LiaResult<Vec<f64>> {
    let n = b.len();
    let scale = a.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if !(a[pivot][col].abs() > 1e-12 * scale) {
            return Err(LiaError::OrbitFitFailed(
                "singular normal equations in orbit polynomial fit".to_string(),
            ));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let sum: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - sum) / a[row][row];
    }
    Ok(x)
}
