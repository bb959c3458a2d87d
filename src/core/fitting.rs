use crate::types::{FitResult, InsarError, InsarResult, TimeSeries};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Period used as the starting guess for seasonal fits, in days
pub const GUESS_PERIOD_DAYS: f64 = 365.0;

/// Lower limit applied to the period so the model stays finite
const MIN_PERIOD_DAYS: f64 = 1.0;

/// Floor for the Marquardt diagonal scaling
const DIAGONAL_FLOOR: f64 = 1e-12;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// Box constraints of the sinusoidal model, as (lower, upper)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SinusoidBounds {
    pub amplitude: (f64, f64),
    /// Days
    pub period: (f64, f64),
    /// Days
    pub phase: (f64, f64),
    pub mean: (f64, f64),
}

impl Default for SinusoidBounds {
    fn default() -> Self {
        Self {
            amplitude: (0.0, 30.0),
            period: (0.0, 400.0),
            phase: (-20.0, 400.0),
            mean: (0.0, 100.0),
        }
    }
}

/// Solver configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitParams {
    /// Accepted steps allowed before giving up
    pub max_iterations: usize,
    /// Stop when a step lowers the cost by less than this fraction
    pub function_tolerance: f64,
    /// Stop when a step moves the parameters by less than this, relative to their norm
    pub step_tolerance: f64,
    /// Stop when the projected gradient's largest component falls below this
    pub gradient_tolerance: f64,
    /// Initial Levenberg-Marquardt damping
    pub initial_damping: f64,
    pub sinusoid_bounds: SinusoidBounds,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            function_tolerance: 1e-12,
            step_tolerance: 1e-10,
            gradient_tolerance: 1e-10,
            initial_damping: 1e-3,
            sinusoid_bounds: SinusoidBounds::default(),
        }
    }
}

/// Model to fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitModel {
    Linear,
    Sinusoidal,
}

/// Residuals and Jacobian of a least-squares problem
trait ResidualModel {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64>;
    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64>;
}

/// `p[0] * t + p[1]`, t in days since the first sample
struct LinearModel<'a> {
    t: &'a [f64],
    y: &'a [f64],
}

impl LinearModel<'_> {
    fn evaluate(p: &DVector<f64>, t: f64) -> f64 {
        p[0] * t + p[1]
    }
}

impl ResidualModel for LinearModel<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.t.len(),
            self.t.iter().zip(self.y).map(|(&t, &y)| Self::evaluate(p, t) - y),
        )
    }

    fn jacobian(&self, _p: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.t.len(), 2, |i, k| if k == 0 { self.t[i] } else { 1.0 })
    }
}

/// `p[0] * sin(2π (t - p[2]) / p[1]) + p[3]`
struct SinusoidModel<'a> {
    t: &'a [f64],
    y: &'a [f64],
}

impl SinusoidModel<'_> {
    fn evaluate(p: &DVector<f64>, t: f64) -> f64 {
        p[0] * (2.0 * PI * (t - p[2]) / p[1]).sin() + p[3]
    }
}

impl ResidualModel for SinusoidModel<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.t.len(),
            self.t.iter().zip(self.y).map(|(&t, &y)| Self::evaluate(p, t) - y),
        )
    }

    fn jacobian(&self, p: &DVector<f64>) -> DMatrix<f64> {
        let (amplitude, period, phase) = (p[0], p[1], p[2]);
        let mut jac = DMatrix::zeros(self.t.len(), 4);
        for (i, &t) in self.t.iter().enumerate() {
            let theta = 2.0 * PI * (t - phase) / period;
            let (sin_t, cos_t) = theta.sin_cos();
            jac[(i, 0)] = sin_t;
            jac[(i, 1)] = -amplitude * cos_t * theta / period;
            jac[(i, 2)] = -amplitude * cos_t * 2.0 * PI / period;
            jac[(i, 3)] = 1.0;
        }
        jac
    }
}

struct Solution {
    params: DVector<f64>,
    iterations: usize,
}

/// Fits trend and seasonal models to time series
pub struct CurveFitter {
    params: FitParams,
}

impl CurveFitter {
    pub fn new(params: FitParams) -> Self {
        Self { params }
    }

    /// Fitter with the default solver budget and legacy sinusoid bounds
    pub fn standard() -> Self {
        Self::new(FitParams::default())
    }

    pub fn params(&self) -> &FitParams {
        &self.params
    }

    pub fn fit(&self, series: &TimeSeries, model: FitModel) -> InsarResult<FitResult> {
        match model {
            FitModel::Linear => self.fit_linear(series),
            FitModel::Sinusoidal => self.fit_sinusoid(series),
        }
    }

    /// Fit many independent series; results keep the input order
    pub fn fit_many(&self, series: &[TimeSeries], model: FitModel) -> Vec<InsarResult<FitResult>> {
        log::info!("Fitting {:?} model to {} series", model, series.len());

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            series.par_iter().map(|s| self.fit(s, model)).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            series.iter().map(|s| self.fit(s, model)).collect()
        }
    }

    /// Least-squares straight line `slope * (t - t0) + intercept`.
    ///
    /// The misfit is the mean of `sqrt(|y² - f²|)` over all samples, which
    /// is what earlier outputs report; the RMSE is given alongside it.
    pub fn fit_linear(&self, series: &TimeSeries) -> InsarResult<FitResult> {
        check_series(series, 2)?;
        let t = series.day_offsets();
        let y = &series.values;

        let (slope0, intercept0) = linear_initial_guess(&t, y);
        log::debug!("Linear initial guess: slope={}, intercept={}", slope0, intercept0);

        let model = LinearModel { t: &t, y };
        let unbounded = DVector::from_element(2, f64::INFINITY);
        let solution = self.solve(
            &model,
            DVector::from_vec(vec![slope0, intercept0]),
            &(-&unbounded),
            &unbounded,
        )?;
        let p = &solution.params;

        let fitted: Vec<f64> = t.iter().map(|&ti| LinearModel::evaluate(p, ti)).collect();
        let misfit = y
            .iter()
            .zip(&fitted)
            .map(|(v, f)| (v * v - f * f).abs().sqrt())
            .sum::<f64>()
            / y.len() as f64;

        Ok(FitResult::LinearFit {
            slope: p[0],
            intercept: p[1],
            misfit,
            rmse: rmse(y, &fitted),
            iterations: solution.iterations,
        })
    }

    /// Bounded least-squares sinusoid `amplitude * sin(2π (t - t0 - phase) / period) + mean`.
    ///
    /// The misfit is the final residual L2 norm divided by the series length.
    pub fn fit_sinusoid(&self, series: &TimeSeries) -> InsarResult<FitResult> {
        check_series(series, 1)?;
        let t = series.day_offsets();
        let y = &series.values;

        let guess = sinusoid_initial_guess(&t, y)?;
        log::debug!("Sinusoid initial guess: {:?}", guess);

        let bounds = &self.params.sinusoid_bounds;
        let lower = DVector::from_vec(vec![
            bounds.amplitude.0,
            bounds.period.0.max(MIN_PERIOD_DAYS),
            bounds.phase.0,
            bounds.mean.0,
        ]);
        let upper = DVector::from_vec(vec![
            bounds.amplitude.1,
            bounds.period.1,
            bounds.phase.1,
            bounds.mean.1,
        ]);

        let model = SinusoidModel { t: &t, y };
        let solution = self.solve(&model, DVector::from_vec(guess.to_vec()), &lower, &upper)?;
        let p = &solution.params;

        let fitted: Vec<f64> = t.iter().map(|&ti| SinusoidModel::evaluate(p, ti)).collect();
        let norm = y
            .iter()
            .zip(&fitted)
            .map(|(v, f)| (f - v).powi(2))
            .sum::<f64>()
            .sqrt();

        Ok(FitResult::SinusoidalFit {
            amplitude: p[0],
            period: p[1],
            phase: p[2],
            mean: p[3],
            misfit: norm / y.len() as f64,
            rmse: rmse(y, &fitted),
            iterations: solution.iterations,
        })
    }

    /// Projected Levenberg-Marquardt: every trial point is clamped into the box
    fn solve<M: ResidualModel>(
        &self,
        model: &M,
        initial: DVector<f64>,
        lower: &DVector<f64>,
        upper: &DVector<f64>,
    ) -> InsarResult<Solution> {
        let config = &self.params;
        let mut p = project(&initial, lower, upper);
        let mut residuals = model.residuals(&p);
        let mut cost = 0.5 * residuals.norm_squared();
        let mut damping = config.initial_damping;

        if !cost.is_finite() {
            return Err(InsarError::FitDidNotConverge {
                iterations: 0,
                reason: "initial guess gives a non-finite cost".to_string(),
            });
        }

        for iteration in 0..config.max_iterations {
            if cost == 0.0 {
                return Ok(Solution { params: p, iterations: iteration });
            }

            let jac = model.jacobian(&p);
            let jt = jac.transpose();
            let jtj = &jt * &jac;
            let gradient = &jt * &residuals;

            if projected_gradient_norm(&p, &gradient, lower, upper) <= config.gradient_tolerance {
                log::debug!("Converged on gradient after {} iterations", iteration);
                return Ok(Solution { params: p, iterations: iteration });
            }

            loop {
                let mut system = jtj.clone();
                for k in 0..system.nrows() {
                    system[(k, k)] += damping * jtj[(k, k)].max(DIAGONAL_FLOOR);
                }

                if let Some(delta) = solve_normal_equations(system, -&gradient) {
                    let candidate = project(&(&p + &delta), lower, upper);
                    let step = (&candidate - &p).norm();
                    let candidate_residuals = model.residuals(&candidate);
                    let candidate_cost = 0.5 * candidate_residuals.norm_squared();
                    let improved = candidate_cost.is_finite() && candidate_cost < cost;

                    if step <= config.step_tolerance * (p.norm() + config.step_tolerance) {
                        log::debug!("Converged on step size after {} iterations", iteration);
                        let params = if improved { candidate } else { p };
                        return Ok(Solution { params, iterations: iteration });
                    }

                    if improved {
                        let reduction = cost - candidate_cost;
                        let previous = cost;
                        p = candidate;
                        residuals = candidate_residuals;
                        cost = candidate_cost;
                        damping = (damping / 10.0).max(MIN_DAMPING);

                        if reduction <= config.function_tolerance * previous {
                            log::debug!("Converged on cost after {} iterations", iteration + 1);
                            return Ok(Solution { params: p, iterations: iteration + 1 });
                        }
                        break;
                    }
                }

                damping *= 10.0;
                if damping > MAX_DAMPING {
                    return Err(InsarError::FitDidNotConverge {
                        iterations: iteration,
                        reason: "no descent direction found".to_string(),
                    });
                }
            }
        }

        Err(InsarError::FitDidNotConverge {
            iterations: config.max_iterations,
            reason: format!("iteration limit reached with cost {:.6e}", cost),
        })
    }
}

/// Starting point for the linear fit: (slope, intercept).
///
/// The slope guess is the series range over its time span, so it is always
/// non-negative.
pub fn linear_initial_guess(t: &[f64], y: &[f64]) -> (f64, f64) {
    let (min, max) = min_max(y);
    let span = t[t.len() - 1] - t[0];
    ((max - min) / span, y[0])
}

/// Starting point for the sinusoid fit: [amplitude, period, phase, mean].
///
/// The phase guess is a quarter of the guessed period minus the time to the
/// first sample after which the series stops rising.
pub fn sinusoid_initial_guess(t: &[f64], y: &[f64]) -> InsarResult<[f64; 4]> {
    let downturn = y
        .windows(2)
        .position(|w| w[1] - w[0] <= 0.0)
        .ok_or(InsarError::NoDownturnFound)?;

    let (min, max) = min_max(y);
    let mean = y.iter().sum::<f64>() / y.len() as f64;
    let phase = GUESS_PERIOD_DAYS / 4.0 - (t[downturn] - t[0]);
    Ok([(max - min) / 2.0, GUESS_PERIOD_DAYS, phase, mean])
}

fn check_series(series: &TimeSeries, min_len: usize) -> InsarResult<()> {
    if series.len() < min_len {
        return Err(InsarError::InvalidFormat(format!(
            "fit needs at least {} samples, got {}",
            min_len,
            series.len()
        )));
    }
    if series.values.iter().any(|v| !v.is_finite()) {
        return Err(InsarError::InvalidFormat(
            "series contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

fn rmse(observed: &[f64], fitted: &[f64]) -> f64 {
    let sum_sq: f64 = observed.iter().zip(fitted).map(|(o, f)| (o - f).powi(2)).sum();
    (sum_sq / observed.len() as f64).sqrt()
}

fn project(p: &DVector<f64>, lower: &DVector<f64>, upper: &DVector<f64>) -> DVector<f64> {
    DVector::from_fn(p.len(), |i, _| p[i].clamp(lower[i], upper[i]))
}

/// Gradient with components pushing against an active bound zeroed
fn projected_gradient_norm(
    p: &DVector<f64>,
    gradient: &DVector<f64>,
    lower: &DVector<f64>,
    upper: &DVector<f64>,
) -> f64 {
    (0..p.len())
        .map(|i| {
            let g = gradient[i];
            let blocked = (p[i] <= lower[i] && g > 0.0) || (p[i] >= upper[i] && g < 0.0);
            if blocked {
                0.0
            } else {
                g.abs()
            }
        })
        .fold(0.0, f64::max)
}

fn solve_normal_equations(system: DMatrix<f64>, rhs: DVector<f64>) -> Option<DVector<f64>> {
    match system.clone().cholesky() {
        Some(cholesky) => Some(cholesky.solve(&rhs)),
        None => system.lu().solve(&rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};

    fn daily_series(n: usize, f: impl Fn(f64) -> f64) -> TimeSeries {
        let start = NaiveDate::from_ymd_opt(2016, 1, 1).unwrap();
        let dates = (0..n).map(|i| start + Duration::days(i as i64)).collect();
        let values = (0..n).map(|i| f(i as f64)).collect();
        TimeSeries::new(dates, values).unwrap()
    }

    #[test]
    fn test_linear_fit_recovers_line() {
        let series = daily_series(30, |t| 2.0 * t + 5.0);
        match CurveFitter::standard().fit_linear(&series).unwrap() {
            FitResult::LinearFit { slope, intercept, misfit, rmse, .. } => {
                assert_relative_eq!(slope, 2.0, epsilon = 1e-8);
                assert_relative_eq!(intercept, 5.0, epsilon = 1e-8);
                assert!(misfit < 1e-3);
                assert!(rmse < 1e-8);
            }
            other => panic!("unexpected fit {:?}", other),
        }
    }

    #[test]
    fn test_linear_fit_negative_slope() {
        // The slope guess is positive, the solver has to turn it around
        let series = daily_series(50, |t| -0.5 * t + 12.0);
        let fit = CurveFitter::standard().fit(&series, FitModel::Linear).unwrap();
        match fit {
            FitResult::LinearFit { slope, intercept, iterations, .. } => {
                assert_relative_eq!(slope, -0.5, epsilon = 1e-6);
                assert_relative_eq!(intercept, 12.0, epsilon = 1e-6);
                assert!(iterations > 0);
            }
            other => panic!("unexpected fit {:?}", other),
        }
    }

    #[test]
    fn test_linear_misfit_formula() {
        // Two points cannot miss a line; misfit stays zero
        let series = daily_series(2, |t| 3.0 - t);
        let fit = CurveFitter::standard().fit_linear(&series).unwrap();
        assert!(fit.misfit() < 1e-3);
        assert!(CurveFitter::standard().fit_linear(&daily_series(1, |_| 1.0)).is_err());
    }

    #[test]
    fn test_linear_misfit_on_curved_data() {
        // y = t² over t = 0..4 has the least-squares line 4t - 2, residuals 2, -1, -2, -1, 2
        let series = daily_series(5, |t| t * t);
        match CurveFitter::standard().fit_linear(&series).unwrap() {
            FitResult::LinearFit { slope, intercept, misfit, rmse, .. } => {
                assert_relative_eq!(slope, 4.0, epsilon = 1e-6);
                assert_relative_eq!(intercept, -2.0, epsilon = 1e-6);

                // mean(sqrt(|y² - f²|)) with f = -2, 2, 6, 10, 14
                let expected = (4.0f64.sqrt()
                    + 3.0f64.sqrt()
                    + 20.0f64.sqrt()
                    + 19.0f64.sqrt()
                    + 60.0f64.sqrt())
                    / 5.0;
                assert_relative_eq!(misfit, expected, epsilon = 1e-5);
                assert_relative_eq!(rmse, 2.8f64.sqrt(), epsilon = 1e-6);
                assert!((misfit - rmse).abs() > 1.0);
            }
            other => panic!("unexpected fit {:?}", other),
        }
    }

    #[test]
    fn test_sinusoid_misfit_is_norm_over_length() {
        // A short-period ripple the annual model cannot follow
        let n = 800;
        let series = daily_series(n, |t| {
            10.0 * (2.0 * PI * t / 365.0).sin() + 20.0 + 0.3 * (2.0 * PI * t / 50.0).sin()
        });
        match CurveFitter::standard().fit_sinusoid(&series).unwrap() {
            FitResult::SinusoidalFit { amplitude, period, phase, mean, misfit, rmse, .. } => {
                let norm = series
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, y)| {
                        let t = i as f64;
                        let f = amplitude * (2.0 * PI * (t - phase) / period).sin() + mean;
                        (y - f).powi(2)
                    })
                    .sum::<f64>()
                    .sqrt();
                assert_relative_eq!(misfit, norm / n as f64, max_relative = 1e-9);
                assert_relative_eq!(misfit * (n as f64).sqrt(), rmse, max_relative = 1e-9);
                assert!(misfit > 1e-3);
                assert!(rmse > 10.0 * misfit);
            }
            other => panic!("unexpected fit {:?}", other),
        }
    }

    #[test]
    fn test_sinusoid_fit_recovers_annual_signal() {
        let series = daily_series(800, |t| 10.0 * (2.0 * PI * t / 365.0).sin() + 20.0);
        match CurveFitter::standard().fit_sinusoid(&series).unwrap() {
            FitResult::SinusoidalFit { amplitude, period, mean, misfit, .. } => {
                assert_relative_eq!(amplitude, 10.0, epsilon = 1e-3);
                assert_relative_eq!(period, 365.0, epsilon = 1e-2);
                assert_relative_eq!(mean, 20.0, epsilon = 1e-3);
                assert!(misfit < 1e-3);
            }
            other => panic!("unexpected fit {:?}", other),
        }
    }

    #[test]
    fn test_sinusoid_initial_guess() {
        let t: Vec<f64> = (0..400).map(|i| i as f64).collect();
        let y: Vec<f64> = t.iter().map(|&t| 10.0 * (2.0 * PI * t / 365.0).sin() + 20.0).collect();
        let [amp, period, phase, mean] = sinusoid_initial_guess(&t, &y).unwrap();
        assert_relative_eq!(amp, 10.0, epsilon = 1e-3);
        assert_eq!(period, GUESS_PERIOD_DAYS);
        // Peak sits at day 91.25; the first non-rising step starts at day 91
        assert_relative_eq!(phase, 0.25, epsilon = 1e-12);
        assert!(mean > 19.0 && mean < 22.0);
    }

    #[test]
    fn test_monotonic_series_has_no_downturn() {
        let series = daily_series(20, |t| t);
        let result = CurveFitter::standard().fit_sinusoid(&series);
        assert!(matches!(result, Err(InsarError::NoDownturnFound)));
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let series = daily_series(800, |t| 8.0 * (2.0 * PI * (t - 30.0) / 340.0).sin() + 40.0);
        let fitter = CurveFitter::new(FitParams { max_iterations: 1, ..FitParams::default() });
        let result = fitter.fit_sinusoid(&series);
        assert!(matches!(result, Err(InsarError::FitDidNotConverge { .. })));
    }

    #[test]
    fn test_sinusoid_respects_bounds() {
        // Amplitude of 50 exceeds the upper bound of 30 and stays pinned there
        let series = daily_series(730, |t| 50.0 * (2.0 * PI * t / 365.0).sin() + 60.0);
        match CurveFitter::standard().fit_sinusoid(&series).unwrap() {
            FitResult::SinusoidalFit { amplitude, period, phase, mean, .. } => {
                let bounds = SinusoidBounds::default();
                assert_relative_eq!(amplitude, bounds.amplitude.1, epsilon = 1e-6);
                assert_relative_eq!(period, 365.0, epsilon = 1e-2);
                assert_relative_eq!(mean, 60.0, epsilon = 1e-3);
                assert!(phase >= bounds.phase.0 && phase <= bounds.phase.1);
            }
            other => panic!("unexpected fit {:?}", other),
        }
    }

    #[test]
    fn test_fit_many_keeps_order() {
        let series = vec![
            daily_series(10, |t| t + 1.0),
            daily_series(10, |t| 3.0 * t),
            daily_series(1, |_| 0.0),
        ];
        let results = CurveFitter::standard().fit_many(&series, FitModel::Linear);
        assert_eq!(results.len(), 3);
        match results[1].as_ref().unwrap() {
            FitResult::LinearFit { slope, .. } => assert_relative_eq!(*slope, 3.0, epsilon = 1e-8),
            other => panic!("unexpected fit {:?}", other),
        }
        assert!(results[2].is_err());
    }
}
