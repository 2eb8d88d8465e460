use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::{
    error::{Result, SurvivalError},
    linalg::invert_with_ridge,
};

/// newton-raphson settings for the cox partial likelihood
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub l2_penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64,     // stop once the step norm drops below this
    pub max_step_norm: f64, // bigger steps get the step size halved
    pub min_step_size: f64, // give up once halving goes this far
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            l2_penalty: 0.0,
            max_iterations: 50,
            tolerance: 1e-5,
            max_step_norm: 10.0,
            min_step_size: 1e-3,
        }
    }
}

/// efron partial likelihood & its first two derivatives at some beta
#[derive(Debug, Clone)]
pub struct EfronValues {
    pub hessian: Array2<f64>, // negative (semi-)definite
    pub gradient: Array1<f64>,
    pub log_likelihood: f64,
}

/// where newton-raphson ended up
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub beta: Array1<f64>,
    pub covariance: Array2<f64>, // inverse of the negative hessian at beta
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// efron log partial likelihood, gradient & hessian, ties and weights included
///
/// Rows are swept from the longest duration down so the risk-set sums grow
/// incrementally. At the end of each block of tied times the `m` tied deaths
/// are handled by removing `l/m` of the tied aggregate from the risk set for
/// the `l`-th death, each death weighted by the average weight of the block.
pub fn efron_values(
    x: ArrayView2<f64>,
    durations: ArrayView1<f64>,
    events: &[bool],
    weights: ArrayView1<f64>,
    beta: ArrayView1<f64>,
) -> Result<EfronValues> {
    let (n, p) = x.dim();
    if durations.len() != n || events.len() != n || weights.len() != n {
        return Err(SurvivalError::invalid_dimensions(
            "durations, events & weights must have one entry per row",
        ));
    }
    if beta.len() != p {
        return Err(SurvivalError::invalid_dimensions(format!(
            "beta has {} entries for {} features",
            beta.len(),
            p
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| durations[a].total_cmp(&durations[b]));

    let mut hessian = Array2::zeros((p, p));
    let mut gradient = Array1::zeros(p);
    let mut log_likelihood = 0.0;

    // running sums over the risk set & over the current block of tied deaths
    let mut risk_phi = 0.0;
    let mut risk_phi_x = Array1::<f64>::zeros(p);
    let mut risk_phi_x_x = Array2::<f64>::zeros((p, p));
    let mut tie_phi = 0.0;
    let mut tie_phi_x = Array1::<f64>::zeros(p);
    let mut tie_phi_x_x = Array2::<f64>::zeros((p, p));
    let mut x_death_sum = Array1::<f64>::zeros(p);
    let mut weight_count = 0.0;
    let mut tie_count = 0usize;

    for pos in (0..n).rev() {
        let i = order[pos];
        let xi = x.row(i);
        let w = weights[i];
        let phi = w * xi.dot(&beta).exp();
        if !phi.is_finite() {
            return Err(SurvivalError::numerical_error(format!(
                "risk score overflowed at row {i}"
            )));
        }
        let phi_x = &xi * phi;
        let phi_x_x = outer(xi, phi_x.view());

        risk_phi += phi;
        risk_phi_x += &phi_x;
        risk_phi_x_x += &phi_x_x;

        if events[i] {
            x_death_sum.scaled_add(w, &xi);
            tie_phi += phi;
            tie_phi_x += &phi_x;
            tie_phi_x_x += &phi_x_x;
            weight_count += w;
            tie_count += 1;
        }

        if pos > 0 && durations[order[pos - 1]] == durations[i] {
            continue;
        }
        if tie_count == 0 {
            continue;
        }

        let weighted_average = weight_count / tie_count as f64;
        let mut partial_gradient = Array1::<f64>::zeros(p);
        for l in 0..tie_count {
            let frac = l as f64 / tie_count as f64;
            let denom = risk_phi - frac * tie_phi;
            if denom <= 0.0 {
                return Err(SurvivalError::numerical_error("risk set sum is non-positive"));
            }
            let numer = &risk_phi_x - &(&tie_phi_x * frac);
            let z = &numer / denom;
            let a1 = (&risk_phi_x_x - &(&tie_phi_x_x * frac)) / denom;

            partial_gradient += &z;
            hessian -= &((a1 - outer(z.view(), z.view())) * weighted_average);
            log_likelihood -= weighted_average * denom.ln();
        }
        gradient += &x_death_sum;
        gradient.scaled_add(-weighted_average, &partial_gradient);
        log_likelihood += x_death_sum.dot(&beta);

        tie_phi = 0.0;
        tie_phi_x.fill(0.0);
        tie_phi_x_x.fill(0.0);
        x_death_sum.fill(0.0);
        weight_count = 0.0;
        tie_count = 0;
    }

    Ok(EfronValues {
        hessian,
        gradient,
        log_likelihood,
    })
}

fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(j, k)| a[j] * b[k])
}

/// damped newton-raphson over the efron partial likelihood
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// efron values w/ the ridge penalty folded in
    fn penalized_values(
        &self,
        x: ArrayView2<f64>,
        durations: ArrayView1<f64>,
        events: &[bool],
        weights: ArrayView1<f64>,
        beta: &Array1<f64>,
    ) -> Result<EfronValues> {
        let mut values = efron_values(x, durations, events, weights, beta.view())?;
        let l2 = self.config.l2_penalty;
        if l2 > 0.0 {
            values.log_likelihood -= 0.5 * l2 * beta.dot(beta);
            values.gradient.scaled_add(-l2, beta);
            for j in 0..beta.len() {
                values.hessian[[j, j]] -= l2;
            }
        }
        Ok(values)
    }

    /// fit beta starting from zero
    ///
    /// Steps longer than `max_step_norm` halve the step size and retry; the
    /// loop stops once a step is shorter than `tolerance`, after
    /// `max_iterations`, or once the step size falls to `min_step_size`.
    /// Running out of iterations is not an error: the result says
    /// `converged = false` and a warning is logged.
    pub fn optimize(
        &self,
        x: ArrayView2<f64>,
        durations: ArrayView1<f64>,
        events: &[bool],
        weights: ArrayView1<f64>,
    ) -> Result<OptimizationResult> {
        let mut beta = Array1::zeros(x.ncols());
        let mut step_size = 1.0;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iterations && step_size > self.config.min_step_size {
            iterations += 1;
            let values = self.penalized_values(x, durations, events, weights, &beta)?;
            let (inverse, _) = invert_with_ridge((-&values.hessian).view())?;
            let delta = inverse.dot(&values.gradient) * step_size;

            if delta.iter().any(|d| d.is_nan()) {
                return Err(SurvivalError::numerical_error(
                    "newton step contains NaN - convergence halted",
                ));
            }
            let norm = delta.dot(&delta).sqrt();
            debug!(
                "newton iteration {iterations}: log-likelihood {:.6}, step norm {norm:.3e}, step size {step_size}",
                values.log_likelihood
            );

            // only allow small steps
            if norm > self.config.max_step_norm {
                step_size *= 0.5;
                continue;
            }
            beta += &delta;
            if norm < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "newton-raphson did not converge after {iterations} iterations (step size {step_size})"
            );
        }

        let values = self.penalized_values(x, durations, events, weights, &beta)?;
        let (covariance, _) = invert_with_ridge((-&values.hessian).view())?;

        Ok(OptimizationResult {
            beta,
            covariance,
            log_likelihood: values.log_likelihood,
            iterations,
            converged,
        })
    }
}
