//! Regression estimators and cross-validation used by the mechanism fitter.
//!
//! Everything works on dense row-major feature matrices without an intercept
//! column; estimators add the intercept themselves.
//!
//! Score convention: regressors are scored with R² = 1 - SSE/SST on held-out
//! predictions. Classifiers are scored with Efron's pseudo-R², the same formula
//! applied to predicted class probabilities against 0/1 class indicators
//! (summed over classes for softmax). Both share the (-inf, 1] scale, so one
//! validation threshold applies to every node.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const PIVOT_EPS: f64 = 1e-10;

/// Solve `a * x = b` in place by Gaussian elimination with partial pivoting.
/// Returns `None` when the matrix is (numerically) singular.
pub(crate) fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    let scale = a
        .iter()
        .enumerate()
        .map(|(i, row)| row[i].abs())
        .fold(1.0_f64, f64::max);

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPS * scale {
            return None;
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
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// A fitted estimator.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fitted {
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    Softmax {
        intercepts: Vec<f64>,
        weights: Vec<Vec<f64>>,
    },
}

impl Fitted {
    /// Prediction as a row comparable with `Estimator::targets`:
    /// the value for linear, P(true) for logistic, class probabilities for softmax.
    pub(crate) fn predict(&self, x: &[f64]) -> Vec<f64> {
        match self {
            Fitted::Linear {
                intercept,
                coefficients,
            } => vec![linear(*intercept, coefficients, x)],
            Fitted::Logistic {
                intercept,
                coefficients,
            } => vec![sigmoid(linear(*intercept, coefficients, x))],
            Fitted::Softmax {
                intercepts,
                weights,
            } => softmax_probs(intercepts, weights, x),
        }
    }
}

pub(crate) fn linear(intercept: f64, coefficients: &[f64], x: &[f64]) -> f64 {
    intercept + coefficients.iter().zip(x).map(|(c, v)| c * v).sum::<f64>()
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

pub(crate) fn softmax_probs(intercepts: &[f64], weights: &[Vec<f64>], x: &[f64]) -> Vec<f64> {
    let logits: Vec<f64> = intercepts
        .iter()
        .zip(weights)
        .map(|(b, w)| linear(*b, w, x))
        .collect();
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Estimator {
    Ols,
    Logistic { l2: f64, max_iterations: usize },
    Softmax {
        classes: usize,
        l2: f64,
        iterations: usize,
        learning_rate: f64,
    },
}

impl Estimator {
    /// Fit on `x` / `y`. Returns `None` if the problem is singular.
    pub(crate) fn fit(&self, x: &[Vec<f64>], y: &[f64]) -> Option<Fitted> {
        match *self {
            Estimator::Ols => fit_ols(x, y),
            Estimator::Logistic { l2, max_iterations } => fit_logistic(x, y, l2, max_iterations),
            Estimator::Softmax {
                classes,
                l2,
                iterations,
                learning_rate,
            } => Some(fit_softmax(x, y, classes, l2, iterations, learning_rate)),
        }
    }

    /// Target rows in the same shape as `Fitted::predict` output.
    pub(crate) fn targets(&self, y: &[f64]) -> Vec<Vec<f64>> {
        match *self {
            Estimator::Softmax { classes, .. } => y
                .iter()
                .map(|&v| (0..classes).map(|k| f64::from(v as usize == k)).collect())
                .collect(),
            _ => y.iter().map(|&v| vec![v]).collect(),
        }
    }
}

fn width(x: &[Vec<f64>]) -> usize {
    x.first().map_or(0, Vec::len)
}

fn fit_ols(x: &[Vec<f64>], y: &[f64]) -> Option<Fitted> {
    let p = width(x) + 1;
    let mut xtx = vec![vec![0.0; p]; p];
    let mut xty = vec![0.0; p];
    for (row, &target) in x.iter().zip(y) {
        let aug: Vec<f64> = std::iter::once(1.0).chain(row.iter().copied()).collect();
        for i in 0..p {
            xty[i] += aug[i] * target;
            for j in i..p {
                xtx[i][j] += aug[i] * aug[j];
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            xtx[i][j] = xtx[j][i];
        }
    }
    let beta = solve_linear_system(xtx, xty)?;
    Some(Fitted::Linear {
        intercept: beta[0],
        coefficients: beta[1..].to_vec(),
    })
}

/// L2-regularised logistic regression by Newton-Raphson (IRLS).
/// The penalty keeps separable data from diverging; the intercept is not penalised.
fn fit_logistic(x: &[Vec<f64>], y: &[f64], l2: f64, max_iterations: usize) -> Option<Fitted> {
    let p = width(x) + 1;
    let mut beta = vec![0.0; p];

    for _ in 0..max_iterations {
        let mut grad = vec![0.0; p];
        let mut hess = vec![vec![0.0; p]; p];
        for (row, &target) in x.iter().zip(y) {
            let aug: Vec<f64> = std::iter::once(1.0).chain(row.iter().copied()).collect();
            let prob = sigmoid(linear(beta[0], &beta[1..], row));
            let w = (prob * (1.0 - prob)).max(1e-12);
            for i in 0..p {
                grad[i] += (prob - target) * aug[i];
                for j in 0..p {
                    hess[i][j] += w * aug[i] * aug[j];
                }
            }
        }
        for i in 1..p {
            grad[i] += l2 * beta[i];
            hess[i][i] += l2;
        }
        hess[0][0] += 1e-9;

        let step = solve_linear_system(hess, grad)?;
        let mut max_step = 0.0_f64;
        for (b, s) in beta.iter_mut().zip(&step) {
            *b -= s;
            max_step = max_step.max(s.abs());
        }
        if max_step < 1e-8 {
            break;
        }
    }

    Some(Fitted::Logistic {
        intercept: beta[0],
        coefficients: beta[1..].to_vec(),
    })
}

/// Multinomial logistic regression by batch gradient descent on standardised
/// features; the result is mapped back to raw feature scale.
fn fit_softmax(
    x: &[Vec<f64>],
    y: &[f64],
    classes: usize,
    l2: f64,
    iterations: usize,
    learning_rate: f64,
) -> Fitted {
    let n = x.len().max(1) as f64;
    let p = width(x);

    let means: Vec<f64> = (0..p)
        .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n)
        .collect();
    let sds: Vec<f64> = (0..p)
        .map(|j| {
            let var = x.iter().map(|r| (r[j] - means[j]).powi(2)).sum::<f64>() / n;
            if var > 0.0 {
                var.sqrt()
            } else {
                1.0
            }
        })
        .collect();
    let z: Vec<Vec<f64>> = x
        .iter()
        .map(|r| (0..p).map(|j| (r[j] - means[j]) / sds[j]).collect())
        .collect();

    let mut intercepts = vec![0.0; classes];
    let mut weights = vec![vec![0.0; p]; classes];
    for _ in 0..iterations {
        let mut grad_b = vec![0.0; classes];
        let mut grad_w = vec![vec![0.0; p]; classes];
        for (row, &target) in z.iter().zip(y) {
            let probs = softmax_probs(&intercepts, &weights, row);
            for k in 0..classes {
                let err = probs[k] - f64::from(target as usize == k);
                grad_b[k] += err;
                for j in 0..p {
                    grad_w[k][j] += err * row[j];
                }
            }
        }
        for k in 0..classes {
            intercepts[k] -= learning_rate * grad_b[k] / n;
            for j in 0..p {
                weights[k][j] -= learning_rate * (grad_w[k][j] / n + l2 * weights[k][j]);
            }
        }
    }

    let raw_weights: Vec<Vec<f64>> = weights
        .iter()
        .map(|w| (0..p).map(|j| w[j] / sds[j]).collect())
        .collect();
    let raw_intercepts: Vec<f64> = intercepts
        .iter()
        .zip(&weights)
        .map(|(b, w)| b - (0..p).map(|j| w[j] * means[j] / sds[j]).sum::<f64>())
        .collect();

    Fitted::Softmax {
        intercepts: raw_intercepts,
        weights: raw_weights,
    }
}

/// 1 - SSE/SST summed over all output columns.
/// A constant target scores 1.0 if reproduced exactly and 0.0 otherwise.
pub(crate) fn pseudo_r2(targets: &[Vec<f64>], predictions: &[Vec<f64>]) -> f64 {
    let n = targets.len();
    if n == 0 {
        return 0.0;
    }
    let cols = targets[0].len();
    let means: Vec<f64> = (0..cols)
        .map(|c| targets.iter().map(|t| t[c]).sum::<f64>() / n as f64)
        .collect();

    let mut sse = 0.0;
    let mut sst = 0.0;
    for (t, p) in targets.iter().zip(predictions) {
        for c in 0..cols {
            sse += (t[c] - p[c]).powi(2);
            sst += (t[c] - means[c]).powi(2);
        }
    }

    if sst <= f64::EPSILON {
        return if sse <= 1e-12 { 1.0 } else { 0.0 };
    }
    1.0 - sse / sst
}

/// Split `0..n` into `k` shuffled folds of held-out row indices.
pub(crate) fn kfold_indices(n: usize, k: usize, seed: u64) -> Vec<Vec<usize>> {
    let k = k.clamp(2, n.max(2)).min(n);
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let k = k.max(1);
    let mut folds = vec![Vec::new(); k];
    for (i, row) in order.into_iter().enumerate() {
        folds[i % k].push(row);
    }
    folds
}

/// Out-of-fold score of `estimator` on `x` / `y`.
/// Returns `None` if any training fold is singular.
pub(crate) fn cross_validate(
    estimator: &Estimator,
    x: &[Vec<f64>],
    y: &[f64],
    folds: usize,
    seed: u64,
) -> Option<f64> {
    let n = y.len();
    let targets = estimator.targets(y);
    let mut predictions: Vec<Vec<f64>> = vec![Vec::new(); n];

    for held_out in kfold_indices(n, folds, seed) {
        let mut is_held = vec![false; n];
        for &i in &held_out {
            is_held[i] = true;
        }
        let (train_x, train_y): (Vec<Vec<f64>>, Vec<f64>) = (0..n)
            .filter(|&i| !is_held[i])
            .map(|i| (x[i].clone(), y[i]))
            .unzip();
        let model = estimator.fit(&train_x, &train_y)?;
        for &i in &held_out {
            predictions[i] = model.predict(&x[i]);
        }
    }

    Some(pseudo_r2(&targets, &predictions))
}
