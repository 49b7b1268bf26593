//! Built-in optimizer steppers over the flat weight buffer.
//!
//! Every stepper evaluates the objective on the full buffer but only writes
//! indices inside the trainable ranges it is given. Gradient entries outside
//! those ranges are zeroed on arrival, so quasi-Newton directions never leak
//! into frozen parameters either.

use crate::error::TrainError;
use crate::training::strategy::{OptimizerConfig, OptimizerKind};
use std::ops::Range;

/// Loss and gradient of the objective at a candidate weight vector.
pub type ObjectiveFn<'a> = dyn FnMut(&[f32]) -> Result<(f64, Vec<f32>), TrainError> + 'a;

pub trait Optimizer {
    fn kind(&self) -> OptimizerKind;

    /// Perform one optimizer step in place.
    ///
    /// Returns the loss at the weights the step started from.
    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError>;
}

fn indices(trainable: &[Range<usize>]) -> impl Iterator<Item = usize> + '_ {
    trainable.iter().flat_map(Clone::clone)
}

fn evaluate(
    objective: &mut ObjectiveFn<'_>,
    weights: &[f32],
    trainable: &[Range<usize>],
) -> Result<(f64, Vec<f32>), TrainError> {
    let (loss, gradient) = objective(weights)?;
    if gradient.len() != weights.len() {
        return Err(TrainError::objective(format!(
            "gradient has {} entries, weights have {}",
            gradient.len(),
            weights.len()
        )));
    }
    let mut masked = vec![0.0; gradient.len()];
    for i in indices(trainable) {
        masked[i] = gradient[i];
    }
    Ok((loss, masked))
}

fn mismatch(expected: OptimizerKind, config: &OptimizerConfig) -> TrainError {
    TrainError::training(format!(
        "{expected} optimizer handed a {} config",
        config.kind()
    ))
}

fn ensure_len(buf: &mut Vec<f32>, len: usize) {
    if buf.len() != len {
        *buf = vec![0.0; len];
    }
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| x as f64 * y as f64).sum()
}

fn max_abs(v: &[f32]) -> f64 {
    v.iter().fold(0.0f64, |m, &x| m.max((x as f64).abs()))
}

/// Stochastic gradient descent with momentum.
#[derive(Debug, Default)]
pub struct Sgd {
    evals: usize,
    velocity: Option<Vec<f32>>,
}

impl Sgd {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for Sgd {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Sgd
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::Sgd(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let (loss, mut grad) = evaluate(objective, weights, trainable)?;

        let clr = p.learning_rate / (1.0 + self.evals as f64 * p.learning_rate_decay);
        let (wd, mom, damp) = (p.weight_decay as f32, p.momentum as f32, p.dampening as f32);

        for i in indices(trainable) {
            grad[i] += wd * weights[i];
        }
        if mom != 0.0 {
            let first = self.velocity.as_ref().is_none_or(|v| v.len() != weights.len());
            if first {
                self.velocity = Some(grad.clone());
            } else if let Some(v) = self.velocity.as_mut() {
                for i in indices(trainable) {
                    v[i] = mom * v[i] + (1.0 - damp) * grad[i];
                }
            }
            if let Some(v) = self.velocity.as_ref() {
                for i in indices(trainable) {
                    grad[i] = if p.nesterov { grad[i] + mom * v[i] } else { v[i] };
                }
            }
        }
        for i in indices(trainable) {
            weights[i] -= clr as f32 * grad[i];
        }
        self.evals += 1;
        Ok(loss)
    }
}

#[derive(Debug, Default)]
pub struct RmsProp {
    mean_square: Vec<f32>,
}

impl RmsProp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for RmsProp {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::RmsProp
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::RmsProp(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let (loss, grad) = evaluate(objective, weights, trainable)?;
        ensure_len(&mut self.mean_square, weights.len());

        let (lr, alpha, eps) = (p.learning_rate as f32, p.alpha as f32, p.epsilon as f32);
        for i in indices(trainable) {
            let m = &mut self.mean_square[i];
            *m = alpha * *m + (1.0 - alpha) * grad[i] * grad[i];
            weights[i] -= lr * grad[i] / (m.sqrt() + eps);
        }
        Ok(loss)
    }
}

#[derive(Debug, Default)]
pub struct Adagrad {
    evals: usize,
    variance: Vec<f32>,
}

impl Adagrad {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for Adagrad {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Adagrad
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::Adagrad(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let (loss, grad) = evaluate(objective, weights, trainable)?;
        ensure_len(&mut self.variance, weights.len());

        let clr = (p.learning_rate / (1.0 + self.evals as f64 * p.learning_rate_decay)) as f32;
        let wd = p.weight_decay as f32;
        for i in indices(trainable) {
            let g = grad[i] + wd * weights[i];
            self.variance[i] += g * g;
            weights[i] -= clr * g / (self.variance[i].sqrt() + 1e-10);
        }
        self.evals += 1;
        Ok(loss)
    }
}

/// Adam with bias correction.
#[derive(Debug, Default)]
pub struct Adam {
    t: i32,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for Adam {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Adam
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::Adam(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let (loss, grad) = evaluate(objective, weights, trainable)?;
        ensure_len(&mut self.m, weights.len());
        ensure_len(&mut self.v, weights.len());
        self.t += 1;

        let (b1, b2) = (p.beta1 as f32, p.beta2 as f32);
        let correction1 = 1.0 - p.beta1.powi(self.t);
        let correction2 = 1.0 - p.beta2.powi(self.t);
        let step_size = (p.learning_rate * correction2.sqrt() / correction1) as f32;
        for i in indices(trainable) {
            self.m[i] = b1 * self.m[i] + (1.0 - b1) * grad[i];
            self.v[i] = b2 * self.v[i] + (1.0 - b2) * grad[i] * grad[i];
            weights[i] -= step_size * self.m[i] / (self.v[i].sqrt() + p.epsilon as f32);
        }
        Ok(loss)
    }
}

#[derive(Debug, Default)]
pub struct Adadelta {
    variance: Vec<f32>,
    accumulated_delta: Vec<f32>,
}

impl Adadelta {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for Adadelta {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Adadelta
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::Adadelta(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let (loss, grad) = evaluate(objective, weights, trainable)?;
        ensure_len(&mut self.variance, weights.len());
        ensure_len(&mut self.accumulated_delta, weights.len());

        let (rho, eps, wd) = (p.rho as f32, p.epsilon as f32, p.weight_decay as f32);
        for i in indices(trainable) {
            let g = grad[i] + wd * weights[i];
            self.variance[i] = rho * self.variance[i] + (1.0 - rho) * g * g;
            let delta =
                (self.accumulated_delta[i] + eps).sqrt() / (self.variance[i] + eps).sqrt() * g;
            weights[i] -= delta;
            self.accumulated_delta[i] =
                rho * self.accumulated_delta[i] + (1.0 - rho) * delta * delta;
        }
        Ok(loss)
    }
}

const LBFGS_TOL_FUN: f64 = 1e-5;
const LBFGS_TOL_X: f64 = 1e-9;

/// Limited-memory BFGS with a fixed step size.
///
/// Curvature pairs survive across calls, so successive training iterations
/// keep refining the same inverse-Hessian estimate.
#[derive(Debug, Default)]
pub struct Lbfgs {
    steps: Vec<Vec<f32>>,
    dirs: Vec<Vec<f32>>,
    h_diag: f64,
    prev_grad: Option<Vec<f32>>,
    prev_step: Option<Vec<f32>>,
}

impl Lbfgs {
    pub fn new() -> Self {
        Self {
            h_diag: 1.0,
            ..Self::default()
        }
    }

    /// Number of stored curvature pairs.
    pub fn history_len(&self) -> usize {
        self.steps.len()
    }

    fn direction(&self, grad: &[f32]) -> Vec<f32> {
        let k = self.steps.len();
        let mut q: Vec<f32> = grad.iter().map(|g| -g).collect();
        let mut alphas = vec![0.0f64; k];
        let rhos: Vec<f64> = (0..k)
            .map(|i| 1.0 / dot(&self.dirs[i], &self.steps[i]))
            .collect();
        for i in (0..k).rev() {
            alphas[i] = dot(&self.steps[i], &q) * rhos[i];
            for (qj, yj) in q.iter_mut().zip(&self.dirs[i]) {
                *qj -= (alphas[i] * *yj as f64) as f32;
            }
        }
        for qj in q.iter_mut() {
            *qj = (*qj as f64 * self.h_diag) as f32;
        }
        for i in 0..k {
            let beta = dot(&self.dirs[i], &q) * rhos[i];
            for (qj, sj) in q.iter_mut().zip(&self.steps[i]) {
                *qj += ((alphas[i] - beta) * *sj as f64) as f32;
            }
        }
        q
    }

    fn remember(&mut self, grad: &[f32], corrections: usize) {
        let (Some(prev_grad), Some(step)) = (self.prev_grad.as_ref(), self.prev_step.as_ref())
        else {
            return;
        };
        if prev_grad.len() != grad.len() || step.len() != grad.len() {
            return;
        }
        let y: Vec<f32> = grad.iter().zip(prev_grad).map(|(g, p)| g - p).collect();
        let ys = dot(&y, step);
        if ys > 1e-10 {
            if self.steps.len() == corrections.max(1) {
                self.steps.remove(0);
                self.dirs.remove(0);
            }
            self.h_diag = ys / dot(&y, &y);
            self.steps.push(step.clone());
            self.dirs.push(y);
        }
    }
}

impl Optimizer for Lbfgs {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Lbfgs
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::Lbfgs(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let (start_loss, mut grad) = evaluate(objective, weights, trainable)?;
        let mut loss = start_loss;
        if max_abs(&grad) <= LBFGS_TOL_FUN {
            return Ok(start_loss);
        }

        for inner in 0..p.max_iter.max(1) {
            let first = self.prev_grad.is_none() && self.steps.is_empty();
            self.remember(&grad, p.n_correction);
            let d = self.direction(&grad);
            let t = if first {
                let l1: f64 = grad.iter().map(|g| (*g as f64).abs()).sum();
                (1.0f64).min(1.0 / l1) * p.learning_rate
            } else {
                p.learning_rate
            };

            if dot(&grad, &d) > -LBFGS_TOL_X {
                break;
            }

            let step: Vec<f32> = d.iter().map(|di| (*di as f64 * t) as f32).collect();
            for i in indices(trainable) {
                weights[i] += step[i];
            }
            self.prev_grad = Some(grad.clone());
            self.prev_step = Some(step);

            if inner + 1 == p.max_iter.max(1) {
                break;
            }
            let (next_loss, next_grad) = evaluate(objective, weights, trainable)?;
            let loss_change = (next_loss - loss).abs();
            loss = next_loss;
            grad = next_grad;

            if max_abs(&grad) <= LBFGS_TOL_FUN
                || self.prev_step.as_deref().is_some_and(|s| max_abs(s) <= LBFGS_TOL_X)
                || loss_change < LBFGS_TOL_X
            {
                break;
            }
        }
        tracing::trace!(loss, pairs = self.steps.len(), "L-BFGS step finished");
        Ok(start_loss)
    }
}

const ARMIJO_C1: f64 = 1e-4;

/// Nonlinear conjugate gradient (Polak-Ribière) with a backtracking line
/// search. `max_iter` bounds the objective evaluations spent per step.
#[derive(Debug, Default)]
pub struct ConjugateGradient {
    initial_step: Option<f64>,
}

impl ConjugateGradient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Optimizer for ConjugateGradient {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Cg
    }

    fn step(
        &mut self,
        weights: &mut [f32],
        trainable: &[Range<usize>],
        config: &OptimizerConfig,
        objective: &mut ObjectiveFn<'_>,
    ) -> Result<f64, TrainError> {
        let OptimizerConfig::Cg(p) = config else {
            return Err(mismatch(self.kind(), config));
        };
        let budget = p.max_iter.max(1);
        let (start_loss, mut grad) = evaluate(objective, weights, trainable)?;
        let mut loss = start_loss;
        let mut evals = 1;
        let mut d: Vec<f32> = grad.iter().map(|g| -g).collect();
        let mut t = self
            .initial_step
            .unwrap_or_else(|| 1.0 / (1.0 + dot(&grad, &grad).sqrt()));

        while evals < budget {
            let mut slope = dot(&grad, &d);
            if slope >= 0.0 {
                d = grad.iter().map(|g| -g).collect();
                slope = -dot(&grad, &grad);
            }
            if slope == 0.0 {
                break;
            }

            let mut accepted = None;
            while evals < budget {
                let mut candidate = weights.to_vec();
                for i in indices(trainable) {
                    candidate[i] += (t * d[i] as f64) as f32;
                }
                let (next_loss, next_grad) = evaluate(objective, &candidate, trainable)?;
                evals += 1;
                if next_loss <= loss + ARMIJO_C1 * t * slope {
                    accepted = Some((candidate, next_loss, next_grad));
                    break;
                }
                t *= 0.5;
            }
            let Some((candidate, next_loss, next_grad)) = accepted else {
                break;
            };

            for i in indices(trainable) {
                weights[i] = candidate[i];
            }
            let beta = (dot(&next_grad, &next_grad) - dot(&next_grad, &grad)) / dot(&grad, &grad);
            let beta = if beta.is_finite() { beta.max(0.0) } else { 0.0 };
            for (di, gi) in d.iter_mut().zip(&next_grad) {
                *di = (-(*gi as f64) + beta * *di as f64) as f32;
            }
            loss = next_loss;
            grad = next_grad;
            t *= 2.0;
        }
        self.initial_step = Some(t);
        tracing::trace!(loss, evals, "CG step finished");
        Ok(start_loss)
    }
}
