//! Time-series convolutional classifier over a window of normalized samples.
//!
//! `window_length × 8` grid → conv(16, k=3) + ReLU → maxpool(2)
//! → conv(32, k=3) + ReLU → maxpool(2) → flatten → dense(32) + ReLU
//! → dropout → dense(1) + sigmoid.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use super::layers::{dropout_mask, max_pool2, max_pool2_backward, Activation, Adam, Conv1d, Dense, Param};
use crate::config::CnnConfig;
use crate::detect::DetectError;
use crate::telemetry::{FeatureVector, NUM_FEATURES};

const CONV1_FILTERS: usize = 16;
const CONV2_FILTERS: usize = 32;
const KERNEL: usize = 3;
const HIDDEN: usize = 32;

/// A labelled training window: `window_length` normalized samples, flattened
/// time-major, and whether it contains an anomaly.
#[derive(Debug, Clone)]
pub struct LabeledWindow {
    pub grid: Vec<f64>,
    pub anomalous: bool,
}

/// Cut training windows from an ordered corpus.
///
/// Windows are contiguous runs of `window_length` samples. A corpus shorter
/// than the window wraps around and yields exactly one window. When more
/// than `max_windows` starts exist they are evenly strided. A window is
/// anomalous when any of its samples is flagged.
pub fn cut_training_windows(
    normalized: &[FeatureVector],
    flagged: &[bool],
    window_length: usize,
    max_windows: usize,
) -> Vec<LabeledWindow> {
    let n = normalized.len();
    if n == 0 || window_length == 0 || max_windows == 0 {
        return Vec::new();
    }

    let starts = if n >= window_length { n - window_length + 1 } else { 1 };
    let take = starts.min(max_windows);

    (0..take)
        .map(|k| {
            let start = k * starts / take;
            let mut grid = Vec::with_capacity(window_length * NUM_FEATURES);
            let mut anomalous = false;
            for t in 0..window_length {
                let i = (start + t) % n;
                grid.extend_from_slice(&normalized[i]);
                anomalous |= flagged[i];
            }
            LabeledWindow { grid, anomalous }
        })
        .collect()
}

/// Final state of one fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CnnReport {
    pub epochs: usize,
    pub windows: usize,
    pub positive_windows: usize,
    /// Mean binary cross-entropy of the last epoch.
    pub loss: f64,
}

/// Intermediate tensors of one forward pass, kept for backprop.
struct Trace {
    c1: Vec<f64>,
    p1: Vec<f64>,
    p1_idx: Vec<usize>,
    c2: Vec<f64>,
    p2: Vec<f64>,
    p2_idx: Vec<usize>,
    hidden: Vec<f64>,
    mask: Vec<f64>,
    dropped: Vec<f64>,
    prob: f64,
}

#[derive(Debug, Clone)]
pub struct TimeSeriesCnn {
    window_length: usize,
    dropout: f64,
    conv1: Conv1d,
    conv2: Conv1d,
    dense: Dense,
    output: Dense,
    trained: bool,
}

impl TimeSeriesCnn {
    pub fn new<R: Rng>(config: &CnnConfig, rng: &mut R) -> Self {
        let flat = (config.window_length / 4) * CONV2_FILTERS;
        Self {
            window_length: config.window_length,
            dropout: config.dropout,
            conv1: Conv1d::new(NUM_FEATURES, CONV1_FILTERS, KERNEL, rng),
            conv2: Conv1d::new(CONV1_FILTERS, CONV2_FILTERS, KERNEL, rng),
            dense: Dense::new(flat, HIDDEN, Activation::Relu, rng),
            output: Dense::new(HIDDEN, 1, Activation::Sigmoid, rng),
            trained: false,
        }
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    fn forward<R: Rng>(&self, grid: &[f64], train_rng: Option<&mut R>) -> Trace {
        let len = self.window_length;
        let c1 = self.conv1.forward(grid, len);
        let (p1, p1_idx) = max_pool2(&c1, len, CONV1_FILTERS);
        let c2 = self.conv2.forward(&p1, len / 2);
        let (p2, p2_idx) = max_pool2(&c2, len / 2, CONV2_FILTERS);
        let hidden = self.dense.forward(&p2);

        let mask = match train_rng {
            Some(rng) => dropout_mask(hidden.len(), self.dropout, rng),
            None => vec![1.0; hidden.len()],
        };
        let dropped: Vec<f64> = hidden.iter().zip(&mask).map(|(h, m)| h * m).collect();
        let prob = self.output.forward(&dropped)[0];

        Trace {
            c1,
            p1,
            p1_idx,
            c2,
            p2,
            p2_idx,
            hidden,
            mask,
            dropped,
            prob,
        }
    }

    /// Forward + backward for one window; returns its cross-entropy.
    fn accumulate<R: Rng>(&mut self, window: &LabeledWindow, rng: &mut R) -> f64 {
        let len = self.window_length;
        let trace = self.forward(&window.grid, Some(rng));
        let y = if window.anomalous { 1.0 } else { 0.0 };
        let p = trace.prob.clamp(1e-7, 1.0 - 1e-7);
        let loss = -(y * p.ln() + (1.0 - y) * (1.0 - p).ln());

        // sigmoid + BCE: dL/dz = p - y
        let grad_dropped = self
            .output
            .backward_from_preactivation(&trace.dropped, &[trace.prob - y]);
        let grad_hidden: Vec<f64> = grad_dropped.iter().zip(&trace.mask).map(|(g, m)| g * m).collect();
        let grad_p2 = self.dense.backward(&trace.p2, &trace.hidden, &grad_hidden);
        let grad_c2 = max_pool2_backward(&grad_p2, &trace.p2_idx, trace.c2.len());
        let grad_p1 = self.conv2.backward(&trace.p1, &trace.c2, &grad_c2, len / 2);
        let grad_c1 = max_pool2_backward(&grad_p1, &trace.p1_idx, trace.c1.len());
        self.conv1.backward(&window.grid, &trace.c1, &grad_c1, len);

        loss
    }

    pub fn fit<R: Rng>(
        &mut self,
        windows: &[LabeledWindow],
        config: &CnnConfig,
        rng: &mut R,
    ) -> Result<CnnReport, DetectError> {
        if windows.is_empty() {
            return Err(DetectError::InsufficientData { needed: 1, have: 0 });
        }

        let mut adam = Adam::new(config.learning_rate);
        let mut order: Vec<usize> = (0..windows.len()).collect();
        let mut loss = f64::NAN;

        for epoch in 0..config.epochs {
            order.shuffle(rng);
            let mut epoch_loss = 0.0;
            for batch in order.chunks(config.batch_size) {
                for &i in batch {
                    epoch_loss += self.accumulate(&windows[i], rng);
                }
                let scale = 1.0 / batch.len() as f64;
                let mut params = self.params_mut();
                params.iter_mut().for_each(|p| p.scale_grad(scale));
                adam.step(&mut params);
            }

            loss = epoch_loss / windows.len() as f64;
            if !loss.is_finite() {
                return Err(DetectError::Diverged { model: "cnn", epoch });
            }
            debug!(model = "cnn", epoch, loss, "epoch complete");
        }

        self.trained = true;
        Ok(CnnReport {
            epochs: config.epochs,
            windows: windows.len(),
            positive_windows: windows.iter().filter(|w| w.anomalous).count(),
            loss,
        })
    }

    /// Probability in [0, 1] that the window contains an anomaly.
    pub fn predict(&self, window: &[FeatureVector]) -> Result<f64, DetectError> {
        if !self.trained {
            return Err(DetectError::ModelNotReady);
        }
        if window.len() != self.window_length {
            return Err(DetectError::WindowNotFull {
                have: window.len(),
                need: self.window_length,
            });
        }
        let grid: Vec<f64> = window.iter().flat_map(|v| v.iter().copied()).collect();
        let trace = self.forward::<rand::rngs::StdRng>(&grid, None);
        Ok(trace.prob)
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = Vec::with_capacity(8);
        params.extend(self.conv1.params_mut());
        params.extend(self.conv2.params_mut());
        params.extend(self.dense.params_mut());
        params.extend(self.output.params_mut());
        params
    }
}
