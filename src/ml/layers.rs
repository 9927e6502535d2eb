//! Minimal feed-forward building blocks with explicit backpropagation.
//!
//! Layers keep no activations between calls: `forward` returns its output and
//! the caller hands inputs and outputs back to `backward`. Gradients are
//! accumulated into each [`Param`] until the optimizer consumes them.
//!
//! Convolution tensors are time-major: element `(t, c)` of a sequence with
//! `C` channels lives at index `t * C + c`.

use rand::Rng;
use rand_distr::StandardNormal;

// ---------------------------------------------------------------------------
// Activations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, z: f64) -> f64 {
        match self {
            Activation::Linear => z,
            Activation::Relu => z.max(0.0),
            Activation::Sigmoid => sigmoid(z),
        }
    }

    /// Derivative expressed in terms of the activation's output `y`.
    pub fn derivative_from_output(self, y: f64) -> f64 {
        match self {
            Activation::Linear => 1.0,
            Activation::Relu => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
        }
    }
}

pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// ---------------------------------------------------------------------------
// Parameters + Adam
// ---------------------------------------------------------------------------

/// A trainable tensor with its gradient accumulator and Adam moments.
#[derive(Debug, Clone)]
pub struct Param {
    pub value: Vec<f64>,
    pub grad: Vec<f64>,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Param {
    pub fn new(value: Vec<f64>) -> Self {
        let n = value.len();
        Self {
            value,
            grad: vec![0.0; n],
            m: vec![0.0; n],
            v: vec![0.0; n],
        }
    }

    pub fn zeros(n: usize) -> Self {
        Self::new(vec![0.0; n])
    }

    /// Glorot-normal initialisation: N(0, 2 / (fan_in + fan_out)).
    pub fn glorot<R: Rng>(n: usize, fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
        let std = (2.0 / (fan_in + fan_out) as f64).sqrt();
        let value = (0..n)
            .map(|_| rng.sample::<f64, _>(StandardNormal) * std)
            .collect();
        Self::new(value)
    }

    pub fn zero_grad(&mut self) {
        self.grad.iter_mut().for_each(|g| *g = 0.0);
    }

    pub fn scale_grad(&mut self, factor: f64) {
        self.grad.iter_mut().for_each(|g| *g *= factor);
    }
}

/// Adam with the usual defaults (beta1 0.9, beta2 0.999, eps 1e-8).
#[derive(Debug, Clone)]
pub struct Adam {
    pub learning_rate: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    t: i32,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
        }
    }

    /// Apply one update to every parameter and clear its gradient.
    pub fn step(&mut self, params: &mut [&mut Param]) {
        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for p in params.iter_mut() {
            for i in 0..p.value.len() {
                let g = p.grad[i];
                p.m[i] = self.beta1 * p.m[i] + (1.0 - self.beta1) * g;
                p.v[i] = self.beta2 * p.v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = p.m[i] / bias1;
                let v_hat = p.v[i] / bias2;
                p.value[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.eps);
            }
            p.zero_grad();
        }
    }
}

// ---------------------------------------------------------------------------
// Dense
// ---------------------------------------------------------------------------

/// Fully connected layer, weights stored row-major `[output][input]`.
#[derive(Debug, Clone)]
pub struct Dense {
    pub inputs: usize,
    pub outputs: usize,
    pub activation: Activation,
    pub weights: Param,
    pub bias: Param,
}

impl Dense {
    pub fn new<R: Rng>(inputs: usize, outputs: usize, activation: Activation, rng: &mut R) -> Self {
        Self {
            inputs,
            outputs,
            activation,
            weights: Param::glorot(inputs * outputs, inputs, outputs, rng),
            bias: Param::zeros(outputs),
        }
    }

    pub fn forward(&self, x: &[f64]) -> Vec<f64> {
        debug_assert_eq!(x.len(), self.inputs);
        (0..self.outputs)
            .map(|j| {
                let row = &self.weights.value[j * self.inputs..(j + 1) * self.inputs];
                let z = self.bias.value[j] + row.iter().zip(x).map(|(w, xi)| w * xi).sum::<f64>();
                self.activation.apply(z)
            })
            .collect()
    }

    /// Accumulate gradients for one example; returns dL/dx.
    pub fn backward(&mut self, x: &[f64], y: &[f64], grad_out: &[f64]) -> Vec<f64> {
        let delta: Vec<f64> = y
            .iter()
            .zip(grad_out)
            .map(|(yj, g)| g * self.activation.derivative_from_output(*yj))
            .collect();
        self.backward_from_preactivation(x, &delta)
    }

    /// Same as [`Self::backward`] when dL/dz is already known.
    pub fn backward_from_preactivation(&mut self, x: &[f64], delta: &[f64]) -> Vec<f64> {
        let mut grad_in = vec![0.0; self.inputs];
        for (j, d) in delta.iter().enumerate() {
            if *d == 0.0 {
                continue;
            }
            self.bias.grad[j] += d;
            let base = j * self.inputs;
            for i in 0..self.inputs {
                self.weights.grad[base + i] += d * x[i];
                grad_in[i] += d * self.weights.value[base + i];
            }
        }
        grad_in
    }

    pub fn params_mut(&mut self) -> [&mut Param; 2] {
        [&mut self.weights, &mut self.bias]
    }
}

// ---------------------------------------------------------------------------
// Conv1d (same padding, stride 1)
// ---------------------------------------------------------------------------

/// 1-D convolution over time with zero "same" padding and ReLU output.
///
/// Weights are indexed `[out_channel][tap][in_channel]`.
#[derive(Debug, Clone)]
pub struct Conv1d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub weights: Param,
    pub bias: Param,
}

impl Conv1d {
    pub fn new<R: Rng>(in_channels: usize, out_channels: usize, kernel: usize, rng: &mut R) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            weights: Param::glorot(
                out_channels * kernel * in_channels,
                kernel * in_channels,
                kernel * out_channels,
                rng,
            ),
            bias: Param::zeros(out_channels),
        }
    }

    fn pad(&self) -> isize {
        (self.kernel / 2) as isize
    }

    fn w_index(&self, o: usize, k: usize, c: usize) -> usize {
        (o * self.kernel + k) * self.in_channels + c
    }

    pub fn forward(&self, x: &[f64], len: usize) -> Vec<f64> {
        debug_assert_eq!(x.len(), len * self.in_channels);
        let pad = self.pad();
        let mut out = vec![0.0; len * self.out_channels];
        for t in 0..len {
            for o in 0..self.out_channels {
                let mut z = self.bias.value[o];
                for k in 0..self.kernel {
                    let src = t as isize + k as isize - pad;
                    if src < 0 || src >= len as isize {
                        continue;
                    }
                    let src = src as usize;
                    for c in 0..self.in_channels {
                        z += self.weights.value[self.w_index(o, k, c)] * x[src * self.in_channels + c];
                    }
                }
                out[t * self.out_channels + o] = z.max(0.0);
            }
        }
        out
    }

    /// Accumulate gradients for one example; returns dL/dx.
    pub fn backward(&mut self, x: &[f64], y: &[f64], grad_out: &[f64], len: usize) -> Vec<f64> {
        let pad = self.pad();
        let mut grad_in = vec![0.0; len * self.in_channels];
        for t in 0..len {
            for o in 0..self.out_channels {
                let idx = t * self.out_channels + o;
                if y[idx] <= 0.0 {
                    continue;
                }
                let d = grad_out[idx];
                if d == 0.0 {
                    continue;
                }
                self.bias.grad[o] += d;
                for k in 0..self.kernel {
                    let src = t as isize + k as isize - pad;
                    if src < 0 || src >= len as isize {
                        continue;
                    }
                    let src = src as usize;
                    for c in 0..self.in_channels {
                        let w = self.w_index(o, k, c);
                        self.weights.grad[w] += d * x[src * self.in_channels + c];
                        grad_in[src * self.in_channels + c] += d * self.weights.value[w];
                    }
                }
            }
        }
        grad_in
    }

    pub fn params_mut(&mut self) -> [&mut Param; 2] {
        [&mut self.weights, &mut self.bias]
    }
}

// ---------------------------------------------------------------------------
// Pooling + dropout
// ---------------------------------------------------------------------------

/// Max pool of width 2 over time. A trailing odd step is dropped.
///
/// Returns the pooled tensor and, for each output element, the input index
/// that produced it.
pub fn max_pool2(x: &[f64], len: usize, channels: usize) -> (Vec<f64>, Vec<usize>) {
    let out_len = len / 2;
    let mut out = Vec::with_capacity(out_len * channels);
    let mut argmax = Vec::with_capacity(out_len * channels);
    for t in 0..out_len {
        for c in 0..channels {
            let a = (2 * t) * channels + c;
            let b = (2 * t + 1) * channels + c;
            let (i, v) = if x[b] > x[a] { (b, x[b]) } else { (a, x[a]) };
            out.push(v);
            argmax.push(i);
        }
    }
    (out, argmax)
}

/// Route pooled gradients back to the winning input positions.
pub fn max_pool2_backward(grad_out: &[f64], argmax: &[usize], input_size: usize) -> Vec<f64> {
    let mut grad_in = vec![0.0; input_size];
    for (g, &i) in grad_out.iter().zip(argmax) {
        grad_in[i] += g;
    }
    grad_in
}

/// Inverted-dropout mask: each entry is 0 with probability `rate`, otherwise
/// `1 / (1 - rate)`.
pub fn dropout_mask<R: Rng>(size: usize, rate: f64, rng: &mut R) -> Vec<f64> {
    if rate <= 0.0 {
        return vec![1.0; size];
    }
    let keep = 1.0 / (1.0 - rate);
    (0..size)
        .map(|_| if rng.gen::<f64>() < rate { 0.0 } else { keep })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn numeric_grad(f: impl Fn(f64) -> f64, at: f64) -> f64 {
        let h = 1e-6;
        (f(at + h) - f(at - h)) / (2.0 * h)
    }

    #[test]
    fn test_sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
        assert!(sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn test_dense_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Dense::new(3, 2, Activation::Sigmoid, &mut rng);
        let x = [0.3, -1.2, 0.8];

        // L = sum(y)
        let y = layer.forward(&x);
        let grad_in = layer.backward(&x, &y, &[1.0, 1.0]);

        let analytic_w = layer.weights.grad[1];
        let probe = layer.clone();
        let numeric_w = numeric_grad(
            |w| {
                let mut l = probe.clone();
                l.weights.value[1] = w;
                l.forward(&x).iter().sum()
            },
            probe.weights.value[1],
        );
        assert!((analytic_w - numeric_w).abs() < 1e-6);

        let numeric_x = numeric_grad(
            |v| {
                let mut xx = x;
                xx[2] = v;
                probe.forward(&xx).iter().sum()
            },
            x[2],
        );
        assert!((grad_in[2] - numeric_x).abs() < 1e-6);
    }

    #[test]
    fn test_conv_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut conv = Conv1d::new(2, 3, 3, &mut rng);
        conv.bias.value = vec![0.5; 3]; // keep units active
        let len = 4;
        let x: Vec<f64> = (0..len * 2).map(|i| (i as f64 * 0.37).sin()).collect();

        let y = conv.forward(&x, len);
        let ones = vec![1.0; y.len()];
        let grad_in = conv.backward(&x, &y, &ones, len);

        let probe = conv.clone();
        for w in [0, 5, 11] {
            let numeric = numeric_grad(
                |v| {
                    let mut c = probe.clone();
                    c.weights.value[w] = v;
                    c.forward(&x, len).iter().sum()
                },
                probe.weights.value[w],
            );
            assert!((conv.weights.grad[w] - numeric).abs() < 1e-5, "weight {w}");
        }

        let numeric_x = numeric_grad(
            |v| {
                let mut xx = x.clone();
                xx[3] = v;
                probe.forward(&xx, len).iter().sum()
            },
            x[3],
        );
        assert!((grad_in[3] - numeric_x).abs() < 1e-5);
    }

    #[test]
    fn test_max_pool_routes_gradient_to_winner() {
        // 5 steps, 1 channel: last step is dropped
        let x = [1.0, 3.0, 2.0, 0.5, 9.0];
        let (out, argmax) = max_pool2(&x, 5, 1);
        assert_eq!(out, vec![3.0, 2.0]);
        assert_eq!(argmax, vec![1, 2]);

        let grad = max_pool2_backward(&[10.0, 20.0], &argmax, 5);
        assert_eq!(grad, vec![0.0, 10.0, 20.0, 0.0, 0.0]);
    }

    #[test]
    fn test_adam_descends_quadratic() {
        // minimise (p - 3)^2
        let mut p = Param::new(vec![0.0]);
        let mut adam = Adam::new(0.1);
        for _ in 0..500 {
            p.grad[0] = 2.0 * (p.value[0] - 3.0);
            adam.step(&mut [&mut p]);
        }
        assert!((p.value[0] - 3.0).abs() < 0.1, "{}", p.value[0]);
        assert_eq!(p.grad[0], 0.0);
    }

    #[test]
    fn test_dropout_mask_scales_survivors() {
        let mut rng = StdRng::seed_from_u64(3);
        let mask = dropout_mask(10_000, 0.2, &mut rng);
        let dropped = mask.iter().filter(|m| **m == 0.0).count();
        assert!((1_700..2_300).contains(&dropped), "{dropped}");
        assert!(mask.iter().all(|m| *m == 0.0 || (*m - 1.25).abs() < 1e-12));
        assert!(dropout_mask(4, 0.0, &mut rng).iter().all(|m| *m == 1.0));
    }
}
