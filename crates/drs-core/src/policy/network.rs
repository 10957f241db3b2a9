//! Two-layer perceptron with hand-written backprop and Adam

use super::QNetwork;
use crate::models::{StateVector, NODE_COUNT, STATE_LEN};
use ndarray::{Array, Array1, Array2, ArrayView1, Dimension, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

const INIT_STD: f32 = 0.1;
const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const ADAM_EPS: f32 = 1e-8;

/// First and second moment estimates for one parameter tensor
#[derive(Debug, Clone)]
struct Moments<D: Dimension> {
    m: Array<f32, D>,
    v: Array<f32, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros_like(param: &Array<f32, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f32, D>, grad: &Array<f32, D>, lr: f32, t: i32) {
        let bias1 = 1.0 - BETA1.powi(t);
        let bias2 = 1.0 - BETA2.powi(t);
        Zip::from(param)
            .and(grad)
            .and(&mut self.m)
            .and(&mut self.v)
            .for_each(|p, &g, m, v| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *p -= lr * m_hat / (v_hat.sqrt() + ADAM_EPS);
            });
    }
}

#[derive(Debug, Clone)]
struct Adam {
    lr: f32,
    t: i32,
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix2>,
    b2: Moments<ndarray::Ix1>,
}

/// `STATE_LEN -> hidden (ReLU) -> NODE_COUNT`
#[derive(Debug, Clone)]
pub struct Mlp {
    w1: Array2<f32>,
    b1: Array1<f32>,
    w2: Array2<f32>,
    b2: Array1<f32>,
    adam: Adam,
}

struct Activations {
    pre: Array1<f32>,
    hidden: Array1<f32>,
    q: Array1<f32>,
}

impl Mlp {
    /// Weights drawn from N(0, 0.1), biases zero
    pub fn new<R: Rng>(hidden_units: usize, learning_rate: f32, rng: &mut R) -> Self {
        let hidden_units = hidden_units.max(1);
        let mut normal = || INIT_STD * rng.sample::<f32, _>(StandardNormal);
        let w1 = Array2::from_shape_simple_fn((hidden_units, STATE_LEN), &mut normal);
        let w2 = Array2::from_shape_simple_fn((NODE_COUNT, hidden_units), &mut normal);
        let b1 = Array1::zeros(hidden_units);
        let b2 = Array1::zeros(NODE_COUNT);

        let adam = Adam {
            lr: learning_rate,
            t: 0,
            w1: Moments::zeros_like(&w1),
            b1: Moments::zeros_like(&b1),
            w2: Moments::zeros_like(&w2),
            b2: Moments::zeros_like(&b2),
        };
        Self { w1, b1, w2, b2, adam }
    }

    pub fn hidden_units(&self) -> usize {
        self.b1.len()
    }

    fn activations(&self, input: ArrayView1<'_, f32>) -> Activations {
        let pre = self.w1.dot(&input) + &self.b1;
        let hidden = pre.mapv(|v| v.max(0.0));
        let q = self.w2.dot(&hidden) + &self.b2;
        Activations { pre, hidden, q }
    }
}

impl QNetwork for Mlp {
    fn forward(&self, state: &StateVector) -> [f32; NODE_COUNT] {
        let q = self.activations(ArrayView1::from(&state[..])).q;
        let mut out = [0.0; NODE_COUNT];
        for (slot, v) in out.iter_mut().zip(q.iter()) {
            *slot = *v;
        }
        out
    }

    fn train_batch(&mut self, states: &[StateVector], actions: &[usize], targets: &[f32]) -> f32 {
        let n = states.len().min(actions.len()).min(targets.len());
        if n == 0 {
            return 0.0;
        }

        let mut g_w1 = Array2::<f32>::zeros(self.w1.raw_dim());
        let mut g_b1 = Array1::<f32>::zeros(self.b1.raw_dim());
        let mut g_w2 = Array2::<f32>::zeros(self.w2.raw_dim());
        let mut g_b2 = Array1::<f32>::zeros(self.b2.raw_dim());
        let mut loss = 0.0;

        for i in 0..n {
            let input = ArrayView1::from(&states[i][..]);
            let act = self.activations(input);
            let a = actions[i].min(NODE_COUNT - 1);
            let err = act.q[a] - targets[i];
            loss += err * err;

            // d(mean squared error)/dq[a]; other outputs carry no gradient
            let dq = 2.0 * err / n as f32;
            g_w2.row_mut(a).scaled_add(dq, &act.hidden);
            g_b2[a] += dq;

            let mut d_pre = self.w2.row(a).to_owned() * dq;
            Zip::from(&mut d_pre)
                .and(&act.pre)
                .for_each(|d, &p| {
                    if p <= 0.0 {
                        *d = 0.0;
                    }
                });
            for (r, &d) in d_pre.iter().enumerate() {
                if d != 0.0 {
                    g_w1.row_mut(r).scaled_add(d, &input);
                }
            }
            g_b1 += &d_pre;
        }

        let adam = &mut self.adam;
        adam.t += 1;
        adam.w1.step(&mut self.w1, &g_w1, adam.lr, adam.t);
        adam.b1.step(&mut self.b1, &g_b1, adam.lr, adam.t);
        adam.w2.step(&mut self.w2, &g_w2, adam.lr, adam.t);
        adam.b2.step(&mut self.b2, &g_b2, adam.lr, adam.t);

        loss / n as f32
    }

    fn parameters(&self) -> Vec<f32> {
        self.w1
            .iter()
            .chain(self.b1.iter())
            .chain(self.w2.iter())
            .chain(self.b2.iter())
            .copied()
            .collect()
    }
}
