//! Epsilon-greedy DQN agent over four nodes

use super::{argmax, Mlp, PolicyConfig, QNetwork, ReplayBuffer, ReplaySnapshot};
use crate::models::{StateVector, Transition, NODE_COUNT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

/// Result of one learning step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearnOutcome {
    pub loss: f32,
    /// Learn calls so far, including this one
    pub learn_step: u64,
    /// The target network was refreshed after this step
    pub target_synced: bool,
}

/// Replay copy due for the snapshot file
#[derive(Debug)]
pub struct PendingSnapshot {
    path: PathBuf,
    snapshot: ReplaySnapshot,
}

impl PendingSnapshot {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn counter(&self) -> u64 {
        self.snapshot.counter()
    }

    /// Blocking file write, run it off the async workers
    pub fn write(&self) -> anyhow::Result<()> {
        self.snapshot.write_to(&self.path)
    }
}

pub struct DqnPolicy<N: QNetwork = Mlp> {
    config: PolicyConfig,
    eval: N,
    target: N,
    replay: ReplayBuffer,
    rng: StdRng,
    learn_steps: u64,
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl DqnPolicy<Mlp> {
    pub fn new(config: PolicyConfig) -> Self {
        let mut rng = rng_from(config.seed);
        let eval = Mlp::new(config.hidden_units, config.learning_rate, &mut rng);
        let replay = ReplayBuffer::new(config.replay_capacity);
        Self::assemble(config, eval, replay, rng)
    }
}

impl<N: QNetwork> DqnPolicy<N> {
    /// Policy around a caller-built network; the target starts as a copy
    pub fn with_network(config: PolicyConfig, eval: N) -> Self {
        let rng = rng_from(config.seed);
        let replay = ReplayBuffer::new(config.replay_capacity);
        Self::assemble(config, eval, replay, rng)
    }

    fn assemble(config: PolicyConfig, eval: N, replay: ReplayBuffer, rng: StdRng) -> Self {
        let target = eval.clone();
        Self {
            config,
            eval,
            target,
            replay,
            rng,
            learn_steps: 0,
        }
    }

    /// Replace the empty replay buffer, e.g. with one restored from disk
    pub fn with_replay(mut self, replay: ReplayBuffer) -> Self {
        self.replay = replay;
        self
    }

    pub fn eval_network(&self) -> &N {
        &self.eval
    }

    pub fn target_network(&self) -> &N {
        &self.target
    }

    pub fn replay(&self) -> &ReplayBuffer {
        &self.replay
    }

    pub fn learn_steps(&self) -> u64 {
        self.learn_steps
    }

    pub fn q_values(&self, state: &StateVector) -> [f32; NODE_COUNT] {
        self.eval.forward(state)
    }

    /// Greedy with probability epsilon, uniform over the nodes otherwise
    pub fn choose_action(&mut self, state: &StateVector) -> usize {
        if self.rng.gen::<f64>() < self.config.epsilon {
            argmax(&self.eval.forward(state))
        } else {
            self.rng.gen_range(0..NODE_COUNT)
        }
    }

    /// Store one transition.
    ///
    /// Once the buffer has wrapped and a snapshot path is configured, returns
    /// a copy of the buffer that the caller writes after releasing the policy.
    pub fn store_transition(&mut self, transition: Transition) -> Option<PendingSnapshot> {
        self.replay.push(transition);

        if !self.replay.has_wrapped() {
            return None;
        }
        let path = self.config.snapshot_path.clone()?;
        Some(PendingSnapshot {
            path,
            snapshot: self.replay.snapshot(),
        })
    }

    /// Enough transitions stored for a full batch
    pub fn ready_to_learn(&self) -> bool {
        self.replay.len() >= self.config.batch_size.max(1)
    }

    /// One gradient step on a batch sampled with replacement.
    ///
    /// `None` when the buffer is empty.
    pub fn learn(&mut self) -> Option<LearnOutcome> {
        let batch = self.replay.sample(self.config.batch_size.max(1), &mut self.rng);
        if batch.is_empty() {
            return None;
        }

        let mut states = Vec::with_capacity(batch.len());
        let mut actions = Vec::with_capacity(batch.len());
        let mut targets = Vec::with_capacity(batch.len());
        for t in batch {
            let next_q = self.target.forward(&t.next_state);
            let best_next = next_q[argmax(&next_q)];
            states.push(t.state);
            actions.push(t.action);
            targets.push(t.reward + self.config.gamma * best_next);
        }

        let loss = self.eval.train_batch(&states, &actions, &targets);
        self.learn_steps += 1;

        let interval = self.config.target_sync_interval;
        let target_synced = interval > 0 && self.learn_steps % interval == 0;
        if target_synced {
            self.target.copy_from(&self.eval);
        }

        Some(LearnOutcome {
            loss,
            learn_step: self.learn_steps,
            target_synced,
        })
    }
}
