//! Placement decisions and outcome-driven learning
//!
//! `decide` answers from the pod cache or the policy without waiting on the
//! network. Each fresh decision spawns an evaluation task that waits for the
//! placement to settle, re-observes the cluster and hands the outcome to a
//! single learner task. The learner owns every update to the replay buffer,
//! the networks and the episode counter.
//!
//! Lock order: pod cache, then policy. Neither is held across an await, and
//! the replay snapshot is written only after the policy lock is released.

use super::profile::{ProfileTable, WorkloadClassifier};
use super::reward::balance_reward;
use crate::aggregator::ClusterStateAggregator;
use crate::error::SchedulingError;
use crate::models::{
    node_name, ClusterObservation, Decision, SchedulerStatus, StateVector, Transition, NODE_FIELDS,
};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::policy::{DqnPolicy, Mlp, PendingSnapshot, QNetwork};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Evaluated placements per episode (default: 100)
    pub episode_length: u32,
    /// Wait between a placement and its evaluation (default: 5s)
    pub settle_delay: Duration,
    /// Append-only `Action: <a>, Reward: <r>` log
    pub reward_log: Option<PathBuf>,
    /// Outcomes buffered for the learner
    pub outcome_queue: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            episode_length: 100,
            settle_delay: Duration::from_secs(5),
            reward_log: None,
            outcome_queue: 256,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct EpisodeState {
    step: u32,
    done: bool,
    completed: u64,
    last_reward: Option<f32>,
}

/// A settled placement waiting to be learned from
struct Outcome {
    state: StateVector,
    action: usize,
    observation: ClusterObservation,
}

struct Shared<N: QNetwork> {
    config: SchedulerConfig,
    aggregator: Arc<ClusterStateAggregator>,
    policy: Mutex<DqnPolicy<N>>,
    classifier: Arc<dyn WorkloadClassifier>,
    profiles: ProfileTable,
    pods: Mutex<HashMap<String, usize>>,
    episode: Mutex<EpisodeState>,
    outcomes: mpsc::Sender<Outcome>,
    shutdown: broadcast::Sender<()>,
    /// Evaluations finished, whether learned from or dropped
    processed: watch::Sender<u64>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

/// Handle to the scheduling loop; clones share the same state
pub struct SchedulingLoop<N: QNetwork = Mlp> {
    inner: Arc<Shared<N>>,
}

impl<N: QNetwork> Clone for SchedulingLoop<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: QNetwork + 'static> SchedulingLoop<N> {
    /// Take the first cluster observation and start the learner.
    ///
    /// Fails when any node cannot be observed. The learner and all pending
    /// evaluations stop when `shutdown` fires.
    pub async fn start(
        aggregator: Arc<ClusterStateAggregator>,
        policy: DqnPolicy<N>,
        classifier: Arc<dyn WorkloadClassifier>,
        profiles: ProfileTable,
        config: SchedulerConfig,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<(Self, JoinHandle<()>), SchedulingError> {
        aggregator.refresh().await?;

        let (outcomes, outcome_rx) = mpsc::channel(config.outcome_queue.max(1));
        let (processed, _) = watch::channel(0);
        let inner = Arc::new(Shared {
            config,
            aggregator,
            policy: Mutex::new(policy),
            classifier,
            profiles,
            pods: Mutex::new(HashMap::new()),
            episode: Mutex::new(EpisodeState::default()),
            outcomes,
            shutdown: shutdown.clone(),
            processed,
            metrics: SchedulerMetrics::new(),
            logger: StructuredLogger::new("scheduler"),
        });

        let learner = tokio::spawn(
            run_learner(Arc::clone(&inner), outcome_rx, shutdown.subscribe())
                .instrument(tracing::info_span!("learner")),
        );
        Ok((Self { inner }, learner))
    }

    /// Node for `pod`. Repeats within an episode return the cached node
    /// and trigger nothing else.
    pub fn decide(&self, pod: &str) -> Result<Decision, SchedulingError> {
        let inner = &self.inner;
        let mut pods = lock(&inner.pods);

        if let Some(&action) = pods.get(pod) {
            let node = node_name(action);
            inner.metrics.inc_decisions(&node, true);
            inner.logger.log_decision(pod, "cached", &node, true);
            return Ok(Decision {
                action,
                node,
                cached: true,
            });
        }

        let observation = inner
            .aggregator
            .current()
            .ok_or(SchedulingError::NoObservation)?;
        let profile = inner.classifier.classify(pod);
        let state = observation.with_footprint(&inner.profiles.footprint(profile));
        let action = lock(&inner.policy).choose_action(&state);
        pods.insert(pod.to_string(), action);
        drop(pods);

        let node = node_name(action);
        inner.metrics.inc_decisions(&node, false);
        inner.logger.log_decision(pod, profile.as_str(), &node, false);
        self.spawn_evaluation(pod, state, action);

        Ok(Decision {
            action,
            node,
            cached: false,
        })
    }

    fn spawn_evaluation(&self, pod: &str, state: StateVector, action: usize) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = inner.shutdown.subscribe();
        let span = tracing::info_span!("evaluate", pod = %pod, action);

        tokio::spawn(
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(inner.config.settle_delay) => {}
                    _ = shutdown.recv() => {
                        debug!("Evaluation cancelled by shutdown");
                        return;
                    }
                }

                match inner.aggregator.refresh().await {
                    Ok(observation) => {
                        let outcome = Outcome {
                            state,
                            action,
                            observation,
                        };
                        if inner.outcomes.send(outcome).await.is_err() {
                            debug!("Learner stopped, outcome discarded");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Cluster observation failed, dropping evaluation");
                        inner.metrics.inc_evaluation_failures();
                        inner.mark_processed();
                    }
                }
            }
            .instrument(span),
        );
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = &self.inner;
        let cached_pods = lock(&inner.pods).len();
        let (transitions_stored, replay_len, learn_steps) = {
            let policy = lock(&inner.policy);
            (
                policy.replay().counter(),
                policy.replay().len(),
                policy.learn_steps(),
            )
        };
        let episode = lock(&inner.episode);

        SchedulerStatus {
            episode_step: episode.step,
            episode_length: inner.config.episode_length,
            episode_done: episode.done,
            episodes_completed: episode.completed,
            transitions_stored,
            replay_len,
            learn_steps,
            cached_pods,
            last_reward: episode.last_reward,
            observed_at: inner.aggregator.observed_at(),
        }
    }

    pub fn cached_action(&self, pod: &str) -> Option<usize> {
        lock(&self.inner.pods).get(pod).copied()
    }

    pub fn cached_pods(&self) -> usize {
        lock(&self.inner.pods).len()
    }

    /// Wait until `count` evaluations have finished since start
    pub async fn wait_for_evaluations(&self, count: u64) {
        let mut rx = self.inner.processed.subscribe();
        // The sender lives in `inner`, so the channel cannot close here
        let _ = rx.wait_for(|processed| *processed >= count).await;
    }
}

impl<N: QNetwork> Shared<N> {
    fn mark_processed(&self) {
        self.processed.send_modify(|n| *n += 1);
    }

    async fn absorb(&self, outcome: Outcome) {
        let reward = balance_reward(&outcome.observation);
        self.append_reward_log(outcome.action, reward).await;

        let transition = Transition {
            state: outcome.state,
            action: outcome.action,
            reward,
            next_state: outcome.observation.with_footprint(&[0.0; NODE_FIELDS]),
        };
        let (learned, replay_len, pending) = {
            let mut policy = lock(&self.policy);
            let pending = policy.store_transition(transition);
            let learned = if policy.ready_to_learn() {
                policy.learn()
            } else {
                None
            };
            (learned, policy.replay().len(), pending)
        };
        if let Some(pending) = pending {
            persist_replay(pending).await;
        }

        self.metrics.observe_reward(reward);
        self.metrics.set_replay_len(replay_len);
        if let Some(outcome) = learned {
            self.metrics.observe_learn_step(outcome.loss);
            if outcome.target_synced {
                self.logger.log_target_synced(outcome.learn_step);
            }
        }

        let episode_over = {
            let mut episode = lock(&self.episode);
            episode.step += 1;
            episode.last_reward = Some(reward);
            self.metrics.set_episode_step(episode.step);
            self.logger.log_reward(outcome.action, reward, episode.step);
            if episode.step >= self.config.episode_length {
                episode.done = true;
            }
            episode.done
        };
        if episode_over {
            self.reset_episode().await;
        }

        self.mark_processed();
    }

    async fn reset_episode(&self) {
        let cleared = {
            let mut pods = lock(&self.pods);
            let cleared = pods.len();
            pods.clear();
            cleared
        };

        if let Err(e) = self.aggregator.refresh().await {
            warn!(error = %e, "Refresh at episode reset failed, keeping previous observation");
        }

        let completed = {
            let mut episode = lock(&self.episode);
            episode.step = 0;
            episode.done = false;
            episode.completed += 1;
            episode.completed
        };
        self.metrics.set_episode_step(0);
        self.metrics.inc_episodes_completed();
        self.logger.log_episode_reset(completed, cleared);
    }

    async fn append_reward_log(&self, action: usize, reward: f32) {
        let Some(path) = &self.config.reward_log else {
            return;
        };
        let line = format!("Action: {action}, Reward: {reward}\n");
        if let Err(e) = append_line(path, &line).await {
            warn!(path = %path.display(), error = %e, "Failed to append reward log");
        }
    }
}

/// Write the snapshot on the blocking pool; failures are only logged
async fn persist_replay(pending: PendingSnapshot) {
    let path = pending.path().to_path_buf();
    match tokio::task::spawn_blocking(move || pending.write()).await {
        Ok(Ok(())) => debug!(path = %path.display(), "Replay snapshot written"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Failed to persist replay buffer"),
        Err(e) => warn!(error = %e, "Replay snapshot task failed"),
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

async fn run_learner<N: QNetwork>(
    inner: Arc<Shared<N>>,
    mut outcomes: mpsc::Receiver<Outcome>,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("Starting learner");
    loop {
        tokio::select! {
            Some(outcome) = outcomes.recv() => inner.absorb(outcome).await,
            _ = shutdown.recv() => {
                info!("Shutting down learner");
                break;
            }
        }
    }
}
