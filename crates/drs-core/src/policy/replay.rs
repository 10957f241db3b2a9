//! Fixed-capacity experience replay
//!
//! Slots are overwritten in insertion order once the buffer is full; the
//! insertion counter itself never wraps. After the first wrap the whole
//! buffer can be persisted as JSON on every insert. Persisting is split in
//! two: [`ReplayBuffer::snapshot`] copies the slots, [`ReplaySnapshot::write_to`]
//! does the file I/O, so the copy can leave any lock before it is written.

use crate::models::Transition;
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    slots: Vec<Transition>,
    capacity: usize,
    /// Total transitions ever stored
    counter: u64,
}

/// Copy of the buffer in its on-disk form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    counter: u64,
    capacity: usize,
    transitions: Vec<Transition>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            counter: 0,
        }
    }

    /// Store at slot `counter % capacity`
    pub fn push(&mut self, transition: Transition) {
        let slot = (self.counter % self.capacity as u64) as usize;
        if slot < self.slots.len() {
            self.slots[slot] = transition;
        } else {
            self.slots.push(transition);
        }
        self.counter += 1;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// The buffer has been overwritten at least once
    pub fn has_wrapped(&self) -> bool {
        self.counter > self.capacity as u64
    }

    pub fn get(&self, slot: usize) -> Option<&Transition> {
        self.slots.get(slot)
    }

    /// `batch_size` transitions drawn independently, with replacement, from
    /// the filled slots. Empty when nothing is stored.
    pub fn sample<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Vec<&Transition> {
        if self.slots.is_empty() {
            return Vec::new();
        }
        (0..batch_size)
            .map(|_| &self.slots[rng.gen_range(0..self.slots.len())])
            .collect()
    }

    pub fn snapshot(&self) -> ReplaySnapshot {
        ReplaySnapshot {
            counter: self.counter,
            capacity: self.capacity,
            transitions: self.slots.clone(),
        }
    }

    /// Restore a buffer written by [`ReplaySnapshot::write_to`].
    ///
    /// The stored transitions keep their slots; a snapshot taken with a
    /// different capacity is rejected.
    pub fn load_from_disk(path: &Path, capacity: usize) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read replay snapshot {:?}", path))?;
        let snapshot: ReplaySnapshot =
            serde_json::from_slice(&data).context("Failed to deserialize replay snapshot")?;

        let capacity = capacity.max(1);
        if snapshot.capacity != capacity || snapshot.transitions.len() > capacity {
            anyhow::bail!(
                "snapshot capacity {} does not match configured capacity {}",
                snapshot.capacity,
                capacity
            );
        }

        info!(
            path = %path.display(),
            transitions = snapshot.transitions.len(),
            counter = snapshot.counter,
            "Loaded replay buffer from disk"
        );
        Ok(Self {
            slots: snapshot.transitions,
            capacity,
            counter: snapshot.counter,
        })
    }
}

impl ReplaySnapshot {
    /// Transitions ever stored when the copy was taken
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Overwrite `path` with this copy (temp file + rename). Blocking.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let json = serde_json::to_vec(self).context("Failed to serialize replay buffer")?;

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
        file.write_all(&json)
            .context("Failed to write replay snapshot")?;
        file.sync_all().context("Failed to sync replay snapshot")?;

        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::STATE_LEN;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn transition(reward: f32) -> Transition {
        Transition {
            state: [reward; STATE_LEN],
            action: (reward as usize) % 4,
            reward,
            next_state: [0.0; STATE_LEN],
        }
    }

    #[test]
    fn test_slot_is_counter_mod_capacity() {
        let mut buffer = ReplayBuffer::new(100);
        for i in 0..250 {
            buffer.push(transition(i as f32));
        }
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.counter(), 250);
        // Slot 49 last written by insert 249, slot 50 by insert 150
        assert_eq!(buffer.get(49).unwrap().reward, 249.0);
        assert_eq!(buffer.get(50).unwrap().reward, 150.0);
    }

    #[test]
    fn test_has_wrapped_only_after_exceeding_capacity() {
        let mut buffer = ReplayBuffer::new(3);
        for i in 0..3 {
            buffer.push(transition(i as f32));
        }
        assert!(!buffer.has_wrapped());
        buffer.push(transition(3.0));
        assert!(buffer.has_wrapped());
    }

    #[test]
    fn test_sample_draws_from_filled_slots() {
        let mut buffer = ReplayBuffer::new(100);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(buffer.sample(32, &mut rng).is_empty());

        for i in 0..5 {
            buffer.push(transition(i as f32));
        }
        let batch = buffer.sample(32, &mut rng);
        assert_eq!(batch.len(), 32);
        assert!(batch.iter().all(|t| t.reward < 5.0));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replay").join("transition.json");
        let mut buffer = ReplayBuffer::new(4);
        for i in 0..6 {
            buffer.push(transition(i as f32));
        }

        let snapshot = buffer.snapshot();
        buffer.push(transition(6.0));
        snapshot.write_to(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());

        // Later pushes do not leak into an earlier copy
        let restored = ReplayBuffer::load_from_disk(&path, 4).unwrap();
        assert_eq!(restored.counter(), 6);
        assert_eq!(restored.len(), 4);
        assert_eq!(restored.get(0).unwrap().reward, 4.0);
        assert_eq!(buffer.get(0).unwrap().reward, 4.0);
        assert_eq!(restored.get(2).unwrap().reward, 2.0);
        assert_eq!(buffer.get(2).unwrap().reward, 6.0);
        assert!(ReplayBuffer::load_from_disk(&path, 8).is_err());
    }
}
