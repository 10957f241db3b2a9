//! Pod placement: classification, reward and the scheduling loop

mod profile;
mod reward;
mod scheduler;


pub use profile::{
    ProfileRule, ProfileTable, SubstringClassifier, WorkloadClassifier, WorkloadProfile,
};
pub use reward::{balance_reward, population_std};
pub use scheduler::{SchedulerConfig, SchedulingLoop};
