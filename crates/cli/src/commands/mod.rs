pub mod nodes;
pub mod scheduler;
