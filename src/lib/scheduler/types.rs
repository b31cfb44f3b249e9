use serde::Deserialize;

use super::scheduler::{LeastLoaded, MostFree, RoundRobin};
use crate::lib::{node::Node, tasks::types::Task};

/// Picks the worker a task is dispatched to.
pub trait Scheduler: Send + Sync {
    /// Returns the address of the chosen candidate, or `None` when no
    /// candidate can take the task.
    fn choose_worker(&self, candidates: &[Node], task: &Task) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    MostFree,
    LeastLoaded,
    RoundRobin,
}

impl SchedulerKind {
    pub fn build(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::MostFree => Box::new(MostFree),
            SchedulerKind::LeastLoaded => Box::new(LeastLoaded),
            SchedulerKind::RoundRobin => Box::new(RoundRobin::default()),
        }
    }
}
