use std::sync::atomic::{AtomicUsize, Ordering};

use super::types::Scheduler;
use crate::lib::{node::Node, tasks::types::Task};

/// Most unallocated memory among the candidates that fit; fewest tasks breaks ties.
#[derive(Debug, Default)]
pub struct MostFree;

impl Scheduler for MostFree {
    fn choose_worker(&self, candidates: &[Node], task: &Task) -> Option<String> {
        candidates
            .iter()
            .filter(|node| node.fits(task))
            .max_by(|a, b| {
                a.free_memory()
                    .cmp(&b.free_memory())
                    .then_with(|| b.task_count.cmp(&a.task_count))
            })
            .map(|node| node.address.clone())
    }
}

/// Fewest tasks among the candidates that fit.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl Scheduler for LeastLoaded {
    fn choose_worker(&self, candidates: &[Node], task: &Task) -> Option<String> {
        candidates
            .iter()
            .filter(|node| node.fits(task))
            .min_by_key(|node| node.task_count)
            .map(|node| node.address.clone())
    }
}

/// Cycles through the candidates that fit.
#[derive(Debug, Default)]
pub struct RoundRobin {
    last_worker: AtomicUsize,
}

impl Scheduler for RoundRobin {
    fn choose_worker(&self, candidates: &[Node], task: &Task) -> Option<String> {
        let eligible: Vec<&Node> = candidates.iter().filter(|node| node.fits(task)).collect();
        if eligible.is_empty() {
            return None;
        }

        let turn = self.last_worker.fetch_add(1, Ordering::Relaxed);
        Some(eligible[turn % eligible.len()].address.clone())
    }
}
