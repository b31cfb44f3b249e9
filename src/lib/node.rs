use serde::{Deserialize, Serialize};

use crate::lib::{tasks::types::Task, worker::types::Stats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Worker,
}

/// A machine in the cluster as seen by the manager's scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// `host:port` of the machine's ingress.
    pub address: String,
    pub cores: f64,
    pub cores_allocated: f64,
    /// Bytes.
    pub memory: u64,
    pub memory_allocated: u64,
    /// Bytes.
    pub disk: u64,
    pub disk_allocated: u64,
    pub role: Role,
    pub task_count: u64,
}

impl Node {
    pub fn from_stats(address: &str, stats: &Stats) -> Self {
        Node {
            name: stats.hostname.clone(),
            address: address.to_string(),
            cores: stats.total_cpus as f64,
            cores_allocated: stats.cpu_allocated,
            memory: stats.total_memory,
            memory_allocated: stats.memory_allocated,
            disk: stats.total_disk,
            disk_allocated: stats.disk_allocated,
            role: Role::Worker,
            task_count: stats.task_count + stats.queue_depth,
        }
    }

    pub fn free_cores(&self) -> f64 {
        (self.cores - self.cores_allocated).max(0.0)
    }

    pub fn free_memory(&self) -> u64 {
        self.memory.saturating_sub(self.memory_allocated)
    }

    pub fn free_disk(&self) -> u64 {
        self.disk.saturating_sub(self.disk_allocated)
    }

    /// Whether the unallocated capacity covers every request of `task`.
    pub fn fits(&self, task: &Task) -> bool {
        self.role == Role::Worker
            && self.free_cores() >= task.cpu
            && self.free_memory() >= task.memory
            && self.free_disk() >= task.disk
    }

    /// Accounts for a task dispatched since the last stats report.
    pub fn allocate(&mut self, task: &Task) {
        self.cores_allocated += task.cpu;
        self.memory_allocated = self.memory_allocated.saturating_add(task.memory);
        self.disk_allocated = self.disk_allocated.saturating_add(task.disk);
        self.task_count += 1;
    }
}
