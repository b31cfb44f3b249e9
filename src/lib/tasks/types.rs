use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

impl State {
    /// Completed and Failed tasks never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Completed | State::Failed)
    }
}

/// Identifies a task across the manager and every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identifies a single task event. Never interchangeable with a [`TaskId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub container_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub state: State,
    pub image: String,
    /// Requested cores, fractions allowed.
    #[serde(default)]
    pub cpu: f64,
    /// Requested memory in bytes.
    #[serde(default)]
    pub memory: u64,
    /// Requested disk in bytes.
    #[serde(default)]
    pub disk: u64,
    /// `KEY=VALUE` pairs passed to the container.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub exposed_ports: Vec<u16>,
    /// Container port (`80/tcp`) to host port.
    #[serde(default)]
    pub port_bindings: HashMap<String, String>,
    #[serde(default)]
    pub restart_policy: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_time: Option<DateTime<Utc>>,
}

impl Task {
    #[cfg(test)]
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            id: TaskId::new(),
            container_id: None,
            name: name.to_string(),
            state: State::Pending,
            image: image.to_string(),
            cpu: 0.0,
            memory: 0,
            disk: 0,
            env: Vec::new(),
            exposed_ports: Vec::new(),
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
        }
    }
}

/// A request to move a task to `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskEvent {
    pub id: EventId,
    pub state: State,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        Self {
            id: EventId::new(),
            state,
            timestamp: Utc::now(),
            task,
        }
    }

    /// The task snapshot carrying the state this event asks for.
    pub fn desired_task(&self) -> Task {
        let mut task = self.task.clone();
        task.state = self.state;
        task
    }
}

/// What the container runtime needs to know to start a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub cpu: f64,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub exposed_ports: Vec<u16>,
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
}

impl From<&Task> for ContainerConfig {
    fn from(task: &Task) -> Self {
        ContainerConfig {
            name: task.name.clone(),
            image: task.image.clone(),
            cpu: task.cpu,
            memory: i64::try_from(task.memory).unwrap_or(i64::MAX),
            disk: i64::try_from(task.disk).unwrap_or(i64::MAX),
            env: task.env.clone(),
            exposed_ports: task.exposed_ports.clone(),
            port_bindings: task.port_bindings.clone(),
            restart_policy: task.restart_policy.clone(),
            ..Default::default()
        }
    }
}
