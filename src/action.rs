use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Created,
    Pending,
    Completed,
    Error,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Error)
    }
}

/// A single requested command. Lives only for the duration of its execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub id: u64,
    pub name: String,
    pub status: ActionStatus,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            status: ActionStatus::Created,
        }
    }

    pub fn start(&mut self) {
        self.status = ActionStatus::Pending;
    }

    pub fn finish(&mut self) {
        self.status = ActionStatus::Completed;
    }

    pub fn fail(&mut self) {
        self.status = ActionStatus::Error;
    }
}
