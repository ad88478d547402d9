//! Process-wide append-only event log.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::job::JobKey;

/// One published notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was published.
    pub timestamp: DateTime<Utc>,

    /// Human-readable message.
    pub message: String,

    /// Job the event is about, if any.
    pub job: Option<JobKey>,
}

/// Snapshot grouping of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventGroup {
    General,
    Transfer,
    Hosting,
}

impl Event {
    /// Group used when rendering the state file.
    pub fn group(&self) -> EventGroup {
        let lower = self.message.to_lowercase();
        if lower.contains("transfer") {
            EventGroup::Transfer
        } else if lower.contains("hosted") {
            EventGroup::Hosting
        } else {
            EventGroup::General
        }
    }
}

/// Ordered list of events. Appends from any task are serialized.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and echo it to the log.
    pub fn publish(&self, message: impl Into<String>, job: Option<JobKey>) {
        let message = message.into();
        match &job {
            Some(key) => info!(job = %key, "{}", message),
            None => info!("{}", message),
        }

        let event = Event {
            timestamp: Utc::now(),
            message,
            job,
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Copy of every event in publication order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages of every event attached to `key`, in order.
    pub fn messages_for(&self, key: &JobKey) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.job.as_ref() == Some(key))
            .map(|event| event.message.clone())
            .collect()
    }
}
