//! `MonitorEvent` and the broadcast wiring that carries it (`SPEC_FULL.md` §6).

use std::sync::Arc;

use crate::errors::MonitorError;
use crate::model::{Conversation, Email};

/// Every occurrence the Monitor can emit. Carried over a `tokio::sync::broadcast`
/// channel; a lagging subscriber sees `broadcast::error::RecvError::Lagged`
/// the way any `broadcast` consumer does — the Monitor does not buffer past
/// the channel's configured capacity (`MONITOR_EVENT_CHANNEL_CAPACITY`, §11).
#[derive(Clone, Debug)]
pub enum MonitorEvent {
    MonitoringStarted,
    MonitoringStopped { retrying: bool },
    ScanStarted { local_only: bool },
    ScanError { message: String },
    ScanCompleted { local_only: bool },
    /// At most once per monitoring session (§4.7 Reseed).
    SeedCompleted,
    ConversationsAdded(Vec<Arc<Conversation>>),
    ConversationAppended {
        conversation: Arc<Conversation>,
        new_emails: Vec<Email>,
    },
    ConversationTrimmed(Arc<Conversation>),
    ConversationRemoved(Arc<Conversation>),
    EmailFlagsChanged {
        conversation: Arc<Conversation>,
        email: Email,
    },
}

impl MonitorEvent {
    pub fn scan_error(err: &MonitorError) -> Self {
        MonitorEvent::ScanError {
            message: err.to_string(),
        }
    }
}
