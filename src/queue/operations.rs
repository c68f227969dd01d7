//! The operation verbs applied to a `ConversationSet` (`SPEC_FULL.md` §4.7,
//! component C7). Modeled as a tagged variant rather than a class hierarchy
//! (§9 Design Notes) so the queue can inspect kinds for coalescing without
//! downcasting.
//!
//! Two variants beyond the six named in §4.7 round out the set:
//! `ExpandConversations` is the follow-up step `RemoveOperation` enqueues to
//! re-materialize out-of-folder messages for a trimmed conversation, and
//! `FlagsChanged` applies `AccountAdapter::on_flags_changed` (§4.5) through
//! the same single-consumer queue so a flags update can never race a
//! structural mutation. Neither touches the threading graph, but both are
//! still mutations of the shared `ConversationSet` and so must go through
//! the queue per the single-writer invariant in §5.

use std::collections::HashMap;

use crate::model::{EmailFlags, EmailId, FolderPath, MessageId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    LocalLoad,
    Reseed,
    FillWindow,
    Append,
    Remove,
    ExternalAppend,
    ExpandConversations,
    FlagsChanged,
}

#[derive(Clone, Debug)]
pub enum Operation {
    LocalLoad,
    Reseed {
        reason: String,
    },
    FillWindow {
        is_insert: bool,
    },
    Append {
        ids: Vec<EmailId>,
    },
    Remove {
        ids: Vec<EmailId>,
    },
    ExternalAppend {
        folder: FolderPath,
        ids: Vec<EmailId>,
    },
    /// Enqueued by `RemoveOperation` for every trimmed conversation (§4.7).
    ExpandConversations {
        message_ids: Vec<MessageId>,
    },
    /// Enqueued by `Monitor::notify_flags_changed` (§4.5).
    FlagsChanged {
        folder: FolderPath,
        flags: HashMap<EmailId, EmailFlags>,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::LocalLoad => OperationKind::LocalLoad,
            Operation::Reseed { .. } => OperationKind::Reseed,
            Operation::FillWindow { .. } => OperationKind::FillWindow,
            Operation::Append { .. } => OperationKind::Append,
            Operation::Remove { .. } => OperationKind::Remove,
            Operation::ExternalAppend { .. } => OperationKind::ExternalAppend,
            Operation::ExpandConversations { .. } => OperationKind::ExpandConversations,
            Operation::FlagsChanged { .. } => OperationKind::FlagsChanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Operation::LocalLoad.kind(), OperationKind::LocalLoad);
        assert_eq!(
            Operation::FillWindow { is_insert: true }.kind(),
            OperationKind::FillWindow
        );
        assert_eq!(
            Operation::ExpandConversations { message_ids: vec![] }.kind(),
            OperationKind::ExpandConversations
        );
    }
}
