use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::flags::EmailFlags;
use super::ids::{EmailId, FolderPath, MessageId};

/// A single email as the monitor sees it (`SPEC_FULL.md` §3, component C1).
///
/// The monitor never fetches a body — only the configured field set
/// (at minimum REFERENCES | FLAGS | DATE, see §4.4) is represented here.
#[derive(Clone, Debug)]
pub struct Email {
    pub id: EmailId,
    pub message_id: Option<MessageId>,
    /// References/In-Reply-To ids, as fetched — does NOT include `message_id`
    /// itself. Use [`Email::ancestors`] (or the free function [`ancestors`])
    /// for the full closure key set.
    pub references: HashSet<MessageId>,
    pub date: DateTime<Utc>,
    pub flags: EmailFlags,
    pub folder_path: FolderPath,
}

impl Email {
    pub fn new(
        id: EmailId,
        message_id: Option<MessageId>,
        references: impl IntoIterator<Item = MessageId>,
        date: DateTime<Utc>,
        flags: EmailFlags,
        folder_path: FolderPath,
    ) -> Self {
        Self {
            id,
            message_id,
            references: references.into_iter().collect(),
            date,
            flags,
            folder_path,
        }
    }

    /// The message-id closure contribution of this email: its own
    /// Message-ID (if any) plus every References/In-Reply-To id. Always
    /// includes `self.message_id` when present — downstream merging in
    /// [`super::ConversationSet::add_all`] relies on this (§4.1).
    pub fn ancestors(&self) -> HashSet<MessageId> {
        let mut set = self.references.clone();
        if let Some(mid) = &self.message_id {
            set.insert(mid.clone());
        }
        set
    }

    pub fn is_unread(&self) -> bool {
        self.flags.contains(super::flags::EmailFlag::Unread)
    }

    pub fn is_flagged(&self) -> bool {
        self.flags.contains(super::flags::EmailFlag::Flagged)
    }

    pub fn is_draft(&self) -> bool {
        self.flags.contains(super::flags::EmailFlag::Draft)
    }
}

/// Free-function form of [`Email::ancestors`] (§4.1).
pub fn ancestors(email: &Email) -> HashSet<MessageId> {
    email.ancestors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::flags::EmailFlag;

    fn folder() -> FolderPath {
        FolderPath::from_delimited("INBOX", '/')
    }

    #[test]
    fn ancestors_always_includes_own_message_id() {
        let mid = MessageId::parse("a@b").unwrap();
        let e = Email::new(
            EmailId::new(1),
            Some(mid.clone()),
            [],
            Utc::now(),
            EmailFlags::empty(),
            folder(),
        );
        assert!(e.ancestors().contains(&mid));
    }

    #[test]
    fn ancestors_unions_references() {
        let mid = MessageId::parse("c@d").unwrap();
        let r1 = MessageId::parse("a@b").unwrap();
        let e = Email::new(
            EmailId::new(1),
            Some(mid.clone()),
            [r1.clone()],
            Utc::now(),
            EmailFlags::empty(),
            folder(),
        );
        let anc = e.ancestors();
        assert_eq!(anc.len(), 2);
        assert!(anc.contains(&mid));
        assert!(anc.contains(&r1));
    }

    #[test]
    fn ancestors_empty_when_no_ids() {
        let e = Email::new(
            EmailId::new(1),
            None,
            [],
            Utc::now(),
            EmailFlags::empty(),
            folder(),
        );
        assert!(e.ancestors().is_empty());
    }

    #[test]
    fn flag_predicates() {
        let e = Email::new(
            EmailId::new(1),
            None,
            [],
            Utc::now(),
            EmailFlags::from_flags([EmailFlag::Unread]),
            folder(),
        );
        assert!(e.is_unread());
        assert!(!e.is_flagged());
    }
}
