use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::email::Email;
use super::flags::EmailFlag;
use super::ids::{EmailId, FolderPath, MessageId};

/// Which emails in a Conversation a read accessor should consider
/// (`SPEC_FULL.md` §4.3). `InFolder`/`InFolderOutOfFolder` are relative to
/// the `home_folder` passed to the accessor — a Conversation has no notion
/// of "the" monitored folder of its own, since the same Conversation value
/// can in principle be inspected against different monitors in tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationFilter {
    /// Only emails physically stored in `home_folder`.
    InFolder,
    /// Emails in `home_folder`, plus out-of-folder emails pulled in via
    /// thread expansion (§4.8).
    InFolderOutOfFolder,
    /// Every email in the Conversation, regardless of folder.
    Anywhere,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ordering {
    NewestFirst,
    OldestFirst,
}

/// A set of Emails sharing a transitive Message-ID closure
/// (`SPEC_FULL.md` §3, component C3).
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    emails: HashMap<EmailId, Email>,
    /// Union of `ancestors()` across every email currently in the set.
    closure: HashSet<MessageId>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_email(email: Email) -> Self {
        let mut conv = Self::new();
        conv.insert(email);
        conv
    }

    /// Insert an email, recomputing the closure. No-op (besides the
    /// closure union, which is idempotent) if the email is already present.
    pub fn insert(&mut self, email: Email) {
        self.closure.extend(email.ancestors());
        self.emails.insert(email.id, email);
    }

    /// Update one email's flags in place. Flags never participate in the
    /// closure, so this never needs a reindex — only `ConversationSet`
    /// deciding whether to replace its arena entry.
    pub fn set_flags(&mut self, id: EmailId, flags: super::flags::EmailFlags) -> Option<Email> {
        let email = self.emails.get_mut(&id)?;
        email.flags = flags;
        Some(email.clone())
    }

    pub fn remove(&mut self, id: EmailId) -> Option<Email> {
        let removed = self.emails.remove(&id);
        if removed.is_some() {
            self.recompute_closure();
        }
        removed
    }

    fn recompute_closure(&mut self) {
        self.closure = self.emails.values().flat_map(|e| e.ancestors()).collect();
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn contains(&self, id: EmailId) -> bool {
        self.emails.contains_key(&id)
    }

    pub fn get(&self, id: EmailId) -> Option<&Email> {
        self.emails.get(&id)
    }

    pub fn emails(&self) -> impl Iterator<Item = &Email> {
        self.emails.values()
    }

    /// The Conversation's message-id closure (§3: "union of `ancestors`
    /// across its emails").
    pub fn closure(&self) -> &HashSet<MessageId> {
        &self.closure
    }

    pub fn get_message_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.closure.iter()
    }

    pub fn email_ids(&self) -> impl Iterator<Item = &EmailId> {
        self.emails.keys()
    }

    /// The oldest EmailId among this conversation's emails — used as the
    /// merge-survivor tie-break (§4.2 rule 5).
    pub fn oldest_email_id(&self) -> Option<EmailId> {
        self.emails.keys().min().copied()
    }

    /// Derived over ALL emails regardless of location — used by
    /// `ConversationSet`'s newest-date-descending ordering.
    pub fn newest_date(&self) -> Option<DateTime<Utc>> {
        self.emails.values().map(|e| e.date).max()
    }

    pub fn is_unread(&self) -> bool {
        self.emails.values().any(Email::is_unread)
    }

    pub fn is_flagged(&self) -> bool {
        self.emails.values().any(Email::is_flagged)
    }

    fn matches_location(
        email: &Email,
        home_folder: &FolderPath,
        location: LocationFilter,
        blacklist: &[FolderPath],
    ) -> bool {
        if blacklist.iter().any(|b| email.folder_path.is_descendant_of(b)) {
            return false;
        }
        match location {
            LocationFilter::Anywhere => true,
            LocationFilter::InFolder => &email.folder_path == home_folder,
            LocationFilter::InFolderOutOfFolder => true,
        }
    }

    /// Emails matching `location`/`blacklist`, in `ordering`.
    pub fn get_emails(
        &self,
        ordering: Ordering,
        home_folder: &FolderPath,
        location: LocationFilter,
        blacklist: &[FolderPath],
    ) -> Vec<&Email> {
        let mut out: Vec<&Email> = self
            .emails
            .values()
            .filter(|e| Self::matches_location(e, home_folder, location, blacklist))
            .collect();
        out.sort_by_key(|e| e.date);
        if matches!(ordering, Ordering::NewestFirst) {
            out.reverse();
        }
        out
    }

    /// The most recent non-blacklisted email matching `location`.
    pub fn get_latest_received(
        &self,
        home_folder: &FolderPath,
        location: LocationFilter,
        blacklist: &[FolderPath],
    ) -> Option<&Email> {
        self.emails
            .values()
            .filter(|e| Self::matches_location(e, home_folder, location, blacklist))
            .filter(|e| !e.is_draft())
            .max_by_key(|e| e.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::EmailId;

    fn email(id: u64, mid: &str, date_secs: i64, folder: &str) -> Email {
        Email::new(
            EmailId::new(id),
            crate::model::MessageId::parse(mid),
            [],
            DateTime::from_timestamp(date_secs, 0).unwrap(),
            crate::model::EmailFlags::empty(),
            FolderPath::from_delimited(folder, '/'),
        )
    }

    #[test]
    fn newest_date_is_max_across_all_emails() {
        let mut conv = Conversation::from_email(email(1, "a@b", 10, "INBOX"));
        conv.insert(email(2, "c@d", 20, "INBOX"));
        assert_eq!(conv.newest_date().unwrap().timestamp(), 20);
    }

    #[test]
    fn remove_recomputes_closure() {
        let mut conv = Conversation::from_email(email(1, "a@b", 10, "INBOX"));
        conv.insert(email(2, "c@d", 20, "INBOX"));
        assert_eq!(conv.closure().len(), 2);
        conv.remove(EmailId::new(2));
        assert_eq!(conv.closure().len(), 1);
        assert!(conv.closure().contains(&crate::model::MessageId::parse("a@b").unwrap()));
    }

    #[test]
    fn location_filter_excludes_blacklisted_folders() {
        let mut conv = Conversation::from_email(email(1, "a@b", 10, "INBOX"));
        conv.insert(email(2, "c@d", 20, "Trash"));
        let home = FolderPath::from_delimited("INBOX", '/');
        let blacklist = [FolderPath::from_delimited("Trash", '/')];

        let all = conv.get_emails(Ordering::NewestFirst, &home, LocationFilter::Anywhere, &blacklist);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, EmailId::new(1));
    }

    #[test]
    fn in_folder_filters_out_external_members() {
        let mut conv = Conversation::from_email(email(1, "a@b", 10, "INBOX"));
        conv.insert(email(2, "c@d", 20, "Archive"));
        let home = FolderPath::from_delimited("INBOX", '/');

        let in_folder = conv.get_emails(Ordering::NewestFirst, &home, LocationFilter::InFolder, &[]);
        assert_eq!(in_folder.len(), 1);
        assert_eq!(in_folder[0].id, EmailId::new(1));

        let anywhere = conv.get_emails(Ordering::NewestFirst, &home, LocationFilter::InFolderOutOfFolder, &[]);
        assert_eq!(anywhere.len(), 2);
    }
}
