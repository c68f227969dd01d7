use std::collections::HashMap;
use std::sync::Arc;

use super::conversation::Conversation;
use super::email::Email;
use super::ids::{EmailId, FolderPath, MessageId};
use crate::errors::{MonitorError, MonitorResult};

/// Opaque handle into the arena. Conversations never hold a reference back
/// to the set that owns them (`SPEC_FULL.md` §9 "weak back-references") —
/// this handle is the only thing that ties a `Conversation` value to its
/// place in the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ConversationHandle(u64);

/// Result of a single [`ConversationSet::add_all`] batch (§4.2).
#[derive(Debug, Default)]
pub struct AddAllOutcome {
    pub added: Vec<Arc<Conversation>>,
    /// Each entry is the (post-mutation) survivor conversation together with
    /// the emails newly attributed to it in this batch.
    pub appended: Vec<(Arc<Conversation>, Vec<Email>)>,
    pub removed_by_merge: Vec<Arc<Conversation>>,
}

/// Result of a single [`ConversationSet::remove`] batch (§4.2).
#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// Snapshot of each conversation as it was immediately before its last
    /// email was removed (an empty `Conversation` wouldn't tell a consumer
    /// anything useful).
    pub removed: Vec<Arc<Conversation>>,
    /// Post-mutation state of every conversation that lost an email but
    /// still has at least one left.
    pub trimmed: Vec<Arc<Conversation>>,
}

/// The in-memory index described in `SPEC_FULL.md` §3/§4.2 (component C2):
/// an arena of Conversations plus two flat hash indices, never bidirectional
/// smart pointers (§9).
#[derive(Debug, Default)]
pub struct ConversationSet {
    arena: HashMap<ConversationHandle, Arc<Conversation>>,
    by_email_id: HashMap<EmailId, ConversationHandle>,
    by_message_id: HashMap<MessageId, ConversationHandle>,
    next_handle: u64,
}

impl ConversationSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_handle(&mut self) -> ConversationHandle {
        let h = ConversationHandle(self.next_handle);
        self.next_handle += 1;
        h
    }

    fn index(&mut self, handle: ConversationHandle, conv: &Conversation) {
        for id in conv.email_ids() {
            self.by_email_id.insert(*id, handle);
        }
        for mid in conv.get_message_ids() {
            self.by_message_id.insert(mid.clone(), handle);
        }
    }

    /// Thread a batch of incoming emails into the set, following the
    /// algorithm in §4.2. `_source_folder` is accepted because callers pass
    /// the folder the batch came from; the algorithm itself is
    /// folder-agnostic.
    ///
    /// Returns `Err(MonitorError::Invariant(_))` if the `by_message_id` index
    /// ever points at a handle the arena no longer has — a corrupted index is
    /// a bug (§7), reported through the normal `scan_error` path rather than
    /// panicking and taking the whole process down with it.
    pub fn add_all(&mut self, emails: Vec<Email>, _source_folder: &FolderPath) -> MonitorResult<AddAllOutcome> {
        let mut outcome = AddAllOutcome::default();

        let mut seen_ids = std::collections::HashSet::new();
        for email in emails {
            if !seen_ids.insert(email.id) {
                continue; // step 1: collapse duplicate EmailIds within the batch
            }

            let mut keys = email.ancestors();
            if keys.is_empty() {
                keys.insert(MessageId::synthetic(email.id));
            }

            let mut matched: Vec<ConversationHandle> = Vec::new();
            for key in &keys {
                if let Some(&h) = self.by_message_id.get(key) {
                    if !matched.contains(&h) {
                        matched.push(h);
                    }
                }
            }

            match matched.len() {
                0 => {
                    let handle = self.alloc_handle();
                    let conv = Conversation::from_email(email);
                    self.index(handle, &conv);
                    let arc = Arc::new(conv);
                    self.arena.insert(handle, arc.clone());
                    outcome.added.push(arc);
                }
                1 => {
                    let handle = matched[0];
                    let existing = self.arena.get(&handle).cloned().ok_or_else(|| {
                        MonitorError::Invariant(format!(
                            "by_message_id pointed at conversation handle {handle:?} missing from the arena"
                        ))
                    })?;
                    let mut conv = (*existing).clone();
                    conv.insert(email.clone());
                    self.index(handle, &conv);
                    let arc = Arc::new(conv);
                    self.arena.insert(handle, arc.clone());
                    outcome.appended.push((arc, vec![email]));
                }
                _ => {
                    self.merge_and_insert(&matched, email, &mut outcome)?;
                }
            }
        }

        Ok(outcome)
    }

    /// §4.2 rule 5: survivor = largest email count, ties broken by oldest
    /// EmailId; absorbed conversations merge into it in a deterministic
    /// order (by handle, which is allocation order — stable for a given
    /// input sequence).
    ///
    /// Every `by_message_id` lookup here is fallible: a handle the index
    /// names but the arena no longer holds is an invariant violation (§7),
    /// surfaced as `Err(MonitorError::Invariant(_))` rather than a panic.
    fn merge_and_insert(
        &mut self,
        matched: &[ConversationHandle],
        email: Email,
        outcome: &mut AddAllOutcome,
    ) -> MonitorResult<()> {
        let mut candidates: Vec<(ConversationHandle, Arc<Conversation>)> = matched
            .iter()
            .map(|&h| {
                self.arena.get(&h).cloned().map(|c| (h, c)).ok_or_else(|| {
                    MonitorError::Invariant(format!(
                        "by_message_id referenced conversation handle {h:?} missing from the arena"
                    ))
                })
            })
            .collect::<MonitorResult<Vec<_>>>()?;

        candidates.sort_by(|(ha, ca), (hb, cb)| {
            cb.len()
                .cmp(&ca.len())
                .then_with(|| ca.oldest_email_id().cmp(&cb.oldest_email_id()))
                .then_with(|| ha.0.cmp(&hb.0))
        });

        let survivor_handle = candidates[0].0;
        let mut survivor = (*candidates[0].1).clone();
        let mut merged_emails = Vec::new();

        for (absorbed_handle, _) in &candidates[1..] {
            let absorbed = self.arena.remove(absorbed_handle).ok_or_else(|| {
                MonitorError::Invariant(format!(
                    "conversation handle {absorbed_handle:?} vanished mid-merge"
                ))
            })?;
            for mid in absorbed.closure() {
                if self.by_message_id.get(mid) == Some(absorbed_handle) {
                    self.by_message_id.remove(mid);
                }
            }
            for id in absorbed.email_ids() {
                self.by_email_id.remove(id);
            }
            for e in absorbed.emails() {
                merged_emails.push(e.clone());
                survivor.insert(e.clone());
            }
            outcome.removed_by_merge.push(absorbed);
        }

        merged_emails.push(email.clone());
        survivor.insert(email);

        self.index(survivor_handle, &survivor);
        let arc = Arc::new(survivor);
        self.arena.insert(survivor_handle, arc.clone());
        // Survivor always pre-exists a merge (matched.len() >= 2 implies at
        // least one prior conversation already held one of the keys), so we
        // always emit `appended` here, never `added`.
        outcome.appended.push((arc, merged_emails));
        Ok(())
    }

    /// Remove a batch of emails (§4.2). Removing a bridging email never
    /// splits a Conversation, by design (§4.2 note, §9 Open Question).
    pub fn remove(&mut self, email_ids: &[EmailId]) -> RemoveOutcome {
        let mut per_handle: HashMap<ConversationHandle, (Arc<Conversation>, Vec<EmailId>)> =
            HashMap::new();
        for &id in email_ids {
            if let Some(&handle) = self.by_email_id.get(&id) {
                per_handle
                    .entry(handle)
                    .or_insert_with(|| (self.arena.get(&handle).unwrap().clone(), Vec::new()))
                    .1
                    .push(id);
            }
        }

        let mut outcome = RemoveOutcome::default();
        for (handle, (original, ids)) in per_handle {
            let mut updated = (*original).clone();
            for id in &ids {
                updated.remove(*id);
                self.by_email_id.remove(id);
            }

            if updated.is_empty() {
                for mid in original.closure() {
                    if self.by_message_id.get(mid) == Some(&handle) {
                        self.by_message_id.remove(mid);
                    }
                }
                self.arena.remove(&handle);
                outcome.removed.push(original);
            } else {
                for mid in original.closure() {
                    if !updated.closure().contains(mid) && self.by_message_id.get(mid) == Some(&handle) {
                        self.by_message_id.remove(mid);
                    }
                }
                let arc = Arc::new(updated);
                self.arena.insert(handle, arc.clone());
                outcome.trimmed.push(arc);
            }
        }

        outcome
    }

    /// Apply a flags update delivered by `AccountAdapter::on_flags_changed`
    /// (§4.5). Not one of the six §4.7 operation verbs — flags never touch
    /// the closure, so this skips `add_all`/`remove` entirely and just
    /// refreshes the owning Conversation in place.
    pub fn update_flags(
        &mut self,
        id: EmailId,
        flags: super::flags::EmailFlags,
    ) -> Option<(Arc<Conversation>, Email)> {
        let handle = *self.by_email_id.get(&id)?;
        let mut conv = (**self.arena.get(&handle)?).clone();
        let email = conv.set_flags(id, flags)?;
        let arc = Arc::new(conv);
        self.arena.insert(handle, arc.clone());
        Some((arc, email))
    }

    pub fn has_message_id(&self, mid: &MessageId) -> bool {
        self.by_message_id.contains_key(mid)
    }

    pub fn get_by_email_id(&self, id: EmailId) -> Option<Arc<Conversation>> {
        self.by_email_id
            .get(&id)
            .and_then(|h| self.arena.get(h))
            .cloned()
    }

    pub fn size(&self) -> usize {
        self.arena.len()
    }

    pub fn email_count(&self) -> usize {
        self.arena.values().map(|c| c.len()).sum()
    }

    /// All conversations, newest-date descending — the order the Monitor
    /// exposes via `get_conversations()` (§6).
    pub fn ordered(&self) -> Vec<Arc<Conversation>> {
        let mut out: Vec<Arc<Conversation>> = self.arena.values().cloned().collect();
        out.sort_by(|a, b| b.newest_date().cmp(&a.newest_date()));
        out
    }

    /// The chronologically lowest EmailId currently held, used by
    /// `ReseedOperation`/`FillWindowOperation` (§4.7) to pick up where the
    /// window currently ends.
    pub fn lowest_email_id(&self) -> Option<EmailId> {
        self.by_email_id.keys().min().copied()
    }

    pub fn all_email_ids(&self) -> impl Iterator<Item = EmailId> + '_ {
        self.by_email_id.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmailFlags, MessageId};
    use chrono::DateTime;

    fn email(id: u64, mid: Option<&str>, refs: &[&str], date_secs: i64) -> Email {
        Email::new(
            EmailId::new(id),
            mid.and_then(MessageId::parse),
            refs.iter().filter_map(|r| MessageId::parse(r)),
            DateTime::from_timestamp(date_secs, 0).unwrap(),
            EmailFlags::empty(),
            FolderPath::from_delimited("INBOX", '/'),
        )
    }

    fn inbox() -> FolderPath {
        FolderPath::from_delimited("INBOX", '/')
    }

    // Seed scenario 1: simple thread.
    #[test]
    fn simple_thread_becomes_one_conversation() {
        let mut set = ConversationSet::new();
        let e1 = email(1, Some("A@h"), &[], 10);
        let e2 = email(2, Some("B@h"), &["A@h"], 11);
        let e3 = email(3, Some("C@h"), &["B@h", "A@h"], 12);

        let out1 = set.add_all(vec![e1], &inbox()).unwrap();
        assert_eq!(out1.added.len(), 1);
        assert_eq!(out1.appended.len(), 0);

        let out2 = set.add_all(vec![e2], &inbox()).unwrap();
        assert_eq!(out2.added.len(), 0);
        assert_eq!(out2.appended.len(), 1);

        let out3 = set.add_all(vec![e3], &inbox()).unwrap();
        assert_eq!(out3.added.len(), 0);
        assert_eq!(out3.appended.len(), 1);

        assert_eq!(set.size(), 1);
        let conv = set.get_by_email_id(EmailId::new(1)).unwrap();
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.closure().len(), 3);
    }

    // Seed scenario 2: merge via bridge.
    #[test]
    fn bridging_email_merges_two_conversations() {
        let mut set = ConversationSet::new();
        let e1 = email(1, Some("A@h"), &[], 10);
        let e4 = email(4, Some("D@h"), &[], 11);
        let e2 = email(2, Some("B@h"), &["A@h", "D@h"], 12);

        set.add_all(vec![e1], &inbox()).unwrap();
        set.add_all(vec![e4], &inbox()).unwrap();
        assert_eq!(set.size(), 2);

        let merge_out = set.add_all(vec![e2], &inbox()).unwrap();
        assert_eq!(set.size(), 1);
        assert_eq!(merge_out.removed_by_merge.len(), 1);
        assert_eq!(merge_out.appended.len(), 1);
        assert_eq!(merge_out.added.len(), 0);

        let survivor = set.get_by_email_id(EmailId::new(1)).unwrap();
        assert_eq!(survivor.len(), 3);
    }

    // Seed scenario 3: remove trims without splitting.
    #[test]
    fn remove_trims_without_splitting() {
        let mut set = ConversationSet::new();
        let e1 = email(1, Some("A@h"), &[], 10);
        let e2 = email(2, Some("B@h"), &["A@h"], 11);
        let e3 = email(3, Some("C@h"), &["B@h", "A@h"], 12);
        set.add_all(vec![e1, e2, e3], &inbox()).unwrap();
        assert_eq!(set.size(), 1);

        let out = set.remove(&[EmailId::new(2)]);
        assert_eq!(out.trimmed.len(), 1);
        assert_eq!(out.removed.len(), 0);
        assert_eq!(set.size(), 1);

        let conv = set.get_by_email_id(EmailId::new(1)).unwrap();
        assert_eq!(conv.len(), 2);
        assert!(conv.contains(EmailId::new(1)));
        assert!(conv.contains(EmailId::new(3)));
        assert_eq!(conv.closure().len(), 2);
        assert!(!set.has_message_id(&MessageId::parse("B@h").unwrap()));
    }

    #[test]
    fn remove_last_email_removes_conversation() {
        let mut set = ConversationSet::new();
        set.add_all(vec![email(1, Some("A@h"), &[], 10)], &inbox()).unwrap();
        let out = set.remove(&[EmailId::new(1)]);
        assert_eq!(out.removed.len(), 1);
        assert_eq!(set.size(), 0);
        assert!(!set.has_message_id(&MessageId::parse("A@h").unwrap()));
    }

    #[test]
    fn adding_same_batch_twice_is_idempotent_on_state() {
        let mut set = ConversationSet::new();
        let batch = vec![
            email(1, Some("A@h"), &[], 10),
            email(2, Some("B@h"), &["A@h"], 11),
        ];
        set.add_all(batch.clone(), &inbox()).unwrap();
        let size_once = set.size();
        let count_once = set.email_count();

        set.add_all(batch, &inbox()).unwrap();
        assert_eq!(set.size(), size_once);
        assert_eq!(set.email_count(), count_once);
    }

    #[test]
    fn email_without_ids_becomes_its_own_conversation() {
        let mut set = ConversationSet::new();
        let lone = email(9, None, &[], 5);
        let out = set.add_all(vec![lone], &inbox()).unwrap();
        assert_eq!(out.added.len(), 1);
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn update_flags_refreshes_owning_conversation_without_touching_closure() {
        let mut set = ConversationSet::new();
        set.add_all(vec![email(1, Some("A@h"), &[], 10)], &inbox()).unwrap();
        let before_closure_len = set.get_by_email_id(EmailId::new(1)).unwrap().closure().len();

        let (conv, updated) = set
            .update_flags(EmailId::new(1), EmailFlags::from_flags([crate::model::EmailFlag::Unread]))
            .unwrap();
        assert!(updated.is_unread());
        assert_eq!(conv.closure().len(), before_closure_len);
        assert!(set.get_by_email_id(EmailId::new(1)).unwrap().is_unread());
    }

    #[test]
    fn update_flags_on_unknown_id_returns_none() {
        let mut set = ConversationSet::new();
        assert!(set.update_flags(EmailId::new(404), EmailFlags::empty()).is_none());
    }

    #[test]
    fn add_all_reports_invariant_violation_instead_of_panicking() {
        let mut set = ConversationSet::new();
        set.add_all(vec![email(1, Some("A@h"), &[], 10)], &inbox()).unwrap();

        // Corrupt the index out from under the arena to exercise the
        // single-match path's consistency check.
        let bogus = ConversationHandle(u64::MAX);
        set.by_message_id.insert(MessageId::parse("A@h").unwrap(), bogus);

        let err = set
            .add_all(vec![email(1, Some("A@h"), &["A@h"], 11)], &inbox())
            .unwrap_err();
        assert!(matches!(err, MonitorError::Invariant(_)));
    }

    #[test]
    fn merge_reports_invariant_violation_instead_of_panicking() {
        let mut set = ConversationSet::new();
        set.add_all(vec![email(1, Some("A@h"), &[], 10)], &inbox()).unwrap();
        set.add_all(vec![email(4, Some("D@h"), &[], 11)], &inbox()).unwrap();
        assert_eq!(set.size(), 2);

        // Corrupt one of the two conversations a bridging email would merge.
        let bogus = ConversationHandle(u64::MAX);
        set.by_message_id.insert(MessageId::parse("D@h").unwrap(), bogus);

        let err = set
            .add_all(vec![email(2, Some("B@h"), &["A@h", "D@h"], 12)], &inbox())
            .unwrap_err();
        assert!(matches!(err, MonitorError::Invariant(_)));
    }

    #[test]
    fn ordered_sorts_newest_first() {
        let mut set = ConversationSet::new();
        set.add_all(vec![email(1, Some("A@h"), &[], 10)], &inbox()).unwrap();
        set.add_all(vec![email(2, Some("B@h"), &[], 50)], &inbox()).unwrap();
        let ordered = set.ordered();
        assert_eq!(ordered.len(), 2);
        assert!(ordered[0].newest_date().unwrap() > ordered[1].newest_date().unwrap());
    }
}
