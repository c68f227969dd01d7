//! The recursive local-search email ingestion pipeline (`SPEC_FULL.md` §4.8).
//!
//! Every operation that ingests emails — `LocalLoad`, `Reseed`, `FillWindow`,
//! `Append`, `ExternalAppend`, `ExpandConversations` — funnels its fetched
//! batch through [`ingest`] rather than calling `ConversationSet::add_all`
//! directly. The pipeline's job is to resolve as much of the thread as the
//! local store already knows about *before* that single `add_all` call, so
//! a batch is threaded once, atomically, against its fullest available
//! closure rather than in fragments across several operations.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};

use crate::adapters::{AccountAdapter, FieldSet};
use crate::errors::MonitorResult;
use crate::model::{AddAllOutcome, ConversationSet, Email, EmailFlags, EmailId, FolderPath, MessageId};

/// The folder/flag exclusions applied to the local-search fan-out (§4.7's
/// `search_blacklist`/flag blacklist).
#[derive(Clone, Copy)]
pub struct BlacklistScope<'a> {
    pub folders: &'a [FolderPath],
    pub flags: EmailFlags,
}

/// Run §4.8 steps 1-5 against `initial`, then apply the accumulated batch to
/// `set` with a single `add_all` call.
///
/// Bounded by construction (P7): each round only admits EmailIds the caller
/// hasn't already seen in this call, and `searched` prevents a Message-ID
/// from being looked up twice, so the loop can run at most once per distinct
/// email ever discovered from the local store.
pub async fn ingest<A: AccountAdapter>(
    account: &A,
    set: &mut ConversationSet,
    source_folder: &FolderPath,
    initial: Vec<Email>,
    blacklist: BlacklistScope<'_>,
    concurrency: usize,
) -> MonitorResult<AddAllOutcome> {
    // Step 1: collapse duplicate EmailIds within the batch.
    let mut batch: HashMap<EmailId, Email> = HashMap::new();
    for email in initial {
        batch.entry(email.id).or_insert(email);
    }

    let mut searched: HashSet<MessageId> = HashSet::new();

    loop {
        let have_as_own: HashSet<MessageId> =
            batch.values().filter_map(|e| e.message_id.clone()).collect();

        // Step 2: ancestors not already resolvable locally or in this batch.
        let needed: Vec<MessageId> = batch
            .values()
            .flat_map(|e| e.ancestors())
            .filter(|mid| {
                !set.has_message_id(mid) && !have_as_own.contains(mid) && !searched.contains(mid)
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if needed.is_empty() {
            break;
        }
        searched.extend(needed.iter().cloned());

        // Step 3: bounded-concurrency fan-out, one LocalSearchOperation per
        // needed Message-ID, via a fixed-size worker pool over the id stream.
        let results: Vec<MonitorResult<Vec<Email>>> = stream::iter(needed)
            .map(|mid| async move {
                account
                    .local_search_by_message_ids(
                        std::slice::from_ref(&mid),
                        FieldSet::REQUIRED,
                        blacklist.folders,
                        blacklist.flags,
                    )
                    .await
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        // Step 4: fold any newly-found emails back into the batch and loop —
        // a found email's own References may reference further unknowns.
        let mut found_new = false;
        for result in results {
            for email in result? {
                if let std::collections::hash_map::Entry::Vacant(slot) = batch.entry(email.id) {
                    slot.insert(email);
                    found_new = true;
                }
            }
        }

        if !found_new {
            break;
        }
    }

    // Step 5: thread the fully-expanded batch in one atomic call.
    let all: Vec<Email> = batch.into_values().collect();
    set.add_all(all, source_folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryAccount, MemoryStore};
    use crate::model::EmailFlags;
    use chrono::{DateTime, Utc};

    fn email(id: u64, mid: &str, refs: &[&str], date_secs: i64, folder: &str) -> Email {
        Email::new(
            EmailId::new(id),
            MessageId::parse(mid),
            refs.iter().filter_map(|r| MessageId::parse(r)),
            DateTime::from_timestamp(date_secs, 0).unwrap(),
            EmailFlags::empty(),
            FolderPath::from_delimited(folder, '/'),
        )
    }

    // Seed scenario 4: out-of-folder expansion pulls in a bridging email
    // from a non-blacklisted foreign folder.
    #[tokio::test]
    async fn pulls_in_out_of_folder_message_via_local_search() {
        let store = MemoryStore::new_in_memory().await.unwrap();
        let e0 = email(100, "Z@h", &[], 1, "Archive");
        store.seed(&e0).await.unwrap();
        let account = MemoryAccount::new(store);

        let mut set = ConversationSet::new();
        let e5 = email(5, "E@h", &["Z@h"], 5, "INBOX");
        let inbox = FolderPath::from_delimited("INBOX", '/');

        let outcome = ingest(
            &account,
            &mut set,
            &inbox,
            vec![e5],
            BlacklistScope { folders: &[], flags: EmailFlags::empty() },
            4,
        )
        .await
        .unwrap();

        assert_eq!(outcome.added.len(), 1);
        let conv = set.get_by_email_id(EmailId::new(5)).unwrap();
        assert_eq!(conv.len(), 2);
        assert!(conv.contains(EmailId::new(100)));
    }

    // Seed scenario 5: same setup, but the foreign folder is blacklisted.
    #[tokio::test]
    async fn blacklisted_folder_is_excluded_from_expansion() {
        let store = MemoryStore::new_in_memory().await.unwrap();
        let e0 = email(100, "Z@h", &[], 1, "Trash");
        store.seed(&e0).await.unwrap();
        let account = MemoryAccount::new(store);

        let mut set = ConversationSet::new();
        let e5 = email(5, "E@h", &["Z@h"], 5, "INBOX");
        let inbox = FolderPath::from_delimited("INBOX", '/');
        let trash = FolderPath::from_delimited("Trash", '/');

        let outcome = ingest(
            &account,
            &mut set,
            &inbox,
            vec![e5],
            BlacklistScope { folders: &[trash], flags: EmailFlags::empty() },
            4,
        )
        .await
        .unwrap();

        assert_eq!(outcome.added.len(), 1);
        let conv = set.get_by_email_id(EmailId::new(5)).unwrap();
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn cascading_expansion_resolves_chained_references() {
        let store = MemoryStore::new_in_memory().await.unwrap();
        // e0 (Z, no refs) <- e_mid (Y, refs Z) <- e_top (X, refs Y), only
        // e_top arrives directly; e0/e_mid are only in the local store.
        let e_mid = email(101, "Y@h", &["Z@h"], 2, "Archive");
        let e0 = email(100, "Z@h", &[], 1, "Archive");
        store.seed(&e0).await.unwrap();
        store.seed(&e_mid).await.unwrap();
        let account = MemoryAccount::new(store);

        let mut set = ConversationSet::new();
        let e_top = email(5, "X@h", &["Y@h"], 5, "INBOX");
        let inbox = FolderPath::from_delimited("INBOX", '/');

        let outcome = ingest(
            &account,
            &mut set,
            &inbox,
            vec![e_top],
            BlacklistScope { folders: &[], flags: EmailFlags::empty() },
            4,
        )
        .await
        .unwrap();

        assert_eq!(outcome.added.len(), 1);
        let conv = set.get_by_email_id(EmailId::new(5)).unwrap();
        assert_eq!(conv.len(), 3);
    }
}
