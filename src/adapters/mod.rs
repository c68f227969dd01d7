//! External collaborator contracts (`SPEC_FULL.md` §4.4/§4.5, components C4/C5).
//!
//! The monitor is generic over a concrete [`FolderAdapter`] + [`AccountAdapter`]
//! pair rather than boxed trait objects — there is exactly one monitored
//! account/folder combination per `Monitor`, so static dispatch avoids a
//! vtable hop on every operation without losing any flexibility an embedder
//! needs. [`memory::MemoryFolder`]/[`memory::MemoryAccount`] are the one
//! concrete pair this crate ships, for tests and the demo binary; a
//! production IMAP/JMAP backend is expected to implement these traits in the
//! embedding application.

pub mod memory;

use std::future::Future;

use crate::errors::MonitorResult;
use crate::model::{Email, EmailFlags, EmailId, FolderPath};

/// Bitmask over the fields a `list_*` call should populate (§4.4). The
/// monitor always requests at least `REFERENCES | FLAGS | DATE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldSet(u8);

impl FieldSet {
    pub const NONE: FieldSet = FieldSet(0);
    pub const REFERENCES: FieldSet = FieldSet(1 << 0);
    pub const FLAGS: FieldSet = FieldSet(1 << 1);
    pub const DATE: FieldSet = FieldSet(1 << 2);
    /// The minimum field set every ingesting operation requests (§4.4).
    pub const REQUIRED: FieldSet = FieldSet(Self::REFERENCES.0 | Self::FLAGS.0 | Self::DATE.0);

    pub fn contains(&self, other: FieldSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: FieldSet) -> FieldSet {
        FieldSet(self.0 | other.0)
    }
}

/// Bitmask of listing behavior flags (§4.4/§4.7).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListFlags(u8);

impl ListFlags {
    pub const NONE: ListFlags = ListFlags(0);
    pub const LOCAL_ONLY: ListFlags = ListFlags(1 << 0);
    pub const OLDEST_TO_NEWEST: ListFlags = ListFlags(1 << 1);
    pub const INCLUDING_ID: ListFlags = ListFlags(1 << 2);

    pub fn contains(&self, other: ListFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: ListFlags) -> ListFlags {
        ListFlags(self.0 | other.0)
    }
}

/// A folder's connection lifecycle (§4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenState {
    Closed,
    Opening,
    Local,
    Remote,
    Both,
}

/// Special-purpose folders an account may expose (§4.5), used to build the
/// search blacklist (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialFolderKind {
    Inbox,
    Spam,
    Trash,
    Drafts,
    Outbox,
    Sent,
    Archive,
    Search,
}

/// Everything the monitor ever needs to know about one fetch batch.
#[derive(Clone, Debug, Default)]
pub struct Boundaries {
    pub earliest: Option<EmailId>,
    pub latest: Option<EmailId>,
}

/// One monitored folder, as the monitor consumes it (§4.4, component C4).
///
/// Methods are plain `async fn`s (native async-in-trait) — the monitor is
/// generic over a concrete `F: FolderAdapter`, never a `dyn FolderAdapter`,
/// so object safety isn't a concern.
pub trait FolderAdapter {
    fn path(&self) -> &FolderPath;

    fn open(&self, flags: ListFlags) -> impl Future<Output = MonitorResult<()>> + Send;
    fn close(&self) -> impl Future<Output = MonitorResult<()>> + Send;
    fn open_state(&self) -> OpenState;

    /// Lazy, finite sequence ordered newest-first unless `OLDEST_TO_NEWEST`
    /// is set. `start = None` begins at the top of the folder's ordering.
    fn list_by_id(
        &self,
        start: Option<EmailId>,
        count: usize,
        fields: FieldSet,
        flags: ListFlags,
    ) -> impl Future<Output = MonitorResult<Vec<Email>>> + Send;

    fn list_by_sparse_id(
        &self,
        ids: &[EmailId],
        fields: FieldSet,
        flags: ListFlags,
    ) -> impl Future<Output = MonitorResult<Vec<Email>>> + Send;

    /// The chronologically lowest and highest EmailIds among `ids` that are
    /// actually present in the folder.
    fn find_boundaries(
        &self,
        ids: &[EmailId],
    ) -> impl Future<Output = MonitorResult<Boundaries>> + Send;

    /// `(newest local EmailId, its offset from the top of the folder)`.
    fn fetch_local_newest(&self) -> impl Future<Output = MonitorResult<Option<(EmailId, usize)>>> + Send;

    fn email_total(&self) -> impl Future<Output = MonitorResult<usize>> + Send;
}

/// Cross-folder lookup and global event surface for one account (§4.5,
/// component C5).
pub trait AccountAdapter {
    fn local_fetch(
        &self,
        id: EmailId,
        fields: FieldSet,
    ) -> impl Future<Output = MonitorResult<Option<Email>>> + Send;

    /// Every locally-cached email, in any folder, whose Message-ID closure
    /// intersects `needed` — used by the local-search pipeline (§4.8).
    fn local_search_by_message_ids(
        &self,
        needed: &[crate::model::MessageId],
        fields: FieldSet,
        folder_blacklist: &[FolderPath],
        flag_blacklist: EmailFlags,
    ) -> impl Future<Output = MonitorResult<Vec<Email>>> + Send;

    fn get_special_folder(&self, kind: SpecialFolderKind) -> Option<FolderPath>;
}
