//! The Monitor controller state machine (`SPEC_FULL.md` §4.9, component C8).
//!
//! `Monitor<F, A>` owns the `ConversationSet`, the `OperationQueue`, and the
//! window/lifecycle state, and is generic over one concrete `FolderAdapter` +
//! `AccountAdapter` pair (§4.4/§4.5) rather than boxed trait objects — there
//! is exactly one monitored folder per `Monitor`. External folder/account
//! events never mutate the set directly (§5, §9): the embedding application
//! calls the `notify_*` methods below from its own event handling, and those
//! methods do nothing but enqueue a typed `Operation` — the single consumer
//! task spawned by [`Monitor::start`] is the only code that ever locks the
//! set for writing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::adapters::{
    AccountAdapter, Boundaries, FieldSet, FolderAdapter, ListFlags, OpenState, SpecialFolderKind,
};
use crate::config::MonitorDefaults;
use crate::errors::{MonitorError, MonitorResult};
use crate::events::MonitorEvent;
use crate::model::{
    AddAllOutcome, Conversation, ConversationSet, Email, EmailFlag, EmailFlags, EmailId, FolderPath,
    MessageId,
};
use crate::pipeline::{self, BlacklistScope};
use crate::queue::{Operation, OperationKind, OperationQueue};

/// A cancellation token scoping one monitoring session, implemented locally
/// over `tokio::sync::watch<bool>` (§5) rather than pulling in
/// `tokio_util::sync::CancellationToken` for this one use.
#[derive(Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// `WindowState` from §3: the desired minimum number of conversations and
/// the derived booleans the Monitor tracks alongside it.
struct WindowState {
    window_count: usize,
    all_loaded: bool,
    reseed_notified: bool,
}

/// The live, windowed conversation view over one folder (`SPEC_FULL.md` §1,
/// component C8). See the module doc for the ownership/concurrency model.
pub struct Monitor<F, A> {
    folder: F,
    account: A,
    set: RwLock<ConversationSet>,
    queue: OperationQueue,
    events: broadcast::Sender<MonitorEvent>,
    window: Mutex<WindowState>,
    is_monitoring: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    config: MonitorDefaults,
    open_flags: ListFlags,
    required_fields: FieldSet,
    flag_blacklist: EmailFlags,
    /// Mirrors the source's `reestablish_connections` account setting (§5):
    /// whether a folder close while monitoring should trigger the
    /// `RETRY_CONNECTION_SEC` reconnect cycle.
    reestablish_connections: bool,
}

impl<F, A> Monitor<F, A>
where
    F: FolderAdapter + Send + Sync + 'static,
    A: AccountAdapter + Send + Sync + 'static,
{
    pub fn new(folder: F, account: A, open_flags: ListFlags, required_fields: FieldSet, window_count: usize) -> Self {
        Self::with_config(
            folder,
            account,
            open_flags,
            required_fields,
            window_count,
            MonitorDefaults::load(),
            true,
        )
    }

    pub fn with_config(
        folder: F,
        account: A,
        open_flags: ListFlags,
        required_fields: FieldSet,
        window_count: usize,
        config: MonitorDefaults,
        reestablish_connections: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        Self {
            folder,
            account,
            set: RwLock::new(ConversationSet::new()),
            queue: OperationQueue::new(),
            events,
            window: Mutex::new(WindowState {
                window_count,
                all_loaded: false,
                reseed_notified: false,
            }),
            is_monitoring: AtomicBool::new(false),
            cancel: Mutex::new(None),
            config,
            open_flags,
            required_fields: required_fields.union(FieldSet::REQUIRED),
            flag_blacklist: EmailFlags::from_flags([EmailFlag::Draft]),
            reestablish_connections,
        }
    }

    // ---- §6 external interface -------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        self.is_monitoring.load(Ordering::SeqCst)
    }

    pub async fn get_conversations(&self) -> Vec<Arc<Conversation>> {
        self.set.read().await.ordered()
    }

    pub async fn get_conversation_for(&self, id: EmailId) -> Option<Arc<Conversation>> {
        self.set.read().await.get_by_email_id(id)
    }

    pub async fn conversation_count(&self) -> usize {
        self.set.read().await.size()
    }

    pub async fn email_count(&self) -> usize {
        self.set.read().await.email_count()
    }

    pub async fn all_messages_loaded(&self) -> bool {
        self.window.lock().await.all_loaded
    }

    /// §4.9: grows the window and kicks a `FillWindow`, unless one is
    /// already queued or the folder is already fully loaded.
    pub async fn increase_window(&self, delta: usize) -> bool {
        if delta == 0 {
            return false;
        }
        if self.queue.has(OperationKind::FillWindow).await {
            return false;
        }
        if self.window.lock().await.all_loaded {
            return false;
        }
        self.window.lock().await.window_count += delta;
        self.queue.add(Operation::FillWindow { is_insert: false }).await;
        true
    }

    /// `start()`: Idle→Starting→Monitoring (§4.9). Returns `Ok(false)`
    /// without doing anything if already monitoring.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> MonitorResult<bool> {
        // Reentrancy guard: flip the flag before any await.
        if self
            .is_monitoring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(false);
        }

        *self.cancel.lock().await = Some(cancel.clone());
        self.queue.reset().await;
        self.queue.clear().await;

        self.queue.add(Operation::LocalLoad).await;
        if !matches!(self.folder.open_state(), OpenState::Closed) {
            self.queue
                .add(Operation::Reseed { reason: "already opened".to_string() })
                .await;
        }
        self.queue.add(Operation::FillWindow { is_insert: false }).await;

        if let Err(err) = self.folder.open(self.open_flags).await {
            self.is_monitoring.store(false, Ordering::SeqCst);
            *self.cancel.lock().await = None;
            return Err(MonitorError::OpenFailed(anyhow::anyhow!(err)));
        }

        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.run_queue(cancel).await });

        self.emit(MonitorEvent::MonitoringStarted);
        info!("monitoring_started");
        Ok(true)
    }

    /// `stop(retrying)`: Monitoring→Stopping→Idle (§4.9).
    pub async fn stop(self: &Arc<Self>, retrying: bool) {
        if !self.is_monitoring.load(Ordering::SeqCst) {
            return;
        }
        if let Some(cancel) = self.cancel.lock().await.take() {
            cancel.cancel();
        }
        self.queue.stop_processing().await;
        self.is_monitoring.store(false, Ordering::SeqCst);

        if let Err(err) = self.folder.close().await {
            // §7: a close failure is logged, not propagated — `stop()`
            // still completes and the Monitor is considered stopped.
            let err = MonitorError::CloseFailed(anyhow::anyhow!(err));
            warn!(error = %err, "folder close failed during stop");
        }

        self.emit(MonitorEvent::MonitoringStopped { retrying });
        info!(retrying, "monitoring_stopped");
    }

    // ---- external event notifications (§4.4/§4.5, §9) --------------------------
    //
    // O(1), side-effect-free beyond enqueuing, exactly the shape the source's
    // folder/account callbacks are required to have (§9). The embedding
    // application is expected to call these from its own adapter event
    // handling; the Monitor does not itself subscribe to a folder event
    // stream, since `FolderAdapter`/`AccountAdapter` are plain traits the
    // Monitor is generic over rather than `dyn`-erased observables.

    pub async fn notify_appended(&self, ids: Vec<EmailId>) {
        if self.is_monitoring() {
            self.queue.add(Operation::Append { ids }).await;
        }
    }

    pub async fn notify_inserted(&self, ids: Vec<EmailId>) {
        if self.is_monitoring() {
            self.queue.add(Operation::Append { ids }).await;
        }
    }

    pub async fn notify_removed(&self, ids: Vec<EmailId>) {
        if self.is_monitoring() {
            self.queue.add(Operation::Remove { ids }).await;
        }
    }

    pub async fn notify_external_append(&self, folder: FolderPath, ids: Vec<EmailId>) {
        if self.is_monitoring() {
            self.queue.add(Operation::ExternalAppend { folder, ids }).await;
        }
    }

    pub async fn notify_flags_changed(&self, folder: FolderPath, flags: HashMap<EmailId, EmailFlags>) {
        if self.is_monitoring() {
            self.queue.add(Operation::FlagsChanged { folder, flags }).await;
        }
    }

    /// §4.5: an email finished syncing its body into the local store
    /// somewhere in the account. The core never fetches bodies itself
    /// (§1 Non-goals), so nothing here mutates the set — this is a contract
    /// stub kept for embedders layering a body/attachment view on top.
    pub fn notify_locally_complete(&self, _folder: FolderPath, _ids: Vec<EmailId>) {}

    /// §4.9: a REMOTE/BOTH transition reseeds the window; a CLOSED
    /// transition while `reestablish_connections` starts the §5 retry loop.
    pub async fn notify_open_state_changed(self: &Arc<Self>, state: OpenState) {
        if !self.is_monitoring() {
            return;
        }
        match state {
            OpenState::Remote | OpenState::Both => {
                self.queue
                    .add(Operation::Reseed { reason: format!("{state:?}") })
                    .await;
                self.queue.add(Operation::FillWindow { is_insert: false }).await;
            }
            OpenState::Closed if self.reestablish_connections => {
                let monitor = Arc::clone(self);
                tokio::spawn(async move { monitor.retry_after_disconnect().await });
            }
            _ => {}
        }
    }

    async fn retry_after_disconnect(self: Arc<Self>) {
        let cancel = match self.cancel.lock().await.clone() {
            Some(c) => c,
            None => return,
        };
        if cancel.is_cancelled() {
            return;
        }
        self.stop(true).await;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(self.config.retry_connection_secs)) => {}
        }
        if cancel.is_cancelled() {
            return;
        }
        let fresh = CancellationToken::new();
        if let Err(err) = self.start(fresh).await {
            warn!(error = %err, "retry after disconnect failed to restart monitoring");
        }
    }

    // ---- queue consumer ---------------------------------------------------------

    async fn run_queue(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                op = self.queue.pop() => op,
            };
            let Some(op) = next else { break };

            let span = info_span!("operation", op = ?op.kind());
            self.execute(op, &cancel).instrument(span).await;
            self.queue.mark_idle().await;
        }
    }

    async fn execute(&self, op: Operation, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        debug!("executing operation");

        let run = async {
            match op {
                Operation::LocalLoad => self.execute_local_load().await,
                Operation::Reseed { reason } => self.execute_reseed(&reason).await,
                Operation::FillWindow { is_insert } => self.execute_fill_window(is_insert).await,
                Operation::Append { ids } => self.execute_append(&ids).await,
                Operation::Remove { ids } => self.execute_remove(&ids).await,
                Operation::ExternalAppend { folder, ids } => {
                    self.execute_external_append(&folder, &ids).await
                }
                Operation::ExpandConversations { message_ids } => {
                    self.execute_expand_conversations(&message_ids).await
                }
                Operation::FlagsChanged { folder, flags } => {
                    self.execute_flags_changed(&folder, &flags).await
                }
            }
        };

        // §5: cancellation aborts a pending adapter call outright rather than
        // waiting for the operation to resolve on its own.
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MonitorError::Cancelled),
            r = run => r,
        };

        if let Err(err) = result {
            if matches!(err, MonitorError::Cancelled) {
                return; // Cancelled: never surfaced (§7).
            }
            if err.is_transient() {
                warn!(error = %err, "operation failed");
            } else {
                error!(error = %err, "operation failed with a non-transient error");
            }
            self.emit(MonitorEvent::scan_error(&err));
        }
    }

    // ---- §4.7 operation verbs ---------------------------------------------------

    async fn execute_local_load(&self) -> MonitorResult<()> {
        let local_newest = self.folder.fetch_local_newest().await?;
        let offset = local_newest.map(|(_, offset)| offset).unwrap_or(0);
        let window_count = self.window.lock().await.window_count;
        let count = window_count.max(offset + 1);

        let emails = self
            .folder
            .list_by_id(None, count, self.required_fields, ListFlags::LOCAL_ONLY)
            .await?;
        self.ingest(emails, true, true).await
    }

    async fn execute_reseed(&self, reason: &str) -> MonitorResult<()> {
        debug!(reason, "reseeding");
        let held_ids: Vec<EmailId> = self.set.read().await.all_email_ids().collect();
        let Boundaries { earliest, .. } = self.folder.find_boundaries(&held_ids).await?;

        let emails = if let Some(lowest) = earliest {
            self.folder
                .list_by_id(
                    Some(lowest),
                    usize::MAX,
                    self.required_fields,
                    ListFlags::OLDEST_TO_NEWEST.union(ListFlags::INCLUDING_ID),
                )
                .await?
        } else {
            let window_count = self.window.lock().await.window_count;
            self.folder
                .list_by_id(None, window_count, self.required_fields, ListFlags::NONE)
                .await?
        };

        self.ingest(emails, false, true).await?;

        let already_notified = {
            let mut window = self.window.lock().await;
            let was = window.reseed_notified;
            window.reseed_notified = true;
            was
        };
        if !already_notified {
            self.emit(MonitorEvent::SeedCompleted);
        }
        Ok(())
    }

    async fn execute_fill_window(&self, is_insert: bool) -> MonitorResult<()> {
        let window_count = self.window.lock().await.window_count;
        let size = self.set.read().await.size();
        if window_count <= size || !self.is_monitoring() {
            return Ok(());
        }

        let local_only = matches!(
            self.folder.open_state(),
            OpenState::Closed | OpenState::Local | OpenState::Opening
        );
        let flags = if local_only { ListFlags::LOCAL_ONLY } else { ListFlags::NONE };

        // Scope the lowest bound to this folder the same way `execute_reseed`
        // does: `lowest_email_id()` is a cross-folder minimum over everything
        // the set holds, including out-of-folder messages pulled in by local
        // search (§4.8) — using it directly here could seed `list_by_id` with
        // an id lower than anything actually in the folder and skip the
        // entire unfetched in-folder range.
        let held_ids: Vec<EmailId> = self.set.read().await.all_email_ids().collect();
        let Boundaries { earliest: folder_lowest, .. } = self.folder.find_boundaries(&held_ids).await?;

        let emails = if !is_insert && folder_lowest.is_some() {
            let count = (window_count - size).max(self.config.window_fill_message_count);
            self.folder
                .list_by_id(folder_lowest, count, self.required_fields, flags)
                .await?
        } else {
            self.folder
                .list_by_id(None, window_count, self.required_fields, flags)
                .await?
        };

        let before = self.set.read().await.email_count();
        self.ingest(emails, local_only, true).await?;
        let after = self.set.read().await.email_count();

        let total = self.folder.email_total().await?;
        self.window.lock().await.all_loaded = after == total;

        let new_size = self.set.read().await.size();
        if after > before && new_size < window_count {
            self.queue.add(Operation::FillWindow { is_insert: false }).await;
        }
        Ok(())
    }

    async fn execute_append(&self, ids: &[EmailId]) -> MonitorResult<()> {
        let emails = self
            .folder
            .list_by_sparse_id(ids, self.required_fields, ListFlags::NONE)
            .await?;
        self.ingest(emails, false, true).await
    }

    async fn execute_remove(&self, ids: &[EmailId]) -> MonitorResult<()> {
        let outcome = self.set.write().await.remove(ids);

        for conv in &outcome.trimmed {
            self.emit(MonitorEvent::ConversationTrimmed(conv.clone()));
        }
        for conv in &outcome.removed {
            self.emit(MonitorEvent::ConversationRemoved(conv.clone()));
        }

        if !outcome.trimmed.is_empty() {
            let message_ids: Vec<MessageId> = outcome
                .trimmed
                .iter()
                .flat_map(|c| c.closure().iter().cloned())
                .collect();
            self.queue.add(Operation::ExpandConversations { message_ids }).await;
        }
        Ok(())
    }

    /// `foreign_folder` here is realized entirely through `AccountAdapter`
    /// (`local_fetch`/`local_search_by_message_ids`, both explicitly
    /// cross-folder per §4.5) rather than a second `FolderAdapter::list_*`
    /// call against a differently-pathed folder — `Monitor<F, A>` is generic
    /// over exactly one concrete `F`, so opening a second folder of the same
    /// type isn't expressible without `dyn FolderAdapter` or a folder
    /// factory the distilled interface table never asks for. See DESIGN.md.
    async fn execute_external_append(&self, foreign: &FolderPath, ids: &[EmailId]) -> MonitorResult<()> {
        if ids.is_empty() || self.set.read().await.size() == 0 {
            return Ok(());
        }
        if self.search_blacklist().iter().any(|b| foreign.is_descendant_of(b)) {
            return Ok(());
        }

        // Cheap REFERENCES-only prefetch, then filter to ids that actually
        // bridge into the currently-held Message-ID space.
        let mut candidates = Vec::new();
        for &id in ids {
            if let Some(email) = self.account.local_fetch(id, FieldSet::REFERENCES).await? {
                candidates.push(email);
            }
        }

        let bridging_ids: Vec<EmailId> = {
            let set = self.set.read().await;
            candidates
                .iter()
                .filter(|e| e.ancestors().iter().any(|mid| set.has_message_id(mid)))
                .map(|e| e.id)
                .collect()
        };
        if bridging_ids.is_empty() {
            return Ok(());
        }

        let mut full = Vec::with_capacity(bridging_ids.len());
        for id in bridging_ids {
            if let Some(email) = self.account.local_fetch(id, self.required_fields).await? {
                full.push(email);
            }
        }

        self.ingest(full, false, false).await
    }

    /// Re-materialize out-of-folder messages for a conversation `Remove`
    /// trimmed (§4.7's `ExpandConversations` follow-up).
    async fn execute_expand_conversations(&self, message_ids: &[MessageId]) -> MonitorResult<()> {
        let needed: Vec<MessageId> = {
            let set = self.set.read().await;
            message_ids.iter().filter(|mid| !set.has_message_id(mid)).cloned().collect()
        };
        if needed.is_empty() {
            return Ok(());
        }

        let blacklist_folders = self.search_blacklist();
        let found = self
            .account
            .local_search_by_message_ids(&needed, self.required_fields, &blacklist_folders, self.flag_blacklist)
            .await?;
        if found.is_empty() {
            return Ok(());
        }
        self.ingest(found, true, true).await
    }

    async fn execute_flags_changed(&self, _folder: &FolderPath, flags: &HashMap<EmailId, EmailFlags>) -> MonitorResult<()> {
        let mut updates = Vec::with_capacity(flags.len());
        {
            let mut set = self.set.write().await;
            for (&id, &new_flags) in flags {
                if let Some(update) = set.update_flags(id, new_flags) {
                    updates.push(update);
                }
            }
        }
        for (conversation, email) in updates {
            self.emit(MonitorEvent::EmailFlagsChanged { conversation, email });
        }
        Ok(())
    }

    // ---- shared ingestion path (§4.8) -------------------------------------------

    async fn ingest(&self, emails: Vec<Email>, local_only: bool, inside_scan: bool) -> MonitorResult<()> {
        if inside_scan {
            self.emit(MonitorEvent::ScanStarted { local_only });
        }

        let blacklist_folders = self.search_blacklist();
        let outcome: MonitorResult<AddAllOutcome> = {
            let mut set = self.set.write().await;
            pipeline::ingest(
                &self.account,
                &mut set,
                self.folder.path(),
                emails,
                BlacklistScope { folders: &blacklist_folders, flags: self.flag_blacklist },
                self.config.local_search_concurrency,
            )
            .await
        };

        let outcome = outcome?;
        self.apply_add_all_outcome(outcome);

        if inside_scan {
            self.emit(MonitorEvent::ScanCompleted { local_only });
        }
        Ok(())
    }

    /// Ordering per §5: `removed_by_merge` before `added` before `appended`.
    fn apply_add_all_outcome(&self, outcome: AddAllOutcome) {
        for conv in outcome.removed_by_merge {
            self.emit(MonitorEvent::ConversationRemoved(conv));
        }
        if !outcome.added.is_empty() {
            self.emit(MonitorEvent::ConversationsAdded(outcome.added));
        }
        for (conversation, new_emails) in outcome.appended {
            self.emit(MonitorEvent::ConversationAppended { conversation, new_emails });
        }
    }

    /// §4.7's `search_blacklist`: SPAM/TRASH/DRAFTS plus the monitored
    /// folder itself. The source's fourth entry, "no-folder", has no
    /// counterpart here — `Email::folder_path` is never optional in this
    /// data model (§3), so there is no "no folder" case to exclude.
    fn search_blacklist(&self) -> Vec<FolderPath> {
        let mut blacklist = vec![self.folder.path().clone()];
        for kind in [SpecialFolderKind::Spam, SpecialFolderKind::Trash, SpecialFolderKind::Drafts] {
            if let Some(path) = self.account.get_special_folder(kind) {
                blacklist.push(path);
            }
        }
        blacklist
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }
}
