use std::sync::Arc;

use practice_core::model::{ProgressSnapshot, UserId};
use practice_core::{Clock, ProgressEngine, ProgressReport, StatsProjector, ToggleIntent};
use storage::local::{CacheEvent, GUEST_PROGRESS_KEY, LocalCache, user_progress_key};
use tokio::sync::{Mutex, oneshot};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::error::{RemoteError, SyncError};
use crate::sync::remote::RemoteProgress;

/// What happens to guest progress when the user signs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuestProgressPolicy {
    /// The remote snapshot wins. Guest progress stays in the guest cache and
    /// is not sent anywhere.
    #[default]
    Discard,
    /// Guest-solved problems the remote does not have are replayed as toggles.
    Merge,
}

/// User-visible notice raised by a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A write failed and was rolled back; the user may retry.
    NotSaved(String),
    /// The authoritative store could not be read; showing cached progress.
    Offline(String),
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncView {
    pub snapshot: ProgressSnapshot,
    /// Count of local mutations so far; every in-flight write is tagged with one.
    pub version: u64,
    /// True when the snapshot comes from cache because the remote failed.
    pub stale: bool,
    /// Writes not yet confirmed by the remote.
    pub pending: usize,
    pub signed_in: Option<UserId>,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Toggle(ToggleIntent),
    Reset,
}

#[derive(Debug, Clone)]
struct Pending {
    version: u64,
    op: PendingOp,
}

/// Place in the outbound queue. Writes are sent in the order their turns
/// were taken, which is the order they were applied to the view.
struct SendTurn {
    previous: Option<oneshot::Receiver<()>>,
    // Dropped when this write has settled, which releases the next turn.
    _done: oneshot::Sender<()>,
}

impl SendTurn {
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The sender is only ever dropped, never used.
            let _ = previous.await;
        }
    }
}

enum Mode {
    Guest,
    Authenticated(Arc<dyn RemoteProgress>),
}

struct SyncState {
    mode: Mode,
    view: ProgressSnapshot,
    confirmed: ProgressSnapshot,
    confirmed_version: u64,
    version: u64,
    // Bumped on sign-in/out so results from a previous session are ignored.
    epoch: u64,
    pending: Vec<Pending>,
    // Released when the most recently queued write settles.
    outbound_tail: Option<oneshot::Receiver<()>>,
    stale: bool,
    notice: Option<SyncNotice>,
}

impl SyncState {
    fn cache_key(&self) -> String {
        match &self.mode {
            Mode::Guest => GUEST_PROGRESS_KEY.to_owned(),
            Mode::Authenticated(remote) => user_progress_key(remote.user()),
        }
    }

    fn remote(&self) -> Option<Arc<dyn RemoteProgress>> {
        match &self.mode {
            Mode::Guest => None,
            Mode::Authenticated(remote) => Some(Arc::clone(remote)),
        }
    }

    /// Queue an optimistic write and return its version and send turn.
    fn push(&mut self, op: PendingOp, view: ProgressSnapshot) -> (u64, SendTurn) {
        self.version += 1;
        let version = self.version;
        self.pending.push(Pending { version, op });
        self.view = view;

        let (done, next) = oneshot::channel();
        let turn = SendTurn {
            previous: self.outbound_tail.replace(next),
            _done: done,
        };
        (version, turn)
    }

    fn to_view(&self) -> SyncView {
        SyncView {
            snapshot: self.view.clone(),
            version: self.version,
            stale: self.stale,
            pending: self.pending.len(),
            signed_in: self.remote().map(|remote| remote.user().clone()),
        }
    }

    fn switch_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.epoch += 1;
        self.pending.clear();
        self.confirmed_version = self.version;
        self.notice = None;
    }
}

/// Mediates between the client-side cache and the authoritative store.
///
/// One instance exists per client session and is shared by `Arc`. Mutations
/// are applied to the view in issue order; remote writes go out in the same
/// order, one at a time. The view is always `confirmed + pending`, so a
/// late confirmation never overwrites newer optimistic state.
pub struct ProgressSync {
    engine: ProgressEngine,
    clock: Clock,
    cache: Arc<dyn LocalCache>,
    policy: GuestProgressPolicy,
    state: Mutex<SyncState>,
}

impl ProgressSync {
    /// Starts in guest mode with an empty view; call [`Self::load`] next.
    #[must_use]
    pub fn new(
        engine: ProgressEngine,
        clock: Clock,
        cache: Arc<dyn LocalCache>,
        policy: GuestProgressPolicy,
    ) -> Self {
        Self {
            engine,
            clock,
            cache,
            policy,
            state: Mutex::new(SyncState {
                mode: Mode::Guest,
                view: ProgressSnapshot::empty(),
                confirmed: ProgressSnapshot::empty(),
                confirmed_version: 0,
                version: 0,
                epoch: 0,
                pending: Vec::new(),
                outbound_tail: None,
                stale: false,
                notice: None,
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> GuestProgressPolicy {
        self.policy
    }

    pub async fn view(&self) -> SyncView {
        self.state.lock().await.to_view()
    }

    /// Display aggregates for the current view.
    pub async fn report(&self) -> ProgressReport {
        let state = self.state.lock().await;
        StatsProjector::project(&state.view, self.engine.catalog())
    }

    /// Returns and clears the latest notice.
    pub async fn take_notice(&self) -> Option<SyncNotice> {
        self.state.lock().await.notice.take()
    }

    /// (Re)load the view from the authoritative copy for the current mode.
    ///
    /// In authenticated mode a failed fetch falls back to the cached mirror
    /// (or empty) and marks the view stale instead of failing.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Unauthorized` if the remote refuses the session.
    pub async fn load(&self) -> Result<SyncView, SyncError> {
        let mut state = self.state.lock().await;
        let key = state.cache_key();
        let Some(remote) = state.remote() else {
            state.confirmed = self.read_cache(&key).await;
            state.pending.clear();
            state.view = state.confirmed.clone();
            state.stale = false;
            return Ok(state.to_view());
        };

        match remote.fetch().await {
            Ok(snapshot) => {
                state.confirmed = snapshot;
                state.stale = false;
                self.mirror(&key, &state.confirmed).await;
            }
            Err(RemoteError::Unauthorized) => return Err(SyncError::Unauthorized),
            Err(err) => {
                tracing::warn!(user = %remote.user(), %err, "remote progress unavailable; using cache");
                state.confirmed = self.read_cache(&key).await;
                state.stale = true;
                state.notice = Some(SyncNotice::Offline(err.to_string()));
            }
        }
        state.view = self.replay(&state.confirmed, &state.pending);
        Ok(state.to_view())
    }

    /// Set one problem's solved state.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Validation` if the intent is rejected (no state
    /// changes), `SyncError::NotSaved` if persisting failed and the change
    /// was rolled back, `SyncError::Unauthorized` if the session expired.
    pub async fn toggle(&self, intent: ToggleIntent) -> Result<SyncView, SyncError> {
        let (remote, version, epoch, mut turn) = {
            let mut state = self.state.lock().await;
            let outcome = self
                .engine
                .toggle(&state.view, &intent, self.clock.now())
                .inspect_err(|err| tracing::warn!(%err, "toggle rejected"))?;
            if !outcome.changed {
                return Ok(state.to_view());
            }

            let Some(remote) = state.remote() else {
                self.commit_guest(&mut state, outcome.snapshot).await?;
                return Ok(state.to_view());
            };
            let (version, turn) =
                state.push(PendingOp::Toggle(intent.clone()), outcome.snapshot);
            (remote, version, state.epoch, turn)
        };

        turn.wait().await;
        let result = remote.update(&intent).await;
        let settled = self.settle(version, epoch, result).await;
        drop(turn);
        settled
    }

    /// Restore the empty snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`Self::toggle`], minus validation.
    pub async fn reset(&self) -> Result<SyncView, SyncError> {
        let (remote, version, epoch, mut turn) = {
            let mut state = self.state.lock().await;
            let Some(remote) = state.remote() else {
                self.commit_guest(&mut state, self.engine.reset()).await?;
                return Ok(state.to_view());
            };
            let (version, turn) = state.push(PendingOp::Reset, self.engine.reset());
            (remote, version, state.epoch, turn)
        };

        turn.wait().await;
        let result = remote.reset().await;
        let settled = self.settle(version, epoch, result).await;
        drop(turn);
        settled
    }

    /// Switch to authenticated mode and load the remote snapshot.
    ///
    /// Guest progress is handled according to the configured
    /// [`GuestProgressPolicy`].
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Unauthorized` if the remote refuses the session;
    /// the instance is then back in guest mode showing the guest cache.
    /// Otherwise returns the first error hit while merging guest progress.
    pub async fn sign_in(&self, remote: Arc<dyn RemoteProgress>) -> Result<SyncView, SyncError> {
        let user = remote.user().clone();
        let guest = {
            let mut state = self.state.lock().await;
            let guest = match state.mode {
                Mode::Guest => Some(state.view.clone()),
                Mode::Authenticated(_) => None,
            };
            state.switch_mode(Mode::Authenticated(remote));
            guest
        };
        let view = match self.load().await {
            Ok(view) => view,
            Err(SyncError::Unauthorized) => {
                tracing::warn!(user = %user, "sign-in refused; staying in guest mode");
                self.state.lock().await.switch_mode(Mode::Guest);
                self.load().await?;
                return Err(SyncError::Unauthorized);
            }
            Err(err) => return Err(err),
        };
        tracing::info!(user = %user, stale = view.stale, "signed in");

        let Some(guest) = guest.filter(|g| !g.solved().is_empty()) else {
            return Ok(view);
        };
        match self.policy {
            GuestProgressPolicy::Discard => {
                tracing::info!(
                    user = %user,
                    guest_solved = guest.solved_count(),
                    "guest progress not merged; remote snapshot is authoritative"
                );
                Ok(view)
            }
            GuestProgressPolicy::Merge if view.stale => {
                tracing::warn!(user = %user, "remote unavailable; guest progress not merged");
                Ok(view)
            }
            GuestProgressPolicy::Merge => self.merge_guest(&guest, &view.snapshot).await,
        }
    }

    /// Return to guest mode and load the guest cache.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible to match [`Self::load`].
    pub async fn sign_out(&self) -> Result<SyncView, SyncError> {
        self.state.lock().await.switch_mode(Mode::Guest);
        self.load().await
    }

    /// Replace the view with whatever the cache now holds for the active key.
    ///
    /// Pending writes are replayed on top; nothing is merged.
    ///
    /// # Errors
    ///
    /// Never fails today; unreadable records are treated as empty.
    pub async fn reload_from_cache(&self) -> Result<SyncView, SyncError> {
        let mut state = self.state.lock().await;
        let key = state.cache_key();
        state.confirmed = self.read_cache(&key).await;
        state.view = self.replay(&state.confirmed, &state.pending);
        tracing::debug!(key, "reloaded progress after external change");
        Ok(state.to_view())
    }

    /// React to a change notification. Returns `true` if the view was
    /// replaced.
    ///
    /// Changes written through this instance's own cache handle, or under
    /// another key, are ignored.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::reload_from_cache`].
    pub async fn handle_cache_event(&self, event: &CacheEvent) -> Result<bool, SyncError> {
        if event.source == self.cache.handle_id() {
            return Ok(false);
        }
        if event.key != self.state.lock().await.cache_key() {
            return Ok(false);
        }
        self.reload_from_cache().await?;
        Ok(true)
    }

    /// Spawn a task applying change notifications from other handles.
    ///
    /// The task holds a reference to `self`; abort the handle when the
    /// session ends.
    #[must_use]
    pub fn watch_cache(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.cache.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(err) = this.handle_cache_event(&event).await {
                            tracing::warn!(%err, "failed to apply cache change");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "cache events lagged; reloading");
                        if let Err(err) = this.reload_from_cache().await {
                            tracing::warn!(%err, "failed to reload cache");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    async fn merge_guest(
        &self,
        guest: &ProgressSnapshot,
        remote: &ProgressSnapshot,
    ) -> Result<SyncView, SyncError> {
        let missing: Vec<ToggleIntent> = self
            .engine
            .known_solved(guest)
            .into_iter()
            .filter(|id| !remote.is_solved(id))
            .filter_map(|id| {
                let difficulty = self.engine.catalog().get(&id)?.difficulty();
                Some(ToggleIntent::new(id, difficulty, true))
            })
            .collect();

        let merged = missing.len();
        for intent in missing {
            self.toggle(intent).await?;
        }
        tracing::info!(merged, "merged guest progress into remote snapshot");
        Ok(self.view().await)
    }

    /// Guest writes go straight to the cache; the view only moves once the
    /// write succeeded.
    async fn commit_guest(
        &self,
        state: &mut SyncState,
        next: ProgressSnapshot,
    ) -> Result<(), SyncError> {
        if let Err(err) = self.cache.store(GUEST_PROGRESS_KEY, &next).await {
            tracing::warn!(%err, "guest progress not saved");
            state.notice = Some(SyncNotice::NotSaved(err.to_string()));
            return Err(SyncError::NotSaved(err.to_string()));
        }
        state.version += 1;
        state.confirmed_version = state.version;
        state.confirmed = next.clone();
        state.view = next;
        state.stale = false;
        Ok(())
    }

    async fn settle(
        &self,
        version: u64,
        epoch: u64,
        result: Result<ProgressSnapshot, RemoteError>,
    ) -> Result<SyncView, SyncError> {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            tracing::debug!(version, "dropping result from a previous session");
            return match result {
                Ok(_) => Ok(state.to_view()),
                Err(err) => Err(SyncError::NotSaved(err.to_string())),
            };
        }

        state.pending.retain(|p| p.version != version);
        let outcome = match result {
            Ok(stored) => {
                if version > state.confirmed_version {
                    state.confirmed = stored;
                    state.confirmed_version = version;
                    let key = state.cache_key();
                    self.mirror(&key, &state.confirmed).await;
                }
                state.stale = false;
                Ok(())
            }
            Err(RemoteError::Unauthorized) => {
                tracing::warn!(version, "write refused: session expired");
                Err(SyncError::Unauthorized)
            }
            Err(err) => {
                tracing::warn!(version, %err, "progress not saved; rolled back");
                state.notice = Some(SyncNotice::NotSaved(err.to_string()));
                Err(SyncError::NotSaved(err.to_string()))
            }
        };
        state.view = self.replay(&state.confirmed, &state.pending);
        outcome.map(|()| state.to_view())
    }

    fn replay(&self, base: &ProgressSnapshot, pending: &[Pending]) -> ProgressSnapshot {
        let now = self.clock.now();
        pending.iter().fold(base.clone(), |acc, p| match &p.op {
            PendingOp::Toggle(intent) => match self.engine.toggle(&acc, intent, now) {
                Ok(outcome) => outcome.snapshot,
                Err(_) => acc,
            },
            PendingOp::Reset => self.engine.reset(),
        })
    }

    /// Malformed records and records naming unknown problems read as empty.
    async fn read_cache(&self, key: &str) -> ProgressSnapshot {
        match self.cache.load(key).await {
            Ok(Some(snapshot)) => self.engine.reconcile(&snapshot).unwrap_or_else(|err| {
                tracing::warn!(key, %err, "discarding cached progress");
                ProgressSnapshot::empty()
            }),
            Ok(None) => ProgressSnapshot::empty(),
            Err(err) => {
                tracing::warn!(key, %err, "cached progress unreadable");
                ProgressSnapshot::empty()
            }
        }
    }

    async fn mirror(&self, key: &str, snapshot: &ProgressSnapshot) {
        if let Err(err) = self.cache.store(key, snapshot).await {
            tracing::warn!(key, %err, "failed to mirror progress locally");
        }
    }
}
