use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use practice_core::model::{Difficulty, ProblemId, ProgressSnapshot, ProgressStats, UserId};
use practice_core::time::fixed_clock;
use practice_core::{ProblemCatalog, ProgressEngine, ToggleIntent};
use services::{
    GuestProgressPolicy, InProcessRemote, ProgressService, ProgressSync, RemoteError,
    RemoteProgress, SyncError, SyncNotice,
};
use storage::local::{CacheEvent, GUEST_PROGRESS_KEY, LocalCache, MemoryCache, user_progress_key};
use storage::repository::InMemoryRepository;
use tokio::sync::{Semaphore, mpsc};

fn catalog() -> Arc<ProblemCatalog> {
    Arc::new(ProblemCatalog::builtin().unwrap())
}

fn sync_over(cache: Arc<dyn LocalCache>, policy: GuestProgressPolicy) -> ProgressSync {
    ProgressSync::new(ProgressEngine::new(catalog()), fixed_clock(), cache, policy)
}

fn server() -> Arc<ProgressService> {
    Arc::new(ProgressService::new(
        fixed_clock(),
        catalog(),
        Arc::new(InMemoryRepository::new()),
    ))
}

fn alice() -> UserId {
    UserId::new("alice").unwrap()
}

fn id(raw: &str) -> ProblemId {
    ProblemId::new(raw).unwrap()
}

fn solve(raw: &str, difficulty: Difficulty) -> ToggleIntent {
    ToggleIntent::new(id(raw), difficulty, true)
}

fn solved_ids(snapshot: &ProgressSnapshot) -> Vec<&str> {
    snapshot.solved().iter().map(ProblemId::as_str).collect()
}

/// Reads succeed; every write fails with a transport error.
struct FailingRemote {
    inner: InProcessRemote,
}

#[async_trait]
impl RemoteProgress for FailingRemote {
    fn user(&self) -> &UserId {
        self.inner.user()
    }

    async fn fetch(&self) -> Result<ProgressSnapshot, RemoteError> {
        self.inner.fetch().await
    }

    async fn update(&self, _intent: &ToggleIntent) -> Result<ProgressSnapshot, RemoteError> {
        Err(RemoteError::Transport("connection reset".into()))
    }

    async fn reset(&self) -> Result<ProgressSnapshot, RemoteError> {
        Err(RemoteError::Transport("connection reset".into()))
    }
}

/// Every call fails the same way.
struct BrokenRemote {
    user: UserId,
    unauthorized: bool,
}

impl BrokenRemote {
    fn error(&self) -> RemoteError {
        if self.unauthorized {
            RemoteError::Unauthorized
        } else {
            RemoteError::Transport("server unreachable".into())
        }
    }
}

#[async_trait]
impl RemoteProgress for BrokenRemote {
    fn user(&self) -> &UserId {
        &self.user
    }

    async fn fetch(&self) -> Result<ProgressSnapshot, RemoteError> {
        Err(self.error())
    }

    async fn update(&self, _intent: &ToggleIntent) -> Result<ProgressSnapshot, RemoteError> {
        Err(self.error())
    }

    async fn reset(&self) -> Result<ProgressSnapshot, RemoteError> {
        Err(self.error())
    }
}

/// Holds each update until the test releases a permit.
struct GatedRemote {
    inner: InProcessRemote,
    gate: Arc<Semaphore>,
    entered: mpsc::UnboundedSender<ProblemId>,
    fail_next: AtomicBool,
}

#[async_trait]
impl RemoteProgress for GatedRemote {
    fn user(&self) -> &UserId {
        self.inner.user()
    }

    async fn fetch(&self) -> Result<ProgressSnapshot, RemoteError> {
        self.inner.fetch().await
    }

    async fn update(&self, intent: &ToggleIntent) -> Result<ProgressSnapshot, RemoteError> {
        self.entered.send(intent.problem_id.clone()).unwrap();
        self.gate.acquire().await.unwrap().forget();
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Transport("timed out".into()));
        }
        self.inner.update(intent).await
    }

    async fn reset(&self) -> Result<ProgressSnapshot, RemoteError> {
        self.inner.reset().await
    }
}

async fn wait_for_pending(sync: &ProgressSync, pending: usize) {
    for _ in 0..200 {
        if sync.view().await.pending == pending {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("never reached {pending} pending writes");
}

#[tokio::test]
async fn guest_progress_survives_a_new_session() {
    let cache = MemoryCache::new();
    let first = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    first.load().await.unwrap();
    first.toggle(solve("two-sum", Difficulty::Easy)).await.unwrap();
    first
        .toggle(solve("lru-cache", Difficulty::Medium))
        .await
        .unwrap();

    let second = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    let view = second.load().await.unwrap();
    assert_eq!(solved_ids(&view.snapshot), vec!["lru-cache", "two-sum"]);
    assert_eq!(
        view.snapshot.stats(),
        ProgressStats::from_buckets(1, 1, 0).unwrap()
    );
    assert!(view.signed_in.is_none());
    assert!(!view.stale);
}

#[tokio::test]
async fn unusable_guest_records_load_as_empty() {
    let cache = MemoryCache::new();
    let sync = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);

    cache.put_raw(GUEST_PROGRESS_KEY, "{not json").unwrap();
    assert!(sync.load().await.unwrap().snapshot.is_empty());

    cache
        .put_raw(
            GUEST_PROGRESS_KEY,
            r#"{"problems":{"ghost":true},"stats":{"easy":1,"medium":0,"hard":0}}"#,
        )
        .unwrap();
    assert!(sync.load().await.unwrap().snapshot.is_empty());
}

#[tokio::test]
async fn rejected_intent_changes_nothing() {
    let sync = sync_over(Arc::new(MemoryCache::new()), GuestProgressPolicy::Discard);
    sync.load().await.unwrap();
    sync.toggle(solve("two-sum", Difficulty::Easy)).await.unwrap();
    let before = sync.view().await;

    let err = sync
        .toggle(solve("not-a-problem", Difficulty::Easy))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));

    let err = sync
        .toggle(solve("lru-cache", Difficulty::Hard))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(sync.view().await, before);
}

#[tokio::test]
async fn failed_write_rolls_back_to_confirmed_snapshot() {
    let server = server();
    server
        .update(&alice(), &solve("two-sum", Difficulty::Easy))
        .await
        .unwrap();
    let sync = sync_over(Arc::new(MemoryCache::new()), GuestProgressPolicy::Discard);
    sync.sign_in(Arc::new(FailingRemote {
        inner: InProcessRemote::new(Arc::clone(&server), alice()),
    }))
    .await
    .unwrap();
    let confirmed = sync.view().await.snapshot;

    let err = sync
        .toggle(solve("n-queens", Difficulty::Hard))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotSaved(_)));

    let view = sync.view().await;
    assert_eq!(view.snapshot, confirmed);
    assert_eq!(view.pending, 0);
    assert!(matches!(
        sync.take_notice().await,
        Some(SyncNotice::NotSaved(_))
    ));
    assert!(sync.take_notice().await.is_none());
}

#[tokio::test]
async fn authenticated_writes_reach_server_and_mirror() {
    let server = server();
    let cache = MemoryCache::new();
    let sync = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    sync.sign_in(Arc::new(InProcessRemote::new(Arc::clone(&server), alice())))
        .await
        .unwrap();

    let view = sync
        .toggle(solve("valid-parentheses", Difficulty::Easy))
        .await
        .unwrap();
    assert_eq!(view.signed_in, Some(alice()));
    assert_eq!(view.pending, 0);
    assert_eq!(server.get(&alice()).await.unwrap(), view.snapshot);
    assert_eq!(
        cache.load(&user_progress_key(&alice())).await.unwrap(),
        Some(view.snapshot.clone())
    );
    assert_eq!(cache.load(GUEST_PROGRESS_KEY).await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_server_falls_back_to_mirror() {
    let cache = MemoryCache::new();
    let mirror = {
        let sync = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
        sync.sign_in(Arc::new(InProcessRemote::new(server(), alice())))
            .await
            .unwrap();
        sync.toggle(solve("two-sum", Difficulty::Easy))
            .await
            .unwrap()
            .snapshot
    };

    let sync = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    let view = sync
        .sign_in(Arc::new(BrokenRemote {
            user: alice(),
            unauthorized: false,
        }))
        .await
        .unwrap();
    assert!(view.stale);
    assert_eq!(view.snapshot, mirror);
    assert!(matches!(
        sync.take_notice().await,
        Some(SyncNotice::Offline(_))
    ));
}

#[tokio::test]
async fn refused_sign_in_stays_in_guest_mode() {
    let sync = sync_over(Arc::new(MemoryCache::new()), GuestProgressPolicy::Discard);
    sync.load().await.unwrap();
    sync.toggle(solve("two-sum", Difficulty::Easy)).await.unwrap();

    let err = sync
        .sign_in(Arc::new(BrokenRemote {
            user: UserId::new("mallory").unwrap(),
            unauthorized: true,
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));

    let view = sync.view().await;
    assert!(view.signed_in.is_none());
    assert_eq!(solved_ids(&view.snapshot), vec!["two-sum"]);

    let view = sync
        .toggle(solve("lru-cache", Difficulty::Medium))
        .await
        .unwrap();
    assert!(view.signed_in.is_none());
    assert_eq!(solved_ids(&view.snapshot), vec!["lru-cache", "two-sum"]);
}

#[tokio::test]
async fn late_confirmation_keeps_newer_optimistic_state() {
    let server = server();
    let gate = Arc::new(Semaphore::new(0));
    let (entered_tx, mut entered) = mpsc::unbounded_channel();
    let sync = Arc::new(sync_over(
        Arc::new(MemoryCache::new()),
        GuestProgressPolicy::Discard,
    ));
    sync.sign_in(Arc::new(GatedRemote {
        inner: InProcessRemote::new(Arc::clone(&server), alice()),
        gate: Arc::clone(&gate),
        entered: entered_tx,
        fail_next: AtomicBool::new(false),
    }))
    .await
    .unwrap();

    let first = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.toggle(solve("two-sum", Difficulty::Easy)).await }
    });
    assert_eq!(entered.recv().await, Some(id("two-sum")));

    let second = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.toggle(solve("lru-cache", Difficulty::Medium)).await }
    });
    wait_for_pending(&sync, 2).await;
    assert_eq!(
        solved_ids(&sync.view().await.snapshot),
        vec!["lru-cache", "two-sum"]
    );

    gate.add_permits(1);
    let after_first = first.await.unwrap().unwrap();
    assert_eq!(after_first.pending, 1);
    assert_eq!(solved_ids(&after_first.snapshot), vec!["lru-cache", "two-sum"]);

    assert_eq!(entered.recv().await, Some(id("lru-cache")));
    gate.add_permits(1);
    let after_second = second.await.unwrap().unwrap();
    assert_eq!(after_second.pending, 0);
    assert_eq!(
        after_second.snapshot.stats(),
        ProgressStats::from_buckets(1, 1, 0).unwrap()
    );
    assert_eq!(server.get(&alice()).await.unwrap(), after_second.snapshot);
}

#[tokio::test]
async fn writes_are_sent_in_issue_order() {
    let server = server();
    let gate = Arc::new(Semaphore::new(0));
    let (entered_tx, mut entered) = mpsc::unbounded_channel();
    let sync = Arc::new(sync_over(
        Arc::new(MemoryCache::new()),
        GuestProgressPolicy::Discard,
    ));
    sync.sign_in(Arc::new(GatedRemote {
        inner: InProcessRemote::new(Arc::clone(&server), alice()),
        gate: Arc::clone(&gate),
        entered: entered_tx,
        fail_next: AtomicBool::new(false),
    }))
    .await
    .unwrap();

    let issued = [
        ("two-sum", Difficulty::Easy),
        ("lru-cache", Difficulty::Medium),
        ("n-queens", Difficulty::Hard),
        ("valid-parentheses", Difficulty::Easy),
    ];
    let mut tasks = Vec::new();
    for (n, (raw, difficulty)) in issued.into_iter().enumerate() {
        let sync_for_task = Arc::clone(&sync);
        tasks.push(tokio::spawn(async move {
            sync_for_task.toggle(solve(raw, difficulty)).await
        }));
        wait_for_pending(&sync, n + 1).await;
    }

    gate.add_permits(issued.len());
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut sent = Vec::new();
    while let Ok(problem) = entered.try_recv() {
        sent.push(problem);
    }
    let expected: Vec<ProblemId> = issued.iter().map(|(raw, _)| id(raw)).collect();
    assert_eq!(sent, expected);

    let view = sync.view().await;
    assert_eq!(view.pending, 0);
    assert_eq!(server.get(&alice()).await.unwrap(), view.snapshot);
}

#[tokio::test]
async fn failed_write_keeps_later_pending_write() {
    let server = server();
    let gate = Arc::new(Semaphore::new(0));
    let (entered_tx, mut entered) = mpsc::unbounded_channel();
    let sync = Arc::new(sync_over(
        Arc::new(MemoryCache::new()),
        GuestProgressPolicy::Discard,
    ));
    sync.sign_in(Arc::new(GatedRemote {
        inner: InProcessRemote::new(Arc::clone(&server), alice()),
        gate: Arc::clone(&gate),
        entered: entered_tx,
        fail_next: AtomicBool::new(true),
    }))
    .await
    .unwrap();

    let first = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.toggle(solve("two-sum", Difficulty::Easy)).await }
    });
    entered.recv().await.unwrap();
    let second = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move { sync.toggle(solve("n-queens", Difficulty::Hard)).await }
    });
    wait_for_pending(&sync, 2).await;

    gate.add_permits(1);
    assert!(matches!(
        first.await.unwrap(),
        Err(SyncError::NotSaved(_))
    ));
    assert_eq!(solved_ids(&sync.view().await.snapshot), vec!["n-queens"]);

    entered.recv().await.unwrap();
    gate.add_permits(1);
    let view = second.await.unwrap().unwrap();
    assert_eq!(solved_ids(&view.snapshot), vec!["n-queens"]);
    assert_eq!(
        view.snapshot.stats(),
        ProgressStats::from_buckets(0, 0, 1).unwrap()
    );
}

#[tokio::test]
async fn other_handles_changes_replace_the_view() {
    let cache = MemoryCache::new();
    let tab_a_cache = cache.handle();
    let tab_a_id = tab_a_cache.handle_id();
    let tab_b_cache = cache.handle();
    let tab_b_id = tab_b_cache.handle_id();

    let tab_a = sync_over(Arc::new(tab_a_cache), GuestProgressPolicy::Discard);
    let tab_b = sync_over(Arc::new(tab_b_cache), GuestProgressPolicy::Discard);
    tab_a.load().await.unwrap();
    tab_b.load().await.unwrap();

    let written = tab_a
        .toggle(solve("two-sum", Difficulty::Easy))
        .await
        .unwrap()
        .snapshot;

    let own = CacheEvent {
        key: GUEST_PROGRESS_KEY.to_owned(),
        source: tab_b_id,
    };
    assert!(!tab_b.handle_cache_event(&own).await.unwrap());
    let other_key = CacheEvent {
        key: user_progress_key(&alice()),
        source: tab_a_id,
    };
    assert!(!tab_b.handle_cache_event(&other_key).await.unwrap());
    assert!(tab_b.view().await.snapshot.is_empty());

    let foreign = CacheEvent {
        key: GUEST_PROGRESS_KEY.to_owned(),
        source: tab_a_id,
    };
    assert!(tab_b.handle_cache_event(&foreign).await.unwrap());
    assert_eq!(tab_b.view().await.snapshot, written);
}

#[tokio::test]
async fn watcher_applies_changes_from_other_handles() {
    let cache = MemoryCache::new();
    let tab_a = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    let tab_b = Arc::new(sync_over(
        Arc::new(cache.handle()),
        GuestProgressPolicy::Discard,
    ));
    tab_a.load().await.unwrap();
    tab_b.load().await.unwrap();
    let watcher = tab_b.watch_cache();

    tab_a
        .toggle(solve("lru-cache", Difficulty::Medium))
        .await
        .unwrap();

    let mut seen = false;
    for _ in 0..200 {
        if tab_b.view().await.snapshot.is_solved(&id("lru-cache")) {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    watcher.abort();
    assert!(seen);
}

#[tokio::test]
async fn sign_in_discards_guest_progress_by_default() {
    let server = server();
    server
        .update(&alice(), &solve("lru-cache", Difficulty::Medium))
        .await
        .unwrap();
    let cache = MemoryCache::new();
    let sync = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    sync.load().await.unwrap();
    sync.toggle(solve("two-sum", Difficulty::Easy)).await.unwrap();

    let view = sync
        .sign_in(Arc::new(InProcessRemote::new(Arc::clone(&server), alice())))
        .await
        .unwrap();
    assert_eq!(solved_ids(&view.snapshot), vec!["lru-cache"]);
    assert_eq!(solved_ids(&server.get(&alice()).await.unwrap()), vec!["lru-cache"]);

    let guest = cache.load(GUEST_PROGRESS_KEY).await.unwrap().unwrap();
    assert_eq!(solved_ids(&guest), vec!["two-sum"]);

    let view = sync.sign_out().await.unwrap();
    assert!(view.signed_in.is_none());
    assert_eq!(solved_ids(&view.snapshot), vec!["two-sum"]);
}

#[tokio::test]
async fn sign_in_can_merge_guest_progress() {
    let server = server();
    server
        .update(&alice(), &solve("lru-cache", Difficulty::Medium))
        .await
        .unwrap();
    let sync = sync_over(Arc::new(MemoryCache::new()), GuestProgressPolicy::Merge);
    sync.load().await.unwrap();
    sync.toggle(solve("two-sum", Difficulty::Easy)).await.unwrap();
    sync.toggle(solve("lru-cache", Difficulty::Medium))
        .await
        .unwrap();

    let view = sync
        .sign_in(Arc::new(InProcessRemote::new(Arc::clone(&server), alice())))
        .await
        .unwrap();
    assert_eq!(solved_ids(&view.snapshot), vec!["lru-cache", "two-sum"]);
    assert_eq!(
        view.snapshot.stats(),
        ProgressStats::from_buckets(1, 1, 0).unwrap()
    );
    assert_eq!(server.get(&alice()).await.unwrap(), view.snapshot);
}

#[tokio::test]
async fn reset_clears_both_modes() {
    let cache = MemoryCache::new();
    let sync = sync_over(Arc::new(cache.handle()), GuestProgressPolicy::Discard);
    sync.load().await.unwrap();
    sync.toggle(solve("two-sum", Difficulty::Easy)).await.unwrap();
    assert_eq!(sync.reset().await.unwrap().snapshot, ProgressSnapshot::empty());
    assert_eq!(
        cache.load(GUEST_PROGRESS_KEY).await.unwrap(),
        Some(ProgressSnapshot::empty())
    );

    let server = server();
    sync.sign_in(Arc::new(InProcessRemote::new(Arc::clone(&server), alice())))
        .await
        .unwrap();
    sync.toggle(solve("n-queens", Difficulty::Hard)).await.unwrap();
    let view = sync.reset().await.unwrap();
    assert_eq!(view.snapshot, ProgressSnapshot::empty());
    assert!(server.get(&alice()).await.unwrap().is_empty());

    let report = sync.report().await;
    assert_eq!(report.solved, 0);
    assert_eq!(report.percent, 0.0);
}
