#![cfg(not(target_arch = "wasm32"))]

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docmirror::api::CollectionApi;
use docmirror::auth::{
    AuthGatedSupervisor, AuthProvider, AuthStateCallback, SupervisorConfig, SupervisorPhase,
    SupervisorSettings,
};
use docmirror::error::{unavailable, MirrorError};
use docmirror::model::{Entity, SubjectId};
use docmirror::remote::{
    Datastore, InMemoryDatastore, ListenerRegistration, QueryScope, QuerySnapshot,
};
use docmirror::util::Observer;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Task {
    id: String,
    owner: String,
    title: String,
}

impl Entity for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

fn task(id: &str, owner: &str) -> Task {
    Task {
        id: id.to_string(),
        owner: owner.to_string(),
        title: format!("Task {id}"),
    }
}

struct FakeAuthInner {
    current: Mutex<Option<SubjectId>>,
    subscribers: Mutex<Vec<(u64, AuthStateCallback)>>,
    counter: AtomicU64,
    stops: AtomicUsize,
}

#[derive(Clone)]
struct FakeAuth {
    inner: Arc<FakeAuthInner>,
}

impl FakeAuth {
    fn new(current: Option<&str>) -> Self {
        Self {
            inner: Arc::new(FakeAuthInner {
                current: Mutex::new(current.map(str::to_string)),
                subscribers: Mutex::new(Vec::new()),
                counter: AtomicU64::new(1),
                stops: AtomicUsize::new(0),
            }),
        }
    }

    fn emit(&self, subject: Option<&str>) {
        let next = subject.map(str::to_string);
        *self.inner.current.lock().unwrap() = next.clone();
        let callbacks: Vec<AuthStateCallback> = self
            .inner
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(next.as_ref());
        }
    }

    fn stop_count(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }
}

impl AuthProvider for FakeAuth {
    fn subscribe_auth_state(&self, on_change: AuthStateCallback) -> ListenerRegistration {
        let id = self.inner.counter.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push((id, Arc::clone(&on_change)));
        on_change(self.inner.current.lock().unwrap().as_ref());
        let inner = Arc::clone(&self.inner);
        ListenerRegistration::new(move || {
            inner
                .subscribers
                .lock()
                .unwrap()
                .retain(|(sid, _)| *sid != id);
            inner.stops.fetch_add(1, Ordering::SeqCst);
        })
    }
}

type DataEvents = Arc<Mutex<Vec<(Option<usize>, Option<SubjectId>)>>>;

/// Supervisor wired to a real collection api: the stream is the api's
/// owner-scoped query stream, stop delegates to the api.
fn supervised_tasks(
    store: &InMemoryDatastore<Task>,
    auth: &FakeAuth,
    settings: SupervisorSettings,
) -> (
    AuthGatedSupervisor<QuerySnapshot<Task>>,
    CollectionApi<Task>,
    DataEvents,
) {
    let api = CollectionApi::new(Arc::new(store.clone()));
    let events: DataEvents = Arc::new(Mutex::new(Vec::new()));

    let stream_api = api.clone();
    let sink = Arc::clone(&events);
    let config = SupervisorConfig::new(
        move |subject: &SubjectId, observer: Observer<QuerySnapshot<Task>>| {
            let scope = QueryScope::owned_by("owner", subject.clone());
            stream_api.stream_scope_observed(scope, observer);
            let stop_api = stream_api.clone();
            ListenerRegistration::new(move || stop_api.stop_stream())
        },
        move |snapshot: Option<&QuerySnapshot<Task>>, subject: Option<&SubjectId>| {
            sink.lock()
                .unwrap()
                .push((snapshot.map(QuerySnapshot::len), subject.cloned()));
        },
    )
    .with_settings(settings);

    let supervisor = AuthGatedSupervisor::new(Arc::new(auth.clone()), config);
    (supervisor, api, events)
}

fn quick_settings(max_retries: u32) -> SupervisorSettings {
    SupervisorSettings {
        max_retries,
        retry_delay: Duration::from_millis(20),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread")]
async fn signed_in_subject_streams_its_own_documents() {
    let store = InMemoryDatastore::new();
    store
        .write("t1", &task("t1", "alice"), false)
        .await
        .expect("seed");
    store
        .write("t2", &task("t2", "bob"), false)
        .await
        .expect("seed");
    let auth = FakeAuth::new(Some("alice"));
    let (supervisor, api, events) = supervised_tasks(&store, &auth, quick_settings(3));

    supervisor.initialize();
    wait_until(|| supervisor.phase() == SupervisorPhase::Streaming).await;

    assert!(supervisor.is_ready());
    assert_eq!(api.all(), vec![task("t1", "alice")]);
    let last = events.lock().unwrap().last().cloned();
    assert_eq!(last, Some((Some(1), Some("alice".to_string()))));
}

#[tokio::test(flavor = "multi_thread")]
async fn three_errors_with_budget_three_exhaust_the_supervisor() {
    let store = InMemoryDatastore::<Task>::new();
    let auth = FakeAuth::new(Some("alice"));
    let exhausted: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    // a stream that connects but never turns healthy: snapshots are
    // swallowed so only errors reach the supervisor
    let stream_store = store.clone();
    let hook_sink = Arc::clone(&exhausted);
    let config = SupervisorConfig::new(
        move |subject: &SubjectId, observer: Observer<QuerySnapshot<Task>>| {
            let errors_only =
                Observer::new().with_error(move |error: &MirrorError| observer.emit_error(error));
            stream_store.subscribe_query(
                &QueryScope::owned_by("owner", subject.clone()),
                errors_only,
            )
        },
        |_: Option<&QuerySnapshot<Task>>, _: Option<&SubjectId>| {},
    )
    .with_settings(quick_settings(3))
    .with_on_exhausted(move |attempts| hook_sink.lock().unwrap().push(attempts));
    let supervisor = AuthGatedSupervisor::new(Arc::new(auth.clone()), config);

    supervisor.initialize();
    wait_until(|| store.active_listener_count() == 1).await;

    for attempt in 1..=2u32 {
        store.emit_query_error(&unavailable("stream broken"));
        assert_eq!(supervisor.retry_count(), attempt);
        assert!(supervisor.is_retrying());
        // the fixed-delay timer reconnects
        wait_until(|| store.active_listener_count() == 1).await;
    }

    store.emit_query_error(&unavailable("stream broken"));
    assert_eq!(supervisor.phase(), SupervisorPhase::Exhausted);
    assert_eq!(supervisor.retry_count(), 3);
    assert_eq!(exhausted.lock().unwrap().as_slice(), &[3]);

    // no fourth attempt after the budget is spent
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.phase(), SupervisorPhase::Exhausted);
    assert_eq!(store.active_listener_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn sign_out_stops_the_stream_and_notifies_absence_once() {
    let store = InMemoryDatastore::new();
    store
        .write("t1", &task("t1", "alice"), false)
        .await
        .expect("seed");
    let auth = FakeAuth::new(Some("alice"));
    let (supervisor, _api, events) = supervised_tasks(&store, &auth, quick_settings(3));

    supervisor.initialize();
    wait_until(|| supervisor.phase() == SupervisorPhase::Streaming).await;
    assert_eq!(store.active_listener_count(), 1);

    auth.emit(None);

    assert_eq!(supervisor.phase(), SupervisorPhase::SignedOut);
    assert_eq!(supervisor.cached_subject_id(), None);
    assert_eq!(supervisor.retry_count(), 0);
    wait_until(|| store.active_listener_count() == 0).await;

    let absences = events
        .lock()
        .unwrap()
        .iter()
        .filter(|(payload, subject)| payload.is_none() && subject.is_none())
        .count();
    assert_eq!(absences, 1);

    // no snapshots leak through after the sign-out
    store
        .write("t9", &task("t9", "alice"), false)
        .await
        .expect("write");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let late = events.lock().unwrap().last().cloned();
    assert_eq!(late, Some((None, None)));
}

#[tokio::test(flavor = "multi_thread")]
async fn switching_subjects_retargets_the_stream() {
    let store = InMemoryDatastore::new();
    store
        .write("t1", &task("t1", "alice"), false)
        .await
        .expect("seed");
    store
        .write("t2", &task("t2", "bob"), false)
        .await
        .expect("seed");
    let auth = FakeAuth::new(Some("alice"));
    let (supervisor, api, _events) = supervised_tasks(&store, &auth, quick_settings(3));

    supervisor.initialize();
    wait_until(|| api.exists("t1")).await;

    auth.emit(Some("bob"));
    wait_until(|| api.exists("t2") && !api.exists("t1")).await;

    assert_eq!(supervisor.cached_subject_id().as_deref(), Some("bob"));
    assert_eq!(store.active_listener_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_and_reinitialize_recovers_an_exhausted_supervisor() {
    let store = InMemoryDatastore::new();
    let auth = FakeAuth::new(Some("alice"));
    let (supervisor, _api, _events) = supervised_tasks(&store, &auth, quick_settings(1));

    supervisor.initialize();
    wait_until(|| supervisor.phase() == SupervisorPhase::Streaming).await;

    // budget of one: the first error exhausts immediately
    store.emit_query_error(&unavailable("stream broken"));
    wait_until(|| supervisor.phase() == SupervisorPhase::Exhausted).await;
    assert_eq!(store.active_listener_count(), 0);

    supervisor.reset_and_reinitialize();
    wait_until(|| supervisor.phase() == SupervisorPhase::Streaming).await;
    assert_eq!(supervisor.retry_count(), 0);
    assert_eq!(store.active_listener_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dispose_releases_stream_and_auth_subscription() {
    let store = InMemoryDatastore::new();
    let auth = FakeAuth::new(Some("alice"));
    let (supervisor, _api, events) = supervised_tasks(&store, &auth, quick_settings(3));

    supervisor.initialize();
    wait_until(|| supervisor.phase() == SupervisorPhase::Streaming).await;

    supervisor.dispose();
    wait_until(|| store.active_listener_count() == 0).await;
    assert_eq!(auth.stop_count(), 1);

    let before = events.lock().unwrap().len();
    auth.emit(None);
    auth.emit(Some("bob"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(events.lock().unwrap().len(), before);
    assert_eq!(store.active_listener_count(), 0);
}
