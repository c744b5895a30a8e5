use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use crate::auth::{AuthProvider, AuthStateCallback};
use crate::error::MirrorError;
use crate::model::SubjectId;
use crate::platform::{sleep, spawn_detached};
use crate::remote::{ListenerRegistration, SubscriptionManager};
use crate::util::Observer;

/// Lifecycle phase of the supervised session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorPhase {
    SignedOut,
    Authenticating,
    Streaming,
    Retrying,
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    /// Consecutive stream errors tolerated before giving up.
    pub max_retries: u32,
    /// Fixed delay between attempts; no backoff.
    pub retry_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_retries: 20,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub type StreamFn<P> =
    Arc<dyn Fn(&SubjectId, Observer<P>) -> ListenerRegistration + Send + Sync>;
pub type DataFn<P> = Arc<dyn Fn(Option<&P>, Option<&SubjectId>) + Send + Sync>;
pub type AuthenticatedHook = Arc<dyn Fn(SubjectId) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ExhaustedHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Behavior injected into the supervisor.
///
/// `stream` opens the subject-scoped subscription and hands back its stop
/// capability. `on_data` receives every payload together with the subject it
/// belongs to, and `(None, None)` once per sign-out observation so consumers
/// can clear their own state. The optional hooks run after authentication
/// (before the stream starts) and after the retry budget is spent.
pub struct SupervisorConfig<P> {
    settings: SupervisorSettings,
    stream: StreamFn<P>,
    on_data: DataFn<P>,
    on_authenticated: Option<AuthenticatedHook>,
    on_exhausted: Option<ExhaustedHook>,
}

impl<P> SupervisorConfig<P> {
    pub fn new(
        stream: impl Fn(&SubjectId, Observer<P>) -> ListenerRegistration + Send + Sync + 'static,
        on_data: impl Fn(Option<&P>, Option<&SubjectId>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            settings: SupervisorSettings::default(),
            stream: Arc::new(stream),
            on_data: Arc::new(on_data),
            on_authenticated: None,
            on_exhausted: None,
        }
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_on_authenticated(
        mut self,
        hook: impl Fn(SubjectId) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    ) -> Self {
        self.on_authenticated = Some(Arc::new(hook));
        self
    }

    pub fn with_on_exhausted(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_exhausted = Some(Arc::new(hook));
        self
    }
}

struct SessionState {
    phase: SupervisorPhase,
    cached_subject: Option<SubjectId>,
    retry_count: u32,
}

struct SupervisorInner<P> {
    auth: Arc<dyn AuthProvider>,
    config: SupervisorConfig<P>,
    subscriptions: SubscriptionManager,
    auth_registration: Mutex<Option<ListenerRegistration>>,
    state: Mutex<SessionState>,
    // bumped on sign-in, sign-out, reset and dispose; a pending retry timer
    // or deferred stream start only acts if the epoch it captured still holds
    epoch: AtomicU64,
    disposed: AtomicBool,
    ready: AtomicBool,
}

/// Binds a subject-scoped stream to the authentication state.
///
/// While a subject is signed in the supervisor keeps exactly one stream
/// live, restarting it after errors with a fixed delay until the retry
/// budget is spent. Sign-out cancels any pending retry, stops the stream
/// and notifies `on_data` with `(None, None)`. All state changes are decided
/// under one lock and callbacks run outside it.
pub struct AuthGatedSupervisor<P> {
    inner: Arc<SupervisorInner<P>>,
}

impl<P> Clone for AuthGatedSupervisor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Send + Sync + 'static> AuthGatedSupervisor<P> {
    pub fn new(auth: Arc<dyn AuthProvider>, config: SupervisorConfig<P>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                auth,
                config,
                subscriptions: SubscriptionManager::new(),
                auth_registration: Mutex::new(None),
                state: Mutex::new(SessionState {
                    phase: SupervisorPhase::SignedOut,
                    cached_subject: None,
                    retry_count: 0,
                }),
                epoch: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribes to the authentication state. No-op while a subscription is
    /// already live, and after `dispose`.
    pub fn initialize(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        let mut registration = self.inner.auth_registration.lock().unwrap();
        if registration.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let callback: AuthStateCallback = Arc::new(move |subject| {
            if let Some(inner) = weak.upgrade() {
                SupervisorInner::handle_auth_observation(&inner, subject.cloned());
            }
        });
        *registration = Some(self.inner.auth.subscribe_auth_state(callback));
    }

    /// Cancels any pending retry, stops the live stream, resets the retry
    /// count and, if a subject is still cached, starts over for it without
    /// waiting for a fresh authentication observation.
    pub fn reset_and_reinitialize(&self) {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        let epoch = self.inner.bump_epoch();
        let subject = {
            let mut state = self.inner.state.lock().unwrap();
            state.retry_count = 0;
            match state.cached_subject.clone() {
                Some(subject) => {
                    state.phase = SupervisorPhase::Authenticating;
                    Some(subject)
                }
                None => {
                    state.phase = SupervisorPhase::SignedOut;
                    None
                }
            }
        };
        self.inner.subscriptions.stop();
        if let Some(subject) = subject {
            log::debug!("reinitializing stream for subject {subject}");
            SupervisorInner::begin_session(&self.inner, subject, epoch, false);
        }
    }

    /// Terminal teardown: stops the stream and the authentication
    /// subscription. Every later call and observation is ignored.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.bump_epoch();
        self.inner.subscriptions.stop();
        if let Some(mut registration) = self.inner.auth_registration.lock().unwrap().take() {
            registration.stop();
        }
        log::debug!("supervisor disposed");
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.inner.state.lock().unwrap().phase
    }

    pub fn cached_subject_id(&self) -> Option<SubjectId> {
        self.inner.state.lock().unwrap().cached_subject.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.state.lock().unwrap().retry_count
    }

    pub fn is_retrying(&self) -> bool {
        self.phase() == SupervisorPhase::Retrying
    }

    /// Sticky: true once any snapshot of the supervised stream has arrived.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }
}

impl<P: Send + Sync + 'static> SupervisorInner<P> {
    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn session_current(inner: &Arc<Self>, epoch: u64, subject: &str) -> bool {
        if inner.disposed.load(Ordering::SeqCst) || inner.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        let state = inner.state.lock().unwrap();
        state.cached_subject.as_deref() == Some(subject)
    }

    fn handle_auth_observation(inner: &Arc<Self>, subject: Option<SubjectId>) {
        if inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        match subject {
            Some(subject) => Self::handle_sign_in(inner, subject),
            None => Self::handle_sign_out(inner),
        }
    }

    fn handle_sign_in(inner: &Arc<Self>, subject: SubjectId) {
        let epoch = inner.bump_epoch();
        {
            let mut state = inner.state.lock().unwrap();
            state.cached_subject = Some(subject.clone());
            state.retry_count = 0;
            state.phase = SupervisorPhase::Authenticating;
        }
        log::debug!("subject {subject} signed in, starting stream");
        Self::begin_session(inner, subject, epoch, true);
    }

    fn handle_sign_out(inner: &Arc<Self>) {
        inner.bump_epoch();
        {
            let mut state = inner.state.lock().unwrap();
            state.cached_subject = None;
            state.retry_count = 0;
            state.phase = SupervisorPhase::SignedOut;
        }
        inner.subscriptions.stop();
        log::debug!("subject signed out, stream stopped");
        (inner.config.on_data)(None, None);
    }

    /// Runs the authenticated hook (when asked to) and then starts the
    /// stream, unless the session moved on while the hook was awaited.
    fn begin_session(inner: &Arc<Self>, subject: SubjectId, epoch: u64, run_hook: bool) {
        let weak = Arc::downgrade(inner);
        let hook = if run_hook {
            inner.config.on_authenticated.clone()
        } else {
            None
        };
        spawn_detached(async move {
            if let Some(hook) = hook {
                hook(subject.clone()).await;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !Self::session_current(&inner, epoch, &subject) {
                return;
            }
            Self::start_stream(&inner, subject, epoch);
        });
    }

    fn start_stream(inner: &Arc<Self>, subject: SubjectId, epoch: u64) {
        let observer = Self::session_observer(inner, subject.clone(), epoch);
        inner
            .subscriptions
            .start(|| (inner.config.stream)(&subject, observer));
    }

    fn session_observer(inner: &Arc<Self>, subject: SubjectId, epoch: u64) -> Observer<P> {
        let next_inner = Arc::downgrade(inner);
        let next_subject = subject.clone();
        let error_inner = Arc::downgrade(inner);
        Observer::new()
            .with_next(move |payload: &P| {
                let Some(inner) = next_inner.upgrade() else {
                    return;
                };
                if inner.disposed.load(Ordering::SeqCst)
                    || inner.epoch.load(Ordering::SeqCst) != epoch
                {
                    return;
                }
                {
                    let mut state = inner.state.lock().unwrap();
                    state.phase = SupervisorPhase::Streaming;
                    state.retry_count = 0;
                }
                inner.ready.store(true, Ordering::SeqCst);
                (inner.config.on_data)(Some(payload), Some(&next_subject));
            })
            .with_error(move |error: &MirrorError| {
                let Some(inner) = error_inner.upgrade() else {
                    return;
                };
                if inner.disposed.load(Ordering::SeqCst)
                    || inner.epoch.load(Ordering::SeqCst) != epoch
                {
                    return;
                }
                log::warn!("stream for subject {subject} failed: {error}");
                Self::handle_stream_error(&inner, subject.clone(), epoch);
            })
    }

    fn handle_stream_error(inner: &Arc<Self>, subject: SubjectId, epoch: u64) {
        inner.subscriptions.stop();
        let max_retries = inner.config.settings.max_retries;
        let scheduled = {
            let mut state = inner.state.lock().unwrap();
            state.retry_count += 1;
            if state.retry_count < max_retries {
                state.phase = SupervisorPhase::Retrying;
                Ok(state.retry_count)
            } else {
                state.phase = SupervisorPhase::Exhausted;
                Err(state.retry_count)
            }
        };
        match scheduled {
            Ok(attempt) => {
                log::debug!(
                    "scheduling retry {attempt} of {max_retries} in {:?}",
                    inner.config.settings.retry_delay
                );
                Self::schedule_retry(inner, subject, epoch);
            }
            Err(attempts) => {
                log::warn!("giving up on subject stream after {attempts} failed attempts");
                if let Some(hook) = &inner.config.on_exhausted {
                    hook(attempts);
                }
            }
        }
    }

    fn schedule_retry(inner: &Arc<Self>, subject: SubjectId, epoch: u64) {
        let weak = Arc::downgrade(inner);
        let delay = inner.config.settings.retry_delay;
        spawn_detached(async move {
            sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if !Self::session_current(&inner, epoch, &subject) {
                return;
            }
            {
                let mut state = inner.state.lock().unwrap();
                if state.phase != SupervisorPhase::Retrying {
                    return;
                }
                state.phase = SupervisorPhase::Authenticating;
            }
            log::debug!("retrying stream for subject {subject}");
            Self::start_stream(&inner, subject, epoch);
        });
    }
}
