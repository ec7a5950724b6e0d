use {
    crate::{
        binding::{ReferenceBinding, WeakLifetime},
        download::{DownloadCoordinator, DownloadOptions, DownloadSubscription, OnFail, Retry},
        error::{Error, SharedReport},
        key::AssetKey,
        progress::{sub_range, ByteProgress, Progress, Reporter},
        service::{poll_until_done, AssetProvider, OpHandle, OperationStatus},
        signal::{CompletionSignal, Outcome},
        sync::BoxFuture,
    },
    futures_util::future::{select, Either},
    parking_lot::Mutex,
    std::{
        fmt::{self, Debug},
        future::ready,
        marker::PhantomData,
        sync::{Arc, Weak},
    },
    tracing::Instrument as _,
};

/// Receives results of the load phase.
pub trait Observer<T>: Send + Sync {
    fn next(&self, value: &T);
    fn error(&self, error: &Error);
}

/// Strategy that issues and disposes external load operations
/// for one kind of loadable thing.
pub trait LoadKind: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    /// Issues external load call.
    fn start(&self, key: &AssetKey) -> OpHandle<Self::Output>;

    /// Gives up a load handle.
    /// The external call that reclaims it is issued before this function returns.
    /// The future finishes the protocol and may be detached.
    fn discard(&self, handle: OpHandle<Self::Output>) -> BoxFuture<'static, ()>;
}

/// Loads assets of type `T` from provider `P`.
pub struct AssetKind<P, T> {
    provider: Arc<P>,
    marker: PhantomData<fn() -> T>,
}

impl<P, T> AssetKind<P, T> {
    pub fn new(provider: Arc<P>) -> Self {
        AssetKind {
            provider,
            marker: PhantomData,
        }
    }
}

impl<P, T> LoadKind for AssetKind<P, T>
where
    P: AssetProvider<T>,
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn start(&self, key: &AssetKey) -> OpHandle<T> {
        self.provider.load_asset(key)
    }

    fn discard(&self, handle: OpHandle<T>) -> BoxFuture<'static, ()> {
        handle.release();
        Box::pin(ready(()))
    }
}

/// Validity of the request's handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Unallocated,
    InFlight,
    Completed,
}

/// Callbacks and binding of a load.
pub struct LoadOptions<T> {
    pub bound_object: Option<WeakLifetime>,
    pub progress: Option<Progress>,
    pub byte_progress: Option<ByteProgress>,
    pub observer: Option<Arc<dyn Observer<T>>>,
    pub on_fail: Option<OnFail>,
}

impl<T> Clone for LoadOptions<T> {
    fn clone(&self) -> Self {
        LoadOptions {
            bound_object: self.bound_object.clone(),
            progress: self.progress.clone(),
            byte_progress: self.byte_progress.clone(),
            observer: self.observer.clone(),
            on_fail: self.on_fail.clone(),
        }
    }
}

impl<T> Default for LoadOptions<T> {
    fn default() -> Self {
        LoadOptions {
            bound_object: None,
            progress: None,
            byte_progress: None,
            observer: None,
            on_fail: None,
        }
    }
}

impl<T> Debug for LoadOptions<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("LoadOptions")
            .field("bound_object", &self.bound_object)
            .field("progress", &self.progress.is_some())
            .field("byte_progress", &self.byte_progress.is_some())
            .field("observer", &self.observer.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .finish()
    }
}

impl<T> LoadOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases loaded value when `object` is destroyed.
    pub fn bind_to(mut self, object: impl Into<WeakLifetime>) -> Self {
        self.bound_object = Some(object.into());
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_byte_progress(
        mut self,
        byte_progress: impl Fn(f32, u64) + Send + Sync + 'static,
    ) -> Self {
        self.byte_progress = Some(Arc::new(byte_progress));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer<T>>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_on_fail(mut self, on_fail: impl Fn(Retry) + Send + Sync + 'static) -> Self {
        self.on_fail = Some(Arc::new(on_fail));
        self
    }
}

struct State<T> {
    key: AssetKey,
    generation: u64,
    handle: Option<OpHandle<T>>,
    value: Option<T>,
    pending: Option<CompletionSignal<T>>,
    downloads: Vec<DownloadSubscription>,
    binding: Option<ReferenceBinding>,
}

/// Everything taken out of the state when it's reset.
struct Detached<T> {
    handle: Option<OpHandle<T>>,
    pending: Option<CompletionSignal<T>>,
    downloads: Vec<DownloadSubscription>,
    binding: Option<ReferenceBinding>,
}

impl<T> State<T> {
    fn detach(&mut self) -> Detached<T> {
        self.value = None;
        Detached {
            handle: self.handle.take(),
            pending: self.pending.take(),
            downloads: std::mem::take(&mut self.downloads),
            binding: self.binding.take(),
        }
    }

    /// Keeps subscriptions of downloads still in flight and returns the rest.
    fn prune_downloads(&mut self) -> Vec<DownloadSubscription> {
        let (settled, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.downloads)
            .into_iter()
            .partition(|download| download.signal().is_settled());
        self.downloads = live;
        settled
    }
}

pub(crate) struct Shared<K: LoadKind> {
    pub(crate) kind: K,
    downloads: DownloadCoordinator,
    state: Mutex<State<K::Output>>,
}

impl<K> Shared<K>
where
    K: LoadKind,
{
    /// Cancels pending load, leaves downloads, detaches binding and discards handle.
    /// Downloads shared with other requests keep running.
    /// Returns future that finishes discarding, if there was a handle.
    fn dispose(&self, detached: Detached<K::Output>) -> Option<BoxFuture<'static, ()>> {
        if let Some(pending) = detached.pending {
            pending.try_cancel();
        }
        drop(detached.downloads);
        if let Some(binding) = detached.binding {
            binding.detach();
        }
        detached.handle.map(|handle| self.kind.discard(handle))
    }

    fn spawn_detached(&self, future: BoxFuture<'static, ()>) {
        if self.downloads.spawner().spawn(future).is_err() {
            tracing::error!("{}", Error::Spawn);
        }
    }

    /// Releases handle if it still belongs to `generation`.
    /// Triggered by destruction of the bound object.
    fn release_bound(&self, generation: u64) {
        let detached = {
            let mut state = self.state.lock();
            if state.generation != generation || state.handle.is_none() {
                return;
            }
            tracing::debug!("Bound object of `{}` destroyed", state.key);
            state.generation += 1;
            // Binding has already fired.
            state.binding = None;
            state.detach()
        };

        if let Some(discard) = self.dispose(detached) {
            self.spawn_detached(discard);
        }
    }
}

/// Request object that coordinates download and load of one key.
///
/// At most one handle is live per request.
/// Repeated loads while loading or loaded only await the current one.
pub struct Request<K: LoadKind> {
    pub(crate) shared: Arc<Shared<K>>,
}

/// Request for an asset of type `T` provided by `P`.
pub type AssetRequest<P, T> = Request<AssetKind<P, T>>;

impl<K> Clone for Request<K>
where
    K: LoadKind,
{
    fn clone(&self) -> Self {
        Request {
            shared: self.shared.clone(),
        }
    }
}

impl<K> Debug for Request<K>
where
    K: LoadKind,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        fmt.debug_struct("Request")
            .field("key", &state.key)
            .field("valid", &state.handle.is_some())
            .field("loaded", &state.value.is_some())
            .finish()
    }
}

impl<K> Request<K>
where
    K: LoadKind,
{
    pub(crate) fn new(kind: K, downloads: DownloadCoordinator, key: AssetKey) -> Self {
        Request {
            shared: Arc::new(Shared {
                kind,
                downloads,
                state: Mutex::new(State {
                    key,
                    generation: 0,
                    handle: None,
                    value: None,
                    pending: None,
                    downloads: Vec::new(),
                    binding: None,
                }),
            }),
        }
    }

    pub fn key(&self) -> AssetKey {
        self.shared.state.lock().key.clone()
    }

    /// Changes the key.
    ///
    /// Anything in flight for the old key is canceled
    /// and acquired handle is released before the new key is in effect.
    pub fn set_key(&self, key: impl Into<AssetKey>) {
        let key = key.into();
        let detached = {
            let mut state = self.shared.state.lock();
            if state.key == key {
                return;
            }
            tracing::debug!("Key changed from `{}` to `{}`", state.key, key);
            let detached = state.detach();
            state.generation += 1;
            state.key = key;
            detached
        };

        if let Some(discard) = self.shared.dispose(detached) {
            self.shared.spawn_detached(discard);
        }
    }

    /// Returns `true` if a handle currently exists for this request.
    pub fn is_valid(&self) -> bool {
        self.shared.state.lock().handle.is_some()
    }

    pub fn handle_state(&self) -> HandleState {
        let state = self.shared.state.lock();
        match (&state.handle, &state.value) {
            (Some(_), Some(_)) => HandleState::Completed,
            (Some(_), None) => HandleState::InFlight,
            (None, _) => match &state.pending {
                Some(pending) if !pending.is_settled() => HandleState::InFlight,
                _ => HandleState::Unallocated,
            },
        }
    }

    /// Loaded value, present only while handle is completed.
    pub fn value(&self) -> Option<K::Output> {
        self.shared.state.lock().value.clone()
    }

    /// Signal of the current or last load.
    pub fn signal(&self) -> Option<CompletionSignal<K::Output>> {
        self.shared.state.lock().pending.clone()
    }

    /// Downloads dependencies of the current key without loading it.
    pub async fn download_dependencies(&self, options: DownloadOptions) -> Outcome<()> {
        let (key, generation) = {
            let state = self.shared.state.lock();
            (state.key.clone(), state.generation)
        };

        let subscription = self.shared.downloads.download_dependencies(&key, options);
        let download = subscription.wait();
        let (settled, stale) = {
            let mut state = self.shared.state.lock();
            if state.generation == generation {
                let settled = state.prune_downloads();
                state.downloads.push(subscription);
                (settled, None)
            } else {
                // Key changed meanwhile. Waits for the download it asked for.
                (Vec::new(), Some(subscription))
            }
        };
        drop(settled);
        let outcome = download.await;
        drop(stale);
        outcome
    }

    /// Downloads dependencies and loads value for the current key.
    ///
    /// Does not start another load while one is in flight or value is loaded.
    /// Returns outcome of the load, the value stays accessible with [`Request::value`].
    #[tracing::instrument(skip(self, options), fields(key = %self.key()))]
    pub async fn load(&self, options: LoadOptions<K::Output>) -> Outcome<K::Output> {
        match self.begin_load(options) {
            Ok(signal) => signal.wait().await,
            Err(outcome) => outcome,
        }
    }

    /// Joins load in flight or starts a new one.
    /// Returns outcome right away if there is nothing to wait for.
    fn begin_load(
        &self,
        options: LoadOptions<K::Output>,
    ) -> Result<CompletionSignal<K::Output>, Outcome<K::Output>> {
        let mut state = self.shared.state.lock();

        if state.key.is_empty() {
            tracing::warn!("{}", Error::InvalidKey);
            return Err(Outcome::Failed(Error::InvalidKey));
        }

        if let Some(pending) = &state.pending {
            if !pending.is_settled() {
                tracing::debug!("`{}` is already loading", state.key);
                return Ok(pending.clone());
            }
        }

        if let (Some(_), Some(value)) = (&state.handle, &state.value) {
            tracing::debug!("`{}` is already loaded", state.key);
            return Err(Outcome::Succeeded(value.clone()));
        }

        let signal = CompletionSignal::new();
        state.pending = Some(signal.clone());

        let context = Arc::new(LoadContext {
            shared: self.shared.clone(),
            key: state.key.clone(),
            generation: state.generation,
            signal: signal.clone(),
            options,
        });
        drop(state);

        context.spawn();
        Ok(signal)
    }

    /// Releases loaded value and handle, canceling load in flight.
    /// Does nothing if there is no handle.
    pub fn release(&self) {
        let detached = {
            let mut state = self.shared.state.lock();
            let in_flight = state
                .pending
                .as_ref()
                .map_or(false, |pending| !pending.is_settled());
            if state.handle.is_none() && !in_flight {
                return;
            }
            tracing::debug!("Releasing `{}`", state.key);
            state.generation += 1;
            state.detach()
        };

        if let Some(discard) = self.shared.dispose(detached) {
            self.shared.spawn_detached(discard);
        }
    }

    /// Takes handle and value out of the request.
    /// Returns `None` if there is no handle.
    pub(crate) fn take_loaded(&self) -> Option<(OpHandle<K::Output>, Option<K::Output>)> {
        let detached = {
            let mut state = self.shared.state.lock();
            state.handle.as_ref()?;
            let value = state.value.take();
            state.generation += 1;
            (state.detach(), value)
        };

        let (mut detached, value) = detached;
        let handle = detached.handle.take();
        self.shared.dispose(detached);
        handle.map(|handle| (handle, value))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.shared.state.lock().generation == generation
    }
}

/// Context of one load pipeline. Shared by the running task and [`Retry`] hooks.
struct LoadContext<K: LoadKind> {
    shared: Arc<Shared<K>>,
    key: AssetKey,
    generation: u64,
    signal: CompletionSignal<K::Output>,
    options: LoadOptions<K::Output>,
}

impl<K> LoadContext<K>
where
    K: LoadKind,
{
    fn spawn(self: Arc<Self>) {
        let span = tracing::debug_span!("load", key = %self.key);
        let me = self.clone();
        let task = async move { me.run().await }.instrument(span);

        if self.shared.downloads.spawner().spawn(Box::pin(task)).is_err() {
            tracing::error!("{}", Error::Spawn);
            self.signal.try_fail(Error::Spawn);
        }
    }

    async fn run(self: Arc<Self>) {
        if !self.download().await {
            return;
        }

        let handle = self.shared.kind.start(&self.key);
        let (stored, settled) = {
            let mut state = self.shared.state.lock();
            if state.generation == self.generation && !self.signal.is_settled() {
                state.handle = Some(handle.clone());
                (true, state.prune_downloads())
            } else {
                (false, Vec::new())
            }
        };
        drop(settled);
        if !stored {
            tracing::debug!("Load canceled before handle was stored");
            self.shared.kind.discard(handle).await;
            return;
        }

        let mut reporter = Reporter::ranged(self.options.progress.clone(), 0.5, 1.0);
        let signal = &self.signal;
        poll_until_done(&*handle, |ratio| {
            if signal.is_settled() {
                return false;
            }
            reporter.report(ratio);
            true
        })
        .await;

        if self.signal.is_settled() {
            tracing::debug!("Load canceled");
            if let Some(handle) = self.take_handle() {
                self.shared.kind.discard(handle).await;
            }
            return;
        }

        match (handle.status(), handle.result()) {
            (OperationStatus::Succeeded, Some(value)) => {
                if !self.store(value.clone()) || self.signal.is_settled() {
                    tracing::debug!("`{}` released before completion", self.key);
                    return;
                }
                reporter.finish();
                if let Some(observer) = &self.options.observer {
                    observer.next(&value);
                }
                if self.signal.try_succeed(value) {
                    tracing::debug!("`{}` loaded", self.key);
                }
            }
            (OperationStatus::Succeeded, None) => {
                self.fail(SharedReport::msg("load succeeded without a result"))
                    .await
            }
            _ => {
                let cause = handle
                    .error()
                    .unwrap_or_else(|| SharedReport::msg("load failed"));
                self.fail(cause).await
            }
        }
    }

    /// Runs download phase. Returns `true` if load should proceed.
    async fn download(&self) -> bool {
        let options = DownloadOptions {
            progress: sub_range(self.options.progress.clone(), 0.0, 0.5),
            byte_progress: self.options.byte_progress.clone(),
            on_fail: self.options.on_fail.clone(),
            sub_progress_toggle: None,
            sub_progress: None,
        };

        let subscription = self
            .shared
            .downloads
            .download_dependencies(&self.key, options);
        let download = subscription.wait();
        {
            let mut state = self.shared.state.lock();
            if state.generation != self.generation {
                drop(state);
                return false;
            }
            state.downloads.push(subscription);
        }

        match select(download, self.signal.wait()).await {
            Either::Left((Outcome::Succeeded(()), _)) => !self.signal.is_settled(),
            // Download signals are never failed, failures go to `on_fail` hooks.
            Either::Left((_, _)) => {
                tracing::debug!("Download canceled. Load aborted");
                self.signal.try_cancel();
                false
            }
            Either::Right(_) => false,
        }
    }

    fn take_handle(&self) -> Option<OpHandle<K::Output>> {
        let mut state = self.shared.state.lock();
        if state.generation == self.generation {
            state.value = None;
            state.handle.take()
        } else {
            None
        }
    }

    /// Stores loaded value and attaches binding.
    fn store(&self, value: K::Output) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.generation != self.generation || state.handle.is_none() {
                return false;
            }
            state.value = Some(value);
        }

        if let Some(object) = &self.options.bound_object {
            let shared = Arc::downgrade(&self.shared);
            let generation = self.generation;
            let release = move || release_bound(&shared, generation);

            // Attached without holding the state lock,
            // the binding may fire right away.
            match ReferenceBinding::attach(object, release) {
                Ok(binding) => {
                    let mut state = self.shared.state.lock();
                    if state.generation == self.generation {
                        state.binding = Some(binding);
                    } else {
                        drop(state);
                        binding.detach();
                        return false;
                    }
                }
                Err(release) => {
                    tracing::debug!("Bound object is already destroyed");
                    release();
                    return false;
                }
            }
        }
        true
    }

    async fn fail(self: &Arc<Self>, source: SharedReport) {
        let error = Error::LoadFailed {
            key: self.key.clone(),
            source,
        };
        tracing::warn!("{}", error);

        if let Some(observer) = &self.options.observer {
            observer.error(&error);
        }
        if let Some(handle) = self.take_handle() {
            self.shared.kind.discard(handle).await;
        }
        self.signal.try_fail(error.clone());

        if let Some(on_fail) = &self.options.on_fail {
            let shared = Arc::downgrade(&self.shared);
            let options = self.options.clone();
            let generation = self.generation;
            on_fail(Retry::new(error, move || {
                retry_load(&shared, generation, options.clone())
            }));
        }
    }
}

fn release_bound<K>(shared: &Weak<Shared<K>>, generation: u64)
where
    K: LoadKind,
{
    if let Some(shared) = shared.upgrade() {
        shared.release_bound(generation);
    }
}

fn retry_load<K>(shared: &Weak<Shared<K>>, generation: u64, options: LoadOptions<K::Output>)
where
    K: LoadKind,
{
    let shared = match shared.upgrade() {
        Some(shared) => shared,
        None => return,
    };

    let request = Request { shared };
    if !request.is_current(generation) {
        tracing::debug!("Request changed since failure. Retry ignored");
        return;
    }

    tracing::debug!("Retrying load of `{}`", request.key());
    let spawner = request.shared.downloads.spawner().clone();
    let task = async move {
        request.load(options).await;
    }
    .in_current_span();

    if spawner.spawn(Box::pin(task)).is_err() {
        tracing::error!("{}", Error::Spawn);
    }
}
