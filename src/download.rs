use {
    crate::{
        error::{Error, SharedReport},
        key::AssetKey,
        progress::{rescale, ByteProgress, Progress, Toggle},
        service::{poll_until_done, ContentService, OperationStatus},
        signal::{CompletionSignal, Wait},
        spawn::Spawn,
    },
    hashbrown::HashMap,
    parking_lot::Mutex,
    slab::Slab,
    std::{
        fmt::{self, Debug},
        sync::Arc,
    },
    tracing::Instrument as _,
};

/// Hook invoked when an operation fails.
/// Receives [`Retry`] that can restart the failed operation.
pub type OnFail = Arc<dyn Fn(Retry) + Send + Sync>;

/// Restarts failed operation.
#[derive(Clone)]
pub struct Retry {
    error: Error,
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Debug for Retry {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Retry")
            .field("error", &self.error)
            .finish()
    }
}

impl Retry {
    pub(crate) fn new(error: Error, run: impl Fn() + Send + Sync + 'static) -> Self {
        Retry {
            error,
            run: Arc::new(run),
        }
    }

    /// Failure that triggered the hook.
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Restarts the operation.
    pub fn retry(&self) {
        (self.run)()
    }
}

/// Callbacks of a dependency download.
#[derive(Clone, Default)]
pub struct DownloadOptions {
    pub progress: Option<Progress>,
    pub byte_progress: Option<ByteProgress>,
    pub on_fail: Option<OnFail>,
    pub sub_progress_toggle: Option<Toggle>,
    pub sub_progress: Option<Progress>,
}

impl Debug for DownloadOptions {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("DownloadOptions")
            .field("progress", &self.progress.is_some())
            .field("byte_progress", &self.byte_progress.is_some())
            .field("on_fail", &self.on_fail.is_some())
            .field("sub_progress_toggle", &self.sub_progress_toggle.is_some())
            .field("sub_progress", &self.sub_progress.is_some())
            .finish()
    }
}

impl DownloadOptions {
    pub fn new() -> Self {
        Self::default()
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

    pub fn with_on_fail(mut self, on_fail: impl Fn(Retry) + Send + Sync + 'static) -> Self {
        self.on_fail = Some(Arc::new(on_fail));
        self
    }

    pub fn with_sub_progress(
        mut self,
        toggle: impl Fn(bool) + Send + Sync + 'static,
        sub_progress: impl Fn(f32) + Send + Sync + 'static,
    ) -> Self {
        self.sub_progress_toggle = Some(Arc::new(toggle));
        self.sub_progress = Some(Arc::new(sub_progress));
        self
    }

    fn report_final(&self, size: u64) {
        if let Some(sink) = &self.progress {
            sink(1.0);
        }
        if let Some(sink) = &self.byte_progress {
            sink(1.0, size);
        }
        if size > 0 {
            if let Some(sink) = &self.sub_progress {
                sink(1.0);
            }
        }
    }
}

struct Inner {
    service: Arc<dyn ContentService>,
    spawner: Arc<dyn Spawn>,
    floor: f32,
    in_flight: Mutex<HashMap<AssetKey, Arc<Download>>>,
}

/// Downloads remote dependencies of assets.
///
/// At most one download per key is in flight.
/// Callers requesting a key that is already downloading
/// subscribe to the running download and receive its progress and failures.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl Debug for DownloadCoordinator {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("DownloadCoordinator")
            .field("service", &self.inner.service)
            .field("spawner", &self.inner.spawner)
            .field("floor", &self.inner.floor)
            .finish()
    }
}

impl DownloadCoordinator {
    pub(crate) fn new(service: Arc<dyn ContentService>, spawner: Arc<dyn Spawn>, floor: f32) -> Self {
        DownloadCoordinator {
            inner: Arc::new(Inner {
                service,
                spawner,
                floor,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Starts download of dependencies for the `key` or joins one in flight.
    ///
    /// Signal of the returned subscription succeeds once everything is downloaded.
    /// It is canceled for empty key, on failure when no subscriber has `on_fail` hook,
    /// when someone cancels the download and when all subscriptions are dropped.
    #[tracing::instrument(skip(self, options))]
    pub fn download_dependencies(
        &self,
        key: &AssetKey,
        options: DownloadOptions,
    ) -> DownloadSubscription {
        if key.is_empty() {
            tracing::warn!("{}", Error::InvalidKey);
            let download = Download::new(self.clone(), key.clone(), CompletionSignal::canceled());
            return DownloadSubscription {
                download: Arc::new(download),
                index: None,
            };
        }

        let (download, joined) = {
            let mut in_flight = self.inner.in_flight.lock();
            let download = match in_flight.get(key) {
                Some(download) if !download.signal.is_settled() => {
                    tracing::trace!("Dependencies are already downloading");
                    download.clone()
                }
                _ => {
                    tracing::debug!("Dependencies download requested");
                    let download = Arc::new(Download::new(
                        self.clone(),
                        key.clone(),
                        CompletionSignal::new(),
                    ));
                    in_flight.insert(key.clone(), download.clone());
                    download
                }
            };

            // Joined while the map is locked, so a fresh download
            // can't be abandoned before its first subscriber arrives.
            let joined = download.join(options);
            (download, joined)
        };

        if let Some(toggle) = &joined.toggle {
            toggle(true);
        }
        if let Some(size) = joined.finished {
            joined.options.report_final(size);
        }
        if joined.start {
            download.clone().spawn();
        }

        DownloadSubscription {
            download,
            index: Some(joined.index),
        }
    }

    /// Cancels download in flight for the `key`.
    /// Returns `true` if there was one.
    pub fn cancel(&self, key: &str) -> bool {
        let download = self.inner.in_flight.lock().remove(key);
        match download {
            Some(download) => download.signal.try_cancel(),
            None => false,
        }
    }

    /// Returns `true` if download for the `key` is in flight.
    pub fn is_downloading(&self, key: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .get(key)
            .map_or(false, |download| !download.signal.is_settled())
    }

    pub(crate) fn spawner(&self) -> &Arc<dyn Spawn> {
        &self.inner.spawner
    }

    fn forget(&self, download: &Download) {
        let mut in_flight = self.inner.in_flight.lock();
        let current = in_flight
            .get(&download.key)
            .map_or(false, |d| std::ptr::eq(&**d, download));
        if current {
            in_flight.remove(&download.key);
        }
    }
}

/// Interest of one caller in a dependency download.
///
/// Dropping the subscription stops its callbacks.
/// The download is canceled when its last subscription is dropped.
pub struct DownloadSubscription {
    download: Arc<Download>,
    index: Option<usize>,
}

impl Debug for DownloadSubscription {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("DownloadSubscription")
            .field("key", &self.download.key)
            .field("state", &self.download.signal.state())
            .finish()
    }
}

impl DownloadSubscription {
    pub fn key(&self) -> &AssetKey {
        &self.download.key
    }

    /// Signal shared by all subscribers of the download.
    pub fn signal(&self) -> &CompletionSignal<()> {
        &self.download.signal
    }

    pub fn wait(&self) -> Wait<()> {
        self.download.signal.wait()
    }
}

impl Drop for DownloadSubscription {
    fn drop(&mut self) {
        if let Some(index) = self.index.take() {
            self.download.leave(index);
        }
    }
}

struct Subscriber {
    options: DownloadOptions,
    last: f32,
    toggled: bool,
}

struct DownloadState {
    subscribers: Slab<Subscriber>,
    /// An attempt is spawned and not finished yet.
    running: bool,
    /// External download operation is in flight.
    transferring: bool,
    /// Size reported to subscribers on success.
    finished: Option<u64>,
}

/// What a new subscriber has to do after locks are released.
struct Joined {
    index: usize,
    options: DownloadOptions,
    toggle: Option<Toggle>,
    finished: Option<u64>,
    start: bool,
}

enum Ended {
    Canceled,
    Succeeded(u64),
    Failed(Error),
}

/// Download of one key. Shared by subscribers, the running attempt and [`Retry`] hooks.
struct Download {
    coordinator: DownloadCoordinator,
    key: AssetKey,
    signal: CompletionSignal<()>,
    state: Mutex<DownloadState>,
}

impl Download {
    fn new(coordinator: DownloadCoordinator, key: AssetKey, signal: CompletionSignal<()>) -> Self {
        Download {
            coordinator,
            key,
            signal,
            state: Mutex::new(DownloadState {
                subscribers: Slab::new(),
                running: false,
                transferring: false,
                finished: None,
            }),
        }
    }

    fn join(&self, options: DownloadOptions) -> Joined {
        let mut state = self.state.lock();
        let toggled = state.transferring;
        let index = state.subscribers.insert(Subscriber {
            options: options.clone(),
            last: 0.0,
            toggled,
        });

        let start = !state.running && state.finished.is_none();
        if start {
            state.running = true;
        }

        Joined {
            index,
            toggle: options.sub_progress_toggle.clone().filter(|_| toggled),
            finished: state.finished,
            options,
            start,
        }
    }

    fn leave(&self, index: usize) {
        let abandoned = {
            let mut state = self.state.lock();
            if state.subscribers.contains(index) {
                state.subscribers.remove(index);
            }
            state.subscribers.is_empty()
        };

        if abandoned && self.signal.try_cancel() {
            tracing::debug!("Nobody waits for dependencies of `{}`. Download canceled", self.key);
            self.coordinator.forget(self);
        }
    }

    fn spawn(self: Arc<Self>) {
        let span = tracing::debug_span!("download", key = %self.key);
        let spawner = self.coordinator.inner.spawner.clone();
        let me = self.clone();
        let task = async move { me.run().await }.instrument(span);

        if spawner.spawn(Box::pin(task)).is_err() {
            tracing::error!("Failed to spawn download of `{}`", self.key);
            self.state.lock().running = false;
            self.signal.try_cancel();
            self.coordinator.forget(&self);
        }
    }

    fn retry(self: &Arc<Self>) {
        if self.signal.is_settled() {
            tracing::debug!("Download of `{}` is settled. Retry ignored", self.key);
            return;
        }
        {
            let mut state = self.state.lock();
            if state.running {
                tracing::debug!("Download of `{}` is running. Retry ignored", self.key);
                return;
            }
            state.running = true;
        }
        tracing::debug!("Retrying download of `{}`", self.key);
        self.clone().spawn();
    }

    async fn run(self: Arc<Self>) {
        match self.attempt().await {
            Ended::Canceled => {
                self.state.lock().running = false;
                self.coordinator.forget(&self);
            }
            Ended::Succeeded(size) => self.succeed(size),
            Ended::Failed(error) => self.fail(error),
        }
    }

    async fn attempt(&self) -> Ended {
        if self.signal.is_settled() {
            return Ended::Canceled;
        }

        let service = &self.coordinator.inner.service;

        let size_op = service.get_download_size(&self.key);
        let signal = &self.signal;
        let finished = poll_until_done(&*size_op, |_| !signal.is_settled()).await;
        let status = size_op.status();
        let size = size_op.result();
        let cause = size_op.error();
        size_op.release();

        if !finished {
            tracing::debug!("Download canceled during size query");
            return Ended::Canceled;
        }

        let size = match (status, size) {
            (OperationStatus::Succeeded, Some(size)) if size >= 0 => size as u64,
            (OperationStatus::Succeeded, None) => 0,
            _ => {
                return Ended::Failed(Error::SizeQueryFailed {
                    key: self.key.clone(),
                    source: cause.unwrap_or_else(|| SharedReport::msg("size query failed")),
                })
            }
        };

        if size == 0 {
            tracing::trace!("Nothing to download");
            return Ended::Succeeded(0);
        }

        tracing::debug!("Downloading {} bytes", size);
        self.set_transferring(true);

        let op = service.download_dependencies(&self.key);
        let floor = self.coordinator.inner.floor;
        let finished = poll_until_done(&*op, |raw| {
            if signal.is_settled() {
                return false;
            }
            self.report(rescale(raw, floor), size);
            true
        })
        .await;
        let status = op.status();
        let cause = op.error();
        op.release();
        self.set_transferring(false);

        if !finished {
            tracing::debug!("Download canceled");
            return Ended::Canceled;
        }

        match status {
            OperationStatus::Succeeded => Ended::Succeeded(size),
            _ => Ended::Failed(Error::DownloadFailed {
                key: self.key.clone(),
                source: cause.unwrap_or_else(|| SharedReport::msg("download failed")),
            }),
        }
    }

    /// Flips sub-progress UI of every subscriber that is not in the `on` state yet.
    fn set_transferring(&self, on: bool) {
        let toggles: Vec<Toggle> = {
            let mut state = self.state.lock();
            state.transferring = on;
            state
                .subscribers
                .iter_mut()
                .filter(|(_, subscriber)| subscriber.toggled != on)
                .filter_map(|(_, subscriber)| {
                    subscriber.toggled = on;
                    subscriber.options.sub_progress_toggle.clone()
                })
                .collect()
        };

        for toggle in toggles {
            toggle(on);
        }
    }

    fn report(&self, ratio: f32, size: u64) {
        let reports: Vec<(DownloadOptions, f32)> = {
            let mut state = self.state.lock();
            state
                .subscribers
                .iter_mut()
                .map(|(_, subscriber)| {
                    subscriber.last = ratio.max(subscriber.last);
                    (subscriber.options.clone(), subscriber.last)
                })
                .collect()
        };

        for (options, ratio) in reports {
            if let Some(sink) = &options.progress {
                sink(ratio);
            }
            if let Some(sink) = &options.byte_progress {
                sink(ratio, size);
            }
            if let Some(sink) = &options.sub_progress {
                sink(ratio);
            }
        }
    }

    fn succeed(&self, size: u64) {
        let subscribers: Vec<DownloadOptions> = {
            let mut state = self.state.lock();
            state.running = false;
            if self.signal.is_settled() {
                drop(state);
                self.coordinator.forget(self);
                return;
            }
            state.finished = Some(size);
            state
                .subscribers
                .iter()
                .map(|(_, subscriber)| subscriber.options.clone())
                .collect()
        };

        for options in &subscribers {
            options.report_final(size);
        }
        if self.signal.try_succeed(()) {
            tracing::debug!("Dependencies downloaded");
        }
        self.coordinator.forget(self);
    }

    fn fail(self: &Arc<Self>, error: Error) {
        tracing::warn!("{}", error);

        let hooks: Vec<OnFail> = {
            let mut state = self.state.lock();
            state.running = false;
            state
                .subscribers
                .iter()
                .filter_map(|(_, subscriber)| subscriber.options.on_fail.clone())
                .collect()
        };

        if hooks.is_empty() {
            self.signal.try_cancel();
            self.coordinator.forget(self);
            return;
        }

        for on_fail in hooks {
            let me = self.clone();
            on_fail(Retry::new(error.clone(), move || me.retry()));
        }
    }
}
