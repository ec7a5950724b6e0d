use {
    crate::{
        config::Config,
        download::DownloadCoordinator,
        key::AssetKey,
        request::{AssetKind, AssetRequest},
        scene::{SceneKind, SceneParams, SceneRequest},
        service::{AssetProvider, ContentService, SceneProvider},
        spawn::Spawn,
    },
    std::{
        fmt::{self, Debug},
        sync::Arc,
    },
};

/// Builder for [`Loader`].
/// Allows to configure spawner and tunables.
pub struct LoaderBuilder {
    config: Config,
    spawner: Option<Arc<dyn Spawn>>,
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderBuilder {
    /// Returns new [`LoaderBuilder`] with default config and no spawner.
    pub fn new() -> Self {
        LoaderBuilder {
            config: Config::default(),
            spawner: None,
        }
    }

    /// Replaces whole config.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets floor of the external download progress.
    pub fn with_progress_floor(mut self, floor: f32) -> Self {
        self.config.progress_floor = floor;
        self
    }

    /// Sets executor that drives downloads and loads.
    pub fn with_spawner(mut self, spawner: impl Spawn) -> Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Sets executor that drives downloads and loads.
    pub fn set_spawner(&mut self, spawner: impl Spawn) -> &mut Self {
        self.spawner = Some(Arc::new(spawner));
        self
    }

    /// Builds and returns new [`Loader`] instance.
    ///
    /// # Panics
    ///
    /// Without explicit spawner tokio runtime is used,
    /// so this function panics if called outside of it.
    #[cfg(feature = "tokio-spawn")]
    pub fn build<S>(self, service: Arc<S>) -> Loader<S>
    where
        S: ContentService,
    {
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Arc::new(crate::spawn::Tokio::current()),
        };
        Loader::new(service, spawner, self.config)
    }

    /// Builds and returns new [`Loader`] instance.
    ///
    /// # Panics
    ///
    /// Panics if no spawner was set.
    #[cfg(not(feature = "tokio-spawn"))]
    pub fn build<S>(self, service: Arc<S>) -> Loader<S>
    where
        S: ContentService,
    {
        let spawner = self
            .spawner
            .expect("Spawner must be set when `tokio-spawn` feature is disabled");
        Loader::new(service, spawner, self.config)
    }
}

/// Entry point for downloading and loading assets of service `S`.
///
/// Dependency downloads are shared between all requests of one loader.
pub struct Loader<S> {
    service: Arc<S>,
    downloads: DownloadCoordinator,
    config: Config,
}

impl<S> Clone for Loader<S> {
    fn clone(&self) -> Self {
        Loader {
            service: self.service.clone(),
            downloads: self.downloads.clone(),
            config: self.config,
        }
    }
}

impl<S> Debug for Loader<S>
where
    S: Debug,
{
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Loader")
            .field("service", &self.service)
            .field("config", &self.config)
            .finish()
    }
}

impl<S> Loader<S>
where
    S: ContentService,
{
    fn new(service: Arc<S>, spawner: Arc<dyn Spawn>, config: Config) -> Self {
        let config = config.sanitized();
        tracing::info!("Creating asset loader. {:?}", config);

        let content: Arc<dyn ContentService> = service.clone();
        Loader {
            downloads: DownloadCoordinator::new(content, spawner, config.progress_floor),
            service,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Coordinator of dependency downloads.
    pub fn downloads(&self) -> &DownloadCoordinator {
        &self.downloads
    }

    /// Creates request for an asset of type `T` bound to the `key`.
    pub fn asset<T>(&self, key: impl Into<AssetKey>) -> AssetRequest<S, T>
    where
        S: AssetProvider<T>,
        T: Clone + Send + Sync + 'static,
    {
        AssetRequest::new(
            AssetKind::new(self.service.clone()),
            self.downloads.clone(),
            key.into(),
        )
    }

    /// Creates request for a scene of type `T` bound to the `key`.
    pub fn scene<T>(&self, key: impl Into<AssetKey>, params: SceneParams) -> SceneRequest<S, T>
    where
        S: SceneProvider<T>,
        T: Clone + Send + Sync + 'static,
    {
        SceneRequest::new(
            SceneKind::new(self.service.clone(), params),
            self.downloads.clone(),
            key.into(),
        )
    }
}
