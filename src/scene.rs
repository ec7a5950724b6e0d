use {
    crate::{
        error::{Error, SharedReport},
        key::AssetKey,
        progress::{Progress, Reporter},
        request::{LoadKind, Request},
        service::{poll_until_done, OpHandle, Operation, OperationStatus, SceneProvider},
        signal::Outcome,
        sync::BoxFuture,
    },
    std::{marker::PhantomData, sync::Arc},
};

/// How loaded scene is combined with scenes already loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LoadSceneMode {
    /// Closes all loaded scenes.
    Single,
    Additive,
}

/// Arguments of external scene load call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SceneParams {
    pub mode: LoadSceneMode,
    pub activate_on_load: bool,
    pub priority: i32,
}

impl Default for SceneParams {
    fn default() -> Self {
        SceneParams {
            mode: LoadSceneMode::Single,
            activate_on_load: true,
            priority: 100,
        }
    }
}

/// Loads scenes of type `S` from provider `P`.
///
/// Scene handles are never released directly,
/// they are given back to the provider with an unload call.
pub struct SceneKind<P, S> {
    provider: Arc<P>,
    params: SceneParams,
    marker: PhantomData<fn() -> S>,
}

impl<P, S> SceneKind<P, S> {
    pub fn new(provider: Arc<P>, params: SceneParams) -> Self {
        SceneKind {
            provider,
            params,
            marker: PhantomData,
        }
    }

    pub fn params(&self) -> &SceneParams {
        &self.params
    }
}

impl<P, S> SceneKind<P, S>
where
    P: SceneProvider<S>,
    S: Clone + Send + Sync + 'static,
{
    /// Issues unload call and returns future that polls it to completion.
    fn unload_with_progress(
        &self,
        handle: OpHandle<S>,
        progress: Option<Progress>,
    ) -> BoxFuture<'static, ()> {
        let op = self.provider.unload_scene(handle);
        Box::pin(async move {
            let mut reporter = Reporter::new(progress);
            poll_until_done(&*op, |ratio| {
                reporter.report(ratio);
                true
            })
            .await;

            if op.status() != OperationStatus::Succeeded {
                let cause = op
                    .error()
                    .unwrap_or_else(|| SharedReport::msg("unload failed"));
                tracing::warn!("Scene unload failed: {}", cause);
            }
            reporter.finish();
            op.release();
        })
    }
}

impl<P, S> LoadKind for SceneKind<P, S>
where
    P: SceneProvider<S>,
    S: Clone + Send + Sync + 'static,
{
    type Output = S;

    fn start(&self, key: &AssetKey) -> OpHandle<S> {
        self.provider.load_scene(key, &self.params)
    }

    fn discard(&self, handle: OpHandle<S>) -> BoxFuture<'static, ()> {
        self.unload_with_progress(handle, None)
    }
}

/// Request for a scene of type `S` provided by `P`.
pub type SceneRequest<P, S> = Request<SceneKind<P, S>>;

impl<P, S> Request<SceneKind<P, S>>
where
    P: SceneProvider<S>,
    S: Clone + Send + Sync + 'static,
{
    /// Activates loaded scene, forwarding activation progress.
    pub async fn activate(&self, progress: Option<Progress>) -> Result<(), Error> {
        let key = self.key();
        let scene = match self.value() {
            Some(scene) => scene,
            None => return Err(Error::NotLoaded { key }),
        };

        tracing::debug!("Activating `{}`", key);
        let op: Arc<dyn Operation<()>> = self.shared.kind.provider.activate(&scene);
        let mut reporter = Reporter::new(progress);
        poll_until_done(&*op, |ratio| {
            reporter.report(ratio);
            true
        })
        .await;

        let status = op.status();
        let cause = op.error();
        op.release();

        match status {
            OperationStatus::Succeeded => {
                reporter.finish();
                Ok(())
            }
            _ => {
                let error = Error::ActivationFailed {
                    key,
                    source: cause.unwrap_or_else(|| SharedReport::msg("activation failed")),
                };
                tracing::warn!("{}", error);
                Err(error)
            }
        }
    }

    /// Unloads scene and waits until the provider is done.
    ///
    /// Load in flight is canceled and cleaned up by its own task.
    /// Returns `Canceled` if there was nothing to unload.
    pub async fn unload(&self, progress: Option<Progress>) -> Outcome<()> {
        let handle = match self.take_loaded() {
            Some((handle, _)) => handle,
            None => {
                // Load may be in flight without a handle yet.
                self.release();
                return Outcome::Canceled;
            }
        };

        tracing::debug!("Unloading `{}`", self.key());
        self.shared
            .kind
            .unload_with_progress(handle, progress)
            .await;
        Outcome::Succeeded(())
    }
}
