use {
    crate::{error::SharedReport, scene::SceneParams},
    std::{fmt::Debug, sync::Arc},
};

/// Status of an external operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    /// Operation is not finished.
    None,
    Succeeded,
    Failed,
}

/// Handle to an operation issued against the external asset service.
///
/// Operations are polled once per scheduler tick.
pub trait Operation<T>: Send + Sync {
    fn is_done(&self) -> bool;

    /// Completion fraction. Monotonic, but may start above zero.
    fn percent_complete(&self) -> f32;

    fn status(&self) -> OperationStatus;

    /// Result of successfully completed operation.
    /// Returns `None` if the operation is not done, failed,
    /// or succeeded without producing a value.
    fn result(&self) -> Option<T>;

    /// Failure cause reported by the service.
    fn error(&self) -> Option<SharedReport>;

    /// Reclaims resources held by the operation.
    /// Coordinators call this exactly once per acquired handle.
    fn release(&self);
}

/// Shared handle to an external operation.
pub type OpHandle<T> = Arc<dyn Operation<T>>;

/// Content delivery side of the external asset service.
pub trait ContentService: Debug + Send + Sync + 'static {
    /// Queries size in bytes of dependencies that are not yet downloaded.
    /// Zero means nothing to fetch, negative size means failed query.
    fn get_download_size(&self, key: &str) -> OpHandle<i64>;

    /// Downloads all remote dependencies of the asset.
    fn download_dependencies(&self, key: &str) -> OpHandle<()>;
}

/// Loads assets of type `T` into memory.
pub trait AssetProvider<T>: ContentService {
    fn load_asset(&self, key: &str) -> OpHandle<T>;
}

/// Loads and unloads scenes of type `S`.
pub trait SceneProvider<S>: ContentService {
    fn load_scene(&self, key: &str, params: &SceneParams) -> OpHandle<S>;

    /// Unloads scene. Service takes over the scene handle and reclaims it.
    fn unload_scene(&self, scene: OpHandle<S>) -> OpHandle<()>;

    /// Activates scene that was loaded without activation.
    fn activate(&self, scene: &S) -> OpHandle<()>;
}

/// Polls operation until it's done, sampling progress before every yield.
pub(crate) async fn poll_until_done<T, F>(op: &dyn Operation<T>, mut report: F) -> bool
where
    F: FnMut(f32) -> bool,
{
    while !op.is_done() {
        if !report(op.percent_complete()) {
            return false;
        }
        crate::sync::next_tick().await;
    }
    true
}
