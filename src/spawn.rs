use {crate::sync::BoxFuture, std::fmt};

/// Error returned when executor refuses to run a task.
#[derive(Clone, Copy, Debug)]
pub struct SpawnError;

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Executor refused to spawn a task")
    }
}

impl std::error::Error for SpawnError {}

/// Executor used to drive download attempts and load pipelines.
///
/// Coordinator tasks keep running when the caller that started them
/// stops waiting, so they can't be driven by the caller's future.
pub trait Spawn: fmt::Debug + Send + Sync + 'static {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<(), SpawnError>;
}

#[cfg(feature = "futures-spawn")]
impl<S> Spawn for S
where
    S: futures_task::Spawn + fmt::Debug + Send + Sync + 'static,
{
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
        futures_task::Spawn::spawn_obj(self, futures_task::FutureObj::new(future))
            .map_err(|_| SpawnError)
    }
}

/// Spawns tasks onto tokio runtime.
#[cfg(feature = "tokio-spawn")]
#[derive(Clone, Debug)]
pub struct Tokio(pub tokio::runtime::Handle);

#[cfg(feature = "tokio-spawn")]
impl Tokio {
    /// Captures handle to the runtime this function is called from.
    ///
    /// # Panics
    ///
    /// Panics if called outside of tokio runtime.
    pub fn current() -> Self {
        Tokio(tokio::runtime::Handle::current())
    }
}

#[cfg(feature = "tokio-spawn")]
impl Spawn for Tokio {
    fn spawn(&self, future: BoxFuture<'static, ()>) -> Result<(), SpawnError> {
        self.0.spawn(future);
        Ok(())
    }
}
