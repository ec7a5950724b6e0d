use {
    crate::key::AssetKey,
    std::{
        error::Error as StdError,
        fmt::{self, Debug, Display},
        sync::Arc,
    },
};

/// Clonable wrapper over [`eyre::Report`].
///
/// External services report failures with `eyre::Report`
/// which is not `Clone`, while every waiter of a signal
/// needs its own copy of the failure.
#[derive(Clone)]
#[repr(transparent)]
pub struct SharedReport(Arc<eyre::Report>);

impl SharedReport {
    pub fn new(report: eyre::Report) -> Self {
        SharedReport(Arc::new(report))
    }

    /// Creates report from displayable message.
    pub fn msg<M>(message: M) -> Self
    where
        M: Display + Debug + Send + Sync + 'static,
    {
        SharedReport::new(eyre::Report::msg(message))
    }
}

impl From<eyre::Report> for SharedReport {
    fn from(report: eyre::Report) -> Self {
        SharedReport::new(report)
    }
}

impl Debug for SharedReport {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, fmt)
    }
}

impl Display for SharedReport {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, fmt)
    }
}

impl StdError for SharedReport {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// Error occurred in process of downloading or loading an asset.
///
/// Errors are never thrown across an await point.
/// They are stored in settled signals and handed to `on_fail` hooks and observers.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Key was empty at call time. No external call was issued.
    #[error("Asset key is empty")]
    InvalidKey,

    /// External size query ended with failure or negative size.
    #[error("Failed to query download size of `{key}`")]
    SizeQueryFailed {
        key: AssetKey,
        #[source]
        source: SharedReport,
    },

    /// External dependency download ended with failure.
    #[error("Failed to download dependencies of `{key}`")]
    DownloadFailed {
        key: AssetKey,
        #[source]
        source: SharedReport,
    },

    /// External load ended with failure or succeeded without a result.
    #[error("Failed to load `{key}`")]
    LoadFailed {
        key: AssetKey,
        #[source]
        source: SharedReport,
    },

    /// Operation requires loaded value.
    #[error("`{key}` is not loaded")]
    NotLoaded { key: AssetKey },

    /// External scene activation ended with failure.
    #[error("Failed to activate `{key}`")]
    ActivationFailed {
        key: AssetKey,
        #[source]
        source: SharedReport,
    },

    /// Executor refused to run coordinator task.
    #[error("Failed to spawn coordinator task")]
    Spawn,

    /// Operation was canceled.
    #[error("Operation canceled")]
    Canceled,
}

impl Error {
    /// Returns key of the asset this error relates to, if any.
    pub fn key(&self) -> Option<&AssetKey> {
        match self {
            Error::SizeQueryFailed { key, .. }
            | Error::DownloadFailed { key, .. }
            | Error::LoadFailed { key, .. }
            | Error::NotLoaded { key }
            | Error::ActivationFailed { key, .. } => Some(key),
            Error::InvalidKey | Error::Spawn | Error::Canceled => None,
        }
    }
}
