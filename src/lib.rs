//! Download and load coordinator for assets served by an external addressable content service.
//!
//! Each [`Request`] is bound to an asset key and goes through two phases:
//! remote dependencies are downloaded by the shared [`DownloadCoordinator`],
//! then the asset (or scene) is loaded into memory.
//! Concurrent requests for the same key share one operation,
//! all outcomes are reported through [`CompletionSignal`]s,
//! failures go to `on_fail` hooks that receive a [`Retry`].
//!
//! Loaded value may be bound to a [`Lifetime`] of a host object.
//! When the object is destroyed the value is released.
//!
//! # Example
//!
//! ```ignore
//! let loader = LoaderBuilder::new().with_progress_floor(0.75).build(service);
//! let request = loader.asset::<Texture>("ui/atlas");
//!
//! let owner = Lifetime::new();
//! let outcome = request
//!     .load(LoadOptions::new().bind_to(&owner).with_progress(|ratio| println!("{}", ratio)))
//!     .await;
//! assert!(outcome.is_succeeded());
//!
//! // Releases the texture.
//! owner.destroy();
//! ```

mod binding;
mod config;
mod download;
mod error;
mod key;
mod loader;
mod progress;
mod request;
mod scene;
mod service;
mod signal;
mod spawn;
mod sync;

pub use self::{
    binding::{Lifetime, ReferenceBinding, WeakLifetime},
    config::{Config, DEFAULT_PROGRESS_FLOOR},
    download::{DownloadCoordinator, DownloadOptions, DownloadSubscription, OnFail, Retry},
    error::{Error, SharedReport},
    key::AssetKey,
    loader::{Loader, LoaderBuilder},
    progress::{rescale, ByteProgress, Progress, Toggle},
    request::{AssetKind, AssetRequest, HandleState, LoadKind, LoadOptions, Observer, Request},
    scene::{LoadSceneMode, SceneKind, SceneParams, SceneRequest},
    service::{
        AssetProvider, ContentService, OpHandle, Operation, OperationStatus, SceneProvider,
    },
    signal::{CompletionSignal, Outcome, SignalState, Wait},
    spawn::{Spawn, SpawnError},
    sync::BoxFuture,
};

#[cfg(feature = "tokio-spawn")]
pub use self::spawn::Tokio;
