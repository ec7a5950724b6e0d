//! Loads a few assets and a scene from a simulated content service.

use {
    goods_request::{
        AssetProvider, ContentService, Lifetime, LoadOptions, LoaderBuilder, OpHandle, Operation,
        OperationStatus, SceneParams, SceneProvider, SharedReport,
    },
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
};

/// Operation that completes after fixed duration.
struct Timed<T> {
    started: Instant,
    duration: Duration,
    floor: f32,
    result: Option<T>,
}

impl<T> Timed<T> {
    fn new(millis: u64, floor: f32, result: Option<T>) -> Arc<Self> {
        Arc::new(Timed {
            started: Instant::now(),
            duration: Duration::from_millis(millis),
            floor,
            result,
        })
    }
}

impl<T> Operation<T> for Timed<T>
where
    T: Clone + Send + Sync,
{
    fn is_done(&self) -> bool {
        self.started.elapsed() >= self.duration
    }

    fn percent_complete(&self) -> f32 {
        let ratio = self.started.elapsed().as_secs_f32() / self.duration.as_secs_f32();
        self.floor + (1.0 - self.floor) * ratio.min(1.0)
    }

    fn status(&self) -> OperationStatus {
        match (self.is_done(), &self.result) {
            (false, _) => OperationStatus::None,
            (true, Some(_)) => OperationStatus::Succeeded,
            (true, None) => OperationStatus::Failed,
        }
    }

    fn result(&self) -> Option<T> {
        self.result.clone().filter(|_| self.is_done())
    }

    fn error(&self) -> Option<SharedReport> {
        match self.status() {
            OperationStatus::Failed => Some(SharedReport::msg("simulated failure")),
            _ => None,
        }
    }

    fn release(&self) {
        tracing::trace!("Operation released");
    }
}

#[derive(Debug)]
struct Simulated;

impl ContentService for Simulated {
    fn get_download_size(&self, key: &str) -> OpHandle<i64> {
        let size: i64 = if key.starts_with("remote/") { 1 << 20 } else { 0 };
        Timed::new(10, 0.0, Some(size))
    }

    fn download_dependencies(&self, _key: &str) -> OpHandle<()> {
        Timed::new(300, 0.75, Some(()))
    }
}

impl AssetProvider<String> for Simulated {
    fn load_asset(&self, key: &str) -> OpHandle<String> {
        let result = if key.ends_with(".broken") {
            None
        } else {
            Some(format!("contents of {}", key))
        };
        Timed::new(100, 0.0, result)
    }
}

impl SceneProvider<String> for Simulated {
    fn load_scene(&self, key: &str, _params: &SceneParams) -> OpHandle<String> {
        Timed::new(200, 0.0, Some(key.to_owned()))
    }

    fn unload_scene(&self, scene: OpHandle<String>) -> OpHandle<()> {
        scene.release();
        Timed::new(50, 0.0, Some(()))
    }

    fn activate(&self, _scene: &String) -> OpHandle<()> {
        Timed::new(50, 0.0, Some(()))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let loader = LoaderBuilder::new().build(Arc::new(Simulated));

    let owner = Lifetime::new();
    let texture = loader.asset::<String>("remote/texture.png");
    let config = loader.asset::<String>("local/config.broken");

    let (texture_outcome, config_outcome) = futures_util::future::join(
        texture.load(
            LoadOptions::new()
                .bind_to(&owner)
                .with_byte_progress(|ratio, size| {
                    tracing::info!("texture: {:.0}% of {} bytes", ratio * 100.0, size)
                }),
        ),
        config.load(LoadOptions::new().with_on_fail(|retry| {
            tracing::info!("giving up after: {}", retry.error());
        })),
    )
    .await;

    tracing::info!("texture: {}", texture_outcome.into_result()?);
    tracing::info!("config: {:?}", config_outcome.into_result().err());

    // Releases the texture.
    drop(owner);
    tracing::info!("texture loaded after owner is gone: {}", texture.is_valid());

    let scene = loader.scene::<String>("remote/level", SceneParams::default());
    scene
        .load(LoadOptions::new().with_progress(|ratio| tracing::info!("scene: {:.2}", ratio)))
        .await
        .into_result()?;
    scene.activate(None).await?;
    scene.unload(None).await;

    Ok(())
}
