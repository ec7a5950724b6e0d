#![allow(dead_code)]

use {
    goods_request::{
        AssetProvider, ContentService, OpHandle, Operation, OperationStatus, Progress,
        SceneParams, SceneProvider, SharedReport,
    },
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        fmt,
        sync::{
            atomic::{AtomicUsize, Ordering::SeqCst},
            Arc,
        },
    },
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Yields until `cond` holds, letting spawned tasks run.
pub async fn until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("Timed out waiting for {}", what);
}

/// Yields a number of times, letting spawned tasks run.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

pub fn recorder() -> (Progress, Arc<Mutex<Vec<f32>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink: Progress = {
        let log = log.clone();
        Arc::new(move |ratio| log.lock().push(ratio))
    };
    (sink, log)
}

pub fn assert_non_decreasing(values: &[f32]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "Progress decreased: {:?}", values);
    }
}

#[derive(Clone, Debug)]
pub enum Scripted<T> {
    Value(T),
    Null,
    Fail(&'static str),
}

struct OpState<T> {
    steps: Vec<f32>,
    cursor: usize,
    held: bool,
    outcome: Scripted<T>,
}

/// Operation that advances one scripted progress step per sample.
pub struct MockOp<T> {
    state: Mutex<OpState<T>>,
    releases: AtomicUsize,
}

impl<T> MockOp<T> {
    pub fn new(steps: Vec<f32>, outcome: Scripted<T>, held: bool) -> Arc<Self> {
        Arc::new(MockOp {
            state: Mutex::new(OpState {
                steps,
                cursor: 0,
                held,
                outcome,
            }),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn releases(&self) -> usize {
        self.releases.load(SeqCst)
    }

    pub fn resume(&self) {
        self.state.lock().held = false;
    }

    fn done(state: &OpState<T>) -> bool {
        !state.held && state.cursor >= state.steps.len()
    }
}

impl<T> Operation<T> for MockOp<T>
where
    T: Clone + Send + Sync,
{
    fn is_done(&self) -> bool {
        Self::done(&self.state.lock())
    }

    fn percent_complete(&self) -> f32 {
        let mut state = self.state.lock();
        if state.cursor < state.steps.len() {
            let value = state.steps[state.cursor];
            state.cursor += 1;
            value
        } else {
            state.steps.last().copied().unwrap_or(0.0)
        }
    }

    fn status(&self) -> OperationStatus {
        let state = self.state.lock();
        if !Self::done(&state) {
            return OperationStatus::None;
        }
        match state.outcome {
            Scripted::Value(_) | Scripted::Null => OperationStatus::Succeeded,
            Scripted::Fail(_) => OperationStatus::Failed,
        }
    }

    fn result(&self) -> Option<T> {
        let state = self.state.lock();
        match &state.outcome {
            Scripted::Value(value) if Self::done(&state) => Some(value.clone()),
            _ => None,
        }
    }

    fn error(&self) -> Option<SharedReport> {
        let state = self.state.lock();
        match state.outcome {
            Scripted::Fail(msg) if Self::done(&state) => Some(SharedReport::msg(msg)),
            _ => None,
        }
    }

    fn release(&self) {
        self.releases.fetch_add(1, SeqCst);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockScene(pub String);

#[derive(Clone, Debug)]
pub struct Script {
    pub size: i64,
    pub size_fails: bool,
    pub download_steps: Vec<f32>,
    pub download_fails: bool,
    pub load_steps: Vec<f32>,
    pub load: Scripted<String>,
    pub hold_load: bool,
    pub activate_fails: bool,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            size: 0,
            size_fails: false,
            download_steps: vec![0.75, 0.8, 0.9, 1.0],
            download_fails: false,
            load_steps: vec![0.0, 0.5],
            load: Scripted::Null,
            hold_load: false,
            activate_fails: false,
        }
    }
}

#[derive(Default)]
struct Log {
    sizes: Vec<(String, Arc<MockOp<i64>>)>,
    downloads: Vec<(String, Arc<MockOp<()>>)>,
    loads: Vec<(String, Arc<MockOp<String>>)>,
    scenes: Vec<(String, Arc<MockOp<MockScene>>)>,
    unloads: Vec<Arc<MockOp<()>>>,
    activations: Vec<Arc<MockOp<()>>>,
}

/// Scripted stand-in for the external asset service.
///
/// Keys without a script load their own name as value.
#[derive(Default)]
pub struct MockService {
    scripts: Mutex<HashMap<String, Script>>,
    log: Mutex<Log>,
}

impl fmt::Debug for MockService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MockService")
    }
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(MockService::default())
    }

    pub fn script(&self, key: &str, edit: impl FnOnce(&mut Script)) {
        let mut scripts = self.scripts.lock();
        let script = scripts
            .entry(key.to_owned())
            .or_insert_with(|| Self::default_script(key));
        edit(script);
    }

    fn default_script(key: &str) -> Script {
        Script {
            load: Scripted::Value(key.to_owned()),
            ..Script::default()
        }
    }

    fn get(&self, key: &str) -> Script {
        self.scripts
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Self::default_script(key))
    }

    pub fn size_ops(&self, key: &str) -> Vec<Arc<MockOp<i64>>> {
        filter(&self.log.lock().sizes, key)
    }

    pub fn download_ops(&self, key: &str) -> Vec<Arc<MockOp<()>>> {
        filter(&self.log.lock().downloads, key)
    }

    pub fn load_ops(&self, key: &str) -> Vec<Arc<MockOp<String>>> {
        filter(&self.log.lock().loads, key)
    }

    pub fn scene_ops(&self, key: &str) -> Vec<Arc<MockOp<MockScene>>> {
        filter(&self.log.lock().scenes, key)
    }

    pub fn unload_ops(&self) -> Vec<Arc<MockOp<()>>> {
        self.log.lock().unloads.clone()
    }

    pub fn activation_ops(&self) -> Vec<Arc<MockOp<()>>> {
        self.log.lock().activations.clone()
    }
}

fn filter<T>(log: &[(String, Arc<T>)], key: &str) -> Vec<Arc<T>> {
    log.iter()
        .filter(|(k, _)| k == key)
        .map(|(_, op)| op.clone())
        .collect()
}

impl ContentService for MockService {
    fn get_download_size(&self, key: &str) -> OpHandle<i64> {
        let script = self.get(key);
        let outcome = if script.size_fails {
            Scripted::Fail("size query failed")
        } else {
            Scripted::Value(script.size)
        };
        let op = MockOp::new(vec![0.5], outcome, false);
        self.log.lock().sizes.push((key.to_owned(), op.clone()));
        op
    }

    fn download_dependencies(&self, key: &str) -> OpHandle<()> {
        let script = self.get(key);
        let outcome = if script.download_fails {
            Scripted::Fail("connection reset")
        } else {
            Scripted::Value(())
        };
        let op = MockOp::new(script.download_steps, outcome, false);
        self.log.lock().downloads.push((key.to_owned(), op.clone()));
        op
    }
}

impl AssetProvider<String> for MockService {
    fn load_asset(&self, key: &str) -> OpHandle<String> {
        let script = self.get(key);
        let op = MockOp::new(script.load_steps, script.load, script.hold_load);
        self.log.lock().loads.push((key.to_owned(), op.clone()));
        op
    }
}

impl SceneProvider<MockScene> for MockService {
    fn load_scene(&self, key: &str, _params: &SceneParams) -> OpHandle<MockScene> {
        let script = self.get(key);
        let outcome = match script.load {
            Scripted::Value(name) => Scripted::Value(MockScene(name)),
            Scripted::Null => Scripted::Null,
            Scripted::Fail(msg) => Scripted::Fail(msg),
        };
        let op = MockOp::new(script.load_steps, outcome, script.hold_load);
        self.log.lock().scenes.push((key.to_owned(), op.clone()));
        op
    }

    fn unload_scene(&self, scene: OpHandle<MockScene>) -> OpHandle<()> {
        // Unload reclaims the scene handle.
        scene.release();
        let steps = vec![0.25, 0.5, 0.75];
        let op = MockOp::new(steps, Scripted::Value(()), false);
        self.log.lock().unloads.push(op.clone());
        op
    }

    fn activate(&self, scene: &MockScene) -> OpHandle<()> {
        let script = self.get(&scene.0);
        let outcome = if script.activate_fails {
            Scripted::Fail("activation rejected")
        } else {
            Scripted::Value(())
        };
        let op = MockOp::new(vec![0.3, 0.6], outcome, false);
        self.log.lock().activations.push(op.clone());
        op
    }
}
