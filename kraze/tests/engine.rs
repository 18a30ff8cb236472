//! End-to-end `Engine::up`/`down` scenarios against hand-rolled fakes
//! for `Provider`, `ImageBackend`, `StateBackend` and `NamespaceBackend`,
//! so these run without a live cluster or container engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;

use kraze::engine::{Engine, EngineOptions, Filter, UpOutcome};
use kraze::image::{HostInfo, ImageBackend, ImageTracker};
use kraze::kubectl::NamespaceBackend;
use kraze::provider::{Provider, ProviderOptions, ProviderStatus};
use kraze::state_store::StateBackend;
use kraze_core::{ClusterConfig, ClusterState, Config, ServiceSpec, ServiceType};

fn spec(name: &str, deps: &[&str]) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        service_type: ServiceType::Helm,
        namespace: "default".to_string(),
        create_namespace: true,
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
        labels: BTreeMap::new(),
        enabled: true,
        wait: Some(false),
        wait_timeout: None,
        post_ready_delay: "0s".to_string(),
        chart: Some("repo/chart".to_string()),
        repo: Some("https://example.invalid/repo".to_string()),
        version: None,
        values: vec![],
        values_inline: None,
        path: None,
        paths: vec![],
    }
}

fn config(specs: Vec<ServiceSpec>) -> Config {
    Config {
        cluster: ClusterConfig { name: "dev-cluster".to_string(), is_external: false },
        services: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
    }
}

// `Engine::provider_factory` is a bare fn pointer, so `RecordingProvider`
// can't close over per-test state; it reads/writes process-wide statics
// instead. `test_lock()` serializes the handful of tests that use it so
// they don't see each other's install logs.

static LOG: OnceLock<Mutex<Vec<String>>> = OnceLock::new();
static FAIL_ON: OnceLock<Mutex<Option<String>>> = OnceLock::new();
static TEST_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn log_handle() -> &'static Mutex<Vec<String>> {
    LOG.get_or_init(|| Mutex::new(Vec::new()))
}

fn fail_on_handle() -> &'static Mutex<Option<String>> {
    FAIL_ON.get_or_init(|| Mutex::new(None))
}

fn lock_test() -> MutexGuard<'static, ()> {
    TEST_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}

fn reset(fail_on: Option<&str>) {
    log_handle().lock().unwrap().clear();
    *fail_on_handle().lock().unwrap() = fail_on.map(String::from);
}

struct RecordingProvider;

#[async_trait]
impl Provider for RecordingProvider {
    async fn install(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> kraze::Result<()> {
        if fail_on_handle().lock().unwrap().as_deref() == Some(spec.name.as_str()) {
            return Err(kraze::ErrorKind::ProviderError(spec.name.clone(), "induced test failure".to_string()).into());
        }
        log_handle().lock().unwrap().push(format!("install:{}", spec.name));
        Ok(())
    }

    async fn uninstall(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> kraze::Result<()> {
        log_handle().lock().unwrap().push(format!("uninstall:{}", spec.name));
        Ok(())
    }

    async fn is_installed(&self, _spec: &ServiceSpec, _opts: &ProviderOptions) -> kraze::Result<bool> {
        Ok(true)
    }

    async fn status(&self, _spec: &ServiceSpec, _opts: &ProviderOptions) -> kraze::Result<ProviderStatus> {
        Ok(ProviderStatus { installed: true, ready: true, message: "ok".to_string() })
    }
}

fn recording_factory(_spec: &ServiceSpec) -> Box<dyn Provider> {
    Box::new(RecordingProvider)
}

/// Nothing is ever present on the host or in-cluster; every mutating
/// call trivially succeeds.
struct NoopImageBackend;

#[async_trait]
impl ImageBackend for NoopImageBackend {
    async fn host_info(&self, _raw_ref: &str) -> kraze::Result<HostInfo> {
        Ok(HostInfo::default())
    }
    async fn cluster_digest(&self, _raw_ref: &str) -> kraze::Result<String> {
        Ok(String::new())
    }
    async fn pull(&self, _raw_ref: &str) -> kraze::Result<()> {
        Ok(())
    }
    async fn load(&self, _raw_ref: &str) -> kraze::Result<()> {
        Ok(())
    }
    async fn untag(&self, _raw_ref: &str) -> kraze::Result<()> {
        Ok(())
    }
}

fn noop_tracker() -> Arc<ImageTracker> {
    Arc::new(ImageTracker::with_backend("dev-cluster", false, Box::new(NoopImageBackend)))
}

/// Like `NoopImageBackend`, but `host_info` sleeps first. Used to give a
/// failing level-mate's cancellation time to land before an unrelated
/// sibling's image sync finishes, so a test can tell "cancellation fired"
/// apart from "the sibling just hadn't gotten to install yet".
struct SlowImageBackend;

#[async_trait]
impl ImageBackend for SlowImageBackend {
    async fn host_info(&self, _raw_ref: &str) -> kraze::Result<HostInfo> {
        tokio::time::delay_for(std::time::Duration::from_millis(50)).await;
        Ok(HostInfo::default())
    }
    async fn cluster_digest(&self, _raw_ref: &str) -> kraze::Result<String> {
        Ok(String::new())
    }
    async fn pull(&self, _raw_ref: &str) -> kraze::Result<()> {
        Ok(())
    }
    async fn load(&self, _raw_ref: &str) -> kraze::Result<()> {
        Ok(())
    }
    async fn untag(&self, _raw_ref: &str) -> kraze::Result<()> {
        Ok(())
    }
}

fn slow_tracker() -> Arc<ImageTracker> {
    Arc::new(ImageTracker::with_backend("dev-cluster", false, Box::new(SlowImageBackend)))
}

/// An in-memory `StateBackend`, standing in for the `kraze-metadata`
/// ConfigMap.
struct FakeStateBackend {
    state: Mutex<Option<ClusterState>>,
}

impl FakeStateBackend {
    fn empty() -> FakeStateBackend {
        FakeStateBackend { state: Mutex::new(None) }
    }

    fn seeded(state: ClusterState) -> FakeStateBackend {
        FakeStateBackend { state: Mutex::new(Some(state)) }
    }
}

#[async_trait]
impl StateBackend for FakeStateBackend {
    async fn load(&self) -> kraze::Result<Option<ClusterState>> {
        Ok(self.state.lock().unwrap().clone())
    }
    async fn save(&self, state: &mut ClusterState) -> kraze::Result<()> {
        *self.state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
    async fn delete(&self) -> kraze::Result<()> {
        *self.state.lock().unwrap() = None;
        Ok(())
    }
}

/// A `NamespaceBackend` fake: every namespace is reported absent (so UP
/// always takes the `willCreate` branch) and every teardown operation
/// trivially succeeds, with no real `kubectl` invoked.
struct FakeNamespaceBackend;

#[async_trait]
impl NamespaceBackend for FakeNamespaceBackend {
    async fn namespace_exists(&self, _name: &str) -> kraze::Result<bool> {
        Ok(false)
    }
    async fn namespace_is_empty(&self, _name: &str) -> kraze::Result<bool> {
        Ok(true)
    }
    async fn delete_pvcs(&self, _namespace: &str) -> kraze::Result<()> {
        Ok(())
    }
    async fn delete_namespace(&self, _name: &str) -> kraze::Result<()> {
        Ok(())
    }
}

fn fake_namespaces() -> Arc<dyn NamespaceBackend> {
    Arc::new(FakeNamespaceBackend)
}

#[tokio::test]
async fn linear_chain_installs_deps_before_dependents() {
    let _guard = lock_test();
    reset(None);
    let cfg = config(vec![spec("db", &[]), spec("api", &["db"]), spec("web", &["api"])]);
    let engine = Engine::with_provider_factory(cfg, EngineOptions::default(), recording_factory);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::empty());

    let outcome = engine.up_with(Filter::default(), noop_tracker(), backend, fake_namespaces()).await.unwrap();
    match outcome {
        UpOutcome::Completed(state) => {
            assert_eq!(state.services.len(), 3);
            assert!(state.is_installed("db"));
            assert!(state.is_installed("api"));
            assert!(state.is_installed("web"));
        }
        other => panic!("expected Completed, got {:?}", other),
    }

    let log = log_handle().lock().unwrap();
    let pos = |n: &str| log.iter().position(|e| e == &format!("install:{}", n)).unwrap();
    assert!(pos("db") < pos("api"));
    assert!(pos("api") < pos("web"));
}

#[tokio::test]
async fn dry_run_reports_subset_without_touching_state() {
    let _guard = lock_test();
    reset(None);
    let cfg = config(vec![spec("db", &[]), spec("api", &["db"])]);
    let mut opts = EngineOptions::default();
    opts.dry_run = true;
    let engine = Engine::with_provider_factory(cfg, opts, recording_factory);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::empty());

    let outcome = engine.up_with(Filter::default(), noop_tracker(), backend.clone(), fake_namespaces()).await.unwrap();
    match outcome {
        UpOutcome::DryRun { subset } => {
            assert_eq!(subset, vec!["api".to_string(), "db".to_string()]);
        }
        other => panic!("expected DryRun, got {:?}", other),
    }
    assert!(backend.load().await.unwrap().is_none());
}

#[tokio::test]
async fn label_filter_expands_to_dependency_closure() {
    let _guard = lock_test();
    reset(None);
    let mut web = spec("web", &["api"]);
    web.labels.insert("tier".to_string(), "frontend".to_string());
    let cfg = config(vec![spec("db", &[]), spec("api", &["db"]), web]);
    let engine = Engine::with_provider_factory(cfg, EngineOptions::default(), recording_factory);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::empty());

    let filter = Filter { names: vec![], labels: vec![("tier".to_string(), "frontend".to_string())], no_deps: false };
    let outcome = engine.up_with(filter, noop_tracker(), backend, fake_namespaces()).await.unwrap();
    match outcome {
        UpOutcome::Completed(state) => {
            assert!(state.is_installed("db"));
            assert!(state.is_installed("api"));
            assert!(state.is_installed("web"));
        }
        other => panic!("expected Completed, got {:?}", other),
    }
}

#[tokio::test]
async fn level_failure_aborts_before_later_levels() {
    let _guard = lock_test();
    reset(Some("api"));
    let cfg = config(vec![spec("db", &[]), spec("api", &["db"]), spec("web", &["api"])]);
    let engine = Engine::with_provider_factory(cfg, EngineOptions::default(), recording_factory);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::empty());

    let result = engine.up_with(Filter::default(), noop_tracker(), backend, fake_namespaces()).await;
    assert!(result.is_err());

    let log = log_handle().lock().unwrap();
    assert!(log.contains(&"install:db".to_string()));
    assert!(!log.contains(&"install:web".to_string()));
}

#[tokio::test]
async fn same_level_sibling_failure_cancels_unrelated_peers() {
    let _guard = lock_test();
    reset(Some("b"));

    // `a`/`c` have no dependency on `b` or on each other, so all three
    // land in a single level. Only `a`/`c` carry an inline image
    // reference, so only they route through `SlowImageBackend`'s
    // artificial delay; `b` has nothing to scan, fails fast, and sets
    // the level's `cancelled` flag while `a`/`c` are still mid-sync.
    let mut a = spec("a", &[]);
    a.values_inline = Some("image: myapp:1.0".to_string());
    let b = spec("b", &[]);
    let mut c = spec("c", &[]);
    c.values_inline = Some("image: myapp:1.0".to_string());
    let cfg = config(vec![a, b, c]);
    let engine = Engine::with_provider_factory(cfg, EngineOptions::default(), recording_factory);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::empty());

    let result = engine.up_with(Filter::default(), slow_tracker(), backend, fake_namespaces()).await;
    assert!(result.is_err());

    // `run_up` awaits every worker in the level to completion before
    // returning, so if `install_one`'s `cancelled` checks weren't wired
    // up, `a`/`c` would have gone on to call `install` well within this
    // call's lifetime (their only added delay is a 50ms image sync) and
    // this log would show it. It doesn't: the cancellation check between
    // image sync and install caught both of them first.
    let log = log_handle().lock().unwrap();
    assert!(!log.contains(&"install:a".to_string()));
    assert!(!log.contains(&"install:c".to_string()));
    assert!(!log.contains(&"install:b".to_string()));
}

#[tokio::test]
async fn down_removes_in_reverse_order_and_gcs_orphaned_namespace() {
    let _guard = lock_test();
    reset(None);
    let cfg = config(vec![spec("db", &[]), spec("api", &["db"])]);
    let engine = Engine::with_provider_factory(cfg, EngineOptions::default(), recording_factory);

    let mut seed = ClusterState::new("dev-cluster", false);
    seed.mark_installed("db", "default", true);
    seed.mark_installed("api", "default", false);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::seeded(seed));

    let final_state = engine.down_with(Filter::default(), backend, fake_namespaces()).await.unwrap();
    assert!(!final_state.is_installed("db"));
    assert!(!final_state.is_installed("api"));

    let log = log_handle().lock().unwrap();
    let pos = |n: &str| log.iter().position(|e| e == &format!("uninstall:{}", n)).unwrap();
    assert!(pos("api") < pos("db"));
}

#[tokio::test]
async fn down_with_explicit_name_leaves_undeclared_namespace_sibling_alone() {
    let _guard = lock_test();
    reset(None);
    let cfg = config(vec![spec("db", &[])]);
    let engine = Engine::with_provider_factory(cfg, EngineOptions::default(), recording_factory);

    let mut seed = ClusterState::new("dev-cluster", false);
    seed.mark_installed("db", "shared-ns", true);
    seed.mark_installed("other", "shared-ns", false);
    let backend: Arc<dyn StateBackend> = Arc::new(FakeStateBackend::seeded(seed));

    let filter = Filter { names: vec!["db".to_string()], labels: vec![], no_deps: false };
    let final_state = engine.down_with(filter, backend, fake_namespaces()).await.unwrap();
    assert!(!final_state.is_installed("db"));
    // "other" was never targeted, so its record survives untouched.
    assert!(final_state.is_installed("other"));
}
