//! Integration tests for kaos-plugin-api.
//!
//! These tests cover:
//! - Full plugin lifecycle: discover → validate → resolve → load → start
//! - Capability lookups between plugins during load
//! - Exclusions, duplicate names, authorization and load failures
//! - Host functions by permission tier
//! - Concurrent invocation, and writes racing reads after load
//! - Shutdown revoking handles plugins still hold

use async_trait::async_trait;
use kaos_plugin_api::{
    AllowList, Capability, ContentKind, FailureReason, HostContext, HostSettings, LifecycleState,
    LoadReport, Plugin, PluginCatalog, PluginContext, PluginLoader, ScopedApis, ScopedContent,
};
use kaos_runtime::{
    discover_plugins, CapabilityError, LoadError, ManifestError, RegistryError, ResolutionError,
    RuntimeError, RuntimeResult, MANIFEST_FILE,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ==============================================================================
// Test Fixture Helpers
// ==============================================================================

/// Create a plugin directory with a `_manifest.json` file.
fn create_test_plugin(root: &Path, dir_name: &str, name: &str, deps: &[&str]) {
    create_plugin_with(root, dir_name, name, deps, "User", "Normal");
}

fn create_plugin_with(
    root: &Path,
    dir_name: &str,
    name: &str,
    deps: &[&str],
    permission: &str,
    installation_level: &str,
) {
    let plugin_dir = root.join(dir_name);
    std::fs::create_dir_all(&plugin_dir).unwrap();
    let manifest = json!({
        "version": "1.0.0",
        "pluginName": name,
        "dependencies": deps,
        "Developer": "Kaos Tests",
        "Permission": permission,
        "InstallationLevel": installation_level,
    });
    std::fs::write(
        plugin_dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

async fn load_all(
    root: &Path,
    host: HostContext,
    catalog: PluginCatalog,
) -> (PluginLoader, LoadReport) {
    let loader = PluginLoader::new(host, catalog);
    let report = loader.run(discover_plugins(&[root.to_path_buf()])).await;
    (loader, report)
}

fn state_of(report: &LoadReport, dir_name: &str) -> LifecycleState {
    report
        .records()
        .iter()
        .find(|r| r.dir_name() == dir_name)
        .map(|r| r.state())
        .unwrap()
}

/// Registers one API that returns the owner's name.
struct Provides {
    api: &'static str,
}

#[async_trait]
impl Plugin for Provides {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        let owner = ctx.plugin_name().to_string();
        ctx.apis()
            .register_fn(self.api, move |_| Ok(Value::String(owner.clone())))
            .await?;
        Ok(())
    }
}

/// Looks up an API during load and fails if it is absent.
struct Requires {
    owner: &'static str,
    api: &'static str,
    found: Arc<AtomicBool>,
}

#[async_trait]
impl Plugin for Requires {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        if ctx.apis().get(self.owner, self.api).await.is_none() {
            return Err(RuntimeError::InitializationFailed(format!(
                "{}.{} is not registered",
                self.owner, self.api
            )));
        }
        self.found.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Registers something, then fails or panics.
struct Breaks {
    panic: bool,
}

#[async_trait]
impl Plugin for Breaks {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        ctx.apis().register_fn("half", |_| Ok(Value::Null)).await?;
        if self.panic {
            panic!("load went wrong");
        }
        Err(RuntimeError::InitializationFailed("load went wrong".to_string()))
    }
}

/// Records whether it ran and whether it was handed host functions.
struct Watcher {
    ran: Arc<AtomicBool>,
    saw_host: Arc<Mutex<Option<bool>>>,
}

#[async_trait]
impl Plugin for Watcher {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        self.ran.store(true, Ordering::SeqCst);
        *self.saw_host.lock().unwrap() = Some(ctx.host().is_some());
        Ok(())
    }
}

struct Watch {
    ran: Arc<AtomicBool>,
    saw_host: Arc<Mutex<Option<bool>>>,
}

fn watch() -> Watch {
    Watch {
        ran: Arc::new(AtomicBool::new(false)),
        saw_host: Arc::new(Mutex::new(None)),
    }
}

impl Watch {
    fn register(&self, catalog: PluginCatalog, name: &str) -> PluginCatalog {
        let ran = Arc::clone(&self.ran);
        let saw_host = Arc::clone(&self.saw_host);
        catalog.with(name, move || {
            Arc::new(Watcher {
                ran: Arc::clone(&ran),
                saw_host: Arc::clone(&saw_host),
            }) as Arc<dyn Plugin>
        })
    }
}

fn provides(api: &'static str) -> impl Fn() -> Arc<dyn Plugin> + Send + Sync + 'static {
    move || Arc::new(Provides { api }) as Arc<dyn Plugin>
}

// ==============================================================================
// Lifecycle Tests
// ==============================================================================

#[tokio::test]
async fn test_dependency_registers_before_dependent_loads() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "a", "A", &["B"]);
    create_test_plugin(temp_dir.path(), "b", "B", &[]);

    let found = Arc::new(AtomicBool::new(false));
    let found_in_load = Arc::clone(&found);
    let catalog = PluginCatalog::new()
        .with("B", provides("someApi"))
        .with("A", move || {
            Arc::new(Requires {
                owner: "B",
                api: "someApi",
                found: Arc::clone(&found_in_load),
            }) as Arc<dyn Plugin>
        });

    let (loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert_eq!(report.load_order(), ["B", "A"]);
    assert_eq!(report.active_count(), 2);
    assert!(found.load(Ordering::SeqCst));
    assert!(report.get("A").unwrap().loaded_at().is_some());

    let value = loader.host().apis().invoke("B", "someApi", vec![]).await.unwrap();
    assert_eq!(value, json!("B"));
}

#[tokio::test]
async fn test_missing_dependency_excludes_dependents_only() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "a", "A", &["C"]);
    create_test_plugin(temp_dir.path(), "b", "B", &[]);
    create_test_plugin(temp_dir.path(), "d", "D", &["A"]);

    let catalog = PluginCatalog::new()
        .with("A", provides("a"))
        .with("B", provides("b"))
        .with("D", provides("d"));
    let (_loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    let root_cause = ResolutionError::MissingDependency {
        plugin: "A".to_string(),
        dependency: "C".to_string(),
    };
    assert_eq!(report.load_order(), ["B"]);
    assert_eq!(
        report.get("A").unwrap().failure(),
        Some(&FailureReason::Resolution {
            cause: root_cause.clone(),
            via: None,
        })
    );
    assert_eq!(
        report.get("D").unwrap().failure(),
        Some(&FailureReason::Resolution {
            cause: root_cause,
            via: Some("A".to_string()),
        })
    );
}

#[tokio::test]
async fn test_cycle_members_never_execute() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "a", "A", &["B"]);
    create_test_plugin(temp_dir.path(), "b", "B", &["A"]);

    let tracked = watch();
    let catalog = tracked.register(tracked.register(PluginCatalog::new(), "A"), "B");
    let (_loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert_eq!(report.active_count(), 0);
    assert!(!tracked.ran.load(Ordering::SeqCst));
    for record in report.records() {
        assert!(matches!(
            record.failure(),
            Some(FailureReason::Resolution {
                cause: ResolutionError::CyclicDependency { .. },
                ..
            })
        ));
    }
}

#[tokio::test]
async fn test_duplicate_name_keeps_first_registrations() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "x-first", "X", &[]);
    create_test_plugin(temp_dir.path(), "x-second", "X", &[]);

    let catalog = PluginCatalog::new().with("X", provides("hello"));
    let (loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert_eq!(state_of(&report, "x-first"), LifecycleState::Active);
    assert_eq!(state_of(&report, "x-second"), LifecycleState::Failed);
    assert_eq!(
        report.records()[1].failure(),
        Some(&FailureReason::Load(LoadError::DuplicatePluginName(
            "X".to_string()
        )))
    );
    assert!(loader.host().apis().get("X", "hello").await.is_some());
}

#[tokio::test]
async fn test_invalid_manifest_is_reported_last() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "b", "B", &[]);
    create_plugin_with(temp_dir.path(), "a", "A", &[], "Root", "Normal");

    let catalog = PluginCatalog::new().with("B", provides("b"));
    let (_loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    let dirs: Vec<&str> = report.records().iter().map(|r| r.dir_name()).collect();
    assert_eq!(dirs, ["b", "a"]);
    assert_eq!(
        report.records()[1].failure(),
        Some(&FailureReason::Manifest(ManifestError::InvalidPermission(
            "Root".to_string()
        )))
    );
    assert!(report.records()[1].manifest().is_none());
}

// ==============================================================================
// Authorization Tests
// ==============================================================================

#[tokio::test]
async fn test_admin_install_denied_without_executing() {
    let temp_dir = TempDir::new().unwrap();
    create_plugin_with(temp_dir.path(), "admin", "Admin", &[], "User", "Admin");

    let tracked = watch();
    let catalog = tracked.register(PluginCatalog::new(), "Admin");
    let (_loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert!(!tracked.ran.load(Ordering::SeqCst));
    assert_eq!(
        report.get("Admin").unwrap().failure(),
        Some(&FailureReason::Load(LoadError::InstallationDenied {
            plugin: "Admin".to_string(),
            reason: "not approved by host".to_string(),
        }))
    );
}

#[tokio::test]
async fn test_admin_install_approved_by_gate() {
    let temp_dir = TempDir::new().unwrap();
    create_plugin_with(temp_dir.path(), "admin", "Admin", &[], "User", "Admin");

    let tracked = watch();
    let catalog = tracked.register(PluginCatalog::new(), "Admin");
    let host = HostContext::new(Arc::new(AllowList::new(["Admin"])), HostSettings::default());
    let (_loader, report) = load_all(temp_dir.path(), host, catalog).await;

    assert!(tracked.ran.load(Ordering::SeqCst));
    assert_eq!(report.load_order(), ["Admin"]);
}

#[tokio::test]
async fn test_denied_dependency_blocks_dependents() {
    let temp_dir = TempDir::new().unwrap();
    create_plugin_with(temp_dir.path(), "b", "B", &[], "User", "Admin");
    create_test_plugin(temp_dir.path(), "a", "A", &["B"]);
    create_test_plugin(temp_dir.path(), "c", "C", &["A"]);

    let direct = watch();
    let transitive = watch();
    let catalog = transitive.register(
        direct.register(PluginCatalog::new().with("B", provides("b")), "A"),
        "C",
    );
    let (loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    let denied = LoadError::InstallationDenied {
        plugin: "B".to_string(),
        reason: "not approved by host".to_string(),
    };
    assert_eq!(report.active_count(), 0);
    assert!(!direct.ran.load(Ordering::SeqCst));
    assert!(!transitive.ran.load(Ordering::SeqCst));
    assert_eq!(
        report.get("A").unwrap().failure(),
        Some(&FailureReason::Dependency {
            cause: denied.clone(),
            via: "B".to_string(),
        })
    );
    assert_eq!(
        report.get("C").unwrap().failure(),
        Some(&FailureReason::Dependency {
            cause: denied,
            via: "A".to_string(),
        })
    );
    assert!(loader.host().apis().is_empty().await);
}

#[tokio::test]
async fn test_failed_load_blocks_dependents() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "broken", "Broken", &[]);
    create_test_plugin(temp_dir.path(), "dependent", "Dependent", &["Broken"]);

    let tracked = watch();
    let catalog = tracked.register(
        PluginCatalog::new().with("Broken", || Arc::new(Breaks { panic: true }) as Arc<dyn Plugin>),
        "Dependent",
    );
    let (_loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert!(!tracked.ran.load(Ordering::SeqCst));
    match report.get("Dependent").unwrap().failure() {
        Some(FailureReason::Dependency {
            cause: LoadError::LoadExecutionError { plugin, .. },
            via,
        }) => {
            assert_eq!(plugin, "Broken");
            assert_eq!(via, "Broken");
        }
        other => panic!("unexpected failure: {:?}", other),
    }
}

// ==============================================================================
// Load Failure Tests
// ==============================================================================

#[tokio::test]
async fn test_load_error_withdraws_registrations() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "broken", "Broken", &[]);
    create_test_plugin(temp_dir.path(), "fine", "Fine", &[]);

    let catalog = PluginCatalog::new()
        .with("Broken", || Arc::new(Breaks { panic: false }) as Arc<dyn Plugin>)
        .with("Fine", provides("ok"));
    let (loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert_eq!(report.load_order(), ["Fine"]);
    assert!(matches!(
        report.get("Broken").unwrap().failure(),
        Some(FailureReason::Load(LoadError::LoadExecutionError { .. }))
    ));
    assert!(loader.host().apis().get("Broken", "half").await.is_none());
}

#[tokio::test]
async fn test_panic_in_load_is_contained() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "a", "Panicky", &[]);
    create_test_plugin(temp_dir.path(), "b", "Steady", &[]);

    let catalog = PluginCatalog::new()
        .with("Panicky", || Arc::new(Breaks { panic: true }) as Arc<dyn Plugin>)
        .with("Steady", provides("ok"));
    let (loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    match report.get("Panicky").unwrap().failure() {
        Some(FailureReason::Load(LoadError::LoadExecutionError { message, .. })) => {
            assert!(message.contains("load went wrong"));
        }
        other => panic!("unexpected failure: {:?}", other),
    }
    assert!(loader.host().apis().get("Panicky", "half").await.is_none());
    assert_eq!(report.load_order(), ["Steady"]);
}

#[tokio::test]
async fn test_missing_plugin_code_fails_load() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "ghost", "Ghost", &[]);

    let (_loader, report) =
        load_all(temp_dir.path(), HostContext::default(), PluginCatalog::new()).await;

    assert!(matches!(
        report.get("Ghost").unwrap().failure(),
        Some(FailureReason::Load(LoadError::LoadExecutionError { .. }))
    ));
}

// ==============================================================================
// Permission Tier Tests
// ==============================================================================

#[tokio::test]
async fn test_only_system_tier_gets_host_functions() {
    let temp_dir = TempDir::new().unwrap();
    create_plugin_with(temp_dir.path(), "sys", "Sys", &[], "System", "Normal");
    create_plugin_with(temp_dir.path(), "usr", "Usr", &[], "User", "Normal");

    let system = watch();
    let user = watch();
    let catalog = user.register(system.register(PluginCatalog::new(), "Sys"), "Usr");
    let (_loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;

    assert_eq!(report.active_count(), 2);
    assert_eq!(*system.saw_host.lock().unwrap(), Some(true));
    assert_eq!(*user.saw_host.lock().unwrap(), Some(false));
}

// ==============================================================================
// Start Phase Tests
// ==============================================================================

struct FailsToStart;

#[async_trait]
impl Plugin for FailsToStart {
    async fn load(&self, _ctx: &PluginContext) -> RuntimeResult<()> {
        Ok(())
    }

    async fn start(&self, _ctx: &PluginContext) -> RuntimeResult<()> {
        Err(RuntimeError::InitializationFailed("port in use".to_string()))
    }
}

#[tokio::test]
async fn test_start_failure_keeps_plugin_active() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "server", "Server", &[]);

    let catalog = PluginCatalog::new().with("Server", || Arc::new(FailsToStart) as Arc<dyn Plugin>);
    let (loader, mut report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;
    loader.start_all(&mut report).await;

    let record = report.get("Server").unwrap();
    assert!(record.is_active());
    assert!(record.start_error().unwrap().contains("port in use"));
}

// ==============================================================================
// Registry Concurrency Tests
// ==============================================================================

struct Counter;

#[async_trait]
impl Plugin for Counter {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        ctx.apis()
            .register_fn("double", |args| {
                let n = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| CapabilityError::new("expected a number"))?;
                Ok(json!(n * 2))
            })
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_concurrent_invocations_are_consistent() {
    let temp_dir = TempDir::new().unwrap();
    create_test_plugin(temp_dir.path(), "counter", "Counter", &[]);

    let catalog = PluginCatalog::new().with("Counter", || Arc::new(Counter) as Arc<dyn Plugin>);
    let (loader, report) = load_all(temp_dir.path(), HostContext::default(), catalog).await;
    assert_eq!(report.active_count(), 1);

    let mut handles = Vec::new();
    for task in 0..32i64 {
        let apis = Arc::clone(loader.host().apis());
        handles.push(tokio::spawn(async move {
            for i in 0..50i64 {
                let n = task * 100 + i;
                let value = apis.invoke("Counter", "double", vec![json!(n)]).await.unwrap();
                assert_eq!(value, json!(n * 2));
                assert!(apis.get("Counter", "double").await.is_some());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let err = loader
        .host()
        .apis()
        .invoke("Counter", "double", vec![json!("x")])
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::CapabilityFailed { .. }));
}

/// Hands its scoped handles out so a test can keep writing after load.
struct Keeper {
    handles: Arc<Mutex<Option<(ScopedApis, ScopedContent)>>>,
}

#[async_trait]
impl Plugin for Keeper {
    async fn load(&self, ctx: &PluginContext) -> RuntimeResult<()> {
        *self.handles.lock().unwrap() = Some((ctx.apis().clone(), ctx.content().clone()));
        Ok(())
    }
}

const KEEPER: &str = "Keeper";

async fn load_keeper(root: &Path) -> (PluginLoader, LoadReport, ScopedApis, ScopedContent) {
    create_test_plugin(root, "keeper", KEEPER, &[]);
    let handles = Arc::new(Mutex::new(None));
    let shared = Arc::clone(&handles);
    let catalog = PluginCatalog::new().with(KEEPER, move || {
        Arc::new(Keeper {
            handles: Arc::clone(&shared),
        }) as Arc<dyn Plugin>
    });
    let (loader, report) = load_all(root, HostContext::default(), catalog).await;
    assert_eq!(report.load_order(), [KEEPER]);

    let (apis, content) = handles.lock().unwrap().take().unwrap();
    (loader, report, apis, content)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_writes_after_load_never_show_partial_state() {
    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 50;
    const TOTAL: i64 = WRITERS * PER_WRITER;

    let temp_dir = TempDir::new().unwrap();
    let (loader, _report, apis, content) = load_keeper(temp_dir.path()).await;

    let mut writers = Vec::new();
    for w in 0..WRITERS {
        let apis = apis.clone();
        let content = content.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..PER_WRITER {
                let n = w * PER_WRITER + i;
                apis.register_fn(&format!("api_{}", n), move |_| Ok(json!(n)))
                    .await
                    .unwrap();
                content
                    .add_fragment("body", ContentKind::Html, format!("<p>{}</p>", n))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..4i64 {
        let registry = Arc::clone(loader.host().apis());
        let fragments = Arc::clone(loader.host().content());
        readers.push(tokio::spawn(async move {
            let mut seen = 0;
            for round in 0..200i64 {
                let n = (round * 7 + r) % TOTAL;
                let api = format!("api_{}", n);

                if let Some(capability) = registry.get(KEEPER, &api).await {
                    assert_eq!(capability.call(vec![]).await.unwrap(), json!(n));
                }
                match registry.invoke(KEEPER, &api, vec![]).await {
                    Ok(value) => assert_eq!(value, json!(n)),
                    Err(RegistryError::UnknownApi { .. }) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }

                let listing = fragments.list_fragments("body", ContentKind::Html).await;
                assert!(listing.windows(2).all(|w| w[0].sequence < w[1].sequence));
                assert!(listing
                    .iter()
                    .all(|f| f.owner == KEEPER && f.content.starts_with("<p>")));
                assert!(listing.len() >= seen);
                seen = listing.len();
                tokio::task::yield_now().await;
            }
        }));
    }

    for handle in writers.into_iter().chain(readers) {
        handle.await.unwrap();
    }

    assert_eq!(loader.host().apis().list_apis(KEEPER).await.len(), TOTAL as usize);
    let sequences: Vec<u64> = loader
        .host()
        .content()
        .list_fragments("body", ContentKind::Html)
        .await
        .iter()
        .map(|f| f.sequence)
        .collect();
    assert_eq!(sequences, (0..TOTAL as u64).collect::<Vec<_>>());
}

// ==============================================================================
// Shutdown Tests
// ==============================================================================

#[tokio::test]
async fn test_shutdown_revokes_held_handles() {
    let temp_dir = TempDir::new().unwrap();
    let (loader, report, apis, content) = load_keeper(temp_dir.path()).await;
    apis.register_fn("before", |_| Ok(Value::Null)).await.unwrap();

    loader.shutdown(&report).await;

    assert!(loader.host().apis().is_empty().await);
    let err = apis
        .register_fn("after", |_| Ok(Value::Null))
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::OwnerInactive(KEEPER.to_string()));
    assert!(content
        .add_fragment("head", ContentKind::Css, "late{}")
        .await
        .is_err());
    assert!(loader.host().content().is_empty().await);
}
