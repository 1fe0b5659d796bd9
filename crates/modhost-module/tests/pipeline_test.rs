//! Pipeline behaviour against fake fetch and build collaborators.

mod common;

use std::sync::Arc;

use common::{FakeRemote, FakeRepo, WatCompiler, manifest};
use modhost_config::{GitCredentials, ModuleDescriptor};
use modhost_engine::WorkerHandle;
use modhost_module::{
    FetchError, FetchOutcome, LoadError, MetadataError, ModuleError, ModulePipeline, Stage,
};
use serde_json::json;

fn pipeline(
    modules: Vec<ModuleDescriptor>,
    root: &std::path::Path,
    remote: &Arc<FakeRemote>,
    compiler: &Arc<WatCompiler>,
) -> ModulePipeline {
    ModulePipeline::new(modules, root)
        .with_fetcher(remote.clone())
        .with_compiler(compiler.clone())
}

fn worker() -> WorkerHandle {
    WorkerHandle::new("modhost-task-queue", "test-worker")
}

#[tokio::test]
async fn end_to_end_single_module() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add(
        "https://git.example.com/org/repo.git",
        FakeRepo::new("demo", &["Greet"]),
    );
    let compiler = WatCompiler::new();
    let descriptor = ModuleDescriptor::new("git.example.com/org/repo").with_branch("main");

    let worker = worker();
    let report = pipeline(vec![descriptor], tmp.path(), &remote, &compiler)
        .run(&worker)
        .await
        .unwrap();

    assert!(report.skipped.is_empty());
    assert_eq!(report.loaded.len(), 1);
    let loaded = &report.loaded[0];
    assert_eq!(loaded.name, "demo");
    assert_eq!(loaded.location, tmp.path().join("repo"));
    assert_eq!(loaded.handlers.len(), 1);
    assert!(tmp.path().join("repo").join("module.wasm").is_file());

    assert!(worker.contains("Greet"));
    let out = worker.dispatch("Greet", json!({})).await.unwrap();
    assert_eq!(out, json!("done"));
}

#[tokio::test]
async fn partial_fetch_failure_keeps_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add("https://h/org/a.git", FakeRepo::new("a", &["A1"]));
    remote.add("https://h/org/b.git", FakeRepo::new("b", &["B1"]));
    remote.add("https://h/org/c.git", FakeRepo::new("c", &["C1", "C2"]));
    let compiler = WatCompiler::new();

    let modules = vec![
        ModuleDescriptor::new("h/org/a"),
        ModuleDescriptor::new("h/org/b").with_branch("does-not-exist"),
        ModuleDescriptor::new("h/org/c"),
    ];
    let worker = worker();
    let report = pipeline(modules, tmp.path(), &remote, &compiler)
        .run(&worker)
        .await
        .unwrap();

    let mut loaded: Vec<_> = report.loaded.iter().map(|m| m.name.as_str()).collect();
    loaded.sort();
    assert_eq!(loaded, vec!["a", "c"]);

    assert_eq!(report.skipped.len(), 1);
    let skipped = &report.skipped[0];
    assert_eq!(skipped.source, "h/org/b");
    assert_eq!(skipped.error.stage(), Stage::Fetch);
    match &skipped.error {
        ModuleError::Fetch(FetchError::BranchNotFound { available, .. }) => {
            assert_eq!(available, &vec!["main".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!tmp.path().join("b").exists());

    let names: Vec<_> = worker.handlers().into_iter().map(|h| h.name).collect();
    assert_eq!(names, vec!["A1", "C1", "C2"]);
}

#[tokio::test]
async fn second_run_skips_fetch_and_rebuilds() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add("https://h/org/a.git", FakeRepo::new("a", &["A1"]));
    let compiler = WatCompiler::new();
    let modules = vec![ModuleDescriptor::new("h/org/a")];

    let first = pipeline(modules.clone(), tmp.path(), &remote, &compiler)
        .prepare()
        .await;
    assert_eq!(first.prepared[0].fetch, FetchOutcome::Fetched);

    let second_pipeline = pipeline(modules, tmp.path(), &remote, &compiler);
    let second = second_pipeline.prepare().await;
    assert_eq!(second.prepared[0].fetch, FetchOutcome::AlreadyPresent);
    assert_eq!(second.prepared[0].metadata, first.prepared[0].metadata);
    assert_eq!(remote.fetches(), 1);

    // Two loads onto separate workers: the artifact is rebuilt each time.
    second_pipeline
        .load(first.prepared, &worker())
        .await
        .unwrap();
    second_pipeline
        .load(second.prepared, &worker())
        .await
        .unwrap();
    assert_eq!(compiler.builds(), 2);
    assert_eq!(compiler.stale_seen(), 0);
}

#[tokio::test]
async fn force_refresh_refetches() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add("https://h/org/a.git", FakeRepo::new("a", &[]));
    let compiler = WatCompiler::new();
    let modules = vec![ModuleDescriptor::new("h/org/a")];

    pipeline(modules.clone(), tmp.path(), &remote, &compiler)
        .prepare()
        .await;
    let leftover = tmp.path().join("a").join("leftover");
    std::fs::write(&leftover, "x").unwrap();

    let report = pipeline(modules, tmp.path(), &remote, &compiler)
        .with_force_refresh(true)
        .prepare()
        .await;
    assert_eq!(report.prepared[0].fetch, FetchOutcome::Fetched);
    assert_eq!(remote.fetches(), 2);
    assert!(!leftover.exists());
}

#[tokio::test]
async fn metadata_failures_skip_module() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    let mut no_contact = manifest("nc", "rust");
    no_contact.as_object_mut().unwrap().remove("contact");
    remote.add(
        "https://h/org/nc.git",
        FakeRepo::new("nc", &[]).with_manifest(no_contact),
    );
    remote.add(
        "https://h/org/go.git",
        FakeRepo::new("go", &[]).with_manifest(manifest("go", "go")),
    );
    remote.add("https://h/org/ok.git", FakeRepo::new("ok", &["Ok"]));
    let compiler = WatCompiler::new();

    let modules = vec![
        ModuleDescriptor::new("h/org/nc"),
        ModuleDescriptor::new("h/org/go"),
        ModuleDescriptor::new("h/org/ok"),
    ];
    let report = pipeline(modules, tmp.path(), &remote, &compiler)
        .run(&worker())
        .await
        .unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.skipped.len(), 2);
    let fields: Vec<_> = report
        .skipped
        .iter()
        .map(|s| match &s.error {
            ModuleError::Metadata(e) => e.field_name().unwrap().to_string(),
            other => panic!("unexpected error: {other}"),
        })
        .collect();
    assert!(fields.contains(&"contact".to_string()));
    assert!(fields.contains(&"language".to_string()));
    assert!(report.skipped.iter().any(|s| matches!(
        s.error,
        ModuleError::Metadata(MetadataError::UnsupportedLanguage { .. })
    )));
}

#[tokio::test]
async fn build_failure_skips_module() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add(
        "https://h/org/broken.git",
        FakeRepo::new("broken", &[]).with_wat(";; COMPILE_ERROR"),
    );
    remote.add("https://h/org/ok.git", FakeRepo::new("ok", &["Ok"]));
    let compiler = WatCompiler::new();

    let modules = vec![
        ModuleDescriptor::new("h/org/broken"),
        ModuleDescriptor::new("h/org/ok"),
    ];
    let worker = worker();
    let report = pipeline(modules, tmp.path(), &remote, &compiler)
        .run(&worker)
        .await
        .unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].error.stage(), Stage::Build);
    assert!(report.skipped[0].error.to_string().contains("E0425"));
    assert!(worker.contains("Ok"));
}

#[tokio::test]
async fn missing_entrypoint_is_fatal_and_named() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add(
        "https://h/org/noexport.git",
        FakeRepo::new("noexport", &[]).with_wat(r#"(module (memory (export "memory") 1))"#),
    );
    remote.add("https://h/org/ok.git", FakeRepo::new("ok", &["Ok"]));
    let compiler = WatCompiler::new();

    let modules = vec![
        ModuleDescriptor::new("h/org/noexport"),
        ModuleDescriptor::new("h/org/ok"),
    ];
    let worker = worker();
    let err = pipeline(modules, tmp.path(), &remote, &compiler)
        .run(&worker)
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Load);
    assert_eq!(err.source_url, "h/org/noexport");
    assert_eq!(err.location, tmp.path().join("noexport"));
    assert!(matches!(
        err.error,
        ModuleError::Load(LoadError::EntrypointNotFound { .. })
    ));
    // The sibling still finished its stage before the failure surfaced.
    assert!(worker.contains("Ok"));
}

#[tokio::test]
async fn handler_name_clash_is_fatal_and_leaves_no_partial_module() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add("https://h/org/one.git", FakeRepo::new("one", &["Shared"]));
    remote.add(
        "https://h/org/two.git",
        FakeRepo::new("two", &["Own", "Shared"]),
    );
    let compiler = WatCompiler::new();

    let modules = vec![
        ModuleDescriptor::new("h/org/one"),
        ModuleDescriptor::new("h/org/two"),
    ];
    let worker = worker();
    let err = pipeline(modules, tmp.path(), &remote, &compiler)
        .run(&worker)
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Load);
    assert!(matches!(
        err.error,
        ModuleError::Load(LoadError::Registration(_))
    ));
    // Whichever module lost the race contributed nothing.
    if err.source_url == "h/org/two" {
        assert!(!worker.contains("Own"));
        assert_eq!(worker.len(), 1);
    } else {
        assert_eq!(err.source_url, "h/org/one");
        assert_eq!(worker.len(), 2);
    }
}

#[tokio::test]
async fn wrong_entrypoint_shape_is_distinct() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add(
        "https://h/org/skew.git",
        FakeRepo::new("skew", &[])
            .with_wat(r#"(module (func (export "modhost_register") (param i32 i32)))"#),
    );
    let compiler = WatCompiler::new();

    let err = pipeline(
        vec![ModuleDescriptor::new("h/org/skew")],
        tmp.path(),
        &remote,
        &compiler,
    )
    .run(&worker())
    .await
    .unwrap_err();
    assert!(matches!(
        err.error,
        ModuleError::Load(LoadError::EntrypointWrongShape { .. })
    ));
}

#[tokio::test]
async fn sub_storage_and_module_location() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add(
        "https://h/org/mono.git",
        FakeRepo::new("inner", &["Inner"]).at("workers/inner"),
    );
    let compiler = WatCompiler::new();

    let descriptor = ModuleDescriptor::new("h/org/mono")
        .with_sub_storage("team")
        .with_module_location("workers/inner");
    let report = pipeline(vec![descriptor], tmp.path(), &remote, &compiler)
        .run(&worker())
        .await
        .unwrap();
    assert_eq!(
        report.loaded[0].location,
        tmp.path().join("team").join("mono").join("workers").join("inner")
    );
}

#[tokio::test]
async fn module_credentials_override_default() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    remote.add("https://h/org/a.git", FakeRepo::new("a", &[]));
    remote.add("https://h/org/b.git", FakeRepo::new("b", &[]));
    let compiler = WatCompiler::new();

    let modules = vec![
        ModuleDescriptor::new("h/org/a"),
        ModuleDescriptor::new("h/org/b").with_credentials(GitCredentials {
            username: Some("own".into()),
            ..Default::default()
        }),
    ];
    pipeline(modules, tmp.path(), &remote, &compiler)
        .with_default_credentials(GitCredentials {
            username: Some("global".into()),
            ..Default::default()
        })
        .prepare()
        .await;

    let mut users: Vec<_> = remote
        .seen_credentials()
        .into_iter()
        .filter_map(|c| c.username)
        .collect();
    users.sort();
    assert_eq!(users, vec!["global", "own"]);
}

#[tokio::test]
async fn empty_descriptor_set_is_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let remote = FakeRemote::new();
    let compiler = WatCompiler::new();
    let worker = worker();
    let report = pipeline(vec![], tmp.path(), &remote, &compiler)
        .run(&worker)
        .await
        .unwrap();
    assert!(report.loaded.is_empty());
    assert!(report.skipped.is_empty());
    assert!(worker.is_empty());
    assert_eq!(remote.fetches(), 0);
}
