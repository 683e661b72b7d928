//! Integration tests for builder crate

use async_trait::async_trait;
use kiln_builder::{
    BuildContext, BuildScheduler, BuiltNode, ExecutorOptions, LifecycleExecutor, NodeExecutor,
    NodeJob, SchedulerOptions, SourceFetcher, ToolGate,
};
use kiln_cache::PackageCache;
use kiln_errors::{BuildError, Error};
use kiln_recipe::{parse_recipe_str, RecipeRegistry, SourceMethod};
use kiln_resolver::{ResolutionRequest, ResolutionResult, Resolver};
use kiln_events::{AppEvent, BuildEvent, EventMessage, EventReceiver};
use kiln_types::{
    Arch, BuildReport, NodeState, PackageInfo, PackageRef, Phase, Requirement, Settings, SkipReason,
    TestOutcome,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

async fn resolve(recipe_dir: &Path, recipes: &[&str], roots: &[&str]) -> ResolutionResult {
    resolve_for(recipe_dir, recipes, roots, Settings::host()).await
}

async fn resolve_for(
    recipe_dir: &Path,
    recipes: &[&str],
    roots: &[&str],
    settings: Settings,
) -> ResolutionResult {
    let mut registry = RecipeRegistry::new();
    for yaml in recipes {
        for recipe in parse_recipe_str(yaml, recipe_dir).unwrap() {
            registry.insert(recipe).unwrap();
        }
    }
    let requirements = roots
        .iter()
        .map(|root| Requirement::link(PackageRef::parse(root).unwrap()))
        .collect();
    Resolver::new(Arc::new(registry))
        .resolve(&ResolutionRequest::new(requirements, settings))
        .await
        .unwrap()
}

fn state<'a>(report: &'a BuildReport, name: &str) -> &'a NodeState {
    &report.node(name).unwrap_or_else(|| panic!("{name} missing from report")).state
}

fn upstream_failure(root_cause: &str) -> NodeState {
    NodeState::Skipped(SkipReason::UpstreamFailure {
        root_cause: root_cause.to_string(),
    })
}

/// Records what it was asked to build without running any phases
#[derive(Default)]
struct FakeExecutor {
    cache: Option<PackageCache>,
    builds: Mutex<BTreeMap<String, usize>>,
    tools_seen: Mutex<BTreeMap<String, Vec<String>>>,
    failing: BTreeSet<String>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeExecutor {
    fn new(cache: &PackageCache) -> Self {
        Self {
            cache: Some(cache.clone()),
            ..Self::default()
        }
    }

    fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn builds(&self, name: &str) -> usize {
        self.builds.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeExecutor for FakeExecutor {
    async fn execute(&self, job: NodeJob, gate: &ToolGate) -> Result<BuiltNode, Error> {
        let name = job.node.id.name.clone();
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let tools = gate.wait().await;
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        let tools = tools?;
        self.tools_seen
            .lock()
            .unwrap()
            .insert(name.clone(), tools.iter().map(|t| t.package.name.clone()).collect());
        *self.builds.lock().unwrap().entry(name.clone()).or_default() += 1;

        if self.failing.contains(&name) {
            return Err(BuildError::CommandFailed {
                package: job.node.id.package_ref().to_string(),
                phase: "build".to_string(),
                command: "cmake --build build".to_string(),
                exit_code: Some(2),
                stderr: "error: undefined reference".to_string(),
            }
            .into());
        }

        let cache = self.cache.as_ref().unwrap();
        let dirs = cache
            .create_build_dirs(&job.node.id.package_ref(), &job.fingerprint)
            .await?;
        tokio::fs::create_dir_all(dirs.package.join("include")).await?;
        tokio::fs::write(dirs.package.join("include").join(format!("{name}.h")), "#pragma once").await?;
        Ok(BuiltNode {
            dirs,
            package_info: PackageInfo {
                includedirs: vec!["include".into()],
                ..PackageInfo::default()
            },
            test: TestOutcome::NotRun,
        })
    }
}

fn scheduler(cache: &PackageCache, executor: Arc<dyn NodeExecutor>, jobs: usize) -> BuildScheduler {
    BuildScheduler::new(
        cache.clone(),
        executor,
        SchedulerOptions {
            jobs,
            strict_tests: false,
        },
    )
}

fn cache_in(temp: &TempDir) -> PackageCache {
    PackageCache::new(temp.path().join("cache"))
}

const DIAMOND: [&str; 4] = [
    "metadata: { name: app, version: '1.0' }\nrequires: [a/1.0, c/1.0]\n",
    "metadata: { name: a, version: '1.0' }\nrequires: [b/2.0]\n",
    "metadata: { name: c, version: '1.0' }\nrequires: [b/2.0]\n",
    "metadata: { name: b, version: '2.0' }\n",
];

#[tokio::test]
async fn test_shared_dependency_built_once_then_cached() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(temp.path(), &DIAMOND, &["app/1.0"]).await;
    let executor = Arc::new(FakeExecutor::new(&cache));

    let report = scheduler(&cache, executor.clone(), 4)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.nodes.len(), 4);
    assert_eq!(executor.builds("b"), 1);
    assert_eq!(report.nodes.last().unwrap().package.name, "app");
    assert_eq!(report.nodes.first().unwrap().package.name, "b");

    let again = scheduler(&cache, executor.clone(), 4)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.summary().cached, 4);
    assert_eq!(executor.builds("b"), 1);
    assert_eq!(executor.builds("app"), 1);
}

#[tokio::test]
async fn test_concurrent_runs_share_one_build_per_fingerprint() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(temp.path(), &DIAMOND, &["app/1.0"]).await;
    let executor = Arc::new(FakeExecutor::new(&cache).with_delay(Duration::from_millis(50)));

    let first = scheduler(&cache, executor.clone(), 4);
    let second = scheduler(&cache, executor.clone(), 4);
    let (left, right) = tokio::join!(
        first.run(&resolution, CancellationToken::new()),
        second.run(&resolution, CancellationToken::new()),
    );

    let (left, right) = (left.unwrap(), right.unwrap());
    assert!(left.is_success() && right.is_success());
    for name in ["app", "a", "b", "c"] {
        assert_eq!(executor.builds(name), 1, "{name} built more than once");
    }
    assert_eq!(left.summary().built + right.summary().built, 4);
}

#[tokio::test]
async fn test_failure_skips_descendants_but_not_siblings() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(
        temp.path(),
        &[
            "metadata: { name: app, version: '1.0' }\nrequires: [lib/1.0]\n",
            "metadata: { name: lib, version: '1.0' }\nrequires: [broken/1.0]\n",
            "metadata: { name: broken, version: '1.0' }\n",
            "metadata: { name: sibling, version: '1.0' }\n",
        ],
        &["app/1.0", "sibling/1.0"],
    )
    .await;
    let executor = Arc::new(FakeExecutor::new(&cache).failing("broken"));

    let report = scheduler(&cache, executor.clone(), 2)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        state(&report, "broken"),
        NodeState::Failed { code, .. } if code == "build.command_failed"
    ));
    assert_eq!(state(&report, "lib"), &upstream_failure("broken/1.0"));
    assert_eq!(state(&report, "app"), &upstream_failure("broken/1.0"));
    assert_eq!(state(&report, "sibling"), &NodeState::Built);
    assert_eq!(executor.builds("lib"), 0);

    let summary = report.summary();
    assert_eq!((summary.built, summary.failed, summary.skipped), (1, 1, 2));
    assert!(!cache.contains(resolution.fingerprint(&report_id(&resolution, "broken")).unwrap()).await);
}

fn report_id(resolution: &ResolutionResult, name: &str) -> kiln_resolver::NodeId {
    resolution
        .graph
        .nodes
        .keys()
        .find(|id| id.name == name)
        .unwrap()
        .clone()
}

const TOOLED: [&str; 2] = [
    "metadata: { name: app, version: '1.0' }\ntool_requires: [gen/1.0]\n",
    "metadata: { name: gen, version: '1.0', kind: tool }\n",
];

#[tokio::test]
async fn test_tool_gate_with_single_worker() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(temp.path(), &TOOLED, &["app/1.0"]).await;
    let executor = Arc::new(FakeExecutor::new(&cache));

    // One slot: app must hand it back while waiting for gen
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        scheduler(&cache, executor.clone(), 1).run(&resolution, CancellationToken::new()),
    )
    .await
    .expect("scheduler deadlocked")
    .unwrap();

    assert!(report.is_success());
    let seen = executor.tools_seen.lock().unwrap();
    assert_eq!(seen.get("app").unwrap(), &vec!["gen".to_string()]);
    assert!(executor.max_running.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_failed_tool_skips_consumer() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(temp.path(), &TOOLED, &["app/1.0"]).await;
    let executor = Arc::new(FakeExecutor::new(&cache).failing("gen"));

    let report = scheduler(&cache, executor.clone(), 2)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(state(&report, "gen"), NodeState::Failed { .. }));
    assert_eq!(state(&report, "app"), &upstream_failure("gen/1.0"));
    assert_eq!(executor.builds("app"), 0);
}

#[tokio::test]
async fn test_cancelled_run_reports_every_node() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(temp.path(), &DIAMOND, &["app/1.0"]).await;
    let executor = Arc::new(FakeExecutor::new(&cache));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = scheduler(&cache, executor.clone(), 2)
        .run(&resolution, cancel)
        .await
        .unwrap();

    assert_eq!(report.nodes.len(), 4);
    assert!(report
        .nodes
        .iter()
        .all(|node| node.state == NodeState::Skipped(SkipReason::Cancelled)));
    assert_eq!(executor.builds("b"), 0);
}

fn lifecycle(cache: &PackageCache) -> LifecycleExecutor {
    LifecycleExecutor::new(
        cache.clone(),
        ExecutorOptions {
            fetch_retries: 2,
            retry_delay: Duration::from_millis(1),
            command_timeout: Some(Duration::from_secs(30)),
            jobs: 2,
            keep_failed_builds: false,
        },
    )
}

async fn build_dir_count(cache: &PackageCache) -> usize {
    let mut count = 0;
    if let Ok(mut entries) = tokio::fs::read_dir(cache.root().join("builds")).await {
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
    }
    count
}

#[tokio::test]
async fn test_validation_failure_leaves_no_build_folder() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(
        temp.path(),
        &["metadata: { name: modern, version: '1.0' }\nvalidate: { min_cppstd: 99 }\n"],
        &["modern/1.0"],
    )
    .await;

    let report = scheduler(&cache, Arc::new(lifecycle(&cache)), 1)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        state(&report, "modern"),
        NodeState::Failed { code, .. } if code == "build.validation"
    ));
    assert_eq!(build_dir_count(&cache).await, 0);
}

#[tokio::test]
async fn test_unmatched_platform_branch_fails() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let resolution = resolve(
        temp.path(),
        &[r"
metadata: { name: dxc, version: '1.8' }
build:
  platforms:
    android:
      - command: 'true'
"],
        &["dxc/1.8"],
    )
    .await;

    let report = scheduler(&cache, Arc::new(lifecycle(&cache)), 1)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        state(&report, "dxc"),
        NodeState::Failed { code, .. } if code == "build.unsupported_platform"
    ));
}

/// Fails the first attempts, then writes a source file
///
/// Every failed attempt leaves a partial download behind; a later attempt
/// refuses to run on a source folder that still holds one.
struct FlakyFetcher {
    failures: usize,
    transient: bool,
    attempts: AtomicUsize,
}

impl FlakyFetcher {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            transient: true,
            attempts: AtomicUsize::new(0),
        }
    }

    fn permanent(failures: usize) -> Self {
        Self {
            transient: false,
            ..Self::new(failures)
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FlakyFetcher {
    async fn fetch(&self, ctx: &BuildContext, method: &SourceMethod) -> Result<(), Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let SourceMethod::Fetch { fetch } = method else {
            return Err(Error::internal("expected a fetch source"));
        };
        let partial = ctx.dirs.source.join("partial.download");
        if tokio::fs::try_exists(&partial).await? {
            return Err(Error::internal("source folder was not emptied before retrying"));
        }
        if attempt < self.failures {
            tokio::fs::write(&partial, "half an archive").await?;
            if !self.transient {
                return Err(BuildError::Failed {
                    package: ctx.package.to_string(),
                    phase: "source".to_string(),
                    message: "archive format not recognised".to_string(),
                }
                .into());
            }
            return Err(BuildError::SourceFetch {
                package: ctx.package.to_string(),
                url: fetch.url.clone(),
                message: "connection reset by peer".to_string(),
            }
            .into());
        }
        tokio::fs::write(ctx.dirs.source.join("hello.h"), "#define HELLO 1\n").await?;
        Ok(())
    }
}

const FETCHED_HEADERS: &str = r"
metadata: { name: fetched, version: '1.0', kind: header-only }
source:
  fetch: { url: 'https://example.com/fetched-1.0.tar.gz' }
package:
  - copy: { pattern: '*.h', from: '${source_folder}', to: include }
package_info:
  includedirs: [include]
";

fn drain(receiver: &mut EventReceiver) -> Vec<EventMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}

fn retry_attempts(messages: &[EventMessage]) -> Vec<(usize, usize)> {
    messages
        .iter()
        .filter_map(|message| match &message.event {
            AppEvent::Build(BuildEvent::SourceRetrying {
                attempt,
                max_attempts,
                ..
            }) => Some((*attempt, *max_attempts)),
            _ => None,
        })
        .collect()
}

async fn run_fetch(
    temp: &TempDir,
    recipe: &str,
    fetcher: Arc<FlakyFetcher>,
) -> (BuildReport, Vec<EventMessage>) {
    let cache = cache_in(temp);
    let resolution = resolve(temp.path(), &[recipe], &["fetched/1.0"]).await;
    let (sender, mut receiver) = kiln_events::channel();
    let executor = lifecycle(&cache)
        .with_fetcher(fetcher)
        .with_event_sender(sender);
    let report = scheduler(&cache, Arc::new(executor), 1)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();
    (report, drain(&mut receiver))
}

#[tokio::test]
async fn test_transient_fetch_failures_are_retried_on_a_clean_folder() {
    let temp = tempdir().unwrap();
    let fetcher = Arc::new(FlakyFetcher::new(2));
    let (report, events) = run_fetch(&temp, FETCHED_HEADERS, fetcher.clone()).await;

    let node = report.node("fetched").unwrap();
    assert_eq!(node.state, NodeState::Built, "{:?}", node.state);
    assert_eq!(fetcher.attempts(), 3);
    assert_eq!(retry_attempts(&events), vec![(1, 3), (2, 3)]);
}

#[tokio::test]
async fn test_fetch_retries_are_bounded() {
    let temp = tempdir().unwrap();
    let fetcher = Arc::new(FlakyFetcher::new(10));
    let (report, events) = run_fetch(&temp, FETCHED_HEADERS, fetcher.clone()).await;

    assert!(matches!(
        state(&report, "fetched"),
        NodeState::Failed { code, .. } if code == "build.source_fetch"
    ));
    assert_eq!(fetcher.attempts(), 3);
    assert_eq!(retry_attempts(&events).len(), 2);
}

#[tokio::test]
async fn test_permanent_fetch_failure_is_not_retried() {
    let temp = tempdir().unwrap();
    let fetcher = Arc::new(FlakyFetcher::permanent(10));
    let (report, events) = run_fetch(&temp, FETCHED_HEADERS, fetcher.clone()).await;

    assert!(matches!(
        state(&report, "fetched"),
        NodeState::Failed { code, .. } if code == "build.failed"
    ));
    assert_eq!(fetcher.attempts(), 1);
    assert!(retry_attempts(&events).is_empty());
}

#[tokio::test]
async fn test_patch_failure_is_not_retried() {
    let temp = tempdir().unwrap();
    let recipe = FETCHED_HEADERS.replace(
        "tar.gz' }\n",
        "tar.gz' }\n  patches: [0001-missing.patch]\n",
    );
    let fetcher = Arc::new(FlakyFetcher::new(0));
    let (report, events) = run_fetch(&temp, &recipe, fetcher.clone()).await;

    match state(&report, "fetched") {
        NodeState::Failed { code, message } => {
            assert_eq!(code, "build.patch_apply");
            assert!(message.contains("0001-missing.patch"), "{message}");
        }
        other => panic!("unexpected state: {other}"),
    }
    assert_eq!(fetcher.attempts(), 1);
    assert!(retry_attempts(&events).is_empty());
}

#[tokio::test]
async fn test_cross_build_skips_test_phase() {
    let temp = tempdir().unwrap();
    let cache = cache_in(&temp);
    let target = Settings::host().with_arch(Arch::Other("riscv64".to_string()));
    assert!(!target.can_run());
    let resolution = resolve_for(
        temp.path(),
        &[r"
metadata: { name: cross, version: '1.0', kind: header-only }
test:
  - command: 'kiln-no-such-test-binary --run'
"],
        &["cross/1.0"],
        target,
    )
    .await;
    let (sender, mut receiver) = kiln_events::channel();
    let executor = lifecycle(&cache).with_event_sender(sender);

    let report = scheduler(&cache, Arc::new(executor), 1)
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

    let node = report.node("cross").unwrap();
    assert_eq!(node.state, NodeState::Built, "{:?}", node.state);
    assert_eq!(node.test, TestOutcome::NotRun);
    assert_eq!(report.summary().tests_failed, 0);
    let skipped_test = drain(&mut receiver).into_iter().any(|message| {
        matches!(
            message.event,
            AppEvent::Build(BuildEvent::PhaseSkipped {
                phase: Phase::Test,
                ..
            })
        )
    });
    assert!(skipped_test);
}

#[cfg(unix)]
mod unix {
    use super::*;

    const HEADERS: &str = r#"
metadata: { name: hello, version: '1.0', kind: header-only }
source:
  fetch: { url: 'https://example.com/hello-1.0.tar.gz' }
env:
  GREETING: 'hello from ${name}'
build:
  - shell: 'mkdir -p out && cp "${source_folder}/hello.h" out/ && printf "%s" "$GREETING" > out/greeting.txt'
package:
  - copy: { pattern: '*.h', from: out, to: include }
  - copy: { pattern: 'greeting.txt', from: out, to: share }
package_info:
  includedirs: [include]
test:
  - shell: 'test -f "${package_folder}/include/hello.h"'
"#;

    #[tokio::test]
    async fn test_lifecycle_builds_and_publishes() {
        let temp = tempdir().unwrap();
        let cache = cache_in(&temp);
        let resolution = resolve(temp.path(), &[HEADERS], &["hello/1.0"]).await;
        let fetcher = Arc::new(FlakyFetcher::new(1));
        let executor = lifecycle(&cache).with_fetcher(fetcher.clone());

        let report = scheduler(&cache, Arc::new(executor), 1)
            .run(&resolution, CancellationToken::new())
            .await
            .unwrap();

        let node = report.node("hello").unwrap();
        assert_eq!(node.state, NodeState::Built, "{:?}", node.state);
        assert_eq!(node.test, TestOutcome::Passed);
        assert_eq!(fetcher.attempts(), 2);

        let entry = cache
            .lookup(resolution.fingerprint(&report_id(&resolution, "hello")).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.package_folder().join("include/hello.h").exists());
        let greeting = tokio::fs::read_to_string(entry.package_folder().join("share/greeting.txt"))
            .await
            .unwrap();
        assert_eq!(greeting, "hello from hello");
        assert_eq!(build_dir_count(&cache).await, 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_cached() {
        let temp = tempdir().unwrap();
        let cache = cache_in(&temp);
        let resolution = resolve(
            temp.path(),
            &["metadata: { name: broken, version: '1.0' }\nbuild:\n  - shell: 'echo boom >&2; exit 3'\n"],
            &["broken/1.0"],
        )
        .await;

        let report = scheduler(&cache, Arc::new(lifecycle(&cache)), 1)
            .run(&resolution, CancellationToken::new())
            .await
            .unwrap();

        match state(&report, "broken") {
            NodeState::Failed { code, message } => {
                assert_eq!(code, "build.command_failed");
                assert!(message.contains("boom"), "{message}");
            }
            other => panic!("unexpected state: {other}"),
        }
        assert!(cache.list().await.unwrap().is_empty());
        assert_eq!(build_dir_count(&cache).await, 0);
    }

    const FLAKY_TEST: &str = r"
metadata: { name: checked, version: '1.0', kind: header-only }
test:
  - shell: 'exit 1'
";

    #[tokio::test]
    async fn test_failing_test_is_reported_not_fatal() {
        let temp = tempdir().unwrap();
        let cache = cache_in(&temp);
        let resolution = resolve(temp.path(), &[FLAKY_TEST], &["checked/1.0"]).await;

        let report = scheduler(&cache, Arc::new(lifecycle(&cache)), 1)
            .run(&resolution, CancellationToken::new())
            .await
            .unwrap();

        let node = report.node("checked").unwrap();
        assert_eq!(node.state, NodeState::Built);
        assert!(matches!(node.test, TestOutcome::Failed { .. }));
        assert_eq!(report.summary().tests_failed, 1);
    }

    #[tokio::test]
    async fn test_strict_tests_fail_the_node() {
        let temp = tempdir().unwrap();
        let cache = cache_in(&temp);
        let resolution = resolve(temp.path(), &[FLAKY_TEST], &["checked/1.0"]).await;

        let report = BuildScheduler::new(
            cache.clone(),
            Arc::new(lifecycle(&cache)),
            SchedulerOptions {
                jobs: 1,
                strict_tests: true,
            },
        )
        .run(&resolution, CancellationToken::new())
        .await
        .unwrap();

        assert!(matches!(
            state(&report, "checked"),
            NodeState::Failed { code, .. } if code == "build.test_failed"
        ));
        assert!(cache.list().await.unwrap().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_dependency_metadata_reaches_consumer() {
        let temp = tempdir().unwrap();
        let cache = cache_in(&temp);
        let resolution = resolve(
            temp.path(),
            &[
                r"
metadata: { name: zlib, version: '1.3.1' }
package:
  - mkdir: include
  - mkdir: lib
package_info:
  includedirs: [include]
  libdirs: [lib]
  libs: [z]
",
                r#"
metadata: { name: png, version: '1.6.43' }
requires: [zlib/1.3.1]
generate:
  cmake_deps: true
build:
  - shell: 'grep -q "/package/include" "${generators_folder}/zlib-config.cmake" && case ":$LD_LIBRARY_PATH:" in *"/package/lib:"*) ;; *) exit 7;; esac'
"#,
            ],
            &["png/1.6.43"],
        )
        .await;

        let report = scheduler(&cache, Arc::new(lifecycle(&cache)), 2)
            .run(&resolution, CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success(), "{:?}", report.nodes);
    }
}
