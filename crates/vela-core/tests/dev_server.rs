//! End-to-end tests for the request router with a fake dependency bundler.
//!
//! The fake bundler mimics a splitting bundler: CommonJS entries become a thin
//! `export default require_pkg()` wrapper around a shared chunk, ESM entries
//! are copied as they are.

use futures::future::BoxFuture;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vela_core::dev::prebundle::{BundleError, BundleJob};
use vela_core::dev::{DependencyBundler, HmrBroadcaster, RequestRouter};
use vela_core::resolver::ResolutionStrategy;
use vela_core::DevConfig;

struct SplittingBundler {
    runs: AtomicUsize,
}

impl SplittingBundler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            runs: AtomicUsize::new(0),
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl DependencyBundler for SplittingBundler {
    fn name(&self) -> &'static str {
        "splitting-fake"
    }

    fn bundle<'a>(&'a self, job: &'a BundleJob) -> BoxFuture<'a, Result<(), BundleError>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            for (stem, entry) in &job.entries {
                let source = fs::read_to_string(entry).map_err(BundleError::Spawn)?;
                let output = if source.contains("exports") {
                    fs::write(
                        job.out_dir.join("_chunk-SHARED.js"),
                        "export function require_pkg() { return {}; }\n",
                    )
                    .map_err(BundleError::Spawn)?;
                    "import { require_pkg } from \"./_chunk-SHARED.js\";\nexport default require_pkg();\n".to_string()
                } else {
                    source
                };
                fs::write(job.out_dir.join(format!("{stem}.js")), output).map_err(BundleError::Spawn)?;
            }
            Ok(())
        })
    }
}

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        &root.join("package.json"),
        r#"{"dependencies":{"cjs-pkg":"1","dual":"1","left-pad":"1"}}"#,
    );
    write(
        &root.join("node_modules/cjs-pkg/package.json"),
        r#"{"name":"cjs-pkg","main":"lib/index.js"}"#,
    );
    write(
        &root.join("node_modules/cjs-pkg/lib/index.js"),
        "module.exports = { foo: function () {}, bar: 2 };",
    );
    write(
        &root.join("node_modules/dual/package.json"),
        r#"{"name":"dual","module":"esm.js","exports":{".":{"import":"./exports.mjs","default":"./cjs.js"}}}"#,
    );
    write(&root.join("node_modules/dual/exports.mjs"), "export const x = 1;\n");
    write(&root.join("node_modules/dual/esm.js"), "export const x = 2;\n");
    write(&root.join("node_modules/dual/cjs.js"), "exports.x = 3;\n");
    write(
        &root.join("node_modules/left-pad/package.json"),
        r#"{"name":"left-pad","version":"1.3.0","main":"index.js"}"#,
    );
    write(&root.join("node_modules/left-pad/index.js"), "module.exports = leftPad;\nfunction leftPad() {}\n");
    write(
        &root.join("src/main.ts"),
        "import { foo } from 'cjs-pkg';\nimport { x } from 'dual';\nimport './helper';\nfoo(x);\n",
    );
    write(&root.join("src/helper.ts"), "import pad from 'left-pad';\nexport const p = pad;\n");
    dir
}

fn router(dir: &TempDir, bundler: Arc<SplittingBundler>) -> RequestRouter {
    let mut config = DevConfig::new(dir.path().to_path_buf());
    config.entry = vec!["src/main.ts".to_string()];
    RequestRouter::new(config, bundler, Arc::new(HmrBroadcaster::new())).unwrap()
}

#[tokio::test]
async fn test_warm_up_resolves_and_rewrites() {
    let dir = project();
    let bundler = SplittingBundler::new();
    let router = router(&dir, bundler.clone());

    let map = router.warm_up().await.unwrap();
    assert_eq!(bundler.runs(), 1);
    assert_eq!(map.entries["dual"].strategy, ResolutionStrategy::ExportMap);
    assert!(map.entries["dual"].source.ends_with("exports.mjs"));
    assert_eq!(map.entries["left-pad"].strategy, ResolutionStrategy::MainField);
    assert_eq!(map.entries["cjs-pkg"].strategy, ResolutionStrategy::MainField);

    let main = router.handle("/src/main.ts").await.text();
    assert!(main.contains(&format!("from \"/@deps/cjs-pkg.js?v={}\"", map.token)));
    assert!(main.contains(&format!("from \"/@deps/dual.js?v={}\"", map.token)));
    assert!(main.contains("./helper"));
    assert!(!main.contains("'cjs-pkg'"));
}

#[tokio::test]
async fn test_commonjs_package_gets_named_exports() {
    let dir = project();
    let router = router(&dir, SplittingBundler::new());
    router.warm_up().await.unwrap();

    let entry = router.handle("/@deps/cjs-pkg.js").await;
    assert_eq!(entry.status, 200);
    let code = entry.text();
    assert!(code.contains("const __vela_default = require_pkg();"));
    assert!(code.contains("export const foo = __vela_default.foo;"));
    assert!(code.contains("export const bar = __vela_default.bar;"));

    let esm = router.handle("/@deps/dual.js").await.text();
    assert_eq!(esm, "export const x = 1;\n");

    assert_eq!(router.handle("/@deps/_chunk-SHARED.js").await.status, 200);
}

#[tokio::test]
async fn test_concurrent_warm_ups_bundle_once() {
    let dir = project();
    let bundler = SplittingBundler::new();
    let router = Arc::new(router(&dir, bundler.clone()));

    let (a, b) = tokio::join!(router.warm_up(), router.warm_up());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(bundler.runs(), 1);
    assert_eq!(a.token, b.token);
    assert_eq!(a.entries, b.entries);
}

#[tokio::test]
async fn test_unknown_import_triggers_background_bundle_and_reload() {
    let dir = project();
    let bundler = SplittingBundler::new();
    let router = router(&dir, bundler.clone());
    router.warm_up().await.unwrap();
    let mut client = router.broadcaster().connect();
    client.recv().await.unwrap();

    write(
        &dir.path().join("node_modules/late/package.json"),
        r#"{"name":"late","module":"index.mjs"}"#,
    );
    write(&dir.path().join("node_modules/late/index.mjs"), "export default 1;\n");
    write(&dir.path().join("src/lazy.ts"), "import late from 'late';\nexport default late;\n");

    let first = router.handle("/src/lazy.ts").await.text();
    assert!(first.contains("from \"/@modules/late?v="));

    let reload = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(reload.contains(r#""kind":"full-reload""#));
    assert_eq!(bundler.runs(), 2);

    let map = router.prebundler().snapshot();
    assert_eq!(map.entries["late"].strategy, ResolutionStrategy::ModuleField);
    assert!(map.entries.contains_key("cjs-pkg"));

    let second = router.handle("/src/lazy.ts").await.text();
    assert!(second.contains(&format!("from \"/@deps/late.js?v={}\"", map.token)));
}

#[tokio::test]
async fn test_syntax_error_in_app_is_served_as_script() {
    let dir = project();
    write(
        &dir.path().join("src/App.tsx"),
        "export default function App() {\n  return <div>;\n}\n",
    );
    let router = router(&dir, SplittingBundler::new());

    let res = router.handle("/src/App.tsx").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.content_type, "application/javascript");
    assert!(res.text().contains("console.error(\"[vela] \" + error.message);"));
}

#[tokio::test]
async fn test_manifest_change_rebundles() {
    let dir = project();
    let bundler = SplittingBundler::new();
    let router = router(&dir, bundler.clone());
    let before = router.warm_up().await.unwrap();
    let mut client = router.broadcaster().connect();
    client.recv().await.unwrap();

    write(
        &dir.path().join("package.json"),
        r#"{"dependencies":{"cjs-pkg":"2","dual":"1","left-pad":"1"}}"#,
    );
    router.on_file_change(&router.root().join("package.json")).await;

    assert_eq!(bundler.runs(), 2);
    let after = router.prebundler().snapshot();
    assert_ne!(after.manifest_hash, before.manifest_hash);
    assert_eq!(after.specifiers(), before.specifiers());
    assert!(client.recv().await.unwrap().contains(r#""kind":"full-reload""#));
    assert!(!before.out_dir.exists());
}
