//! Import specifier rewriting for served modules.
//!
//! Runs on transformed ESM and rewrites specifier literals so the browser can
//! fetch them from the dev server:
//!
//! - bare specifiers (`react`) → pre-bundled URL, or `/@modules/react?v=<token>`
//! - relative or root paths to non-script files (`./logo.svg`, `./app.css`)
//!   → same path with an `import` query, served as a JS module
//! - other relative or root paths stay as they are
//!
//! Literal `import("…")` calls are rewritten too; computed dynamic imports and
//! `require()` calls are left alone. Edits are applied back to front on the original text, so no
//! re-parse is needed. Unparsable input is returned unchanged.

use super::edit::{apply_edits, Edit};
use super::plugin::PluginContainer;
use super::prebundle::PreBundleMap;
use super::scan::{scan_module, SpecifierKind};
use crate::compiler::ParseSyntax;
use crate::resolver::is_bare_specifier;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use vela_util::fs::to_url_path;

/// Extensions the transform pipeline executes as scripts.
pub const SCRIPT_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs", "mts", "cts", "vue"];

/// Rewritten code plus the bare specifiers that had no pre-bundled URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rewritten {
    pub code: String,
    pub unbundled: Vec<String>,
}

pub struct ImportRewriter {
    root: PathBuf,
    plugins: Arc<PluginContainer>,
}

impl ImportRewriter {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, plugins: Arc<PluginContainer>) -> Self {
        Self {
            root: root.into(),
            plugins,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rewrite every literal specifier in `code` against `map`.
    #[must_use]
    pub fn rewrite(&self, code: &str, map: &PreBundleMap) -> Rewritten {
        let scan = match scan_module(code, ParseSyntax::Js) {
            Ok(scan) => scan,
            Err(err) => {
                debug!(error = %err, "rewrite skipped, module does not parse");
                return Rewritten {
                    code: code.to_string(),
                    unbundled: Vec::new(),
                };
            }
        };

        let mut edits = Vec::new();
        let mut unbundled = Vec::new();
        for spec in scan.specifiers {
            if spec.kind == SpecifierKind::Require {
                continue;
            }
            let Some(rewritten) = self.rewrite_specifier(&spec.value, map, &mut unbundled) else {
                continue;
            };
            let quoted = serde_json::to_string(&rewritten).unwrap_or_else(|_| format!("\"{rewritten}\""));
            edits.push(Edit::new(spec.range, quoted));
        }

        unbundled.sort();
        unbundled.dedup();
        Rewritten {
            code: apply_edits(code, edits),
            unbundled,
        }
    }

    /// New specifier text, or `None` to leave it unchanged.
    fn rewrite_specifier(&self, specifier: &str, map: &PreBundleMap, unbundled: &mut Vec<String>) -> Option<String> {
        let aliased = self.plugins.resolve_id(specifier).map(|target| self.alias_target(target));
        let current = aliased.as_deref().unwrap_or(specifier);

        if is_bare_specifier(current) {
            if map.url(current).is_none() && !map.skipped.contains(current) {
                unbundled.push(current.to_string());
            }
            return Some(map.served_url(current));
        }

        if is_path_specifier(current) && !current.starts_with("/@") && is_non_script_asset(current) {
            return Some(with_import_query(current));
        }

        aliased
    }

    /// Alias targets that are absolute file paths inside the root become root URLs.
    fn alias_target(&self, target: String) -> String {
        let path = Path::new(&target);
        if path.is_absolute() && path.starts_with(&self.root) {
            if let Some(url) = to_url_path(&self.root, path) {
                return url;
            }
        }
        target
    }
}

fn is_path_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

/// Has an extension, and it is not one the pipeline runs as a script.
fn is_non_script_asset(specifier: &str) -> bool {
    let path = specifier.split(['?', '#']).next().unwrap_or(specifier);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            !SCRIPT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

fn with_import_query(specifier: &str) -> String {
    match specifier.split_once('?') {
        Some((_, query)) if query.split('&').any(|p| p == "import") => specifier.to_string(),
        Some(_) => format!("{specifier}&import"),
        None => format!("{specifier}?import"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::plugin::AliasPlugin;
    use crate::dev::prebundle::PreBundledEntry;
    use crate::resolver::ResolutionStrategy;

    fn map() -> PreBundleMap {
        let mut map = PreBundleMap::empty("0123456789abcdef");
        map.entries.insert(
            "react".to_string(),
            PreBundledEntry {
                url: "/@deps/react.js?v=01234567".to_string(),
                file: "react.js".to_string(),
                source: PathBuf::from("/p/node_modules/react/index.js"),
                strategy: ResolutionStrategy::MainField,
            },
        );
        map.skipped.insert("optional-dep".to_string());
        map
    }

    fn rewriter() -> ImportRewriter {
        ImportRewriter::new("/p", Arc::new(PluginContainer::new()))
    }

    #[test]
    fn test_bare_specifiers() {
        let out = rewriter().rewrite(
            "import React from 'react';\nimport { x } from \"lodash-es\";\nimport o from 'optional-dep';",
            &map(),
        );
        assert_eq!(
            out.code,
            "import React from \"/@deps/react.js?v=01234567\";\nimport { x } from \"/@modules/lodash-es?v=01234567\";\nimport o from \"/@modules/optional-dep?v=01234567\";"
        );
        assert_eq!(out.unbundled, vec!["lodash-es"]);
    }

    #[test]
    fn test_assets_are_tagged() {
        let out = rewriter().rewrite(
            "import './app.css';\nimport logo from '../logo.SVG';\nimport data from '/data.json?raw';\nimport App from './App.tsx';\nimport util from './util';",
            &map(),
        );
        assert!(out.code.contains("import \"./app.css?import\";"));
        assert!(out.code.contains("from \"../logo.SVG?import\""));
        assert!(out.code.contains("from \"/data.json?raw&import\""));
        assert!(out.code.contains("from './App.tsx'"));
        assert!(out.code.contains("from './util'"));
    }

    #[test]
    fn test_computed_dynamic_import_untouched() {
        let code = "import React from 'react';\nconst page = import(`./pages/${name}.js`);\nconst lazy = import('react');\nexport { a } from 'react';";
        let out = rewriter().rewrite(code, &map());

        assert!(out.code.contains("import(`./pages/${name}.js`)"));
        assert!(out.code.contains("import(\"/@deps/react.js?v=01234567\")"));
        assert!(out.code.contains("export { a } from \"/@deps/react.js?v=01234567\";"));
        assert!(!out.code.contains("'react'"));
    }

    #[test]
    fn test_require_calls_untouched() {
        let code = "import React from 'react';\nconst legacy = require('left-pad');\nconst r = require('react');";
        let out = rewriter().rewrite(code, &map());

        assert!(out.code.contains("require('left-pad')"));
        assert!(out.code.contains("require('react')"));
        assert!(out.code.contains("import React from \"/@deps/react.js?v=01234567\";"));
        assert!(out.unbundled.is_empty());
    }

    #[test]
    fn test_unparsable_input_passes_through() {
        let code = "import { from 'react';";
        let out = rewriter().rewrite(code, &map());
        assert_eq!(out.code, code);
        assert!(out.unbundled.is_empty());
    }

    #[test]
    fn test_served_paths_untouched() {
        let code = "import '/@vela/client';\nimport x from '/@deps/react.js?v=1';";
        assert_eq!(rewriter().rewrite(code, &map()).code, code);
    }

    #[test]
    fn test_aliases_applied_before_rewrite() {
        let mut plugins = PluginContainer::new();
        plugins.add(Box::new(AliasPlugin::new().alias("@", "./src").alias("vue", "/p/vendor/vue.js")));
        let rewriter = ImportRewriter::new("/p", Arc::new(plugins));

        let out = rewriter.rewrite(
            "import Button from '@/components/Button.vue';\nimport icon from '@/icon.png';\nimport { ref } from 'vue';",
            &map(),
        );
        assert!(out.code.contains("from \"/src/components/Button.vue\""));
        assert!(out.code.contains("from \"/src/icon.png?import\""));
        assert!(out.code.contains("from \"/vendor/vue.js\""));
    }

    #[test]
    fn test_non_script_asset_detection() {
        assert!(is_non_script_asset("./a.css"));
        assert!(is_non_script_asset("./fonts/a.woff2?v=3"));
        assert!(!is_non_script_asset("./a.ts"));
        assert!(!is_non_script_asset("./dir.d/file"));
        assert!(!is_non_script_asset("./.env"));
    }
}
