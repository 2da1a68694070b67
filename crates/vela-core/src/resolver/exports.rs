//! package.json `exports` resolution.
//!
//! Condition objects are walked in key order, the first key that is an active
//! condition and yields a target wins. Nested condition objects and fallback
//! arrays are followed.

use serde_json::Value;
use std::path::Path;

/// Active export conditions, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conditions(&'static [&'static str]);

impl Conditions {
    /// ESM consumers running in a browser during development.
    pub const BROWSER_IMPORT: Self = Self(&["browser", "development", "import", "module", "default"]);

    #[must_use]
    pub fn is_active(&self, condition: &str) -> bool {
        self.0.contains(&condition)
    }
}

/// Resolve `subpath` (`None` for the package root, `Some("./x")` otherwise).
#[must_use]
pub fn resolve_exports(pkg_json: &Value, subpath: Option<&str>, conditions: Conditions) -> Option<String> {
    match subpath {
        None => resolve_exports_root(pkg_json, conditions),
        Some(sub) => resolve_exports_subpath(pkg_json, sub, conditions)
            .or_else(|| resolve_exports_pattern(pkg_json, sub, conditions)),
    }
}

/// Resolve the `.` entry.
///
/// Supports `"exports": "./x.js"`, `{ ".": ... }` and a bare condition object.
#[must_use]
pub fn resolve_exports_root(pkg_json: &Value, conditions: Conditions) -> Option<String> {
    let exports = pkg_json.get("exports")?;

    if exports.is_string() || exports.is_array() {
        return resolve_target(exports, conditions, 0);
    }

    let obj = exports.as_object()?;
    if let Some(dot) = obj.get(".") {
        return resolve_target(dot, conditions, 0);
    }
    if !has_subpath_keys(obj) {
        return resolve_target(exports, conditions, 0);
    }
    None
}

/// Resolve an exact subpath key such as `./jsx-runtime`.
#[must_use]
pub fn resolve_exports_subpath(pkg_json: &Value, subpath: &str, conditions: Conditions) -> Option<String> {
    if !subpath.starts_with("./") {
        return None;
    }
    let obj = pkg_json.get("exports")?.as_object()?;
    if !has_subpath_keys(obj) {
        return None;
    }
    resolve_target(obj.get(subpath)?, conditions, 0)
}

/// Resolve a subpath through a single-`*` pattern key; the longest key wins.
#[must_use]
pub fn resolve_exports_pattern(pkg_json: &Value, subpath: &str, conditions: Conditions) -> Option<String> {
    if !subpath.starts_with("./") {
        return None;
    }
    let obj = pkg_json.get("exports")?.as_object()?;

    let mut matches: Vec<(&str, &Value, String)> = obj
        .iter()
        .filter(|(key, _)| key.starts_with("./") && key.matches('*').count() == 1)
        .filter_map(|(key, value)| {
            match_pattern(key, subpath).map(|star| (key.as_str(), value, star))
        })
        .collect();

    matches.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let (_, target, star) = matches.first()?;
    let resolved = resolve_target(target, conditions, 0)?;
    substitute_star(&resolved, star)
}

/// Read and parse a package.json, returning `None` on any failure.
#[must_use]
pub fn read_package_json(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn has_subpath_keys(obj: &serde_json::Map<String, Value>) -> bool {
    obj.keys().any(|k| k.starts_with('.'))
}

fn match_pattern(pattern: &str, subpath: &str) -> Option<String> {
    let (prefix, suffix) = pattern.split_once('*')?;
    if !subpath.starts_with(prefix) || !subpath.ends_with(suffix) {
        return None;
    }
    let end = subpath.len().checked_sub(suffix.len())?;
    if prefix.len() >= end {
        return None;
    }
    Some(subpath[prefix.len()..end].to_string())
}

fn substitute_star(target: &str, star: &str) -> Option<String> {
    let result = target.replace('*', star);
    if result.split('/').any(|segment| segment == "..") {
        return None;
    }
    validate_export_path(&result)
}

const MAX_CONDITION_DEPTH: usize = 8;

fn resolve_target(target: &Value, conditions: Conditions, depth: usize) -> Option<String> {
    if depth > MAX_CONDITION_DEPTH {
        return None;
    }
    match target {
        Value::String(s) => validate_export_path(s),
        Value::Array(items) => items
            .iter()
            .find_map(|item| resolve_target(item, conditions, depth + 1)),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| conditions.is_active(key))
            .find_map(|(_, value)| resolve_target(value, conditions, depth + 1)),
        _ => None,
    }
}

fn validate_export_path(path: &str) -> Option<String> {
    path.starts_with("./").then(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exports_string_root() {
        let pkg = json!({ "exports": "./dist/index.js" });
        assert_eq!(
            resolve_exports_root(&pkg, Conditions::BROWSER_IMPORT).as_deref(),
            Some("./dist/index.js")
        );
    }

    #[test]
    fn test_exports_import_condition_over_require() {
        let pkg = json!({
            "exports": {
                ".": { "require": "./cjs/index.cjs", "import": "./esm/index.js" }
            }
        });
        assert_eq!(
            resolve_exports_root(&pkg, Conditions::BROWSER_IMPORT).as_deref(),
            Some("./esm/index.js")
        );
        assert_eq!(
            resolve_exports_root(&pkg, Conditions(&["node", "require", "default"])).as_deref(),
            Some("./cjs/index.cjs")
        );
    }

    #[test]
    fn test_exports_key_order_decides() {
        let pkg = json!({
            "exports": { "default": "./d.js", "import": "./esm.js" }
        });
        assert_eq!(
            resolve_exports_root(&pkg, Conditions::BROWSER_IMPORT).as_deref(),
            Some("./d.js")
        );
    }

    #[test]
    fn test_exports_nested_conditions() {
        let pkg = json!({
            "exports": {
                ".": {
                    "types": "./index.d.ts",
                    "browser": { "import": "./browser.mjs", "default": "./browser.js" },
                    "default": "./node.js"
                }
            }
        });
        assert_eq!(
            resolve_exports_root(&pkg, Conditions::BROWSER_IMPORT).as_deref(),
            Some("./browser.mjs")
        );
    }

    #[test]
    fn test_exports_fallback_array() {
        let pkg = json!({ "exports": { ".": ["not-relative", "./ok.js"] } });
        assert_eq!(
            resolve_exports_root(&pkg, Conditions::BROWSER_IMPORT).as_deref(),
            Some("./ok.js")
        );
    }

    #[test]
    fn test_exports_subpath() {
        let pkg = json!({
            "exports": {
                ".": "./index.js",
                "./jsx-runtime": { "import": "./jsx-runtime.mjs" }
            }
        });
        assert_eq!(
            resolve_exports(&pkg, Some("./jsx-runtime"), Conditions::BROWSER_IMPORT).as_deref(),
            Some("./jsx-runtime.mjs")
        );
        assert_eq!(
            resolve_exports(&pkg, Some("./missing"), Conditions::BROWSER_IMPORT),
            None
        );
    }

    #[test]
    fn test_exports_pattern_most_specific_wins() {
        let pkg = json!({
            "exports": {
                "./*": "./dist/*.js",
                "./icons/*": "./dist/icons/*.mjs"
            }
        });
        assert_eq!(
            resolve_exports(&pkg, Some("./icons/home"), Conditions::BROWSER_IMPORT).as_deref(),
            Some("./dist/icons/home.mjs")
        );
        assert_eq!(
            resolve_exports(&pkg, Some("./utils"), Conditions::BROWSER_IMPORT).as_deref(),
            Some("./dist/utils.js")
        );
    }

    #[test]
    fn test_exports_pattern_rejects_traversal() {
        let pkg = json!({ "exports": { "./*": "./dist/*" } });
        assert_eq!(
            resolve_exports(&pkg, Some("./../secret"), Conditions::BROWSER_IMPORT),
            None
        );
    }

    #[test]
    fn test_no_exports_field() {
        let pkg = json!({ "main": "index.js" });
        assert_eq!(resolve_exports_root(&pkg, Conditions::BROWSER_IMPORT), None);
    }
}
