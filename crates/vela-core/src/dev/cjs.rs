//! Static detection of a CommonJS module's named exports.
//!
//! Recognized forms:
//!
//! - `exports.name = …` and `module.exports.name = …`
//! - `module.exports = { name, other: …, method() {} }`
//! - `Object.defineProperty(exports, "name", …)`
//! - `module.exports = require("./other")`, `...require("./other")` in the
//!   exported object literal, and `__exportStar(require("./other"), exports)`,
//!   which are followed as re-exports
//!
//! Anything computed at runtime is invisible here.

use crate::compiler::{parse_program, CompilerError, ParseSyntax, ParsedModule};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use swc_ecma_ast::{
    AssignExpr, AssignTarget, CallExpr, Callee, Expr, Lit, MemberExpr, MemberProp, ObjectLit,
    Prop, PropName, PropOrSpread, SimpleAssignTarget,
};
use swc_ecma_visit::{Visit, VisitWith};
use thiserror::Error;
use tracing::debug;

/// How many re-export hops are followed from the entry file.
const MAX_REEXPORT_DEPTH: usize = 4;

const RESERVED: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: CompilerError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CjsExports {
    pub names: BTreeSet<String>,
    /// `require` specifiers whose exports are re-exported wholesale.
    pub reexports: Vec<String>,
}

/// Exports declared directly in `parsed`.
#[must_use]
pub fn analyze_parsed(parsed: &ParsedModule) -> CjsExports {
    let mut collector = ExportCollector::default();
    parsed.module.visit_with(&mut collector);
    collector.exports
}

/// Exports of the CommonJS file at `entry`, following relative re-exports.
///
/// Only a failure on `entry` itself is an error. A re-export target that
/// cannot be read or parsed contributes no names.
/// Re-exports of bare packages are not followed.
pub fn analyze_commonjs_exports(entry: &Path) -> Result<BTreeSet<String>, ScanError> {
    let mut names = BTreeSet::new();
    let mut seen = BTreeSet::new();
    let mut queue = vec![(entry.to_path_buf(), 0usize)];

    while let Some((path, depth)) = queue.pop() {
        if !seen.insert(path.clone()) {
            continue;
        }
        let exports = match analyze_file(&path) {
            Ok(exports) => exports,
            Err(err) if depth > 0 => {
                debug!(error = %err, "skipping re-export target");
                continue;
            }
            Err(err) => return Err(err),
        };
        names.extend(exports.names);

        if depth >= MAX_REEXPORT_DEPTH {
            continue;
        }
        let dir = path.parent().unwrap_or(Path::new("/"));
        for specifier in exports.reexports {
            if !(specifier.starts_with("./") || specifier.starts_with("../")) {
                continue;
            }
            if let Some(next) = probe_relative(dir, &specifier) {
                queue.push((next, depth + 1));
            }
        }
    }

    Ok(names)
}

fn analyze_file(path: &Path) -> Result<CjsExports, ScanError> {
    let source = std::fs::read_to_string(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_program(&source, ParseSyntax::Js).map_err(|source| ScanError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(analyze_parsed(&parsed))
}

/// Whether `name` can appear in `export const <name> = …`.
#[must_use]
pub fn is_exportable_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    valid && name != "__esModule" && !RESERVED.contains(&name)
}

fn probe_relative(dir: &Path, specifier: &str) -> Option<PathBuf> {
    let base = dir.join(specifier);
    if base.is_file() {
        return Some(base);
    }
    let file = base.file_name()?.to_string_lossy().into_owned();
    [".js", ".cjs", "/index.js", "/index.cjs"]
        .iter()
        .map(|suffix| {
            if suffix.starts_with('/') {
                base.join(&suffix[1..])
            } else {
                base.with_file_name(format!("{file}{suffix}"))
            }
        })
        .find(|candidate| candidate.is_file())
}

#[derive(Default)]
struct ExportCollector {
    exports: CjsExports,
}

impl ExportCollector {
    fn object_literal(&mut self, obj: &ObjectLit) {
        for prop in &obj.props {
            match prop {
                PropOrSpread::Spread(spread) => {
                    if let Some(specifier) = require_literal(&spread.expr) {
                        self.exports.reexports.push(specifier);
                    }
                }
                PropOrSpread::Prop(prop) => {
                    let name = match &**prop {
                        Prop::Shorthand(ident) => Some(ident.sym.to_string()),
                        Prop::KeyValue(kv) => prop_name(&kv.key),
                        Prop::Method(m) => prop_name(&m.key),
                        Prop::Getter(g) => prop_name(&g.key),
                        Prop::Setter(_) | Prop::Assign(_) => None,
                    };
                    self.exports.names.extend(name);
                }
            }
        }
    }
}

impl Visit for ExportCollector {
    fn visit_assign_expr(&mut self, n: &AssignExpr) {
        if let AssignTarget::Simple(SimpleAssignTarget::Member(member)) = &n.left {
            if is_module_exports(member) {
                match &*n.right {
                    Expr::Object(obj) => self.object_literal(obj),
                    right => {
                        if let Some(specifier) = require_literal(right) {
                            self.exports.reexports.push(specifier);
                        }
                    }
                }
            } else if let Some(name) = exported_property(member) {
                self.exports.names.insert(name);
            }
        }
        n.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        if let Callee::Expr(callee) = &n.callee {
            match &**callee {
                // Object.defineProperty(exports, "name", …)
                Expr::Member(m) if is_define_property(m) && n.args.len() >= 2 => {
                    if is_exports_object(&n.args[0].expr) {
                        if let Expr::Lit(Lit::Str(s)) = &*n.args[1].expr {
                            self.exports.names.insert(s.value.to_string());
                        }
                    }
                }
                // __exportStar(require("./x"), exports), tslib.__exportStar(...)
                callee if is_export_star_helper(callee) => {
                    if let Some(specifier) = n.args.first().and_then(|a| require_literal(&a.expr)) {
                        self.exports.reexports.push(specifier);
                    }
                }
                _ => {}
            }
        }
        n.visit_children_with(self);
    }
}

/// `module.exports`.
fn is_module_exports(m: &MemberExpr) -> bool {
    matches!(&*m.obj, Expr::Ident(obj) if &*obj.sym == "module")
        && matches!(&m.prop, MemberProp::Ident(p) if &*p.sym == "exports")
}

/// `exports` or `module.exports`.
fn is_exports_object(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(ident) => &*ident.sym == "exports",
        Expr::Member(m) => is_module_exports(m),
        _ => false,
    }
}

/// `name` from `exports.name` / `module.exports.name` / `exports["name"]`.
fn exported_property(m: &MemberExpr) -> Option<String> {
    if !is_exports_object(&m.obj) {
        return None;
    }
    match &m.prop {
        MemberProp::Ident(ident) => Some(ident.sym.to_string()),
        MemberProp::Computed(c) => match &*c.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            _ => None,
        },
        MemberProp::PrivateName(_) => None,
    }
}

fn is_define_property(m: &MemberExpr) -> bool {
    matches!(&*m.obj, Expr::Ident(obj) if &*obj.sym == "Object")
        && matches!(&m.prop, MemberProp::Ident(p) if &*p.sym == "defineProperty")
}

fn is_export_star_helper(callee: &Expr) -> bool {
    let name = match callee {
        Expr::Ident(ident) => &ident.sym,
        Expr::Member(m) => match &m.prop {
            MemberProp::Ident(p) => &p.sym,
            _ => return false,
        },
        _ => return false,
    };
    matches!(&**name, "__exportStar" | "__export" | "__reExport")
}

fn require_literal(expr: &Expr) -> Option<String> {
    let Expr::Call(call) = expr else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    match (&**callee, call.args.as_slice()) {
        (Expr::Ident(ident), [arg]) if &*ident.sym == "require" => match &*arg.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn prop_name(key: &PropName) -> Option<String> {
    match key {
        PropName::Ident(ident) => Some(ident.sym.to_string()),
        PropName::Str(s) => Some(s.value.to_string()),
        PropName::Num(_) | PropName::Computed(_) | PropName::BigInt(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn analyze(code: &str) -> CjsExports {
        analyze_parsed(&parse_program(code, ParseSyntax::Js).unwrap())
    }

    fn names(exports: &CjsExports) -> Vec<&str> {
        exports.names.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_property_assignments() {
        let exports = analyze(
            "exports.foo = 1;\nmodule.exports.bar = function () {};\nexports['baz'] = 3;\nObject.defineProperty(exports, '__esModule', { value: true });\nObject.defineProperty(exports, 'qux', { get() {} });",
        );
        assert_eq!(names(&exports), vec!["__esModule", "bar", "baz", "foo", "qux"]);
    }

    #[test]
    fn test_object_literal_export() {
        let exports = analyze(
            "function foo() {}\nmodule.exports = { foo, bar: 2, baz() {}, 'quoted': 1, ...require('./more'), [dyn]: 0 };",
        );
        assert_eq!(names(&exports), vec!["bar", "baz", "foo", "quoted"]);
        assert_eq!(exports.reexports, vec!["./more"]);
    }

    #[test]
    fn test_reexport_forms() {
        let exports = analyze(
            "module.exports = require('./impl');\n__exportStar(require('./types'), exports);\ntslib.__exportStar(require('./extra'), exports);",
        );
        assert_eq!(exports.reexports, vec!["./impl", "./types", "./extra"]);
    }

    #[test]
    fn test_follows_relative_reexports() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.js"), "module.exports = require('./lib/impl');").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(
            dir.path().join("lib/impl.js"),
            "exports.foo = 1;\nexports.bar = 2;\n__exportStar(require('./extra'), exports);\nrequire('react');",
        )
        .unwrap();
        fs::create_dir(dir.path().join("lib/extra")).unwrap();
        fs::write(dir.path().join("lib/extra/index.js"), "exports.baz = 3;").unwrap();

        let found = analyze_commonjs_exports(&dir.path().join("index.js")).unwrap();
        let found: Vec<_> = found.iter().map(String::as_str).collect();
        assert_eq!(found, vec!["bar", "baz", "foo"]);
    }

    #[test]
    fn test_broken_reexport_target_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("index.js"),
            "var package = 1;\nexports.foo = package;\n__exportStar(require('./broken'), exports);",
        )
        .unwrap();
        fs::write(dir.path().join("broken.js"), "exports.bar = {;").unwrap();

        let found = analyze_commonjs_exports(&dir.path().join("index.js")).unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["foo".to_string()]);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let err = analyze_commonjs_exports(&dir.path().join("nope.js")).unwrap_err();
        assert!(matches!(err, ScanError::Read { .. }));
    }

    #[test]
    fn test_exportable_names() {
        assert!(is_exportable_name("foo"));
        assert!(is_exportable_name("$el"));
        assert!(is_exportable_name("_private"));
        assert!(!is_exportable_name("default"));
        assert!(!is_exportable_name("class"));
        assert!(!is_exportable_name("__esModule"));
        assert!(!is_exportable_name("my-name"));
        assert!(!is_exportable_name("1st"));
        assert!(!is_exportable_name(""));
    }
}
