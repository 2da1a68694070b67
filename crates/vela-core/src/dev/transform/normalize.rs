//! Final normalization of variant output.
//!
//! Whatever module format a variant emits, the caller gets exactly the format
//! and platform it asked for:
//!
//! - ESM target: CommonJS input is wrapped, with literal `require` calls
//!   hoisted into namespace imports.
//! - CommonJS target: ESM syntax is lowered to `require`/`exports`.
//! - IIFE target: CommonJS form wrapped in a function scope; imports are rejected.
//!
//! Browser targets additionally get `process.env.NODE_ENV` inlined.

use super::TransformError;
use crate::compiler::{parse_program, ParseSyntax, ParsedModule};
use crate::dev::cjs::{analyze_parsed, is_exportable_name};
use crate::dev::edit::{apply_edits, Edit};
use crate::dev::scan::{decl_names, export_name, scan_parsed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use swc_common::Spanned;
use swc_ecma_ast::{
    CallExpr, Callee, DefaultDecl, ExportSpecifier, Expr, ImportSpecifier, Lit, MemberExpr,
    MemberProp, ModuleDecl, ModuleItem,
};
use swc_ecma_visit::{Visit, VisitWith};

/// Where the module will run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Browser,
    Server,
}

/// How the module will be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    #[default]
    Esm,
    #[serde(rename = "cjs")]
    CommonJs,
    /// Classic script.
    Iife,
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Esm => "esm",
            Self::CommonJs => "cjs",
            Self::Iife => "iife",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TransformTarget {
    pub platform: Platform,
    pub format: ModuleFormat,
}

impl TransformTarget {
    #[must_use]
    pub fn new(platform: Platform, format: ModuleFormat) -> Self {
        Self { platform, format }
    }
}

/// Normalized code; `lines_shifted` means earlier source maps no longer line up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub code: String,
    pub lines_shifted: bool,
}

const INTEROP: &str = "const __vela_interop = (m) => (m && \"default\" in m ? m.default : m);\n";

/// Bring `code` into `target`'s format.
pub fn normalize(
    code: &str,
    file: &Path,
    target: TransformTarget,
    dev: bool,
) -> Result<Normalized, TransformError> {
    let fail = |message: String| TransformError::Normalize {
        file: file.to_path_buf(),
        format: target.format,
        message,
    };

    let parsed = parse_program(code, ParseSyntax::Js).map_err(|e| fail(e.to_string()))?;
    let scan = scan_parsed(&parsed);
    let refs = collect_refs(&parsed);

    let mut edits = Vec::new();
    if target.platform == Platform::Browser {
        let mode = if dev { "\"development\"" } else { "\"production\"" };
        edits.extend(refs.node_env.iter().map(|range| Edit::new(range.clone(), mode)));
    }

    let (code, lines_shifted) = match target.format {
        ModuleFormat::Esm if scan.is_commonjs() => {
            (wrap_commonjs(code, &parsed, &refs, edits), true)
        }
        ModuleFormat::CommonJs if scan.has_module_syntax => {
            (lower_to_commonjs(code, &parsed, edits), true)
        }
        ModuleFormat::Iife => {
            if scan.specifiers.iter().any(|s| s.is_static()) {
                return Err(fail("classic scripts cannot import modules".to_string()));
            }
            let body = if scan.has_module_syntax {
                lower_to_commonjs(code, &parsed, edits)
            } else {
                apply_edits(code, edits)
            };
            (
                format!(
                    "(function () {{\nconst module = {{ exports: {{}} }};\nconst exports = module.exports;\n{body}\n}})();\n"
                ),
                true,
            )
        }
        _ => (apply_edits(code, edits), false),
    };

    Ok(Normalized { code, lines_shifted })
}

/// Wrap a CommonJS module as ESM.
fn wrap_commonjs(code: &str, parsed: &ParsedModule, refs: &Refs, mut edits: Vec<Edit>) -> String {
    let mut prelude = String::from(INTEROP);
    let mut bindings: BTreeMap<&str, String> = BTreeMap::new();
    for (range, specifier) in &refs.requires {
        let next = bindings.len();
        let binding = bindings
            .entry(specifier.as_str())
            .or_insert_with(|| format!("__vela_req_{next}"))
            .clone();
        edits.push(Edit::new(range.clone(), format!("__vela_interop({binding})")));
    }
    for (specifier, binding) in &bindings {
        prelude.push_str(&format!(
            "import * as {binding} from {};\n",
            serde_json::to_string(specifier).unwrap_or_default()
        ));
    }
    prelude.push_str("const __vela_module = { exports: {} };\n(function (module, exports) {\n");

    let mut out = prelude;
    out.push_str(&apply_edits(code, edits));
    out.push_str("\n}).call(__vela_module.exports, __vela_module, __vela_module.exports);\n");
    out.push_str("export default __vela_module.exports;\n");

    for name in analyze_parsed(parsed).names.iter().filter(|n| is_exportable_name(n)) {
        out.push_str(&format!("export const {name} = __vela_module.exports.{name};\n"));
    }
    out
}

/// Lower ESM syntax to CommonJS with span edits over the original text.
fn lower_to_commonjs(code: &str, parsed: &ParsedModule, mut edits: Vec<Edit>) -> String {
    let mut tail = Vec::new();
    let mut counter = 0usize;
    let mut next_binding = || {
        counter += 1;
        format!("__vela_req_{counter}")
    };
    let require = |src: &str| format!("require({})", serde_json::to_string(src).unwrap_or_default());

    for item in &parsed.module.body {
        let ModuleItem::ModuleDecl(decl) = item else {
            continue;
        };
        match decl {
            ModuleDecl::Import(import) => {
                let src = import.src.value.to_string();
                let text = if import.specifiers.is_empty() {
                    format!("{};", require(&src))
                } else {
                    let binding = next_binding();
                    let mut text = format!("const {binding} = {};", require(&src));
                    for spec in &import.specifiers {
                        let line = match spec {
                            ImportSpecifier::Default(d) => format!(
                                " const {} = {binding}.__esModule ? {binding}.default : {binding};",
                                d.local.sym
                            ),
                            ImportSpecifier::Namespace(ns) => {
                                format!(" const {} = {binding};", ns.local.sym)
                            }
                            ImportSpecifier::Named(n) => {
                                let imported = n
                                    .imported
                                    .as_ref()
                                    .map_or_else(|| n.local.sym.to_string(), export_name);
                                format!(" const {} = {binding}[{}];", n.local.sym, quote(&imported))
                            }
                        };
                        text.push_str(&line);
                    }
                    text
                };
                edits.push(Edit::new(parsed.range(import.span), text));
            }
            ModuleDecl::ExportDecl(export) => {
                let prefix = parsed.offset(export.span.lo)..parsed.offset(export.decl.span().lo);
                edits.push(Edit::new(prefix, ""));
                for name in decl_names(&export.decl) {
                    tail.push(format!("exports[{}] = {name};", quote(&name)));
                }
            }
            ModuleDecl::ExportDefaultDecl(export) => {
                let ident = match &export.decl {
                    DefaultDecl::Fn(f) => f.ident.as_ref(),
                    DefaultDecl::Class(c) => c.ident.as_ref(),
                    DefaultDecl::TsInterfaceDecl(_) => continue,
                };
                let prefix = parsed.offset(export.span.lo)..parsed.offset(export.decl.span().lo);
                match ident {
                    Some(ident) => {
                        edits.push(Edit::new(prefix, ""));
                        tail.push(format!("exports.default = {};", ident.sym));
                    }
                    None => edits.push(Edit::new(prefix, "exports.default = ")),
                }
            }
            ModuleDecl::ExportDefaultExpr(export) => {
                let prefix = parsed.offset(export.span.lo)..parsed.offset(export.expr.span().lo);
                edits.push(Edit::new(prefix, "exports.default = "));
            }
            ModuleDecl::ExportNamed(named) => {
                let source = named.src.as_ref().map(|src| {
                    let binding = next_binding();
                    (binding.clone(), format!("const {binding} = {};", require(&*src.value)))
                });
                let text = source.as_ref().map(|(_, line)| line.clone()).unwrap_or_default();
                for spec in &named.specifiers {
                    match spec {
                        ExportSpecifier::Named(n) => {
                            let orig = export_name(&n.orig);
                            let exported = n.exported.as_ref().map_or_else(|| orig.clone(), export_name);
                            let value = match &source {
                                Some((binding, _)) => format!("{binding}[{}]", quote(&orig)),
                                None => orig,
                            };
                            tail.push(format!("exports[{}] = {value};", quote(&exported)));
                        }
                        ExportSpecifier::Namespace(ns) => {
                            if let Some((binding, _)) = &source {
                                tail.push(format!("exports[{}] = {binding};", quote(&export_name(&ns.name))));
                            }
                        }
                        ExportSpecifier::Default(d) => {
                            if let Some((binding, _)) = &source {
                                tail.push(format!("exports[{}] = {binding}.default;", quote(&*d.exported.sym)));
                            }
                        }
                    }
                }
                edits.push(Edit::new(parsed.range(named.span), text));
            }
            ModuleDecl::ExportAll(all) => {
                let binding = next_binding();
                edits.push(Edit::new(
                    parsed.range(all.span),
                    format!(
                        "const {binding} = {}; for (const k in {binding}) if (k !== \"default\" && !(k in exports)) exports[k] = {binding}[k];",
                        require(&*all.src.value)
                    ),
                ));
            }
            _ => {}
        }
    }

    let mut out = String::from("\"use strict\";\nObject.defineProperty(exports, \"__esModule\", { value: true });\n");
    out.push_str(&apply_edits(code, edits));
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(&tail.join("\n"));
        out.push('\n');
    }
    out
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// `process.env.NODE_ENV` and `require("literal")` call ranges.
#[derive(Default)]
struct Refs {
    node_env: Vec<Range<usize>>,
    requires: Vec<(Range<usize>, String)>,
}

fn collect_refs(parsed: &ParsedModule) -> Refs {
    let mut collector = RefCollector {
        parsed,
        refs: Refs::default(),
    };
    parsed.module.visit_with(&mut collector);
    collector.refs
}

struct RefCollector<'a> {
    parsed: &'a ParsedModule,
    refs: Refs,
}

impl Visit for RefCollector<'_> {
    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if is_node_env(n) {
            self.refs.node_env.push(self.parsed.range(n.span));
            return;
        }
        n.visit_children_with(self);
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        if let Callee::Expr(callee) = &n.callee {
            if let Expr::Ident(ident) = &**callee {
                if &*ident.sym == "require" && n.args.len() == 1 {
                    if let Expr::Lit(Lit::Str(s)) = &*n.args[0].expr {
                        self.refs
                            .requires
                            .push((self.parsed.range(n.span), s.value.to_string()));
                        return;
                    }
                }
            }
        }
        n.visit_children_with(self);
    }
}

fn is_node_env(n: &MemberExpr) -> bool {
    let MemberProp::Ident(prop) = &n.prop else {
        return false;
    };
    let Expr::Member(env) = &*n.obj else {
        return false;
    };
    let (Expr::Ident(process), MemberProp::Ident(env_prop)) = (&*env.obj, &env.prop) else {
        return false;
    };
    &*prop.sym == "NODE_ENV" && &*env_prop.sym == "env" && &*process.sym == "process"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str, platform: Platform, format: ModuleFormat) -> Result<Normalized, TransformError> {
        normalize(code, Path::new("/p/mod.js"), TransformTarget::new(platform, format), true)
    }

    #[test]
    fn test_esm_passthrough_is_unchanged() {
        let code = "import a from './a.js';\nexport const b = a;\n";
        let out = run(code, Platform::Browser, ModuleFormat::Esm).unwrap();
        assert_eq!(out.code, code);
        assert!(!out.lines_shifted);
    }

    #[test]
    fn test_browser_inlines_node_env() {
        let out = run(
            "if (process.env.NODE_ENV !== 'production') console.log(process.env.HOME);",
            Platform::Browser,
            ModuleFormat::Esm,
        )
        .unwrap();
        assert!(out.code.contains("if (\"development\" !== 'production')"));
        assert!(out.code.contains("process.env.HOME"));

        let server = run("const m = process.env.NODE_ENV;", Platform::Server, ModuleFormat::Esm).unwrap();
        assert!(server.code.contains("process.env.NODE_ENV"));
    }

    #[test]
    fn test_commonjs_wrapped_for_esm() {
        let out = run(
            "const pad = require('left-pad');\nfunction greet() { return pad('hi', 4); }\nexports.greet = greet;\n",
            Platform::Browser,
            ModuleFormat::Esm,
        )
        .unwrap();

        assert!(out.code.contains("import * as __vela_req_0 from \"left-pad\";"));
        assert!(out.code.contains("const pad = __vela_interop(__vela_req_0);"));
        assert!(out.code.contains("export default __vela_module.exports;"));
        assert!(out.code.contains("export const greet = __vela_module.exports.greet;"));
        assert!(out.lines_shifted);
    }

    #[test]
    fn test_esm_lowered_to_commonjs() {
        let out = run(
            "import React, { useState as use } from 'react';\nimport * as ns from './ns.js';\nimport './side.js';\nexport const a = 1;\nexport function f() {}\nexport { a as b };\nexport * from './all.js';\nexport default use;\n",
            Platform::Server,
            ModuleFormat::CommonJs,
        )
        .unwrap();
        let code = out.code;

        assert!(code.starts_with("\"use strict\";"));
        assert!(code.contains("const __vela_req_1 = require(\"react\");"));
        assert!(code.contains("const React = __vela_req_1.__esModule ? __vela_req_1.default : __vela_req_1;"));
        assert!(code.contains("const use = __vela_req_1[\"useState\"];"));
        assert!(code.contains("const ns = __vela_req_2;"));
        assert!(code.contains("require(\"./side.js\");"));
        assert!(code.contains("const a = 1;"));
        assert!(code.contains("exports.default = use"));
        assert!(code.contains("exports[\"a\"] = a;"));
        assert!(code.contains("exports[\"f\"] = f;"));
        assert!(code.contains("exports[\"b\"] = a;"));
        assert!(code.contains("for (const k in __vela_req_3)"));
        assert!(!code.contains("export "));
    }

    #[test]
    fn test_default_declarations_lowered() {
        let named = run("export default function App() {}", Platform::Server, ModuleFormat::CommonJs).unwrap();
        assert!(named.code.contains("function App() {}"));
        assert!(named.code.contains("exports.default = App;"));

        let anon = run("export default class {}", Platform::Server, ModuleFormat::CommonJs).unwrap();
        assert!(anon.code.contains("exports.default = class {}"));
    }

    #[test]
    fn test_iife_rejects_imports() {
        let err = run("import a from 'a';", Platform::Browser, ModuleFormat::Iife).unwrap_err();
        assert!(matches!(err, TransformError::Normalize { format: ModuleFormat::Iife, .. }));

        let ok = run("export const x = 1;", Platform::Browser, ModuleFormat::Iife).unwrap();
        assert!(ok.code.starts_with("(function () {"));
        assert!(ok.code.trim_end().ends_with("})();"));
    }
}
