//! Named-export repair for entries bundled from CommonJS packages.
//!
//! Splitting bundlers turn a CommonJS entry into a thin wrapper such as
//! `export default require_pkg();` around a shared chunk, which leaves
//! `import { foo } from "pkg"` unsatisfiable. When the original entry is
//! CommonJS and the wrapper only exports `default`, the statically visible
//! export names of the original are re-exported as properties of the default.

use crate::compiler::{parse_module, parse_program, ParseSyntax, ParsedModule};
use crate::dev::cjs::{analyze_commonjs_exports, is_exportable_name};
use crate::dev::edit::{apply_edits, Edit};
use crate::dev::scan::{decl_names, scan_parsed, DefaultExport};
use std::collections::BTreeSet;
use std::path::Path;
use swc_ecma_ast::{ImportSpecifier, ModuleDecl, ModuleItem, Stmt};
use tracing::debug;

const DEFAULT_BINDING: &str = "__vela_default";

/// Repaired output, or `None` when `output` needs no repair.
pub(super) fn repair_named_exports(output: &str, entry_source: &Path) -> Option<String> {
    let parsed = parse_module(output, ParseSyntax::Js).ok()?;
    let scan = scan_parsed(&parsed);
    if !scan.exports_only_default() {
        return None;
    }
    if !is_commonjs_file(entry_source) {
        return None;
    }

    let names = match analyze_commonjs_exports(entry_source) {
        Ok(names) => names,
        Err(err) => {
            debug!(entry = %entry_source.display(), error = %err, "cannot introspect CommonJS exports");
            return None;
        }
    };
    let taken = top_level_bindings(&parsed);
    let names: Vec<String> = names
        .into_iter()
        .filter(|n| is_exportable_name(n) && !taken.contains(n) && n != DEFAULT_BINDING)
        .collect();
    if names.is_empty() {
        return None;
    }

    let (mut code, binding) = match scan.default_export? {
        DefaultExport::Expr { statement, expr } => {
            let replacement = format!(
                "const {DEFAULT_BINDING} = {};\nexport default {DEFAULT_BINDING};",
                &output[expr]
            );
            (
                apply_edits(output, vec![Edit::new(statement, replacement)]),
                DEFAULT_BINDING.to_string(),
            )
        }
        DefaultExport::Local(local) => (output.to_string(), local),
        DefaultExport::Declaration => return None,
    };

    if !code.ends_with('\n') {
        code.push('\n');
    }
    for name in &names {
        code.push_str(&format!("export const {name} = {binding}.{name};\n"));
    }
    debug!(entry = %entry_source.display(), count = names.len(), "synthesized named exports");
    Some(code)
}

fn is_commonjs_file(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|source| parse_program(&source, ParseSyntax::Js).ok())
        .is_some_and(|parsed| scan_parsed(&parsed).is_commonjs())
}

fn top_level_bindings(parsed: &ParsedModule) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for item in &parsed.module.body {
        match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
                names.extend(import.specifiers.iter().map(|spec| match spec {
                    ImportSpecifier::Named(n) => n.local.sym.to_string(),
                    ImportSpecifier::Default(d) => d.local.sym.to_string(),
                    ImportSpecifier::Namespace(ns) => ns.local.sym.to_string(),
                }));
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
                names.extend(decl_names(&export.decl));
            }
            ModuleItem::Stmt(Stmt::Decl(decl)) => names.extend(decl_names(decl)),
            _ => {}
        }
    }
    names
}
