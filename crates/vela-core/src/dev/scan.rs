//! Single-pass static analysis of a module.
//!
//! One parse yields everything downstream stages need: specifier literal spans
//! for rewriting, the module's export surface for shim synthesis, and whether
//! the file speaks ESM or CommonJS for format normalization.

use crate::compiler::{parse_module, CompilerError, ParseSyntax, ParsedModule};
use std::ops::Range;
use swc_ecma_ast::{
    CallExpr, Callee, Decl, DefaultDecl, ExportAll, ExportDecl, ExportDefaultDecl,
    ExportDefaultExpr, ExportSpecifier, Expr, ImportDecl, Lit, MemberExpr, MemberProp,
    MetaPropExpr, ModuleExportName, NamedExport,
};
use swc_ecma_visit::{Visit, VisitWith};

/// Where a specifier literal appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    Import,
    ExportFrom,
    /// `import("literal")`.
    DynamicImport,
    /// `require("literal")`.
    Require,
}

/// A specifier string literal and its byte range, quotes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecifierSpan {
    pub value: String,
    pub kind: SpecifierKind,
    pub range: Range<usize>,
}

impl SpecifierSpan {
    /// Static `import`/`export ... from`, the forms resolved before evaluation.
    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self.kind, SpecifierKind::Import | SpecifierKind::ExportFrom)
    }
}

/// Shape of the module's default export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultExport {
    /// `export default <expr>;` with the statement and expression ranges.
    Expr {
        statement: Range<usize>,
        expr: Range<usize>,
    },
    /// `export { local as default }`.
    Local(String),
    /// `export default function/class`.
    Declaration,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleScan {
    pub specifiers: Vec<SpecifierSpan>,
    /// Exported binding names, `default` included.
    pub exports: Vec<String>,
    pub default_export: Option<DefaultExport>,
    /// `export * from` present, so `exports` may be incomplete.
    pub has_export_star: bool,
    /// Any import/export declaration or `import.meta`.
    pub has_module_syntax: bool,
    /// References `module.exports`, `exports.*` or calls `require`.
    pub uses_commonjs: bool,
    /// `import(expr)` with a non-literal argument.
    pub has_computed_import: bool,
}

impl ModuleScan {
    /// CommonJS when it touches CommonJS globals and has no ESM syntax.
    #[must_use]
    pub fn is_commonjs(&self) -> bool {
        self.uses_commonjs && !self.has_module_syntax
    }

    #[must_use]
    pub fn exports_only_default(&self) -> bool {
        !self.has_export_star && self.exports.iter().all(|n| n == "default") && self.default_export.is_some()
    }
}

/// Parse `code` and scan it.
pub fn scan_module(code: &str, syntax: ParseSyntax) -> Result<ModuleScan, CompilerError> {
    let parsed = parse_module(code, syntax)?;
    Ok(scan_parsed(&parsed))
}

/// Scan an already parsed module.
#[must_use]
pub fn scan_parsed(parsed: &ParsedModule) -> ModuleScan {
    let mut scanner = Scanner {
        parsed,
        scan: ModuleScan::default(),
    };
    parsed.module.visit_with(&mut scanner);
    scanner.scan.specifiers.sort_by_key(|s| s.range.start);
    scanner.scan
}

pub(crate) fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

pub(crate) fn decl_names(decl: &Decl) -> Vec<String> {
    match decl {
        Decl::Var(var) => {
            let mut collector = BindingCollector::default();
            for declarator in &var.decls {
                declarator.name.visit_with(&mut collector);
            }
            collector.names
        }
        Decl::Fn(f) => vec![f.ident.sym.to_string()],
        Decl::Class(c) => vec![c.ident.sym.to_string()],
        _ => Vec::new(),
    }
}

/// Binding identifiers introduced by a pattern; default-value expressions are skipped.
#[derive(Default)]
struct BindingCollector {
    names: Vec<String>,
}

impl Visit for BindingCollector {
    fn visit_binding_ident(&mut self, n: &swc_ecma_ast::BindingIdent) {
        self.names.push(n.id.sym.to_string());
    }

    fn visit_expr(&mut self, _: &Expr) {}
}

struct Scanner<'a> {
    parsed: &'a ParsedModule,
    scan: ModuleScan,
}

impl Scanner<'_> {
    fn push(&mut self, value: String, kind: SpecifierKind, span: swc_common::Span) {
        self.scan.specifiers.push(SpecifierSpan {
            value,
            kind,
            range: self.parsed.range(span),
        });
    }
}

impl Visit for Scanner<'_> {
    fn visit_import_decl(&mut self, n: &ImportDecl) {
        self.scan.has_module_syntax = true;
        if !n.type_only {
            self.push(n.src.value.to_string(), SpecifierKind::Import, n.src.span);
        }
    }

    fn visit_named_export(&mut self, n: &NamedExport) {
        self.scan.has_module_syntax = true;
        if n.type_only {
            return;
        }
        for spec in &n.specifiers {
            match spec {
                ExportSpecifier::Named(named) => {
                    let exported = named.exported.as_ref().unwrap_or(&named.orig);
                    let name = export_name(exported);
                    if name == "default" && n.src.is_none() {
                        self.scan.default_export =
                            Some(DefaultExport::Local(export_name(&named.orig)));
                    }
                    self.scan.exports.push(name);
                }
                ExportSpecifier::Namespace(ns) => self.scan.exports.push(export_name(&ns.name)),
                ExportSpecifier::Default(d) => self.scan.exports.push(d.exported.sym.to_string()),
            }
        }
        if let Some(src) = &n.src {
            self.push(src.value.to_string(), SpecifierKind::ExportFrom, src.span);
        }
    }

    fn visit_export_all(&mut self, n: &ExportAll) {
        self.scan.has_module_syntax = true;
        self.scan.has_export_star = true;
        self.push(n.src.value.to_string(), SpecifierKind::ExportFrom, n.src.span);
    }

    fn visit_export_decl(&mut self, n: &ExportDecl) {
        self.scan.has_module_syntax = true;
        self.scan.exports.extend(decl_names(&n.decl));
        n.visit_children_with(self);
    }

    fn visit_export_default_decl(&mut self, n: &ExportDefaultDecl) {
        self.scan.has_module_syntax = true;
        if !matches!(n.decl, DefaultDecl::TsInterfaceDecl(_)) {
            self.scan.exports.push("default".to_string());
            self.scan.default_export = Some(DefaultExport::Declaration);
        }
        n.visit_children_with(self);
    }

    fn visit_export_default_expr(&mut self, n: &ExportDefaultExpr) {
        use swc_common::Spanned;

        self.scan.has_module_syntax = true;
        self.scan.exports.push("default".to_string());
        self.scan.default_export = Some(DefaultExport::Expr {
            statement: self.parsed.range(n.span),
            expr: self.parsed.range(n.expr.span()),
        });
        n.visit_children_with(self);
    }

    fn visit_meta_prop_expr(&mut self, _: &MetaPropExpr) {
        self.scan.has_module_syntax = true;
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        let first_literal = n.args.first().and_then(|arg| match &*arg.expr {
            Expr::Lit(Lit::Str(s)) if arg.spread.is_none() => Some(s),
            _ => None,
        });

        match &n.callee {
            Callee::Import(_) => match first_literal {
                Some(s) => self.push(s.value.to_string(), SpecifierKind::DynamicImport, s.span),
                None => self.scan.has_computed_import = true,
            },
            Callee::Expr(callee) => {
                if let Expr::Ident(ident) = &**callee {
                    if &*ident.sym == "require" && n.args.len() == 1 {
                        self.scan.uses_commonjs = true;
                        if let Some(s) = first_literal {
                            self.push(s.value.to_string(), SpecifierKind::Require, s.span);
                        }
                    }
                }
            }
            Callee::Super(_) => {}
        }
        n.visit_children_with(self);
    }

    fn visit_member_expr(&mut self, n: &MemberExpr) {
        if is_commonjs_exports(n) {
            self.scan.uses_commonjs = true;
        }
        n.visit_children_with(self);
    }
}

/// `module.exports` or `exports.<anything>`.
pub(crate) fn is_commonjs_exports(n: &MemberExpr) -> bool {
    match &*n.obj {
        Expr::Ident(obj) if &*obj.sym == "exports" => true,
        Expr::Ident(obj) if &*obj.sym == "module" => {
            matches!(&n.prop, MemberProp::Ident(p) if &*p.sym == "exports")
        }
        _ => false,
    }
}
