//! Vue single-file components.
//!
//! `<script>` supplies the component options, `<script setup>` becomes a
//! `setup()` function returning its top-level bindings, `<template>` is passed
//! through as the runtime-compiled `template` option and `<style>` blocks are
//! injected into the document.

use super::{vanilla, Framework, TransformError, TransformRequest, VariantOutput};
use crate::compiler::{parse_module, CompilerBackend, ParseSyntax, TranspileOptions};
use crate::dev::edit::{apply_edits, Edit};
use crate::dev::scan::{decl_names, scan_parsed, DefaultExport};
use std::path::Path;
use swc_ecma_ast::{CallExpr, Callee, Expr, ImportSpecifier, ModuleDecl, ModuleItem, Stmt};
use swc_ecma_visit::{Visit, VisitWith};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Block {
    attrs: String,
    content: String,
}

impl Block {
    fn attr(&self, name: &str) -> Option<&str> {
        let mut rest = self.attrs.as_str();
        while let Some(pos) = rest.find(name) {
            let after = &rest[pos + name.len()..];
            let boundary_ok = pos == 0 || rest[..pos].ends_with(char::is_whitespace);
            if boundary_ok {
                if let Some(value) = after.strip_prefix("=\"").or_else(|| after.strip_prefix("='")) {
                    let quote = if after.starts_with("=\"") { '"' } else { '\'' };
                    return value.split(quote).next();
                }
                if after.is_empty() || after.starts_with(char::is_whitespace) {
                    return Some("");
                }
            }
            rest = after;
        }
        None
    }

    fn lang(&self) -> &str {
        self.attr("lang").unwrap_or("js")
    }
}

#[derive(Debug, Default)]
struct Sfc {
    script: Option<Block>,
    script_setup: Option<Block>,
    template: Option<String>,
    styles: Vec<Block>,
}

pub(crate) fn transform(
    compiler: &dyn CompilerBackend,
    request: &TransformRequest,
) -> Result<VariantOutput, TransformError> {
    if request.extension() != "vue" {
        return vanilla::transform(compiler, request);
    }
    let fail = |message: String| TransformError::Component {
        file: request.file_path.clone(),
        framework: Framework::Vue,
        message,
    };

    let sfc = parse_sfc(&request.source).map_err(fail)?;
    let mut out = String::new();

    match &sfc.script {
        Some(block) => {
            let code = compile_block(compiler, &request.file_path, block)?;
            out.push_str(&options_component(&code).map_err(fail)?);
        }
        None => out.push_str("const __sfc__ = {};\n"),
    }

    if let Some(block) = &sfc.script_setup {
        out.push_str(&setup_component(compiler, &request.file_path, block).map_err(|e| match e {
            SetupError::Transform(t) => t,
            SetupError::Message(m) => fail(m),
        })?);
    }

    if let Some(template) = &sfc.template {
        let literal = serde_json::to_string(template.trim()).map_err(|e| fail(e.to_string()))?;
        out.push_str(&format!("__sfc__.template = {literal};\n"));
    }

    let id = request.file_path.to_string_lossy();
    for (i, style) in sfc.styles.iter().enumerate() {
        if style.lang() != "js" && style.lang() != "css" {
            return Err(fail(format!("<style lang=\"{}\"> needs a preprocessor", style.lang())));
        }
        let css = serde_json::to_string(&style.content).map_err(|e| fail(e.to_string()))?;
        let style_id = serde_json::to_string(&format!("{id}?vue&type=style&index={i}"))
            .map_err(|e| fail(e.to_string()))?;
        out.push_str(&format!(
            "{{\n  const id = {style_id};\n  let el = document.querySelector(`style[data-vela-id=\"${{CSS.escape(id)}}\"]`);\n  if (!el) {{ el = document.createElement(\"style\"); el.setAttribute(\"data-vela-id\", id); document.head.appendChild(el); }}\n  el.textContent = {css};\n}}\n"
        ));
    }

    out.push_str("export default __sfc__;\n");
    Ok(VariantOutput {
        code: out,
        map: None,
    })
}

fn parse_sfc(source: &str) -> Result<Sfc, String> {
    let mut sfc = Sfc::default();
    let mut pos = 0;

    while let Some(offset) = source[pos..].find('<') {
        let start = pos + offset;
        let rest = &source[start..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").ok_or("unterminated comment")?;
            pos = start + end + 3;
            continue;
        }

        let name_len = rest[1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .unwrap_or(rest.len() - 1);
        let name = &rest[1..=name_len];
        if name.is_empty() {
            return Err(format!("unexpected `<` at byte {start}"));
        }
        let open_end = rest.find('>').ok_or_else(|| format!("unterminated <{name}> tag"))?;
        let attrs = rest[1 + name_len..open_end].trim().to_string();
        let body_start = start + open_end + 1;

        let (content_end, close_len) = if name == "template" {
            find_template_close(source, body_start)?
        } else {
            let close = format!("</{name}>");
            let end = source[body_start..]
                .find(&close)
                .ok_or_else(|| format!("missing {close}"))?;
            (body_start + end, close.len())
        };
        let content = source[body_start..content_end].to_string();

        match name {
            "script" => {
                let block = Block { attrs, content };
                let slot = if block.attr("setup").is_some() {
                    &mut sfc.script_setup
                } else {
                    &mut sfc.script
                };
                if slot.is_some() {
                    return Err("duplicate <script> block".to_string());
                }
                *slot = Some(block);
            }
            "template" => {
                if sfc.template.replace(content).is_some() {
                    return Err("duplicate <template> block".to_string());
                }
            }
            "style" => sfc.styles.push(Block { attrs, content }),
            // Custom blocks (<i18n>, <docs>) carry no runtime code.
            _ => {}
        }
        pos = content_end + close_len;
    }

    Ok(sfc)
}

/// End of the root template's content, accounting for nested `<template>` tags.
fn find_template_close(source: &str, from: usize) -> Result<(usize, usize), String> {
    const OPEN: &str = "<template";
    const CLOSE: &str = "</template>";
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let next_close = source[pos..]
            .find(CLOSE)
            .map(|i| pos + i)
            .ok_or("missing </template>")?;
        let next_open = source[pos..].find(OPEN).map(|i| pos + i);
        match next_open {
            Some(open) if open < next_close => {
                depth += 1;
                pos = open + OPEN.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Ok((next_close, CLOSE.len()));
                }
                pos = next_close + CLOSE.len();
            }
        }
    }
}

fn virtual_path(file: &Path, block: &Block) -> std::path::PathBuf {
    let ext = match block.lang() {
        "ts" => "ts",
        "tsx" => "tsx",
        "jsx" => "jsx",
        _ => "js",
    };
    file.with_extension(format!("vue.{ext}"))
}

fn compile_block(
    compiler: &dyn CompilerBackend,
    file: &Path,
    block: &Block,
) -> Result<String, TransformError> {
    compiler
        .transpile(&TranspileOptions::new(virtual_path(file, block)), &block.content)
        .map(|out| out.code)
        .map_err(|e| TransformError::compile(file, e))
}

/// `export default { ... }` becomes `const __sfc__ = { ... }`.
fn options_component(code: &str) -> Result<String, String> {
    let parsed = parse_module(code, ParseSyntax::Js).map_err(|e| e.to_string())?;
    let scan = scan_parsed(&parsed);
    match scan.default_export {
        Some(DefaultExport::Expr { statement, expr }) => {
            let replacement = format!("const __sfc__ = {};", &code[expr]);
            let mut out = apply_edits(code, vec![Edit::new(statement, replacement)]);
            out.push('\n');
            Ok(out)
        }
        None => Ok(format!("{code}\nconst __sfc__ = {{}};\n")),
        Some(_) => Err("<script> must use `export default { ... }`".to_string()),
    }
}

enum SetupError {
    Transform(TransformError),
    Message(String),
}

impl From<String> for SetupError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

/// Compile `<script setup>` into hoisted imports plus `__sfc__.setup`.
fn setup_component(
    compiler: &dyn CompilerBackend,
    file: &Path,
    block: &Block,
) -> Result<String, SetupError> {
    let syntax = ParseSyntax::from_path(&virtual_path(file, block));
    let original = parse_module(&block.content, syntax).map_err(|e| e.to_string())?;
    let bindings = top_level_bindings(&original.module.body);

    // Exporting every binding keeps the TS stripper from eliding imports that
    // are only referenced by the template; type-only names are dropped by it.
    let probe = Block {
        attrs: block.attrs.clone(),
        content: format!("{}\nexport {{ {} }};\n", block.content, bindings.join(", ")),
    };
    let code = compile_block(compiler, file, &probe).map_err(SetupError::Transform)?;

    let parsed = parse_module(&code, ParseSyntax::Js).map_err(|e| e.to_string())?;
    let mut imports = String::new();
    let mut body_edits = Vec::new();
    let mut exposed = Vec::new();

    for item in &parsed.module.body {
        if let ModuleItem::ModuleDecl(decl) = item {
            match decl {
                ModuleDecl::Import(import) => {
                    let range = parsed.range(import.span);
                    imports.push_str(&code[range.clone()]);
                    imports.push('\n');
                    body_edits.push(Edit::new(range, ""));
                }
                ModuleDecl::ExportNamed(named) if named.src.is_none() => {
                    exposed.extend(named.specifiers.iter().filter_map(|s| match s {
                        swc_ecma_ast::ExportSpecifier::Named(n) => {
                            Some(crate::dev::scan::export_name(&n.orig))
                        }
                        _ => None,
                    }));
                    body_edits.push(Edit::new(parsed.range(named.span), ""));
                }
                _ => {
                    return Err("<script setup> cannot contain ES module exports"
                        .to_string()
                        .into())
                }
            }
        }
    }

    let mut macros = MacroFinder::default();
    parsed.module.visit_with(&mut macros);
    let arg_text = |span: Option<swc_common::Span>| span.map(|s| code[parsed.range(s)].to_string());

    let body = apply_edits(&code, body_edits);
    let mut out = imports;
    if let Some(props) = arg_text(macros.props) {
        out.push_str(&format!("__sfc__.props = {props};\n"));
    }
    if let Some(emits) = arg_text(macros.emits) {
        out.push_str(&format!("__sfc__.emits = {emits};\n"));
    }
    out.push_str(&format!(
        "__sfc__.setup = function setup(__props, {{ emit: __emit, expose: __expose }}) {{\nconst defineProps = () => __props;\nconst defineEmits = () => __emit;\nconst defineExpose = (exposed) => __expose(exposed);\n{}\nreturn {{ {} }};\n}};\n",
        body.trim(),
        exposed.join(", ")
    ));
    Ok(out)
}

fn top_level_bindings(body: &[ModuleItem]) -> Vec<String> {
    let mut names = Vec::new();
    for item in body {
        match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(import)) if !import.type_only => {
                for spec in &import.specifiers {
                    let (local, type_only) = match spec {
                        ImportSpecifier::Named(n) => (&n.local, n.is_type_only),
                        ImportSpecifier::Default(d) => (&d.local, false),
                        ImportSpecifier::Namespace(ns) => (&ns.local, false),
                    };
                    if !type_only {
                        names.push(local.sym.to_string());
                    }
                }
            }
            ModuleItem::Stmt(Stmt::Decl(decl)) => names.extend(decl_names(decl)),
            _ => {}
        }
    }
    names
}

/// First argument spans of `defineProps(...)` and `defineEmits(...)`.
#[derive(Default)]
struct MacroFinder {
    props: Option<swc_common::Span>,
    emits: Option<swc_common::Span>,
}

impl Visit for MacroFinder {
    fn visit_call_expr(&mut self, n: &CallExpr) {
        use swc_common::Spanned;

        if let Callee::Expr(callee) = &n.callee {
            if let (Expr::Ident(ident), Some(arg)) = (&**callee, n.args.first()) {
                match &*ident.sym {
                    "defineProps" if self.props.is_none() => self.props = Some(arg.expr.span()),
                    "defineEmits" if self.emits.is_none() => self.emits = Some(arg.expr.span()),
                    _ => {}
                }
            }
        }
        n.visit_children_with(self);
    }
}
