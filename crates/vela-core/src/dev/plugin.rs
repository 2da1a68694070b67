//! Built-in plugins configured through `plugins[]`.
//!
//! Two hooks exist: `transform` rewrites a module's code after its framework
//! variant ran, and `resolve_id` maps a specifier before the import rewriter
//! looks at it. Plugins run in configuration order; the first `resolve_id`
//! that answers wins, while every `transform` sees the previous one's output.

use crate::compiler::{parse_program, ParseSyntax, ParsedModule};
use crate::config::PluginConfig;
use crate::dev::edit::{apply_edits, Edit};
use std::fmt;
use std::path::Path;
use swc_common::Spanned;
use swc_ecma_ast::{Expr, MemberProp, Prop};
use swc_ecma_visit::{Visit, VisitWith};
use thiserror::Error;
use tracing::warn;

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

#[derive(Debug, Clone, Error)]
#[error("[{plugin}] {hook}: {message}")]
pub struct PluginError {
    pub plugin: String,
    pub hook: &'static str,
    pub message: String,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Return `Some(code)` to replace the module's code.
    fn transform(&self, _code: &str, _path: &Path) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Return `Some(specifier)` to replace an import specifier.
    fn resolve_id(&self, _specifier: &str) -> Option<String> {
        None
    }
}

/// Ordered plugin list.
#[derive(Default)]
pub struct PluginContainer {
    plugins: Vec<Box<dyn Plugin>>,
}

impl fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.plugins.iter().map(|p| p.name())).finish()
    }
}

impl PluginContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the built-in plugins named in `configs`.
    ///
    /// Unknown names are logged and skipped.
    pub fn from_config(configs: &[PluginConfig]) -> HookResult<Self> {
        let mut container = Self::new();
        for config in configs {
            match config.name.as_str() {
                "define" => container.add(Box::new(DefinePlugin::from_options(config)?)),
                "alias" => container.add(Box::new(AliasPlugin::from_options(config))),
                other => warn!(plugin = other, "unknown plugin ignored"),
            }
        }
        Ok(container)
    }

    pub fn add(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run `code` through every plugin's transform hook.
    pub fn transform(&self, code: String, path: &Path) -> HookResult<String> {
        let mut current = code;
        for plugin in &self.plugins {
            if let Some(next) = plugin.transform(&current, path)? {
                current = next;
            }
        }
        Ok(current)
    }

    /// First plugin answer for `specifier`.
    #[must_use]
    pub fn resolve_id(&self, specifier: &str) -> Option<String> {
        self.plugins.iter().find_map(|p| p.resolve_id(specifier))
    }
}

/// Replaces identifiers or dotted paths used as expressions with configured
/// expressions.
///
/// Matching works on the syntax tree: property names (`window.DEBUG`), object
/// keys, declarations, assignment targets, strings and comments are never
/// touched. Shorthand properties are expanded (`{ DEBUG }` becomes
/// `{ DEBUG: false }`).
pub struct DefinePlugin {
    replacements: Vec<(String, String)>,
}

impl DefinePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replacements: Vec::new(),
        }
    }

    pub fn define(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.replacements.push((from.into(), to.into()));
        self
    }

    fn from_options(config: &PluginConfig) -> HookResult<Self> {
        let mut plugin = Self::new();
        for (key, value) in &config.options {
            if !key.split('.').all(is_identifier) {
                return Err(PluginError {
                    plugin: "define".to_string(),
                    hook: "config",
                    message: format!("`{key}` is not an identifier or dotted path"),
                });
            }
            plugin = plugin.define(key, value);
        }
        Ok(plugin)
    }
}

impl Default for DefinePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn transform(&self, code: &str, path: &Path) -> HookResult<Option<String>> {
        if self.replacements.is_empty() {
            return Ok(None);
        }
        let parsed = parse_program(code, ParseSyntax::Js).map_err(|e| PluginError {
            plugin: "define".to_string(),
            hook: "transform",
            message: format!("{}: {e}", path.display()),
        })?;

        let mut collector = DefineCollector {
            replacements: &self.replacements,
            parsed: &parsed,
            edits: Vec::new(),
        };
        parsed.module.visit_with(&mut collector);

        if collector.edits.is_empty() {
            return Ok(None);
        }
        Ok(Some(apply_edits(code, collector.edits)))
    }
}

struct DefineCollector<'a> {
    replacements: &'a [(String, String)],
    parsed: &'a ParsedModule,
    edits: Vec<Edit>,
}

impl<'a> DefineCollector<'a> {
    fn lookup(&self, path: &str) -> Option<&'a str> {
        self.replacements
            .iter()
            .find(|(from, _)| from == path)
            .map(|(_, to)| to.as_str())
    }
}

impl Visit for DefineCollector<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Some(to) = dotted_path(expr).as_deref().and_then(|path| self.lookup(path)) {
            self.edits.push(Edit::new(self.parsed.range(expr.span()), to));
            return;
        }
        expr.visit_children_with(self);
    }

    fn visit_prop(&mut self, prop: &Prop) {
        if let Prop::Shorthand(ident) = prop {
            if let Some(to) = self.lookup(&ident.sym) {
                let end = self.parsed.offset(ident.span.hi);
                self.edits.push(Edit::insert(end, format!(": {to}")));
            }
            return;
        }
        prop.visit_children_with(self);
    }
}

/// `a`, `a.b.c` for identifier and non-computed member chains.
fn dotted_path(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(ident) => Some(ident.sym.to_string()),
        Expr::Member(member) => match &member.prop {
            MemberProp::Ident(prop) => Some(format!("{}.{}", dotted_path(&member.obj)?, prop.sym)),
            _ => None,
        },
        Expr::Paren(paren) => dotted_path(&paren.expr),
        _ => None,
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Maps specifier prefixes like `@/components` to other specifiers.
///
/// Targets starting with `./` are taken relative to the project root and
/// become root URLs (`./src` → `/src`).
pub struct AliasPlugin {
    aliases: Vec<(String, String)>,
}

impl AliasPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self { aliases: Vec::new() }
    }

    pub fn alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        let to = match to.strip_prefix("./") {
            Some(rest) => format!("/{rest}"),
            None => to,
        };
        self.aliases.push((from.into(), to));
        self
    }

    fn from_options(config: &PluginConfig) -> Self {
        config
            .options
            .iter()
            .fold(Self::new(), |plugin, (from, to)| plugin.alias(from, to))
    }
}

impl Default for AliasPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for AliasPlugin {
    fn name(&self) -> &str {
        "alias"
    }

    fn resolve_id(&self, specifier: &str) -> Option<String> {
        for (from, to) in &self.aliases {
            if specifier == from {
                return Some(to.clone());
            }
            if let Some(rest) = specifier.strip_prefix(from.as_str()) {
                if rest.starts_with('/') {
                    return Some(format!("{}{rest}", to.trim_end_matches('/')));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(name: &str, options: &[(&str, &str)]) -> PluginConfig {
        PluginConfig {
            name: name.to_string(),
            options: options
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_define_replaces_whole_identifiers() {
        let plugin = DefinePlugin::new().define("__VERSION__", "\"1.2.3\"");
        let out = plugin
            .transform(
                "log(__VERSION__, __VERSION__X, obj.__VERSION__);",
                Path::new("/a.js"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(out, "log(\"1.2.3\", __VERSION__X, obj.__VERSION__);");
    }

    #[test]
    fn test_define_dotted_paths() {
        let err = PluginContainer::from_config(&[config("define", &[("not-an-ident", "1")])]).unwrap_err();
        assert_eq!(err.plugin, "define");

        let container = PluginContainer::from_config(&[config(
            "define",
            &[("app.flags.beta", "true"), ("app", "window.app")],
        )])
        .unwrap();
        let out = container
            .transform("if (app.flags.beta) app.start();".to_string(), Path::new("/a.js"))
            .unwrap();
        assert_eq!(out, "if (true) window.app.start();");
    }

    #[test]
    fn test_define_leaves_strings_and_comments() {
        let plugin = DefinePlugin::new().define("DEBUG", "false");
        let out = plugin
            .transform(
                "// DEBUG build\nconsole.log(\"DEBUG mode\");\nif (DEBUG) {}\nconst opts = { DEBUG, level: DEBUG };",
                Path::new("/a.js"),
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            out,
            "// DEBUG build\nconsole.log(\"DEBUG mode\");\nif (false) {}\nconst opts = { DEBUG: false, level: false };"
        );
    }

    #[test]
    fn test_define_skips_bindings_and_keys() {
        let plugin = DefinePlugin::new().define("DEBUG", "false");
        let code = "let DEBUG = 1;\nDEBUG = 2;\nconst o = { DEBUG: 3 };\nwindow.DEBUG;";
        assert!(plugin.transform(code, Path::new("/a.js")).unwrap().is_none());
    }

    #[test]
    fn test_define_without_match_is_passthrough() {
        let plugin = DefinePlugin::new().define("FOO", "1");
        assert!(plugin.transform("bar()", Path::new("/a.js")).unwrap().is_none());
    }

    #[test]
    fn test_alias_resolution() {
        let plugin = AliasPlugin::new().alias("@", "./src").alias("react", "preact/compat");

        assert_eq!(plugin.resolve_id("@/components/Button"), Some("/src/components/Button".to_string()));
        assert_eq!(plugin.resolve_id("react"), Some("preact/compat".to_string()));
        assert_eq!(plugin.resolve_id("react-dom"), None);
        assert_eq!(plugin.resolve_id("@scope/pkg"), None);
    }

    #[test]
    fn test_unknown_plugins_are_skipped() {
        let container = PluginContainer::from_config(&[
            config("telemetry", &[]),
            config("alias", &[("~", "./")]),
        ])
        .unwrap();
        assert_eq!(container.len(), 1);
        assert_eq!(container.resolve_id("~/main.ts"), Some("/main.ts".to_string()));
    }
}
