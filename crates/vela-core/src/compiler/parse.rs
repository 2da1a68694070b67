//! Shared parse entry point for static analysis passes.
//!
//! Scanning, rewriting and CommonJS introspection all need the same thing: a
//! module AST plus a way to turn spans back into byte offsets of the input.

use super::{CompilerError, Diagnostic};
use std::ops::Range;
use std::path::Path;
use swc_common::{comments::Comments, sync::Lrc, BytePos, FileName, SourceFile, SourceMap, Span, Spanned};
use swc_ecma_ast::{EsVersion, Module, ModuleItem};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};

/// Source dialect to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSyntax {
    Js,
    Jsx,
    Ts,
    Tsx,
}

impl ParseSyntax {
    /// Dialect implied by a file extension; unknown extensions parse as plain JS.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("ts" | "mts" | "cts") => Self::Ts,
            Some("tsx") => Self::Tsx,
            Some("jsx") => Self::Jsx,
            _ => Self::Js,
        }
    }

    #[must_use]
    pub fn is_typescript(self) -> bool {
        matches!(self, Self::Ts | Self::Tsx)
    }

    #[must_use]
    pub fn is_jsx(self) -> bool {
        matches!(self, Self::Jsx | Self::Tsx)
    }

    pub(crate) fn to_syntax(self) -> Syntax {
        if self.is_typescript() {
            Syntax::Typescript(TsSyntax {
                tsx: self.is_jsx(),
                decorators: true,
                ..Default::default()
            })
        } else {
            Syntax::Es(EsSyntax {
                jsx: self.is_jsx(),
                decorators: true,
                allow_return_outside_function: true,
                ..Default::default()
            })
        }
    }
}

/// A parsed module and the position of its first byte in the source map.
#[derive(Debug)]
pub struct ParsedModule {
    pub module: Module,
    start: BytePos,
}

impl ParsedModule {
    /// Byte offset of `pos` in the parsed input.
    #[must_use]
    pub fn offset(&self, pos: BytePos) -> usize {
        (pos.0 - self.start.0) as usize
    }

    /// Byte range of `span` in the parsed input.
    #[must_use]
    pub fn range(&self, span: Span) -> Range<usize> {
        self.offset(span.lo)..self.offset(span.hi)
    }
}

/// Parse `source` as an ES module.
///
/// Recoverable parser errors are treated as failures so callers never act on a
/// partially understood file.
pub fn parse_module(source: &str, syntax: ParseSyntax) -> Result<ParsedModule, CompilerError> {
    parse_source(source, syntax, Goal::Module)
}

/// Parse `source` as a module, or failing that as a sloppy-mode script.
///
/// CommonJS files from npm often rely on non-strict code (`var package`,
/// legacy octal literals, `with`) that a module parse rejects. A script is
/// returned as a module whose body holds its statements. When both parses
/// fail the module error is returned.
pub fn parse_program(source: &str, syntax: ParseSyntax) -> Result<ParsedModule, CompilerError> {
    parse_module(source, syntax).or_else(|err| parse_source(source, syntax, Goal::Script).map_err(|_| err))
}

#[derive(Clone, Copy)]
enum Goal {
    Module,
    Script,
}

fn parse_source(source: &str, syntax: ParseSyntax, goal: Goal) -> Result<ParsedModule, CompilerError> {
    let cm: Lrc<SourceMap> = Lrc::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom("input".to_string())),
        source.to_string(),
    );
    let module = run_parser(&cm, &fm, syntax, None, goal)?;
    Ok(ParsedModule {
        module,
        start: fm.start_pos,
    })
}

/// Parse a file already registered in `cm` as a module, collecting every
/// parser error.
pub(crate) fn parse_file(
    cm: &SourceMap,
    fm: &SourceFile,
    syntax: ParseSyntax,
    comments: Option<&dyn Comments>,
) -> Result<Module, CompilerError> {
    run_parser(cm, fm, syntax, comments, Goal::Module)
}

/// [`parse_file`] for a sloppy-mode script.
pub(crate) fn parse_script_file(
    cm: &SourceMap,
    fm: &SourceFile,
    syntax: ParseSyntax,
    comments: Option<&dyn Comments>,
) -> Result<Module, CompilerError> {
    run_parser(cm, fm, syntax, comments, Goal::Script)
}

fn run_parser(
    cm: &SourceMap,
    fm: &SourceFile,
    syntax: ParseSyntax,
    comments: Option<&dyn Comments>,
    goal: Goal,
) -> Result<Module, CompilerError> {
    let lexer = Lexer::new(syntax.to_syntax(), EsVersion::EsNext, StringInput::from(fm), comments);
    let mut parser = Parser::new_from(lexer);

    let diagnostic = |error: &swc_ecma_parser::error::Error| {
        let loc = cm.lookup_char_pos(error.span().lo);
        Diagnostic::error(error.kind().msg().to_string()).at(loc.line as u32, loc.col.0 as u32 + 1)
    };

    let parsed = match goal {
        Goal::Module => parser.parse_module(),
        Goal::Script => parser.parse_script().map(|script| Module {
            span: script.span,
            body: script.body.into_iter().map(ModuleItem::Stmt).collect(),
            shebang: script.shebang,
        }),
    };
    let module = parsed.map_err(|e| CompilerError::Syntax(vec![diagnostic(&e)]))?;

    let errors = parser.take_errors();
    if errors.is_empty() {
        Ok(module)
    } else {
        Err(CompilerError::Syntax(errors.iter().map(diagnostic).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swc_ecma_ast::{ModuleDecl, ModuleItem};

    #[test]
    fn test_from_path() {
        assert_eq!(ParseSyntax::from_path(Path::new("a.tsx")), ParseSyntax::Tsx);
        assert_eq!(ParseSyntax::from_path(Path::new("a.mts")), ParseSyntax::Ts);
        assert_eq!(ParseSyntax::from_path(Path::new("a.jsx")), ParseSyntax::Jsx);
        assert_eq!(ParseSyntax::from_path(Path::new("a.cjs")), ParseSyntax::Js);
    }

    #[test]
    fn test_ranges_are_input_offsets() {
        let source = "const a = 1;\nimport x from 'pkg';";
        let parsed = parse_module(source, ParseSyntax::Js).unwrap();

        let import = parsed
            .module
            .body
            .iter()
            .find_map(|item| match item {
                ModuleItem::ModuleDecl(ModuleDecl::Import(decl)) => Some(decl),
                _ => None,
            })
            .unwrap();

        assert_eq!(&source[parsed.range(import.src.span)], "'pkg'");
    }

    #[test]
    fn test_parse_error_has_position() {
        let err = parse_module("const x = {", ParseSyntax::Js).unwrap_err();
        assert!(err.is_syntax());
        assert_eq!(err.diagnostics()[0].line, Some(1));
    }

    #[test]
    fn test_program_accepts_sloppy_commonjs() {
        let source = "var package = { version: 010 };\nmodule.exports = package;";
        assert!(parse_module(source, ParseSyntax::Js).is_err());

        let parsed = parse_program(source, ParseSyntax::Js).unwrap();
        assert_eq!(parsed.module.body.len(), 2);
    }

    #[test]
    fn test_program_prefers_module_parse() {
        let parsed = parse_program("import x from 'x';\nexport default x;", ParseSyntax::Js).unwrap();
        assert!(matches!(parsed.module.body[0], ModuleItem::ModuleDecl(_)));
    }

    #[test]
    fn test_allows_top_level_return_in_js() {
        assert!(parse_module("if (x) return;\nmodule.exports = 1;", ParseSyntax::Js).is_ok());
    }
}
