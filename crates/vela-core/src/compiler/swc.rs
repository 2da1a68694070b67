//! SWC compiler backend.
//!
//! Strips TypeScript, lowers JSX and re-emits ES module code with an optional
//! source map. Module format conversion is not done here; see
//! `dev::transform::normalize`.

use super::parse::{parse_file, parse_script_file, ParseSyntax};
use super::{CompilerBackend, CompilerError, Jsx, TranspileOptions, TranspileOutput};
use swc_common::{comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, GLOBALS};
use swc_ecma_ast::{EsVersion, Module, ModuleItem, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_ecma_transforms_react::{react, Options as ReactOptions, Runtime};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::FoldWith;

/// Stateless: each call builds its own source map and globals, so one instance
/// is shared by all request tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwcBackend;

impl SwcBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CompilerBackend for SwcBackend {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn transpile(&self, options: &TranspileOptions, source: &str) -> Result<TranspileOutput, CompilerError> {
        if source.is_empty() {
            return Ok(TranspileOutput {
                code: String::new(),
                source_map: None,
            });
        }

        let syntax = ParseSyntax::from_path(options.file());
        let cm: Lrc<SourceMap> = Lrc::default();
        let fm = cm.new_source_file(
            Lrc::new(FileName::Custom(options.display_name().to_string())),
            source.to_string(),
        );
        let mut comments = SingleThreadedComments::default();
        let parsed = parse_file(&cm, &fm, syntax, Some(&comments));
        let module = match parsed {
            Ok(module) => module,
            // Plain JS may be a sloppy-mode CommonJS file.
            Err(err) if !syntax.is_typescript() => {
                comments = SingleThreadedComments::default();
                parse_script_file(&cm, &fm, syntax, Some(&comments)).map_err(|_| err)?
            }
            Err(err) => return Err(err),
        };

        let module = GLOBALS.set(&Globals::default(), || {
            lower(module, syntax, &options.jsx, &cm, &comments)
        });
        emit(&module, &cm, &comments, options.source_map)
    }
}

fn lower(
    module: Module,
    syntax: ParseSyntax,
    jsx: &Jsx,
    cm: &Lrc<SourceMap>,
    comments: &SingleThreadedComments,
) -> Module {
    let unresolved_mark = Mark::new();
    let top_level_mark = Mark::new();

    let mut program = Program::Module(module).fold_with(&mut resolver(
        unresolved_mark,
        top_level_mark,
        syntax.is_typescript(),
    ));
    if syntax.is_typescript() {
        program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
    }
    let mut module = match program {
        Program::Module(module) => module,
        Program::Script(script) => Module {
            span: script.span,
            body: script.body.into_iter().map(ModuleItem::Stmt).collect(),
            shebang: script.shebang,
        },
    };

    if syntax.is_jsx() {
        let (runtime, import_source) = match jsx {
            Jsx::Classic => (Runtime::Classic, None),
            Jsx::Automatic { import_source } => (Runtime::Automatic, Some(import_source.clone())),
        };
        module = module.fold_with(&mut react(
            cm.clone(),
            Some(comments),
            ReactOptions {
                runtime: Some(runtime),
                import_source,
                ..ReactOptions::default()
            },
            top_level_mark,
            unresolved_mark,
        ));
    }

    module
        .fold_with(&mut hygiene())
        .fold_with(&mut fixer(Some(comments)))
}

fn emit(
    module: &Module,
    cm: &Lrc<SourceMap>,
    comments: &SingleThreadedComments,
    with_map: bool,
) -> Result<TranspileOutput, CompilerError> {
    let mut code = Vec::new();
    let mut mappings = Vec::new();
    {
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default().with_target(EsVersion::EsNext),
            cm: cm.clone(),
            comments: Some(comments),
            wr: JsWriter::new(cm.clone(), "\n", &mut code, Some(&mut mappings)),
        };
        emitter
            .emit_module(module)
            .map_err(|e| CompilerError::Emit(format!("codegen failed: {e}")))?;
    }
    let code = String::from_utf8(code).map_err(|e| CompilerError::Emit(format!("codegen produced invalid UTF-8: {e}")))?;

    let source_map = if with_map {
        let mut json = Vec::new();
        cm.build_source_map(&mappings)
            .to_writer(&mut json)
            .map_err(|e| CompilerError::Emit(format!("source map: {e}")))?;
        Some(String::from_utf8(json).map_err(|e| CompilerError::Emit(format!("source map: {e}")))?)
    } else {
        None
    };

    Ok(TranspileOutput { code, source_map })
}
