//! Default variant: plain JS/TS with classic JSX, CSS and JSON modules.

use super::assets::{css_module, json_module};
use super::{TransformError, TransformRequest, VariantOutput};
use crate::compiler::{CompilerBackend, TranspileOptions};

pub(crate) fn transform(
    compiler: &dyn CompilerBackend,
    request: &TransformRequest,
) -> Result<VariantOutput, TransformError> {
    let ext = request.extension();
    match ext.as_str() {
        "css" => Ok(VariantOutput {
            code: css_module(&request.source, &request.file_path.to_string_lossy()),
            map: None,
        }),
        "json" => json_module(&request.source)
            .map(|code| VariantOutput { code, map: None })
            .map_err(|e| TransformError::Json {
                file: request.file_path.clone(),
                message: e.to_string(),
            }),
        _ if compiler.supports_extension(&ext) => {
            compile(compiler, request, TranspileOptions::new(&request.file_path))
        }
        _ => Err(TransformError::Unsupported {
            file: request.file_path.clone(),
            extension: ext,
        }),
    }
}

/// Compile with `options`, adding a source map in dev mode.
pub(crate) fn compile(
    compiler: &dyn CompilerBackend,
    request: &TransformRequest,
    options: TranspileOptions,
) -> Result<VariantOutput, TransformError> {
    let options = options.source_map(request.dev);
    let output = compiler
        .transpile(&options, &request.source)
        .map_err(|e| TransformError::compile(&request.file_path, e))?;
    Ok(VariantOutput {
        code: output.code,
        map: output.source_map,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SwcBackend;
    use crate::dev::transform::Framework;

    fn run(path: &str, source: &str) -> Result<VariantOutput, TransformError> {
        transform(
            &SwcBackend::new(),
            &TransformRequest::new(path, source, Framework::Vanilla),
        )
    }

    #[test]
    fn test_typescript_stripped_with_map() {
        let out = run("/p/a.ts", "export const n: number = 1;").unwrap();
        assert!(out.code.contains("export const n = 1"));
        assert!(out.map.is_some());
    }

    #[test]
    fn test_classic_jsx() {
        let out = run("/p/App.jsx", "export default () => <b>x</b>;").unwrap();
        assert!(out.code.contains("React.createElement(\"b\""));
    }

    #[test]
    fn test_css_and_json() {
        assert!(run("/p/a.css", "body { color: red }").unwrap().code.contains("data-vela-id"));
        assert!(run("/p/a.json", "[1]").unwrap().code.starts_with("export default [1]"));
        assert!(matches!(run("/p/bad.json", "[1,").unwrap_err(), TransformError::Json { .. }));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = run("/p/logo.png", "").unwrap_err();
        assert!(matches!(err, TransformError::Unsupported { extension, .. } if extension == "png"));
    }
}
