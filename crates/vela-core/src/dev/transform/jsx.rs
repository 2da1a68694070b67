//! React and Preact variants: JSX through the automatic runtime.

use super::{vanilla, TransformError, TransformRequest, VariantOutput};
use crate::compiler::{CompilerBackend, TranspileOptions};

/// Compile `.jsx`/`.tsx` with `<import_source>/jsx-runtime`.
pub(crate) fn transform(
    compiler: &dyn CompilerBackend,
    request: &TransformRequest,
    import_source: &str,
) -> Result<VariantOutput, TransformError> {
    if !matches!(request.extension().as_str(), "jsx" | "tsx") {
        return vanilla::transform(compiler, request);
    }
    let options = TranspileOptions::new(&request.file_path).automatic_jsx(import_source);
    vanilla::compile(compiler, request, options)
}
