//! Module wrappers for non-script files.

/// JS module that injects `css` into the document and replaces it in place on
/// re-execution, keyed by `id`.
#[must_use]
pub fn css_module(css: &str, id: &str) -> String {
    let css_literal = serde_json::to_string(css).unwrap_or_else(|_| "\"\"".to_string());
    let id_literal = serde_json::to_string(id).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"const id = {id_literal};
const css = {css_literal};
let style = document.querySelector(`style[data-vela-id="${{CSS.escape(id)}}"]`);
if (!style) {{
  style = document.createElement("style");
  style.setAttribute("data-vela-id", id);
  document.head.appendChild(style);
}}
style.textContent = css;
if (import.meta.hot) {{
  import.meta.hot.accept();
  import.meta.hot.prune(() => style.remove());
}}
export default css;
"#
    )
}

/// `export default <json>`; rejects invalid JSON.
pub fn json_module(json: &str) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    Ok(format!("export default {value};\n"))
}

/// Module whose default export is the URL an asset is served from.
#[must_use]
pub fn asset_url_module(url: &str) -> String {
    let literal = serde_json::to_string(url).unwrap_or_else(|_| "\"\"".to_string());
    format!("export default {literal};\n")
}
