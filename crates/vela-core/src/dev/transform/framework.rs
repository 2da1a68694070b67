//! Framework tags and variant selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// UI framework whose file conventions a transform variant understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    /// Plain JS/TS, classic JSX, CSS and JSON modules.
    #[default]
    Vanilla,
    /// JSX/TSX through the automatic runtime from `react`.
    React,
    /// JSX/TSX through the automatic runtime from `preact`.
    Preact,
    /// Single-file components (`.vue`).
    Vue,
}

const VANILLA_EXTENSIONS: &[&str] = &[
    "js", "mjs", "cjs", "ts", "mts", "cts", "jsx", "tsx", "css", "json",
];

impl Framework {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vanilla => "vanilla",
            Self::React => "react",
            Self::Preact => "preact",
            Self::Vue => "vue",
        }
    }

    /// Extensions this variant transforms itself rather than handing to vanilla.
    #[must_use]
    pub fn owns_extension(self, ext: &str) -> bool {
        match self {
            Self::Vanilla => VANILLA_EXTENSIONS.contains(&ext),
            Self::React | Self::Preact => matches!(ext, "jsx" | "tsx"),
            Self::Vue => ext == "vue",
        }
    }

    /// Variant that handles `path` when the project uses `self`.
    ///
    /// `.vue` files always go to the Vue variant; anything the project variant
    /// does not own degrades to vanilla.
    #[must_use]
    pub fn for_file(self, path: &Path) -> Self {
        let ext = extension(path);
        if ext == "vue" {
            Self::Vue
        } else if self.owns_extension(&ext) {
            self
        } else {
            Self::Vanilla
        }
    }

    /// Project framework implied by the dependencies in a root `package.json`.
    #[must_use]
    pub fn detect(root: &Path) -> Self {
        let Some(manifest) = crate::resolver::read_package_json(&root.join("package.json")) else {
            return Self::Vanilla;
        };
        let has = |name: &str| {
            ["dependencies", "devDependencies", "peerDependencies"]
                .iter()
                .any(|field| manifest.get(*field).and_then(|d| d.get(name)).is_some())
        };

        if has("vue") {
            Self::Vue
        } else if has("preact") {
            Self::Preact
        } else if has("react") {
            Self::React
        } else {
            Self::Vanilla
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}
