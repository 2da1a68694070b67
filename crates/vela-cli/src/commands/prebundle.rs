//! `vela prebundle` command implementation.

use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use std::sync::Arc;
use vela_core::dev::{PreBundleMap, PreBundler};

#[derive(Debug, Clone)]
pub struct PrebundleAction {
    pub root: PathBuf,
    pub config: Option<PathBuf>,
    pub force: bool,
    pub json: bool,
}

pub async fn run(action: PrebundleAction) -> Result<()> {
    let (mut config, _) = super::load_config(&action.root, action.config.as_deref())?;
    let bundler = super::locate_bundler(&mut config);
    let prebundler = PreBundler::new(&config, Arc::new(bundler));

    let entries: Vec<PathBuf> = config.entry.iter().map(|e| config.root.join(e)).collect();
    let mut wanted = prebundler.discover(&entries);
    if action.force {
        wanted.extend(prebundler.invalidate());
    }

    let map = prebundler.pre_bundle(&wanted).await.into_diagnostic()?;
    if action.json {
        println!("{}", serde_json::to_string_pretty(&*map).into_diagnostic()?);
    } else {
        print!("{}", render(&map));
    }
    Ok(())
}

fn render(map: &PreBundleMap) -> String {
    let mut out = String::new();
    if map.entries.is_empty() && map.skipped.is_empty() {
        out.push_str("  No dependencies to pre-bundle\n");
        return out;
    }
    let width = map.specifiers().iter().map(String::len).max().unwrap_or(0);
    for (specifier, entry) in &map.entries {
        out.push_str(&format!(
            "  {specifier:<width$}  {}  ({})\n",
            entry.url,
            entry.source.display()
        ));
    }
    for specifier in &map.skipped {
        out.push_str(&format!("  {specifier:<width$}  skipped, served from {}\n", map.passthrough_url(specifier)));
    }
    out.push_str(&format!("  output: {}\n", map.out_dir.display()));
    out
}
