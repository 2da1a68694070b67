use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path};

/// Replace `path` with `bytes` via a temp file in the same directory, so a
/// concurrent reader sees the old contents or the new, never a torn write.
///
/// # Errors
/// Returns an error if the directory cannot be created or the write fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let name = path.file_name().map_or_else(|| "out".into(), |n| n.to_string_lossy());
    let staging = dir.join(format!(".{name}.{}.partial", std::process::id()));

    let written = File::create(&staging).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    let result = written.and_then(|()| match fs::rename(&staging, path) {
        // Windows refuses to rename over an existing file.
        Err(_) if cfg!(windows) && path.exists() => fs::copy(&staging, path).map(drop),
        other => other,
    });
    if staging.exists() {
        let _ = fs::remove_file(&staging);
    }
    result
}

/// Convert a file under `root` into a `/`-separated URL path (`/src/main.ts`).
///
/// Returns `None` when `path` is not inside `root`.
#[must_use]
pub fn to_url_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut url = String::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                url.push('/');
                url.push_str(&part.to_string_lossy());
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    if url.is_empty() {
        url.push('/');
    }
    Some(url)
}

/// True if a `/`-separated URL path tries to climb out of its root.
#[must_use]
pub fn escapes_root(url_path: &str) -> bool {
    let mut depth: i32 = 0;
    for segment in url_path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => depth += 1,
        }
    }
    false
}
