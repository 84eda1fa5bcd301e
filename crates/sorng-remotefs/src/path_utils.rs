//! Remote path string handling.
//!
//! Remote paths always use `/` regardless of the local or remote OS. The
//! directory tree is represented purely by composing and decomposing these
//! strings; no path object holds a reference to its parent.

pub const ROOT: &str = "/";

/// Check if a remote path is absolute.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Collapse duplicate separators, resolve `.` / `..` and strip the trailing `/`.
///
/// `..` never climbs above the root.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        ROOT.to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

/// Join a remote directory and a component. An absolute component wins.
pub fn join(base: &str, component: &str) -> String {
    if is_absolute(component) {
        return normalize(component);
    }
    if base.ends_with('/') {
        normalize(&format!("{}{}", base, component))
    } else {
        normalize(&format!("{}/{}", base, component))
    }
}

/// Parent directory. The parent of the root is the root.
pub fn parent(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(pos) => path[..pos].to_string(),
    }
}

/// Last component; empty for the root.
pub fn file_name(path: &str) -> String {
    let path = normalize(path);
    match path.rfind('/') {
        Some(pos) => path[pos + 1..].to_string(),
        None => path,
    }
}

pub fn is_root(path: &str) -> bool {
    normalize(path) == ROOT
}
