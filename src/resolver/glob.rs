use super::ResolveError;
use globset::GlobBuilder;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// A file matched during glob expansion.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedPath {
    /// The path as it appears in the working tree, repository-relative.
    /// This is what gets intersected with the VCS tracked-file set.
    pub matched: PathBuf,

    /// The canonical path after one-shot symlink resolution,
    /// repository-relative when the target lives under the root. This is
    /// what gets recorded as the input path.
    pub recorded: PathBuf,

    /// Absolute canonical path used to open the file.
    pub absolute: PathBuf,
}

/// Expands `pattern` relative to `task_dir`, returning repository-relative
/// matches sorted by recorded path.
///
/// A pattern without wildcards that matches nothing is a hard error;
/// wildcard patterns may legitimately expand to nothing.
pub(crate) fn expand(
    repo_root: &Path,
    task_dir: &Path,
    pattern: &str,
) -> Result<Vec<ResolvedPath>, ResolveError> {
    let anchored = normalize(&task_dir.join(pattern));
    let is_literal = !pattern.contains(['*', '?', '[']);

    let mut results = if is_literal {
        expand_literal(repo_root, &anchored)
    } else {
        expand_wildcards(repo_root, &anchored, pattern)
    }?;

    if is_literal && results.is_empty() {
        return Err(ResolveError::NoMatch {
            pattern: pattern.to_string(),
        });
    }

    results.sort_by(|a, b| a.recorded.cmp(&b.recorded));
    Ok(results)
}

fn expand_literal(repo_root: &Path, anchored: &Path) -> Result<Vec<ResolvedPath>, ResolveError> {
    let mut results = vec![];
    match fs::metadata(anchored) {
        Ok(md) if md.is_dir() => {
            let mut files = vec![];
            collect_files(anchored, &mut files)?;
            for file in files {
                results.push(resolved(repo_root, file)?);
            }
        }
        Ok(_) => results.push(resolved(repo_root, anchored.to_path_buf())?),
        Err(_) => {}
    }
    Ok(results)
}

fn expand_wildcards(
    repo_root: &Path,
    anchored: &Path,
    pattern: &str,
) -> Result<Vec<ResolvedPath>, ResolveError> {
    let matcher = GlobBuilder::new(&anchored.to_string_lossy())
        .literal_separator(true)
        .build()
        .map_err(|err| ResolveError::Pattern {
            pattern: pattern.to_string(),
            err,
        })?
        .compile_matcher();

    // Walk from the deepest ancestor that contains no wildcard characters.
    let mut walk_root = PathBuf::new();
    for comp in anchored.components() {
        if comp.as_os_str().to_string_lossy().contains(['*', '?', '[']) {
            break;
        }
        walk_root.push(comp);
    }

    let mut candidates = vec![];
    if walk_root.is_dir() {
        collect_files(&walk_root, &mut candidates)?;
    }

    let mut results = vec![];
    for candidate in candidates {
        if matcher.is_match(&candidate) {
            results.push(resolved(repo_root, candidate)?);
        }
    }
    Ok(results)
}

/// Recursively collects regular files beneath `dir`. Symlinks are classified
/// by their target: file targets become candidates, directory targets are
/// not descended into.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ResolveError> {
    let entries = fs::read_dir(dir).map_err(|err| ResolveError::Io {
        path: dir.to_path_buf(),
        err,
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| ResolveError::Io {
            path: dir.to_path_buf(),
            err,
        })?;
        let path = entry.path();

        // Never treat VCS state or the engine's own registry as inputs.
        if path
            .file_name()
            .is_some_and(|n| n == ".git" || n == ".chronicle")
        {
            continue;
        }

        let file_type = entry.file_type().map_err(|err| ResolveError::Io {
            path: path.clone(),
            err,
        })?;

        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        } else if file_type.is_symlink() {
            if let Ok(md) = fs::metadata(&path) {
                if md.is_file() {
                    out.push(path);
                }
            }
        }
    }
    Ok(())
}

fn resolved(repo_root: &Path, path: PathBuf) -> Result<ResolvedPath, ResolveError> {
    let canonical = fs::canonicalize(&path).map_err(|err| ResolveError::Io {
        path: path.clone(),
        err,
    })?;
    let canonical_root = fs::canonicalize(repo_root).map_err(|err| ResolveError::Io {
        path: repo_root.to_path_buf(),
        err,
    })?;

    let matched = path
        .strip_prefix(repo_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.clone());
    let recorded = canonical
        .strip_prefix(&canonical_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| canonical.clone());

    Ok(ResolvedPath {
        matched,
        recorded,
        absolute: canonical,
    })
}

/// Lexically normalizes a path, dropping `.` components and resolving `..`
/// against the accumulated prefix.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
