//! Copying resolved libraries and their aliases into a destination.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::Resolved;

/// Copy a file into `dest_dir` under its own name, keeping its permission bits.
///
/// Creates `dest_dir` if needed and overwrites an existing copy.
/// Returns `Ok(None)` if `src` no longer exists.
pub fn copy_file_to(src: &Path, dest_dir: &Path) -> Result<Option<PathBuf>> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    if !src.exists() {
        return Ok(None);
    }

    let name = src
        .file_name()
        .with_context(|| format!("Path has no file name: {}", src.display()))?;
    let dest = dest_dir.join(name);

    // fs::copy would write through a symlink, possibly onto `src` itself
    if dest.is_symlink() {
        fs::remove_file(&dest)
            .with_context(|| format!("Failed to replace symlink: {}", dest.display()))?;
    }

    fs::copy(src, &dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    let perms = fs::metadata(src)
        .with_context(|| format!("Failed to read metadata: {}", src.display()))?
        .permissions();
    fs::set_permissions(&dest, perms)
        .with_context(|| format!("Failed to set permissions: {}", dest.display()))?;

    Ok(Some(dest))
}

/// Create a symlink if it doesn't already exist.
///
/// Returns `Ok(true)` if the symlink was created, `Ok(false)` if something
/// (even a dangling symlink) is already at `link`.
pub fn create_symlink_if_missing(target: &Path, link: &Path) -> Result<bool> {
    if link.exists() || link.is_symlink() {
        return Ok(false);
    }
    std::os::unix::fs::symlink(target, link).with_context(|| {
        format!(
            "Failed to create symlink {} -> {}",
            link.display(),
            target.display()
        )
    })?;
    Ok(true)
}

/// What [`materialize`] put into the destination.
#[derive(Debug, Default)]
pub struct Materialized {
    pub copied: Vec<PathBuf>,
    /// Symlinks created this run; pre-existing ones are left alone and not listed.
    pub linked: Vec<PathBuf>,
}

/// Copy the resolved libraries into `dest_dir` and recreate their aliases.
///
/// Each alias becomes a symlink in `dest_dir` pointing at the canonical
/// source path of its library.
pub fn materialize(resolved: &Resolved, dest_dir: &Path) -> Result<Materialized> {
    let mut done = Materialized::default();

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    for lib in &resolved.libraries {
        if let Some(dest) = copy_file_to(lib, dest_dir)? {
            done.copied.push(dest);
        }
    }

    for (target, aliases) in &resolved.aliases {
        for alias in aliases {
            let link = dest_dir.join(alias);
            if create_symlink_if_missing(target, &link)? {
                tracing::debug!(link = %link.display(), target = %target.display(), "created alias");
                done.linked.push(link);
            }
        }
    }

    Ok(done)
}

/// Copy the seed files themselves into `dest_dir`.
pub fn copy_inputs(files: &[PathBuf], dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    for file in files {
        match copy_file_to(file, dest_dir)? {
            Some(dest) => copied.push(dest),
            None => tracing::warn!(file = %file.display(), "input file does not exist, not copied"),
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn create_mock_library(path: &Path, contents: &str, mode: u32) {
        fs::write(path, contents).unwrap();
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(mode);
        fs::set_permissions(path, perms).unwrap();
    }

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_copy_preserves_mode_and_creates_dir() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("libfoo.so.1");
        create_mock_library(&src, "foo", 0o750);

        let dest_dir = temp.path().join("out/nested");
        let dest = copy_file_to(&src, &dest_dir).unwrap().unwrap();

        assert_eq!(dest, dest_dir.join("libfoo.so.1"));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "foo");
        assert_eq!(mode(&dest), 0o750);
    }

    #[test]
    fn test_copy_overwrites_existing() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("libfoo.so.1");
        create_mock_library(&src, "new", 0o755);
        let dest_dir = temp.path().join("out");
        fs::create_dir(&dest_dir).unwrap();
        create_mock_library(&dest_dir.join("libfoo.so.1"), "old", 0o644);

        copy_file_to(&src, &dest_dir).unwrap();
        assert_eq!(fs::read_to_string(dest_dir.join("libfoo.so.1")).unwrap(), "new");
        assert_eq!(mode(&dest_dir.join("libfoo.so.1")), 0o755);
    }

    #[test]
    fn test_copy_replaces_symlink_instead_of_writing_through() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("libfoo.so.1");
        create_mock_library(&src, "foo", 0o644);
        let dest_dir = temp.path().join("out");
        fs::create_dir(&dest_dir).unwrap();
        std::os::unix::fs::symlink(&src, dest_dir.join("libfoo.so.1")).unwrap();

        let dest = copy_file_to(&src, &dest_dir).unwrap().unwrap();
        assert!(!dest.is_symlink());
        assert_eq!(fs::read_to_string(&src).unwrap(), "foo");
        assert_eq!(fs::read_to_string(&dest).unwrap(), "foo");
    }

    #[test]
    fn test_copy_missing_source() {
        let temp = TempDir::new().unwrap();
        let result = copy_file_to(&temp.path().join("gone.so"), temp.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_create_symlink_if_missing() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("link");
        assert!(create_symlink_if_missing(Path::new("/nonexistent"), &link).unwrap());
        // dangling, but still counts as present
        assert!(!create_symlink_if_missing(Path::new("/elsewhere"), &link).unwrap());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("/nonexistent"));
    }

    #[test]
    fn test_materialize_links_point_at_source() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let lib = root.join("libbar.so.2");
        create_mock_library(&lib, "bar", 0o755);

        let mut resolved = Resolved {
            libraries: vec![lib.clone()],
            ..Default::default()
        };
        resolved.aliases.insert(
            lib.clone(),
            BTreeSet::from(["libbar.so".to_string(), "libbar.so.2.0".to_string()]),
        );

        let out = root.join("out");
        let done = materialize(&resolved, &out).unwrap();
        assert_eq!(done.copied, vec![out.join("libbar.so.2")]);
        assert_eq!(done.linked.len(), 2);
        assert_eq!(fs::read_link(out.join("libbar.so")).unwrap(), lib);
        assert_eq!(fs::read_link(out.join("libbar.so.2.0")).unwrap(), lib);

        let again = materialize(&resolved, &out).unwrap();
        assert_eq!(again.copied.len(), 1);
        assert!(again.linked.is_empty());
    }

    #[test]
    fn test_copy_inputs_skips_missing() {
        let temp = TempDir::new().unwrap();
        let app = temp.path().join("app");
        create_mock_library(&app, "#!/bin/sh\n", 0o755);
        let out = temp.path().join("out");

        let copied = copy_inputs(&[app, temp.path().join("gone")], &out).unwrap();
        assert_eq!(copied, vec![out.join("app")]);
        assert_eq!(mode(&out.join("app")), 0o755);
    }
}
