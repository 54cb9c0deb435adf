//! Exclusion filtering and symlink resolution of library paths.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Regex patterns that drop a library when they match anywhere in its path.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    /// The first pattern that matches `lib`, tested in order.
    #[must_use]
    pub fn first_match(&self, lib: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(lib))
            .map(Regex::as_str)
    }
}

/// Alias base names recorded per canonical library path.
///
/// `/lib/libbar.so -> /lib/libbar.so.2` is stored as
/// `/lib/libbar.so.2 => {"libbar.so"}`. Every alias of a target is kept.
pub type AliasMap = BTreeMap<PathBuf, BTreeSet<String>>;

/// Libraries ready to be copied.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Canonical paths, sorted and deduplicated.
    pub libraries: Vec<PathBuf>,
    pub aliases: AliasMap,
    /// `(library, pattern)` for every library dropped by an exclusion.
    pub excluded: Vec<(String, String)>,
}

/// Drop excluded libraries and resolve the rest to their real paths.
///
/// # Errors
///
/// Returns an error if a library can no longer be resolved on disk.
pub fn resolve<'a, I>(libs: I, excludes: &ExcludeSet) -> Result<Resolved>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut resolved = Resolved::default();
    let mut libraries = BTreeSet::new();

    for lib in libs {
        if let Some(pattern) = excludes.first_match(lib) {
            tracing::info!(lib = %lib, pattern, "excluding library");
            resolved.excluded.push((lib.clone(), pattern.to_string()));
            continue;
        }

        let original = Path::new(lib);
        let real = original
            .canonicalize()
            .with_context(|| format!("Failed to resolve library path: {}", lib))?;

        if real != original {
            if let (Some(alias), Some(target)) = (original.file_name(), real.file_name()) {
                // Same name means only a parent directory was a symlink
                if alias != target {
                    resolved
                        .aliases
                        .entry(real.clone())
                        .or_default()
                        .insert(alias.to_string_lossy().into_owned());
                }
            }
        }

        libraries.insert(real);
    }

    resolved.libraries = libraries.into_iter().collect();
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn create_mock_libdir(root: &Path) {
        fs::write(root.join("libfoo.so.1"), "foo").unwrap();
        fs::write(root.join("libbar.so.2"), "bar").unwrap();
        symlink(root.join("libbar.so.2"), root.join("libbar.so")).unwrap();
        symlink("libbar.so.2", root.join("libbar.so.2.0")).unwrap();
    }

    fn lib(root: &Path, name: &str) -> String {
        root.join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_exclude_set_search_semantics() {
        let excludes = ExcludeSet::new(["libbar", r"^/usr/lib"]).unwrap();
        assert_eq!(excludes.first_match("/opt/lib/libbar.so.2"), Some("libbar"));
        assert_eq!(excludes.first_match("/usr/lib/libbar.so"), Some("libbar"));
        assert_eq!(excludes.first_match("/usr/lib/libfoo.so"), Some(r"^/usr/lib"));
        assert_eq!(excludes.first_match("/opt/usr/lib/libfoo.so"), None);
    }

    #[test]
    fn test_exclude_set_invalid_pattern() {
        assert!(ExcludeSet::new(["lib("]).is_err());
    }

    #[test]
    fn test_resolve_records_aliases() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        create_mock_libdir(&root);

        let libs: BTreeSet<String> = ["libfoo.so.1", "libbar.so", "libbar.so.2.0"]
            .iter()
            .map(|name| lib(&root, name))
            .collect();
        let resolved = resolve(&libs, &ExcludeSet::default()).unwrap();

        assert_eq!(
            resolved.libraries,
            vec![root.join("libbar.so.2"), root.join("libfoo.so.1")]
        );
        let aliases = &resolved.aliases[&root.join("libbar.so.2")];
        assert_eq!(
            aliases.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["libbar.so", "libbar.so.2.0"]
        );
        assert_eq!(resolved.aliases.len(), 1);
    }

    #[test]
    fn test_resolve_excludes_before_resolution() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        create_mock_libdir(&root);

        let libs: BTreeSet<String> = ["libfoo.so.1", "libbar.so"]
            .iter()
            .map(|name| lib(&root, name))
            .collect();
        let excludes = ExcludeSet::new(["libbar"]).unwrap();
        let resolved = resolve(&libs, &excludes).unwrap();

        assert_eq!(resolved.libraries, vec![root.join("libfoo.so.1")]);
        assert!(resolved.aliases.is_empty());
        assert_eq!(
            resolved.excluded,
            vec![(lib(&root, "libbar.so"), "libbar".to_string())]
        );
    }

    #[test]
    fn test_resolve_directory_symlink_is_not_an_alias() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir(root.join("real")).unwrap();
        fs::write(root.join("real/libz.so.1"), "z").unwrap();
        symlink(root.join("real"), root.join("lib64")).unwrap();

        let libs = vec![lib(&root, "lib64/libz.so.1")];
        let resolved = resolve(&libs, &ExcludeSet::default()).unwrap();

        assert_eq!(resolved.libraries, vec![root.join("real/libz.so.1")]);
        assert!(resolved.aliases.is_empty());
    }

    #[test]
    fn test_resolve_missing_library_fails() {
        let libs = vec!["/nonexistent/libgone.so".to_string()];
        let err = resolve(&libs, &ExcludeSet::default()).unwrap_err();
        assert!(err.to_string().contains("libgone.so"));
    }
}
