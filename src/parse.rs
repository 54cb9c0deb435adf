//! Parsing of `ldd` / `otool -L` output into library paths.

use std::path::Path;

use crate::query::QueryTool;

/// What a single line of dependency-query output refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineTarget {
    /// A library that exists on disk.
    Library(String),
    /// A known non-library line (vdso entry, static binary marker).
    Ignored,
    /// Nothing on the line could be matched to a file.
    Unresolved,
}

/// Find the library a tokenized output line refers to.
///
/// `preferred` is the column where well-formed output puts the path
/// (`2` for `name => path (addr)`, `0` for `path (addr)`). When that
/// column does not exist on disk, every field is tried in order and the
/// first regular file or symlink wins. Directories are never libraries.
pub fn classify_line(fields: &[&str], preferred: usize) -> LineTarget {
    if let Some(field) = fields.get(preferred) {
        if Path::new(field).exists() {
            return LineTarget::Library((*field).to_string());
        }
    }

    for field in fields {
        let path = Path::new(field);
        if path.exists() && (path.is_file() || path.is_symlink()) {
            return LineTarget::Library((*field).to_string());
        }
    }

    if fields.len() == 2 && fields[0].contains("linux-vdso") {
        return LineTarget::Ignored;
    }
    if fields == ["statically", "linked"] {
        return LineTarget::Ignored;
    }

    LineTarget::Unresolved
}

/// Like [`classify_line`], but warns about lines that could not be resolved.
pub fn extract_library(fields: &[&str], preferred: usize) -> Option<String> {
    match classify_line(fields, preferred) {
        LineTarget::Library(lib) => Some(lib),
        LineTarget::Ignored => None,
        LineTarget::Unresolved => {
            tracing::warn!(line = ?fields, "failed to determine target in line");
            None
        }
    }
}

/// Parse the full output of one dependency-query invocation.
///
/// Example `ldd` output:
/// ```text
///     linux-vdso.so.1 (0x00007ffc8d5f6000)
///     libtinfo.so.6 => /lib/x86_64-linux-gnu/libtinfo.so.6 (0x00007f2b1c400000)
///     libc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x00007f2b1c000000)
///     /lib64/ld-linux-x86-64.so.2 (0x00007f2b1c6a0000)
/// ```
///
/// Example `otool -L` output (first line names the queried file):
/// ```text
/// /usr/local/bin/app:
///     /usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1311.0.0)
/// ```
///
/// The result may contain duplicates.
pub fn parse_query_output(output: &str, tool: QueryTool) -> Vec<String> {
    let skip = usize::from(tool.has_header());
    let mut libs = Vec::new();

    for line in output.lines().skip(skip).map(str::trim) {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();

        let lib = if line.contains("=>") {
            // `libXYZ => (0x5334534)` is a virtual library
            if fields.len() == 3 {
                continue;
            }
            extract_library(&fields, 2)
        } else {
            extract_library(&fields, 0)
        };

        libs.extend(lib);
    }

    libs
}
