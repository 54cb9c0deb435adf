//! Run configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::closure::ClosureOptions;
use crate::paths::ExcludeSet;
use crate::query::QueryTool;

/// Everything a run needs, decided once up front.
///
/// The destination is always explicit here; defaulting it to the working
/// directory is the caller's business.
#[derive(Debug, Clone)]
pub struct Config {
    /// Executables and libraries to start from.
    pub files: Vec<PathBuf>,
    pub destination: PathBuf,
    pub closure: ClosureOptions,
    pub excludes: ExcludeSet,
    /// Also copy `files` themselves.
    pub copy_files: bool,
    pub tool: QueryTool,
    /// Per-invocation limit for the query tool.
    pub timeout: Option<Duration>,
}

impl Config {
    pub fn new(files: Vec<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            files,
            destination: destination.into(),
            closure: ClosureOptions::default(),
            excludes: ExcludeSet::default(),
            copy_files: false,
            tool: QueryTool::host(),
            timeout: None,
        }
    }
}
