//! Shared library dependency collection for packaging.
//!
//! Runs `ldd` (or `otool -L` on macOS) on a set of binaries, follows the
//! reported libraries to a fixed point, and copies the result, along with
//! any symlink names the libraries were found under, into one directory.
//!
//! The query tool sits behind [`DependencyQuery`], so the closure logic can
//! be driven by canned output in tests.

mod closure;
mod config;
mod copy;
mod parse;
mod paths;
mod pipeline;
mod query;

pub use closure::{advance, resolve_closure, Advance, ClosureOptions, ClosureOutcome, StopReason};
pub use config::Config;
pub use copy::{copy_file_to, copy_inputs, create_symlink_if_missing, materialize, Materialized};
pub use parse::{classify_line, extract_library, parse_query_output, LineTarget};
pub use paths::{resolve, AliasMap, ExcludeSet, Resolved};
pub use pipeline::{collect, install, run_with, system_query, Collected, Summary};
pub use query::{
    query_dependencies, CannedQuery, DependencyQuery, QueryError, QueryFailure, QueryReport,
    QueryTool, SystemQuery,
};
