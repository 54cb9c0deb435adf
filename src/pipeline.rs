//! One complete run: closure, resolution, copy.

use anyhow::Result;
use std::path::PathBuf;

use crate::closure::{resolve_closure, ClosureOutcome};
use crate::config::Config;
use crate::copy::{copy_inputs, materialize, Materialized};
use crate::paths::{resolve, Resolved};
use crate::query::{DependencyQuery, SystemQuery};

/// The libraries a run would copy, before anything touches the destination.
#[derive(Debug)]
pub struct Collected {
    pub closure: ClosureOutcome,
    pub resolved: Resolved,
}

/// Everything a run did, for reporting.
#[derive(Debug)]
pub struct Summary {
    pub closure: ClosureOutcome,
    pub resolved: Resolved,
    /// Seed files copied when `copy_files` is set.
    pub inputs: Vec<PathBuf>,
    pub materialized: Materialized,
}

/// The real query tool `config` asks for.
pub fn system_query(config: &Config) -> SystemQuery {
    SystemQuery::new(config.tool).with_timeout(config.timeout)
}

/// Run the whole pipeline with an arbitrary query capability.
///
/// # Errors
///
/// Query failures are recorded in the summary. Resolution and filesystem
/// errors abort the run.
pub fn run_with<Q>(config: &Config, query: &Q) -> Result<Summary>
where
    Q: DependencyQuery + ?Sized,
{
    let Collected { closure, resolved } = collect(config, query)?;

    let inputs = if config.copy_files {
        copy_inputs(&config.files, &config.destination)?
    } else {
        Vec::new()
    };
    let materialized = install(config, &resolved)?;

    Ok(Summary {
        closure,
        resolved,
        inputs,
        materialized,
    })
}

/// Resolve the closure and filter it, without writing anything.
pub fn collect<Q>(config: &Config, query: &Q) -> Result<Collected>
where
    Q: DependencyQuery + ?Sized,
{
    tracing::info!(
        files = config.files.len(),
        tool = %query.tool(),
        recursive = config.closure.recursive,
        max_depth = config.closure.max_depth,
        "resolving library closure"
    );

    let closure = resolve_closure(query, &config.files, config.closure);
    tracing::info!(
        libraries = closure.libraries.len(),
        rounds = closure.rounds,
        failures = closure.failures.len(),
        "closure resolved"
    );

    let resolved = resolve(&closure.libraries, &config.excludes)?;
    Ok(Collected { closure, resolved })
}

/// Copy collected libraries and their aliases into the destination.
pub fn install(config: &Config, resolved: &Resolved) -> Result<Materialized> {
    let materialized = materialize(resolved, &config.destination)?;
    tracing::info!(
        copied = materialized.copied.len(),
        linked = materialized.linked.len(),
        destination = %config.destination.display(),
        "libraries copied"
    );
    Ok(materialized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CannedQuery, QueryTool};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let app = root.join("app");
        let lib = root.join("libfoo.so.1");
        fs::write(&app, "").unwrap();
        fs::write(&lib, "").unwrap();

        let mut query = CannedQuery::new(QueryTool::Ldd);
        query.insert(&app, format!("{} (0x1000)", lib.display()));

        let config = Config::new(vec![app], root.join("out"));
        let collected = collect(&config, &query).unwrap();
        assert_eq!(collected.resolved.libraries, vec![lib]);
        assert!(!config.destination.exists());

        let materialized = install(&config, &collected.resolved).unwrap();
        assert_eq!(materialized.copied, vec![config.destination.join("libfoo.so.1")]);
    }
}
