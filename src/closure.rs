//! Fixed-point iteration over dependency queries.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::query::{query_dependencies, DependencyQuery, QueryFailure};

/// How far to follow dependencies of dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosureOptions {
    /// Query the libraries found in one round again in the next.
    pub recursive: bool,
    /// Maximum recursive depth, `0` for unlimited.
    pub max_depth: usize,
}

/// Why the closure stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A round found nothing new.
    FixedPoint,
    /// Recursion was disabled, only one round ran.
    NonRecursive,
    /// The depth bound was reached with the closure possibly incomplete.
    DepthLimit(usize),
}

/// Result of [`advance`]: the state after one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    /// Files to query next round.
    pub frontier: BTreeSet<String>,
    pub accumulated: BTreeSet<String>,
    /// No library was added this round.
    pub converged: bool,
}

/// Fold one round of discovered libraries into the accumulated set.
///
/// Previously known libraries stay in the frontier, so the set only grows.
pub fn advance<I>(accumulated: &BTreeSet<String>, discovered: I) -> Advance
where
    I: IntoIterator<Item = String>,
{
    let mut frontier: BTreeSet<String> = discovered.into_iter().collect();
    frontier.extend(accumulated.iter().cloned());

    let converged = frontier == *accumulated;
    Advance {
        accumulated: frontier.clone(),
        frontier,
        converged,
    }
}

#[derive(Debug)]
pub struct ClosureOutcome {
    pub libraries: BTreeSet<String>,
    /// Number of query rounds that ran.
    pub rounds: usize,
    pub stop: StopReason,
    /// Every file that could not be queried, across all rounds.
    pub failures: Vec<QueryFailure>,
}

/// Collect the libraries needed by `initial_files`.
///
/// Without `recursive`, only the direct dependencies of the initial files
/// are returned. With it, the libraries found are queried again until a
/// round adds nothing, or until `max_depth` extra rounds have run.
pub fn resolve_closure<Q>(
    query: &Q,
    initial_files: &[PathBuf],
    options: ClosureOptions,
) -> ClosureOutcome
where
    Q: DependencyQuery + ?Sized,
{
    let mut accumulated = BTreeSet::new();
    let mut failures = Vec::new();
    let mut depth = 0;
    let mut rounds = 0;

    let mut report = query_dependencies(query, initial_files);
    let stop = loop {
        rounds += 1;
        failures.append(&mut report.failures);

        let step = advance(&accumulated, report.libraries);
        if step.converged {
            break StopReason::FixedPoint;
        }

        tracing::debug!(
            round = rounds,
            added = step.accumulated.len() - accumulated.len(),
            total = step.accumulated.len(),
            "closure round"
        );
        accumulated = step.accumulated;

        if !options.recursive {
            break StopReason::NonRecursive;
        }
        if options.max_depth > 0 && depth == options.max_depth {
            tracing::info!(depth, "reached max recursive depth");
            break StopReason::DepthLimit(depth);
        }

        depth += 1;
        report = query_dependencies(query, &step.frontier);
    };

    ClosureOutcome {
        libraries: accumulated,
        rounds,
        stop,
        failures,
    }
}
