//! Dependency queries through `ldd` or `otool -L`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::parse::parse_query_output;

/// Which dependency-query convention the host uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTool {
    /// `ldd <file>` (Linux, BSD).
    Ldd,
    /// `otool -L <file>` (macOS). Prints the queried file as a header line.
    Otool,
}

impl QueryTool {
    /// The convention of the platform this binary was built for.
    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            QueryTool::Otool
        } else {
            QueryTool::Ldd
        }
    }

    pub fn program(self) -> &'static str {
        match self {
            QueryTool::Ldd => "ldd",
            QueryTool::Otool => "otool",
        }
    }

    pub fn args(self) -> &'static [&'static str] {
        match self {
            QueryTool::Ldd => &[],
            QueryTool::Otool => &["-L"],
        }
    }

    /// Whether the first output line names the queried file.
    pub fn has_header(self) -> bool {
        matches!(self, QueryTool::Otool)
    }
}

impl fmt::Display for QueryTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Why a single file could not be queried.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("cannot resolve {}: {source}", path.display())]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run {program} - is it installed?")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error while running {program}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Capability to list the direct dependencies of one file.
///
/// `run` receives an already canonicalized path and returns the raw text
/// the tool printed. Parsing is done by the caller according to `tool()`.
pub trait DependencyQuery {
    fn tool(&self) -> QueryTool;

    fn run(&self, file: &Path) -> Result<String, QueryError>;
}

/// Runs the real dependency-query tool as a child process.
#[derive(Debug, Clone)]
pub struct SystemQuery {
    tool: QueryTool,
    program: OsString,
    timeout: Option<Duration>,
}

impl SystemQuery {
    pub fn new(tool: QueryTool) -> Self {
        Self {
            tool,
            program: tool.program().into(),
            timeout: None,
        }
    }

    /// Kill the tool if it has not exited after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a different executable that speaks the same output grammar.
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl DependencyQuery for SystemQuery {
    fn tool(&self) -> QueryTool {
        self.tool
    }

    fn run(&self, file: &Path) -> Result<String, QueryError> {
        let program = self.program_name();

        let mut child = Command::new(&self.program)
            .args(self.tool.args())
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| QueryError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Drain both pipes off-thread so a chatty tool cannot block on a full pipe
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let io_err = |source| QueryError::Io {
            program: program.clone(),
            source,
        };

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let status = match deadline {
            None => child.wait().map_err(io_err)?,
            Some(deadline) => loop {
                if let Some(status) = child.try_wait().map_err(io_err)? {
                    break status;
                }
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.timed_out(program));
                }
                thread::sleep(Duration::from_millis(10));
            },
        };

        // Grandchildren of the tool may still hold the pipes open
        let stdout = self.collect(&stdout, deadline, &program)?;
        let stderr = self.collect(&stderr, deadline, &program)?;
        let stdout = String::from_utf8_lossy(&stdout).into_owned();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            // These are legitimate "no dynamic dependencies" answers, not errors
            if is_static_answer(&stderr) || is_static_answer(&stdout) {
                return Ok(stdout);
            }
            return Err(QueryError::Failed {
                program,
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

impl SystemQuery {
    fn timed_out(&self, program: String) -> QueryError {
        QueryError::Timeout {
            program,
            timeout: self.timeout.unwrap_or_default(),
        }
    }

    /// Wait for a drained pipe, no later than `deadline`.
    fn collect(
        &self,
        rx: &Receiver<io::Result<Vec<u8>>>,
        deadline: Option<Instant>,
        program: &str,
    ) -> Result<Vec<u8>, QueryError> {
        let received = match deadline {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match received {
            Ok(read) => read.map_err(|source| QueryError::Io {
                program: program.to_string(),
                source,
            }),
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out(program.to_string())),
            Err(RecvTimeoutError::Disconnected) => Err(QueryError::Io {
                program: program.to_string(),
                source: io::Error::new(io::ErrorKind::Other, "output reader thread died"),
            }),
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let read = match pipe {
            Some(pipe) => read_pipe(pipe),
            None => Ok(Vec::new()),
        };
        // the receiver is gone if the query already timed out
        let _ = tx.send(read);
    });
    rx
}

fn read_pipe<R: Read>(mut pipe: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)?;
    Ok(buf)
}

fn is_static_answer(text: &str) -> bool {
    text.contains("not a dynamic executable")
        || text.contains("statically linked")
        || text.contains("not an object file")
}

/// Serves canned tool output keyed by canonical file path.
///
/// Files without an entry produce empty output, like a binary with no
/// dynamic dependencies.
#[derive(Debug, Clone)]
pub struct CannedQuery {
    tool: QueryTool,
    outputs: HashMap<PathBuf, String>,
}

impl CannedQuery {
    pub fn new(tool: QueryTool) -> Self {
        Self {
            tool,
            outputs: HashMap::new(),
        }
    }

    pub fn insert(&mut self, file: impl Into<PathBuf>, output: impl Into<String>) -> &mut Self {
        self.outputs.insert(file.into(), output.into());
        self
    }
}

impl DependencyQuery for CannedQuery {
    fn tool(&self) -> QueryTool {
        self.tool
    }

    fn run(&self, file: &Path) -> Result<String, QueryError> {
        Ok(self.outputs.get(file).cloned().unwrap_or_default())
    }
}

/// A file whose dependencies could not be listed.
#[derive(Debug)]
pub struct QueryFailure {
    pub file: PathBuf,
    pub error: QueryError,
}

/// Libraries found for a batch of files, plus the files that failed.
#[derive(Debug, Default)]
pub struct QueryReport {
    /// May contain duplicates; order is not significant.
    pub libraries: Vec<String>,
    pub failures: Vec<QueryFailure>,
}

/// Query the direct dependencies of every file in `files`.
///
/// Each file is canonicalized before the tool sees it. A failure on one
/// file is logged and recorded in the report; it never stops the batch.
pub fn query_dependencies<Q, I, P>(query: &Q, files: I) -> QueryReport
where
    Q: DependencyQuery + ?Sized,
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut report = QueryReport::default();

    for file in files {
        let file = file.as_ref();
        match query_one(query, file) {
            Ok(libs) => {
                tracing::debug!(file = %file.display(), found = libs.len(), "queried");
                report.libraries.extend(libs);
            }
            Err(error) => {
                tracing::warn!(file = %file.display(), %error, "dependency query failed");
                report.failures.push(QueryFailure {
                    file: file.to_path_buf(),
                    error,
                });
            }
        }
    }

    report
}

fn query_one<Q: DependencyQuery + ?Sized>(query: &Q, file: &Path) -> Result<Vec<String>, QueryError> {
    let real = file.canonicalize().map_err(|source| QueryError::Canonicalize {
        path: file.to_path_buf(),
        source,
    })?;
    let output = query.run(&real)?;
    Ok(parse_query_output(&output, query.tool()))
}
