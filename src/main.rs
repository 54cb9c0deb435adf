//! CLI for libgather.
//!
//! Pipeline: query deps -> follow to fixed point -> drop excluded -> copy + alias.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use libgather::{
    copy_inputs, ClosureOptions, Collected, Config, ExcludeSet, QueryTool, StopReason,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Cause-chain entries printed for a fatal error.
const MAX_ERROR_FRAMES: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "libgather", version, about = "Copy the shared libraries a binary needs")]
struct Cli {
    /// Get linked targets for this list of files.
    #[arg(short, long, num_args = 1.., required = true)]
    files: Vec<PathBuf>,

    /// Destination directory [default: current directory].
    #[arg(short, long)]
    destination: Option<PathBuf>,

    /// Recursive ldd/otool resolution.
    #[arg(short, long, default_value_t = false)]
    recursive: bool,

    /// Max recursive depth (0 == unlimited).
    #[arg(long, default_value_t = 0)]
    max_depth: usize,

    /// Regex patterns matched anywhere in a library path; matches are not copied,
    /// e.g. '^/usr/lib(64)?/lib.*\.so\.[0-9]$'.
    #[arg(short, long, num_args = 1..)]
    exclude: Vec<String>,

    /// Copy the input files to the destination too.
    #[arg(long, default_value_t = false)]
    copy_files: bool,

    /// Dependency-query tool [default: otool on macOS, ldd elsewhere].
    #[arg(long, value_enum, env = "LIBGATHER_TOOL")]
    tool: Option<Tool>,

    /// Seconds before a hung query is killed (0 == no limit).
    #[arg(long, env = "LIBGATHER_TIMEOUT", default_value_t = 60)]
    timeout: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Tool {
    Ldd,
    Otool,
}

impl From<Tool> for QueryTool {
    fn from(tool: Tool) -> Self {
        match tool {
            Tool::Ldd => QueryTool::Ldd,
            Tool::Otool => QueryTool::Otool,
        }
    }
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let destination = match self.destination {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to read current directory")?,
        };

        let mut config = Config::new(self.files, destination);
        config.closure = ClosureOptions {
            recursive: self.recursive,
            max_depth: self.max_depth,
        };
        config.excludes = ExcludeSet::new(&self.exclude).context("Invalid --exclude pattern")?;
        config.copy_files = self.copy_files;
        config.tool = self.tool.map_or_else(QueryTool::host, QueryTool::from);
        config.timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    exit_code(cli.into_config().and_then(|config| gather(&config)))
}

/// Print each listing before the step it describes, so a failed copy
/// still shows what was about to be copied.
fn gather(config: &Config) -> anyhow::Result<()> {
    let query = libgather::system_query(config);
    let Collected { closure, resolved } = libgather::collect(config, &query)?;

    if let StopReason::DepthLimit(depth) = closure.stop {
        println!("\nReached max recursive depth of {}...", depth);
    }
    if !closure.failures.is_empty() {
        let failed: Vec<&Path> = closure.failures.iter().map(|f| f.file.as_path()).collect();
        print_list("Files that could not be queried", &failed);
    }

    let dest = config.destination.display();
    if config.copy_files {
        print_list(&format!("Files copied to {}", dest), &config.files);
        copy_inputs(&config.files, &config.destination)?;
    }

    print_list(&format!("Libraries copied to {}", dest), &resolved.libraries);
    libgather::install(config, &resolved)?;
    Ok(())
}

fn exit_code(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            for cause in err.chain().skip(1).take(MAX_ERROR_FRAMES) {
                eprintln!("  caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}

fn print_list<P: AsRef<Path>>(title: &str, items: &[P]) {
    println!();
    println!("{}:", title);
    for item in items {
        println!("\t{}", item.as_ref().display());
    }
    println!();
}
