use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::index::IndexUrls;
use crate::io::{CONTENT_CHUNK_SIZE, LazyFileConfig};
use crate::net::{FetcherConfig, MAX_TRIES_TO_FETCH};
use crate::pipeline::DEFAULT_CONCURRENCY;

#[derive(Parser, Debug)]
#[command(name = "pypidata")]
#[command(version)]
#[command(about = "Mirror package index metadata and inspect remote ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  pypidata fetch requests flask -o mirror      store both index pages of two projects\n  \
  pypidata fetch --from projects.txt -j 16     fetch every project listed in a file\n  \
  pypidata list https://example.com/a.whl      list files from a remote ZIP\n  \
  pypidata cat https://example.com/a.whl a-1.0.dist-info/METADATA")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,

    /// Attempts per request before a timing out request is given up
    #[arg(long, global = true, default_value_t = MAX_TRIES_TO_FETCH)]
    pub retries: u32,

    /// More logging (-vv => trace)
    #[arg(short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (-qq => errors only)
    #[arg(short = 'q', global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the simple and JSON pages of projects
    Fetch {
        /// Project names
        #[arg(value_name = "NAMES")]
        names: Vec<String>,

        /// Read additional project names from a file, one per line
        #[arg(long = "from", value_name = "FILE")]
        from: Option<PathBuf>,

        /// Store pages into this directory (default: only log them)
        #[arg(short = 'o', long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Number of projects fetched concurrently
        #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
        jobs: usize,

        /// Simple index URL template, `{name}` is replaced by the project name
        #[arg(long, value_name = "TEMPLATE")]
        index_url: Option<String>,

        /// JSON API URL template, `{name}` is replaced by the project name
        #[arg(long, value_name = "TEMPLATE")]
        json_url: Option<String>,
    },

    /// List files in a remote ZIP archive
    List {
        /// HTTP URL of the archive
        url: String,

        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'l', long)]
        long: bool,

        /// Bytes fetched per Range request
        #[arg(long, default_value_t = CONTENT_CHUNK_SIZE)]
        chunk_size: u64,
    },

    /// Write one file of a remote ZIP archive to stdout
    Cat {
        /// HTTP URL of the archive
        url: String,

        /// Path of the file inside the archive
        member: String,

        /// Bytes fetched per Range request
        #[arg(long, default_value_t = CONTENT_CHUNK_SIZE)]
        chunk_size: u64,
    },
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Default log filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (q, _) if q > 1 => "error",
            (1, _) => "warn",
            (_, 0) => "info",
            (_, 1) => "debug",
            _ => "trace",
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_secs(self.timeout),
            max_attempts: self.retries.max(1),
            ..FetcherConfig::default()
        }
    }
}

impl Command {
    pub fn lazy_file_config(&self) -> LazyFileConfig {
        match self {
            Command::List { chunk_size, .. } | Command::Cat { chunk_size, .. } => LazyFileConfig {
                chunk_size: (*chunk_size).max(1),
            },
            Command::Fetch { .. } => LazyFileConfig::default(),
        }
    }

    pub fn index_urls(&self) -> IndexUrls {
        let mut urls = IndexUrls::default();
        if let Command::Fetch {
            index_url,
            json_url,
            ..
        } = self
        {
            if let Some(simple) = index_url {
                urls.simple = simple.clone();
            }
            if let Some(json) = json_url {
                urls.json = json.clone();
            }
        }
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fetch_command() {
        let cli = Cli::parse_from(["pypidata", "fetch", "requests", "flask", "-j", "4", "-o", "out"]);
        match &cli.command {
            Command::Fetch {
                names,
                jobs,
                output,
                ..
            } => {
                assert_eq!(names, &["requests", "flask"]);
                assert_eq!(*jobs, 4);
                assert_eq!(output.as_deref(), Some(std::path::Path::new("out")));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.log_filter(), "info");
        assert_eq!(cli.fetcher_config().max_attempts, MAX_TRIES_TO_FETCH);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["pypidata", "list", "https://x/a.zip", "--retries", "2", "-vv"]);
        assert_eq!(cli.fetcher_config().max_attempts, 2);
        assert_eq!(cli.log_filter(), "trace");
        assert_eq!(cli.command.lazy_file_config().chunk_size, CONTENT_CHUNK_SIZE);
    }

    #[test]
    fn custom_index_templates() {
        let cli = Cli::parse_from([
            "pypidata",
            "fetch",
            "x",
            "--index-url",
            "http://mirror/simple/{name}/",
        ]);
        let urls = cli.command.index_urls();
        assert_eq!(urls.simple, "http://mirror/simple/{name}/");
        assert_eq!(urls.json, IndexUrls::default().json);
    }
}
