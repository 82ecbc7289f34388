//! # pypidata
//!
//! Mirror package index metadata and inspect remote ZIP archives using
//! HTTP Range requests.
//!
//! The crate is built from a few layers:
//!
//! - [`net`]: a fetcher that retries timed out requests a bounded number of
//!   times and classifies every other result
//! - [`io`]: a lazy, seekable view of a remote file that only downloads the
//!   byte ranges it is asked for, and never the same range twice
//! - [`zip`]: locating and parsing the central directory of a remote archive
//!   with a handful of Range requests, then reading single entries
//! - [`pipeline`]: many concurrent producers feeding one serialized consumer
//! - [`index`] and [`sink`]: the package index pages and where they are stored
//!
//! ## Example
//!
//! ```no_run
//! use pypidata::{FetcherConfig, LazyFileConfig, RemoteZip, ResilientFetcher};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fetcher = ResilientFetcher::with_config(FetcherConfig::default())?;
//!     let url = "https://example.com/package-1.0-py3-none-any.whl";
//!     let mut archive = RemoteZip::open(fetcher, url, LazyFileConfig::default()).await?;
//!
//!     for entry in archive.entries() {
//!         println!("{}", entry.file_name);
//!     }
//!     if let Some(metadata) = archive.read_by_name("package-1.0.dist-info/METADATA").await? {
//!         println!("{}", String::from_utf8_lossy(&metadata));
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod index;
pub mod io;
pub mod net;
pub mod pipeline;
pub mod sink;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, PipelineStage, Result};
pub use index::{IndexUrls, PackageIndex, ProjectProducer, ProjectRecord, ProjectUpdate, normalize};
pub use io::{CONTENT_CHUNK_SIZE, CoverageTracker, Interval, LazyFileConfig, LazyRemoteFile};
pub use net::{FetchOutcome, FetchRequest, FetcherConfig, ResilientFetcher};
pub use pipeline::{Emitter, Pipeline, PipelineState, PipelineStats, Producer, Sink};
pub use sink::{DirectorySink, LogSink};
pub use self::zip::{CentralDirectory, RemoteZip, ZipDirectoryProbe, ZipFileEntry};
