//! Random access to remote objects.
//!
//! - [`coverage`]: which byte ranges are already local
//! - [`scratch`]: the local byte store those ranges are written into
//! - [`lazy`]: the file-like reader that ties both to the fetch layer

pub mod coverage;
mod lazy;
mod scratch;

pub use coverage::{CoverageTracker, FetchPlan, Interval};
pub use lazy::{CONTENT_CHUNK_SIZE, CoveredView, LazyFileConfig, LazyRemoteFile, RemoteResource};
pub use scratch::{ScratchBuffer, Stay};
