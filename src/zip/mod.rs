//! ZIP archive parsing over lazily fetched remote files.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Central directory parsing from any `Read + Seek` source
//! - [`probe`]: Locating the central directory of a remote archive with as few
//!   Range requests as possible
//! - [`extractor`]: Listing and reading entries of a remote archive
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Everything needed to list an archive sits at its end, so only the tail
//! has to be downloaded.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB
//! - STORED and DEFLATE entries
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod extractor;
mod parser;
mod probe;
mod structures;

pub use extractor::RemoteZip;
pub use parser::ZipParser;
pub use probe::{ProbeReport, ZipDirectoryProbe};
pub use structures::*;
