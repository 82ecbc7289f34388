use tracing::debug;

use super::parser::ZipParser;
use super::structures::{CentralDirectory, EndOfCentralDirectory};
use crate::error::{Error, Result};
use crate::io::LazyRemoteFile;

/// Outcome of a successful [`ZipDirectoryProbe::run`].
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub directory: CentralDirectory,
    /// First byte of the downloaded tail that made the parse succeed.
    pub window_start: u64,
    /// Number of windows tried, the successful one included.
    pub steps: usize,
}

/// Locates the central directory of a remote archive by downloading its
/// tail one chunk at a time, smallest window first.
///
/// Each step downloads through the end of the file and parses only what is
/// already local. A parse that needs bytes outside the window fails, and the
/// window grows by one chunk. Since earlier windows are already covered,
/// every step costs exactly one range request.
///
/// Windows are chunk-aligned. A first window too short to hold an end of
/// central directory record is skipped, so a directory that fits in one
/// chunk is found with a single request.
pub struct ZipDirectoryProbe<'a> {
    file: &'a mut LazyRemoteFile,
}

impl<'a> ZipDirectoryProbe<'a> {
    pub fn new(file: &'a mut LazyRemoteFile) -> Self {
        Self { file }
    }

    pub async fn run(self) -> Result<ProbeReport> {
        let file = self.file;
        let length = file.len();
        if length == 0 {
            return Err(Error::InvalidContainer("remote file is empty".to_string()));
        }
        let chunk = file.chunk_size();
        let end = length - 1;

        // Largest chunk-aligned offset strictly before the last byte.
        let mut start = end.saturating_sub(1) / chunk * chunk;
        while start > 0 && length - start < EndOfCentralDirectory::SIZE as u64 {
            start = start.saturating_sub(chunk);
        }
        let mut steps = 0;
        let mut last_error = None;

        loop {
            steps += 1;
            file.download(start, end).await?;

            let parsed = {
                let view = file.covered_view()?;
                ZipParser::new(view).and_then(|mut parser| parser.central_directory())
            };
            match parsed {
                Ok(directory) => {
                    debug!(
                        url = file.url(),
                        window_start = start,
                        steps,
                        entries = directory.entries.len(),
                        "found central directory"
                    );
                    return Ok(ProbeReport {
                        directory,
                        window_start: start,
                        steps,
                    });
                }
                Err(e) => {
                    debug!(url = file.url(), window_start = start, "not a complete ZIP yet: {e}");
                    last_error = Some(e);
                }
            }

            if start == 0 {
                break;
            }
            start = start.saturating_sub(chunk);
        }

        Err(Error::InvalidContainer(
            last_error.map_or_else(|| "no data".to_string(), |e| e.to_string()),
        ))
    }
}
