use futures::StreamExt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;

use super::coverage::{CoverageTracker, Interval};
use super::scratch::{ScratchBuffer, Stay};
use crate::error::{Error, Result};
use crate::net::{FetchRequest, ResilientFetcher};

/// Default download granularity in bytes.
pub const CONTENT_CHUNK_SIZE: u64 = 8192;

#[derive(Debug, Clone)]
pub struct LazyFileConfig {
    /// Minimum number of bytes fetched by one read.
    pub chunk_size: u64,
}

impl Default for LazyFileConfig {
    fn default() -> Self {
        Self {
            chunk_size: CONTENT_CHUNK_SIZE,
        }
    }
}

/// What a HEAD probe told us about the remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub url: String,
    pub total_length: u64,
    pub supports_range_requests: bool,
}

/// Read-only, seekable view of a remote object fetched with Range requests.
///
/// Only bytes that are actually read get downloaded. Downloaded ranges are
/// tracked by a [`CoverageTracker`] so nothing is requested twice, and the
/// bytes themselves live in a [`ScratchBuffer`] of the object's full size.
///
/// An instance is meant to be used from one task at a time.
pub struct LazyRemoteFile {
    fetcher: ResilientFetcher,
    resource: RemoteResource,
    chunk_size: u64,
    coverage: CoverageTracker,
    scratch: Option<ScratchBuffer>,
    transferred_bytes: u64,
    range_requests: usize,
}

impl LazyRemoteFile {
    /// Send a HEAD request to get the object size and check Range support.
    ///
    /// # Arguments
    ///
    /// * `fetcher` - Used for the HEAD request and every later range request
    /// * `url` - HTTP(S) URL of the remote object
    /// * `config` - Download granularity
    ///
    /// # Returns
    ///
    /// A file positioned at offset 0 with nothing downloaded yet.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the object does not exist
    /// - [`Error::RangeUnsupported`] if the server does not advertise
    ///   `Accept-Ranges: bytes`
    /// - [`Error::MissingContentLength`] if the size is unknown
    /// - any other fetch failure, mapped by [`FetchOutcome::into_result`]
    ///
    /// [`FetchOutcome::into_result`]: crate::net::FetchOutcome::into_result
    pub async fn open(
        fetcher: ResilientFetcher,
        url: impl Into<String>,
        config: LazyFileConfig,
    ) -> Result<Self> {
        let url = url.into();
        let head = fetcher
            .fetch(&FetchRequest::head(url.as_str()))
            .await
            .into_response(&url)?;

        if !head.accepts_ranges() {
            return Err(Error::RangeUnsupported { url });
        }
        let Some(total_length) = head.content_length() else {
            return Err(Error::MissingContentLength { url });
        };

        let scratch = ScratchBuffer::new(total_length)?;
        debug!(%url, total_length, "opened lazy remote file");

        Ok(Self {
            fetcher,
            resource: RemoteResource {
                url,
                total_length,
                supports_range_requests: true,
            },
            chunk_size: config.chunk_size.max(1),
            coverage: CoverageTracker::new(),
            scratch: Some(scratch),
            transferred_bytes: 0,
            range_requests: 0,
        })
    }

    pub fn resource(&self) -> &RemoteResource {
        &self.resource
    }

    pub fn url(&self) -> &str {
        &self.resource.url
    }

    /// Size of the remote object.
    pub fn len(&self) -> u64 {
        self.resource.total_length
    }

    pub fn is_empty(&self) -> bool {
        self.resource.total_length == 0
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn coverage(&self) -> &CoverageTracker {
        &self.coverage
    }

    /// Body bytes received over the network so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes
    }

    /// Number of ranged GET requests issued so far.
    pub fn range_requests(&self) -> usize {
        self.range_requests
    }

    pub fn mode(&self) -> &'static str {
        "rb"
    }

    pub fn readable(&self) -> bool {
        true
    }

    pub fn seekable(&self) -> bool {
        true
    }

    pub fn writable(&self) -> bool {
        false
    }

    pub fn closed(&self) -> bool {
        self.scratch.is_none()
    }

    /// Drop the scratch buffer. Later calls fail with [`Error::Closed`].
    pub fn close(&mut self) {
        self.scratch = None;
    }

    fn scratch(&mut self) -> Result<&mut ScratchBuffer> {
        self.scratch.as_mut().ok_or(Error::Closed)
    }

    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.scratch()?.position()?)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.scratch()?.seek(pos)?)
    }

    /// Resize the local buffer; the position is not changed.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        Ok(self.scratch()?.truncate(size)?)
    }

    /// Read up to `size` bytes (everything up to the end for `None`).
    ///
    /// At least one chunk around the requested span is made local first, so
    /// small sequential reads do not each cost a request.
    pub async fn read(&mut self, size: Option<usize>) -> Result<Vec<u8>> {
        let position = self.tell()?;
        let length = self.resource.total_length;
        if position >= length {
            return Ok(Vec::new());
        }

        let download_size = size.map_or(0, |s| s as u64).max(self.chunk_size);
        let stop = match size {
            Some(_) => position.saturating_add(download_size).min(length),
            None => length,
        };
        let start = position.min(stop.saturating_sub(download_size));
        if start < stop {
            self.download(start, stop - 1).await?;
        }

        Ok(self.scratch()?.read_bytes(size)?)
    }

    /// Seek to `offset` and read up to `len` bytes.
    pub async fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.seek(SeekFrom::Start(offset))?;
        self.read(Some(len)).await
    }

    /// Make bytes `start..=end` local, fetching only what is not covered yet.
    ///
    /// Each uncovered gap costs one range request. Coverage is recorded only
    /// once every gap has been written, and the file position is left
    /// unchanged.
    ///
    /// # Arguments
    ///
    /// * `start` - First byte offset
    /// * `end` - Last byte offset, inclusive; clamped to the object size
    ///
    /// # Errors
    ///
    /// Returns an error if a range request fails or delivers fewer bytes than
    /// requested ([`Error::ShortBody`]), or if the file is closed.
    pub async fn download(&mut self, start: u64, end: u64) -> Result<()> {
        let end = end.min(self.resource.total_length.saturating_sub(1));
        let Some(requested) = Interval::new(start, end) else {
            return Ok(());
        };
        debug!(url = %self.resource.url, start, end, "downloading bytes");

        let plan = self.coverage.plan_fetch(requested);
        if plan.gaps.is_empty() {
            return Ok(());
        }

        let url = self.resource.url.as_str();
        let scratch = self.scratch.as_mut().ok_or(Error::Closed)?;
        let mut scratch = scratch.stay()?;

        for gap in &plan.gaps {
            debug!(url, start = gap.start, end = gap.end, "fetching range");
            self.range_requests += 1;

            let request = FetchRequest::get(url)
                .range(gap.start, gap.end)
                .streaming(true);
            let response = self.fetcher.fetch(&request).await.into_response(url)?;

            scratch.seek(SeekFrom::Start(gap.start))?;
            let expected = gap.len();
            let mut received = 0u64;
            let mut body = response.into_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                let take = (expected - received).min(chunk.len() as u64) as usize;
                scratch.write_all(&chunk[..take])?;
                received += take as u64;
                self.transferred_bytes += chunk.len() as u64;
            }

            if received < expected {
                return Err(Error::ShortBody {
                    url: url.to_string(),
                    start: gap.start,
                    end: gap.end,
                    expected,
                    received,
                });
            }
        }
        drop(scratch);

        self.coverage.commit(&plan);
        Ok(())
    }

    /// Synchronous view over the bytes downloaded so far.
    ///
    /// Reading a byte that is not covered fails with
    /// [`io::ErrorKind::UnexpectedEof`] instead of fetching it. The file
    /// position is restored when the view is dropped.
    pub fn covered_view(&mut self) -> Result<CoveredView<'_>> {
        let len = self.resource.total_length;
        let coverage = &self.coverage;
        let scratch = self.scratch.as_mut().ok_or(Error::Closed)?;
        let position = scratch.position()?;
        Ok(CoveredView {
            scratch: scratch.stay()?,
            coverage,
            position,
            len,
        })
    }
}

impl std::fmt::Debug for LazyRemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRemoteFile")
            .field("resource", &self.resource)
            .field("chunk_size", &self.chunk_size)
            .field("coverage", &self.coverage)
            .field("closed", &self.closed())
            .finish()
    }
}

/// See [`LazyRemoteFile::covered_view`].
pub struct CoveredView<'a> {
    scratch: Stay<'a>,
    coverage: &'a CoverageTracker,
    position: u64,
    len: u64,
}

impl Read for CoveredView<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(self.len - self.position);
        let wanted = Interval {
            start: self.position,
            end: self.position + n - 1,
        };
        if !self.coverage.covers(wanted) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("bytes {}-{} not downloaded yet", wanted.start, wanted.end),
            ));
        }

        self.scratch.seek(SeekFrom::Start(self.position))?;
        self.scratch.read_exact(&mut buf[..n as usize])?;
        self.position += n;
        Ok(n as usize)
    }
}

impl Seek for CoveredView<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        self.position = target;
        Ok(target)
    }
}
