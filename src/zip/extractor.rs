use flate2::read::DeflateDecoder;
use std::io::Read;

use crate::error::{Error, Result};
use crate::io::{LazyFileConfig, LazyRemoteFile};
use crate::net::ResilientFetcher;

use super::probe::{ProbeReport, ZipDirectoryProbe};
use super::structures::{CentralDirectory, CompressionMethod, LFH_SIZE, ZipFileEntry, local_header_tail_len};

/// A remote ZIP archive whose central directory has been located.
///
/// Entry data is fetched only when an entry is read.
pub struct RemoteZip {
    file: LazyRemoteFile,
    directory: CentralDirectory,
    probe_steps: usize,
}

impl RemoteZip {
    /// Open `url` and probe for its central directory.
    pub async fn open(
        fetcher: ResilientFetcher,
        url: impl Into<String>,
        config: LazyFileConfig,
    ) -> Result<Self> {
        let file = LazyRemoteFile::open(fetcher, url, config).await?;
        Self::from_file(file).await
    }

    pub async fn from_file(mut file: LazyRemoteFile) -> Result<Self> {
        let ProbeReport {
            directory, steps, ..
        } = ZipDirectoryProbe::new(&mut file).run().await?;
        Ok(Self {
            file,
            directory,
            probe_steps: steps,
        })
    }

    /// List all entries in the archive
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.directory.entries
    }

    pub fn by_name(&self, name: &str) -> Option<&ZipFileEntry> {
        self.directory.by_name(name)
    }

    pub fn directory(&self) -> &CentralDirectory {
        &self.directory
    }

    /// Windows the probe needed before the directory parsed.
    pub fn probe_steps(&self) -> usize {
        self.probe_steps
    }

    pub fn file(&self) -> &LazyRemoteFile {
        &self.file
    }

    pub fn into_inner(self) -> LazyRemoteFile {
        self.file
    }

    /// Offset of the entry's data, read from its local file header.
    ///
    /// The local header's name and extra field may differ in length from
    /// the central directory's copy, so it has to be read.
    pub async fn data_offset(&mut self, entry: &ZipFileEntry) -> Result<u64> {
        let lfh = self.file.read_at(entry.lfh_offset, LFH_SIZE).await?;
        let tail = local_header_tail_len(&lfh)
            .map_err(|e| Error::InvalidContainer(format!("{}: {e}", entry.file_name)))?;
        Ok(entry.lfh_offset + LFH_SIZE as u64 + tail)
    }

    /// Fetch and decompress one entry, checking its CRC-32.
    pub async fn read(&mut self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(Error::UnsupportedCompression {
                file_name: entry.file_name.clone(),
                method,
            });
        }

        let data_offset = self.data_offset(entry).await?;
        let past_end = data_offset
            .checked_add(entry.compressed_size)
            .is_none_or(|data_end| data_end > self.file.len());
        if past_end {
            return Err(Error::InvalidContainer(format!(
                "{}: data runs past the end of the archive",
                entry.file_name
            )));
        }
        let raw = self
            .file
            .read_at(data_offset, entry.compressed_size as usize)
            .await?;

        let data = match entry.compression_method {
            CompressionMethod::Deflate => {
                // Declared sizes are untrusted; one extra byte is enough to
                // fail the size check below.
                let capacity = entry.uncompressed_size.min(raw.len() as u64 * 4);
                let mut out = Vec::with_capacity(capacity as usize);
                DeflateDecoder::new(raw.as_slice())
                    .take(entry.uncompressed_size.saturating_add(1))
                    .read_to_end(&mut out)
                    .map_err(|e| Error::InvalidContainer(format!("{}: {e}", entry.file_name)))?;
                out
            }
            _ => raw,
        };

        let mut crc = flate2::Crc::new();
        crc.update(&data);
        if data.len() as u64 != entry.uncompressed_size || crc.sum() != entry.crc32 {
            return Err(Error::InvalidContainer(format!(
                "{}: size or CRC-32 mismatch",
                entry.file_name
            )));
        }

        Ok(data)
    }

    /// Read the entry called `name`, if there is one.
    pub async fn read_by_name(&mut self, name: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.by_name(name).cloned() else {
            return Ok(None);
        };
        self.read(&entry).await.map(Some)
    }
}
