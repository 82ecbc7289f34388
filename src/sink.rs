//! Storage collaborators for [`ProjectUpdate`] batches.

use anyhow::Context;
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, warn};

use crate::index::{ProjectRecord, ProjectUpdate, normalize};
use crate::pipeline::Sink;

/// Logs every update and stores nothing.
#[derive(Debug, Default)]
pub struct LogSink {
    pub seen: usize,
}

#[async_trait]
impl Sink<ProjectUpdate> for LogSink {
    async fn consume(&mut self, batch: Vec<ProjectUpdate>) -> anyhow::Result<()> {
        for update in batch {
            self.seen += 1;
            match update {
                ProjectUpdate::Found(record) => info!(
                    name = %record.name,
                    serial = record.serial,
                    simple = record.simple_data.len(),
                    json = record.json_data.len(),
                    "DATA"
                ),
                ProjectUpdate::Missing { name } => warn!(%name, "data is missing"),
                ProjectUpdate::Inconsistent { name, simple, json } => {
                    warn!(%name, simple, json, "inconsistent serials, not stored")
                }
                ProjectUpdate::Unavailable { name, reason } => error!(%name, "unavailable: {reason}"),
            }
        }
        Ok(())
    }
}

/// Writes each found project to `<root>/<normalized name>/`:
///
/// - `simple.html.zz`, `json.zz`: zlib-compressed payloads
/// - `serial`: the serial as decimal text
///
/// Each record is written into `<root>/.staging-<name>/` and then renamed
/// into place, replacing any earlier copy. A failed write leaves the earlier
/// copy untouched, and every earlier record of the batch complete.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    written: usize,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn written(&self) -> usize {
        self.written
    }

    async fn store(&self, record: &ProjectRecord) -> anyhow::Result<()> {
        let name = normalize(&record.name);
        let target = self.root.join(&name);
        let staging = self.root.join(format!(".staging-{name}"));
        let replaced = self.root.join(format!(".replaced-{name}"));

        fs::create_dir_all(&self.root).await?;
        if fs::try_exists(&staging).await? {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir(&staging).await?;
        fs::write(staging.join("simple.html.zz"), compress(&record.simple_data)?).await?;
        fs::write(staging.join("json.zz"), compress(&record.json_data)?).await?;
        fs::write(staging.join("serial"), record.serial.to_string()).await?;

        if !fs::try_exists(&target).await? {
            fs::rename(&staging, &target).await?;
            return Ok(());
        }

        if fs::try_exists(&replaced).await? {
            fs::remove_dir_all(&replaced).await?;
        }
        fs::rename(&target, &replaced).await?;
        if let Err(e) = fs::rename(&staging, &target).await {
            fs::rename(&replaced, &target).await?;
            return Err(e.into());
        }
        fs::remove_dir_all(&replaced).await?;
        Ok(())
    }
}

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[async_trait]
impl Sink<ProjectUpdate> for DirectorySink {
    async fn consume(&mut self, batch: Vec<ProjectUpdate>) -> anyhow::Result<()> {
        for update in batch {
            let record = match update {
                ProjectUpdate::Found(record) => record,
                other => {
                    warn!(name = other.name(), "nothing to store: {other:?}");
                    continue;
                }
            };

            self.store(&record)
                .await
                .with_context(|| format!("storing {}", record.name))?;
            self.written += 1;
        }
        Ok(())
    }
}
