//! Package index access: the simple (HTML) page and the JSON API page of a
//! project, each carrying the index's last serial for that project.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::net::{ClientErrorKind, FetchRequest, ResilientFetcher};
use crate::pipeline::{Emitter, Producer};

/// Response header carrying the project's last serial.
pub const SERIAL_HEADER: &str = "x-pypi-last-serial";

/// URL templates; `{name}` is replaced by the normalized project name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUrls {
    pub simple: String,
    pub json: String,
}

impl Default for IndexUrls {
    fn default() -> Self {
        Self {
            simple: "https://pypi.org/simple/{name}/".to_string(),
            json: "https://pypi.org/pypi/{name}/json".to_string(),
        }
    }
}

impl IndexUrls {
    pub fn simple_url(&self, name: &str) -> String {
        self.simple.replace("{name}", &normalize(name))
    }

    pub fn json_url(&self, name: &str) -> String {
        self.json.replace("{name}", &normalize(name))
    }
}

/// Normalize a project name: lowercase, with every run of `-`, `_` and `.`
/// collapsed into a single `-`.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Both pages of one project, as returned by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub name: String,
    pub serial: u64,
    pub simple_data: Bytes,
    pub json_data: Bytes,
}

/// What a producer learned about one requested project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectUpdate {
    Found(ProjectRecord),
    Missing { name: String },
    /// The two pages disagree on the serial.
    Inconsistent { name: String, simple: u64, json: u64 },
    /// Fetching failed after the fetcher gave up; nothing was stored.
    Unavailable { name: String, reason: String },
}

impl ProjectUpdate {
    pub fn name(&self) -> &str {
        match self {
            ProjectUpdate::Found(record) => &record.name,
            ProjectUpdate::Missing { name }
            | ProjectUpdate::Inconsistent { name, .. }
            | ProjectUpdate::Unavailable { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageIndex {
    fetcher: ResilientFetcher,
    urls: IndexUrls,
}

impl PackageIndex {
    pub fn new(fetcher: ResilientFetcher, urls: IndexUrls) -> Self {
        Self { fetcher, urls }
    }

    pub fn urls(&self) -> &IndexUrls {
        &self.urls
    }

    /// Fetch one page and its serial. `Ok(None)` when the page does not exist.
    pub async fn get_page(&self, url: &str) -> Result<Option<(u64, Bytes)>> {
        let Some(response) = self.fetcher.fetch(&FetchRequest::get(url)).await.into_result(url)? else {
            return Ok(None);
        };

        let serial = response
            .header_str(SERIAL_HEADER)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .ok_or_else(|| Error::Transport {
                url: url.to_string(),
                kind: ClientErrorKind::Decode,
                message: format!("missing or invalid {SERIAL_HEADER} header"),
            })?;
        let body = response.bytes().await?;
        Ok(Some((serial, body)))
    }

    /// Fetch both pages of `name`.
    ///
    /// Returns `Ok(None)` if either page is missing and
    /// [`Error::InconsistentSource`] if their serials differ.
    pub async fn get_project(&self, name: &str) -> Result<Option<ProjectRecord>> {
        let simple_url = self.urls.simple_url(name);
        let json_url = self.urls.json_url(name);
        let (simple, json) = tokio::try_join!(self.get_page(&simple_url), self.get_page(&json_url))?;

        let (Some((simple_serial, simple_data)), Some((json_serial, json_data))) = (simple, json) else {
            return Ok(None);
        };
        if simple_serial != json_serial {
            return Err(Error::InconsistentSource {
                name: name.to_string(),
                simple: simple_serial,
                json: json_serial,
            });
        }

        Ok(Some(ProjectRecord {
            name: name.to_string(),
            serial: simple_serial,
            simple_data,
            json_data,
        }))
    }
}

/// Pipeline producer emitting one [`ProjectUpdate`] per project name.
///
/// Per-project fetch failures become updates rather than errors, so one bad
/// project never stops the run. Only a stopped consumer fails the producer.
#[derive(Debug, Clone)]
pub struct ProjectProducer {
    index: PackageIndex,
}

impl ProjectProducer {
    pub fn new(index: PackageIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl Producer for ProjectProducer {
    type Input = String;
    type Item = ProjectUpdate;

    async fn produce(&self, name: String, emitter: &Emitter<ProjectUpdate>) -> anyhow::Result<()> {
        let update = match self.index.get_project(&name).await {
            Ok(Some(record)) => {
                info!(name = %record.name, serial = record.serial, "fetched project");
                ProjectUpdate::Found(record)
            }
            Ok(None) => {
                warn!(%name, "project not found");
                ProjectUpdate::Missing { name }
            }
            Err(Error::InconsistentSource { name, simple, json }) => {
                warn!(%name, simple, json, "index sources disagree on serial");
                ProjectUpdate::Inconsistent { name, simple, json }
            }
            Err(e) => {
                error!(%name, "failed to fetch project: {e}");
                ProjectUpdate::Unavailable {
                    name,
                    reason: e.to_string(),
                }
            }
        };
        emitter.emit(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_names() {
        assert_eq!(normalize("Django"), "django");
        assert_eq!(normalize("zope.interface"), "zope-interface");
        assert_eq!(normalize("Foo__Bar-.baz"), "foo-bar-baz");
        assert_eq!(normalize("  requests "), "requests");
    }

    #[test]
    fn formats_urls_with_normalized_name() {
        let urls = IndexUrls::default();
        assert_eq!(urls.simple_url("Flask_SQLAlchemy"), "https://pypi.org/simple/flask-sqlalchemy/");
        assert_eq!(urls.json_url("PyYAML"), "https://pypi.org/pypi/pyyaml/json");
    }
}
