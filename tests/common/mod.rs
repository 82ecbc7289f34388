#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderMap, Response, StatusCode,
        header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE},
    },
    routing::get,
    serve,
};
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use pypidata::{FetcherConfig, ResilientFetcher};

#[derive(Debug, Default)]
pub struct Stats {
    pub head_requests: AtomicUsize,
    pub slow_hits: AtomicUsize,
    /// `(file, start, end)` of every ranged GET, in arrival order.
    pub ranges: Mutex<Vec<(String, u64, u64)>>,
}

impl Stats {
    pub fn ranges_for(&self, file: &str) -> Vec<(u64, u64)> {
        self.ranges
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _, _)| f == file)
            .map(|(_, start, end)| (*start, *end))
            .collect()
    }
}

#[derive(Clone)]
struct AppState {
    files: Arc<HashMap<String, Vec<u8>>>,
    stats: Arc<Stats>,
}

pub struct TestHttpServer {
    base: String,
    pub stats: Arc<Stats>,
}

impl TestHttpServer {
    /// Serve `files` under `/files/{name}` plus a few fixed endpoints:
    ///
    /// - `/norange/{name}`: like `/files` but without Range support
    /// - `/status/{code}`: empty response with that status
    /// - `/slow`: answers after two seconds
    /// - `/simple/{name}/` and `/pypi/{name}/json`: index pages; `missing`
    ///   is a 404 and `mismatch` reports different serials
    pub async fn spawn(files: Vec<(&str, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stats = Arc::new(Stats::default());
        let state = AppState {
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(name, data)| (name.to_string(), data))
                    .collect(),
            ),
            stats: stats.clone(),
        };

        let router = Router::new()
            .route("/files/{name}", get(get_file).head(head_file))
            .route("/norange/{name}", get(get_file).head(head_file_without_ranges))
            .route("/status/{code}", get(status))
            .route("/slow", get(slow))
            .route("/simple/{name}/", get(simple_page))
            .route("/pypi/{name}/json", get(json_page))
            .with_state(state);

        tokio::spawn(async move {
            let _ = serve(listener, router).await;
        });

        Self {
            base: format!("http://{addr}"),
            stats,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn base(&self) -> &str {
        &self.base
    }
}

fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
    let value = headers.get(RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn head_file(State(state): State<AppState>, Path(name): Path<String>) -> Response<Body> {
    state.stats.head_requests.fetch_add(1, Ordering::SeqCst);
    let Some(data) = state.files.get(&name) else {
        return not_found();
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(ACCEPT_RANGES, "bytes")
        .header(CONTENT_LENGTH, data.len())
        .body(Body::empty())
        .unwrap()
}

async fn head_file_without_ranges(State(state): State<AppState>, Path(name): Path<String>) -> Response<Body> {
    state.stats.head_requests.fetch_add(1, Ordering::SeqCst);
    let Some(data) = state.files.get(&name) else {
        return not_found();
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_LENGTH, data.len())
        .body(Body::empty())
        .unwrap()
}

async fn get_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response<Body> {
    let Some(data) = state.files.get(&name) else {
        return not_found();
    };

    let Some((start, end)) = parse_range(&headers) else {
        return Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, data.len())
            .body(Body::from(data.clone()))
            .unwrap();
    };

    state.stats.ranges.lock().unwrap().push((name.clone(), start, end));
    let end = end.min(data.len() as u64 - 1);
    let slice = data[start as usize..=end as usize].to_vec();
    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_RANGE, format!("bytes {start}-{end}/{}", data.len()))
        .header(CONTENT_LENGTH, slice.len())
        .body(Body::from(slice))
        .unwrap()
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn slow(State(state): State<AppState>) -> &'static str {
    state.stats.slow_hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    "finally"
}

fn not_found() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::empty())
        .unwrap()
}

fn index_page(name: &str, serial: u64, body: String) -> Response<Body> {
    if name == "missing" {
        return not_found();
    }
    Response::builder()
        .status(StatusCode::OK)
        .header("X-PyPI-Last-Serial", serial.to_string())
        .body(Body::from(body))
        .unwrap()
}

async fn simple_page(Path(name): Path<String>) -> Response<Body> {
    let serial = if name == "mismatch" { 10 } else { 7 };
    index_page(&name, serial, format!("<html><a href=\"{name}-1.0.tar.gz\">{name}</a></html>"))
}

async fn json_page(Path(name): Path<String>) -> Response<Body> {
    let serial = if name == "mismatch" { 11 } else { 7 };
    index_page(&name, serial, format!("{{\"info\": {{\"name\": \"{name}\"}}}}"))
}

/// Fetcher with a short timeout and backoff, suitable for a local server.
pub fn fetcher(timeout: Duration, max_attempts: u32, backoff: Duration) -> ResilientFetcher {
    ResilientFetcher::with_config(FetcherConfig {
        timeout,
        max_attempts,
        backoff,
    })
    .unwrap()
}

pub fn quick_fetcher() -> ResilientFetcher {
    fetcher(Duration::from_secs(5), 2, Duration::from_millis(10))
}

/// Deterministic bytes that do not compress and contain no ZIP signatures
/// by accident often enough to matter.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Build an archive from `(name, data, deflate)` triples.
pub fn build_zip(files: &[(&str, &[u8], bool)]) -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data, deflate) in files {
        let method = if *deflate {
            zip::CompressionMethod::Deflated
        } else {
            zip::CompressionMethod::Stored
        };
        writer
            .start_file(*name, SimpleFileOptions::default().compression_method(method))
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Archive with one deflated entry whose central directory sizes are
/// replaced through a ZIP64 extra field. `None` keeps the real size.
pub fn zip64_sized(
    name: &str,
    data: &[u8],
    uncompressed: Option<u64>,
    compressed: Option<u64>,
) -> Vec<u8> {
    use flate2::{Compression, Crc, write::DeflateEncoder};

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    let deflated = encoder.finish().unwrap();
    let mut crc = Crc::new();
    crc.update(data);

    let mut extra = Vec::new();
    let mut header_uncompressed = data.len() as u32;
    let mut header_compressed = deflated.len() as u32;
    if let Some(size) = uncompressed {
        header_uncompressed = u32::MAX;
        extra.extend_from_slice(&size.to_le_bytes());
    }
    if let Some(size) = compressed {
        header_compressed = u32::MAX;
        extra.extend_from_slice(&size.to_le_bytes());
    }
    let mut extra_field = Vec::new();
    if !extra.is_empty() {
        extra_field.extend_from_slice(&1u16.to_le_bytes());
        extra_field.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        extra_field.extend_from_slice(&extra);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"PK\x03\x04");
    out.extend_from_slice(&[45, 0, 0, 0, 8, 0, 0, 0, 0, 0]);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&deflated);

    let cd_offset = out.len() as u32;
    out.extend_from_slice(b"PK\x01\x02");
    out.extend_from_slice(&[45, 0, 45, 0, 0, 0, 8, 0, 0, 0, 0, 0]);
    out.extend_from_slice(&crc.sum().to_le_bytes());
    out.extend_from_slice(&header_compressed.to_le_bytes());
    out.extend_from_slice(&header_uncompressed.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra_field.len() as u16).to_le_bytes());
    out.extend_from_slice(&[0; 10]);
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&extra_field);
    let cd_size = out.len() as u32 - cd_offset;

    out.extend_from_slice(b"PK\x05\x06");
    out.extend_from_slice(&[0, 0, 0, 0, 1, 0, 1, 0]);
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}
