//! Blocking HTTP facade: HEAD size checks and streamed downloads.
//!
//! Uses async reqwest internally with `tokio::time::timeout` for stall
//! detection, but presents a sync interface so dataset workers can run on
//! plain rayon threads.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{LazyLock, OnceLock};
use std::task::Context;
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::ProgressBar;
use tokio::io::{AsyncRead, ReadBuf};

use crate::progress::upgrade_to_bar;
use crate::shutdown::is_shutdown_requested;

/// Buffer size for writing downloads to disk (256KB)
const WRITE_BUF_SIZE: usize = 256 * 1024;

/// Network settings shared by every transfer of a run.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Deadline for the HEAD request probing `Content-Length`
    pub head_timeout: Duration,
    /// Longest a download may go without receiving a byte
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    /// Concurrent downloads across all dataset workers
    pub max_downloads: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            head_timeout: Duration::from_secs(60),
            read_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            max_downloads: 4,
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install the run's HTTP settings. Only the first call takes effect, and
/// only if no transfer has read the settings yet.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP settings already initialised, keeping the first ones");
    }
}

/// Current HTTP settings (defaults when never set).
pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Error types for stream operations
#[derive(Debug)]
pub enum StreamError {
    /// HTTP error with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// I/O error
    Io(io::Error),
    /// Transfer abandoned because shutdown was requested
    Cancelled,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Cancelled => f.write_str("transfer cancelled"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl StreamError {
    /// Create HTTP error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(http_config().connect_timeout)
        .pool_max_idle_per_host(4)
        .build()
        .expect("failed to build HTTP client")
});

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Sibling path a transfer writes to before the final rename: `<name>.part`.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn parse_content_length(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Issue a HEAD request and return the advertised `Content-Length`.
///
/// `Ok(None)` when the server answers without the header.
pub fn content_length(url: &str) -> Result<Option<u64>, StreamError> {
    let timeout = http_config().head_timeout;
    SHARED_RUNTIME.handle().block_on(async {
        let response = SHARED_CLIENT
            .head(url)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::from_reqwest(&e))?;
        Ok(parse_content_length(response.headers()))
    })
}

/// HTTP GET → sync reader over the body, plus the advertised length.
fn open_body_reader(url: &str) -> Result<(TimeoutReader, Option<u64>), StreamError> {
    let read_timeout = http_config().read_timeout;
    SHARED_RUNTIME.handle().block_on(async {
        let response = SHARED_CLIENT
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| StreamError::from_reqwest(&e))?;

        let total_bytes = parse_content_length(response.headers());

        let stream = response.bytes_stream();
        let async_reader = tokio_util::io::StreamReader::new(
            stream.map(|result| result.map_err(io::Error::other)),
        );

        Ok((
            TimeoutReader::new(Box::pin(async_reader), read_timeout),
            total_bytes,
        ))
    })
}

/// Download `url` to `dest` through `<dest>.part`, renaming on success.
///
/// The partial file is removed on every failure path, so `dest` is either
/// the previous content or the complete new body. Returns bytes written.
pub fn download_to_file(url: &str, dest: &Path, pb: &ProgressBar) -> Result<u64, StreamError> {
    let part = part_path(dest);
    let result = download_into(url, &part, pb).and_then(|written| {
        fs::rename(&part, dest)?;
        Ok(written)
    });
    if result.is_err() && part.exists() {
        if let Err(e) = fs::remove_file(&part) {
            log::warn!("failed to remove partial download {}: {e}", part.display());
        }
    }
    result
}

fn download_into(url: &str, part: &Path, pb: &ProgressBar) -> Result<u64, StreamError> {
    let (reader, total_bytes) = open_body_reader(url)?;
    if let Some(total) = total_bytes {
        upgrade_to_bar(pb, total);
    }

    let mut reader = ProgressReader { inner: reader, pb };
    let mut writer = BufWriter::with_capacity(WRITE_BUF_SIZE, File::create(part)?);
    let written = match io::copy(&mut reader, &mut writer) {
        Ok(n) => n,
        Err(_) if is_shutdown_requested() => return Err(StreamError::Cancelled),
        Err(e) => return Err(e.into()),
    };
    writer.flush()?;

    if let Some(total) = total_bytes {
        if written != total {
            return Err(StreamError::Http {
                status: None,
                message: format!("body truncated: got {written} of {total} bytes"),
            });
        }
    }
    Ok(written)
}

/// Reader wrapper advancing a progress bar and honouring the shutdown flag
pub struct ProgressReader<'a, R> {
    inner: R,
    pb: &'a ProgressBar,
}

impl<'a, R> ProgressReader<'a, R> {
    pub fn new(inner: R, pb: &'a ProgressBar) -> Self {
        Self { inner, pb }
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if is_shutdown_requested() {
            // not ErrorKind::Interrupted: io::copy would retry that
            return Err(io::Error::other("shutdown requested"));
        }
        let n = self.inner.read(buf)?;
        self.pb.inc(n as u64);
        Ok(n)
    }
}

/// Async-to-sync bridge with read timeout.
///
/// Each read has a deadline; if no data arrives within it the read fails
/// with `TimedOut`.
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
    timeout: Duration,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send + Sync>>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        SHARED_RUNTIME.handle().block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(timeout, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s with no data)", timeout.as_secs()),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Serve the given raw responses, one per accepted connection.
    fn serve(responses: Vec<&'static str>) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            for response in responses {
                let (mut conn, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = conn.read(&mut chunk).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..n]);
                }
                conn.write_all(response.as_bytes()).unwrap();
                conn.flush().unwrap();
            }
        });
        (format!("http://{addr}/dump.nt.gz"), handle)
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/import/x.ttl.bz2")),
            PathBuf::from("/import/x.ttl.bz2.part")
        );
    }

    #[test]
    fn display_http_with_status() {
        let err = StreamError::Http {
            status: Some(404),
            message: "test".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP 404: test");
    }

    #[test]
    fn display_io_error() {
        let err = StreamError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(format!("{err}").contains("IO error"));
    }

    #[test]
    fn head_reports_content_length() {
        let (url, server) = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 42\r\nConnection: close\r\n\r\n",
        ]);
        assert_eq!(content_length(&url).unwrap(), Some(42));
        server.join().unwrap();
    }

    #[test]
    fn head_without_length_is_unknown() {
        let (url, server) = serve(vec!["HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n"]);
        assert_eq!(content_length(&url).unwrap(), None);
        server.join().unwrap();
    }

    #[test]
    fn head_error_status_is_reported() {
        let (url, server) = serve(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ]);
        match content_length(&url) {
            Err(StreamError::Http { status, .. }) => assert_eq!(status, Some(404)),
            other => panic!("expected HTTP error, got {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn download_renames_complete_body() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dump.nt.gz");
        let (url, server) = serve(vec![
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        ]);

        let written = download_to_file(&url, &dest, &ProgressBar::hidden()).unwrap();
        server.join().unwrap();

        assert_eq!(written, 5);
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn failed_download_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dump.nt.gz");
        fs::write(&dest, b"old").unwrap();
        let (url, server) = serve(vec![
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ]);

        assert!(download_to_file(&url, &dest, &ProgressBar::hidden()).is_err());
        server.join().unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert!(!part_path(&dest).exists());
    }
}
