//! File retrieval: turn an opaque file id into bytes plus a media type.
//!
//! [`FileSource`] is the seam the analyzer fetches through. Two sources ship
//! with the crate:
//!
//! | Source | Id meaning | Media type from |
//! |--------|------------|-----------------|
//! | [`LocalDirSource`] | file name under a root directory | extension (`mime_guess`) |
//! | [`HttpSource`] | last path segment under a base URL | `Content-Type`, else extension |
//!
//! Both enforce the same size bound before the payload is held in memory
//! where they can (file metadata, `Content-Length`) and again while reading.

use crate::config::{PipelineConfig, DEFAULT_MAX_FILE_BYTES};
use crate::error::DocScanError;
use crate::output::RetrievedFile;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Where files come from.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Fetch the file identified by `file_id`.
    ///
    /// # Errors
    /// - [`DocScanError::NotFound`] if no such file exists
    /// - [`DocScanError::TooLarge`] above the size bound
    async fn fetch(&self, file_id: &str) -> Result<RetrievedFile, DocScanError>;
}

fn guess_media_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn too_large(file_id: &str, size_bytes: u64, limit_bytes: u64) -> DocScanError {
    DocScanError::TooLarge {
        file_id: file_id.to_string(),
        size_bytes,
        limit_bytes,
    }
}

// ── Local directory ──────────────────────────────────────────────────────

/// Files stored flat under one directory; the id is the file name.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
    max_file_bytes: u64,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &PipelineConfig) -> Self {
        Self::new(root).with_max_file_bytes(config.max_file_bytes)
    }

    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids are plain file names; anything that could escape `root` is unknown.
    fn resolve(&self, file_id: &str) -> Option<PathBuf> {
        let escapes = file_id.is_empty()
            || file_id.contains('/')
            || file_id.contains('\\')
            || file_id == "."
            || file_id == ".."
            || file_id.contains('\0');
        (!escapes).then(|| self.root.join(file_id))
    }
}

#[async_trait]
impl FileSource for LocalDirSource {
    async fn fetch(&self, file_id: &str) -> Result<RetrievedFile, DocScanError> {
        let not_found = || DocScanError::NotFound {
            file_id: file_id.to_string(),
        };
        let path = self.resolve(file_id).ok_or_else(not_found)?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => {
                return Err(DocScanError::Internal(format!(
                    "cannot stat {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        if metadata.len() > self.max_file_bytes {
            return Err(too_large(file_id, metadata.len(), self.max_file_bytes));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| DocScanError::Internal(format!("cannot read {}: {}", path.display(), e)))?;
        // The file may have grown between stat and read.
        if bytes.len() as u64 > self.max_file_bytes {
            return Err(too_large(file_id, bytes.len() as u64, self.max_file_bytes));
        }

        let media_type = guess_media_type(file_id);
        debug!(
            "Read {} ({} bytes, {})",
            path.display(),
            bytes.len(),
            media_type
        );

        Ok(RetrievedFile {
            id: file_id.to_string(),
            name: file_id.to_string(),
            media_type,
            size_bytes: bytes.len() as u64,
            bytes,
        })
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// Files served over HTTP at `<base_url>/<file_id>`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: Url,
    client: reqwest::Client,
    timeout_secs: u64,
    max_file_bytes: u64,
}

impl HttpSource {
    /// Build a source rooted at `base_url` using the download timeout and
    /// size bound from `config`.
    pub fn new(base_url: &str, config: &PipelineConfig) -> Result<Self, DocScanError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DocScanError::InvalidConfig(format!("invalid source URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DocScanError::InvalidConfig(format!(
                "source URL '{base_url}' cannot have path segments"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| DocScanError::Internal(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            client,
            timeout_secs: config.download_timeout_secs,
            max_file_bytes: config.max_file_bytes,
        })
    }

    fn url_for(&self, file_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(file_id);
        }
        url
    }

    fn transport_error(&self, url: &Url, e: reqwest::Error) -> DocScanError {
        if e.is_timeout() {
            DocScanError::DownloadTimeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            DocScanError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl FileSource for HttpSource {
    async fn fetch(&self, file_id: &str) -> Result<RetrievedFile, DocScanError> {
        let url = self.url_for(file_id);
        info!("Downloading {}", url);

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DocScanError::NotFound {
                file_id: file_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DocScanError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_file_bytes {
                return Err(too_large(file_id, len, self.max_file_bytes));
            }
        }

        let declared = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.starts_with("application/octet-stream"))
            .map(str::to_string);
        let media_type = declared.unwrap_or_else(|| guess_media_type(file_id));

        // Content-Length may be absent (chunked) or wrong; bound the read itself.
        let mut bytes = Vec::with_capacity(
            response
                .content_length()
                .map_or(0, |len| len as usize),
        );
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(&url, e))?
        {
            let received = (bytes.len() + chunk.len()) as u64;
            if received > self.max_file_bytes {
                return Err(too_large(file_id, received, self.max_file_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        debug!("Downloaded {} bytes ({})", bytes.len(), media_type);

        Ok(RetrievedFile {
            id: file_id.to_string(),
            name: file_id.to_string(),
            media_type,
            size_bytes: bytes.len() as u64,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::{assert_err, assert_ok};

    // ── LocalDirSource ──

    #[tokio::test]
    async fn local_reads_file_and_guesses_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.pdf"), b"%PDF-1.7 body").unwrap();

        let file = assert_ok!(LocalDirSource::new(dir.path()).fetch("scan.pdf").await);
        assert_eq!(file.id, "scan.pdf");
        assert_eq!(file.media_type, "application/pdf");
        assert_eq!(file.size_bytes, 13);
        assert_eq!(file.bytes, b"%PDF-1.7 body");
    }

    #[tokio::test]
    async fn local_guesses_office_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.docx"), b"PK").unwrap();
        std::fs::write(dir.path().join("b.doc"), b"\xD0\xCF").unwrap();
        let source = LocalDirSource::new(dir.path());

        let docx = source.fetch("a.docx").await.unwrap();
        assert_eq!(
            docx.media_type,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(source.fetch("b.doc").await.unwrap().media_type, "application/msword");
    }

    #[tokio::test]
    async fn local_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = assert_err!(LocalDirSource::new(dir.path()).fetch("nope.png").await);
        assert!(matches!(err, DocScanError::NotFound { ref file_id } if file_id == "nope.png"));
    }

    #[tokio::test]
    async fn local_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"x").unwrap();
        let source = LocalDirSource::new(dir.path().join("inner"));

        for id in ["../secret.txt", "..", "", "inner/../x", "..\\secret.txt"] {
            let err = assert_err!(source.fetch(id).await);
            assert!(matches!(err, DocScanError::NotFound { .. }), "id {id:?}: {err:?}");
        }
    }

    #[tokio::test]
    async fn local_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();
        let err = assert_err!(LocalDirSource::new(dir.path()).fetch("folder").await);
        assert!(matches!(err, DocScanError::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_enforces_size_bound() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.png"), vec![0u8; 64]).unwrap();
        let source = LocalDirSource::new(dir.path()).with_max_file_bytes(63);

        match assert_err!(source.fetch("big.png").await) {
            DocScanError::TooLarge {
                size_bytes,
                limit_bytes,
                ..
            } => {
                assert_eq!(size_bytes, 64);
                assert_eq!(limit_bytes, 63);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // ── HttpSource ──

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status: &str, headers: &[(&str, &str)], body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut head = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
        for (k, v) in headers {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-length")) {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(body).await;
            let _ = socket.shutdown().await;
        });

        format!("http://{addr}/files/")
    }

    fn http(base: &str) -> HttpSource {
        HttpSource::new(base, &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn url_for_appends_escaped_id() {
        let source = http("https://files.local/api/files");
        assert_eq!(
            source.url_for("report 1.pdf").as_str(),
            "https://files.local/api/files/report%201.pdf"
        );
        let source = http("https://files.local/api/files/");
        assert_eq!(
            source.url_for("abc123").as_str(),
            "https://files.local/api/files/abc123"
        );
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = HttpSource::new("not a url", &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, DocScanError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn http_uses_content_type_header() {
        let base = serve_once("200 OK", &[("Content-Type", "image/png")], b"\x89PNG....").await;
        let file = assert_ok!(http(&base).fetch("abc123").await);
        assert_eq!(file.media_type, "image/png");
        assert_eq!(file.bytes, b"\x89PNG....");
        assert_eq!(file.name, "abc123");
    }

    #[tokio::test]
    async fn http_falls_back_to_extension() {
        let base = serve_once(
            "200 OK",
            &[("Content-Type", "application/octet-stream")],
            b"%PDF-1.4",
        )
        .await;
        let file = assert_ok!(http(&base).fetch("letter.pdf").await);
        assert_eq!(file.media_type, "application/pdf");
    }

    #[tokio::test]
    async fn http_404_is_not_found() {
        let base = serve_once("404 Not Found", &[], b"").await;
        let err = assert_err!(http(&base).fetch("gone.pdf").await);
        assert!(matches!(err, DocScanError::NotFound { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn http_server_error_is_download_failed() {
        let base = serve_once("500 Internal Server Error", &[], b"").await;
        let err = assert_err!(http(&base).fetch("x.pdf").await);
        assert!(err.to_string().contains("HTTP 500"), "got: {err}");
    }

    #[tokio::test]
    async fn http_rejects_oversized_body() {
        let base = serve_once("200 OK", &[("Content-Type", "image/png")], &[0u8; 32]).await;
        let config = PipelineConfig::builder().max_file_bytes(16).build().unwrap();
        let source = HttpSource::new(&base, &config).unwrap();
        let err = assert_err!(source.fetch("big.png").await);
        assert!(matches!(err, DocScanError::TooLarge { size_bytes: 32, .. }), "got: {err:?}");
    }

    /// Stream `chunks` chunks of `chunk_size` zero bytes with chunked encoding
    /// and report how many bytes the server managed to write.
    async fn serve_chunked(
        chunk_size: usize,
        chunks: usize,
    ) -> (String, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return 0;
            }
            let payload = vec![0u8; chunk_size];
            let mut written = 0;
            for _ in 0..chunks {
                let frame = format!("{chunk_size:x}\r\n");
                if socket.write_all(frame.as_bytes()).await.is_err()
                    || socket.write_all(&payload).await.is_err()
                    || socket.write_all(b"\r\n").await.is_err()
                {
                    return written;
                }
                written += chunk_size;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
            let _ = socket.shutdown().await;
            written
        });

        (format!("http://{addr}/files/"), handle)
    }

    #[tokio::test]
    async fn http_chunked_body_within_limit_is_read_fully() {
        let (base, server) = serve_chunked(256, 4).await;
        let file = assert_ok!(http(&base).fetch("scan.png").await);
        assert_eq!(file.size_bytes, 1024);
        assert_eq!(file.bytes.len(), 1024);
        assert_eq!(server.await.unwrap(), 1024);
    }

    #[tokio::test]
    async fn http_chunked_body_stops_at_limit() {
        // 64 MiB offered against a 1 KiB limit.
        let (base, server) = serve_chunked(64 * 1024, 1024).await;
        let config = PipelineConfig::builder().max_file_bytes(1024).build().unwrap();
        let source = HttpSource::new(&base, &config).unwrap();

        match assert_err!(source.fetch("x.png").await) {
            DocScanError::TooLarge {
                size_bytes,
                limit_bytes,
                ..
            } => {
                assert_eq!(limit_bytes, 1024);
                assert!(
                    size_bytes <= 1024 + 64 * 1024,
                    "read {size_bytes} bytes before failing"
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The client hangs up early, so the server cannot push the whole body.
        let written = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .expect("server finishes once the client hangs up")
            .unwrap();
        assert!(written < 64 * 1024 * 1024, "server wrote {written} bytes");
    }

    #[tokio::test]
    async fn http_unreachable_is_download_failed() {
        // Bind then drop to get a port nothing listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let err = assert_err!(http(&format!("http://{addr}/")).fetch("x.pdf").await);
        assert!(
            matches!(err, DocScanError::DownloadFailed { .. }),
            "got: {err:?}"
        );
    }
}
