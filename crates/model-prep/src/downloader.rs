use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::try_join_all;
use futures_util::StreamExt;
use log::{debug, info};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::catalog::{ModelCatalogEntry, ModelFile};
use crate::error::PrepError;

/// Receives progress fractions in [0, 1].
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Minimum time between two progress callbacks for one download.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Fetches every file of a model into a destination directory.
#[async_trait]
pub trait ModelDownloader: Send + Sync {
    async fn download(
        &self,
        entry: &ModelCatalogEntry,
        dest_dir: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), PrepError>;
}

/// Downloads over HTTP with `.partial` files and resume support.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Download a single file, resuming from an existing partial.
    ///
    /// Updates `progress[file_index]` with the bytes on disk so far.
    #[allow(clippy::too_many_arguments)]
    async fn download_file(
        &self,
        file: &ModelFile,
        dest_dir: &Path,
        file_index: usize,
        shared: &Mutex<Vec<u64>>,
        total_size: u64,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), PrepError> {
        let final_path = dest_dir.join(&file.filename);
        let partial_path = dest_dir.join(format!("{}.partial", file.filename));

        if final_path.is_file() {
            debug!("{} already downloaded, skipping", file.filename);
            set_progress(shared, file_index, file.size_bytes);
            return Ok(());
        }

        let mut resume_from = match tokio::fs::metadata(&partial_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        // A previous run finished this file but never renamed it
        if file.size_bytes > 0 && resume_from >= file.size_bytes {
            debug!("{} partial is complete, skipping request", file.filename);
            set_progress(shared, file_index, resume_from);
            return Ok(());
        }

        let mut request = self.client.get(&file.url);
        if resume_from > 0 {
            info!("Resuming {} from {} bytes", file.filename, resume_from);
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", resume_from));
        }

        let response = request.send().await?;
        let status = response.status();
        if resume_from > 0 && status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            debug!("{} partial already holds the whole file", file.filename);
            set_progress(shared, file_index, resume_from);
            return Ok(());
        }
        if !status.is_success() {
            return Err(PrepError::HttpStatus(status.as_u16()));
        }
        if resume_from > 0 && status != reqwest::StatusCode::PARTIAL_CONTENT {
            // Server ignored the range, start over
            debug!("Range not honoured for {}, restarting", file.filename);
            resume_from = 0;
        }

        let out = if resume_from > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&partial_path)
                .await?
        } else {
            tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&partial_path)
                .await?
        };

        let mut out = tokio::io::BufWriter::new(out);
        let mut stream = response.bytes_stream();
        let mut written = resume_from;
        let mut last_emit = Instant::now();

        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = cancel.cancelled() => {
                    out.flush().await?;
                    return Err(PrepError::Cancelled);
                }
            };
            let Some(chunk) = next else {
                break;
            };

            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if last_emit.elapsed() >= PROGRESS_INTERVAL {
                let done = set_progress(shared, file_index, written);
                on_progress(fraction(done, total_size));
                last_emit = Instant::now();
            }
        }

        out.flush().await?;
        set_progress(shared, file_index, written);
        Ok(())
    }
}

#[async_trait]
impl ModelDownloader for HttpDownloader {
    async fn download(
        &self,
        entry: &ModelCatalogEntry,
        dest_dir: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), PrepError> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let total_size = entry.size_bytes();
        let shared = Mutex::new(vec![0u64; entry.files.len()]);

        info!(
            "Downloading model '{}' ({} files) into {:?}",
            entry.name,
            entry.files.len(),
            dest_dir
        );

        // All files in parallel, progress aggregated across them
        try_join_all(entry.files.iter().enumerate().map(|(idx, file)| {
            self.download_file(file, dest_dir, idx, &shared, total_size, progress, cancel)
        }))
        .await?;

        if cancel.is_cancelled() {
            return Err(PrepError::Cancelled);
        }

        for file in &entry.files {
            let final_path = dest_dir.join(&file.filename);
            let partial_path = dest_dir.join(format!("{}.partial", file.filename));
            if partial_path.is_file() {
                tokio::fs::rename(&partial_path, &final_path).await?;
            }
        }

        progress(1.0);
        info!("Model '{}' download complete", entry.name);
        Ok(())
    }
}

/// Store bytes for one file and return the total across all files.
fn set_progress(shared: &Mutex<Vec<u64>>, file_index: usize, bytes: u64) -> u64 {
    let mut progress = shared.lock().unwrap_or_else(|e| e.into_inner());
    progress[file_index] = bytes;
    progress.iter().sum()
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (done as f64 / total as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelType;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    const BODY: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    /// How the local HTTP server answers
    #[derive(Debug, Clone, Copy)]
    enum Reply {
        /// 200, or 206 for a Range request (416 past the end)
        Honour,
        /// Always 200 with the full body
        IgnoreRange,
        /// Bare status code with an empty body
        Status(u16),
        /// Sends half the body, then keeps the connection open
        Stall,
    }

    struct Server {
        url: String,
        /// Range start of each request received, `None` for plain GETs
        ranges: Arc<Mutex<Vec<Option<u64>>>>,
    }

    impl Server {
        fn ranges(&self) -> Vec<Option<u64>> {
            self.ranges.lock().unwrap().clone()
        }
    }

    async fn serve(reply: Reply) -> Server {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ranges = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&ranges);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let range = read_range(&mut socket).await;
                seen.lock().unwrap().push(range);
                tokio::spawn(respond(socket, reply, range));
            }
        });

        Server {
            url: format!("http://{}/model.bin", addr),
            ranges,
        }
    }

    async fn read_range(socket: &mut TcpStream) -> Option<u64> {
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&request)
            .to_ascii_lowercase()
            .lines()
            .find_map(|line| line.strip_prefix("range: bytes="))
            .and_then(|value| value.trim().trim_end_matches('-').parse().ok())
    }

    async fn respond(mut socket: TcpStream, reply: Reply, range: Option<u64>) {
        let total = BODY.len();
        let (head, payload) = match (reply, range) {
            (Reply::Status(code), _) => (format!("HTTP/1.1 {} Error\r\nContent-Length: 0\r\n", code), &BODY[..0]),
            (Reply::Honour, Some(start)) if start as usize >= total => (
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\n".to_string(),
                &BODY[..0],
            ),
            (Reply::Honour, Some(start)) => {
                let rest = &BODY[start as usize..];
                (
                    format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\nContent-Length: {}\r\n",
                        start,
                        total - 1,
                        total,
                        rest.len()
                    ),
                    rest,
                )
            }
            (Reply::Stall, _) => (
                format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", total),
                &BODY[..total / 2],
            ),
            _ => (format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n", total), BODY),
        };

        let head = format!("{}Connection: close\r\n\r\n", head);
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(payload).await;
        let _ = socket.flush().await;

        if let Reply::Stall = reply {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
    }

    fn downloader() -> HttpDownloader {
        HttpDownloader {
            client: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    fn entry_for(url: &str, size_bytes: u64) -> ModelCatalogEntry {
        ModelCatalogEntry {
            name: "local".into(),
            display_name: "Local".into(),
            description: String::new(),
            model_type: ModelType::Whisper,
            estimated_ram_mb: 0,
            files: vec![ModelFile {
                filename: "model.bin".into(),
                url: url.into(),
                sha256: None,
                size_bytes,
            }],
        }
    }

    async fn fetch(entry: &ModelCatalogEntry, dir: &Path) -> (Result<(), PrepError>, f64) {
        let last = Mutex::new(0.0);
        let on_progress = |p: f64| *last.lock().unwrap() = p;
        let result = downloader()
            .download(entry, dir, &on_progress, &CancellationToken::new())
            .await;
        let last = *last.lock().unwrap();
        (result, last)
    }

    #[test]
    fn fraction_handles_edges() {
        assert_eq!(fraction(5, 0), 0.0);
        assert_eq!(fraction(5, 10), 0.5);
        assert_eq!(fraction(50, 10), 1.0);
    }

    #[test]
    fn set_progress_sums_files() {
        let shared = Mutex::new(vec![0u64; 3]);
        assert_eq!(set_progress(&shared, 0, 4), 4);
        assert_eq!(set_progress(&shared, 2, 6), 10);
        assert_eq!(set_progress(&shared, 0, 5), 11);
    }

    #[tokio::test]
    async fn existing_files_are_not_fetched_again() {
        let server = serve(Reply::Honour).await;
        let dir = tempdir().unwrap();
        let mut entry = entry_for(&server.url, 10);
        entry.files.push(ModelFile {
            filename: "vocab.txt".into(),
            ..entry.files[0].clone()
        });
        for file in &entry.files {
            std::fs::write(dir.path().join(&file.filename), b"0123456789").unwrap();
        }

        let (result, last) = fetch(&entry, dir.path()).await;

        result.unwrap();
        assert_eq!(last, 1.0);
        assert!(server.ranges().is_empty());
    }

    #[tokio::test]
    async fn streams_a_fresh_download() {
        let server = serve(Reply::Honour).await;
        let dir = tempdir().unwrap();
        let entry = entry_for(&server.url, BODY.len() as u64);

        let (result, last) = fetch(&entry, dir.path()).await;

        result.unwrap();
        assert_eq!(last, 1.0);
        assert_eq!(std::fs::read(dir.path().join("model.bin")).unwrap(), BODY);
        assert!(!dir.path().join("model.bin.partial").exists());
        assert_eq!(server.ranges(), vec![None]);
    }

    #[tokio::test]
    async fn resumes_partial_with_range() {
        let server = serve(Reply::Honour).await;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin.partial"), &BODY[..20]).unwrap();
        let entry = entry_for(&server.url, BODY.len() as u64);

        let (result, _) = fetch(&entry, dir.path()).await;

        result.unwrap();
        assert_eq!(std::fs::read(dir.path().join("model.bin")).unwrap(), BODY);
        assert_eq!(server.ranges(), vec![Some(20)]);
    }

    #[tokio::test]
    async fn restarts_when_server_ignores_range() {
        let server = serve(Reply::IgnoreRange).await;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin.partial"), b"stale").unwrap();
        let entry = entry_for(&server.url, BODY.len() as u64);

        let (result, _) = fetch(&entry, dir.path()).await;

        result.unwrap();
        assert_eq!(std::fs::read(dir.path().join("model.bin")).unwrap(), BODY);
        assert_eq!(server.ranges(), vec![Some(5)]);
    }

    #[tokio::test]
    async fn complete_partial_is_renamed_without_a_request() {
        let server = serve(Reply::Honour).await;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin.partial"), BODY).unwrap();
        let entry = entry_for(&server.url, BODY.len() as u64);

        let (result, last) = fetch(&entry, dir.path()).await;

        result.unwrap();
        assert_eq!(last, 1.0);
        assert_eq!(std::fs::read(dir.path().join("model.bin")).unwrap(), BODY);
        assert!(server.ranges().is_empty());
    }

    #[tokio::test]
    async fn range_not_satisfiable_means_partial_is_complete() {
        let server = serve(Reply::Honour).await;
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model.bin.partial"), BODY).unwrap();
        // Catalog size larger than the served file, so the request goes out
        let entry = entry_for(&server.url, BODY.len() as u64 + 10);

        let (result, _) = fetch(&entry, dir.path()).await;

        result.unwrap();
        assert_eq!(std::fs::read(dir.path().join("model.bin")).unwrap(), BODY);
        assert_eq!(server.ranges(), vec![Some(BODY.len() as u64)]);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = serve(Reply::Status(404)).await;
        let dir = tempdir().unwrap();
        let entry = entry_for(&server.url, BODY.len() as u64);

        let (result, _) = fetch(&entry, dir.path()).await;

        assert!(matches!(result, Err(PrepError::HttpStatus(404))));
        assert!(!dir.path().join("model.bin").exists());
    }

    #[tokio::test]
    async fn cancel_interrupts_a_stalled_download_and_keeps_partial() {
        let server = serve(Reply::Stall).await;
        let dir = tempdir().unwrap();
        let entry = entry_for(&server.url, BODY.len() as u64);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            downloader().download(&entry, dir.path(), &|_: f64| {}, &cancel),
        )
        .await
        .expect("cancellation should end a stalled download");

        assert!(matches!(result, Err(PrepError::Cancelled)));
        assert!(dir.path().join("model.bin.partial").exists());
        assert!(!dir.path().join("model.bin").exists());
    }
}
