//! Streaming download of a vendor CSV into a staging file, read back as a
//! lazy sequence of typed rows.
//!
//! The response body is copied chunk by chunk to disk, so memory stays
//! bounded regardless of file size. The staging file is owned by a guard that
//! deletes it when the row stream is released or dropped, including on every
//! error path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use catalogsync_shared::{CatalogSyncError, ImportConfig, Result, RetryPolicy, retry_with_backoff};

use crate::transform::VendorRow;

/// User-Agent string for CSV downloads.
const USER_AGENT: &str = concat!("CatalogSync/", env!("CARGO_PKG_VERSION"));

/// Columns every vendor file must carry.
pub const REQUIRED_COLUMNS: [&str; 13] = [
    "ProductName",
    "ItemDescription",
    "ProductDescription",
    "ManufacturerID",
    "Availability",
    "QuantityOnHand",
    "UnitPrice",
    "PKG",
    "ProductID",
    "ItemID",
    "ManufacturerItemCode",
    "NDCItemCode",
    "CategoryID",
];

// ---------------------------------------------------------------------------
// StagingFile
// ---------------------------------------------------------------------------

/// A process-local temporary copy of a downloaded CSV.
///
/// The file is removed when the guard is released or dropped.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
    removed: bool,
}

impl StagingFile {
    /// Reserve a uniquely named staging path under `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| CatalogSyncError::io(dir, e))?;
        Ok(Self {
            path: dir.join(format!("{}.csv", Uuid::now_v7())),
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staging file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove staging file"),
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        self.remove();
    }
}

// ---------------------------------------------------------------------------
// CsvStreamer
// ---------------------------------------------------------------------------

/// Downloads vendor CSVs and opens them as row streams.
#[derive(Debug, Clone)]
pub struct CsvStreamer {
    client: Client,
    staging_dir: PathBuf,
    retry: RetryPolicy,
}

impl CsvStreamer {
    /// Create a streamer with the download timeout and staging directory of
    /// `config`.
    pub fn new(config: &ImportConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| {
                CatalogSyncError::Download(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            staging_dir: PathBuf::from(&config.staging_dir),
            retry,
        })
    }

    /// Download `url` into a fresh staging file and open it for reading.
    ///
    /// Fails with `Download` on network errors, non-2xx responses, or a body
    /// shorter than its declared length, and with `Schema` when a required
    /// column is missing. The staging file is gone on any failure.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn open(&self, url: &Url) -> Result<CsvRowStream> {
        let staging = StagingFile::new(&self.staging_dir)?;

        let bytes = retry_with_backoff(&self.retry, "csv download", || {
            download_to(&self.client, url, staging.path())
        })
        .await?;
        info!(bytes, path = %staging.path().display(), "csv downloaded");

        CsvRowStream::from_staging(staging).await
    }
}

/// Stream the body of `url` into `path`, truncating any previous attempt.
///
/// A body cut short of its `Content-Length` fails in `chunk()`.
async fn download_to(client: &Client, url: &Url, path: &Path) -> Result<u64> {
    let mut response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| CatalogSyncError::Download(format!("GET {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(CatalogSyncError::Download(format!(
            "GET {url} returned HTTP {status}"
        )));
    }

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| CatalogSyncError::io(path, e))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| CatalogSyncError::Download(format!("reading body of {url}: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| CatalogSyncError::io(path, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| CatalogSyncError::io(path, e))?;
    Ok(written)
}

// ---------------------------------------------------------------------------
// CsvRowStream
// ---------------------------------------------------------------------------

/// Forward-only reader over a staged CSV with validated headers.
pub struct CsvRowStream {
    // Declared before `staging` so the file handle closes before removal.
    reader: AsyncReader<tokio::fs::File>,
    headers: StringRecord,
    record: StringRecord,
    rows_read: u64,
    staging: StagingFile,
}

impl CsvRowStream {
    /// Open a staged file and check its header row.
    pub async fn from_staging(staging: StagingFile) -> Result<Self> {
        let file = tokio::fs::File::open(staging.path())
            .await
            .map_err(|e| CatalogSyncError::io(staging.path(), e))?;

        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .create_reader(file);

        let raw = reader
            .headers()
            .await
            .map_err(|e| CatalogSyncError::schema(format!("unreadable header row: {e}")))?;
        let headers = normalize_headers(raw);
        validate_headers(&headers)?;
        debug!(columns = headers.len(), headers = ?headers, "csv header validated");

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
            rows_read: 0,
            staging,
        })
    }

    /// Read the next row.
    ///
    /// `Ok(None)` signals completion. An inner `Err` is a row-local
    /// `RowParse` failure and the stream stays usable; an outer `Err` means
    /// the staged file itself can no longer be read.
    pub async fn next_row(&mut self) -> Result<Option<(u64, Result<VendorRow>)>> {
        let more = match self.reader.read_record(&mut self.record).await {
            Ok(more) => more,
            Err(e) if e.is_io_error() => {
                return Err(CatalogSyncError::io(self.staging.path(), std::io::Error::other(e)));
            }
            Err(e) => {
                self.rows_read += 1;
                let line = self.rows_read;
                return Ok(Some((line, Err(CatalogSyncError::row(line, e.to_string())))));
            }
        };
        if !more {
            return Ok(None);
        }

        self.rows_read += 1;
        let line = self.rows_read;
        let row = self
            .record
            .deserialize::<VendorRow>(Some(&self.headers))
            .map_err(|e| CatalogSyncError::row(line, e.to_string()));
        Ok(Some((line, row)))
    }

    /// Data rows consumed so far, including malformed ones.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Close the reader and delete the staging file.
    pub fn release(self) {
        let Self {
            reader, staging, ..
        } = self;
        drop(reader);
        staging.release();
    }
}

/// Strip a UTF-8 byte order mark and surrounding whitespace from header names.
fn normalize_headers(raw: &StringRecord) -> StringRecord {
    let names: Vec<&str> = raw
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim())
        .collect();
    StringRecord::from(names)
}

/// Fail with `Schema` listing every required column the header lacks.
pub fn validate_headers(headers: &StringRecord) -> Result<()> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CatalogSyncError::schema(format!(
            "missing required column(s): {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HEADER: &str = "ProductName,ItemDescription,ProductDescription,ManufacturerID,Availability,QuantityOnHand,UnitPrice,PKG,ProductID,ItemID,ManufacturerItemCode,NDCItemCode,CategoryID,ImageFileName,ItemImageURL";

    fn csv(rows: &[&str]) -> String {
        let mut body = String::from(HEADER);
        for row in rows {
            body.push('\n');
            body.push_str(row);
        }
        body.push('\n');
        body
    }

    fn test_config() -> (ImportConfig, PathBuf) {
        let dir = std::env::temp_dir().join(format!("cs_stage_{}", Uuid::now_v7()));
        let config = ImportConfig {
            batch_size: 10,
            staging_dir: dir.to_string_lossy().into_owned(),
            download_timeout_secs: 5,
        };
        (config, dir)
    }

    fn staged_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    async fn serve(server: &MockServer, vendor: &str, response: ResponseTemplate) -> Url {
        Mock::given(method("GET"))
            .and(path(format!("/download/{vendor}")))
            .respond_with(response)
            .mount(server)
            .await;
        Url::parse(&format!("{}/download/{vendor}", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn streams_rows_in_file_order() {
        let server = MockServer::start().await;
        let body = csv(&[
            "Gloves,Box of 100,,M-1,In Stock,12,19.99,BX,P-1,I-1,MIC-1,NDC-1,C-1,,",
            "Masks,Pack of 50,Three-ply,M-2,In Stock,0,4.50,PK,P-2,I-2,MIC-2,NDC-2,C-2,mask.jpg,https://cdn.example.com/mask.jpg",
        ]);
        let url = serve(&server, "v1", ResponseTemplate::new(200).set_body_string(body)).await;
        let (config, dir) = test_config();

        let streamer = CsvStreamer::new(&config, RetryPolicy::none()).unwrap();
        let mut stream = streamer.open(&url).await.expect("open stream");
        assert_eq!(staged_files(&dir), 1);

        let mut names = Vec::new();
        while let Some((_, row)) = stream.next_row().await.unwrap() {
            names.push(row.expect("valid row").product_name);
        }
        assert_eq!(names, vec!["Gloves", "Masks"]);
        assert_eq!(stream.rows_read(), 2);

        stream.release();
        assert_eq!(staged_files(&dir), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_removes_staging_file() {
        let server = MockServer::start().await;
        let body = csv(&["Gloves,Box,,M-1,In Stock,1,1.00,BX,P-1,I-1,MIC-1,NDC-1,C-1,,"]);
        let url = serve(&server, "v1", ResponseTemplate::new(200).set_body_string(body)).await;
        let (config, dir) = test_config();

        let streamer = CsvStreamer::new(&config, RetryPolicy::none()).unwrap();
        let stream = streamer.open(&url).await.unwrap();
        drop(stream);
        assert_eq!(staged_files(&dir), 0);
    }

    #[tokio::test]
    async fn missing_column_is_schema_error() {
        let server = MockServer::start().await;
        let body = "ProductName,ItemDescription\nGloves,Box\n";
        let url = serve(&server, "v1", ResponseTemplate::new(200).set_body_string(body)).await;
        let (config, dir) = test_config();

        let streamer = CsvStreamer::new(&config, RetryPolicy::none()).unwrap();
        let err = streamer.open(&url).await.err().expect("schema error");
        match err {
            CatalogSyncError::Schema { message } => {
                assert!(message.contains("UnitPrice"));
                assert!(message.contains("CategoryID"));
                assert!(!message.contains("ProductName"));
            }
            other => panic!("expected schema error, got {other}"),
        }
        assert_eq!(staged_files(&dir), 0);
    }

    #[tokio::test]
    async fn non_success_status_is_download_error() {
        let server = MockServer::start().await;
        let url = serve(&server, "v1", ResponseTemplate::new(503)).await;
        let (config, dir) = test_config();

        let streamer = CsvStreamer::new(&config, RetryPolicy::none()).unwrap();
        let err = streamer.open(&url).await.err().expect("download error");
        assert!(matches!(err, CatalogSyncError::Download(ref m) if m.contains("503")));
        assert_eq!(staged_files(&dir), 0);
    }

    #[tokio::test]
    async fn body_shorter_than_content_length_is_download_error() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let body = csv(&["Gloves,Box,,M-1,In Stock,1,1.00,BX,P-1,I-1,MIC-1,NDC-1,C-1,,"]);
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/csv\r\ncontent-length: {}\r\n\r\n",
                body.len() + 500
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
        });

        let url = Url::parse(&format!("http://{addr}/download/v1")).unwrap();
        let (config, dir) = test_config();
        let streamer = CsvStreamer::new(&config, RetryPolicy::none()).unwrap();
        let err = streamer.open(&url).await.err().expect("truncated body");
        assert!(matches!(err, CatalogSyncError::Download(_)), "got {err:?}");
        assert_eq!(staged_files(&dir), 0);
    }

    #[tokio::test]
    async fn download_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/v1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        let body = csv(&["Gloves,Box,,M-1,In Stock,1,1.00,BX,P-1,I-1,MIC-1,NDC-1,C-1,,"]);
        let url = serve(&server, "v1", ResponseTemplate::new(200).set_body_string(body)).await;
        let (config, _dir) = test_config();

        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };
        let streamer = CsvStreamer::new(&config, retry).unwrap();
        let mut stream = streamer.open(&url).await.expect("second attempt succeeds");
        assert!(stream.next_row().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn malformed_row_does_not_end_stream() {
        let server = MockServer::start().await;
        let body = csv(&[
            "Gloves,Box,,M-1,In Stock,1,1.00,BX,P-1,I-1,MIC-1,NDC-1,C-1,,",
            "Short,row",
            "Masks,Pack,,M-2,In Stock,3,2.00,PK,P-2,I-2,MIC-2,NDC-2,C-2,,",
        ]);
        let url = serve(&server, "v1", ResponseTemplate::new(200).set_body_string(body)).await;
        let (config, _dir) = test_config();

        let streamer = CsvStreamer::new(&config, RetryPolicy::none()).unwrap();
        let mut stream = streamer.open(&url).await.unwrap();

        let mut ok = 0;
        let mut skipped = Vec::new();
        while let Some((line, row)) = stream.next_row().await.unwrap() {
            match row {
                Ok(_) => ok += 1,
                Err(CatalogSyncError::RowParse { row, .. }) => skipped.push((line, row)),
                Err(other) => panic!("unexpected error {other}"),
            }
        }
        assert_eq!(ok, 2);
        assert_eq!(skipped, vec![(2, 2)]);
    }

    #[test]
    fn header_with_bom_is_accepted() {
        let raw = StringRecord::from(
            HEADER
                .replacen("ProductName", "\u{feff}ProductName", 1)
                .split(',')
                .collect::<Vec<_>>(),
        );
        let headers = normalize_headers(&raw);
        assert!(validate_headers(&headers).is_ok());
        assert_eq!(headers.get(0), Some("ProductName"));
    }
}
