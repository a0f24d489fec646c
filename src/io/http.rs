use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::RandomAccessSource;

/// HTTP Range source for remote ZIP files.
///
/// Only the byte ranges the reader asks for are fetched, so listing a remote
/// archive costs the END record plus the central directory.
pub struct HttpRangeSource {
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeSource {
    /// Create a new HTTP Range source.
    ///
    /// Sends a HEAD request to verify Range support and learn the file size.
    pub fn new(url: String) -> io::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(io::Error::other)?;

        let resp = client.head(&url).send().map_err(io::Error::other)?;
        if !resp.status().is_success() {
            return Err(io::Error::other(format!(
                "HTTP request failed with status: {}",
                resp.status()
            )));
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "remote server does not support Range requests",
            ));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| io::Error::other("remote server did not return Content-Length"))?;

        debug!(%url, size, "opened remote archive");
        Ok(Self {
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        })
    }

    /// Total bytes transferred from the network so far.
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }
}

impl RandomAccessSource for HttpRangeSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let expected_size = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={current_start}-{end}");

            match self.client.get(&self.url).header("Range", &range).send() {
                Ok(resp) => {
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        return Err(io::Error::other(format!(
                            "HTTP request failed with status: {}",
                            resp.status()
                        )));
                    }

                    let bytes = resp.bytes().map_err(io::Error::other)?;
                    if bytes.is_empty() {
                        break;
                    }
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "max retries exceeded",
                        ));
                    }
                    warn!(
                        retry = retry_count,
                        max = self.max_retry,
                        error = %e,
                        "connection error, retrying range request"
                    );
                    std::thread::sleep(Duration::from_millis(500 * u64::from(retry_count)));
                }
                Err(e) => return Err(io::Error::other(e)),
            }
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
