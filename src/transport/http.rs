//! Default HTTP transport built on `reqwest`

use super::{ConnectInfo, Transport, TransportRequest, TransportSink};
use crate::config::HttpConfig;
use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::identity;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_RANGE, ETAG, HeaderMap, HeaderName,
};
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Streams a resource over HTTP(S) into the task's temp file
///
/// Resume requests rely on `Range` and `If-Match`: a `206` continues the temp
/// file at the requested offset, a `200` rewrites it from the start, and a `412`
/// or `416` surfaces as a precondition failure so the engine drops the stale
/// breakpoint before retrying.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Build a transport from configuration
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| Error::invalid_config("http", format!("failed to build client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        request: &TransportRequest,
        sink: &TransportSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut builder = self.client.get(&request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let response = tokio::select! {
            result = builder.send() => result.map_err(TransportError::from)?,
            _ = cancel.cancelled() => return Err(Error::UserCancelled),
        };

        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED
            || status == StatusCode::RANGE_NOT_SATISFIABLE
        {
            return Err(TransportError::new(
                TransportErrorKind::PreconditionFailed,
                format!("server rejected resume request with {}", status),
            )
            .into());
        }
        if !status.is_success() {
            return Err(TransportError::status(status.as_u16()).into());
        }

        let info = connect_info(
            status,
            response.headers(),
            response.content_length(),
            request.resume_offset,
        )?;
        let partial = info.partial;
        debug!(
            task_id = %request.id,
            status = %status,
            partial,
            total_bytes = ?info.total_bytes,
            "connected"
        );

        let path = sink.connected(info).await?;
        let mut file = open_target(&path, partial.then_some(request.resume_offset).flatten()).await?;

        let mut stream = response.bytes_stream();
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    file.flush().await?;
                    return Err(Error::UserCancelled);
                }

                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        file.write_all(&bytes).await?;
                        sink.progress(bytes.len() as u64).await?;
                    }
                    Some(Err(e)) => {
                        file.flush().await?;
                        return Err(TransportError::from(e).into());
                    }
                    None => break,
                },
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Interpret the response head
fn connect_info(
    status: StatusCode,
    headers: &HeaderMap,
    content_length: Option<u64>,
    resume_offset: Option<u64>,
) -> Result<ConnectInfo> {
    let header = |name: HeaderName| header_str(headers, name);

    let partial = status == StatusCode::PARTIAL_CONTENT && resume_offset.is_some();
    let total_bytes = if partial {
        let range = header(CONTENT_RANGE).and_then(parse_content_range).ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::InvalidResponse,
                "206 response without a usable Content-Range",
            )
        })?;
        if Some(range.start) != resume_offset {
            return Err(TransportError::new(
                TransportErrorKind::InvalidResponse,
                format!(
                    "asked to resume at {:?}, server sent range starting at {}",
                    resume_offset, range.start
                ),
            )
            .into());
        }
        range.total.or_else(|| content_length.map(|len| range.start + len))
    } else {
        content_length
    };

    let resumable = status == StatusCode::PARTIAL_CONTENT
        || header(ACCEPT_RANGES).is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

    Ok(ConnectInfo {
        etag: header(ETAG).map(str::to_string),
        total_bytes,
        resumable,
        partial,
        filename_hint: header(CONTENT_DISPOSITION)
            .and_then(identity::filename_from_content_disposition),
    })
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Debug, PartialEq, Eq)]
struct ContentRange {
    start: u64,
    total: Option<u64>,
}

/// Parse `bytes start-end/total` (total may be `*`)
fn parse_content_range(value: &str) -> Option<ContentRange> {
    let content_range = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = content_range.split_once('/')?;
    let (start, _end) = range.trim().split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some(ContentRange { start, total })
}

/// Open the temp file for writing
///
/// With `resume_at`, keeps the first `resume_at` bytes and appends after them;
/// otherwise truncates.
async fn open_target(path: &Path, resume_at: Option<u64>) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    match resume_at {
        Some(offset) => {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .await?;
            file.set_len(offset).await?;
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            Ok(file)
        }
        None => Ok(File::create(path).await?),
    }
}
