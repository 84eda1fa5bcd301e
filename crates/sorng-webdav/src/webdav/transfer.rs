//! Content streams: ranged GET and streaming PUT.
//!
//! A download hands the response body out as an `AsyncRead`. An upload runs
//! the PUT on a background task fed through an in-memory pipe; the caller
//! writes into the pipe, closes it and then awaits the task for the status.

use crate::webdav::client::{check, status_error, transport_error, DavClient};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::{header, Body, Method, StatusCode};
use sorng_remotefs::{RemoteError, RemoteReader, RemoteResult, RemoteWriter};
use std::pin::Pin;
use tokio::task::JoinHandle;
use tokio_util::io::{ReaderStream, StreamReader};

/// Buffer between the copy loop and the request body.
const PIPE_CAPACITY: usize = 64 * 1024;

type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// GET `path` from `offset`. A server that answers a ranged request with
/// the full body is refused; appending it would corrupt the local file.
pub async fn open_download(
    client: &DavClient,
    path: &str,
    offset: u64,
) -> RemoteResult<RemoteReader> {
    let context = format!("GET {}", path);
    let mut req = client.request(Method::GET, client.url_for(path, false)?);
    if offset > 0 {
        req = req.header(header::RANGE, format!("bytes={}-", offset));
    }
    let resp = client.send(req, &context).await?;
    let status = resp.status();

    match status {
        StatusCode::PARTIAL_CONTENT if offset > 0 => {}
        StatusCode::OK if offset == 0 => {}
        StatusCode::OK => {
            return Err(RemoteError::protocol(format!(
                "{}: server ignored the range request",
                context
            ))
            .with_code(200)
            .with_path(path))
        }
        // Nothing left past the offset: the local copy is already complete.
        StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
            log::debug!("{}: range {}- not satisfiable, nothing to fetch", context, offset);
            return Ok(Box::new(tokio::io::empty()));
        }
        s if s.is_success() => {}
        s => return Err(status_error(s, &context).with_path(path)),
    }

    let stream: BodyStream = Box::pin(
        resp.bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );
    Ok(Box::new(StreamReader::new(stream)))
}

/// A PUT whose body is still being written.
pub struct PendingUpload {
    path: String,
    task: JoinHandle<RemoteResult<()>>,
}

impl PendingUpload {
    /// Wait for the server's answer. Call after the writer was closed.
    pub async fn finish(self) -> RemoteResult<()> {
        match self.task.await {
            Ok(result) => result.map_err(|e| e.with_path(&self.path)),
            Err(e) => Err(RemoteError::transfer(format!("Upload of {} ended abnormally: {}", self.path, e))
                .with_path(&self.path)),
        }
    }

    /// Cancel the request; the server sees the body cut short.
    pub fn abort(self) {
        log::debug!("Aborting upload of {}", self.path);
        self.task.abort();
    }
}

/// Start a PUT to `path` and return the writer feeding its body.
pub fn start_upload(client: &DavClient, path: &str) -> RemoteResult<(RemoteWriter, PendingUpload)> {
    let context = format!("PUT {}", path);
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let req = client
        .request(Method::PUT, client.url_for(path, false)?)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::wrap_stream(ReaderStream::new(reader)));

    let task = tokio::spawn(async move {
        let resp = req.send().await.map_err(|e| transport_error(e, &context))?;
        check(resp, &context)
    });

    let pending = PendingUpload {
        path: path.to_string(),
        task,
    };
    Ok((Box::new(writer), pending))
}

impl std::fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUpload")
            .field("path", &self.path)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
