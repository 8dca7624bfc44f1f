//! Per-connection request handling.
//!
//! A connection carries exactly one request and one response:
//!
//! ```text
//! AwaitingRequestLine -> ReadingHeaders -> ReadingBody (PUT only) -> Dispatching -> ResponseSent
//! ```
//!
//! Reading is bounded by the read timeout and happens before the aggregator
//! lock is taken, so a stalled client only ever holds up its own task.

use crate::state::{Aggregator, PutBody, PutOutcome};
use aggsync_proto::{
    decode_reading, encode_snapshot, FrameError, FrameLimits, FrameReader, Method, Request,
    Response, Status,
};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Most unread request bytes discarded after a reply.
const LINGER_BYTES: u64 = 16 * 1024 * 1024;

/// Longest wait for the peer to finish sending after a reply.
const LINGER_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a connection was when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first line
    AwaitingRequestLine,
    /// Reading header lines
    ReadingHeaders,
    /// Reading a PUT body
    ReadingBody,
    /// Applying the request to the aggregator
    Dispatching,
    /// Response written
    ResponseSent,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::AwaitingRequestLine => "awaiting request line",
            Phase::ReadingHeaders => "reading headers",
            Phase::ReadingBody => "reading body",
            Phase::Dispatching => "dispatching",
            Phase::ResponseSent => "response sent",
        };
        f.write_str(name)
    }
}

/// What was read off the connection.
#[derive(Debug)]
enum Incoming {
    EmptyLine,
    Unsupported(Method),
    Malformed(FrameError),
    Request(Request),
}

/// Connection-level failures. The connection is dropped without a response.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Peer did not finish sending within the read timeout
    #[error("read timed out while {0}")]
    Timeout(Phase),
    /// Transport failed or the peer hung up mid-frame
    #[error("transport error while {phase}: {source}")]
    Transport {
        /// Phase the failure happened in
        phase: Phase,
        /// Underlying error
        #[source]
        source: FrameError,
    },
    /// Writing the response failed
    #[error("failed to write response: {0}")]
    Write(#[source] std::io::Error),
}

/// Routes one request per connection into the aggregator.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    aggregator: Aggregator,
    limits: FrameLimits,
    read_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over `aggregator`.
    #[must_use]
    pub fn new(aggregator: Aggregator, limits: FrameLimits, read_timeout: Duration) -> Self {
        Self {
            aggregator,
            limits,
            read_timeout,
        }
    }

    /// The aggregator requests are routed into.
    #[must_use]
    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Handle one connection: read a request, dispatch it, write the reply.
    ///
    /// Returns the status that was sent.
    ///
    /// # Errors
    ///
    /// Returns error if the peer stalls past the read timeout, the transport
    /// fails, or the response cannot be written. Shared state is untouched
    /// in all of these cases except a failed write, which happens after the
    /// request was applied.
    pub async fn handle<S>(&self, stream: S) -> Result<Status, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut frames = FrameReader::new(BufReader::new(reader), self.limits);

        let mut phase = Phase::AwaitingRequestLine;
        let read =
            tokio::time::timeout(self.read_timeout, read_request(&mut frames, &mut phase)).await;
        let incoming = match read {
            Err(_) => return Err(ConnectionError::Timeout(phase)),
            Ok(Err(source)) => return Err(ConnectionError::Transport { phase, source }),
            Ok(Ok(incoming)) => incoming,
        };

        let response = self.dispatch(incoming).await;
        response
            .write_to(&mut writer)
            .await
            .map_err(ConnectionError::Write)?;

        tracing::debug!(phase = %Phase::ResponseSent, status = %response.status, "response written");

        // Request bytes left unread at close turn into a reset that can
        // discard the reply on the peer's side.
        if let Err(err) = writer.shutdown().await {
            tracing::debug!(error = %err, "failed to half-close connection");
        }
        self.linger(frames.into_inner()).await;

        Ok(response.status)
    }

    async fn linger<R>(&self, reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut rest = reader.take(LINGER_BYTES);
        let wait = self.read_timeout.min(LINGER_TIMEOUT);
        match tokio::time::timeout(wait, tokio::io::copy(&mut rest, &mut tokio::io::sink())).await
        {
            Ok(Ok(0)) => {}
            Ok(Ok(discarded)) => tracing::debug!(discarded, "discarded unread request bytes"),
            Ok(Err(err)) => tracing::debug!(error = %err, "peer failed while draining"),
            Err(_) => tracing::debug!("peer did not close after the response"),
        }
    }

    async fn dispatch(&self, incoming: Incoming) -> Response {
        match incoming {
            Incoming::EmptyLine => {
                tracing::debug!("empty request line");
                self.reject(Status::BadRequest, "Empty request line").await
            }
            Incoming::Unsupported(method) => {
                tracing::debug!(%method, "unsupported method");
                self.reject(Status::BadRequest, "Invalid request type").await
            }
            Incoming::Malformed(err) => {
                tracing::debug!(error = %err, "malformed request");
                let status = err.status().unwrap_or(Status::BadRequest);
                self.reject(status, &err.to_string()).await
            }
            Incoming::Request(request) => match request.line.method {
                Method::Get => self.get(&request).await,
                Method::Put => self.put(request).await,
                Method::Other(method) => {
                    tracing::debug!(%method, "unsupported method");
                    self.reject(Status::BadRequest, "Invalid request type").await
                }
            },
        }
    }

    /// Answer without touching the store or advancing the clock.
    async fn reject(&self, status: Status, message: &str) -> Response {
        Response::new(status, self.aggregator.clock().await, message)
    }

    async fn get(&self, request: &Request) -> Response {
        let stamped = self.aggregator.get(request.headers.clock()).await;

        match encode_snapshot(&stamped.value) {
            Ok(body) => {
                tracing::debug!(keys = stamped.value.len(), clock = stamped.clock, "GET served");
                Response::new(Status::Ok, stamped.clock, body)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to encode snapshot");
                Response::new(Status::InternalServerError, stamped.clock, err.to_string())
            }
        }
    }

    async fn put(&self, request: Request) -> Response {
        let received = request.headers.clock();
        let body = match request.body {
            None => PutBody::Absent,
            Some(bytes) => match decode_reading(&bytes) {
                Ok(reading) => PutBody::Reading(reading),
                Err(err) => PutBody::Malformed(err),
            },
        };

        let stamped = self.aggregator.put(received, body).await;
        let (status, message) = match stamped.value {
            PutOutcome::Created => (Status::Created, "Data successfully created".to_string()),
            PutOutcome::Updated => (Status::Ok, "Data successfully updated".to_string()),
            // 204 carries no body
            PutOutcome::NoContent => (Status::NoContent, String::new()),
            PutOutcome::Rejected(err) => {
                tracing::warn!(error = %err, "rejected PUT body");
                (Status::InternalServerError, format!("Invalid JSON: {err}"))
            }
        };

        tracing::debug!(%status, clock = stamped.clock, "PUT served");
        Response::new(status, stamped.clock, message)
    }
}

/// Drive the read side of the state machine.
///
/// Frame errors that can still be answered come back as
/// [`Incoming::Malformed`]; only transport failures are returned as `Err`.
async fn read_request<R>(
    frames: &mut FrameReader<R>,
    phase: &mut Phase,
) -> Result<Incoming, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    match read_request_inner(frames, phase).await {
        Ok(incoming) => {
            *phase = Phase::Dispatching;
            Ok(incoming)
        }
        Err(err) if err.status().is_some() => {
            *phase = Phase::Dispatching;
            Ok(Incoming::Malformed(err))
        }
        Err(err) => Err(err),
    }
}

async fn read_request_inner<R>(
    frames: &mut FrameReader<R>,
    phase: &mut Phase,
) -> Result<Incoming, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    *phase = Phase::AwaitingRequestLine;
    let Some(line) = frames.read_request_line().await? else {
        return Ok(Incoming::EmptyLine);
    };
    if let Method::Other(_) = line.method {
        return Ok(Incoming::Unsupported(line.method));
    }

    *phase = Phase::ReadingHeaders;
    let headers = frames.read_headers().await?;

    let body = if line.method == Method::Put {
        *phase = Phase::ReadingBody;
        match headers.content_length()? {
            None | Some(0) => None,
            Some(len) => Some(frames.read_body(len).await?),
        }
    } else {
        None
    };

    Ok(Incoming::Request(Request {
        line,
        headers,
        body,
    }))
}
