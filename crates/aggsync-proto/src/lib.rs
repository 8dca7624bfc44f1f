//! # AggSync Protocol
//!
//! Wire frames and payload encoding shared by the aggregator and its clients.
//!
//! ## Frames
//!
//! Requests and responses use an HTTP/1.1-compatible text framing: a start
//! line, `Name: value` header lines, a blank line, then `Content-Length`
//! bytes of body. Every frame carries the sender's Lamport counter in the
//! `Lamport-Clock` header.
//!
//! ## Payloads
//!
//! Bodies are flat JSON objects mapping string keys to string values.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame;
pub mod payload;

pub use frame::{
    FrameError, FrameLimits, FrameReader, Headers, Method, Request, RequestLine, Response, Status,
    CLOCK_HEADER, CONTENT_LENGTH_HEADER,
};
pub use payload::{decode_reading, decode_snapshot, encode_reading, encode_snapshot, PayloadError};
