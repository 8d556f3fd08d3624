// SPDX-License-Identifier: Apache-2.0 OR MIT

//! HTTP/1.1 message framing over a pipelined client connection.
//!
//! Requests are written out immediately (or queued if the socket isn't
//! writable yet) and a FIFO of [`PendingRequest`] tracks which request
//! each inbound response belongs to - the connection never waits for a
//! response before sending the next request.

use std::collections::VecDeque;

use crate::codec::Buffer;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

/// One request, either still waiting to be written or already on the
/// wire and awaiting its response.
pub struct PendingRequest {
    pub method: Method,
    pub target: String,
    /// Opaque value the retrieval engine attaches (typically a stub
    /// index) and gets back once the matching response arrives.
    pub context: u64,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl PendingRequest {
    pub fn get(target: impl Into<String>, context: u64) -> Self {
        Self {
            method: Method::Get,
            target: target.into(),
            context,
            content_type: None,
            body: Vec::new(),
        }
    }
}

/// Builds a request line, Host/Accept/Content-Type/Content-Length
/// headers and the body (if any) into a single buffer ready to write.
pub fn build_request(
    method: Method,
    host: &str,
    target: &str,
    accept: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", method.as_str(), target).as_bytes());
    out.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    out.extend_from_slice(format!("Accept: {accept}\r\n").as_bytes());
    if let Some(ct) = content_type {
        out.extend_from_slice(format!("Content-Type: {ct}\r\n").as_bytes());
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"Connection: keep-alive\r\n\r\n");
    out.extend_from_slice(body);
    out
}

/// A parsed HTTP response, handed to the caller once the full body has
/// been buffered (IEEE 2030.5 response bodies are small, bounded by
/// the schema's `DEFAULT_BUFFER_SIZE`, so no incremental-body variant
/// is needed the way the incremental codec needs one).
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

enum State {
    StatusLine,
    Headers { status: u16, content_type: Option<String>, location: Option<String> },
    Body { status: u16, content_type: Option<String>, location: Option<String>, remaining: usize, body: Vec<u8> },
}

/// Incremental HTTP/1.1 response reader over a connection's shared
/// receive buffer. One `MessageReader` per connection; `poll` is
/// called after each non-blocking read fills the buffer further.
pub struct MessageReader {
    state: State,
    scratch: Vec<u8>,
    pending_content_length: Option<usize>,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReader {
    pub fn new() -> Self {
        Self {
            state: State::StatusLine,
            scratch: Vec::new(),
            pending_content_length: None,
        }
    }

    /// Consume whatever is available in `buf`, returning a complete
    /// response if one is now available. Leaves the connection ready to
    /// parse the next pipelined response on the next call.
    pub fn poll(&mut self, buf: &mut Buffer) -> Result<Option<Response>, Error> {
        let avail = buf.remaining();
        self.scratch.extend_from_slice(avail);
        buf.advance(avail.len());

        loop {
            match &mut self.state {
                State::StatusLine => {
                    let Some(line_end) = find_crlf(&self.scratch) else {
                        return Ok(None);
                    };
                    let line = String::from_utf8_lossy(&self.scratch[..line_end]).into_owned();
                    self.scratch.drain(0..line_end + 2);
                    let mut parts = line.split_whitespace();
                    let _version = parts.next();
                    let status: u16 = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| Error::MalformedHttp(format!("bad status line: {line}")))?;
                    self.state = State::Headers {
                        status,
                        content_type: None,
                        location: None,
                    };
                }
                State::Headers {
                    status,
                    content_type,
                    location,
                } => {
                    let Some(line_end) = find_crlf(&self.scratch) else {
                        return Ok(None);
                    };
                    if line_end == 0 {
                        self.scratch.drain(0..2);
                        let remaining = self.pending_content_length.take().unwrap_or(0);
                        self.state = State::Body {
                            status: *status,
                            content_type: content_type.take(),
                            location: location.take(),
                            remaining,
                            body: Vec::new(),
                        };
                        continue;
                    }
                    let line = String::from_utf8_lossy(&self.scratch[..line_end]).into_owned();
                    self.scratch.drain(0..line_end + 2);
                    if let Some((name, value)) = line.split_once(':') {
                        let name = name.trim().to_ascii_lowercase();
                        let value = value.trim().to_string();
                        match name.as_str() {
                            "content-type" => *content_type = Some(value),
                            "location" => *location = Some(value),
                            "content-length" => {
                                self.pending_content_length =
                                    Some(value.parse().map_err(|_| {
                                        Error::MalformedHttp(format!("bad Content-Length: {value}"))
                                    })?);
                            }
                            _ => {}
                        }
                    }
                }
                State::Body {
                    status,
                    content_type,
                    location,
                    remaining,
                    body,
                } => {
                    let take = (*remaining).min(self.scratch.len());
                    body.extend_from_slice(&self.scratch[..take]);
                    self.scratch.drain(0..take);
                    *remaining -= take;
                    if *remaining > 0 {
                        return Ok(None);
                    }
                    let response = Response {
                        status: *status,
                        content_type: content_type.take(),
                        location: location.take(),
                        body: std::mem::take(body),
                    };
                    self.state = State::StatusLine;
                    return Ok(Some(response));
                }
            }
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

/// Requests waiting to be written, and requests already on the wire
/// awaiting their response, kept as two separate FIFOs so a response
/// is only ever matched against a request that was actually sent.
#[derive(Default)]
pub struct RequestQueue {
    unsent: VecDeque<PendingRequest>,
    in_flight: VecDeque<PendingRequest>,
}

impl RequestQueue {
    pub fn push(&mut self, req: PendingRequest) {
        self.unsent.push_back(req);
    }

    /// The request at the head of the unsent queue, if any is waiting
    /// to be written.
    pub fn next_unsent(&self) -> Option<&PendingRequest> {
        self.unsent.front()
    }

    /// Move the request at the head of the unsent queue onto the
    /// in-flight queue; called once it has been fully written to the
    /// wire.
    pub fn mark_sent(&mut self) {
        if let Some(req) = self.unsent.pop_front() {
            self.in_flight.push_back(req);
        }
    }

    /// Match the next response off the wire to the oldest in-flight
    /// request (HTTP/1.1 pipelining guarantees in-order responses).
    pub fn pop_match(&mut self) -> Option<PendingRequest> {
        self.in_flight.pop_front()
    }

    pub fn len(&self) -> usize {
        self.unsent.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unsent.is_empty() && self.in_flight.is_empty()
    }

    /// Drain every outstanding request - in-flight first, since those
    /// were issued earlier - for when the transport drops mid-pipeline
    /// and they need to be requeued on a fresh connection.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.in_flight.drain(..).chain(self.unsent.drain(..)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_headers_and_body_across_chunks() {
        let mut reader = MessageReader::new();
        let msg = b"HTTP/1.1 200 OK\r\nContent-Type: application/sep+xml\r\nContent-Length: 5\r\n\r\nhello";
        let mut buf = Buffer::new(8);
        let mut i = 0;
        let resp = loop {
            if i < msg.len() {
                i += buf.fill_from(&msg[i..]);
            }
            if let Some(r) = reader.poll(&mut buf).unwrap() {
                break r;
            }
            buf.compact();
        };
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.content_type.as_deref(), Some("application/sep+xml"));
    }

    #[test]
    fn request_queue_matches_fifo_order() {
        let mut q = RequestQueue::default();
        q.push(PendingRequest::get("/a", 1));
        q.push(PendingRequest::get("/b", 2));
        q.mark_sent();
        q.mark_sent();
        assert_eq!(q.pop_match().unwrap().context, 1);
        assert_eq!(q.pop_match().unwrap().context, 2);
        assert!(q.pop_match().is_none());
    }

    #[test]
    fn unsent_request_is_never_matched_before_it_is_marked_sent() {
        let mut q = RequestQueue::default();
        q.push(PendingRequest::get("/a", 1));
        assert!(q.pop_match().is_none());
        q.mark_sent();
        assert_eq!(q.pop_match().unwrap().context, 1);
    }
}
