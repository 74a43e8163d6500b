//! Minimal HTTP/1.1 plumbing for the listener: a streaming header-terminator
//! matcher, request-line parsing, and response rendering. Deliberately not a
//! general HTTP implementation; the protocol surface is one request line per
//! connection.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Hard cap on the request head. A client that sends more without reaching
/// the terminator is cut off.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

const PATTERN: [u8; 4] = *b"\r\n\r\n";

/// Incremental CRLFCRLF matcher. Streaming state machine over single bytes;
/// never rescans the buffer, so a slow client costs at most the byte cap.
#[derive(Debug, Default)]
pub struct HeaderTerminator {
    matched: usize,
}

impl HeaderTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte; returns true exactly when the terminator completes.
    /// On mismatch the counter resets to 1 only when the current byte equals
    /// the pattern's first byte, else to 0.
    pub fn feed(&mut self, byte: u8) -> bool {
        if byte == PATTERN[self.matched] {
            self.matched += 1;
            if self.matched == PATTERN.len() {
                self.matched = 0;
                return true;
            }
        } else if byte == PATTERN[0] {
            self.matched = 1;
        } else {
            self.matched = 0;
        }
        false
    }
}

/// Method and path from the request line. Anything after the second token
/// (the HTTP version) is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
}

/// Splits the first line of the head on spaces and requires at least method
/// and path tokens. `None` means reject: close the connection, no dispatch.
pub fn parse_request_line(head: &str) -> Option<RequestLine> {
    let line = head.lines().next()?;
    let mut tokens = line.split(' ').filter(|token| !token.is_empty());
    let method = tokens.next()?;
    let path = tokens.next()?;
    Some(RequestLine {
        method: method.to_owned(),
        path: path.to_owned(),
    })
}

/// Reads the request head up to and including CRLFCRLF. `None` means the
/// connection should be closed without dispatching: EOF before the
/// terminator, the byte cap exceeded, or a read error.
pub async fn read_head<R>(stream: &mut R) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut matcher = HeaderTerminator::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => {
                debug!("connection closed before header terminator");
                return None;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(%err, "request read failed");
                return None;
            }
        };
        for &byte in &chunk[..n] {
            head.push(byte);
            if head.len() > MAX_HEAD_BYTES {
                debug!(cap = MAX_HEAD_BYTES, "request head exceeded byte cap");
                return None;
            }
            if matcher.feed(byte) {
                return Some(String::from_utf8_lossy(&head).into_owned());
            }
        }
    }
}

/// Renders the response for one cycle: a buffered body is `200 OK` with an
/// exact `Content-Length`, no body is `204 No Content`.
pub fn render_response(body: Option<&str>) -> Vec<u8> {
    match body {
        Some(body) => format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        )
        .into_bytes(),
        None => b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn feed_all(matcher: &mut HeaderTerminator, bytes: &[u8]) -> Vec<bool> {
        bytes.iter().map(|&b| matcher.feed(b)).collect()
    }

    #[test]
    fn terminator_matches_crlfcrlf() {
        let mut matcher = HeaderTerminator::new();
        let hits = feed_all(&mut matcher, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(hits.iter().filter(|&&hit| hit).count(), 1);
        assert!(hits.last().copied().unwrap_or(false));
    }

    #[test]
    fn mismatch_on_cr_resets_to_one_not_zero() {
        let mut matcher = HeaderTerminator::new();
        // \r\n\r then \r: the fourth byte mismatches PATTERN[3] but is \r,
        // so the counter restarts at 1 and \n\r\n completes the match.
        let hits = feed_all(&mut matcher, b"\r\n\r\r\n\r\n");
        assert_eq!(hits, vec![false, false, false, false, false, false, true]);
    }

    #[test]
    fn mismatch_on_other_byte_resets_to_zero() {
        let mut matcher = HeaderTerminator::new();
        let hits = feed_all(&mut matcher, b"\r\n\rX\r\n\r\n");
        assert_eq!(hits, vec![false, false, false, false, false, false, false, true]);
    }

    #[test]
    fn request_line_requires_method_and_path() {
        let parsed = parse_request_line("GET /health HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.path, "/health");

        // Version token is optional.
        assert!(parse_request_line("GET /\r\n\r\n").is_some());
        assert!(parse_request_line("GET\r\n\r\n").is_none());
        assert!(parse_request_line("").is_none());
        assert!(parse_request_line("   \r\n\r\n").is_none());
    }

    #[test]
    fn response_rendering() {
        let ok = String::from_utf8(render_response(Some(r#"{"status":"ok"}"#))).unwrap();
        assert!(ok.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(ok.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(ok.contains("Content-Length: 15\r\n"));
        assert!(ok.ends_with(r#"{"status":"ok"}"#));

        let empty = String::from_utf8(render_response(None)).unwrap();
        assert!(empty.starts_with("HTTP/1.1 204 No Content\r\n"));
    }

    #[tokio::test]
    async fn read_head_stops_at_terminator() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\nignored body")
            .await
            .unwrap();
        let head = read_head(&mut server).await.unwrap();
        assert!(head.starts_with("GET /health"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn read_head_rejects_oversized_requests() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let junk = vec![b'a'; MAX_HEAD_BYTES + 1];
        client.write_all(&junk).await.unwrap();
        client.shutdown().await.unwrap();
        assert!(read_head(&mut server).await.is_none());
    }

    #[tokio::test]
    async fn read_head_rejects_truncated_requests() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        client.shutdown().await.unwrap();
        assert!(read_head(&mut server).await.is_none());
    }
}
