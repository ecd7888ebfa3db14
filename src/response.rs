//! Splitting raw HTTP responses into headers and content.

use bytes::Bytes;

/// Separator between the header block and the body.
const DELIMITER: &[u8] = b"\r\n\r\n";

/// A response split on its first blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status line and headers, without the delimiter.
    pub headers: Bytes,
    /// Everything after the delimiter.
    pub content: Bytes,
}

/// The buffer holds no `\r\n\r\n`, so it is not an HTTP message.
///
/// The unsplit bytes are handed back so callers can still use them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedResponse {
    pub raw: Bytes,
}

impl std::fmt::Display for MalformedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Malformed response: no header delimiter in {} bytes",
            self.raw.len()
        )
    }
}

impl std::error::Error for MalformedResponse {}

/// Split `buffer` at the first `\r\n\r\n`.
///
/// The buffer is consumed; both halves share its allocation.
pub fn split_response(buffer: impl Into<Bytes>) -> Result<HttpResponse, MalformedResponse> {
    let mut raw: Bytes = buffer.into();

    let pos = match find_delimiter(&raw) {
        Some(pos) => pos,
        None => return Err(MalformedResponse { raw }),
    };

    let headers = raw.split_to(pos);
    let content = raw.split_off(DELIMITER.len());

    Ok(HttpResponse { headers, content })
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_basic() {
        let response = split_response(b"HDR\r\n\r\nBODY".to_vec()).unwrap();
        assert_eq!(&response.headers[..], b"HDR");
        assert_eq!(&response.content[..], b"BODY");
    }

    #[test]
    fn test_split_on_first_delimiter() {
        let response = split_response(b"A: 1\r\n\r\nx\r\n\r\ny".to_vec()).unwrap();
        assert_eq!(&response.headers[..], b"A: 1");
        assert_eq!(&response.content[..], b"x\r\n\r\ny");
    }

    #[test]
    fn test_split_empty_body() {
        let response = split_response(b"HTTP/1.0 204 No Content\r\n\r\n".to_vec()).unwrap();
        assert_eq!(&response.headers[..], b"HTTP/1.0 204 No Content");
        assert!(response.content.is_empty());
    }

    #[test]
    fn test_split_keeps_first_content_byte() {
        let response = split_response(b"H\r\n\r\n<html>".to_vec()).unwrap();
        assert_eq!(response.content[0], b'<');
    }

    #[test]
    fn test_split_missing_delimiter() {
        let err = split_response(b"HTTP/1.0 200 OK\r\nbody".to_vec()).unwrap_err();
        assert_eq!(&err.raw[..], b"HTTP/1.0 200 OK\r\nbody");
    }

    #[test]
    fn test_split_empty_buffer() {
        assert!(split_response(Vec::new()).is_err());
    }
}
