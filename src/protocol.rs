//! Wire format of the command server.
//!
//! A client sends fixed 3-byte tokens, conventionally two ASCII digits and
//! a terminator (`"07\n"`). Each token names a destination index. The
//! server answers with the fetched content, or a single `ERROR` line.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of one command token.
pub const COMMAND_LEN: usize = 3;

/// A decoded command token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Requested destination index.
    pub index: usize,
}

/// Token decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Token holds no leading digits
    InvalidCommand(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidCommand(token) => write!(f, "Invalid command: {:?}", token),
        }
    }
}

impl std::error::Error for ParseError {}

impl Command {
    /// Decode a token.
    ///
    /// Leading ASCII whitespace is skipped and the following run of digits
    /// is the index; whatever comes after it (`\n`, `\r`, `\0`, ...) is
    /// ignored.
    pub fn parse(token: &[u8]) -> Result<Command, ParseError> {
        let start = token
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(token.len());
        let digits = &token[start..];
        let end = digits
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(digits.len());

        if end == 0 {
            return Err(ParseError::InvalidCommand(
                String::from_utf8_lossy(token).into_owned(),
            ));
        }

        // At most COMMAND_LEN digits in practice, but stay safe on long input
        let index = digits[..end]
            .iter()
            .try_fold(0usize, |acc, b| {
                acc.checked_mul(10)?.checked_add(usize::from(b - b'0'))
            })
            .unwrap_or(usize::MAX);

        Ok(Command { index })
    }
}

/// Server replies
pub struct Response;

impl Response {
    /// Generate an error line
    pub fn error(msg: &str) -> Bytes {
        let mut response = BytesMut::with_capacity(msg.len() + 7);
        response.put_slice(b"ERROR ");
        response.put_slice(msg.as_bytes());
        response.put_u8(b'\n');
        response.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_digits() {
        assert_eq!(Command::parse(b"07\n").unwrap().index, 7);
        assert_eq!(Command::parse(b"21\n").unwrap().index, 21);
    }

    #[test]
    fn test_parse_ignores_trailing_bytes() {
        assert_eq!(Command::parse(b"3\r\n").unwrap().index, 3);
        assert_eq!(Command::parse(b"12\0").unwrap().index, 12);
        assert_eq!(Command::parse(b"999").unwrap().index, 999);
    }

    #[test]
    fn test_parse_leading_whitespace() {
        assert_eq!(Command::parse(b" 5\n").unwrap().index, 5);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            Command::parse(b"ab\n"),
            Err(ParseError::InvalidCommand(_))
        ));
        assert!(Command::parse(b"-1\n").is_err());
        assert!(Command::parse(b"\n\n\n").is_err());
    }

    #[test]
    fn test_error_response() {
        assert_eq!(&Response::error("not implemented")[..], b"ERROR not implemented\n");
    }
}
