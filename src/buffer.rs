//! Buffered socket I/O.
//!
//! `receive` drains a stream into a growable buffer, either until the peer
//! closes the connection or until an exact number of bytes has arrived.
//! `send_all` pushes a whole buffer out, looping over partial writes.
//!
//! Both work on any `AsyncRead`/`AsyncWrite`, so the same code runs against
//! TCP sockets, in-memory pipes and mock streams. An optional timeout bounds
//! each single read or write call, never the transfer as a whole: a peer
//! that keeps sending slowly is fine, a peer that goes quiet is not.

use std::borrow::Cow;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Starting capacity of a receive buffer.
///
/// Kept small on purpose: most replies outgrow it, and the growth path is
/// the one that has to be right.
pub const INITIAL_CAPACITY: usize = 16;

/// Bytes collected by a single `receive` call.
///
/// `len()` is the number of bytes actually received; `capacity()` is how
/// far the backing storage grew while receiving them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReceiveBuffer {
    /// Number of bytes received.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Allocated size reached during the receive.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The received bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The received bytes as text, replacing invalid UTF-8.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Take ownership of the received bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Read from `reader` into a fresh buffer.
///
/// With `max_bytes == 0` reading continues until the peer closes the
/// stream. Otherwise reading stops as soon as `max_bytes` have arrived, and
/// no read ever asks for more than is still missing, so bytes that belong to
/// the next message stay in the stream.
///
/// A zero-length read ends the receive normally with whatever was collected.
/// Any read error discards the partial buffer and is returned as is. A read
/// that makes no progress within `io_timeout` fails with `TimedOut`.
pub async fn receive<R>(
    reader: &mut R,
    max_bytes: usize,
    io_timeout: Option<Duration>,
) -> io::Result<ReceiveBuffer>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; INITIAL_CAPACITY];
    let mut received = 0;

    loop {
        if max_bytes != 0 && received >= max_bytes {
            break;
        }

        // Full before reaching the target: double
        if received == buf.len() {
            let grown = buf.len() * 2;
            buf.resize(grown, 0);
            trace!(capacity = grown, "Extended receive buffer");
        }

        let mut window = buf.len() - received;
        if max_bytes != 0 {
            window = window.min(max_bytes - received);
        }

        let n = bounded(
            io_timeout,
            "read",
            reader.read(&mut buf[received..received + window]),
        )
        .await?;
        trace!(bytes = n, total = received + n, "Received chunk");

        if n == 0 {
            trace!("Remote closed the connection");
            break;
        }
        received += n;
    }

    if max_bytes != 0 && received > max_bytes {
        received = max_bytes;
    }

    let capacity = buf.len();
    buf.truncate(received);

    Ok(ReceiveBuffer {
        data: buf,
        capacity,
    })
}

/// Write all of `data` to `writer`.
///
/// Each write covers only the unsent suffix. A write that accepts zero
/// bytes fails with `WriteZero`, one that blocks longer than `io_timeout`
/// fails with `TimedOut`; other errors are returned without retry.
pub async fn send_all<W>(
    writer: &mut W,
    data: &[u8],
    io_timeout: Option<Duration>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut sent = 0;

    while sent < data.len() {
        let n = bounded(io_timeout, "write", writer.write(&data[sent..])).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "peer stopped accepting data",
            ));
        }
        sent += n;
        trace!(bytes = n, remaining = data.len() - sent, "Sent chunk");
    }

    bounded(io_timeout, "flush", writer.flush()).await
}

/// Run one I/O call, failing with `TimedOut` if it outlasts `limit`.
async fn bounded<T>(
    limit: Option<Duration>,
    op: &'static str,
    call: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{op} made no progress in {limit:?}"),
            )
        })?,
        None => call.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_receive_until_eof() {
        let mut mock = Builder::new().read(b"hello ").read(b"world").build();

        let buf = receive(&mut mock, 0, None).await.unwrap();
        assert_eq!(buf.as_bytes(), b"hello world");
        assert_eq!(buf.len(), 11);
    }

    #[tokio::test]
    async fn test_receive_chunking_is_transparent() {
        let data = payload(1000);

        for chunk in [1, 3, 16, 17, 500, 1000] {
            let mut builder = Builder::new();
            for part in data.chunks(chunk) {
                builder.read(part);
            }
            let mut mock = builder.build();

            let buf = receive(&mut mock, 0, None).await.unwrap();
            assert_eq!(buf.as_bytes(), &data[..], "chunk size {chunk}");
        }
    }

    #[tokio::test]
    async fn test_receive_exact_count_across_reads() {
        let mut mock = Builder::new().read(b"0").read(b"7").read(b"\n").build();

        let buf = receive(&mut mock, 3, None).await.unwrap();
        assert_eq!(buf.as_bytes(), b"07\n");
    }

    #[tokio::test]
    async fn test_receive_exact_count_leaves_rest_in_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"07\n12\n").await.unwrap();

        let first = receive(&mut server, 3, None).await.unwrap();
        let second = receive(&mut server, 3, None).await.unwrap();
        assert_eq!(first.as_bytes(), b"07\n");
        assert_eq!(second.as_bytes(), b"12\n");
    }

    #[tokio::test]
    async fn test_receive_stops_early_on_close() {
        let mut mock = Builder::new().read(b"0").build();

        let buf = receive(&mut mock, 3, None).await.unwrap();
        assert_eq!(buf.as_bytes(), b"0");
    }

    #[tokio::test]
    async fn test_receive_empty_stream() {
        let mut mock = Builder::new().build();

        let buf = receive(&mut mock, 0, None).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_receive_read_error_discards_data() {
        let mut mock = Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = receive(&mut mock, 0, None).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_receive_buffer_grows() {
        let data = payload(INITIAL_CAPACITY * 5);
        let mut mock = Builder::new().read(&data).build();

        let buf = receive(&mut mock, 0, None).await.unwrap();
        assert_eq!(buf.len(), data.len());
        assert!(buf.capacity() >= buf.len());
        assert!(buf.capacity() > INITIAL_CAPACITY);
    }

    #[tokio::test]
    async fn test_send_all_partial_writes() {
        let mut mock = Builder::new().write(b"hel").write(b"lo").build();

        send_all(&mut mock, b"hello", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_all_write_error() {
        let mut mock = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .build();

        let err = send_all(&mut mock, b"hello", None).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_send_then_receive_over_socket_pair() {
        for size in [0, 1, 4096, 1 << 20] {
            let data = payload(size);
            let (mut writer, mut reader) = tokio::io::duplex(8192);

            let expected = data.clone();
            let send = tokio::spawn(async move {
                send_all(&mut writer, &data, None).await.unwrap();
            });

            let buf = if size == 0 {
                // Nothing to count down, read until the writer goes away
                send.await.unwrap();
                receive(&mut reader, 0, None).await.unwrap()
            } else {
                let buf = receive(&mut reader, size, None).await.unwrap();
                send.await.unwrap();
                buf
            };

            assert_eq!(buf.as_bytes(), &expected[..], "payload size {size}");
        }
    }

    #[tokio::test]
    async fn test_receive_timeout_is_per_read() {
        // Five gaps of 60ms add up to well past the 150ms bound, but no
        // single read waits that long.
        let gap = Duration::from_millis(60);
        let mut builder = Builder::new();
        for part in [&b"ab"[..], b"cd", b"ef", b"gh", b"ij"] {
            builder.wait(gap).read(part);
        }
        let mut mock = builder.build();

        let buf = receive(&mut mock, 0, Some(Duration::from_millis(150)))
            .await
            .unwrap();
        assert_eq!(buf.as_bytes(), b"abcdefghij");
    }

    #[tokio::test]
    async fn test_receive_times_out_when_peer_goes_quiet() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"partial").await.unwrap();

        let err = receive(&mut server, 0, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(client);
    }

    #[tokio::test]
    async fn test_send_all_times_out_when_peer_stops_reading() {
        let (mut writer, reader) = tokio::io::duplex(4);

        let err = send_all(&mut writer, &payload(64), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(reader);
    }
}
