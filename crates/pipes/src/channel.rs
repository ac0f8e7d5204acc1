//! Reliable in-process pipe with explicit error propagation.
//!
//! A pipe is a connected [`PipeWriter`] / [`PipeReader`] pair. Bytes written
//! to the writer come out of the reader in order. The writer terminates the
//! stream in one of three ways, each visible to the reader:
//!
//! - [`PipeWriter::close`]: the reader sees end-of-data (`read` returns 0)
//! - [`PipeWriter::close_with_error`]: the reader's next read past the
//!   buffered data fails with [`ChannelError::Remote`]
//! - dropping the writer without closing: the reader fails with
//!   [`ChannelError::Detached`]
//!
//! Both ends block like ordinary file handles, on any thread. Called from
//! inside an async task they block that runtime thread, so prefer a plain
//! thread or `tokio::task::spawn_blocking` there.

use std::future::Future;
use std::io::{self, Read, Write};

use bytes::{Buf, Bytes};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Default number of chunks that may be in flight between the two ends.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Largest chunk carried by a single write (64KB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Terminal conditions a reader can observe instead of clean end-of-data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The writing side closed the pipe with an error.
    #[error("remote side closed with error: {0}")]
    Remote(String),

    /// The writing side went away without closing the pipe.
    #[error("remote side is detached without closing")]
    Detached,
}

impl ChannelError {
    /// Extracts the channel error carried by an I/O error, if any.
    ///
    /// Reads from a [`PipeReader`] fail with an [`io::Error`] wrapping a
    /// `ChannelError`; other I/O errors return `None`.
    pub fn from_io(err: &io::Error) -> Option<&ChannelError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<ChannelError>())
    }
}

impl From<ChannelError> for io::Error {
    fn from(err: ChannelError) -> Self {
        io::Error::other(err)
    }
}

#[derive(Debug)]
enum Frame {
    Data(Bytes),
    Eof,
    Error(String),
}

#[derive(Debug)]
enum ReadState {
    Open,
    Eof,
    Failed(ChannelError),
}

/// Creates a connected pipe with the given chunk capacity.
///
/// Returns the reading and writing ends, in that order.
pub fn pipe(capacity: usize) -> (PipeReader, PipeWriter) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        PipeReader {
            rx,
            current: Bytes::new(),
            state: ReadState::Open,
        },
        PipeWriter { tx: Some(tx) },
    )
}

/// The producing end of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Frame>>,
}

impl PipeWriter {
    /// Closes the pipe normally. The reader sees end-of-data.
    ///
    /// Fails with `BrokenPipe` if the reader is already gone.
    pub fn close(mut self) -> io::Result<()> {
        self.finish(Frame::Eof)
    }

    /// Closes the pipe with an error the reader will observe.
    ///
    /// Fails with `BrokenPipe` if the reader is already gone.
    pub fn close_with_error(mut self, message: impl Into<String>) -> io::Result<()> {
        self.finish(Frame::Error(message.into()))
    }

    fn finish(&mut self, frame: Frame) -> io::Result<()> {
        let tx = self.tx.take().ok_or_else(closed_error)?;
        wait(tx.send(frame)).map_err(|_| broken_pipe())
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let tx = self.tx.as_ref().ok_or_else(closed_error)?;
        let len = buf.len().min(MAX_CHUNK_SIZE);
        wait(tx.send(Frame::Data(Bytes::copy_from_slice(&buf[..len]))))
            .map_err(|_| broken_pipe())?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The consuming end of a pipe.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Frame>,
    current: Bytes,
    state: ReadState,
}

impl PipeReader {
    /// Reports an error the writer has already signalled.
    ///
    /// Does not block. Returns `Ok(())` while the pipe is open or after a
    /// clean close, and the channel error once the writer closed with an
    /// error or detached. An error is only picked up early when all data
    /// buffered before it has been read.
    pub fn check_error(&mut self) -> io::Result<()> {
        if self.current.is_empty() && matches!(self.state, ReadState::Open) {
            match self.rx.try_recv() {
                Ok(frame) => self.accept(frame),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.state = ReadState::Failed(ChannelError::Detached)
                }
            }
        }
        match &self.state {
            ReadState::Failed(err) if self.current.is_empty() => Err(err.clone().into()),
            _ => Ok(()),
        }
    }

    fn accept(&mut self, frame: Frame) {
        match frame {
            Frame::Data(bytes) => self.current = bytes,
            Frame::Eof => self.state = ReadState::Eof,
            Frame::Error(message) => self.state = ReadState::Failed(ChannelError::Remote(message)),
        }
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.current.is_empty() {
                let len = buf.len().min(self.current.len());
                buf[..len].copy_from_slice(&self.current[..len]);
                self.current.advance(len);
                return Ok(len);
            }
            match &self.state {
                ReadState::Eof => return Ok(0),
                ReadState::Failed(err) => return Err(err.clone().into()),
                ReadState::Open => {}
            }
            match wait(self.rx.recv()) {
                Some(frame) => self.accept(frame),
                None => self.state = ReadState::Failed(ChannelError::Detached),
            }
        }
    }
}

/// Drives a channel operation to completion on the calling thread.
///
/// Safe to call from a thread inside a runtime, where tokio's `blocking_*`
/// helpers panic. Runs outside the coop budget so it is never deferred.
fn wait<F: Future>(operation: F) -> F::Output {
    futures::executor::block_on(tokio::task::coop::unconstrained(operation))
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "reading end of pipe is closed")
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe already closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clean_close_yields_all_bytes_then_eof() {
        let (mut reader, mut writer) = pipe(4);
        let handle = thread::spawn(move || {
            writer.write_all(b"0123456789").unwrap();
            writer.close().unwrap();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();

        assert_eq!(out, b"0123456789");
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_error_close_after_partial_data() {
        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"part").unwrap();
        writer.close_with_error("device unplugged").unwrap();

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();

        assert_eq!(out, b"part");
        assert_eq!(
            ChannelError::from_io(&err),
            Some(&ChannelError::Remote("device unplugged".to_string()))
        );
    }

    #[test]
    fn test_error_is_sticky() {
        let (mut reader, writer) = pipe(1);
        writer.close_with_error("boom").unwrap();

        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
        assert!(reader.read(&mut buf).is_err());
        assert!(reader.check_error().is_err());
    }

    #[test]
    fn test_dropped_writer_is_detached_not_eof() {
        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"abc").unwrap();
        drop(writer);

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();

        assert_eq!(out, b"abc");
        assert_eq!(ChannelError::from_io(&err), Some(&ChannelError::Detached));
    }

    #[test]
    fn test_write_after_reader_dropped_is_broken_pipe() {
        let (reader, mut writer) = pipe(4);
        drop(reader);

        let err = writer.write(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(writer.close().is_err());
    }

    #[test]
    fn test_large_write_is_chunked() {
        let (mut reader, mut writer) = pipe(2);
        let payload: Vec<u8> = (0..(MAX_CHUNK_SIZE * 3 + 17)).map(|i| i as u8).collect();
        let expected = payload.clone();

        let handle = thread::spawn(move || {
            writer.write_all(&payload).unwrap();
            writer.close().unwrap();
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_small_reads_drain_a_chunk() {
        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"hello").unwrap();
        writer.close().unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"he");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ll");
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'o');
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_check_error_open_pipe_is_ok() {
        let (mut reader, _writer) = pipe(4);
        assert!(reader.check_error().is_ok());
    }

    #[test]
    fn test_check_error_sees_pending_error() {
        let (mut reader, writer) = pipe(4);
        writer.close_with_error("aborted").unwrap();

        let err = reader.check_error().unwrap_err();
        assert_eq!(
            ChannelError::from_io(&err),
            Some(&ChannelError::Remote("aborted".to_string()))
        );
    }

    #[test]
    fn test_check_error_waits_for_buffered_data() {
        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"xy").unwrap();
        writer.close_with_error("late").unwrap();

        // Data buffered ahead of the error is still delivered first.
        assert!(reader.check_error().is_ok());
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert!(reader.check_error().is_err());
    }

    #[test]
    fn test_check_error_after_clean_close_is_ok() {
        let (mut reader, writer) = pipe(4);
        writer.close().unwrap();
        assert!(reader.check_error().is_ok());
        assert_eq!(reader.read(&mut [0u8; 4]).unwrap(), 0);
    }

    #[test]
    fn test_from_io_ignores_foreign_errors() {
        let err = io::Error::new(io::ErrorKind::Other, "unrelated");
        assert!(ChannelError::from_io(&err).is_none());
    }

    #[test]
    fn test_empty_writes_and_reads() {
        let (mut reader, mut writer) = pipe(1);
        assert_eq!(writer.write(&[]).unwrap(), 0);
        assert_eq!(reader.read(&mut []).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ends_usable_from_async_context() {
        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"abc").unwrap();
        writer.close().unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reader_blocks_in_runtime_until_writer_closes() {
        let (mut reader, mut writer) = pipe(2);
        let producer = thread::spawn(move || {
            for _ in 0..16 {
                writer.write_all(b"chunk").unwrap();
            }
            writer.close_with_error("done badly").unwrap();
        });

        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        producer.join().unwrap();

        assert_eq!(out.len(), 16 * 5);
        assert_eq!(
            ChannelError::from_io(&err),
            Some(&ChannelError::Remote("done badly".to_string()))
        );
    }
}
