//! In-memory pipes coupling one node's tar stream to another's.
//!
//! A pipe holds at most one chunk in flight: a write blocks until the reader
//! has taken the previous chunk. Dropping the writer is EOF for the reader;
//! dropping the reader makes further writes fail with `BrokenPipe`.

use std::io::{self, Read, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

/// Create a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(0);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

/// Writing half of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: SyncSender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reading half of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // writer gone
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Copies every write into each of several pipes.
///
/// A pipe whose reader has gone away is dropped from the set. The write
/// fails with `BrokenPipe` only once every reader is gone.
#[derive(Debug)]
pub struct TeeWriter {
    outputs: Vec<PipeWriter>,
}

impl TeeWriter {
    pub fn new(outputs: Vec<PipeWriter>) -> Self {
        Self { outputs }
    }

    /// Number of readers still attached.
    pub fn live(&self) -> usize {
        self.outputs.len()
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.outputs.retain_mut(|out| out.write_all(buf).is_ok());
        if self.outputs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "all pipe readers closed",
            ));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
