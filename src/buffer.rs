//! Half-duplex read/write scratch buffer.
//!
//! Grounded on `examples/original_source/buffer.go`: MySQL connections are
//! strictly half-duplex at the command level, so reads and writes can
//! legitimately share one backing store. A single `Vec<u8>` plays both
//! roles — `pos..len` is the live, not-yet-consumed read slice, and
//! whatever lies beyond `len` (up to capacity) is free for a write rental.
//! The cache cap keeps one oversized query from permanently inflating
//! per-connection memory, matching the teacher's `maxCachedBufSize`
//! discipline.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const DEFAULT_BUF_SIZE: usize = 4096;
const MAX_CACHED_BUF_SIZE: usize = 256 * 1024;

/// A reader the `Buffer` can arm a read deadline on before each underlying
/// read. `std::net::TcpStream` / `UnixStream` implement this directly; the
/// handshake/command path is generic over it so tests can substitute an
/// in-memory stand-in.
pub trait Deadline: Read {
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> std::io::Result<()>;
}

pub struct Buffer<S> {
    store: Vec<u8>,
    pos: usize,
    len: usize,
    stream: S,
    /// A one-off rental for writes larger than `MAX_CACHED_BUF_SIZE`; never
    /// folded into `store`, so the cache stays bounded regardless of how
    /// large a single payload gets.
    overflow: Vec<u8>,
    pub read_timeout: Option<Duration>,
}

impl<S: Deadline> Buffer<S> {
    pub fn new(stream: S) -> Self {
        Self {
            store: vec![0u8; DEFAULT_BUF_SIZE],
            pos: 0,
            len: 0,
            stream,
            overflow: Vec::new(),
            read_timeout: None,
        }
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// `true` if bytes read but not yet consumed remain.
    pub fn busy(&self) -> bool {
        self.pos < self.len
    }

    fn live_len(&self) -> usize {
        self.len - self.pos
    }

    /// Refills the live slice until at least `need` bytes are present.
    fn fill(&mut self, need: usize) -> Result<()> {
        if need > self.store.len() {
            let rounded = ((need / DEFAULT_BUF_SIZE) + 1) * DEFAULT_BUF_SIZE;
            let mut grown = vec![0u8; rounded];
            grown[..self.live_len()].copy_from_slice(&self.store[self.pos..self.len]);
            if rounded <= MAX_CACHED_BUF_SIZE {
                self.store = grown;
            } else {
                // Too big to keep around; use it for this refill only, and
                // swap it back out once the oversized packet is consumed.
                let leftover = self.live_len();
                self.store = Vec::new();
                std::mem::swap(&mut self.store, &mut grown);
                self.pos = 0;
                self.len = leftover;
                return self.fill_into_current(need);
            }
        } else {
            self.store.copy_within(self.pos..self.len, 0);
        }
        self.len = self.live_len();
        self.pos = 0;
        self.fill_into_current(need)
    }

    fn fill_into_current(&mut self, need: usize) -> Result<()> {
        loop {
            if self.len >= need {
                return Ok(());
            }
            if let Some(timeout) = self.read_timeout {
                self.stream
                    .set_read_deadline(Some(Instant::now() + timeout))?;
            }
            let n = self.stream.read(&mut self.store[self.len..])?;
            if n == 0 {
                if self.len < need {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "unexpected end of input",
                    )));
                }
                return Ok(());
            }
            self.len += n;
        }
    }

    /// Returns the next `need` bytes, refilling from the transport if the
    /// live slice is shorter. The returned slice is a view into `self` and
    /// is only valid until the next call that mutates the buffer.
    pub fn read_next(&mut self, need: usize) -> Result<&[u8]> {
        if self.live_len() < need {
            self.fill(need)?;
        }
        let start = self.pos;
        self.pos += need;
        Ok(&self.store[start..start + need])
    }

    /// Lengths up to `MAX_CACHED_BUF_SIZE` grow and are served out of the
    /// retained `store`, widening the cache for future calls. Anything
    /// larger is served out of a separate one-off allocation that is never
    /// folded back into `store`, so one oversized write can't permanently
    /// inflate the per-connection cache.
    fn rent_write_region(&mut self, length: usize) -> &mut [u8] {
        if length <= self.store.len() {
            return &mut self.store[..length];
        }
        if length <= MAX_CACHED_BUF_SIZE {
            self.store = vec![0u8; length];
            return &mut self.store[..length];
        }
        self.overflow = vec![0u8; length];
        &mut self.overflow[..length]
    }

    /// Rents a writable region of exactly `length` bytes. Fails with
    /// `ErrBusyBuffer` if a read is still live, enforcing the single-
    /// in-flight discipline of spec section 3.
    pub fn take_write_buffer(&mut self, length: usize) -> Result<&mut [u8]> {
        if self.busy() {
            return Err(Error::BusyBuffer);
        }
        Ok(self.rent_write_region(length))
    }

    /// Rents a `length`-byte region, lets `fill` populate it, then writes
    /// the populated bytes straight to the stream and flushes. Reuses the
    /// same write rental `take_write_buffer` does instead of allocating a
    /// fresh `Vec` per call, so a hot connection's per-command write
    /// traffic stays within the cached store.
    pub fn write_through(&mut self, length: usize, fill: impl FnOnce(&mut [u8])) -> Result<()>
    where
        S: std::io::Write,
    {
        if self.busy() {
            return Err(Error::BusyBuffer);
        }
        fill(self.rent_write_region(length));
        let written = if length <= MAX_CACHED_BUF_SIZE {
            &self.store[..length]
        } else {
            &self.overflow[..length]
        };
        self.stream.write_all(written).map_err(Error::Io)?;
        self.stream.flush().map_err(Error::Io)?;
        Ok(())
    }

    /// Shortcut for lengths known to be smaller than `DEFAULT_BUF_SIZE`.
    pub fn take_small_write_buffer(&mut self, length: usize) -> Result<&mut [u8]> {
        if self.busy() {
            return Err(Error::BusyBuffer);
        }
        Ok(&mut self.store[..length])
    }

    /// Rents the whole cached store at its current capacity.
    pub fn take_complete_buffer(&mut self) -> Result<&mut [u8]> {
        if self.busy() {
            return Err(Error::BusyBuffer);
        }
        Ok(&mut self.store[..])
    }

    /// Donates a possibly-grown buffer back for reuse, if it would widen
    /// the cache (but never past `MAX_CACHED_BUF_SIZE`).
    pub fn store(&mut self, buf: Vec<u8>) {
        if buf.len() <= MAX_CACHED_BUF_SIZE && buf.len() > self.store.len() {
            self.store = buf;
            self.pos = 0;
            self.len = 0;
        }
    }

    #[cfg(test)]
    pub fn cached_len(&self) -> usize {
        self.store.len()
    }
}
