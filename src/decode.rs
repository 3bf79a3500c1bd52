//! Decoding of the kernel's binary notification records.
//!
//! Each record is a fixed header (`wd: i32`, `mask: u32`, `cookie: u32`,
//! `len: u32`, native endian) followed by `len` bytes of NUL-padded name.
//! A single read may carry several records, and a record may be split across
//! reads, so the decoder buffers any incomplete tail until more bytes arrive.

use std::ffi::OsString;
use std::os::unix::ffi::OsStringExt;
use crate::error::DecodeError;
use crate::events::{EventMask, WatchHandle};

/// Size of the fixed record header.
pub const HEADER_SIZE: usize = 16;

/// Longest name field accepted by default.
pub const DEFAULT_MAX_NAME_LEN: usize = 4096;

/// One decoded notification, before it is resolved against the watch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub handle: WatchHandle,
    pub mask: EventMask,
    pub cookie: u32,
    pub name: Option<OsString>,
}

impl RawRecord {
    /// Size of a record with a `name_len`-byte name field, as laid out in
    /// the stream.
    pub fn encoded_len(name_len: usize) -> usize {
        HEADER_SIZE + name_len
    }

    /// Encodes the record with its name padded to `name_len` bytes.
    /// Used to feed synthetic event sources.
    pub fn encode(&self, name_len: usize) -> Vec<u8> {
        let name = self.name.clone().map(OsString::into_vec).unwrap_or_default();
        let name_len = name_len.max(if name.is_empty() { 0 } else { name.len() + 1 });

        let mut out = Vec::with_capacity(Self::encoded_len(name_len));
        out.extend_from_slice(&self.handle.0.to_ne_bytes());
        out.extend_from_slice(&self.mask.bits().to_ne_bytes());
        out.extend_from_slice(&self.cookie.to_ne_bytes());
        out.extend_from_slice(&(name_len as u32).to_ne_bytes());
        out.extend_from_slice(&name);
        out.resize(Self::encoded_len(name_len), 0);
        out
    }
}

/// Incremental record decoder that carries partial records across reads.
#[derive(Debug)]
pub struct Decoder {
    pending: Vec<u8>,
    pos: usize,
    max_name_len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NAME_LEN)
    }
}

impl Decoder {
    pub fn new(max_name_len: usize) -> Self {
        Self {
            pending: Vec::new(),
            pos: 0,
            max_name_len,
        }
    }

    /// Appends freshly read bytes.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.pending.drain(..self.pos);
            self.pos = 0;
        }
        self.pending.extend_from_slice(chunk);
    }

    /// Bytes held back waiting for the rest of a record.
    pub fn buffered(&self) -> usize {
        self.pending.len() - self.pos
    }

    /// Decodes the next complete record.
    ///
    /// Returns `None` when the buffered bytes do not hold a full record. On a
    /// malformed header every buffered byte is discarded, since the record
    /// boundary can no longer be trusted.
    pub fn next_record(&mut self) -> Option<Result<RawRecord, DecodeError>> {
        let buf = &self.pending[self.pos..];
        if buf.len() < HEADER_SIZE {
            return None;
        }

        let wd = i32::from_ne_bytes(field(buf, 0));
        let mask = u32::from_ne_bytes(field(buf, 4));
        let cookie = u32::from_ne_bytes(field(buf, 8));
        let len = u32::from_ne_bytes(field(buf, 12));

        if len as usize > self.max_name_len {
            self.reset();
            return Some(Err(DecodeError::NameTooLong {
                len,
                max: self.max_name_len,
            }));
        }

        let total = RawRecord::encoded_len(len as usize);
        if buf.len() < total {
            return None;
        }

        let raw_name = &buf[HEADER_SIZE..total];
        let end = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        let name = if end == 0 {
            None
        } else {
            Some(OsString::from_vec(raw_name[..end].to_vec()))
        };

        self.pos += total;
        if self.pos == self.pending.len() {
            self.reset();
        }

        Some(Ok(RawRecord {
            handle: WatchHandle(wd),
            mask: EventMask::from_bits_retain(mask),
            cookie,
            name,
        }))
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.pos = 0;
    }
}

fn field(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}
