//! Record framing of `cover` export files.
//!
//! A file is a repetition of
//!
//!   size  (one byte)
//!   term  (`size` bytes)
//!
//! If `term` is `{'$size', Size2}`, the real term follows in the next
//! `Size2` bytes. This is how terms longer than 255 bytes are written.

use std::io::{ErrorKind, Read};

use crate::error::TermError;
use crate::term::{self, Term};

const SIZE_ESCAPE: &str = "$size";

/// Reads successive top-level terms from a cover data stream.
pub struct TermReader<R> {
    inner: R,
    records: usize,
}

impl<R: Read> TermReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, records: 0 }
    }

    /// Number of records read so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Read the next term. `Ok(None)` means the stream ended cleanly before a
    /// length byte.
    pub fn read_term(&mut self) -> Result<Option<Term>, TermError> {
        let size = match self.read_length()? {
            Some(size) => size,
            None => return Ok(None),
        };
        let mut term = self.read_sized(usize::from(size))?;

        if let Some(escaped) = size_escape(&term)? {
            term = self.read_sized(escaped)?;
        }
        self.records += 1;
        Ok(Some(term))
    }

    fn read_length(&mut self) -> Result<Option<u8>, TermError> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_sized(&mut self, size: usize) -> Result<Term, TermError> {
        let mut buf = Vec::new();
        let read = (&mut self.inner).take(size as u64).read_to_end(&mut buf)?;
        if read != size {
            return Err(TermError::ShortRead);
        }
        term::decode(&buf)
    }
}

impl<R: Read> Iterator for TermReader<R> {
    type Item = Result<Term, TermError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_term().transpose()
    }
}

/// `Some(n)` when `term` is the `{'$size', n}` marker.
fn size_escape(term: &Term) -> Result<Option<usize>, TermError> {
    let elements = match term.as_tuple() {
        Some(elements) if elements.len() == 2 && elements[0].is_atom(SIZE_ESCAPE) => elements,
        _ => return Ok(None),
    };
    elements[1]
        .as_integer()
        .and_then(|n| usize::try_from(n).ok())
        .map(Some)
        .ok_or(TermError::MalformedSizeEscape)
}
