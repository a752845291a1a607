//! Decoder for the subset of the Erlang external term format that appears
//! in `cover` export files.
//!
//! Each encoded buffer optionally starts with the version magic (131),
//! followed by one term:
//!
//!   97  SMALL_INTEGER_EXT    u8
//!   98  INTEGER_EXT          i32 (big-endian)
//!   110 SMALL_BIG_EXT        n:u8, sign:u8, n little-endian digits
//!   111 LARGE_BIG_EXT        n:u32, sign:u8, n little-endian digits
//!   100 ATOM_EXT             len:u16, Latin-1
//!   115 SMALL_ATOM_EXT       len:u8, Latin-1
//!   118 ATOM_UTF8_EXT        len:u16, UTF-8
//!   119 SMALL_ATOM_UTF8_EXT  len:u8, UTF-8
//!   104 SMALL_TUPLE_EXT      arity:u8, elements
//!   105 LARGE_TUPLE_EXT      arity:u32, elements
//!   106 NIL_EXT
//!   107 STRING_EXT           len:u16, bytes
//!   108 LIST_EXT             len:u32, elements, tail
//!   80  compressed           size:u32, zlib stream of `size` bytes
//!
//! Anything else is a decode failure.
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::TermError;

const VERSION_MAGIC: u8 = 131;
const COMPRESSED: u8 = 80;
const SMALL_INTEGER_EXT: u8 = 97;
const INTEGER_EXT: u8 = 98;
const ATOM_EXT: u8 = 100;
const SMALL_TUPLE_EXT: u8 = 104;
const LARGE_TUPLE_EXT: u8 = 105;
const NIL_EXT: u8 = 106;
const STRING_EXT: u8 = 107;
const LIST_EXT: u8 = 108;
const SMALL_BIG_EXT: u8 = 110;
const LARGE_BIG_EXT: u8 = 111;
const SMALL_ATOM_EXT: u8 = 115;
const ATOM_UTF8_EXT: u8 = 118;
const SMALL_ATOM_UTF8_EXT: u8 = 119;

const MAX_DEPTH: usize = 64;

/// A decoded term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Atom(String),
    Integer(i64),
    Tuple(Vec<Term>),
    List(Vec<Term>),
    String(String),
}

impl Term {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_atom(&self, name: &str) -> bool {
        self.as_atom() == Some(name)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Term::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Term]> {
        match self {
            Term::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    /// Character-list view. Strings of code points above 255 are encoded as
    /// plain lists of integers, so those are accepted too.
    pub fn as_string(&self) -> Option<String> {
        match self {
            Term::String(s) => Some(s.clone()),
            Term::List(items) => items
                .iter()
                .map(|t| {
                    t.as_integer()
                        .and_then(|c| u32::try_from(c).ok())
                        .and_then(char::from_u32)
                })
                .collect(),
            _ => None,
        }
    }
}

/// Decode one term from `buf`. Trailing bytes after the term are ignored.
pub fn decode(buf: &[u8]) -> Result<Term, TermError> {
    if buf.is_empty() {
        return Err(TermError::EmptyRecord);
    }
    let mut cursor = Cursor { buf, pos: 0 };
    if cursor.peek() == Some(VERSION_MAGIC) {
        cursor.pos += 1;
    }
    cursor.read_term(0)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TermError> {
        let end = self.pos.checked_add(n).ok_or(TermError::ShortRead)?;
        let bytes = self.buf.get(self.pos..end).ok_or(TermError::ShortRead)?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, TermError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, TermError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, TermError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_term(&mut self, depth: usize) -> Result<Term, TermError> {
        if depth > MAX_DEPTH {
            return Err(TermError::TooDeep);
        }
        let tag = self.u8()?;
        match tag {
            SMALL_INTEGER_EXT => Ok(Term::Integer(i64::from(self.u8()?))),
            INTEGER_EXT => Ok(Term::Integer(i64::from(self.u32()? as i32))),
            SMALL_BIG_EXT => {
                let n = usize::from(self.u8()?);
                self.read_big(n)
            }
            LARGE_BIG_EXT => {
                let n = self.u32()? as usize;
                self.read_big(n)
            }
            ATOM_EXT => {
                let len = usize::from(self.u16()?);
                Ok(Term::Atom(latin1(self.take(len)?)))
            }
            SMALL_ATOM_EXT => {
                let len = usize::from(self.u8()?);
                Ok(Term::Atom(latin1(self.take(len)?)))
            }
            ATOM_UTF8_EXT => {
                let len = usize::from(self.u16()?);
                self.read_utf8_atom(len)
            }
            SMALL_ATOM_UTF8_EXT => {
                let len = usize::from(self.u8()?);
                self.read_utf8_atom(len)
            }
            SMALL_TUPLE_EXT => {
                let arity = usize::from(self.u8()?);
                self.read_elements(arity, depth).map(Term::Tuple)
            }
            LARGE_TUPLE_EXT => {
                let arity = self.u32()? as usize;
                self.read_elements(arity, depth).map(Term::Tuple)
            }
            NIL_EXT => Ok(Term::List(Vec::new())),
            STRING_EXT => {
                let len = usize::from(self.u16()?);
                Ok(Term::String(latin1(self.take(len)?)))
            }
            LIST_EXT => {
                let len = self.u32()? as usize;
                let items = self.read_elements(len, depth)?;
                match self.read_term(depth + 1)? {
                    Term::List(tail) if tail.is_empty() => Ok(Term::List(items)),
                    _ => Err(TermError::ImproperList),
                }
            }
            COMPRESSED => self.read_compressed(depth),
            other => Err(TermError::UnknownTag(other)),
        }
    }

    fn read_elements(&mut self, count: usize, depth: usize) -> Result<Vec<Term>, TermError> {
        // Every element needs at least one byte, so a count larger than the
        // remaining input is already known to be short.
        if count > self.buf.len() - self.pos {
            return Err(TermError::ShortRead);
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_term(depth + 1)?);
        }
        Ok(out)
    }

    fn read_big(&mut self, n: usize) -> Result<Term, TermError> {
        let sign = self.u8()?;
        let digits = self.take(n)?;
        let mut magnitude: u128 = 0;
        for (i, &d) in digits.iter().enumerate() {
            if d == 0 {
                continue;
            }
            if i >= 16 {
                return Err(TermError::IntegerOverflow);
            }
            magnitude |= u128::from(d) << (8 * i);
        }
        let value = if sign == 0 {
            i64::try_from(magnitude).map_err(|_| TermError::IntegerOverflow)?
        } else {
            let neg = i128::try_from(magnitude).map_err(|_| TermError::IntegerOverflow)?;
            i64::try_from(-neg).map_err(|_| TermError::IntegerOverflow)?
        };
        Ok(Term::Integer(value))
    }

    fn read_utf8_atom(&mut self, len: usize) -> Result<Term, TermError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| TermError::InvalidUtf8)?;
        Ok(Term::Atom(s.to_string()))
    }

    /// Inflate exactly the declared number of bytes and decode the result.
    /// The compressed stream runs to the end of the enclosing buffer.
    fn read_compressed(&mut self, depth: usize) -> Result<Term, TermError> {
        let expected = self.u32()? as usize;
        let rest = &self.buf[self.pos..];
        let mut decoder = ZlibDecoder::new(rest);
        let mut inflated = Vec::with_capacity(expected.min(1 << 20));
        (&mut decoder)
            .take(expected as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(TermError::Inflate)?;
        if inflated.len() != expected {
            return Err(TermError::InflateSize {
                expected,
                actual: inflated.len(),
            });
        }
        self.pos += decoder.total_in() as usize;

        let mut inner = Cursor {
            buf: &inflated,
            pos: 0,
        };
        if inner.peek() == Some(VERSION_MAGIC) {
            inner.pos += 1;
        }
        inner.read_term(depth + 1)
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
