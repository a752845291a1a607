#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use beamcov::term::Term;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rusqlite::Connection;
use tempfile::TempDir;

/// Create a fresh temporary database, returning the connection, dir handle, and db path.
/// The caller must hold onto `TempDir` to keep the temp directory alive.
pub fn setup_db() -> (Connection, TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let conn = beamcov::db::open(&db_path).unwrap();
    beamcov::db::init_schema(&conn).unwrap();
    (conn, dir, db_path)
}

// ── Term encoding ──────────────────────────────────────────────────────────

pub fn atom(name: &str) -> Term {
    Term::Atom(name.to_string())
}

pub fn int(value: i64) -> Term {
    Term::Integer(value)
}

/// `{file, Module, BeamPath}`
pub fn file_record(module: &str, beam_path: &str) -> Term {
    Term::Tuple(vec![atom("file"), atom(module), Term::String(beam_path.to_string())])
}

/// `{{bump, Module, Function, Arity, Clause, Line}, Hits}`
pub fn bump_record(module: &str, function: &str, arity: i64, line: i64, hits: i64) -> Term {
    Term::Tuple(vec![
        Term::Tuple(vec![
            atom("bump"),
            atom(module),
            atom(function),
            int(arity),
            int(1),
            int(line),
        ]),
        int(hits),
    ])
}

/// External term format with the version magic.
pub fn encode(term: &Term) -> Vec<u8> {
    let mut out = vec![131];
    encode_into(term, &mut out);
    out
}

fn encode_into(term: &Term, out: &mut Vec<u8>) {
    match term {
        Term::Atom(name) => {
            if name.len() < 256 {
                out.push(119);
                out.push(name.len() as u8);
            } else {
                out.push(118);
                out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            }
            out.extend_from_slice(name.as_bytes());
        }
        Term::Integer(value) => {
            if (0..=255).contains(value) {
                out.extend_from_slice(&[97, *value as u8]);
            } else if let Ok(v) = i32::try_from(*value) {
                out.push(98);
                out.extend_from_slice(&v.to_be_bytes());
            } else {
                let digits: Vec<u8> = value
                    .unsigned_abs()
                    .to_le_bytes()
                    .into_iter()
                    .collect();
                out.extend_from_slice(&[110, digits.len() as u8, u8::from(*value < 0)]);
                out.extend_from_slice(&digits);
            }
        }
        Term::Tuple(elements) => {
            if elements.len() < 256 {
                out.extend_from_slice(&[104, elements.len() as u8]);
            } else {
                out.push(105);
                out.extend_from_slice(&(elements.len() as u32).to_be_bytes());
            }
            for e in elements {
                encode_into(e, out);
            }
        }
        Term::List(items) if items.is_empty() => out.push(106),
        Term::List(items) => {
            out.push(108);
            out.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, out);
            }
            out.push(106);
        }
        Term::String(s) => {
            out.push(107);
            out.extend_from_slice(&(s.len() as u16).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

/// Compressed external term format (tag 80).
pub fn encode_compressed(term: &Term) -> Vec<u8> {
    let plain = encode(term);
    let body = &plain[1..];
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut out = vec![131, 80];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&compressed);
    out
}

/// Frame an encoded term the way cover export files do, using the
/// `{'$size', N}` escape for terms longer than 255 bytes.
pub fn frame(encoded: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if encoded.len() <= 255 {
        out.push(encoded.len() as u8);
    } else {
        let marker = encode(&Term::Tuple(vec![atom("$size"), int(encoded.len() as i64)]));
        out.push(marker.len() as u8);
        out.extend_from_slice(&marker);
    }
    out.extend_from_slice(encoded);
    out
}

/// Builder for the bytes of a cover export file.
#[derive(Default)]
pub struct CoverFile {
    bytes: Vec<u8>,
}

impl CoverFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, term: &Term) -> Self {
        self.bytes.extend(frame(&encode(term)));
        self
    }

    pub fn compressed(mut self, term: &Term) -> Self {
        self.bytes.extend(frame(&encode_compressed(term)));
        self
    }

    pub fn module(self, name: &str, beam_path: &str) -> Self {
        self.term(&file_record(name, beam_path))
    }

    pub fn bump(self, module: &str, function: &str, arity: i64, line: i64, hits: i64) -> Self {
        self.term(&bump_record(module, function, arity, line, hits))
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_to(self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, &self.bytes).unwrap();
        path
    }
}

/// Cover data for a module `m` with `f/1` lines 10:1, 11:0 and 12:3.
pub fn sample_cover() -> CoverFile {
    CoverFile::new()
        .module("m", "/proj/app/ebin/m.beam")
        .bump("m", "f", 1, 10, 1)
        .bump("m", "f", 1, 11, 0)
        .bump("m", "f", 1, 12, 3)
}
