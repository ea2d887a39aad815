//! Bytecode container: the operation list plus its data-interning table, and
//! the binary codec between them (spec §4.3).
//!
//! # File format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! [u64 version] [u64 data_count]
//!   { [u8 data_type]
//!     type==Int|Size:           [i64/u64]
//!     type==Float|String|Ident: [u64 len][len bytes]
//!     type==Bool:               [u8]
//!     type==Nil:                (empty)
//!   } × data_count
//! [u64 op_count]
//!   { [u16 op][u64 srcId][u64 idx][u64 dataIdx] } × op_count
//! ```

use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::{Cursor, Read, Write};

use crate::vm::instr::{Op, Operation};

/// Current on-disk bytecode format version. Loading a file whose version
/// doesn't match is rejected rather than interpreted speculatively (spec §1
/// non-goals: "bytecode compatibility across differing version numbers").
pub const VERSION: u64 = 1;

/// A single interned constant. `Float` is stored as a formatted decimal
/// string rather than a raw 8-byte payload, per spec §9's resolution of the
/// source's draft inconsistency (forward-compatible with arbitrary
/// precision).
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Int(i64),
    Float(String),
    Str(String),
    Ident(String),
    Size(u64),
    Bool(bool),
    Nil,
}

impl Data {
    fn type_tag(&self) -> u8 {
        match self {
            Data::Int(_) => 0,
            Data::Float(_) => 1,
            Data::Str(_) => 2,
            Data::Ident(_) => 3,
            Data::Size(_) => 4,
            Data::Bool(_) => 5,
            Data::Nil => 6,
        }
    }
}

#[derive(Debug, Clone)]
pub enum BytecodeError {
    Io(String),
    InvalidMagic,
    UnsupportedVersion(u64),
    InvalidOpCode(u16),
    Truncated,
}

impl std::fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BytecodeError::Io(e) => write!(f, "I/O error: {}", e),
            BytecodeError::InvalidMagic => write!(f, "not a June bytecode file"),
            BytecodeError::UnsupportedVersion(v) => {
                write!(f, "unsupported bytecode version: {} (current: {})", v, VERSION)
            }
            BytecodeError::InvalidOpCode(n) => write!(f, "invalid opcode: {}", n),
            BytecodeError::Truncated => write!(f, "bytecode stream ended unexpectedly"),
        }
    }
}

impl std::error::Error for BytecodeError {}

impl From<std::io::Error> for BytecodeError {
    fn from(e: std::io::Error) -> Self {
        BytecodeError::Io(e.to_string())
    }
}

/// The data-interning table: deduplicates constants by `(type, payload)` so
/// the same literal appearing twice in source gets one entry (spec §3
/// "Bytecode").
#[derive(Debug, Clone, Default)]
pub struct DataTable {
    entries: Vec<Data>,
    index: HashMap<(u8, String), u64>,
}

impl DataTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(data: &Data) -> (u8, String) {
        let payload = match data {
            Data::Int(n) => n.to_string(),
            Data::Float(s) => s.clone(),
            Data::Str(s) => s.clone(),
            Data::Ident(s) => s.clone(),
            Data::Size(n) => n.to_string(),
            Data::Bool(b) => b.to_string(),
            Data::Nil => String::new(),
        };
        (data.type_tag(), payload)
    }

    /// Insert `data`, returning its index. Inserting an equal `(type,
    /// payload)` pair twice returns the same index (spec §8 "Data-table
    /// interning is idempotent").
    pub fn intern(&mut self, data: Data) -> u64 {
        let key = Self::key_for(&data);
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.entries.len() as u64;
        self.index.insert(key, idx);
        self.entries.push(data);
        idx
    }

    pub fn get(&self, idx: u64) -> Option<&Data> {
        self.entries.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An ordered instruction stream plus its data table.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub data: DataTable,
    pub ops: Vec<Operation>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation) {
        self.ops.push(op);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&(self.data.entries.len() as u64).to_be_bytes());
        for d in &self.data.entries {
            write_data(&mut out, d);
        }
        out.extend_from_slice(&(self.ops.len() as u64).to_be_bytes());
        for op in &self.ops {
            out.extend_from_slice(&(op.op as u16).to_be_bytes());
            out.extend_from_slice(&op.src_id.to_be_bytes());
            out.extend_from_slice(&op.idx.to_be_bytes());
            out.extend_from_slice(&op.data_idx.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BytecodeError> {
        let mut cur = Cursor::new(bytes);
        let version = read_u64(&mut cur)?;
        if version != VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let data_count = read_u64(&mut cur)?;
        let mut data = DataTable::new();
        for _ in 0..data_count {
            let d = read_data(&mut cur)?;
            data.intern(d);
        }
        let op_count = read_u64(&mut cur)?;
        let mut ops = Vec::with_capacity(op_count as usize);
        for _ in 0..op_count {
            let raw_op = read_u16(&mut cur)?;
            let op = Op::try_from(raw_op).map_err(|e| BytecodeError::InvalidOpCode(e.0))?;
            let src_id = read_u64(&mut cur)?;
            let idx = read_u64(&mut cur)?;
            let data_idx = read_u64(&mut cur)?;
            ops.push(Operation::new(src_id, idx, op, data_idx));
        }
        Ok(Bytecode { data, ops })
    }
}

fn write_data(out: &mut Vec<u8>, d: &Data) {
    out.push(d.type_tag());
    match d {
        Data::Int(n) => out.extend_from_slice(&n.to_be_bytes()),
        Data::Size(n) => out.extend_from_slice(&n.to_be_bytes()),
        Data::Float(s) | Data::Str(s) | Data::Ident(s) => {
            out.extend_from_slice(&(s.len() as u64).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Data::Bool(b) => out.push(*b as u8),
        Data::Nil => {}
    }
}

fn read_data(cur: &mut Cursor<&[u8]>) -> Result<Data, BytecodeError> {
    let mut tag = [0u8; 1];
    cur.read_exact(&mut tag).map_err(|_| BytecodeError::Truncated)?;
    Ok(match tag[0] {
        0 => Data::Int(read_i64(cur)?),
        1 => Data::Float(read_str(cur)?),
        2 => Data::Str(read_str(cur)?),
        3 => Data::Ident(read_str(cur)?),
        4 => Data::Size(read_u64(cur)?),
        5 => {
            let mut b = [0u8; 1];
            cur.read_exact(&mut b).map_err(|_| BytecodeError::Truncated)?;
            Data::Bool(b[0] != 0)
        }
        6 => Data::Nil,
        other => return Err(BytecodeError::Io(format!("unknown data type tag {}", other))),
    })
}

fn read_u64(cur: &mut Cursor<&[u8]>) -> Result<u64, BytecodeError> {
    let mut buf = [0u8; 8];
    cur.read_exact(&mut buf).map_err(|_| BytecodeError::Truncated)?;
    Ok(u64::from_be_bytes(buf))
}

fn read_i64(cur: &mut Cursor<&[u8]>) -> Result<i64, BytecodeError> {
    let mut buf = [0u8; 8];
    cur.read_exact(&mut buf).map_err(|_| BytecodeError::Truncated)?;
    Ok(i64::from_be_bytes(buf))
}

fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16, BytecodeError> {
    let mut buf = [0u8; 2];
    cur.read_exact(&mut buf).map_err(|_| BytecodeError::Truncated)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_str(cur: &mut Cursor<&[u8]>) -> Result<String, BytecodeError> {
    let len = read_u64(cur)? as usize;
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(|_| BytecodeError::Truncated)?;
    String::from_utf8(buf).map_err(|e| BytecodeError::Io(e.to_string()))
}

/// Write a bytecode file to `writer`, prefixed with the `JUNE` magic (spec §6).
pub fn write_file(bytecode: &Bytecode, writer: &mut impl Write) -> Result<(), BytecodeError> {
    writer.write_all(b"JUNE")?;
    writer.write_all(&bytecode.to_bytes())?;
    Ok(())
}

/// Read a bytecode file, expecting the leading `JUNE` magic to already have
/// been consumed by the caller (the source-file loader branches on those
/// four bytes itself — see `source_file::SrcFile::load`).
pub fn read_file(bytes: &[u8]) -> Result<Bytecode, BytecodeError> {
    Bytecode::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::instr::Operation;

    fn sample() -> Bytecode {
        let mut bc = Bytecode::new();
        let i = bc.data.intern(Data::Ident("print".to_string()));
        let s = bc.data.intern(Data::Str("Hello, World!".to_string()));
        let n = bc.data.intern(Data::Int(5));
        let f = bc.data.intern(Data::Float("3.5".to_string()));
        let sz = bc.data.intern(Data::Size(2));
        let b = bc.data.intern(Data::Bool(true));
        let nil = bc.data.intern(Data::Nil);
        bc.push(Operation::new(0, 0, Op::Load, i));
        bc.push(Operation::new(0, 1, Op::Load, s));
        bc.push(Operation::new(0, 2, Op::Load, n));
        bc.push(Operation::new(0, 3, Op::Load, f));
        bc.push(Operation::new(0, 4, Op::Load, sz));
        bc.push(Operation::new(0, 5, Op::Load, b));
        bc.push(Operation::new(0, 6, Op::Load, nil));
        bc.push(Operation::new(0, 7, Op::Pop, 0));
        bc
    }

    #[test]
    fn round_trips_through_bytes() {
        let bc = sample();
        let bytes = bc.to_bytes();
        let back = Bytecode::from_bytes(&bytes).unwrap();
        assert_eq!(back.ops, bc.ops);
        assert_eq!(back.data.entries, bc.data.entries);
    }

    #[test]
    fn interning_is_idempotent() {
        let mut data = DataTable::new();
        let a = data.intern(Data::Str("x".to_string()));
        let b = data.intern(Data::Str("x".to_string()));
        let c = data.intern(Data::Str("y".to_string()));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[7] = 0xff; // corrupt the low byte of the big-endian version
        assert!(matches!(
            Bytecode::from_bytes(&bytes),
            Err(BytecodeError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let bytes = sample().to_bytes();
        let truncated = &bytes[..bytes.len() - 4];
        assert!(Bytecode::from_bytes(truncated).is_err());
    }
}
