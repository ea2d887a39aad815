//! Per-file identity, text-or-bytecode payload, and diagnostic rendering
//! (spec §4.4, grounded on `VM/SrcFile.hpp`/`SrcFile.cpp`).

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bytecode::Bytecode;
use crate::vm::error::VmError;

static NEXT_SRC_ID: AtomicU64 = AtomicU64::new(0);

fn next_src_id() -> u64 {
    NEXT_SRC_ID.fetch_add(1, Ordering::Relaxed)
}

/// Maps a byte-offset range within `data` to one logical source line, for
/// diagnostic rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColRange {
    pub begin: usize,
    pub end: usize,
}

/// A loaded module's file: its identity, its raw payload (source text *or*
/// compiled bytecode, never both), and enough indexing to print a caret
/// diagnostic for text files.
#[derive(Debug)]
pub struct SrcFile {
    id: u64,
    dir: String,
    path: String,
    data: String,
    cols: Vec<ColRange>,
    bytecode: Bytecode,
    is_main: bool,
    is_bytecode: bool,
}

impl SrcFile {
    /// Load `path`, branching on the leading four bytes: `JUNE` selects the
    /// bytecode decoder, anything else is read as source text with its
    /// bytecode left to be filled in by the (out-of-scope) compiler.
    pub fn load(dir: impl Into<String>, path: impl Into<String>, is_main: bool) -> Result<Self, VmError> {
        let dir = dir.into();
        let path = path.into();
        let bytes = fs::read(&path).map_err(|e| VmError::FileIo(format!("{}: {}", path, e)))?;

        if bytes.len() >= 4 && &bytes[0..4] == b"JUNE" {
            let bytecode = Bytecode::from_bytes(&bytes[4..])
                .map_err(|e| VmError::FileIo(format!("{}: {}", path, e)))?;
            return Ok(SrcFile {
                id: next_src_id(),
                dir,
                path,
                data: String::new(),
                cols: Vec::new(),
                bytecode,
                is_main,
                is_bytecode: true,
            });
        }

        let text = String::from_utf8(bytes).map_err(|e| VmError::FileIo(format!("{}: {}", path, e)))?;
        if text.is_empty() {
            return Err(VmError::FileIo(format!("{}: encountered empty file", path)));
        }
        let mut cols = Vec::new();
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let begin = offset;
            offset += line.len();
            cols.push(ColRange { begin, end: offset });
        }
        Ok(SrcFile {
            id: next_src_id(),
            dir,
            path,
            data: text,
            cols,
            bytecode: Bytecode::new(),
            is_main,
            is_bytecode: false,
        })
    }

    /// Construct a `SrcFile` directly from an in-memory bytecode blob (used
    /// by the loader for modules resolved without touching the filesystem,
    /// and by tests).
    pub fn from_bytecode(dir: impl Into<String>, path: impl Into<String>, bytecode: Bytecode, is_main: bool) -> Self {
        SrcFile {
            id: next_src_id(),
            dir: dir.into(),
            path: path.into(),
            data: String::new(),
            cols: Vec::new(),
            bytecode,
            is_main,
            is_bytecode: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn is_main(&self) -> bool {
        self.is_main
    }

    pub fn is_bytecode(&self) -> bool {
        self.is_bytecode
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    pub fn bytecode_mut(&mut self) -> &mut Bytecode {
        &mut self.bytecode
    }

    /// Render `path:line:col: message`, followed by the offending source
    /// line and a caret, for text files; bytecode-only and offset-less
    /// files degrade gracefully to just the header line.
    pub fn format_diagnostic(&self, idx: u64, message: &str) -> String {
        let idx = idx as usize;
        let found = self
            .cols
            .iter()
            .enumerate()
            .find(|(_, range)| idx >= range.begin && idx < range.end);

        let Some((line, range)) = found else {
            return format!("{}: {} (index {} out of range)", self.path, message, idx);
        };
        let col = idx - range.begin;
        let mut out = format!("{}:{}:{}: {}\n", self.path, line + 1, col + 1, message);

        if self.is_bytecode {
            return out;
        }

        let mut err_line = self.data[range.begin..range.end].to_string();
        if err_line.ends_with('\n') {
            err_line.pop();
        }
        let spaces: String = err_line
            .chars()
            .take(col)
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        out.push_str(&err_line);
        out.push('\n');
        out.push_str(&spaces);
        out.push('^');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_file(contents: &str) -> SrcFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.june");
        std::fs::write(&path, contents).unwrap();
        let sf = SrcFile::load(
            dir.path().to_string_lossy().to_string(),
            path.to_string_lossy().to_string(),
            true,
        )
        .unwrap();
        std::mem::forget(dir);
        sf
    }

    #[test]
    fn loads_text_and_builds_line_ranges() {
        let sf = text_file("a = 1\nb = 2\n");
        assert!(!sf.is_bytecode());
        assert_eq!(sf.cols.len(), 2);
    }

    #[test]
    fn diagnostic_points_at_the_right_line_and_column() {
        let sf = text_file("a = 1\nb = 2\n");
        let idx = sf.cols[1].begin + 2; // the '=' on the second line
        let msg = sf.format_diagnostic(idx as u64, "bad token");
        assert!(msg.starts_with(&format!("{}:2:3: bad token", sf.path())));
        assert!(msg.contains("b = 2"));
        assert!(msg.contains('^'));
    }

    #[test]
    fn bytecode_magic_selects_the_bytecode_branch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.junec");
        let mut bytes = b"JUNE".to_vec();
        bytes.extend(Bytecode::new().to_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let sf = SrcFile::load(
            dir.path().to_string_lossy().to_string(),
            path.to_string_lossy().to_string(),
            false,
        )
        .unwrap();
        assert!(sf.is_bytecode());
    }

    #[test]
    fn empty_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.june");
        std::fs::write(&path, "").unwrap();
        let result = SrcFile::load(
            dir.path().to_string_lossy().to_string(),
            path.to_string_lossy().to_string(),
            false,
        );
        assert!(result.is_err());
    }
}
