//! The `Source` value: a handle onto a loaded module's globals and its
//! backing file (spec §4.2 "Source", §4.6 "Module/Source Value").

use std::cell::RefCell;
use std::rc::Rc;

use crate::source_file::SrcFile;
use crate::vm::env::Env;

/// `owner == false` for a cloned handle: clones alias the same file and
/// environment rather than copying them, mirroring the original's
/// non-owning `Src` clone (`owner=false`, `_srcFile`/`_vars` shared).
#[derive(Debug, Clone)]
pub struct SourceData {
    pub file: Rc<SrcFile>,
    pub env: Rc<RefCell<Env>>,
    pub owner: bool,
}

impl SourceData {
    pub fn new(file: Rc<SrcFile>, env: Rc<RefCell<Env>>) -> Self {
        Self {
            file,
            env,
            owner: true,
        }
    }

    pub fn clone_handle(&self) -> Self {
        Self {
            file: Rc::clone(&self.file),
            env: Rc::clone(&self.env),
            owner: false,
        }
    }
}
