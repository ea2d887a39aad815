//! Dynamic library manager: opens, resolves symbols in, and closes native
//! extension modules (spec §4.5, grounded on `VM/Dylib.hpp`/`Dylib.cpp`).

use std::collections::HashMap;

use libloading::Library;

use crate::vm::error::VmError;

#[cfg(unix)]
fn open(path: &str) -> Result<Library, VmError> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    // SAFETY: the library is a native June extension module; running its
    // initializer (`june_init`) is an inherent, documented consequence of
    // loading it, same as the original's dlopen(RTLD_NOW | RTLD_GLOBAL) call.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }
        .map(Library::from)
        .map_err(|e| VmError::exec(format!("dylib failed to open {}: {}", path, e)))
}

#[cfg(windows)]
fn open(path: &str) -> Result<Library, VmError> {
    // SAFETY: see the unix branch above.
    unsafe { Library::new(path) }
        .map_err(|e| VmError::exec(format!("dylib failed to open {}: {}", path, e)))
}

/// Maps an absolute module path to its loaded handle. Repeated loads of the
/// same path are idempotent and return the existing handle.
#[derive(Debug, Default)]
pub struct Dylib {
    handles: HashMap<String, Library>,
}

impl Dylib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.handles.contains_key(path)
    }

    pub fn load(&mut self, path: &str) -> Result<(), VmError> {
        if self.handles.contains_key(path) {
            return Ok(());
        }
        let lib = open(path)?;
        self.handles.insert(path.to_string(), lib);
        Ok(())
    }

    pub fn unload(&mut self, path: &str) {
        self.handles.remove(path);
    }

    /// Resolve `sym` in the library previously loaded from `path`, typed as
    /// `T` (almost always an `unsafe extern "C" fn(...)` pointer type).
    /// Returns `None` if the library isn't loaded or the symbol is absent.
    ///
    /// # Safety
    /// The caller must supply the correct signature for `sym` — mistyping it
    /// is undefined behavior the moment the returned symbol is called, same
    /// as `dlsym`'s own untyped contract.
    pub unsafe fn get<T>(&self, path: &str, sym: &str) -> Option<libloading::Symbol<'_, T>> {
        let lib = self.handles.get(path)?;
        // SAFETY: forwarded to the caller's contract, documented above.
        unsafe { lib.get::<T>(sym.as_bytes()).ok() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_library_has_no_symbols() {
        let dylib = Dylib::new();
        assert!(!dylib.exists("/nonexistent.so"));
        // SAFETY: test-only use of an unloaded path, no symbol is called.
        assert!(unsafe { dylib.get::<unsafe extern "C" fn()>("/nonexistent.so", "june_init") }.is_none());
    }

    #[test]
    fn loading_a_missing_file_fails_cleanly() {
        let mut dylib = Dylib::new();
        assert!(dylib.load("/definitely/not/a/real/path.so").is_err());
    }
}
