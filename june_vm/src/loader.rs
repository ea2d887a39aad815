//! Module Loader: resolves and links June and native modules, and drives
//! the fixed core-module list on startup (spec §4.6, §6, grounded on
//! `VM/State.cpp`'s `loadModule`/`loadNativeModule`/`loadCoreModules`).

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::Deserialize;

use crate::source_file::SrcFile;
use crate::state::State;
use crate::vm::env::Env;
use crate::vm::error::VmError;
use crate::vm::exec;
use crate::vm::value::{SourceData, Value};

/// `june_init(State*, srcId, idx) -> bool` / `june_deinit()`: the native
/// module ABI. A C++ reference parameter has no portable C-ABI shape, so
/// the `State` is handed across as an opaque pointer — the customary
/// translation for this kind of callback boundary.
type JuneInit = unsafe extern "C" fn(*mut State, u64, u64) -> bool;
type JuneDeinit = unsafe extern "C" fn();

/// `<selfBase>/core.json`'s `coreModules` array. A missing file, an empty
/// file, and a missing key all deserialize to the empty default — loading
/// core modules never fails because the file is absent (spec §6).
#[derive(Debug, Clone, Deserialize, Default)]
struct CoreConfig {
    #[serde(default, rename = "coreModules")]
    core_modules: Vec<String>,
}

fn read_core_config(state: &State) -> CoreConfig {
    let path = Path::new(state.self_base()).join("core.json");
    match fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => CoreConfig::default(),
    }
}

/// Load the fixed list (`June.Core`) plus `core.json`'s `coreModules`
/// (spec §4.6).
pub fn load_core_modules(state: &mut State) -> Result<(), VmError> {
    let config = read_core_config(state);
    let mut modules = vec!["June.Core".to_string()];
    modules.extend(config.core_modules);
    for module in modules {
        june_module_load(state, &module, 0, 0)?;
    }
    Ok(())
}

fn expand_home(path: &str) -> Option<PathBuf> {
    let rest = path.strip_prefix("~/")?;
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    let home = std::env::var(var).ok()?;
    Some(Path::new(&home).join(rest))
}

/// Path forms that bypass dotted-module resolution entirely: `~/...`,
/// `.`-relative (resolved against the current source's own directory), and
/// absolute paths taken verbatim (spec §4.6 step 2).
fn literal_path_form(state: &State, module: &str) -> Option<PathBuf> {
    if let Some(p) = expand_home(module) {
        return Some(p);
    }
    if module == "." || module.starts_with("./") || module.starts_with("../") {
        let dir = state
            .current_source()
            .and_then(|s| s.with_source(|s| s.file.dir().to_string()))
            .unwrap_or_else(|| ".".to_string());
        return Some(Path::new(&dir).join(module));
    }
    if Path::new(module).is_absolute() {
        return Some(PathBuf::from(module));
    }
    None
}

/// Dotted-form candidate roots: the first component maps to a directory
/// under both `<selfBase>/junelib/` (or `/lib/` for native) and the
/// working directory; `Standard` is aliased to `June.Standard` first
/// (spec §4.6 step 1).
fn dotted_candidates(state: &State, module: &str, native: bool) -> Vec<PathBuf> {
    let mut parts: Vec<&str> = module.split('.').collect();
    if parts.first() == Some(&"Standard") {
        let mut aliased = vec!["June", "Standard"];
        aliased.extend_from_slice(&parts[1..]);
        parts = aliased;
    }
    let lib_dir = if native { "lib" } else { "junelib" };
    let roots = [Path::new(state.self_base()).join(lib_dir), PathBuf::from(".")];
    roots
        .into_iter()
        .map(|root| {
            let mut p = root;
            for part in &parts {
                p.push(part);
            }
            p
        })
        .collect()
}

fn tail_name(module: &str) -> &str {
    module.rsplit(['.', '/']).next().unwrap_or(module)
}

fn candidate_bases(state: &State, module: &str, native: bool) -> Vec<PathBuf> {
    if let Some(p) = literal_path_form(state, module) {
        vec![p]
    } else {
        dotted_candidates(state, module, native)
    }
}

/// If `base` is a directory, the module lives at `base/<tail>.<ext>`;
/// otherwise `base` itself (with an extension appended) is the file (spec
/// §4.6 steps 3-4). `.junec` (already-compiled) is tried before `.june`
/// since this crate has no compiler of its own to fill in a text file's
/// bytecode.
fn resolve_june_path(state: &State, module: &str) -> Option<PathBuf> {
    let tail = tail_name(module);
    for base in candidate_bases(state, module, false) {
        if base.is_dir() {
            let stem = base.join(tail);
            for ext in [".junec", ".june"] {
                let candidate = with_extension_suffix(&stem, ext);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            continue;
        }
        // A literal path form (`~/...`, `./...`, absolute) may already
        // name the file exactly, extension included.
        if base.is_file() {
            return Some(base);
        }
        for ext in [".junec", ".june"] {
            let candidate = with_extension_suffix(&base, ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(target_os = "windows")]
const NATIVE_EXT: &str = ".dll";
#[cfg(target_os = "macos")]
const NATIVE_EXT: &str = ".dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const NATIVE_EXT: &str = ".so";

/// Native modules try `libJune<tail>` before `lib<tail>` (spec §4.6).
fn resolve_native_path(state: &State, module: &str) -> Option<PathBuf> {
    let tail = tail_name(module);
    for base in candidate_bases(state, module, true) {
        if !base.is_dir() && base.is_file() {
            return Some(base);
        }
        let dir = if base.is_dir() {
            base.clone()
        } else {
            base.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        for prefix in ["libJune", "lib"] {
            let candidate = with_extension_suffix(&dir.join(format!("{}{}", prefix, tail)), NATIVE_EXT);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

fn with_extension_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// June module load: idempotent against `AllSrcs`, constructs a `Source`,
/// pushes it, executes its bytecode end to end, pops it. Execution failure
/// propagates framed with the importing module's name (spec §4.6).
pub fn june_module_load(state: &mut State, module: &str, src_id: u64, idx: u64) -> Result<(), VmError> {
    let path = resolve_june_path(state, module)
        .ok_or_else(|| VmError::module_load_failed(module, "could not resolve module path"))?;
    let path_str = path.to_string_lossy().to_string();

    if state.registered_source(&path_str).is_some() {
        return Ok(());
    }

    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let file = SrcFile::load(dir, path_str.clone(), false)
        .map_err(|e| VmError::module_load_failed(module, e))?;
    let file = Rc::new(file);
    let env = Rc::new(RefCell::new(Env::new()));
    let source = Value::source_val(SourceData::new(Rc::clone(&file), env), src_id, idx);

    state.register_source(path_str, source.clone());
    state.push_src(source);
    let result = exec::exec(state, None, 0, 0);
    state.pop_src();
    result
        .map(|_| ())
        .map_err(|e| VmError::module_load_failed(module, e))
}

/// Native module load: resolves and opens the library, invokes `june_init`,
/// and records `june_deinit` (if present) for teardown (spec §4.6).
pub fn native_module_load(state: &mut State, module: &str, src_id: u64, idx: u64) -> Result<(), VmError> {
    let path = resolve_native_path(state, module)
        .ok_or_else(|| VmError::module_load_failed(module, "could not resolve native module path"))?;
    let path_str = path.to_string_lossy().to_string();

    state
        .dylib()
        .load(&path_str)
        .map_err(|e| VmError::module_load_failed(module, e))?;

    // SAFETY: `june_init`/`june_deinit` are resolved by name from a
    // library we just opened; the signatures above are this ABI's contract
    // (spec §4.6). Copying the function pointer out of `Symbol` drops the
    // library borrow before we call it.
    let init: Option<JuneInit> = unsafe { state.dylib().get::<JuneInit>(&path_str, "june_init").map(|s| *s) };
    let Some(init) = init else {
        state.dylib().unload(&path_str);
        return Err(VmError::module_load_failed(module, "missing june_init symbol"));
    };

    // SAFETY: `init` takes the `State` it's handed as an opaque pointer and
    // is expected to call back into it only through that pointer's public
    // API, never to retain it past this call.
    let ok = unsafe { init(state as *mut State, src_id, idx) };
    if !ok {
        state.dylib().unload(&path_str);
        return Err(VmError::module_load_failed(module, "june_init returned false"));
    }

    let deinit: Option<JuneDeinit> =
        unsafe { state.dylib().get::<JuneDeinit>(&path_str, "june_deinit").map(|s| *s) };
    if let Some(deinit) = deinit {
        state.register_mod_deinit(path_str, deinit);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_name_takes_the_last_dotted_component() {
        assert_eq!(tail_name("A.B.C"), "C");
        assert_eq!(tail_name("Solo"), "Solo");
    }

    #[test]
    fn standard_prefix_is_aliased_under_june() {
        let state = State::new("bin", "/base", &[]);
        let candidates = dotted_candidates(&state, "Standard.Io", false);
        assert!(candidates[0].ends_with("June/Standard/Io"));
    }

    #[test]
    fn dotted_candidates_cover_both_search_roots() {
        let state = State::new("bin", "/base", &[]);
        let candidates = dotted_candidates(&state, "A.B", false);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].starts_with("/base/junelib"));
    }

    #[test]
    fn relative_dot_path_resolves_against_cwd_without_a_current_source() {
        let state = State::new("bin", "/base", &[]);
        let resolved = literal_path_form(&state, "./foo.june").unwrap();
        assert!(resolved.ends_with("./foo.june") || resolved.to_string_lossy().contains("foo.june"));
    }

    #[test]
    fn missing_core_json_yields_the_default_config() {
        let state = State::new("bin", "/definitely/not/a/real/base", &[]);
        let config = read_core_config(&state);
        assert!(config.core_modules.is_empty());
    }

    #[test]
    fn june_module_load_is_idempotent_against_already_registered_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.junec");
        let mut bytes = b"JUNE".to_vec();
        bytes.extend(crate::bytecode::Bytecode::new().to_bytes());
        fs::write(&path, &bytes).unwrap();

        let mut state = State::new("bin", dir.path().to_string_lossy().to_string(), &[]);
        let module_path = path.to_string_lossy().to_string();
        june_module_load(&mut state, &module_path, 0, 0).unwrap();
        assert!(state.registered_source(&module_path).is_some());
        // Loading the identical absolute path again is a no-op, not a re-run.
        june_module_load(&mut state, &module_path, 0, 0).unwrap();
    }
}
