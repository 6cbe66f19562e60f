use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::layout::Layout;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Couldn't scan {}", .path.display())]
    Scan {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Options recognized by the generator, populated once at startup.
#[derive(Clone, Copy, Debug, Default)]
pub struct Config {
    /// Prepend the UVM incdir and package sources to both manifests.
    pub uvm: bool,
}

/// Outcome of resolving `UVM_HOME` to an absolute path. Resolution failure
/// is the one error class that is absorbed: the raw value is used unchanged
/// and scanning proceeds against it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UvmPath {
    Resolved(PathBuf),
    Raw(PathBuf),
}

impl UvmPath {
    /// Reads `UVM_HOME` once. Unset or empty means no UVM prepend.
    pub fn from_env() -> Option<Self> {
        Self::from_value(std::env::var_os("UVM_HOME"))
    }

    fn from_value(value: Option<OsString>) -> Option<Self> {
        let value = value?;
        if value.is_empty() {
            return None;
        }
        let raw = PathBuf::from(value);
        Some(match raw.canonicalize() {
            Ok(resolved) => Self::Resolved(resolved),
            Err(_) => Self::Raw(raw),
        })
    }

    pub fn as_path(&self) -> &Path {
        match self {
            Self::Resolved(p) | Self::Raw(p) => p,
        }
    }
}

fn files_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let scan_err = |source| Error::Scan {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = vec![];
    for entry in fs::read_dir(dir).map_err(scan_err)? {
        let path = entry.map_err(scan_err)?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == ext) {
            files.push(path);
        }
    }
    Ok(files)
}

/// `.sv` sources: one `+incdir+` directive for the directory, then one bare
/// path per file. An empty group contributes nothing, directive included.
pub fn sv_entries(dir: &Path) -> Result<Vec<String>> {
    let files = files_with_ext(dir, "sv")?;
    if files.is_empty() {
        return Ok(vec![]);
    }
    let mut lines = vec![format!("+incdir+{}", dir.display())];
    lines.extend(files.iter().map(|f| f.display().to_string()));
    Ok(lines)
}

/// `.v` sources: one `-y` library directory directive, then one `-v` entry
/// per file. Empty group contributes nothing.
pub fn v_entries(dir: &Path) -> Result<Vec<String>> {
    let files = files_with_ext(dir, "v")?;
    if files.is_empty() {
        return Ok(vec![]);
    }
    let mut lines = vec![format!("-y {}", dir.display())];
    lines.extend(files.iter().map(|f| format!("-v {}", f.display())));
    Ok(lines)
}

fn dir_entries(dir: &Path) -> Result<Vec<String>> {
    let mut lines = sv_entries(dir)?;
    lines.extend(v_entries(dir)?);
    Ok(lines)
}

/// Scans each search path in turn and concatenates the results, preserving
/// the given order. Files keep the filesystem's enumeration order within a
/// directory; nothing is sorted.
pub fn flist<I, P>(search_paths: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut lines = vec![];
    for path in search_paths {
        lines.extend(dir_entries(path.as_ref())?);
    }
    Ok(lines)
}

fn write_flist(path: &Path, lines: &[String]) -> i32 {
    match fs::write(path, lines.join("\n")) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("failed to write {}: {}", path.display(), e);
            1
        }
    }
}

/// Generates both manifests. The returned value is the bitwise-OR of the two
/// write result codes and becomes the process exit status; scan failures
/// propagate as errors instead.
pub fn generate(layout: &Layout, config: &Config) -> Result<i32> {
    let uvm = if config.uvm { UvmPath::from_env() } else { None };
    generate_with(layout, uvm.as_ref())
}

fn generate_with(layout: &Layout, uvm: Option<&UvmPath>) -> Result<i32> {
    let mut pkg_files = flist([layout.pkg_dir()])?;
    let mut top_files = flist([layout.pkg_dir(), layout.test_dir(), layout.top_dir()])?;

    if let Some(uvm) = uvm {
        let uvm_files = dir_entries(uvm.as_path())?;
        pkg_files.splice(0..0, uvm_files.iter().cloned());
        top_files.splice(0..0, uvm_files);
    }

    let mut rv = 0;
    rv |= write_flist(&layout.pkg_flist(), &pkg_files);
    rv |= write_flist(&layout.top_flist(), &top_files);
    Ok(rv)
}
