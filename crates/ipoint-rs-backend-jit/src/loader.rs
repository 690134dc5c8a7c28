//! Loads a built shared library and resolves its entry point.

use std::path::Path;

use ipoint_rs::{OperatorError, OperatorResult};
use libloading::Library;
use log::debug;

use crate::compiler::BuildArtifact;

/// `entry(nip, x, dist_x, y, dist_y)`.
pub type EntryPoint = unsafe extern "C" fn(usize, *const f64, usize, *mut f64, usize);

/// A loaded kernel module. The library stays open, and its build directory on
/// disk, for as long as this value lives.
pub struct LoadedModule {
    // Field order is drop order: close the library before removing its file.
    entry: EntryPoint,
    symbol: String,
    library: Library,
    artifact: BuildArtifact,
}

impl LoadedModule {
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn artifact(&self) -> &BuildArtifact {
        &self.artifact
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("symbol", &self.symbol)
            .field("library", &self.artifact.library_path())
            .finish()
    }
}

/// Opens the library of `artifact` and resolves `symbol` as an [`EntryPoint`].
pub fn load_module(artifact: BuildArtifact, symbol: &str) -> OperatorResult<LoadedModule> {
    let library = open_library(artifact.library_path())?;
    // SAFETY: The library was generated with `symbol` declared as
    // `void(size_t, const double*, size_t, double*, size_t)`, matching `EntryPoint`.
    let entry = unsafe { library.get::<EntryPoint>(symbol.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|err| {
            OperatorError::link(format!(
                "symbol '{symbol}' not found in {}: {err}",
                artifact.library_path().display()
            ))
        })?;
    debug!(
        "resolved '{symbol}' in {}",
        artifact.library_path().display()
    );
    Ok(LoadedModule {
        entry,
        symbol: symbol.to_string(),
        library,
        artifact,
    })
}

fn open_library(path: &Path) -> OperatorResult<Library> {
    // SAFETY: The library is produced by our own build step; loading it runs
    // no initializers beyond those of the generated translation unit.
    unsafe { Library::new(path) }
        .map_err(|err| OperatorError::link(format!("failed to load {}: {err}", path.display())))
}
