//! Synchronization after a launch.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use ipoint_rs::{OperatorError, OperatorResult};
use libloading::Library;
use log::debug;

use crate::target::KernelTarget;

type CudaError = i32;

const CUDA_SUCCESS: CudaError = 0;

const CUDART_CANDIDATES: [&str; 6] = [
    "libcudart.so",
    "libcudart.so.12",
    "libcudart.so.11.0",
    "cudart64_12.dll",
    "cudart64_110.dll",
    "libcudart.dylib",
];

/// Entry points of the CUDA runtime used after a launch.
pub struct CudaRuntime {
    device_synchronize: unsafe extern "C" fn() -> CudaError,
    get_last_error: unsafe extern "C" fn() -> CudaError,
    get_error_string: unsafe extern "C" fn(CudaError) -> *const c_char,
    _lib: Library,
}

static CUDA_RUNTIME: OnceLock<Result<Arc<CudaRuntime>, String>> = OnceLock::new();

/// Process-wide CUDA runtime. The first call decides which library is used;
/// `preferred` is tried before the well-known names.
pub fn cuda_runtime(preferred: Option<&Path>) -> OperatorResult<Arc<CudaRuntime>> {
    let init = CUDA_RUNTIME.get_or_init(|| match CudaRuntime::new(preferred) {
        Ok(runtime) => Ok(Arc::new(runtime)),
        Err(err) => Err(err.to_string()),
    });
    match init {
        Ok(runtime) => Ok(Arc::clone(runtime)),
        Err(msg) => Err(OperatorError::link(format!(
            "CUDA runtime unavailable: {msg}"
        ))),
    }
}

impl CudaRuntime {
    fn new(preferred: Option<&Path>) -> OperatorResult<Self> {
        let lib = load_cudart(preferred)?;
        Ok(Self {
            device_synchronize: load_symbol(&lib, b"cudaDeviceSynchronize\0")?,
            get_last_error: load_symbol(&lib, b"cudaGetLastError\0")?,
            get_error_string: load_symbol(&lib, b"cudaGetErrorString\0")?,
            _lib: lib,
        })
    }

    /// Waits for outstanding work, then collects any launch error.
    pub fn synchronize(&self) -> OperatorResult<()> {
        // SAFETY: Both calls take no arguments and only report runtime state.
        let code = unsafe { (self.device_synchronize)() };
        self.check(code, "cudaDeviceSynchronize")?;
        let code = unsafe { (self.get_last_error)() };
        self.check(code, "kernel launch")
    }

    fn check(&self, code: CudaError, op: &str) -> OperatorResult<()> {
        if code == CUDA_SUCCESS {
            return Ok(());
        }
        Err(OperatorError::device_fault(
            code,
            format!("{op} failed: {}", self.error_string(code)),
        ))
    }

    fn error_string(&self, code: CudaError) -> String {
        // SAFETY: cudaGetErrorString returns a static NUL-terminated string
        // for every code, including unknown ones.
        let ptr = unsafe { (self.get_error_string)(code) };
        if ptr.is_null() {
            return format!("unknown CUDA error {code}");
        }
        unsafe { CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }
}

/// How an operator waits for its launch to finish.
#[derive(Clone)]
pub enum DeviceSync {
    /// The host entry point returns after all lanes ran.
    Host,
    Cuda(Arc<CudaRuntime>),
}

impl DeviceSync {
    pub fn for_target(target: KernelTarget, cudart: Option<&Path>) -> OperatorResult<Self> {
        match target {
            KernelTarget::HostC => Ok(DeviceSync::Host),
            KernelTarget::Cuda => cuda_runtime(cudart).map(DeviceSync::Cuda),
        }
    }

    pub fn synchronize(&self) -> OperatorResult<()> {
        match self {
            DeviceSync::Host => Ok(()),
            DeviceSync::Cuda(runtime) => runtime.synchronize(),
        }
    }
}

impl std::fmt::Debug for DeviceSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceSync::Host => f.write_str("Host"),
            DeviceSync::Cuda(_) => f.write_str("Cuda"),
        }
    }
}

fn load_cudart(preferred: Option<&Path>) -> OperatorResult<Library> {
    if let Some(path) = preferred {
        // SAFETY: Dynamic library load only; no symbols are invoked at this stage.
        match unsafe { Library::new(path) } {
            Ok(lib) => {
                debug!("loaded CUDA runtime from {}", path.display());
                return Ok(lib);
            }
            Err(err) => debug!("failed to load {}: {err}", path.display()),
        }
    }
    for candidate in CUDART_CANDIDATES {
        // SAFETY: Dynamic library load only; no symbols are invoked at this stage.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            debug!("loaded CUDA runtime {candidate}");
            return Ok(lib);
        }
    }
    Err(OperatorError::link(format!(
        "failed to load CUDA runtime library (tried {})",
        CUDART_CANDIDATES.join(", ")
    )))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> OperatorResult<T> {
    // SAFETY: Caller provides the symbol type declared by the CUDA runtime API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        OperatorError::link(format!(
            "failed to resolve CUDA symbol {}: {err}",
            String::from_utf8_lossy(name).trim_end_matches('\0')
        ))
    })?;
    Ok(*sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_sync_is_a_no_op() {
        let sync = DeviceSync::for_target(KernelTarget::HostC, None).unwrap();
        assert!(matches!(sync, DeviceSync::Host));
        sync.synchronize().unwrap();
    }
}
