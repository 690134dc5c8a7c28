//! Just-in-time compiled device operators for `ipoint-rs`.
//!
//! An [`ApplyIntegrationPoints`] is turned into a [`DeviceOperator`] by
//! generating one kernel for its expressions, building it into a shared
//! library with an external compiler and loading the entry point. Loading
//! this crate registers the conversion with the `ipoint-rs` device registry.

pub mod codegen;
pub mod compiler;
pub mod env;
pub mod loader;
pub mod operator;
pub mod runtime;
pub mod target;

use std::sync::Arc;

use ipoint_rs::linalg::downcast_operator;
use ipoint_rs::registry::register_device_creator;
use ipoint_rs::{ApplyIntegrationPoints, LinearOperator};

pub use codegen::{generate_kernel_source, GeneratedSource, ENTRY_SYMBOL};
pub use compiler::{build_module, BuildArtifact};
pub use env::JitConfig;
pub use loader::{load_module, EntryPoint, LoadedModule};
pub use operator::DeviceOperator;
pub use target::KernelTarget;

/// Registers [`DeviceOperator`] as the device counterpart of
/// [`ApplyIntegrationPoints`]. Toolchain settings are read from the
/// environment each time an operator is created.
///
/// The default target is CUDA, whose operators only accept vectors exposing
/// [`MemorySpace::Device`](ipoint_rs::MemorySpace::Device) views. A
/// [`HostVector`](ipoint_rs::HostVector) has host views only, so set
/// `IPOINT_JIT_TARGET=c` when the registered operators run on host vectors.
pub fn register_device_operators() {
    register_device_creator(ApplyIntegrationPoints::TYPE_TAG, |op| {
        let host = downcast_operator::<ApplyIntegrationPoints>(op)?;
        let device = DeviceOperator::build(host, &JitConfig::from_env())?;
        Ok(Arc::new(device) as Arc<dyn LinearOperator>)
    });
}

#[cfg(target_os = "linux")]
#[used]
#[link_section = ".init_array"]
static REGISTER_DEVICE_OPERATORS: extern "C" fn() = {
    extern "C" fn register() {
        register_device_operators();
    }
    register
};
