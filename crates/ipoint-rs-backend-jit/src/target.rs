use std::fmt;

use ipoint_rs::MemorySpace;

/// Dialect of the generated translation unit and the toolchain building it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KernelTarget {
    /// CUDA kernel built with nvcc; views must be device resident.
    #[default]
    Cuda,
    /// Portable C that runs the same lanes sequentially on the host.
    HostC,
}

impl KernelTarget {
    pub fn name(self) -> &'static str {
        match self {
            KernelTarget::Cuda => "cuda",
            KernelTarget::HostC => "c",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cuda" | "nvcc" | "gpu" => Some(KernelTarget::Cuda),
            "c" | "host" | "cpu" => Some(KernelTarget::HostC),
            _ => None,
        }
    }

    pub fn source_extension(self) -> &'static str {
        match self {
            KernelTarget::Cuda => "cu",
            KernelTarget::HostC => "c",
        }
    }

    /// Where the pointers handed to the entry point must live.
    pub fn memory_space(self) -> MemorySpace {
        match self {
            KernelTarget::Cuda => MemorySpace::Device,
            KernelTarget::HostC => MemorySpace::Host,
        }
    }
}

impl fmt::Display for KernelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn lib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        ".dylib"
    } else if cfg!(target_os = "windows") {
        ".dll"
    } else {
        ".so"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_aliases() {
        assert_eq!(KernelTarget::parse(" CUDA "), Some(KernelTarget::Cuda));
        assert_eq!(KernelTarget::parse("host"), Some(KernelTarget::HostC));
        assert_eq!(KernelTarget::parse("opencl"), None);
    }
}
