use std::env;
use std::path::PathBuf;

use log::warn;

use crate::target::KernelTarget;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn env_string(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn env_flag(key: &str) -> bool {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    }
}

/// Toolchain and diagnostics settings for building device operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    pub target: KernelTarget,
    /// CUDA compiler driver.
    pub nvcc: String,
    /// Passed as `-arch`; nvcc's default when unset.
    pub cuda_arch: Option<String>,
    /// Host C compiler.
    pub cc: String,
    pub extra_flags: Vec<String>,
    /// Leave the scratch directory on disk when the operator is dropped.
    pub keep_build_dir: bool,
    /// Log the generated source at info level instead of trace.
    pub dump_source: bool,
    /// CUDA runtime library used for synchronization.
    pub cudart: Option<PathBuf>,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            target: KernelTarget::Cuda,
            nvcc: "nvcc".to_string(),
            cuda_arch: None,
            cc: "cc".to_string(),
            extra_flags: Vec::new(),
            keep_build_dir: false,
            dump_source: false,
            cudart: None,
        }
    }
}

impl JitConfig {
    /// Reads `IPOINT_*` variables (and `CC`), falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let target = match env_string(&["IPOINT_JIT_TARGET"]) {
            Some(value) => KernelTarget::parse(&value).unwrap_or_else(|| {
                warn!(
                    "unknown IPOINT_JIT_TARGET '{value}', using {}",
                    defaults.target
                );
                defaults.target
            }),
            None => defaults.target,
        };
        Self {
            target,
            nvcc: env_string(&["IPOINT_NVCC"]).unwrap_or(defaults.nvcc),
            cuda_arch: env_string(&["IPOINT_CUDA_ARCH"]),
            cc: env_string(&["IPOINT_CC", "CC"]).unwrap_or(defaults.cc),
            extra_flags: env_string(&["IPOINT_EXTRA_FLAGS"])
                .map(|flags| flags.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            keep_build_dir: env_flag("IPOINT_KEEP_BUILD"),
            dump_source: env_flag("IPOINT_DUMP_SOURCE"),
            cudart: env_string(&["IPOINT_CUDART"]).map(PathBuf::from),
        }
    }

    /// Environment settings with the host C target.
    pub fn host() -> Self {
        Self::from_env().with_target(KernelTarget::HostC)
    }

    pub fn with_target(mut self, target: KernelTarget) -> Self {
        self.target = target;
        self
    }

    /// Sets the compiler of the current target.
    pub fn with_compiler(mut self, compiler: impl Into<String>) -> Self {
        match self.target {
            KernelTarget::Cuda => self.nvcc = compiler.into(),
            KernelTarget::HostC => self.cc = compiler.into(),
        }
        self
    }

    pub fn with_extra_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keep_build_dir(mut self, keep: bool) -> Self {
        self.keep_build_dir = keep;
        self
    }

    pub fn with_dump_source(mut self, dump: bool) -> Self {
        self.dump_source = dump;
        self
    }

    /// Compiler for the configured target.
    pub fn compiler(&self) -> &str {
        match self.target {
            KernelTarget::Cuda => &self.nvcc,
            KernelTarget::HostC => &self.cc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "on"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }

    #[test]
    fn default_target_is_cuda_and_host_uses_cc() {
        let config = JitConfig::default();
        assert_eq!(config.target, KernelTarget::Cuda);
        assert_eq!(config.compiler(), "nvcc");
        assert_eq!(config.with_target(KernelTarget::HostC).compiler(), "cc");
    }

    #[test]
    fn compiler_follows_target() {
        let config = JitConfig::default()
            .with_target(KernelTarget::HostC)
            .with_compiler("clang");
        assert_eq!(config.compiler(), "clang");
        assert_eq!(config.nvcc, "nvcc");
        let cuda = config.with_target(KernelTarget::Cuda);
        assert_eq!(cuda.compiler(), "nvcc");
    }
}
