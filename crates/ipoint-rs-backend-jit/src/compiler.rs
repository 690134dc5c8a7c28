//! Invokes the external toolchain on generated source.

use std::path::{Path, PathBuf};
use std::process::Command;

use ipoint_rs::{OperatorError, OperatorResult};
use log::{debug, warn};
use tempfile::TempDir;

use crate::codegen::GeneratedSource;
use crate::env::JitConfig;
use crate::target::{lib_ext, KernelTarget};

const SOURCE_STEM: &str = "ipoint_kernel";

/// Source and shared library produced by one build, kept inside a private
/// scratch directory that lives as long as the artifact.
#[derive(Debug)]
pub struct BuildArtifact {
    dir: TempDir,
    source_path: PathBuf,
    library_path: PathBuf,
}

impl BuildArtifact {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }
}

/// Writes `source` into a fresh scratch directory and compiles it into a
/// shared library.
pub fn build_module(
    source: &GeneratedSource,
    config: &JitConfig,
) -> OperatorResult<BuildArtifact> {
    let dir = tempfile::Builder::new()
        .prefix("ipoint-jit-")
        .disable_cleanup(config.keep_build_dir)
        .tempdir()
        .map_err(|err| {
            OperatorError::build(format!("failed to create scratch directory: {err}"), None, "")
        })?;

    let ext = source.target.source_extension();
    let source_path = dir.path().join(format!("{SOURCE_STEM}.{ext}"));
    let library_path = dir.path().join(format!("lib{SOURCE_STEM}{}", lib_ext()));

    std::fs::write(&source_path, &source.text).map_err(|err| {
        OperatorError::build(
            format!("failed to write {}: {err}", source_path.display()),
            None,
            "",
        )
    })?;

    let mut cmd = compiler_command(source.target, config, &source_path, &library_path);
    debug!("building {} kernel: {cmd:?}", source.target);

    let output = cmd.output().map_err(|err| {
        OperatorError::build(
            format!("failed to launch '{}': {err}", config.compiler()),
            None,
            "",
        )
    })?;
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            "{} failed (status={}): stdout='{}' stderr='{}'",
            config.compiler(),
            output.status,
            stdout.trim(),
            stderr.trim()
        );
        return Err(OperatorError::build(
            format!("{} exited with {}", config.compiler(), output.status),
            output.status.code(),
            stderr.trim(),
        ));
    }
    if !library_path.is_file() {
        return Err(OperatorError::build(
            format!(
                "{} reported success but produced no {}",
                config.compiler(),
                library_path.display()
            ),
            output.status.code(),
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }

    if config.keep_build_dir {
        debug!("keeping build directory {}", dir.path().display());
    }
    Ok(BuildArtifact {
        dir,
        source_path,
        library_path,
    })
}

fn compiler_command(target: KernelTarget, config: &JitConfig, src: &Path, out: &Path) -> Command {
    let mut cmd = Command::new(config.compiler());
    match target {
        KernelTarget::Cuda => {
            cmd.arg("-shared").arg("-Xcompiler").arg("-fPIC");
            // Shares the runtime instance used for synchronization.
            cmd.arg("-cudart").arg("shared");
            if let Some(arch) = &config.cuda_arch {
                cmd.arg(format!("-arch={arch}"));
            }
            cmd.arg("-O2");
        }
        KernelTarget::HostC => {
            if cfg!(target_os = "macos") {
                cmd.arg("-dynamiclib");
            } else {
                cmd.arg("-shared").arg("-fPIC");
            }
            cmd.arg("-O2");
        }
    }
    cmd.args(&config.extra_flags);
    cmd.arg("-o").arg(out).arg(src);
    if target == KernelTarget::HostC && !cfg!(target_os = "windows") {
        cmd.arg("-lm");
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn cuda_command_builds_position_independent_library() {
        let config = JitConfig {
            cuda_arch: Some("sm_80".to_string()),
            extra_flags: vec!["-lineinfo".to_string()],
            ..JitConfig::default()
        };
        let cmd = compiler_command(
            KernelTarget::Cuda,
            &config,
            Path::new("k.cu"),
            Path::new("libk.so"),
        );
        assert_eq!(cmd.get_program(), "nvcc");
        let args = args(&cmd);
        for expected in [
            "-shared",
            "-Xcompiler",
            "-fPIC",
            "-arch=sm_80",
            "-lineinfo",
        ] {
            assert!(args.iter().any(|arg| arg == expected), "{expected} in {args:?}");
        }
        let out = args.iter().position(|arg| arg == "-o").unwrap();
        assert_eq!(args[out + 1], "libk.so");
        assert_eq!(args[out + 2], "k.cu");
    }

    #[test]
    fn host_command_uses_configured_compiler() {
        let config = JitConfig::default()
            .with_target(KernelTarget::HostC)
            .with_compiler("clang");
        let cmd = compiler_command(
            KernelTarget::HostC,
            &config,
            Path::new("k.c"),
            Path::new("libk.so"),
        );
        assert_eq!(cmd.get_program(), "clang");
        assert!(args(&cmd).iter().any(|arg| arg == "-O2"));
    }
}
