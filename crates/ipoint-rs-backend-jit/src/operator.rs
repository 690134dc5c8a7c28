//! Device counterpart of [`ApplyIntegrationPoints`].

use std::any::Any;

use ipoint_rs::expr::{GraphCompiler, StepCompiler};
use ipoint_rs::linalg::check_apply_geometry;
use ipoint_rs::{
    ApplyIntegrationPoints, LinearOperator, OperatorError, OperatorResult, ProxyOffsetTable,
    Vector,
};
use log::{debug, info, trace};

use crate::codegen::generate_kernel_source;
use crate::compiler::build_module;
use crate::env::JitConfig;
use crate::loader::{load_module, LoadedModule};
use crate::runtime::DeviceSync;
use crate::target::KernelTarget;

/// Runs the expressions of an [`ApplyIntegrationPoints`] through a kernel
/// compiled for this operator.
///
/// Construction generates, builds and loads the kernel once; [`apply`]
/// only launches it and waits for completion.
///
/// [`apply`]: LinearOperator::apply
#[derive(Debug)]
pub struct DeviceOperator {
    height: usize,
    width: usize,
    dimx: usize,
    dimy: usize,
    nip: usize,
    target: KernelTarget,
    sync: DeviceSync,
    module: LoadedModule,
}

impl DeviceOperator {
    pub const TYPE_TAG: &'static str = "ipoint.device_apply_integration_points";

    pub fn build(host: &ApplyIntegrationPoints, config: &JitConfig) -> OperatorResult<Self> {
        Self::build_with_compiler(host, &GraphCompiler, config)
    }

    /// Builds with a caller supplied lowering of the expressions.
    pub fn build_with_compiler(
        host: &ApplyIntegrationPoints,
        compiler: &dyn StepCompiler,
        config: &JitConfig,
    ) -> OperatorResult<Self> {
        let target = config.target;
        let offsets = ProxyOffsetTable::resolve(host.trial_proxies());
        let source = generate_kernel_source(host.expressions(), &offsets, compiler, target)?;
        if config.dump_source {
            info!("generated {target} kernel:\n{}", source.text);
        } else {
            trace!("generated {target} kernel:\n{}", source.text);
        }

        let artifact = build_module(&source, config)?;
        let module = load_module(artifact, &source.entry_symbol)?;
        let sync = DeviceSync::for_target(target, config.cudart.as_deref())?;
        debug!(
            "device operator ready: target={target}, dimx={}, dimy={}, nip={}",
            host.dim_x(),
            host.dim_y(),
            host.num_points()
        );

        Ok(Self {
            height: host.height(),
            width: host.width(),
            dimx: host.dim_x(),
            dimy: host.dim_y(),
            nip: host.num_points(),
            target,
            sync,
            module,
        })
    }

    pub fn target(&self) -> KernelTarget {
        self.target
    }

    pub fn dim_x(&self) -> usize {
        self.dimx
    }

    pub fn dim_y(&self) -> usize {
        self.dimy
    }

    pub fn num_points(&self) -> usize {
        self.nip
    }

    pub fn module(&self) -> &LoadedModule {
        &self.module
    }
}

impl LinearOperator for DeviceOperator {
    fn height(&self) -> usize {
        self.height
    }

    fn width(&self) -> usize {
        self.width
    }

    fn apply(&self, x: &dyn Vector, y: &mut dyn Vector) -> OperatorResult<()> {
        check_apply_geometry(self, x, &*y)?;
        let space = self.target.memory_space();
        let input = x
            .view(space)
            .ok_or(OperatorError::Residency {
                what: "input",
                space,
            })?
            .with_stride(self.nip);
        let mut output = y
            .view_mut(space)
            .ok_or(OperatorError::Residency {
                what: "output",
                space,
            })?
            .with_stride(self.nip);

        let entry = self.module.entry();
        // SAFETY: Both views hold `dim * nip` doubles in `space`, which is where
        // the kernel built for `self.target` dereferences them, and the kernel
        // only touches indices below `nip + (dim - 1) * nip`.
        unsafe {
            entry(
                self.nip,
                input.as_ptr(),
                input.stride(),
                output.as_mut_ptr(),
                output.stride(),
            );
        }
        self.sync.synchronize()
    }

    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
