//! Kernel source generation.
//!
//! One kernel evaluates every expression of an operator. Each expression gets
//! its own scope holding the proxy accessors and a grid-stride loop over the
//! points; the entry function launches the kernel with a fixed
//! `LAUNCH_BLOCKS x LAUNCH_THREADS` shape.

mod utils;

use std::ops::Range;

use ipoint_rs::expr::{proxy_accessor, CompiledExpr, StepCompiler};
use ipoint_rs::{Expr, ExprError, OperatorError, OperatorResult, ProxyOffsetTable};

use crate::target::KernelTarget;

use utils::{push_block, push_line};

pub const ENTRY_SYMBOL: &str = "ipoint_apply";
pub const KERNEL_SYMBOL: &str = "ipoint_kernel";
pub const LAUNCH_BLOCKS: usize = 256;
pub const LAUNCH_THREADS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub text: String,
    pub target: KernelTarget,
    pub entry_symbol: String,
    /// Output components written by each expression, in order.
    pub output_blocks: Vec<Range<usize>>,
}

/// Generates the translation unit for `exprs`.
///
/// The text depends only on the arguments: the same expressions, offsets and
/// step fragments always produce byte-identical source.
pub fn generate_kernel_source(
    exprs: &[Expr],
    offsets: &ProxyOffsetTable,
    compiler: &dyn StepCompiler,
    target: KernelTarget,
) -> OperatorResult<GeneratedSource> {
    let mut module = String::new();
    emit_prelude(&mut module, target);

    let mut output_blocks = Vec::with_capacity(exprs.len());
    let mut base_output = 0usize;
    for expr in exprs {
        let compiled = compiler.compile(expr)?;
        let block = base_output..base_output + expr.dimension();
        emit_expression(&mut module, target, &compiled, offsets, &block)?;
        base_output = block.end;
        output_blocks.push(block);
    }
    push_line(&mut module, 0, "}");
    push_line(&mut module, 0, "");

    emit_entry(&mut module, target);

    Ok(GeneratedSource {
        text: module,
        target,
        entry_symbol: ENTRY_SYMBOL.to_string(),
        output_blocks,
    })
}

fn emit_prelude(module: &mut String, target: KernelTarget) {
    let includes = match target {
        KernelTarget::Cuda => "#include <cstddef>\n#include <cmath>",
        KernelTarget::HostC => "#include <stddef.h>\n#include <math.h>",
    };
    push_line(
        module,
        0,
        &format!("// generated by ipoint-rs-backend-jit ({target})"),
    );
    push_block(module, 0, includes);
    push_block(
        module,
        0,
        r#"

        #if defined(_WIN32)
        #define IPOINT_EXPORT __declspec(dllexport)
        #else
        #define IPOINT_EXPORT __attribute__((visibility("default")))
        #endif
        "#,
    );
    push_line(module, 0, "");
    let signature = match target {
        KernelTarget::Cuda => format!(
            r#"
            __global__ void {KERNEL_SYMBOL}(size_t nip, const double* input, size_t dist_input,
                                            double* output, size_t dist_output) {{
            "#
        ),
        KernelTarget::HostC => format!(
            r#"
            static void {KERNEL_SYMBOL}(size_t lane, size_t lanes, size_t nip,
                                        const double* input, size_t dist_input,
                                        double* output, size_t dist_output) {{
            "#
        ),
    };
    push_block(module, 0, &signature);
}

fn emit_expression(
    module: &mut String,
    target: KernelTarget,
    compiled: &CompiledExpr,
    offsets: &ProxyOffsetTable,
    block: &Range<usize>,
) -> OperatorResult<()> {
    let last = compiled
        .last_step()
        .ok_or_else(|| OperatorError::codegen("expression lowered to no steps"))?;
    if last.dimension() != block.len() {
        let (actual, declared) = (last.dimension(), block.len());
        return Err(OperatorError::codegen(format!(
            "final step has {actual} components, expression declares {declared}"
        )));
    }

    push_line(module, 1, "{");

    // Accessors are bound before the loop that consumes them.
    let mut accessors = Vec::new();
    for step in compiled.steps() {
        let Some(proxy) = step.proxy.as_ref() else {
            continue;
        };
        let offset = offsets
            .offset_of(proxy)
            .ok_or_else(|| ExprError::UnboundProxy {
                name: proxy.name().to_string(),
            })?;
        let name = proxy_accessor(step.index);
        emit_accessor(module, target, &name, offset);
        accessors.push(name);
    }

    match target {
        KernelTarget::Cuda => push_block(
            module,
            2,
            r#"
            const size_t lane = (size_t)blockIdx.x * blockDim.x + threadIdx.x;
            const size_t lanes = (size_t)blockDim.x * gridDim.x;
            for (size_t i = lane; i < nip; i += lanes) {
            "#,
        ),
        KernelTarget::HostC => push_line(module, 2, "for (size_t i = lane; i < nip; i += lanes) {"),
    }

    for line in compiled.body().lines() {
        push_line(module, 3, line);
    }
    for comp in 0..block.len() {
        let var = compiled
            .output_var(comp)
            .ok_or_else(|| OperatorError::codegen("expression lowered to no steps"))?;
        let base = block.start;
        push_line(
            module,
            3,
            &format!("output[i + ({base} + {comp}) * dist_output] = {var};"),
        );
    }
    push_line(module, 2, "}");

    if target == KernelTarget::HostC {
        for name in &accessors {
            push_line(module, 0, &format!("#undef {name}"));
        }
    }
    push_line(module, 1, "}");
    Ok(())
}

/// Binds `name(i, comp)` to `input[i + (comp + offset) * dist_input]`.
fn emit_accessor(module: &mut String, target: KernelTarget, name: &str, offset: usize) {
    match target {
        KernelTarget::Cuda => push_line(
            module,
            2,
            &format!(
                "auto {name} = [input, dist_input](size_t i, size_t comp) \
                 {{ return input[i + (comp + {offset}) * dist_input]; }};"
            ),
        ),
        KernelTarget::HostC => push_line(
            module,
            0,
            &format!("#define {name}(i, comp) (input[(i) + ((comp) + {offset}) * dist_input])"),
        ),
    }
}

fn emit_entry(module: &mut String, target: KernelTarget) {
    let prefix = match target {
        KernelTarget::Cuda => "extern \"C\" IPOINT_EXPORT",
        KernelTarget::HostC => "IPOINT_EXPORT",
    };
    push_line(
        module,
        0,
        &format!(
            "{prefix} void {ENTRY_SYMBOL}(size_t nip, const double* input, size_t dist_input,"
        ),
    );
    push_line(module, 0, "    double* output, size_t dist_output) {");
    let launch = match target {
        KernelTarget::Cuda => format!(
            r#"
            {KERNEL_SYMBOL}<<<{LAUNCH_BLOCKS}, {LAUNCH_THREADS}>>>(nip, input, dist_input, output, dist_output);
            "#
        ),
        KernelTarget::HostC => format!(
            r#"
            const size_t lanes = (size_t){LAUNCH_BLOCKS} * {LAUNCH_THREADS};
            for (size_t block = 0; block < {LAUNCH_BLOCKS}; ++block) {{
              for (size_t thread = 0; thread < {LAUNCH_THREADS}; ++thread) {{
                {KERNEL_SYMBOL}(block * {LAUNCH_THREADS} + thread, lanes, nip, input, dist_input, output, dist_output);
              }}
            }}
            "#
        ),
    };
    push_block(module, 1, &launch);
    push_line(module, 0, "}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipoint_rs::expr::GraphCompiler;
    use ipoint_rs::TrialProxy;

    fn sample() -> (Vec<Expr>, Vec<TrialProxy>) {
        let u = TrialProxy::new("u", &[2]);
        let p = TrialProxy::scalar("p");
        let ue = Expr::proxy(&u);
        let pe = Expr::proxy(&p);
        let exprs = vec![
            ue.mul(&pe).unwrap(),
            ue.inner(&ue).unwrap().sqrt(),
            Expr::vector(vec![pe.sin(), pe.cos(), Expr::constant(1.5)]).unwrap(),
        ];
        (exprs, vec![u, p])
    }

    fn generate_with(
        exprs: &[Expr],
        offsets: &ProxyOffsetTable,
        target: KernelTarget,
    ) -> OperatorResult<GeneratedSource> {
        generate_kernel_source(exprs, offsets, &GraphCompiler, target)
    }

    fn generate(target: KernelTarget) -> GeneratedSource {
        let (exprs, proxies) = sample();
        let offsets = ProxyOffsetTable::resolve(&proxies);
        generate_with(&exprs, &offsets, target).unwrap()
    }

    #[test]
    fn generation_is_deterministic() {
        for target in [KernelTarget::Cuda, KernelTarget::HostC] {
            let (exprs, proxies) = sample();
            let offsets = ProxyOffsetTable::resolve(&proxies);
            let first = generate_with(&exprs, &offsets, target).unwrap();
            let second = generate_with(&exprs, &offsets, target).unwrap();
            assert_eq!(first.text, second.text);
        }
    }

    #[test]
    fn output_blocks_are_disjoint_and_cover_dimy() {
        let source = generate(KernelTarget::Cuda);
        assert_eq!(source.output_blocks, vec![0..2, 2..3, 3..6]);
        for block in &source.output_blocks {
            for comp in 0..block.len() {
                let store = format!("output[i + ({} + {comp}) * dist_output]", block.start);
                assert_eq!(source.text.matches(&store).count(), 1, "{store}");
            }
        }
    }

    #[test]
    fn accessors_use_proxy_offsets() {
        let cuda = generate(KernelTarget::Cuda).text;
        assert!(cuda.contains("auto values_0 = [input, dist_input](size_t i, size_t comp) {"));
        assert!(cuda.contains("{ return input[i + (comp + 0) * dist_input]; };"));
        assert!(cuda.contains("return input[i + (comp + 2) * dist_input];"));

        let host = generate(KernelTarget::HostC).text;
        assert!(host.contains("#define values_1(i, comp)"));
        assert!(host.contains("(input[(i) + ((comp) + 2) * dist_input])"));
        assert!(host.contains("#undef values_1"));
    }

    #[test]
    fn accessors_precede_the_point_loop() {
        let source = generate(KernelTarget::Cuda);
        let accessor = source.text.find("auto values_0").unwrap();
        let first_loop = source.text.find("for (size_t i = lane;").unwrap();
        let first_use = source.text.find("values_0(i, 0)").unwrap();
        assert!(accessor < first_loop);
        assert!(first_loop < first_use);
    }

    #[test]
    fn cuda_kernel_uses_grid_stride_loop_and_fixed_launch() {
        let source = generate(KernelTarget::Cuda);
        let text = &source.text;
        assert!(text.contains("const size_t lanes = (size_t)blockDim.x * gridDim.x;"));
        assert!(text.contains("ipoint_kernel<<<256, 256>>>("));
        assert!(text.contains("extern \"C\" IPOINT_EXPORT void ipoint_apply("));
        assert_eq!(source.entry_symbol, ENTRY_SYMBOL);
    }

    #[test]
    fn proxy_missing_from_offsets_is_an_error() {
        let (exprs, proxies) = sample();
        let offsets = ProxyOffsetTable::resolve(&proxies[..1]);
        let err = generate_with(&exprs, &offsets, KernelTarget::Cuda).unwrap_err();
        assert!(matches!(
            err,
            OperatorError::Expr(ExprError::UnboundProxy { ref name }) if name == "p"
        ));
    }

    #[test]
    fn empty_expression_set_still_has_an_entry() {
        let offsets = ProxyOffsetTable::default();
        let source = generate_with(&[], &offsets, KernelTarget::HostC).unwrap();
        assert!(source.output_blocks.is_empty());
        assert!(source.text.contains("IPOINT_EXPORT void ipoint_apply("));
    }
}
