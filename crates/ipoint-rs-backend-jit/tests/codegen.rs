use ipoint_rs::expr::GraphCompiler;
use ipoint_rs::{Expr, ProxyOffsetTable, TrialProxy};
use ipoint_rs_backend_jit::{generate_kernel_source, GeneratedSource, KernelTarget};

fn generate(exprs: &[Expr], offsets: &ProxyOffsetTable, target: KernelTarget) -> GeneratedSource {
    generate_kernel_source(exprs, offsets, &GraphCompiler, target).unwrap()
}

#[test]
fn later_expressions_store_after_earlier_blocks() {
    let u = TrialProxy::new("u", &[3]);
    let v = TrialProxy::new("v", &[2]);
    let exprs = vec![Expr::proxy(&u), Expr::proxy(&v).sin()];
    let offsets = ProxyOffsetTable::resolve(&[u, v]);
    let source = generate(&exprs, &offsets, KernelTarget::Cuda);

    assert_eq!(source.output_blocks, vec![0..3, 3..5]);
    assert!(source.text.contains("output[i + (3 + 0) * dist_output] = var_1_0;"));
    assert!(source.text.contains("output[i + (3 + 1) * dist_output] = var_1_1;"));
    assert!(source.text.contains("return input[i + (comp + 3) * dist_input];"));
}

#[test]
fn constant_expression_needs_no_accessor() {
    let exprs = vec![Expr::constant(2.5)];
    let source = generate(&exprs, &ProxyOffsetTable::default(), KernelTarget::HostC);
    assert!(!source.text.contains("#define values_"));
    assert!(source.text.contains("const double var_0_0 = 2.5;"));
    assert!(source.text.contains("output[i + (0 + 0) * dist_output] = var_0_0;"));
}

#[test]
fn host_dialect_emulates_the_launch_grid() {
    let p = TrialProxy::scalar("p");
    let exprs = vec![Expr::proxy(&p)];
    let offsets = ProxyOffsetTable::resolve(&[p]);
    let source = generate(&exprs, &offsets, KernelTarget::HostC);
    assert!(source.text.contains("#include <math.h>"));
    assert!(source.text.contains("const size_t lanes = (size_t)256 * 256;"));
    assert!(source
        .text
        .contains("for (size_t i = lane; i < nip; i += lanes) {"));
    assert!(!source.text.contains("__global__"));
}
