use std::process::Command;

use anyhow::Result;
use ipoint_rs::registry::{create_device_operator, has_device_creator};
use ipoint_rs::{ApplyIntegrationPoints, Expr, HostVector, TrialProxy};
use ipoint_rs_backend_jit::{register_device_operators, DeviceOperator, JitConfig, KernelTarget};

#[test]
fn registered_conversion_builds_a_device_operator() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    register_device_operators();
    assert!(has_device_creator(ApplyIntegrationPoints::TYPE_TAG));

    let compiler = JitConfig::host().cc;
    let available = Command::new(&compiler)
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false);
    if !available {
        eprintln!("skipping registry jit test: C compiler '{compiler}' unavailable");
        return Ok(());
    }
    std::env::set_var("IPOINT_JIT_TARGET", "c");

    let p = TrialProxy::scalar("p");
    let expr = Expr::proxy(&p).mul(&Expr::constant(3.0))?;
    let host = ApplyIntegrationPoints::new(vec![expr], vec![p], 3)?;
    let device = create_device_operator(&host)?;
    assert_eq!(device.type_tag(), DeviceOperator::TYPE_TAG);
    let concrete = device
        .as_any()
        .downcast_ref::<DeviceOperator>()
        .expect("device operator");
    assert_eq!(concrete.target(), KernelTarget::HostC);

    let x = HostVector::from_vec(vec![1.0, 2.0, 3.0]);
    let mut y = HostVector::zeros(3);
    device.apply(&x, &mut y)?;
    assert_eq!(y.data(), &[3.0, 6.0, 9.0]);
    Ok(())
}
