//! Host operator evaluating expressions at every integration point.

use std::any::Any;
use std::collections::HashMap;

use log::debug;

use crate::error::{OperatorError, OperatorResult};
use crate::expr::{Expr, ExprError};
use crate::linalg::{check_apply_geometry, LinearOperator};
use crate::proxy::{ProxyOffsetTable, TrialProxy};
use crate::vector::{MemorySpace, Vector};

/// Applies an ordered set of expressions pointwise.
///
/// The input holds the trial proxies of all points, the output the
/// expression values; both use the batched-by-component layout. Expression
/// `j` writes output components `[base_j, base_j + dim_j)` where `base_j` sums
/// the dimensions of the expressions before it.
#[derive(Debug, Clone)]
pub struct ApplyIntegrationPoints {
    exprs: Vec<Expr>,
    trial_proxies: Vec<TrialProxy>,
    offsets: ProxyOffsetTable,
    nip: usize,
    dimx: usize,
    dimy: usize,
}

impl ApplyIntegrationPoints {
    pub const TYPE_TAG: &'static str = "ipoint.apply_integration_points";

    pub fn new(
        exprs: Vec<Expr>,
        trial_proxies: Vec<TrialProxy>,
        nip: usize,
    ) -> OperatorResult<Self> {
        let offsets = ProxyOffsetTable::resolve(&trial_proxies);
        for expr in &exprs {
            for proxy in expr.proxies() {
                if offsets.position(&proxy).is_none() {
                    return Err(ExprError::UnboundProxy {
                        name: proxy.name().to_string(),
                    }
                    .into());
                }
            }
        }
        let dimx = offsets.total();
        let dimy = exprs.iter().map(Expr::dimension).sum();
        debug!(
            "apply-integration-points: {} expressions, dimx={dimx}, dimy={dimy}, nip={nip}",
            exprs.len()
        );
        Ok(Self {
            exprs,
            trial_proxies,
            offsets,
            nip,
            dimx,
            dimy,
        })
    }

    pub fn expressions(&self) -> &[Expr] {
        &self.exprs
    }

    pub fn trial_proxies(&self) -> &[TrialProxy] {
        &self.trial_proxies
    }

    pub fn offsets(&self) -> &ProxyOffsetTable {
        &self.offsets
    }

    /// Scalar components per point in the input.
    pub fn dim_x(&self) -> usize {
        self.dimx
    }

    /// Scalar components per point in the output.
    pub fn dim_y(&self) -> usize {
        self.dimy
    }

    pub fn num_points(&self) -> usize {
        self.nip
    }
}

impl LinearOperator for ApplyIntegrationPoints {
    fn height(&self) -> usize {
        self.dimy * self.nip
    }

    fn width(&self) -> usize {
        self.dimx * self.nip
    }

    fn apply(&self, x: &dyn Vector, y: &mut dyn Vector) -> OperatorResult<()> {
        check_apply_geometry(self, x, &*y)?;
        let input = x.as_host_slice().ok_or(OperatorError::Residency {
            what: "input",
            space: MemorySpace::Host,
        })?;
        let output = y.as_host_slice_mut().ok_or(OperatorError::Residency {
            what: "output",
            space: MemorySpace::Host,
        })?;

        let nip = self.nip;
        let offsets: HashMap<u64, usize> = self
            .offsets
            .iter()
            .rev()
            .map(|entry| (entry.proxy.id(), entry.offset))
            .collect();

        for point in 0..nip {
            let mut base = 0usize;
            for expr in &self.exprs {
                let values = expr.evaluate(|proxy, comp| {
                    offsets
                        .get(&proxy.id())
                        .map_or(f64::NAN, |offset| input[point + (comp + offset) * nip])
                });
                for (j, value) in values.into_iter().enumerate() {
                    output[point + (base + j) * nip] = value;
                }
                base += expr.dimension();
            }
        }
        Ok(())
    }

    fn type_tag(&self) -> &'static str {
        Self::TYPE_TAG
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
