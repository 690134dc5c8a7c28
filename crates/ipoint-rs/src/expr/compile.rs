use std::collections::HashMap;

use crate::proxy::{Dims, TrialProxy};

use super::{broadcast, Expr, ExprNode, ExprResult};

/// Lowers an expression into an ordered sequence of elementary steps, each
/// carrying a code fragment that evaluates it for point `i`.
///
/// Fragments read trial proxies through `values_<step>(i, comp)` (see
/// [`proxy_accessor`]) and declare their results as `var_<step>_<comp>` (see
/// [`step_var`]). Whoever embeds the fragments must bind the accessors.
pub trait StepCompiler: Send + Sync {
    fn compile(&self, expr: &Expr) -> ExprResult<CompiledExpr>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStep {
    pub index: usize,
    pub code: String,
    pub dims: Dims,
    /// Set when the step reads a trial proxy.
    pub proxy: Option<TrialProxy>,
}

impl CompiledStep {
    pub fn dimension(&self) -> usize {
        self.dims.iter().product()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    steps: Vec<CompiledStep>,
}

impl CompiledExpr {
    pub fn new(steps: Vec<CompiledStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[CompiledStep] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<&CompiledStep> {
        self.steps.last()
    }

    /// All fragments in step order.
    pub fn body(&self) -> String {
        let mut body = String::new();
        for step in &self.steps {
            body.push_str(&step.code);
            if !step.code.ends_with('\n') {
                body.push('\n');
            }
        }
        body
    }

    /// Variable holding component `comp` of the final step.
    pub fn output_var(&self, comp: usize) -> Option<String> {
        self.last_step().map(|step| step_var(step.index, comp))
    }
}

pub fn step_var(step: usize, comp: usize) -> String {
    format!("var_{step}_{comp}")
}

pub fn proxy_accessor(step: usize) -> String {
    format!("values_{step}")
}

/// Formats a double literal that C and CUDA parse back to the same value.
pub fn format_f64(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_negative() {
            "-INFINITY".to_string()
        } else {
            "INFINITY".to_string()
        }
    } else {
        let base = format!("{value:?}");
        if base.contains('.') || base.contains('e') || base.contains('E') {
            base
        } else {
            format!("{base}.0")
        }
    }
}

/// Post-order lowering of the expression DAG. Shared nodes become one step.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCompiler;

impl GraphCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl StepCompiler for GraphCompiler {
    fn compile(&self, expr: &Expr) -> ExprResult<CompiledExpr> {
        let mut lowering = Lowering::default();
        lowering.lower(expr);
        Ok(CompiledExpr::new(lowering.steps))
    }
}

#[derive(Default)]
struct Lowering {
    steps: Vec<CompiledStep>,
    visited: HashMap<usize, usize>,
}

impl Lowering {
    fn lower(&mut self, expr: &Expr) -> usize {
        if let Some(&step) = self.visited.get(&expr.node_key()) {
            return step;
        }

        let mut proxy = None;
        let lines: Vec<String> = match expr.node() {
            ExprNode::Proxy(p) => {
                proxy = Some(p.clone());
                let index = self.steps.len();
                let accessor = proxy_accessor(index);
                (0..p.dimension())
                    .map(|c| format!("double {} = {accessor}(i, {c});", step_var(index, c)))
                    .collect()
            }
            ExprNode::Constant(value) => {
                let index = self.steps.len();
                vec![format!(
                    "const double {} = {};",
                    step_var(index, 0),
                    format_f64(*value)
                )]
            }
            ExprNode::Vector(entries) => {
                let sources: Vec<usize> = entries.iter().map(|entry| self.lower(entry)).collect();
                let index = self.steps.len();
                sources
                    .iter()
                    .enumerate()
                    .map(|(c, src)| {
                        format!("double {} = {};", step_var(index, c), step_var(*src, 0))
                    })
                    .collect()
            }
            ExprNode::Component { input, index: comp } => {
                let src = self.lower(input);
                let index = self.steps.len();
                vec![format!(
                    "double {} = {};",
                    step_var(index, 0),
                    step_var(src, *comp)
                )]
            }
            ExprNode::Unary { op, input } => {
                let src = self.lower(input);
                let index = self.steps.len();
                (0..expr.dimension())
                    .map(|c| {
                        format!(
                            "double {} = {};",
                            step_var(index, c),
                            op.c_expr(&step_var(src, c))
                        )
                    })
                    .collect()
            }
            ExprNode::Binary { op, lhs, rhs } => {
                let a = self.lower(lhs);
                let b = self.lower(rhs);
                let index = self.steps.len();
                let (a_len, b_len) = (lhs.dimension(), rhs.dimension());
                (0..expr.dimension())
                    .map(|c| {
                        let lhs_var = step_var(a, broadcast(c, a_len));
                        let rhs_var = step_var(b, broadcast(c, b_len));
                        format!(
                            "double {} = {};",
                            step_var(index, c),
                            op.c_expr(&lhs_var, &rhs_var)
                        )
                    })
                    .collect()
            }
            ExprNode::Inner { lhs, rhs } => {
                let a = self.lower(lhs);
                let b = self.lower(rhs);
                let index = self.steps.len();
                let terms: Vec<String> = (0..lhs.dimension())
                    .map(|c| format!("{} * {}", step_var(a, c), step_var(b, c)))
                    .collect();
                let sum = if terms.is_empty() {
                    format_f64(0.0)
                } else {
                    terms.join(" + ")
                };
                vec![format!("double {} = {sum};", step_var(index, 0))]
            }
        };

        let index = self.steps.len();
        self.steps.push(CompiledStep {
            index,
            code: lines.join("\n"),
            dims: Dims::from_slice(expr.dimensions()),
            proxy,
        });
        self.visited.insert(expr.node_key(), index);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::TrialProxy;

    #[test]
    fn proxy_steps_read_through_their_accessor() {
        let u = TrialProxy::new("u", &[2]);
        let compiled = GraphCompiler.compile(&Expr::proxy(&u)).unwrap();
        assert_eq!(compiled.steps().len(), 1);
        let step = &compiled.steps()[0];
        assert_eq!(step.proxy.as_ref(), Some(&u));
        assert_eq!(
            step.code,
            "double var_0_0 = values_0(i, 0);\ndouble var_0_1 = values_0(i, 1);"
        );
        assert_eq!(compiled.output_var(1).as_deref(), Some("var_0_1"));
    }

    #[test]
    fn shared_nodes_lower_to_one_step() {
        let u = Expr::proxy(&TrialProxy::new("u", &[3]));
        let expr = u.inner(&u).unwrap();
        let compiled = GraphCompiler.compile(&expr).unwrap();
        assert_eq!(compiled.steps().len(), 2);
        assert_eq!(
            compiled.steps()[1].code,
            "double var_1_0 = var_0_0 * var_0_0 + var_0_1 * var_0_1 + var_0_2 * var_0_2;"
        );
    }

    #[test]
    fn inner_product_of_empty_operands_is_zero() {
        let u = Expr::proxy(&TrialProxy::new("u", &[0]));
        let expr = u.inner(&u).unwrap();
        let compiled = GraphCompiler.compile(&expr).unwrap();
        assert_eq!(compiled.steps()[0].code, "");
        assert_eq!(compiled.steps()[1].code, "double var_1_0 = 0.0;");
        assert_eq!(expr.evaluate(|_, _| 1.0), vec![0.0]);
    }

    #[test]
    fn scalar_operands_broadcast_in_fragments() {
        let u = Expr::proxy(&TrialProxy::new("u", &[2]));
        let expr = u.mul(&Expr::constant(0.5)).unwrap();
        let compiled = GraphCompiler.compile(&expr).unwrap();
        let body = compiled.body();
        assert!(body.contains("const double var_1_0 = 0.5;"));
        assert!(body.contains("double var_2_0 = (var_0_0) * (var_1_0);"));
        assert!(body.contains("double var_2_1 = (var_0_1) * (var_1_0);"));
    }

    #[test]
    fn lowering_is_deterministic() {
        let u = TrialProxy::new("u", &[2]);
        let build = || {
            let ue = Expr::proxy(&u);
            ue.sin().add(&ue.component(1).unwrap()).unwrap()
        };
        let first = GraphCompiler.compile(&build()).unwrap().body();
        let second = GraphCompiler.compile(&build()).unwrap().body();
        assert_eq!(first, second);
    }

    #[test]
    fn double_literals_round_trip() {
        assert_eq!(format_f64(2.0), "2.0");
        assert_eq!(format_f64(-0.25), "-0.25");
        assert_eq!(format_f64(1e-300), "1e-300");
        assert_eq!(format_f64(f64::NEG_INFINITY), "-INFINITY");
        let parsed: f64 = format_f64(0.1).parse().unwrap();
        assert_eq!(parsed, 0.1);
    }
}
