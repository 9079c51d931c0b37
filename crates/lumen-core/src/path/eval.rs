use super::ast::{BinaryOp, Expr, Literal};
use super::parser;
use crate::error::Result;
use crate::traits::ReferenceResolver;
use serde_json::{Number, Value, json};
use std::collections::HashMap;

/// Per-evaluation environment: variable bindings (`%previous`, `%current`,
/// `%resource`) and an optional resolver for `resolve()`.
#[derive(Default)]
pub struct EvalContext<'a> {
    variables: HashMap<String, Vec<Value>>,
    resolver: Option<&'a dyn ReferenceResolver>,
}

impl<'a> EvalContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.variables.insert(name.into(), values);
        self
    }

    pub fn with_resolver(mut self, resolver: &'a dyn ReferenceResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

/// A compiled path expression. Compilation happens once; evaluation is
/// read-only and reusable across resources.
#[derive(Debug, Clone)]
pub struct PathExpression {
    text: String,
    ast: Expr,
}

impl PathExpression {
    pub fn parse(text: &str) -> Result<Self> {
        let ast = parser::parse(text)?;
        Ok(Self {
            text: text.to_string(),
            ast,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate against a resource element tree, returning the result
    /// collection. Unresolvable members produce an empty collection.
    pub fn evaluate(&self, focus: &Value, ctx: &EvalContext<'_>) -> Vec<Value> {
        eval(&self.ast, std::slice::from_ref(focus), ctx)
    }

    /// Collapse the result to a boolean: a singleton `true`, or a non-empty
    /// non-boolean collection, counts as true.
    pub fn evaluate_bool(&self, focus: &Value, ctx: &EvalContext<'_>) -> bool {
        to_bool(&self.evaluate(focus, ctx)) == Some(true)
    }
}

fn eval(expr: &Expr, focus: &[Value], ctx: &EvalContext<'_>) -> Vec<Value> {
    match expr {
        Expr::Literal(lit) => vec![literal_value(lit)],
        Expr::Variable(name) => ctx.variables.get(name).cloned().unwrap_or_default(),
        Expr::Member { base, name } => {
            let input = match base {
                Some(base) => eval(base, focus, ctx),
                None => focus.to_vec(),
            };
            member_of(&input, name)
        }
        Expr::Index { base, index } => {
            let input = eval(base, focus, ctx);
            input.get(*index).cloned().into_iter().collect()
        }
        Expr::Function { base, name, args } => {
            let input = match base {
                Some(base) => eval(base, focus, ctx),
                None => focus.to_vec(),
            };
            apply_function(&input, name, args, ctx)
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, focus, ctx),
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Number(n) => json!(n),
        Literal::Boolean(b) => Value::Bool(*b),
    }
}

/// Member access over a collection: arrays flatten, a name matching the
/// value's own `resourceType` returns the value itself (type-anchored
/// expressions like `Observation.code`).
fn member_of(values: &[Value], name: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Value::Object(map) => {
                if map.get("resourceType").and_then(Value::as_str) == Some(name) {
                    out.push(value.clone());
                    continue;
                }
                match map.get(name) {
                    Some(Value::Array(items)) => out.extend(items.iter().cloned()),
                    Some(Value::Null) | None => {}
                    Some(item) => out.push(item.clone()),
                }
            }
            Value::Array(items) => out.extend(member_of(items, name)),
            _ => {}
        }
    }
    out
}

fn apply_function(input: &[Value], name: &str, args: &[Expr], ctx: &EvalContext<'_>) -> Vec<Value> {
    match name {
        "empty" => vec![Value::Bool(input.is_empty())],
        "exists" => {
            if let Some(criteria) = args.first() {
                let any = input
                    .iter()
                    .any(|item| to_bool(&eval(criteria, std::slice::from_ref(item), ctx)) == Some(true));
                vec![Value::Bool(any)]
            } else {
                vec![Value::Bool(!input.is_empty())]
            }
        }
        "not" => match to_bool(input) {
            Some(b) => vec![Value::Bool(!b)],
            None => Vec::new(),
        },
        "first" => input.first().cloned().into_iter().collect(),
        "count" => vec![json!(input.len() as u64)],
        "where" => {
            let Some(criteria) = args.first() else {
                return Vec::new();
            };
            input
                .iter()
                .filter(|item| {
                    to_bool(&eval(criteria, std::slice::from_ref(*item), ctx)) == Some(true)
                })
                .cloned()
                .collect()
        }
        "ofType" => {
            let Some(Expr::Member { name: type_name, .. }) = args.first() else {
                return Vec::new();
            };
            input
                .iter()
                .filter(|item| {
                    item.get("resourceType").and_then(Value::as_str) == Some(type_name.as_str())
                })
                .cloned()
                .collect()
        }
        "resolve" => {
            let Some(resolver) = ctx.resolver else {
                return Vec::new();
            };
            let mut out = Vec::new();
            for item in input {
                let reference = match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(map) => map.get("reference").and_then(Value::as_str),
                    _ => None,
                };
                if let Some(reference) = reference
                    && let Some(resource) = resolver.resolve(reference)
                {
                    out.push(resource.as_json());
                }
            }
            out
        }
        // Unknown functions yield empty rather than failing the evaluation.
        _ => Vec::new(),
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    focus: &[Value],
    ctx: &EvalContext<'_>,
) -> Vec<Value> {
    match op {
        BinaryOp::Or => {
            let l = to_bool(&eval(left, focus, ctx));
            let r = to_bool(&eval(right, focus, ctx));
            match (l, r) {
                (Some(true), _) | (_, Some(true)) => vec![Value::Bool(true)],
                (Some(false), Some(false)) => vec![Value::Bool(false)],
                _ => Vec::new(),
            }
        }
        BinaryOp::And => {
            let l = to_bool(&eval(left, focus, ctx));
            let r = to_bool(&eval(right, focus, ctx));
            match (l, r) {
                (Some(false), _) | (_, Some(false)) => vec![Value::Bool(false)],
                (Some(true), Some(true)) => vec![Value::Bool(true)],
                _ => Vec::new(),
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let l = eval(left, focus, ctx);
            let r = eval(right, focus, ctx);
            if l.is_empty() || r.is_empty() {
                return Vec::new();
            }
            let equal = values_equal(&l[0], &r[0]);
            vec![Value::Bool(if op == BinaryOp::Eq { equal } else { !equal })]
        }
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let l = eval(left, focus, ctx);
            let r = eval(right, focus, ctx);
            if l.is_empty() || r.is_empty() {
                return Vec::new();
            }
            match compare(&l[0], &r[0]) {
                Some(ord) => {
                    let matched = match op {
                        BinaryOp::Gt => ord.is_gt(),
                        BinaryOp::Ge => ord.is_ge(),
                        BinaryOp::Lt => ord.is_lt(),
                        BinaryOp::Le => ord.is_le(),
                        _ => unreachable!(),
                    };
                    vec![Value::Bool(matched)]
                }
                None => Vec::new(),
            }
        }
    }
}

/// Truth of a collection: empty is unknown, a singleton boolean is itself,
/// anything else non-empty is true (existence).
pub(crate) fn to_bool(values: &[Value]) -> Option<bool> {
    match values {
        [] => None,
        [Value::Bool(b)] => Some(*b),
        _ => Some(true),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    None
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_number().and_then(Number::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceEnvelope;

    struct MapResolver(HashMap<String, ResourceEnvelope>);

    impl ReferenceResolver for MapResolver {
        fn resolve(&self, reference: &str) -> Option<ResourceEnvelope> {
            self.0.get(reference).cloned()
        }
    }

    #[test]
    fn resolve_follows_references() {
        let mut targets = HashMap::new();
        targets.insert(
            "Organization/org-1".to_string(),
            ResourceEnvelope::new("org-1", "Organization")
                .with_field("name", json!("Community Hospital")),
        );
        let resolver = MapResolver(targets);
        let ctx = EvalContext::new().with_resolver(&resolver);

        let focus = json!({
            "resourceType": "Patient",
            "managingOrganization": {"reference": "Organization/org-1"}
        });
        let expr =
            PathExpression::parse("Patient.managingOrganization.resolve().name").unwrap();
        assert_eq!(expr.evaluate(&focus, &ctx), vec![json!("Community Hospital")]);
    }

    #[test]
    fn resolve_without_resolver_is_empty() {
        let focus = json!({
            "resourceType": "Patient",
            "managingOrganization": {"reference": "Organization/org-1"}
        });
        let expr = PathExpression::parse("managingOrganization.resolve()").unwrap();
        assert!(expr.evaluate(&focus, &EvalContext::new()).is_empty());
    }

    #[test]
    fn comparison_against_empty_is_false_at_boolean_boundary() {
        let focus = json!({"resourceType": "Observation"});
        let expr = PathExpression::parse("Observation.status = 'final'").unwrap();
        assert!(!expr.evaluate_bool(&focus, &EvalContext::new()));
        assert!(expr.evaluate(&focus, &EvalContext::new()).is_empty());
    }

    #[test]
    fn unknown_function_yields_empty() {
        let focus = json!({"resourceType": "Patient", "name": [{"family": "Doe"}]});
        let expr = PathExpression::parse("Patient.name.frobnicate()").unwrap();
        assert!(expr.evaluate(&focus, &EvalContext::new()).is_empty());
    }

    #[test]
    fn exists_with_criteria() {
        let focus = json!({
            "resourceType": "Patient",
            "name": [{"family": "Doe"}, {"family": "Roe"}]
        });
        let ctx = EvalContext::new();
        assert!(
            PathExpression::parse("Patient.name.exists(family = 'Roe')")
                .unwrap()
                .evaluate_bool(&focus, &ctx)
        );
        assert!(
            !PathExpression::parse("Patient.name.exists(family = 'Poe')")
                .unwrap()
                .evaluate_bool(&focus, &ctx)
        );
    }

    #[test]
    fn not_inverts() {
        let focus = json!({"resourceType": "Patient", "active": false});
        let expr = PathExpression::parse("Patient.active.not()").unwrap();
        assert!(expr.evaluate_bool(&focus, &EvalContext::new()));
    }
}
