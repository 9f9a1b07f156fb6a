//! Row expressions
//!
//! A small, serializable expression language evaluated one row at a time.
//! Transforms are built from these expressions instead of opaque closures, so
//! a stored definition can be re-evaluated anywhere it is loaded.
//!
//! ## Null semantics
//!
//! - arithmetic and comparisons with a null operand yield null
//! - division or modulo by zero yields null
//! - `and` / `or` follow three-valued logic (`false and null = false`)

use crate::{Error, FeatureValue, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Expression (column references, literals, operations)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Column reference
    Column(String),

    /// Literal value
    Literal(FeatureValue),

    /// Binary operation (a + b, a > b, etc.)
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },

    /// Unary operation (NOT a, -a)
    UnaryOp { op: UnaryOperator, expr: Box<Expr> },

    /// Built-in function call
    Function { name: ScalarFunction, args: Vec<Expr> },

    /// CASE WHEN expression
    Case {
        conditions: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    // Comparison
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,

    // Logical
    And,
    Or,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Unary operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// Built-in scalar functions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScalarFunction {
    Abs,
    /// First non-null argument
    Coalesce,
    Lower,
    Upper,
    /// String concatenation; null if any argument is null
    Concat,
    /// String length or list length
    Length,
    ToFloat,
    /// Truncates floats toward zero
    ToInt,
}

impl Expr {
    pub fn column(name: &str) -> Self {
        Self::Column(name.to_string())
    }

    pub fn literal<T: Into<FeatureValue>>(value: T) -> Self {
        Self::Literal(value.into())
    }

    fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Self::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    // Comparison operators
    pub fn eq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Eq, right)
    }

    pub fn neq(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Neq, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Gt, right)
    }

    pub fn gte(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Gte, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Lt, right)
    }

    pub fn lte(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Lte, right)
    }

    // Logical operators
    pub fn and(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::And, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Or, right)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Self::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(expr),
        }
    }

    pub fn negate(expr: Expr) -> Self {
        Self::UnaryOp {
            op: UnaryOperator::Minus,
            expr: Box::new(expr),
        }
    }

    // Arithmetic operators
    #[allow(clippy::should_implement_trait)]
    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Add, right)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Sub, right)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Mul, right)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(left: Expr, right: Expr) -> Self {
        Self::binary(left, BinaryOperator::Div, right)
    }

    pub fn function(name: ScalarFunction, args: Vec<Expr>) -> Self {
        Self::Function { name, args }
    }

    pub fn case(conditions: Vec<(Expr, Expr)>, else_expr: Option<Expr>) -> Self {
        Self::Case {
            conditions,
            else_expr: else_expr.map(Box::new),
        }
    }

    /// Every column this expression reads, in first-reference order
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Literal(_) => {}
            Self::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::UnaryOp { expr, .. } => expr.collect_columns(out),
            Self::Function { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
            Self::Case {
                conditions,
                else_expr,
            } => {
                for (when, then) in conditions {
                    when.collect_columns(out);
                    then.collect_columns(out);
                }
                if let Some(e) = else_expr {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Evaluates the expression against one row
    ///
    /// `lookup` resolves a column name to the row's value; an unresolved
    /// column is a `SchemaMismatch`.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> Result<FeatureValue>
    where
        F: Fn(&str) -> Option<&'a FeatureValue>,
    {
        match self {
            Self::Column(name) => lookup(name).cloned().ok_or_else(|| {
                Error::schema_mismatch(format!("expression references missing column '{}'", name))
            }),
            Self::Literal(value) => Ok(value.clone()),
            Self::BinaryOp { left, op, right } => {
                let l = left.evaluate(lookup)?;
                let r = right.evaluate(lookup)?;
                eval_binary(*op, l, r)
            }
            Self::UnaryOp { op, expr } => eval_unary(*op, expr.evaluate(lookup)?),
            Self::Function { name, args } => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(lookup))
                    .collect::<Result<Vec<_>>>()?;
                eval_function(*name, values)
            }
            Self::Case {
                conditions,
                else_expr,
            } => {
                for (when, then) in conditions {
                    match when.evaluate(lookup)? {
                        FeatureValue::Bool(true) => return then.evaluate(lookup),
                        FeatureValue::Bool(false) | FeatureValue::Null => continue,
                        other => {
                            return Err(type_error("CASE condition", &other, &FeatureValue::Null))
                        }
                    }
                }
                match else_expr {
                    Some(e) => e.evaluate(lookup),
                    None => Ok(FeatureValue::Null),
                }
            }
        }
    }
}

fn type_error(op: &str, left: &FeatureValue, right: &FeatureValue) -> Error {
    Error::schema_mismatch(format!(
        "cannot apply {} to {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn eval_binary(op: BinaryOperator, left: FeatureValue, right: FeatureValue) -> Result<FeatureValue> {
    use BinaryOperator::*;
    use FeatureValue as V;

    match op {
        And | Or => return eval_logical(op, left, right),
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(V::Null);
    }

    match op {
        Eq | Neq | Gt | Gte | Lt | Lte => {
            let ordering = left
                .compare(&right)
                .ok_or_else(|| type_error(&format!("{:?}", op), &left, &right))?;
            let result = match op {
                Eq => ordering == Ordering::Equal,
                Neq => ordering != Ordering::Equal,
                Gt => ordering == Ordering::Greater,
                Gte => ordering != Ordering::Less,
                Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            };
            Ok(V::Bool(result))
        }
        Add | Sub | Mul | Div | Mod => match (&left, &right) {
            (V::Int(a), V::Int(b)) => Ok(int_arith(op, *a, *b)),
            (V::Int(_) | V::Float(_), V::Int(_) | V::Float(_)) => {
                let (a, b) = (left.as_f64().unwrap_or_default(), right.as_f64().unwrap_or_default());
                Ok(float_arith(op, a, b))
            }
            (V::String(a), V::String(b)) if op == Add => Ok(V::String(format!("{}{}", a, b))),
            _ => Err(type_error(&format!("{:?}", op), &left, &right)),
        },
        And | Or => unreachable!("logical operators handled above"),
    }
}

fn int_arith(op: BinaryOperator, a: i64, b: i64) -> FeatureValue {
    use BinaryOperator::*;
    let result = match op {
        Add => a.checked_add(b),
        Sub => a.checked_sub(b),
        Mul => a.checked_mul(b),
        Div => a.checked_div(b),
        Mod => a.checked_rem(b),
        _ => None,
    };
    result.map(FeatureValue::Int).unwrap_or(FeatureValue::Null)
}

fn float_arith(op: BinaryOperator, a: f64, b: f64) -> FeatureValue {
    use BinaryOperator::*;
    let result = match op {
        Add => a + b,
        Sub => a - b,
        Mul => a * b,
        Div if b == 0.0 => return FeatureValue::Null,
        Div => a / b,
        Mod if b == 0.0 => return FeatureValue::Null,
        Mod => a % b,
        _ => return FeatureValue::Null,
    };
    FeatureValue::Float(result)
}

fn eval_logical(op: BinaryOperator, left: FeatureValue, right: FeatureValue) -> Result<FeatureValue> {
    let as_bool = |v: &FeatureValue| -> Result<Option<bool>> {
        match v {
            FeatureValue::Bool(b) => Ok(Some(*b)),
            FeatureValue::Null => Ok(None),
            other => Err(type_error(&format!("{:?}", op), other, &FeatureValue::Null)),
        }
    };
    let (l, r) = (as_bool(&left)?, as_bool(&right)?);

    let result = match op {
        BinaryOperator::And => match (l, r) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        _ => match (l, r) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
    };
    Ok(result.map(FeatureValue::Bool).unwrap_or(FeatureValue::Null))
}

fn eval_unary(op: UnaryOperator, value: FeatureValue) -> Result<FeatureValue> {
    match (op, value) {
        (_, FeatureValue::Null) => Ok(FeatureValue::Null),
        (UnaryOperator::Not, FeatureValue::Bool(b)) => Ok(FeatureValue::Bool(!b)),
        (UnaryOperator::Minus, FeatureValue::Int(v)) => {
            Ok(v.checked_neg().map(FeatureValue::Int).unwrap_or(FeatureValue::Null))
        }
        (UnaryOperator::Minus, FeatureValue::Float(v)) => Ok(FeatureValue::Float(-v)),
        (op, other) => Err(type_error(&format!("{:?}", op), &other, &FeatureValue::Null)),
    }
}

fn eval_function(name: ScalarFunction, args: Vec<FeatureValue>) -> Result<FeatureValue> {
    use FeatureValue as V;

    let arity = |n: usize| -> Result<()> {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::schema_mismatch(format!(
                "function {:?} expects {} argument(s), got {}",
                name,
                n,
                args.len()
            )))
        }
    };

    match name {
        ScalarFunction::Coalesce => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(V::Null)),
        ScalarFunction::Concat => {
            if args.iter().any(|v| v.is_null()) {
                return Ok(V::Null);
            }
            Ok(V::String(args.iter().map(|v| v.canonical_key()).collect()))
        }
        ScalarFunction::Abs => {
            arity(1)?;
            match &args[0] {
                V::Null => Ok(V::Null),
                V::Int(v) => Ok(v.checked_abs().map(V::Int).unwrap_or(V::Null)),
                V::Float(v) => Ok(V::Float(v.abs())),
                other => Err(type_error("abs", other, &V::Null)),
            }
        }
        ScalarFunction::Lower | ScalarFunction::Upper => {
            arity(1)?;
            match &args[0] {
                V::Null => Ok(V::Null),
                V::String(s) if name == ScalarFunction::Lower => Ok(V::String(s.to_lowercase())),
                V::String(s) => Ok(V::String(s.to_uppercase())),
                other => Err(type_error("lower/upper", other, &V::Null)),
            }
        }
        ScalarFunction::Length => {
            arity(1)?;
            match &args[0] {
                V::Null => Ok(V::Null),
                V::String(s) => Ok(V::Int(s.chars().count() as i64)),
                V::List(items) => Ok(V::Int(items.len() as i64)),
                V::Bytes(bytes) => Ok(V::Int(bytes.len() as i64)),
                other => Err(type_error("length", other, &V::Null)),
            }
        }
        ScalarFunction::ToFloat => {
            arity(1)?;
            match &args[0] {
                V::Null => Ok(V::Null),
                V::Int(v) => Ok(V::Float(*v as f64)),
                V::Float(v) => Ok(V::Float(*v)),
                V::Bool(b) => Ok(V::Float(if *b { 1.0 } else { 0.0 })),
                V::String(s) => Ok(s.trim().parse::<f64>().map(V::Float).unwrap_or(V::Null)),
                other => Err(type_error("to_float", other, &V::Null)),
            }
        }
        ScalarFunction::ToInt => {
            arity(1)?;
            match &args[0] {
                V::Null => Ok(V::Null),
                V::Int(v) => Ok(V::Int(*v)),
                V::Float(v) if v.is_finite() => Ok(V::Int(v.trunc() as i64)),
                V::Float(_) => Ok(V::Null),
                V::Bool(b) => Ok(V::Int(i64::from(*b))),
                V::String(s) => Ok(s.trim().parse::<i64>().map(V::Int).unwrap_or(V::Null)),
                other => Err(type_error("to_int", other, &V::Null)),
            }
        }
    }
}
