/// Template expression engine: constants, template parameters, and a small
/// arithmetic language over them, with constant folding and substitution.
///
/// A closed set of variants (rather than a trait-object hierarchy) mirrors
/// the way `IrConst`/`Expr` are modeled as plain enums in the lowering
/// pass this crate is descended from: the set of node kinds is fixed, so a
/// sum type plus a handful of recursive methods is simpler than dynamic
/// dispatch.
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// The value type expressions evaluate to. Only integers are needed today;
/// the variant is kept open-ended so a future type can be added without
/// touching every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i64),
}

impl Value {
    pub fn as_int(self) -> i64 {
        match self {
            Value::Int(v) => v,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unbound parameter at index {0}")]
    UnboundParameter(usize),
    #[error("parameter index {index} out of range (have {count} argument(s))")]
    ParamOutOfRange { index: usize, count: usize },
    #[error("type mismatch")]
    TypeMismatch,
    #[error("divide by zero")]
    DivideByZero,
    #[error("unknown function: {0}")]
    UnknownFunction(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// A function usable inside a template expression. Modeled as a plain
/// function pointer (not a boxed closure) since the function set is a
/// small, fixed table known at registration time.
pub type ExprFn = fn(&[Value]) -> EvalResult<Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, lhs: i64, rhs: i64) -> EvalResult<i64> {
        match self {
            BinaryOp::Add => Ok(lhs.wrapping_add(rhs)),
            BinaryOp::Sub => Ok(lhs.wrapping_sub(rhs)),
            BinaryOp::Mul => Ok(lhs.wrapping_mul(rhs)),
            BinaryOp::Div => {
                if rhs == 0 {
                    Err(EvalError::DivideByZero)
                } else {
                    Ok(lhs / rhs)
                }
            }
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        write!(f, "{s}")
    }
}

/// A template expression tree node.
#[derive(Debug, Clone)]
pub enum Expr {
    Constant(Value),
    /// Reference to a template formal by position, plus its name (kept
    /// for diagnostics/disassembly rendering, not for lookup).
    Param(usize, Rc<str>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Function(Rc<str>, ExprFn, Vec<Expr>),
    /// An expression that resolves to a slot- or ISA-scoped constant;
    /// wraps the constant's own expression so folding recurses through it.
    SlotConstant(Box<Expr>),
}

impl Expr {
    pub fn constant(v: i64) -> Expr {
        Expr::Constant(Value::Int(v))
    }

    pub fn param(index: usize, name: impl Into<Rc<str>>) -> Expr {
        Expr::Param(index, name.into())
    }

    /// True iff the subtree contains no unbound `Param` nodes. A
    /// `Function` node is constant iff every argument subtree is.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Constant(_) => true,
            Expr::Param(_, _) => false,
            Expr::Negate(e) => e.is_constant(),
            Expr::Binary(_, lhs, rhs) => lhs.is_constant() && rhs.is_constant(),
            Expr::Function(_, _, args) => args.iter().all(Expr::is_constant),
            Expr::SlotConstant(e) => e.is_constant(),
        }
    }

    /// Evaluate this node to a concrete value. Fails if the subtree still
    /// contains an unbound parameter.
    pub fn value(&self) -> EvalResult<Value> {
        match self {
            Expr::Constant(v) => Ok(*v),
            Expr::Param(i, _) => Err(EvalError::UnboundParameter(*i)),
            Expr::Negate(e) => {
                let Value::Int(v) = e.value()?;
                Ok(Value::Int(-v))
            }
            Expr::Binary(op, lhs, rhs) => {
                let Value::Int(l) = lhs.value()?;
                let Value::Int(r) = rhs.value()?;
                Ok(Value::Int(op.apply(l, r)?))
            }
            Expr::Function(_, f, args) => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(a.value()?);
                }
                f(&vals)
            }
            Expr::SlotConstant(e) => e.value(),
        }
    }

    /// Substitute `Param(i)` references with `args[i]` (when `args` is
    /// given) and fold constant subtrees bottom-up, returning a new,
    /// owned tree.
    ///
    /// `args = None` preserves `Param` nodes as-is: this is used when an
    /// argument expression belongs to a *different* template
    /// instantiation context than the one currently being folded, and
    /// must not be re-substituted against it (see `Param` substitution
    /// below).
    pub fn evaluate(&self, args: Option<&[Expr]>) -> EvalResult<Expr> {
        match self {
            Expr::Constant(v) => Ok(Expr::Constant(*v)),
            Expr::Param(i, name) => match args {
                None => Ok(Expr::Param(*i, name.clone())),
                Some(args) => {
                    if *i >= args.len() {
                        return Err(EvalError::ParamOutOfRange { index: *i, count: args.len() });
                    }
                    let arg = &args[*i];
                    if arg.is_constant() {
                        Ok(Expr::Constant(arg.value()?))
                    } else {
                        // Intentionally `None`: the argument expression was
                        // authored in the caller's template scope.
                        arg.evaluate(None)
                    }
                }
            },
            Expr::Negate(e) => {
                let folded = e.evaluate(args)?;
                if folded.is_constant() {
                    let Value::Int(v) = folded.value()?;
                    Ok(Expr::Constant(Value::Int(-v)))
                } else {
                    Ok(Expr::Negate(Box::new(folded)))
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.evaluate(args)?;
                let r = rhs.evaluate(args)?;
                if l.is_constant() && r.is_constant() {
                    let Value::Int(lv) = l.value()?;
                    let Value::Int(rv) = r.value()?;
                    Ok(Expr::Constant(Value::Int(op.apply(lv, rv)?)))
                } else {
                    Ok(Expr::Binary(*op, Box::new(l), Box::new(r)))
                }
            }
            Expr::Function(name, f, fargs) => {
                let mut folded = Vec::with_capacity(fargs.len());
                for a in fargs {
                    folded.push(a.evaluate(args)?);
                }
                if folded.iter().all(Expr::is_constant) {
                    let mut vals = Vec::with_capacity(folded.len());
                    for a in &folded {
                        vals.push(a.value()?);
                    }
                    Ok(Expr::Constant(f(&vals)?))
                } else {
                    Ok(Expr::Function(name.clone(), *f, folded))
                }
            }
            Expr::SlotConstant(e) => {
                let folded = e.evaluate(args)?;
                if folded.is_constant() {
                    Ok(Expr::Constant(folded.value()?))
                } else {
                    Ok(Expr::SlotConstant(Box::new(folded)))
                }
            }
        }
    }

    /// An owned, independent copy of this tree. Never fails.
    pub fn deep_copy(&self) -> Expr {
        match self {
            Expr::Constant(v) => Expr::Constant(*v),
            Expr::Param(i, name) => Expr::Param(*i, name.clone()),
            Expr::Negate(e) => Expr::Negate(Box::new(e.deep_copy())),
            Expr::Binary(op, lhs, rhs) => {
                Expr::Binary(*op, Box::new(lhs.deep_copy()), Box::new(rhs.deep_copy()))
            }
            Expr::Function(name, f, args) => {
                Expr::Function(name.clone(), *f, args.iter().map(Expr::deep_copy).collect())
            }
            Expr::SlotConstant(e) => Expr::SlotConstant(Box::new(e.deep_copy())),
        }
    }
}
