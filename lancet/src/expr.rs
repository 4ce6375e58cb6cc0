//! Deferred expressions: lazy value trees evaluated against a message.
//!
//! A descriptor parameter (a data length, a sequence count, a presence
//! condition) often depends on the runtime value of an earlier field. Such
//! parameters are written as [`Expr`] trees built from [`field`] and
//! [`lit`] leaves with combinator methods, compiled once into a linear
//! program of `(arity, op)` pairs, and executed against a small stack
//! whenever the owning field packs or unpacks.

use std::sync::Arc;

use crate::error::ErrorKind;
use crate::packet::Packet;
use crate::value::Value;

/// Evaluation context handed to expression programs and user callables.
///
/// `raw` is present during unpacking only; `root` is the outermost message
/// when the expression runs inside a nested one.
pub struct EvalCtx<'a> {
    /// The message the expression's field lookups resolve against.
    pub pkt: &'a Packet,
    /// The buffer being unpacked, if any.
    pub raw: Option<&'a [u8]>,
    /// Current cursor position.
    pub offset: usize,
    /// Offset at which the innermost message began.
    pub local_offset: usize,
    /// Outermost message, when nested.
    pub root: Option<&'a Packet>,
}

impl<'a> EvalCtx<'a> {
    /// The outermost message (the current one when not nested).
    pub fn root(&self) -> &Packet {
        self.root.unwrap_or(self.pkt)
    }
}

/// Binary operations of the expression sublanguage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
    Ne,
    BitAnd,
    BitOr,
    BitXor,
    Shr,
    Shl,
    GetItem,
}

/// Unary operations of the expression sublanguage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum UnaryOp {
    Neg,
    Invert,
    Truth,
    Len,
}

/// N-ary structural operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum NaryOp {
    IfTrueThenElse,
    Choose,
}

/// A deferred expression over field values.
#[derive(Clone)]
pub enum Expr {
    /// Literal value.
    Lit(Value),
    /// Lookup of a field of the current message by bound name.
    Field(String),
    /// Unary application.
    Unary(UnaryOp, Box<Expr>),
    /// Binary application; operands in source order.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// N-ary application; the head operand first.
    Nary(NaryOp, Vec<Expr>),
}

/// Reference to a field of the current message.
pub fn field(name: impl Into<String>) -> Expr {
    Expr::Field(name.into())
}

/// Literal expression leaf.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Lit(value.into())
}

macro_rules! binary_method {
    ($(#[$doc:meta])* $name:ident, $op:ident) => {
        $(#[$doc])*
        pub fn $name(self, rhs: impl Into<Expr>) -> Expr {
            Expr::Binary(BinaryOp::$op, Box::new(self), Box::new(rhs.into()))
        }
    };
}

impl Expr {
    binary_method!(/// Integer addition.
        add, Add);
    binary_method!(/// Integer subtraction.
        sub, Sub);
    binary_method!(/// Integer multiplication.
        mul, Mul);
    binary_method!(/// Integer division (truncating).
        div, Div);
    binary_method!(/// Flooring integer division.
        floor_div, FloorDiv);
    binary_method!(/// Remainder.
        rem, Mod);
    binary_method!(/// Exponentiation; the exponent must be non-negative.
        pow, Pow);
    binary_method!(/// Less-or-equal comparison.
        less_or_eq, Le);
    binary_method!(/// Less-than comparison.
        less_than, Lt);
    binary_method!(/// Greater-or-equal comparison.
        greater_or_eq, Ge);
    binary_method!(/// Greater-than comparison.
        greater_than, Gt);
    binary_method!(/// Structural equality (wildcard-aware).
        equals, Eq);
    binary_method!(/// Structural inequality.
        not_equals, Ne);
    binary_method!(/// Bitwise and.
        bit_and, BitAnd);
    binary_method!(/// Bitwise or.
        bit_or, BitOr);
    binary_method!(/// Bitwise xor.
        bit_xor, BitXor);
    binary_method!(/// Right shift.
        shr, Shr);
    binary_method!(/// Left shift.
        shl, Shl);
    binary_method!(/// Element lookup on a list or byte string (negative
        /// indexes count from the end).
        get, GetItem);

    /// Arithmetic negation.
    pub fn neg(self) -> Expr {
        Expr::Unary(UnaryOp::Neg, Box::new(self))
    }

    /// Bitwise complement.
    pub fn invert(self) -> Expr {
        Expr::Unary(UnaryOp::Invert, Box::new(self))
    }

    /// Boolean conversion (integer truth or sequence non-emptiness).
    pub fn truth(self) -> Expr {
        Expr::Unary(UnaryOp::Truth, Box::new(self))
    }

    /// Length of a list or byte string.
    pub fn length(self) -> Expr {
        Expr::Unary(UnaryOp::Len, Box::new(self))
    }

    /// `self` as a condition choosing between two alternatives.
    pub fn if_true_then_else(self, when_true: impl Into<Expr>, when_false: impl Into<Expr>) -> Expr {
        Expr::Nary(
            NaryOp::IfTrueThenElse,
            vec![self, when_true.into(), when_false.into()],
        )
    }

    /// `self` as an index into a list of alternatives.
    pub fn choose(self, options: impl IntoIterator<Item = Expr>) -> Expr {
        let mut args = vec![self];
        args.extend(options);
        Expr::Nary(NaryOp::Choose, args)
    }

    /// Lower the tree into a linear program.
    pub(crate) fn compile(&self) -> Program {
        let mut instrs = Vec::new();
        compile_into(self, &mut instrs);
        Program { instrs }
    }
}

impl<T: Into<Value>> From<T> for Expr {
    fn from(value: T) -> Self {
        Expr::Lit(value.into())
    }
}

/// One `(arity, op)` pair of a compiled expression.
struct Instr {
    arity: usize,
    op: Op,
}

enum Op {
    Lit(Value),
    Field(String),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Nary(NaryOp),
}

fn compile_into(expr: &Expr, instrs: &mut Vec<Instr>) {
    match expr {
        Expr::Lit(value) => instrs.push(Instr {
            arity: 0,
            op: Op::Lit(value.clone()),
        }),
        Expr::Field(name) => instrs.push(Instr {
            arity: 0,
            op: Op::Field(name.clone()),
        }),
        Expr::Unary(op, operand) => {
            compile_into(operand, instrs);
            instrs.push(Instr {
                arity: 1,
                op: Op::Unary(*op),
            });
        }
        Expr::Binary(op, lhs, rhs) => {
            compile_into(lhs, instrs);
            compile_into(rhs, instrs);
            instrs.push(Instr {
                arity: 2,
                op: Op::Binary(*op),
            });
        }
        Expr::Nary(op, args) => {
            for arg in args {
                compile_into(arg, instrs);
            }
            instrs.push(Instr {
                arity: args.len(),
                op: Op::Nary(*op),
            });
        }
    }
}

/// A compiled expression: the linear `(arity, op)` form.
pub(crate) struct Program {
    instrs: Vec<Instr>,
}

impl Program {
    /// Execute against a stack. Leaves push; an instruction of arity `n`
    /// pops `n` values, reverses them back into source operand order,
    /// applies its op and pushes the result.
    pub(crate) fn eval(&self, ctx: &EvalCtx<'_>) -> Result<Value, ErrorKind> {
        let mut stack: Vec<Value> = Vec::new();

        for instr in &self.instrs {
            if instr.arity == 0 {
                let value = match &instr.op {
                    Op::Lit(value) => value.clone(),
                    Op::Field(name) => ctx
                        .pkt
                        .get(name)
                        .cloned()
                        .ok_or_else(|| ErrorKind::Eval(format!("unknown field `{name}`")))?,
                    _ => return Err(ErrorKind::Eval("malformed program leaf".into())),
                };
                stack.push(value);
                continue;
            }

            if stack.len() < instr.arity {
                return Err(ErrorKind::Eval("expression stack underflow".into()));
            }
            let mut args: Vec<Value> = (0..instr.arity)
                .map(|_| stack.pop().expect("length checked"))
                .collect();
            args.reverse();

            let result = match &instr.op {
                Op::Unary(op) => apply_unary(*op, &args[0])?,
                Op::Binary(op) => apply_binary(*op, &args[0], &args[1])?,
                Op::Nary(op) => apply_nary(*op, &args)?,
                _ => return Err(ErrorKind::Eval("malformed program node".into())),
            };
            stack.push(result);
        }

        match (stack.pop(), stack.is_empty()) {
            (Some(result), true) => Ok(result),
            _ => Err(ErrorKind::Eval("expression left a malformed stack".into())),
        }
    }
}

fn int_operand(op: impl std::fmt::Display, value: &Value) -> Result<i128, ErrorKind> {
    value
        .as_int()
        .ok_or_else(|| ErrorKind::Eval(format!("`{op}` needs an integer, got {}", value.shape())))
}

fn apply_unary(op: UnaryOp, operand: &Value) -> Result<Value, ErrorKind> {
    Ok(match op {
        UnaryOp::Neg => Value::Int(
            int_operand(op, operand)?
                .checked_neg()
                .ok_or_else(|| ErrorKind::Eval("negation overflow".into()))?,
        ),
        UnaryOp::Invert => Value::Int(!int_operand(op, operand)?),
        UnaryOp::Truth => {
            let truth = operand.truthy().ok_or_else(|| {
                ErrorKind::Eval(format!("{} has no truth value", operand.shape()))
            })?;
            Value::Int(truth as i128)
        }
        UnaryOp::Len => match operand {
            Value::Bytes(b) => Value::Int(b.len() as i128),
            Value::List(l) => Value::Int(l.len() as i128),
            other => {
                return Err(ErrorKind::Eval(format!("{} has no length", other.shape())));
            }
        },
    })
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, ErrorKind> {
    use BinaryOp::*;

    // Equality and indexing work on any shape; the rest is integer math.
    match op {
        Eq => return Ok(Value::Int((lhs == rhs) as i128)),
        Ne => return Ok(Value::Int((lhs != rhs) as i128)),
        GetItem => return apply_get_item(lhs, rhs),
        _ => {}
    }

    let a = int_operand(op, lhs)?;
    let b = int_operand(op, rhs)?;
    let overflow = || ErrorKind::Eval(format!("`{op}` overflowed on {a} and {b}"));

    Ok(Value::Int(match op {
        Add => a.checked_add(b).ok_or_else(overflow)?,
        Sub => a.checked_sub(b).ok_or_else(overflow)?,
        Mul => a.checked_mul(b).ok_or_else(overflow)?,
        Div => a
            .checked_div(b)
            .ok_or_else(|| ErrorKind::Eval(format!("division of {a} by {b} is undefined")))?,
        FloorDiv => {
            if b == 0 {
                return Err(ErrorKind::Eval(format!("division of {a} by zero")));
            }
            a.div_euclid(b)
        }
        Mod => {
            if b == 0 {
                return Err(ErrorKind::Eval(format!("remainder of {a} by zero")));
            }
            a.rem_euclid(b)
        }
        Pow => {
            let exp: u32 = b
                .try_into()
                .map_err(|_| ErrorKind::Eval(format!("exponent {b} out of range")))?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        Le => (a <= b) as i128,
        Lt => (a < b) as i128,
        Ge => (a >= b) as i128,
        Gt => (a > b) as i128,
        BitAnd => a & b,
        BitOr => a | b,
        BitXor => a ^ b,
        Shr => a
            .checked_shr(u32::try_from(b).map_err(|_| overflow())?)
            .ok_or_else(overflow)?,
        Shl => a
            .checked_shl(u32::try_from(b).map_err(|_| overflow())?)
            .ok_or_else(overflow)?,
        Eq | Ne | GetItem => unreachable!("handled above"),
    }))
}

fn apply_get_item(target: &Value, index: &Value) -> Result<Value, ErrorKind> {
    let idx = int_operand(BinaryOp::GetItem, index)?;
    let resolve = |len: usize| -> Result<usize, ErrorKind> {
        let idx = if idx < 0 { idx + len as i128 } else { idx };
        usize::try_from(idx)
            .ok()
            .filter(|i| *i < len)
            .ok_or_else(|| ErrorKind::Eval(format!("index {idx} out of range for length {len}")))
    };
    match target {
        Value::Bytes(b) => Ok(Value::Int(b[resolve(b.len())?] as i128)),
        Value::List(l) => Ok(l[resolve(l.len())?].clone()),
        other => Err(ErrorKind::Eval(format!("{} cannot be indexed", other.shape()))),
    }
}

fn apply_nary(op: NaryOp, args: &[Value]) -> Result<Value, ErrorKind> {
    match op {
        NaryOp::IfTrueThenElse => {
            let [cond, when_true, when_false] = args else {
                return Err(ErrorKind::Eval("if_true_then_else needs three operands".into()));
            };
            let truth = cond
                .truthy()
                .ok_or_else(|| ErrorKind::Eval(format!("{} has no truth value", cond.shape())))?;
            Ok(if truth { when_true.clone() } else { when_false.clone() })
        }
        NaryOp::Choose => {
            let (index, options) = args
                .split_first()
                .ok_or_else(|| ErrorKind::Eval("choose needs an index".into()))?;
            let idx = int_operand("choose", index)?;
            usize::try_from(idx)
                .ok()
                .and_then(|i| options.get(i))
                .cloned()
                .ok_or_else(|| {
                    ErrorKind::Eval(format!("choose index {idx} out of range for {} option(s)", options.len()))
                })
        }
    }
}

/// Callable form of a count or movement parameter.
pub type CountFn = Arc<dyn Fn(&EvalCtx<'_>) -> Result<i128, String> + Send + Sync>;

/// Callable form of a boolean predicate.
pub type CondFn = Arc<dyn Fn(&EvalCtx<'_>) -> Result<bool, String> + Send + Sync>;

/// A numeric descriptor parameter: how many bytes or elements.
///
/// Constants, references to a prior field, deferred expressions and plain
/// callables are all accepted.
#[derive(Clone)]
pub enum Count {
    /// Fixed number.
    Const(usize),
    /// Integer value of an earlier field.
    Field(String),
    /// Deferred expression.
    Expr(Expr),
    /// User callable.
    Func(CountFn),
}

impl Count {
    /// Count computed by a callable.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&EvalCtx<'_>) -> Result<i128, String> + Send + Sync + 'static,
    {
        Count::Func(Arc::new(f))
    }
}

impl From<usize> for Count {
    fn from(n: usize) -> Self {
        Count::Const(n)
    }
}

impl From<u32> for Count {
    fn from(n: u32) -> Self {
        Count::Const(n as usize)
    }
}

impl From<i32> for Count {
    fn from(n: i32) -> Self {
        Count::Const(usize::try_from(n).expect("constant counts are non-negative"))
    }
}

impl From<&str> for Count {
    fn from(field: &str) -> Self {
        Count::Field(field.to_owned())
    }
}

impl From<Expr> for Count {
    fn from(expr: Expr) -> Self {
        Count::Expr(expr)
    }
}

/// A boolean descriptor parameter: presence, entry and termination
/// predicates.
///
/// A bare field reference is converted to a boolean through its truth value
/// (integers) or non-emptiness (byte strings, lists).
#[derive(Clone)]
pub enum Cond {
    /// Truth of an earlier field.
    Field(String),
    /// Deferred expression, evaluated then converted to a boolean.
    Expr(Expr),
    /// User callable.
    Func(CondFn),
}

impl Cond {
    /// Predicate computed by a callable.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&EvalCtx<'_>) -> Result<bool, String> + Send + Sync + 'static,
    {
        Cond::Func(Arc::new(f))
    }
}

impl From<&str> for Cond {
    fn from(field: &str) -> Self {
        Cond::Field(field.to_owned())
    }
}

impl From<Expr> for Cond {
    fn from(expr: Expr) -> Self {
        Cond::Expr(expr)
    }
}

/// A [`Count`] lowered for the plan: constants stay constants, everything
/// else becomes a program or callable.
pub(crate) enum CompiledCount {
    Const(i128),
    Program(Program),
    Func(CountFn),
}

impl CompiledCount {
    pub(crate) fn eval(&self, ctx: &EvalCtx<'_>) -> Result<i128, ErrorKind> {
        match self {
            CompiledCount::Const(n) => Ok(*n),
            CompiledCount::Program(program) => {
                let value = program.eval(ctx)?;
                value.as_int().ok_or_else(|| {
                    ErrorKind::Eval(format!("count evaluated to {} instead of an integer", value.shape()))
                })
            }
            CompiledCount::Func(f) => f(ctx).map_err(ErrorKind::Eval),
        }
    }
}

/// A [`Cond`] lowered for the plan.
pub(crate) enum CompiledCond {
    Program(Program),
    Func(CondFn),
}

impl CompiledCond {
    pub(crate) fn eval(&self, ctx: &EvalCtx<'_>) -> Result<bool, ErrorKind> {
        match self {
            CompiledCond::Program(program) => {
                let value = program.eval(ctx)?;
                value.truthy().ok_or_else(|| {
                    ErrorKind::Eval(format!("condition evaluated to {}", value.shape()))
                })
            }
            CompiledCond::Func(f) => f(ctx).map_err(ErrorKind::Eval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Int;
    use crate::schema::Schema;

    fn sample() -> Packet {
        let schema = Schema::builder("Sample")
            .field("n", Int::new(1).default_value(5))
            .field("m", Int::new(1).default_value(3))
            .build()
            .unwrap();
        schema.instance()
    }

    fn eval(expr: Expr, pkt: &Packet) -> Result<Value, ErrorKind> {
        let ctx = EvalCtx {
            pkt,
            raw: None,
            offset: 0,
            local_offset: 0,
            root: None,
        };
        expr.compile().eval(&ctx)
    }

    #[test]
    fn arithmetic_over_fields() {
        let pkt = sample();
        let expr = field("n").add(field("m")).mul(2);
        assert_eq!(eval(expr, &pkt).unwrap(), Value::Int(16));
    }

    #[test]
    fn reverse_operand_order_is_preserved() {
        let pkt = sample();
        // 2 - n, not n - 2.
        assert_eq!(eval(lit(2).sub(field("n")), &pkt).unwrap(), Value::Int(-3));
        assert_eq!(eval(lit(1).shl(field("m")), &pkt).unwrap(), Value::Int(8));
    }

    #[test]
    fn comparisons_and_structure() {
        let pkt = sample();
        assert_eq!(eval(field("n").greater_than(4), &pkt).unwrap(), Value::Int(1));
        assert_eq!(
            eval(field("n").equals(5).if_true_then_else(10, 20), &pkt).unwrap(),
            Value::Int(10)
        );
        assert_eq!(
            eval(field("m").choose([lit(7), lit(8), lit(9), lit(99)]), &pkt).unwrap(),
            Value::Int(99)
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let pkt = sample();
        assert!(matches!(
            eval(field("n").div(0), &pkt),
            Err(ErrorKind::Eval(_))
        ));
    }

    #[test]
    fn indexing_and_length() {
        let pkt = sample();
        let bytes = lit(b"abc");
        assert_eq!(eval(bytes.clone().length(), &pkt).unwrap(), Value::Int(3));
        assert_eq!(eval(bytes.clone().get(1), &pkt).unwrap(), Value::Int(b'b' as i128));
        assert_eq!(eval(bytes.get(-1), &pkt).unwrap(), Value::Int(b'c' as i128));
    }

    #[test]
    fn unknown_field_is_an_eval_error() {
        let pkt = sample();
        assert!(matches!(
            eval(field("missing").add(1), &pkt),
            Err(ErrorKind::Eval(_))
        ));
    }
}
