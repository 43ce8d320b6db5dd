//! The restricted expression grammar used to evaluate `{% … %}` param
//! inliners (§4.1 step 4): literals, arithmetic, comparison, boolean ops,
//! name lookup, and a fixed function table. Pure and side-effect free —
//! evaluation never touches the store, cache or queue.
//!
//! Parser combinators follow the same `nom` idiom `dsl-core::parser`
//! uses for its verb-call language, scaled down to the much smaller
//! grammar this crate needs.

use std::collections::HashMap;
use std::fmt;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, char, multispace0};
use nom::combinator::{all_consuming, cut, map, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::number::complete::double;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Name(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parses and evaluates `src` (the text between `{%` and `%}`, already
/// stripped) against `names`. Returns `Err` with a human-readable
/// message on any parse failure, unknown name, type mismatch, or unknown
/// function — callers wrap this into `PipelineError::BadExpression`.
pub fn eval(src: &str, names: &HashMap<String, Value>) -> Result<Value, String> {
    let (_, expr) = all_consuming(delimited(multispace0, or_expr, multispace0))(src)
        .map_err(|e| format!("parse error: {e}"))?;
    eval_expr(&expr, names)
}

fn eval_expr(expr: &Expr, names: &HashMap<String, Value>) -> Result<Value, String> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Name(n) => names
            .get(n)
            .cloned()
            .ok_or_else(|| format!("unknown name {n:?}")),
        Expr::Not(inner) => Ok(Value::Bool(!as_bool(&eval_expr(inner, names)?)?)),
        Expr::Neg(inner) => Ok(Value::Num(-as_num(&eval_expr(inner, names)?)?)),
        Expr::Call(name, args) => {
            let evaluated = args
                .iter()
                .map(|a| eval_expr(a, names))
                .collect::<Result<Vec<_>, _>>()?;
            call_function(name, &evaluated)
        }
        Expr::BinOp(op, lhs, rhs) => {
            let l = eval_expr(lhs, names)?;
            match op {
                BinOp::And => {
                    if !as_bool(&l)? {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(as_bool(&eval_expr(rhs, names)?)?));
                }
                BinOp::Or => {
                    if as_bool(&l)? {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(as_bool(&eval_expr(rhs, names)?)?));
                }
                _ => {}
            }
            let r = eval_expr(rhs, names)?;
            match op {
                BinOp::Add => match (&l, &r) {
                    (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                    _ => Ok(Value::Num(as_num(&l)? + as_num(&r)?)),
                },
                BinOp::Sub => Ok(Value::Num(as_num(&l)? - as_num(&r)?)),
                BinOp::Mul => Ok(Value::Num(as_num(&l)? * as_num(&r)?)),
                BinOp::Div => {
                    let divisor = as_num(&r)?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    Ok(Value::Num(as_num(&l)? / divisor))
                }
                BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
                BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
                BinOp::Lt => Ok(Value::Bool(as_num(&l)? < as_num(&r)?)),
                BinOp::Le => Ok(Value::Bool(as_num(&l)? <= as_num(&r)?)),
                BinOp::Gt => Ok(Value::Bool(as_num(&l)? > as_num(&r)?)),
                BinOp::Ge => Ok(Value::Bool(as_num(&l)? >= as_num(&r)?)),
                BinOp::And | BinOp::Or => unreachable!("short-circuited above"),
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Num(_), _) | (_, Value::Num(_)) => {
            matches!((as_num(a), as_num(b)), (Ok(x), Ok(y)) if x == y)
        }
        _ => false,
    }
}

fn as_bool(v: &Value) -> Result<bool, String> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Num(n) => Ok(*n != 0.0),
        Value::Str(_) => Err("expected boolean, found string".to_string()),
    }
}

fn as_num(v: &Value) -> Result<f64, String> {
    match v {
        Value::Num(n) => Ok(*n),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Str(_) => Err("expected number, found string".to_string()),
    }
}

/// The fixed, host-provided function table (§4.1 step 4). Kept small and
/// total: every function here is pure and cannot fail except on arity or
/// type mismatch.
fn call_function(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        "min" | "max" => {
            if args.is_empty() {
                return Err(format!("{name}() requires at least one argument"));
            }
            let nums = args.iter().map(as_num).collect::<Result<Vec<_>, _>>()?;
            let picked = if name == "min" {
                nums.into_iter().fold(f64::INFINITY, f64::min)
            } else {
                nums.into_iter().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(Value::Num(picked))
        }
        "abs" => {
            let [v] = args else {
                return Err("abs() takes exactly one argument".to_string());
            };
            Ok(Value::Num(as_num(v)?.abs()))
        }
        "len" => {
            let [v] = args else {
                return Err("len() takes exactly one argument".to_string());
            };
            match v {
                Value::Str(s) => Ok(Value::Num(s.chars().count() as f64)),
                _ => Err("len() expects a string".to_string()),
            }
        }
        other => Err(format!("unknown function {other:?}")),
    }
}

type PResult<'a, T> = IResult<&'a str, T>;

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn ident(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn number_lit(input: &str) -> PResult<'_, Expr> {
    map(double, |n| Expr::Lit(Value::Num(n)))(input)
}

fn string_lit(input: &str) -> PResult<'_, Expr> {
    map(
        delimited(char('"'), nom::bytes::complete::is_not("\""), char('"')),
        |s: &str| Expr::Lit(Value::Str(s.to_string())),
    )(input)
}

fn call_or_name(input: &str) -> PResult<'_, Expr> {
    let (input, name) = ident(input)?;
    let args = opt(delimited(
        ws(char('(')),
        cut(separated_list0(ws(char(',')), or_expr)),
        ws(char(')')),
    ));
    let (input, maybe_args) = args(input)?;
    Ok((
        input,
        match maybe_args {
            Some(args) => Expr::Call(name.to_string(), args),
            None => match name {
                "True" | "true" => Expr::Lit(Value::Bool(true)),
                "False" | "false" => Expr::Lit(Value::Bool(false)),
                other => Expr::Name(other.to_string()),
            },
        },
    ))
}

fn atom(input: &str) -> PResult<'_, Expr> {
    ws(alt((
        delimited(char('('), or_expr, cut(char(')'))),
        string_lit,
        number_lit,
        call_or_name,
    )))(input)
}

fn unary(input: &str) -> PResult<'_, Expr> {
    alt((
        map(preceded(ws(char('!')), unary), |e| Expr::Not(Box::new(e))),
        map(preceded(ws(tag("not ")), unary), |e| Expr::Not(Box::new(e))),
        map(preceded(ws(char('-')), unary), |e| Expr::Neg(Box::new(e))),
        atom,
    ))(input)
}

fn mul_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = unary(input)?;
    fold_bin(
        input,
        first,
        alt((
            value(BinOp::Mul, ws(char('*'))),
            value(BinOp::Div, ws(char('/'))),
        )),
        unary,
    )
}

fn add_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = mul_expr(input)?;
    fold_bin(
        input,
        first,
        alt((
            value(BinOp::Add, ws(char('+'))),
            value(BinOp::Sub, ws(char('-'))),
        )),
        mul_expr,
    )
}

fn cmp_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = add_expr(input)?;
    fold_bin(
        input,
        first,
        alt((
            value(BinOp::Le, ws(tag("<="))),
            value(BinOp::Ge, ws(tag(">="))),
            value(BinOp::Eq, ws(tag("=="))),
            value(BinOp::Ne, ws(tag("!="))),
            value(BinOp::Lt, ws(char('<'))),
            value(BinOp::Gt, ws(char('>'))),
        )),
        add_expr,
    )
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = cmp_expr(input)?;
    fold_bin(
        input,
        first,
        alt((value(BinOp::And, ws(tag("&&"))), value(BinOp::And, ws(tag("and "))))),
        cmp_expr,
    )
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = and_expr(input)?;
    fold_bin(
        input,
        first,
        alt((value(BinOp::Or, ws(tag("||"))), value(BinOp::Or, ws(tag("or "))))),
        and_expr,
    )
}

fn fold_bin<'a>(
    mut input: &'a str,
    first: Expr,
    mut op_parser: impl FnMut(&'a str) -> PResult<'a, BinOp>,
    mut operand_parser: impl FnMut(&'a str) -> PResult<'a, Expr>,
) -> PResult<'a, Expr> {
    let mut acc = first;
    loop {
        match op_parser(input) {
            Ok((rest, op)) => {
                let (rest, rhs) = cut(&mut operand_parser)(rest)?;
                acc = Expr::BinOp(op, Box::new(acc), Box::new(rhs));
                input = rest;
            }
            Err(_) => return Ok((input, acc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().cloned().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn arithmetic_expansion() {
        let ns = names(&[("x", Value::Num(2.0)), ("y", Value::Num(3.0))]);
        let result = eval("x + y + 5", &ns).unwrap();
        assert_eq!(result, Value::Num(10.0));
    }

    #[test]
    fn comparison_and_boolean() {
        let ns = names(&[("x", Value::Num(2.0))]);
        assert_eq!(eval("x > 1", &ns).unwrap(), Value::Bool(true));
        assert_eq!(eval("x > 1 && x < 5", &ns).unwrap(), Value::Bool(true));
        assert_eq!(eval("True", &ns).unwrap(), Value::Bool(true));
    }

    #[test]
    fn unknown_name_is_bad_expression() {
        let ns = names(&[]);
        assert!(eval("missing + 1", &ns).is_err());
    }

    #[test]
    fn function_table() {
        let ns = names(&[]);
        assert_eq!(eval("max(1, 2, 3)", &ns).unwrap(), Value::Num(3.0));
        assert_eq!(eval("min(1, 2, 3)", &ns).unwrap(), Value::Num(1.0));
        assert_eq!(eval("abs(-4)", &ns).unwrap(), Value::Num(4.0));
    }

    #[test]
    fn string_concat() {
        let ns = names(&[("name", Value::Str("job".to_string()))]);
        assert_eq!(
            eval(r#"name + "-suffix""#, &ns).unwrap(),
            Value::Str("job-suffix".to_string())
        );
    }
}
