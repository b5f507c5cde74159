//! CertLogic expression parsing and evaluation.
//!
//! Rule logic arrives as JSON. It is parsed once into a closed [`Expr`] tree
//! (structural problems surface as [`LogicError`]) and then evaluated against
//! a JSON data object by [`evaluate`] (type problems and unresolved operands
//! surface as [`EvalError`]).
//!
//! Supported operations:
//!
//! | operation          | operands                          |
//! |--------------------|-----------------------------------|
//! | `var`              | path string or array index        |
//! | `if`               | guard, then, else                 |
//! | `===`, `!==`       | two values                        |
//! | `and`, `or`        | two or more values                |
//! | `!`                | one value                         |
//! | `<` `>` `<=` `>=`  | two or three integers             |
//! | `in`               | value, array                      |
//! | `+`                | integers                          |
//! | `plusTime`         | date string, integer, unit        |
//! | `before` `not-before` `after` `not-after` | two or three dates |
//! | `reduce`           | array, lambda, initial            |
//! | `extractFromUVCI`  | UVCI string, fragment index       |
//! | `dccDateOfBirth`   | date-of-birth string              |

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde_json::{Map, Value as Json};
use thiserror::Error;

/// Structural problem in a logic expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct LogicError {
    /// What was wrong.
    pub reason: String,
}

impl LogicError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Evaluation could not produce a conclusive value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct EvalError {
    /// What could not be resolved.
    pub reason: String,
}

impl EvalError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Integer comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessOrEqual,
    /// `>=`
    GreaterOrEqual,
}

impl CompareOp {
    fn holds<T: PartialOrd>(self, a: &T, b: &T) -> bool {
        match self {
            Self::Less => a < b,
            Self::Greater => a > b,
            Self::LessOrEqual => a <= b,
            Self::GreaterOrEqual => a >= b,
        }
    }
}

/// Date comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateCompareOp {
    /// `before`
    Before,
    /// `not-before`
    NotBefore,
    /// `after`
    After,
    /// `not-after`
    NotAfter,
}

impl DateCompareOp {
    fn as_compare(self) -> CompareOp {
        match self {
            Self::Before => CompareOp::Less,
            Self::NotBefore => CompareOp::GreaterOrEqual,
            Self::After => CompareOp::Greater,
            Self::NotAfter => CompareOp::LessOrEqual,
        }
    }
}

/// Units accepted by `plusTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Calendar years.
    Year,
    /// Calendar months.
    Month,
    /// Days.
    Day,
    /// Hours.
    Hour,
}

/// Parsed CertLogic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal scalar.
    Literal(Json),
    /// Array whose elements are evaluated.
    Array(Vec<Expr>),
    /// Data lookup.
    Var(String),
    /// Conditional.
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Strict equality, negated when the flag is set.
    StrictEquals {
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
        /// `!==` instead of `===`.
        negated: bool,
    },
    /// Short-circuit conjunction.
    And(Vec<Expr>),
    /// Short-circuit disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// Integer comparison (two or three operands).
    Compare(CompareOp, Vec<Expr>),
    /// Array membership.
    In(Box<Expr>, Box<Expr>),
    /// Integer addition.
    Plus(Vec<Expr>),
    /// Date arithmetic.
    PlusTime {
        /// Date operand.
        operand: Box<Expr>,
        /// Amount to add (may be negative).
        amount: i64,
        /// Unit of `amount`.
        unit: TimeUnit,
    },
    /// Date comparison (two or three operands).
    DateCompare(DateCompareOp, Vec<Expr>),
    /// Fold over an array.
    Reduce {
        /// Array operand.
        operand: Box<Expr>,
        /// Evaluated with `{current, accumulator}`.
        lambda: Box<Expr>,
        /// Initial accumulator.
        initial: Box<Expr>,
    },
    /// UVCI fragment extraction.
    ExtractFromUvci {
        /// UVCI operand.
        operand: Box<Expr>,
        /// Fragment index.
        index: usize,
    },
    /// Date of birth normalisation.
    DccDateOfBirth(Box<Expr>),
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Plain JSON value.
    Json(Json),
    /// Instant produced by date operations.
    DateTime(DateTime<Utc>),
}

impl Value {
    /// CertLogic truthiness; dates are neither truthy nor falsy.
    #[must_use]
    pub fn truthiness(&self) -> Option<bool> {
        match self {
            Self::Json(json) => Some(json_truthiness(json)),
            Self::DateTime(_) => None,
        }
    }
}

fn json_truthiness(json: &Json) -> bool {
    match json {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a JSON logic expression.
pub fn parse(logic: &Json) -> Result<Expr, LogicError> {
    match logic {
        Json::Object(map) => parse_operation(map),
        Json::Array(items) => Ok(Expr::Array(
            items.iter().map(parse).collect::<Result<_, _>>()?,
        )),
        scalar => Ok(Expr::Literal(scalar.clone())),
    }
}

fn parse_operation(map: &Map<String, Json>) -> Result<Expr, LogicError> {
    let mut entries = map.iter();
    let (operator, raw) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(LogicError::new(format!(
                "operation object must have exactly one key, found {}",
                map.len()
            )))
        },
    };

    if operator == "var" {
        return parse_var(raw);
    }

    let operands = match raw {
        Json::Array(items) => items.as_slice(),
        _ => {
            return Err(LogicError::new(format!(
                "operands of \"{operator}\" must be an array"
            )))
        },
    };

    match operator.as_str() {
        "if" => {
            let [guard, then, otherwise] = exactly::<3>(operator, operands)?;
            Ok(Expr::If(
                Box::new(parse(guard)?),
                Box::new(parse(then)?),
                Box::new(parse(otherwise)?),
            ))
        },
        "===" | "!==" => {
            let [left, right] = exactly::<2>(operator, operands)?;
            Ok(Expr::StrictEquals {
                left: Box::new(parse(left)?),
                right: Box::new(parse(right)?),
                negated: operator == "!==",
            })
        },
        "and" | "or" => {
            if operands.len() < 2 {
                return Err(LogicError::new(format!(
                    "\"{operator}\" needs at least 2 operands, found {}",
                    operands.len()
                )));
            }
            let parsed = parse_all(operands)?;
            Ok(if operator == "and" {
                Expr::And(parsed)
            } else {
                Expr::Or(parsed)
            })
        },
        "!" => {
            let [operand] = exactly::<1>(operator, operands)?;
            Ok(Expr::Not(Box::new(parse(operand)?)))
        },
        "<" | ">" | "<=" | ">=" => {
            let op = match operator.as_str() {
                "<" => CompareOp::Less,
                ">" => CompareOp::Greater,
                "<=" => CompareOp::LessOrEqual,
                _ => CompareOp::GreaterOrEqual,
            };
            two_or_three(operator, operands)?;
            Ok(Expr::Compare(op, parse_all(operands)?))
        },
        "before" | "not-before" | "after" | "not-after" => {
            let op = match operator.as_str() {
                "before" => DateCompareOp::Before,
                "not-before" => DateCompareOp::NotBefore,
                "after" => DateCompareOp::After,
                _ => DateCompareOp::NotAfter,
            };
            two_or_three(operator, operands)?;
            Ok(Expr::DateCompare(op, parse_all(operands)?))
        },
        "in" => {
            let [needle, haystack] = exactly::<2>(operator, operands)?;
            Ok(Expr::In(Box::new(parse(needle)?), Box::new(parse(haystack)?)))
        },
        "+" => Ok(Expr::Plus(parse_all(operands)?)),
        "plusTime" => {
            let [operand, amount, unit] = exactly::<3>(operator, operands)?;
            let amount = amount
                .as_i64()
                .ok_or_else(|| LogicError::new("plusTime amount must be an integer literal"))?;
            let unit = match unit.as_str() {
                Some("year") => TimeUnit::Year,
                Some("month") => TimeUnit::Month,
                Some("day") => TimeUnit::Day,
                Some("hour") => TimeUnit::Hour,
                _ => {
                    return Err(LogicError::new(format!(
                        "plusTime unit must be one of year, month, day, hour, found {unit}"
                    )))
                },
            };
            Ok(Expr::PlusTime {
                operand: Box::new(parse(operand)?),
                amount,
                unit,
            })
        },
        "reduce" => {
            let [operand, lambda, initial] = exactly::<3>(operator, operands)?;
            Ok(Expr::Reduce {
                operand: Box::new(parse(operand)?),
                lambda: Box::new(parse(lambda)?),
                initial: Box::new(parse(initial)?),
            })
        },
        "extractFromUVCI" => {
            let [operand, index] = exactly::<2>(operator, operands)?;
            let index = index
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| {
                    LogicError::new("extractFromUVCI index must be a non-negative integer literal")
                })?;
            Ok(Expr::ExtractFromUvci {
                operand: Box::new(parse(operand)?),
                index,
            })
        },
        "dccDateOfBirth" => {
            let [operand] = exactly::<1>(operator, operands)?;
            Ok(Expr::DccDateOfBirth(Box::new(parse(operand)?)))
        },
        other => Err(LogicError::new(format!("unrecognised operation \"{other}\""))),
    }
}

fn parse_var(raw: &Json) -> Result<Expr, LogicError> {
    match raw {
        Json::String(path) => Ok(Expr::Var(path.clone())),
        Json::Number(n) if n.is_u64() => Ok(Expr::Var(n.to_string())),
        _ => Err(LogicError::new(format!(
            "var operand must be a path string or index, found {raw}"
        ))),
    }
}

fn parse_all(operands: &[Json]) -> Result<Vec<Expr>, LogicError> {
    operands.iter().map(parse).collect()
}

fn exactly<'a, const N: usize>(operator: &str, operands: &'a [Json]) -> Result<&'a [Json; N], LogicError> {
    operands.try_into().map_err(|_| {
        LogicError::new(format!(
            "\"{operator}\" needs exactly {N} operands, found {}",
            operands.len()
        ))
    })
}

fn two_or_three(operator: &str, operands: &[Json]) -> Result<(), LogicError> {
    if (2..=3).contains(&operands.len()) {
        Ok(())
    } else {
        Err(LogicError::new(format!(
            "\"{operator}\" needs 2 or 3 operands, found {}",
            operands.len()
        )))
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluate an expression against a data object.
pub fn evaluate(expr: &Expr, data: &Json) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(json) => Ok(Value::Json(json.clone())),
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|item| evaluate(item, data).and_then(into_json))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Json(Json::Array(values)))
        },
        Expr::Var(path) => Ok(Value::Json(resolve_path(data, path))),
        Expr::If(guard, then, otherwise) => {
            let guard = evaluate(guard, data)?;
            match guard.truthiness() {
                Some(true) => evaluate(then, data),
                Some(false) => evaluate(otherwise, data),
                None => Err(EvalError::new("if guard is neither truthy nor falsy")),
            }
        },
        Expr::StrictEquals {
            left,
            right,
            negated,
        } => {
            let left = evaluate(left, data)?;
            let right = evaluate(right, data)?;
            Ok(Value::Json(Json::Bool((left == right) != *negated)))
        },
        Expr::And(operands) => {
            let mut acc = Value::Json(Json::Bool(true));
            for operand in operands {
                match acc.truthiness() {
                    Some(true) => acc = evaluate(operand, data)?,
                    Some(false) => return Ok(acc),
                    None => return Err(EvalError::new("and operand is neither truthy nor falsy")),
                }
            }
            Ok(acc)
        },
        Expr::Or(operands) => {
            let mut acc = Value::Json(Json::Bool(false));
            for operand in operands {
                match acc.truthiness() {
                    Some(false) => acc = evaluate(operand, data)?,
                    Some(true) => return Ok(acc),
                    None => return Err(EvalError::new("or operand is neither truthy nor falsy")),
                }
            }
            Ok(acc)
        },
        Expr::Not(operand) => match evaluate(operand, data)?.truthiness() {
            Some(truthy) => Ok(Value::Json(Json::Bool(!truthy))),
            None => Err(EvalError::new("! operand is neither truthy nor falsy")),
        },
        Expr::Compare(op, operands) => {
            let values = operands
                .iter()
                .map(|o| evaluate(o, data).and_then(into_integer))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Json(Json::Bool(chain_holds(*op, &values))))
        },
        Expr::DateCompare(op, operands) => {
            let values = operands
                .iter()
                .map(|o| evaluate(o, data).and_then(into_date_time))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Json(Json::Bool(chain_holds(op.as_compare(), &values))))
        },
        Expr::In(needle, haystack) => {
            let needle = evaluate(needle, data)?;
            match evaluate(haystack, data)? {
                Value::Json(Json::Array(items)) => {
                    let found = match needle {
                        Value::Json(json) => items.contains(&json),
                        Value::DateTime(_) => false,
                    };
                    Ok(Value::Json(Json::Bool(found)))
                },
                Value::Json(Json::Null) => {
                    Err(EvalError::new("in: referenced collection is not available"))
                },
                _ => Err(EvalError::new("in: second operand must be an array")),
            }
        },
        Expr::Plus(operands) => {
            let mut sum: i64 = 0;
            for operand in operands {
                let value = into_integer(evaluate(operand, data)?)?;
                sum = sum
                    .checked_add(value)
                    .ok_or_else(|| EvalError::new("+: integer overflow"))?;
            }
            Ok(Value::Json(Json::from(sum)))
        },
        Expr::PlusTime {
            operand,
            amount,
            unit,
        } => {
            let start = match evaluate(operand, data)? {
                Value::Json(Json::String(s)) => parse_date_time(&s)?,
                Value::DateTime(dt) => dt,
                other => {
                    return Err(EvalError::new(format!(
                        "plusTime: operand must be a date string, found {other:?}"
                    )))
                },
            };
            Ok(Value::DateTime(plus_time(start, *amount, *unit)?))
        },
        Expr::Reduce {
            operand,
            lambda,
            initial,
        } => {
            let items = match evaluate(operand, data)? {
                Value::Json(Json::Null) => return evaluate(initial, data),
                Value::Json(Json::Array(items)) => items,
                _ => return Err(EvalError::new("reduce: operand must be an array or null")),
            };
            let mut acc = evaluate(initial, data)?;
            for current in items {
                let mut scope = Map::new();
                scope.insert("current".to_string(), current);
                scope.insert("accumulator".to_string(), into_json(acc)?);
                acc = evaluate(lambda, &Json::Object(scope))?;
            }
            Ok(acc)
        },
        Expr::ExtractFromUvci { operand, index } => match evaluate(operand, data)? {
            Value::Json(Json::Null) => Ok(Value::Json(Json::Null)),
            Value::Json(Json::String(uvci)) => Ok(Value::Json(
                extract_from_uvci(&uvci, *index).map_or(Json::Null, |f| Json::String(f.to_string())),
            )),
            _ => Err(EvalError::new("extractFromUVCI: operand must be a string or null")),
        },
        Expr::DccDateOfBirth(operand) => match evaluate(operand, data)? {
            Value::Json(Json::String(dob)) => Ok(Value::DateTime(parse_date_of_birth(&dob)?)),
            _ => Err(EvalError::new("dccDateOfBirth: operand must be a string")),
        },
    }
}

/// Resolve a dotted path; missing segments yield `null`.
#[must_use]
pub fn resolve_path(data: &Json, path: &str) -> Json {
    if path.is_empty() {
        return data.clone();
    }
    let mut current = data;
    for segment in path.split('.') {
        let next = match current {
            Json::Object(map) => map.get(segment),
            Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Json::Null,
        }
    }
    current.clone()
}

fn chain_holds<T: PartialOrd>(op: CompareOp, values: &[T]) -> bool {
    values.windows(2).all(|pair| op.holds(&pair[0], &pair[1]))
}

fn into_json(value: Value) -> Result<Json, EvalError> {
    match value {
        Value::Json(json) => Ok(json),
        Value::DateTime(_) => Err(EvalError::new("date value cannot be used as data")),
    }
}

fn into_integer(value: Value) -> Result<i64, EvalError> {
    match value {
        Value::Json(Json::Number(n)) => n
            .as_i64()
            .ok_or_else(|| EvalError::new(format!("{n} is not an integer"))),
        other => Err(EvalError::new(format!("expected an integer, found {other:?}"))),
    }
}

fn into_date_time(value: Value) -> Result<DateTime<Utc>, EvalError> {
    match value {
        Value::DateTime(dt) => Ok(dt),
        other => Err(EvalError::new(format!("expected a date, found {other:?}"))),
    }
}

/// Parse a date or date-time string.
///
/// Date-only strings are midnight UTC; date-times without an offset are UTC.
pub fn parse_date_time(input: &str) -> Result<DateTime<Utc>, EvalError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(midnight(date));
    }
    Err(EvalError::new(format!("\"{input}\" is not a date")))
}

/// Normalise a DCC date of birth to the latest instant it may denote.
///
/// `YYYY` becomes December 31st, `YYYY-MM` the last day of that month.
pub fn parse_date_of_birth(input: &str) -> Result<DateTime<Utc>, EvalError> {
    let date_part = input.split('T').next().unwrap_or(input);
    let invalid = || EvalError::new(format!("\"{input}\" is not a date of birth"));
    let parts: Vec<&str> = date_part.split('-').collect();
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());
    let year = |s: &str| i32::try_from(number(s)?).map_err(|_| invalid());

    let date = match parts.as_slice() {
        [y] => NaiveDate::from_ymd_opt(year(y)?, 12, 31),
        [y, month] => {
            let month = number(month)?;
            NaiveDate::from_ymd_opt(year(y)?, month, 1)
                .and_then(|first| first.checked_add_months(Months::new(1)))
                .and_then(|next| next.pred_opt())
        },
        [y, month, day] => NaiveDate::from_ymd_opt(year(y)?, number(month)?, number(day)?),
        _ => None,
    }
    .ok_or_else(invalid)?;

    Ok(midnight(date))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn plus_time(start: DateTime<Utc>, amount: i64, unit: TimeUnit) -> Result<DateTime<Utc>, EvalError> {
    let overflow = || EvalError::new("plusTime: result out of range");
    match unit {
        TimeUnit::Year => plus_months(start, amount.checked_mul(12).ok_or_else(overflow)?),
        TimeUnit::Month => plus_months(start, amount),
        TimeUnit::Day => TimeDelta::try_days(amount)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(overflow),
        TimeUnit::Hour => TimeDelta::try_hours(amount)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(overflow),
    }
}

fn plus_months(start: DateTime<Utc>, months: i64) -> Result<DateTime<Utc>, EvalError> {
    let magnitude = u32::try_from(months.unsigned_abs())
        .map_err(|_| EvalError::new("plusTime: amount out of range"))?;
    let shifted = if months >= 0 {
        start.checked_add_months(Months::new(magnitude))
    } else {
        start.checked_sub_months(Months::new(magnitude))
    };
    shifted.ok_or_else(|| EvalError::new("plusTime: result out of range"))
}

/// Fragment `index` of a UVCI, splitting on `/`, `#` and `:` after the
/// optional `URN:UVCI:` prefix.
#[must_use]
pub fn extract_from_uvci(uvci: &str, index: usize) -> Option<&str> {
    const PREFIX: &str = "URN:UVCI:";
    let body = match uvci.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => &uvci[PREFIX.len()..],
        _ => uvci,
    };
    body.split(['/', '#', ':']).nth(index)
}
