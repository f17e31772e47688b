//! Filter expressions.
//!
//! Accepts both the Algolia facet form (`location:Chicago`, `fid:1 TO 10`)
//! and the Meilisearch form (`fid >= 3 AND username IN [a, b]`). Parsed
//! expressions render back in Meilisearch syntax and can be evaluated
//! against a stored document.

use crate::error::QueryError;
use crate::query::sort::is_field_char;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, multispace0, satisfy},
    combinator::{all_consuming, map, not, opt},
    error::{Error, ErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
    IResult,
};
use serde_json::{Map, Value};
use std::fmt;

const MAX_FILTER_DEPTH: usize = 16;
const MAX_CONDITIONS: usize = 1000;

const KEYWORDS: &[&str] = &["AND", "OR", "NOT", "TO", "IN", "EXISTS"];

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Equal(String),
    NotEqual(String),
    GreaterThan(String),
    GreaterThanOrEqual(String),
    LessThan(String),
    LessThanOrEqual(String),
    Between(String, String),
    In(Vec<String>),
    Exists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Condition { field: String, op: Comparison },
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn parse(expression: &str) -> Result<Self, QueryError> {
        let invalid = |reason: String| QueryError::InvalidFilter {
            expression: expression.to_string(),
            reason,
        };

        let expr = match all_consuming(ws(|i| or_expr(i, 0)))(expression) {
            Ok((_, expr)) => expr,
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(invalid(describe(&e)));
            }
            Err(nom::Err::Incomplete(_)) => return Err(invalid("incomplete expression".into())),
        };

        let conditions = expr.condition_count();
        if conditions > MAX_CONDITIONS {
            return Err(invalid(format!(
                "{} conditions exceeds maximum {}",
                conditions, MAX_CONDITIONS
            )));
        }

        Ok(expr)
    }

    /// Every field the expression references, in order of appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            FilterExpr::Condition { field, .. } => out.push(field),
            FilterExpr::Not(inner) => inner.collect_fields(out),
            FilterExpr::And(parts) | FilterExpr::Or(parts) => {
                for p in parts {
                    p.collect_fields(out);
                }
            }
        }
    }

    fn condition_count(&self) -> usize {
        match self {
            FilterExpr::Condition { .. } => 1,
            FilterExpr::Not(inner) => inner.condition_count(),
            FilterExpr::And(parts) | FilterExpr::Or(parts) => {
                parts.iter().map(|p| p.condition_count()).sum()
            }
        }
    }

    /// Evaluate against a stored document. Array-valued fields match when any
    /// element matches; string equality is case-insensitive.
    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        match self {
            FilterExpr::Condition { field, op } => match op {
                Comparison::Exists => doc.contains_key(field),
                Comparison::NotEqual(v) => !any_value(doc.get(field), |x| value_equals(x, v)),
                _ => any_value(doc.get(field), |x| compare(x, op)),
            },
            FilterExpr::Not(inner) => !inner.matches(doc),
            FilterExpr::And(parts) => parts.iter().all(|p| p.matches(doc)),
            FilterExpr::Or(parts) => parts.iter().any(|p| p.matches(doc)),
        }
    }
}

fn any_value(value: Option<&Value>, pred: impl Fn(&Value) -> bool) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Array(items)) => items.iter().any(pred),
        Some(v) => pred(v),
    }
}

fn compare(doc_value: &Value, op: &Comparison) -> bool {
    match op {
        Comparison::Equal(v) => value_equals(doc_value, v),
        Comparison::In(values) => values.iter().any(|v| value_equals(doc_value, v)),
        Comparison::GreaterThan(v) => numeric_cmp(doc_value, v, |a, b| a > b),
        Comparison::GreaterThanOrEqual(v) => numeric_cmp(doc_value, v, |a, b| a >= b),
        Comparison::LessThan(v) => numeric_cmp(doc_value, v, |a, b| a < b),
        Comparison::LessThanOrEqual(v) => numeric_cmp(doc_value, v, |a, b| a <= b),
        Comparison::Between(lo, hi) => {
            numeric_cmp(doc_value, lo, |a, b| a >= b) && numeric_cmp(doc_value, hi, |a, b| a <= b)
        }
        Comparison::NotEqual(_) | Comparison::Exists => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_equals(doc_value: &Value, literal: &str) -> bool {
    if let (Some(a), Ok(b)) = (as_number(doc_value), literal.trim().parse::<f64>()) {
        return a == b;
    }
    match doc_value {
        Value::String(s) => s.to_lowercase() == literal.to_lowercase(),
        Value::Bool(b) => b.to_string() == literal.to_lowercase(),
        _ => false,
    }
}

fn numeric_cmp(doc_value: &Value, literal: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (as_number(doc_value), literal.trim().parse::<f64>()) {
        (Some(a), Ok(b)) => cmp(a, b),
        _ => false,
    }
}

fn describe(e: &Error<&str>) -> String {
    if e.code == ErrorKind::TooLarge {
        format!("nesting exceeds maximum depth {}", MAX_FILTER_DEPTH)
    } else if e.input.trim().is_empty() {
        "unexpected end of expression".to_string()
    } else {
        let snippet: String = e.input.chars().take(24).collect();
        format!("unexpected input at {:?}", snippet)
    }
}

// ── grammar ──

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_field_char)))
}

// `depth` counts the `NOT`s and parentheses enclosing the current position.
// Every recursive descent goes through `descend`, so the parser's own stack
// use is bounded by `MAX_FILTER_DEPTH`.

fn descend(input: &str, depth: usize) -> IResult<&str, usize> {
    if depth >= MAX_FILTER_DEPTH {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
    }
    Ok((input, depth + 1))
}

fn or_expr(input: &str, depth: usize) -> IResult<&str, FilterExpr> {
    let (input, first) = and_expr(input, depth)?;
    let (input, rest) = many0(preceded(ws(keyword("OR")), |i| and_expr(i, depth)))(input)?;
    Ok((input, join(first, rest, FilterExpr::Or)))
}

fn and_expr(input: &str, depth: usize) -> IResult<&str, FilterExpr> {
    let (input, first) = not_expr(input, depth)?;
    let (input, rest) = many0(preceded(ws(keyword("AND")), |i| not_expr(i, depth)))(input)?;
    Ok((input, join(first, rest, FilterExpr::And)))
}

fn join(
    first: FilterExpr,
    rest: Vec<FilterExpr>,
    combine: fn(Vec<FilterExpr>) -> FilterExpr,
) -> FilterExpr {
    if rest.is_empty() {
        first
    } else {
        let mut all = Vec::with_capacity(rest.len() + 1);
        all.push(first);
        all.extend(rest);
        combine(all)
    }
}

fn not_expr(input: &str, depth: usize) -> IResult<&str, FilterExpr> {
    alt((
        map(
            preceded(ws(keyword("NOT")), |i| {
                descend(i, depth).and_then(|(i, inner)| not_expr(i, inner))
            }),
            |e| FilterExpr::Not(Box::new(e)),
        ),
        |i| primary(i, depth),
    ))(input)
}

fn primary(input: &str, depth: usize) -> IResult<&str, FilterExpr> {
    alt((
        delimited(
            ws(char('(')),
            |i| descend(i, depth).and_then(|(i, inner)| or_expr(i, inner)),
            ws(char(')')),
        ),
        condition,
    ))(input)
}

enum Tail {
    Plain(Comparison),
    Negated(Comparison),
}

fn condition(input: &str) -> IResult<&str, FilterExpr> {
    let (input, field) = ws(field_name)(input)?;
    let (input, tail) = alt((
        map(
            preceded(
                char(':'),
                pair(ws(value), opt(preceded(ws(keyword("TO")), ws(value)))),
            ),
            |(a, b)| match b {
                Some(b) => Tail::Plain(Comparison::Between(a, b)),
                None => Tail::Plain(Comparison::Equal(a)),
            },
        ),
        map(preceded(tag("!="), ws(value)), |v| {
            Tail::Plain(Comparison::NotEqual(v))
        }),
        map(preceded(tag(">="), ws(value)), |v| {
            Tail::Plain(Comparison::GreaterThanOrEqual(v))
        }),
        map(preceded(tag("<="), ws(value)), |v| {
            Tail::Plain(Comparison::LessThanOrEqual(v))
        }),
        map(preceded(char('='), ws(value)), |v| {
            Tail::Plain(Comparison::Equal(v))
        }),
        map(preceded(char('>'), ws(value)), |v| {
            Tail::Plain(Comparison::GreaterThan(v))
        }),
        map(preceded(char('<'), ws(value)), |v| {
            Tail::Plain(Comparison::LessThan(v))
        }),
        map(preceded(ws(keyword("IN")), value_list), |v| {
            Tail::Plain(Comparison::In(v))
        }),
        map(
            preceded(pair(ws(keyword("NOT")), ws(keyword("IN"))), value_list),
            |v| Tail::Negated(Comparison::In(v)),
        ),
        map(ws(keyword("EXISTS")), |_| Tail::Plain(Comparison::Exists)),
        map(pair(ws(keyword("NOT")), ws(keyword("EXISTS"))), |_| {
            Tail::Negated(Comparison::Exists)
        }),
        map(
            separated_pair(ws(value), keyword("TO"), ws(value)),
            |(a, b)| Tail::Plain(Comparison::Between(a, b)),
        ),
    ))(input)?;

    let expr = match tail {
        Tail::Plain(op) => FilterExpr::Condition { field, op },
        Tail::Negated(op) => FilterExpr::Not(Box::new(FilterExpr::Condition { field, op })),
    };
    Ok((input, expr))
}

fn value_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        ws(char('[')),
        separated_list1(ws(char(',')), ws(value)),
        ws(char(']')),
    )(input)
}

fn field_name(input: &str) -> IResult<&str, String> {
    alt((quoted, map(take_while1(is_field_char), String::from)))(input)
}

fn value(input: &str) -> IResult<&str, String> {
    alt((quoted, bare_value))(input)
}

fn bare_value(input: &str) -> IResult<&str, String> {
    let (rest, word) =
        take_while1(|c: char| !c.is_whitespace() && !"()[],=!<>:'\"".contains(c))(input)?;
    if KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word)) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
    }
    Ok((rest, word.to_string()))
}

fn quoted(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };
    let body = &input[1..];
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            c if c == quote => return Ok((&body[i + c.len_utf8()..], out)),
            c => out.push(c),
        }
    }
    Err(nom::Err::Failure(Error::new(input, ErrorKind::Char)))
}

// ── rendering ──

fn needs_quotes(s: &str) -> bool {
    s.is_empty()
        || !s.chars().all(is_field_char)
        || KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(s))
}

fn write_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    if needs_quotes(s) {
        write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        f.write_str(s)
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[String]) -> fmt::Result {
    f.write_str("[")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_literal(f, v)?;
    }
    f.write_str("]")
}

fn write_group(f: &mut fmt::Formatter<'_>, parts: &[FilterExpr], sep: &str) -> fmt::Result {
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        match p {
            FilterExpr::And(_) | FilterExpr::Or(_) => write!(f, "({})", p)?,
            _ => write!(f, "{}", p)?,
        }
    }
    Ok(())
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpr::Condition { field, op } => {
                write_literal(f, field)?;
                match op {
                    Comparison::Equal(v) => {
                        f.write_str(" = ")?;
                        write_literal(f, v)
                    }
                    Comparison::NotEqual(v) => {
                        f.write_str(" != ")?;
                        write_literal(f, v)
                    }
                    Comparison::GreaterThan(v) => {
                        f.write_str(" > ")?;
                        write_literal(f, v)
                    }
                    Comparison::GreaterThanOrEqual(v) => {
                        f.write_str(" >= ")?;
                        write_literal(f, v)
                    }
                    Comparison::LessThan(v) => {
                        f.write_str(" < ")?;
                        write_literal(f, v)
                    }
                    Comparison::LessThanOrEqual(v) => {
                        f.write_str(" <= ")?;
                        write_literal(f, v)
                    }
                    Comparison::Between(lo, hi) => {
                        f.write_str(" ")?;
                        write_literal(f, lo)?;
                        f.write_str(" TO ")?;
                        write_literal(f, hi)
                    }
                    Comparison::In(values) => {
                        f.write_str(" IN ")?;
                        write_list(f, values)
                    }
                    Comparison::Exists => f.write_str(" EXISTS"),
                }
            }
            FilterExpr::Not(inner) => match inner.as_ref() {
                FilterExpr::Condition {
                    field,
                    op: Comparison::In(values),
                } => {
                    write_literal(f, field)?;
                    f.write_str(" NOT IN ")?;
                    write_list(f, values)
                }
                FilterExpr::Condition {
                    field,
                    op: Comparison::Exists,
                } => {
                    write_literal(f, field)?;
                    f.write_str(" NOT EXISTS")
                }
                other => write!(f, "NOT ({})", other),
            },
            FilterExpr::And(parts) => write_group(f, parts, " AND "),
            FilterExpr::Or(parts) => write_group(f, parts, " OR "),
        }
    }
}
