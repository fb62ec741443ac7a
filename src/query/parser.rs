//! Expression Parser
//!
//! Parses filter expressions over series paths into an `Expression` tree.
//!
//! # Supported Syntax
//!
//! ```text
//! expr      := and_expr (OR and_expr)*
//! and_expr  := term (AND term)*
//! term      := '(' expr ')' | time op integer | series
//! series    := [NOT] path ['[' filter ']'] [op literal]
//! filter    := f_and (OR f_and)*
//! f_and     := f_term (AND f_term)*
//! f_term    := NOT f_term | '(' filter ')' | time op integer | value op literal
//! literal   := integer | decimal | 'text' | true | false
//! ```
//!
//! AND binds tighter than OR. Keywords are case-insensitive; `&&` and `||`
//! are accepted for AND and OR.
//!
//! # Examples
//!
//! ```text
//! root.sg.d1.s1 > 10
//! root.sg.d1.s1 > 10 AND (root.sg.d2.s1 <= 3.5 OR root.sg.d1.s2 = 'on')
//! root.sg.d1.s1[time >= 100 AND time < 200]
//! NOT root.sg.d1.s1 = 0 OR root.sg.d1.s2
//! time >= 1700000000000
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map, map_opt, map_res, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::query::error::{QueryError, QueryResult};
use crate::query::expression::{Expression, Filter, Operator};
use crate::schema::{SeriesPath, Value};

/// Parse an expression string into an `Expression` tree
pub fn parse_expression(input: &str) -> QueryResult<Expression> {
    let input = input.trim();
    if input.is_empty() {
        return Err(QueryError::Parse("Empty expression".to_string()));
    }

    match parse_or(input) {
        Ok((remaining, expression)) => {
            if remaining.trim().is_empty() {
                Ok(expression)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after expression: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(e) => Err(QueryError::Parse(format!("{:?}", e))),
    }
}

/// Parse a keyword that is not the prefix of a longer word
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (rest, matched) = preceded(multispace0, tag_no_case(word))(input)?;
        match rest.chars().next() {
            Some(c) if c.is_alphanumeric() || c == '_' || c == '.' => {
                Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)))
            }
            _ => Ok((rest, matched)),
        }
    }
}

fn and_keyword(input: &str) -> IResult<&str, &str> {
    alt((keyword("AND"), preceded(multispace0, tag("&&"))))(input)
}

fn or_keyword(input: &str) -> IResult<&str, &str> {
    alt((keyword("OR"), preceded(multispace0, tag("||"))))(input)
}

// ==================== Expression Level ====================

fn parse_or(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(or_keyword, parse_and))(input)?;
    Ok((input, rest.into_iter().fold(first, Expression::or)))
}

fn parse_and(input: &str) -> IResult<&str, Expression> {
    let (input, first) = parse_term(input)?;
    let (input, rest) = many0(preceded(and_keyword, parse_term))(input)?;
    Ok((input, rest.into_iter().fold(first, Expression::and)))
}

fn parse_term(input: &str) -> IResult<&str, Expression> {
    preceded(
        multispace0,
        alt((
            delimited(char('('), parse_or, preceded(multispace0, char(')'))),
            map(parse_time_predicate, Expression::GlobalTime),
            parse_series_term,
        )),
    )(input)
}

/// Parse a series leaf like `root.sg.d1.s1[time > 5] >= 10`
fn parse_series_term(input: &str) -> IResult<&str, Expression> {
    let start = input;
    let (input, negated) = opt(keyword("NOT"))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, path) = parse_path(input)?;
    let (input, bracket) = opt(delimited(
        preceded(multispace0, char('[')),
        parse_filter,
        preceded(multispace0, char(']')),
    ))(input)?;
    let (input, comparison) = opt(pair(
        preceded(multispace0, parse_operator),
        preceded(multispace0, parse_literal),
    ))(input)?;

    let filter = match (bracket, comparison) {
        (Some(bracket), Some((op, v))) => Some(bracket.and(Filter::value(op, v))),
        (Some(bracket), None) => Some(bracket),
        (None, Some((op, v))) => Some(Filter::value(op, v)),
        (None, None) => None,
    };

    let filter = match (negated, filter) {
        (Some(_), Some(filter)) => Some(filter.negate()),
        // NOT needs a predicate to negate
        (Some(_), None) => return Err(nom::Err::Error(Error::new(start, ErrorKind::Verify))),
        (None, filter) => filter,
    };

    Ok((input, Expression::series(path, filter)))
}

/// Parse a dotted series path
fn parse_path(input: &str) -> IResult<&str, SeriesPath> {
    map_res(
        take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '*')),
        SeriesPath::parse,
    )(input)
}

// ==================== Filter Level ====================

fn parse_filter(input: &str) -> IResult<&str, Filter> {
    let (input, first) = parse_filter_and(input)?;
    let (input, rest) = many0(preceded(or_keyword, parse_filter_and))(input)?;
    Ok((input, rest.into_iter().fold(first, Filter::or)))
}

fn parse_filter_and(input: &str) -> IResult<&str, Filter> {
    let (input, first) = parse_filter_term(input)?;
    let (input, rest) = many0(preceded(and_keyword, parse_filter_term))(input)?;
    Ok((input, rest.into_iter().fold(first, Filter::and)))
}

fn parse_filter_term(input: &str) -> IResult<&str, Filter> {
    preceded(
        multispace0,
        alt((
            map(preceded(keyword("NOT"), parse_filter_term), Filter::negate),
            delimited(char('('), parse_filter, preceded(multispace0, char(')'))),
            parse_time_predicate,
            parse_value_predicate,
        )),
    )(input)
}

/// Parse time predicate like "time >= 100"
fn parse_time_predicate(input: &str) -> IResult<&str, Filter> {
    let (input, _) = keyword("time")(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, timestamp) = parse_integer(input)?;
    Ok((input, Filter::time(op, timestamp)))
}

/// Parse value predicate like "value > 5"
fn parse_value_predicate(input: &str) -> IResult<&str, Filter> {
    let (input, _) = keyword("value")(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, v) = parse_literal(input)?;
    Ok((input, Filter::value(op, v)))
}

// ==================== Tokens ====================

/// Parse comparison operator
fn parse_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, alt((tag("!="), tag("<>")))),
        value(Operator::Gt, tag(">")),
        value(Operator::Lt, tag("<")),
        value(Operator::Eq, alt((tag("=="), tag("=")))),
    ))(input)
}

/// Parse literal value
fn parse_literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(parse_quoted_string, Value::Text),
        value(Value::Boolean(true), keyword("true")),
        value(Value::Boolean(false), keyword("false")),
        parse_number,
    ))(input)
}

/// Parse quoted string
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('\'')(input)?;
    let (input, content) = take_while(|c| c != '\'')(input)?;
    let (input, _) = char('\'')(input)?;
    Ok((input, content.to_string()))
}

/// Parse integer or decimal number; decimals become doubles
fn parse_number(input: &str) -> IResult<&str, Value> {
    map_opt(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        |s: &str| {
            if s.contains('.') {
                s.parse::<f64>().ok().map(Value::Double)
            } else {
                s.parse::<i64>().ok().map(Value::Int64)
            }
        },
    )(input)
}

fn parse_integer(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> SeriesPath {
        SeriesPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_bare_series() {
        let expr = parse_expression("root.sg.d1.s1").unwrap();
        assert_eq!(expr, Expression::series(path("root.sg.d1.s1"), None));
    }

    #[test]
    fn test_parse_value_comparison() {
        let expr = parse_expression("root.sg.d1.s1 > 10").unwrap();
        assert_eq!(
            expr,
            Expression::series(
                path("root.sg.d1.s1"),
                Some(Filter::value(Operator::Gt, Value::Int64(10)))
            )
        );

        let expr = parse_expression("root.sg.d1.s2 = 'on'").unwrap();
        assert_eq!(
            expr,
            Expression::series(
                path("root.sg.d1.s2"),
                Some(Filter::value(Operator::Eq, Value::Text("on".into())))
            )
        );
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let expr = parse_expression("root.a.d.s1 OR root.a.d.s2 AND root.a.d.s3").unwrap();
        let expected = Expression::or(
            Expression::series(path("root.a.d.s1"), None),
            Expression::and(
                Expression::series(path("root.a.d.s2"), None),
                Expression::series(path("root.a.d.s3"), None),
            ),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parentheses() {
        let expr = parse_expression(
            "root.sg.d1.s1 > 10 AND (root.sg.d2.s1 <= 3.5 OR root.sg.d1.s2 = 'on')",
        )
        .unwrap();

        let Expression::And(left, right) = expr else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*left, Expression::Series { .. }));
        let Expression::Or(a, _) = *right else {
            panic!("expected OR on the right");
        };
        assert_eq!(
            *a,
            Expression::series(
                path("root.sg.d2.s1"),
                Some(Filter::value(Operator::Lte, Value::Double(3.5)))
            )
        );
    }

    #[test]
    fn test_bracket_filter() {
        let expr = parse_expression("root.sg.d1.s1[time >= 100 and time < 200] != 0").unwrap();
        let expected = Filter::time(Operator::Gte, 100)
            .and(Filter::time(Operator::Lt, 200))
            .and(Filter::value(Operator::Ne, Value::Int64(0)));
        assert_eq!(expr, Expression::series(path("root.sg.d1.s1"), Some(expected)));
    }

    #[test]
    fn test_not() {
        let expr = parse_expression("NOT root.sg.d1.s1 = 0").unwrap();
        assert_eq!(
            expr,
            Expression::series(
                path("root.sg.d1.s1"),
                Some(Filter::value(Operator::Eq, Value::Int64(0)).negate())
            )
        );

        let expr = parse_expression("root.sg.d1.s1[NOT (time < 5 OR value = true)]").unwrap();
        let expected = Filter::time(Operator::Lt, 5)
            .or(Filter::value(Operator::Eq, Value::Boolean(true)))
            .negate();
        assert_eq!(expr, Expression::series(path("root.sg.d1.s1"), Some(expected)));

        assert!(parse_expression("NOT root.sg.d1.s1").is_err());
    }

    #[test]
    fn test_global_time() {
        let expr = parse_expression("time >= -5").unwrap();
        assert_eq!(expr, Expression::GlobalTime(Filter::time(Operator::Gte, -5)));

        // A path that merely starts with "time" is still a path
        let expr = parse_expression("timeline.d1.s1").unwrap();
        assert_eq!(expr, Expression::series(path("timeline.d1.s1"), None));
    }

    #[test]
    fn test_symbolic_connectives() {
        let expr = parse_expression("root.a.d.s1 || root.a.d.s2 && root.a.d.s3").unwrap();
        assert!(matches!(expr, Expression::Or(..)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("root.sg.d1.s1 >").is_err());
        assert!(parse_expression("root..s1").is_err());
        assert!(parse_expression("(root.sg.d1.s1").is_err());
        assert!(parse_expression("root.sg.d1.s1 AND").is_err());
    }
}
