//! nom parser for the textual form of paths, expressions and predicates.
//!
//! Keywords are case-insensitive and must end at a word boundary, so `notes` is a
//! path and not `NOT es`.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, not, opt, peek, recognize},
    error::ParseError,
    multi::{many0, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};

use super::errors::ExpressionParseError;
use super::{
    ArithmeticOperator, BooleanOperator, CaseExpression, ComparisonOperator, CompoundPredicate,
    Expression, FunctionExpression, Literal, OrderByItem, PathElement, PathExpression, Predicate,
    WindowDefinition,
};

const RESERVED: &[&str] = &[
    "AND", "OR", "NOT", "IN", "IS", "LIKE", "BETWEEN", "ASC", "DESC", "NULLS", "CASE", "WHEN",
    "THEN", "ELSE", "END", "AS", "OVER", "FILTER", "NULL", "TRUE", "FALSE", "EMPTY", "DISTINCT",
];

pub fn ws<'a, O, E: ParseError<&'a str>, F>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
{
    delimited(multispace0, inner, multispace0)
}

/// Parse a predicate such as `o.customer.name = :name AND o.total > 10`
pub fn parse_predicate(text: &str) -> Result<Predicate, ExpressionParseError> {
    run(text, predicate)
}

/// Parse a scalar expression such as `COALESCE(o.total, 0)` or `o.items[1].price`
pub fn parse_expression(text: &str) -> Result<Expression, ExpressionParseError> {
    run(text, expression)
}

/// Parse a plain path such as `o.items[:idx].product`
pub fn parse_path(text: &str) -> Result<PathExpression, ExpressionParseError> {
    run(text, path_expression)
}

/// Parse a join path, optionally wrapped in `TREAT(path AS Type)`
pub fn parse_join_path(
    text: &str,
) -> Result<(PathExpression, Option<String>), ExpressionParseError> {
    run(text, join_path)
}

/// Parse an order-by item: `expr [ASC|DESC] [NULLS FIRST|LAST]`
pub fn parse_order_by_item(text: &str) -> Result<OrderByItem, ExpressionParseError> {
    run(text, order_by_item)
}

fn run<'a, T>(
    input: &'a str,
    parser: fn(&'a str) -> IResult<&'a str, T>,
) -> Result<T, ExpressionParseError> {
    match parser(input) {
        Ok((rest, value)) => {
            let rest = rest.trim();
            if rest.is_empty() {
                Ok(value)
            } else {
                Err(ExpressionParseError::TrailingInput {
                    input: input.to_string(),
                    remaining: rest.to_string(),
                })
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ExpressionParseError::Syntax {
            input: input.to_string(),
            remaining: e.input.trim().to_string(),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ExpressionParseError::Syntax {
            input: input.to_string(),
            remaining: String::new(),
        }),
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    ws(terminated(
        tag_no_case(word),
        not(peek(satisfy(is_identifier_char))),
    ))
}

fn raw_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_identifier_start), take_while(is_identifier_char))).parse(input)
}

/// An identifier that is not a reserved word
fn identifier(input: &str) -> IResult<&str, &str> {
    let (rest, word) = raw_identifier(input)?;
    if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word)) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, word))
}

// ===== PREDICATES =====

fn predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = and_predicate(input)?;
    let (input, rest) = many0(preceded(keyword("OR"), and_predicate)).parse(input)?;
    Ok((input, combine(BooleanOperator::Or, first, rest)))
}

fn and_predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = not_predicate(input)?;
    let (input, rest) = many0(preceded(keyword("AND"), not_predicate)).parse(input)?;
    Ok((input, combine(BooleanOperator::And, first, rest)))
}

fn combine(operator: BooleanOperator, first: Predicate, rest: Vec<Predicate>) -> Predicate {
    if rest.is_empty() {
        return first;
    }
    let mut children = vec![first];
    children.extend(rest);
    Predicate::Compound(CompoundPredicate {
        operator,
        children,
        negated: false,
    })
}

fn not_predicate(input: &str) -> IResult<&str, Predicate> {
    alt((
        map(preceded(keyword("NOT"), not_predicate), Predicate::negate),
        primary_predicate,
    ))
    .parse(input)
}

fn primary_predicate(input: &str) -> IResult<&str, Predicate> {
    alt((
        delimited(ws(char('(')), predicate, ws(char(')'))),
        simple_predicate,
    ))
    .parse(input)
}

enum PredicateTail {
    Comparison(ComparisonOperator, bool, Expression),
    In(bool, Vec<Expression>),
    IsNull(bool),
    IsEmpty(bool),
    Like(bool, Expression),
    Between(bool, Expression, Expression),
}

fn comparison_operator(input: &str) -> IResult<&str, (ComparisonOperator, bool)> {
    ws(alt((
        map(tag("<>"), |_| (ComparisonOperator::Eq, true)),
        map(tag("!="), |_| (ComparisonOperator::Eq, true)),
        map(tag("<="), |_| (ComparisonOperator::Le, false)),
        map(tag(">="), |_| (ComparisonOperator::Ge, false)),
        map(tag("="), |_| (ComparisonOperator::Eq, false)),
        map(tag("<"), |_| (ComparisonOperator::Lt, false)),
        map(tag(">"), |_| (ComparisonOperator::Gt, false)),
    )))
    .parse(input)
}

fn predicate_tail(input: &str) -> IResult<&str, PredicateTail> {
    alt((
        map(pair(comparison_operator, expression), |((op, neg), right)| {
            PredicateTail::Comparison(op, neg, right)
        }),
        map(
            pair(
                terminated(opt(keyword("NOT")), keyword("IN")),
                delimited(
                    ws(char('(')),
                    separated_list1(ws(char(',')), expression),
                    ws(char(')')),
                ),
            ),
            |(neg, values)| PredicateTail::In(neg.is_some(), values),
        ),
        map(
            preceded(keyword("IS"), pair(opt(keyword("NOT")), keyword("NULL"))),
            |(neg, _)| PredicateTail::IsNull(neg.is_some()),
        ),
        map(
            preceded(keyword("IS"), pair(opt(keyword("NOT")), keyword("EMPTY"))),
            |(neg, _)| PredicateTail::IsEmpty(neg.is_some()),
        ),
        map(
            pair(terminated(opt(keyword("NOT")), keyword("LIKE")), expression),
            |(neg, pattern)| PredicateTail::Like(neg.is_some(), pattern),
        ),
        map(
            (
                terminated(opt(keyword("NOT")), keyword("BETWEEN")),
                expression,
                preceded(keyword("AND"), expression),
            ),
            |(neg, lower, upper)| PredicateTail::Between(neg.is_some(), lower, upper),
        ),
    ))
    .parse(input)
}

fn simple_predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, left) = expression(input)?;
    let (input, tail) = predicate_tail(input)?;
    let predicate = match tail {
        PredicateTail::Comparison(operator, negated, right) => Predicate::Comparison {
            operator,
            left,
            right,
            negated,
        },
        PredicateTail::In(negated, right) => Predicate::In {
            left,
            right,
            negated,
        },
        PredicateTail::IsNull(negated) => Predicate::IsNull {
            expression: left,
            negated,
        },
        PredicateTail::IsEmpty(negated) => Predicate::IsEmpty {
            expression: left,
            negated,
        },
        PredicateTail::Like(negated, pattern) => Predicate::Like {
            left,
            pattern,
            negated,
        },
        PredicateTail::Between(negated, lower, upper) => Predicate::Between {
            expression: left,
            lower,
            upper,
            negated,
        },
    };
    Ok((input, predicate))
}

// ===== EXPRESSIONS =====

fn expression(input: &str) -> IResult<&str, Expression> {
    let (input, first) = term(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            map(char('+'), |_| ArithmeticOperator::Add),
            map(char('-'), |_| ArithmeticOperator::Subtract),
        ))),
        term,
    ))
    .parse(input)?;
    Ok((input, fold_arithmetic(first, rest)))
}

fn term(input: &str) -> IResult<&str, Expression> {
    let (input, first) = primary_expression(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            map(char('*'), |_| ArithmeticOperator::Multiply),
            map(char('/'), |_| ArithmeticOperator::Divide),
        ))),
        primary_expression,
    ))
    .parse(input)?;
    Ok((input, fold_arithmetic(first, rest)))
}

fn fold_arithmetic(first: Expression, rest: Vec<(ArithmeticOperator, Expression)>) -> Expression {
    rest.into_iter()
        .fold(first, |left, (operator, right)| Expression::Arithmetic {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
}

fn primary_expression(input: &str) -> IResult<&str, Expression> {
    ws(alt((
        parameter,
        string_literal,
        numeric_literal,
        keyword_literal,
        case_expression,
        qualified_path,
        function_call,
        map(path_expression, Expression::Path),
        delimited(ws(char('(')), expression, ws(char(')'))),
    )))
    .parse(input)
}

fn parameter(input: &str) -> IResult<&str, Expression> {
    map(preceded(char(':'), raw_identifier), |name: &str| {
        Expression::Parameter(name.to_string())
    })
    .parse(input)
}

fn string_literal(input: &str) -> IResult<&str, Expression> {
    let (mut rest, _) = char('\'').parse(input)?;
    let mut value = String::new();
    loop {
        match rest.find('\'') {
            Some(pos) => {
                value.push_str(&rest[..pos]);
                let after = &rest[pos + 1..];
                if let Some(stripped) = after.strip_prefix('\'') {
                    value.push('\'');
                    rest = stripped;
                } else {
                    return Ok((after, Expression::Literal(Literal::String(value))));
                }
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
}

fn numeric_literal(input: &str) -> IResult<&str, Expression> {
    map(
        recognize((opt(char('-')), digit1, opt(pair(char('.'), digit1)))),
        |n: &str| Expression::Literal(Literal::Numeric(n.to_string())),
    )
    .parse(input)
}

fn keyword_literal(input: &str) -> IResult<&str, Expression> {
    alt((
        map(keyword("TRUE"), |_| Expression::Literal(Literal::Boolean(true))),
        map(keyword("FALSE"), |_| {
            Expression::Literal(Literal::Boolean(false))
        }),
        map(keyword("NULL"), |_| Expression::Literal(Literal::Null)),
    ))
    .parse(input)
}

fn case_expression(input: &str) -> IResult<&str, Expression> {
    let (input, _) = keyword("CASE").parse(input)?;
    let (input, when_clauses) = many1(pair(
        preceded(keyword("WHEN"), predicate),
        preceded(keyword("THEN"), expression),
    ))
    .parse(input)?;
    let (input, default) = opt(preceded(keyword("ELSE"), expression)).parse(input)?;
    let (input, _) = keyword("END").parse(input)?;
    Ok((
        input,
        Expression::Case(CaseExpression {
            when_clauses,
            default: default.map(Box::new),
        }),
    ))
}

/// `KEY(path)` and `INDEX(path)`
fn qualified_path(input: &str) -> IResult<&str, Expression> {
    alt((
        map(
            preceded(
                keyword("KEY"),
                delimited(ws(char('(')), path_expression, ws(char(')'))),
            ),
            Expression::MapKey,
        ),
        map(
            preceded(
                keyword("INDEX"),
                delimited(ws(char('(')), path_expression, ws(char(')'))),
            ),
            Expression::ListIndex,
        ),
    ))
    .parse(input)
}

fn function_call(input: &str) -> IResult<&str, Expression> {
    let (input, name) = identifier(input)?;
    let (input, _) = ws(char('(')).parse(input)?;
    let (input, distinct) = opt(keyword("DISTINCT")).parse(input)?;
    let (input, arguments) = separated_list0(ws(char(',')), expression).parse(input)?;
    let (input, _) = ws(char(')')).parse(input)?;
    let (input, filter) = opt(preceded(
        keyword("FILTER"),
        delimited(
            ws(char('(')),
            preceded(keyword("WHERE"), predicate),
            ws(char(')')),
        ),
    ))
    .parse(input)?;
    let (input, window) = opt(preceded(keyword("OVER"), window_definition)).parse(input)?;

    Ok((
        input,
        Expression::Function(FunctionExpression {
            name: name.to_uppercase(),
            distinct: distinct.is_some(),
            arguments,
            filter: filter.map(Box::new),
            window,
        }),
    ))
}

fn window_definition(input: &str) -> IResult<&str, WindowDefinition> {
    let (input, _) = ws(char('(')).parse(input)?;
    let (input, partition_by) = opt(preceded(
        pair(keyword("PARTITION"), keyword("BY")),
        separated_list1(ws(char(',')), expression),
    ))
    .parse(input)?;
    let (input, order_by) = opt(preceded(
        pair(keyword("ORDER"), keyword("BY")),
        separated_list1(ws(char(',')), order_by_item),
    ))
    .parse(input)?;
    let (input, _) = ws(char(')')).parse(input)?;
    Ok((
        input,
        WindowDefinition {
            partition_by: partition_by.unwrap_or_default(),
            order_by: order_by.unwrap_or_default(),
        },
    ))
}

fn order_by_item(input: &str) -> IResult<&str, OrderByItem> {
    let (input, expression) = expression(input)?;
    let (input, direction) = opt(alt((
        map(keyword("ASC"), |_| true),
        map(keyword("DESC"), |_| false),
    )))
    .parse(input)?;
    let (input, nulls_first) = opt(preceded(
        keyword("NULLS"),
        alt((
            map(keyword("FIRST"), |_| true),
            map(keyword("LAST"), |_| false),
        )),
    ))
    .parse(input)?;
    Ok((
        input,
        OrderByItem {
            expression,
            ascending: direction.unwrap_or(true),
            nulls_first,
        },
    ))
}

// ===== PATHS =====

fn path_element(input: &str) -> IResult<&str, PathElement> {
    let (input, name) = raw_identifier(input)?;
    let (input, index) = opt(delimited(ws(char('[')), expression, ws(char(']')))).parse(input)?;
    let element = match index {
        Some(index) => PathElement::Array {
            base: name.to_string(),
            index: Box::new(index),
        },
        None => PathElement::Property(name.to_string()),
    };
    Ok((input, element))
}

fn path_expression(input: &str) -> IResult<&str, PathExpression> {
    // The first segment must not be a keyword, later ones may (`o.end`)
    let _ = peek(identifier).parse(input)?;
    map(separated_list1(char('.'), path_element), PathExpression::new).parse(input)
}

fn join_path(input: &str) -> IResult<&str, (PathExpression, Option<String>)> {
    alt((
        map(
            preceded(
                keyword("TREAT"),
                delimited(
                    ws(char('(')),
                    pair(ws(path_expression), preceded(keyword("AS"), ws(raw_identifier))),
                    ws(char(')')),
                ),
            ),
            |(path, treat)| (path, Some(treat.to_string())),
        ),
        map(ws(path_expression), |path| (path, None)),
    ))
    .parse(input)
}
