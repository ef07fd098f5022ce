use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::{context, VerboseError},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::ast::{BinOp, Expr, ObjectKey};
use super::QueryError;
use crate::value::{parse_number, Value};

type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

const RESERVED: &[&str] = &[
    "if", "then", "elif", "else", "end", "and", "or", "as", "true", "false", "null",
];

/// Parses a complete query program.
pub fn parse(source: &str) -> Result<Expr, QueryError> {
    match all_consuming(terminated(pipe, multispace0))(source) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let rest = e.errors.first().map(|(rest, _)| *rest).unwrap_or(source);
            let offset = source.len() - rest.len();
            let message = if rest.is_empty() {
                "unexpected end of query".to_string()
            } else {
                format!(
                    "unexpected input '{}'",
                    rest.chars().take(12).collect::<String>()
                )
            };
            Err(QueryError::Parse { offset, message })
        }
        Err(nom::Err::Incomplete(_)) => Err(QueryError::Parse {
            offset: source.len(),
            message: "unexpected end of query".to_string(),
        }),
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> ParserResult<'a, O>
where
    F: FnMut(&'a str) -> ParserResult<'a, O>,
{
    preceded(multispace0, inner)
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> ParserResult<'a, &'a str> {
    terminated(
        tag(kw),
        not(satisfy(|c: char| c.is_alphanumeric() || c == '_')),
    )
}

fn identifier(input: &str) -> ParserResult<&str> {
    context(
        "identifier",
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
    )(input)
}

fn variable(input: &str) -> ParserResult<String> {
    context(
        "variable",
        map(preceded(char('$'), identifier), str::to_string),
    )(input)
}

fn string_literal(input: &str) -> ParserResult<String> {
    context(
        "string literal",
        delimited(
            char('"'),
            map(
                opt(escaped_transform(
                    is_not("\\\""),
                    '\\',
                    alt((
                        value("\\", tag("\\")),
                        value("\"", tag("\"")),
                        value("/", tag("/")),
                        value("\n", tag("n")),
                        value("\r", tag("r")),
                        value("\t", tag("t")),
                    )),
                )),
                Option::unwrap_or_default,
            ),
            char('"'),
        ),
    )(input)
}

fn number(input: &str) -> ParserResult<Value> {
    context(
        "number",
        map_res(
            recognize(tuple((
                digit1,
                opt(pair(char('.'), digit1)),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            ))),
            |s: &str| parse_number(s).ok_or("invalid number"),
        ),
    )(input)
}

/// `comma ('as' $name '|' pipe | '|' pipe)?`
fn pipe(input: &str) -> ParserResult<Expr> {
    let (input, lhs) = comma(input)?;
    if let Ok((rest, name)) = preceded(ws(keyword("as")), ws(variable))(input) {
        let (rest, _) = ws(char('|'))(rest)?;
        let (rest, body) = pipe(rest)?;
        return Ok((
            rest,
            Expr::Bind {
                source: Box::new(lhs),
                name,
                body: Box::new(body),
            },
        ));
    }
    if let Ok((rest, _)) = ws(char::<&str, VerboseError<&str>>('|'))(input) {
        let (rest, rhs) = pipe(rest)?;
        return Ok((rest, Expr::Pipe(Box::new(lhs), Box::new(rhs))));
    }
    Ok((input, lhs))
}

fn comma(input: &str) -> ParserResult<Expr> {
    let (input, first) = alternative(input)?;
    let (input, rest) = many0(preceded(ws(char(',')), alternative))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, e| Expr::Comma(Box::new(acc), Box::new(e))),
    ))
}

/// `a // b`, right associative.
fn alternative(input: &str) -> ParserResult<Expr> {
    let (input, lhs) = or_expr(input)?;
    if let Ok((rest, _)) = ws(tag::<&str, &str, VerboseError<&str>>("//"))(input) {
        let (rest, rhs) = alternative(rest)?;
        return Ok((rest, Expr::Binary(BinOp::Alt, Box::new(lhs), Box::new(rhs))));
    }
    Ok((input, lhs))
}

fn fold_binary(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |acc, (op, rhs)| {
        Expr::Binary(op, Box::new(acc), Box::new(rhs))
    })
}

fn or_expr(input: &str) -> ParserResult<Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(pair(
        ws(value(BinOp::Or, keyword("or"))),
        and_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn and_expr(input: &str) -> ParserResult<Expr> {
    let (input, first) = comparison(input)?;
    let (input, rest) = many0(pair(
        ws(value(BinOp::And, keyword("and"))),
        comparison,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn comparison_op(input: &str) -> ParserResult<BinOp> {
    alt((
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, tag("<")),
        value(BinOp::Gt, tag(">")),
    ))(input)
}

/// Comparisons are not associative: `a < b < c` is a syntax error.
fn comparison(input: &str) -> ParserResult<Expr> {
    let (input, lhs) = additive(input)?;
    let (input, rhs) = opt(pair(ws(comparison_op), additive))(input)?;
    Ok(match rhs {
        Some((op, rhs)) => (input, Expr::Binary(op, Box::new(lhs), Box::new(rhs))),
        None => (input, lhs),
    })
}

fn additive(input: &str) -> ParserResult<Expr> {
    let (input, first) = multiplicative(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Add, char('+')),
            value(BinOp::Sub, char('-')),
        ))),
        multiplicative,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn multiplicative(input: &str) -> ParserResult<Expr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Mul, char('*')),
            value(BinOp::Div, terminated(char('/'), not(char('/')))),
            value(BinOp::Mod, char('%')),
        ))),
        unary,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn unary(input: &str) -> ParserResult<Expr> {
    alt((
        map(preceded(ws(char('-')), postfix), |e| Expr::Neg(Box::new(e))),
        postfix,
    ))(input)
}

#[derive(Clone)]
enum Suffix {
    Index(Expr),
    Iterate,
    Optional,
}

fn bracket_suffix(input: &str) -> ParserResult<Suffix> {
    preceded(
        char('['),
        alt((
            map(ws(char(']')), |_| Suffix::Iterate),
            map(terminated(pipe, ws(char(']'))), Suffix::Index),
        )),
    )(input)
}

fn suffix(input: &str) -> ParserResult<Suffix> {
    alt((
        map(
            preceded(
                char('.'),
                alt((map(identifier, str::to_string), string_literal)),
            ),
            |name| Suffix::Index(Expr::Literal(Value::String(name))),
        ),
        preceded(opt(char('.')), bracket_suffix),
        value(Suffix::Optional, char('?')),
    ))(input)
}

fn postfix(input: &str) -> ParserResult<Expr> {
    let (mut input, mut expr) = ws(primary)(input)?;
    while let Ok((rest, s)) = suffix(input) {
        expr = match s {
            Suffix::Index(index) => Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            },
            Suffix::Iterate => Expr::Iterate(Box::new(expr)),
            Suffix::Optional => Expr::Optional(Box::new(expr)),
        };
        input = rest;
    }
    Ok((input, expr))
}

fn dot(input: &str) -> ParserResult<Expr> {
    let (input, _) = char('.')(input)?;
    let (input, name) = opt(alt((map(identifier, str::to_string), string_literal)))(input)?;
    Ok((
        input,
        match name {
            Some(name) => Expr::field(Expr::Identity, name),
            None => Expr::Identity,
        },
    ))
}

fn if_tail(input: &str) -> ParserResult<Option<Box<Expr>>> {
    if let Ok((rest, _)) = ws(keyword("elif"))(input) {
        let (rest, cond) = pipe(rest)?;
        let (rest, _) = ws(keyword("then"))(rest)?;
        let (rest, then) = pipe(rest)?;
        let (rest, otherwise) = if_tail(rest)?;
        return Ok((
            rest,
            Some(Box::new(Expr::If {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise,
            })),
        ));
    }
    if let Ok((rest, _)) = ws(keyword("else"))(input) {
        let (rest, otherwise) = pipe(rest)?;
        let (rest, _) = ws(keyword("end"))(rest)?;
        return Ok((rest, Some(Box::new(otherwise))));
    }
    let (rest, _) = ws(keyword("end"))(input)?;
    Ok((rest, None))
}

fn if_expr(input: &str) -> ParserResult<Expr> {
    let (input, _) = keyword("if")(input)?;
    let (input, cond) = pipe(input)?;
    let (input, _) = ws(keyword("then"))(input)?;
    let (input, then) = pipe(input)?;
    let (input, otherwise) = if_tail(input)?;
    Ok((
        input,
        Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise,
        },
    ))
}

fn array(input: &str) -> ParserResult<Expr> {
    context(
        "array",
        map(
            delimited(char('['), opt(pipe), ws(char(']'))),
            |inner| Expr::Array(inner.map(Box::new)),
        ),
    )(input)
}

fn object_entry(input: &str) -> ParserResult<(ObjectKey, Option<Expr>)> {
    verify(
        pair(
            alt((
                map(identifier, |s| ObjectKey::Name(s.to_string())),
                map(string_literal, ObjectKey::Name),
                map(
                    delimited(char('('), pipe, ws(char(')'))),
                    ObjectKey::Expr,
                ),
            )),
            opt(preceded(ws(char(':')), alternative)),
        ),
        |entry: &(ObjectKey, Option<Expr>)| matches!(entry.0, ObjectKey::Name(_)) || entry.1.is_some(),
    )(input)
}

fn object(input: &str) -> ParserResult<Expr> {
    context(
        "object",
        map(
            delimited(
                char('{'),
                separated_list0(ws(char(',')), ws(object_entry)),
                ws(char('}')),
            ),
            Expr::Object,
        ),
    )(input)
}

fn call(input: &str) -> ParserResult<Expr> {
    let (input, name) = verify(identifier, |s: &str| !RESERVED.contains(&s))(input)?;
    let (input, args) = opt(delimited(
        char('('),
        separated_list1(ws(char(';')), pipe),
        ws(char(')')),
    ))(input)?;
    Ok((input, Expr::Call(name.to_string(), args.unwrap_or_default())))
}

fn primary(input: &str) -> ParserResult<Expr> {
    alt((
        map(number, Expr::Literal),
        map(string_literal, |s| Expr::Literal(Value::String(s))),
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        value(Expr::Literal(Value::Null), keyword("null")),
        if_expr,
        map(variable, Expr::Var),
        array,
        object,
        delimited(char('('), pipe, ws(char(')'))),
        dot,
        call,
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_field_chain() {
        let expr = parse(".data.inline.x.v").unwrap();
        let expected = Expr::field(
            Expr::field(
                Expr::field(Expr::field(Expr::Identity, "data"), "inline"),
                "x",
            ),
            "v",
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3 == 7 and true").unwrap();
        match expr {
            Expr::Binary(BinOp::And, lhs, _) => match *lhs {
                Expr::Binary(BinOp::Eq, sum, _) => {
                    assert!(matches!(*sum, Expr::Binary(BinOp::Add, _, _)))
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pipe_binds_loosest() {
        let expr = parse(".a, .b | length").unwrap();
        assert!(matches!(expr, Expr::Pipe(lhs, _) if matches!(*lhs, Expr::Comma(_, _))));
    }

    #[test]
    fn test_alternative_is_not_division() {
        let expr = parse(".a // 4 / 2").unwrap();
        assert!(matches!(expr, Expr::Binary(BinOp::Alt, _, rhs) if matches!(*rhs, Expr::Binary(BinOp::Div, _, _))));
    }

    #[test]
    fn test_reserved_words_are_not_calls() {
        assert!(parse("if . then 1 else 2 end").is_ok());
        assert!(parse("then").is_err());
        assert!(parse(".end").is_ok());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            parse(r#""a\"b\n""#).unwrap(),
            Expr::Literal(Value::from("a\"b\n"))
        );
        assert_eq!(parse(r#""""#).unwrap(), Expr::Literal(Value::from("")));
    }

    #[test]
    fn test_syntax_error_offset() {
        match parse(".a | | .b") {
            Err(QueryError::Parse { offset, .. }) => assert!(offset >= 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
