//! Recursive-descent parser for visibility expressions.
//!
//! ```text
//! expression  := conjunction ( '|' conjunction )*
//! conjunction := unary ( '&' unary )*
//! unary       := '!' unary | primary
//! primary     := '(' expression ')' | quoted | label
//! ```
//!
//! Whitespace is allowed around every token.

use smol_str::SmolStr;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, preceded, repeat, separated};
use winnow::error::{ContextError, ErrMode};
use winnow::token::{none_of, one_of, take_while};
use winnow::{ModalResult, Parser};

use crate::error::{VisibilityError, VisibilityResult};
use crate::visibility::VisibilityExpr;

/// Characters allowed in an unquoted label.
#[inline]
pub(crate) fn is_label_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/')
}

/// Parses `input` into an expression tree. Blank input yields `None` (always visible).
pub fn parse_visibility(input: &str) -> VisibilityResult<Option<VisibilityExpr>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    expression
        .parse(input)
        .map(Some)
        .map_err(|e| VisibilityError::Invalid {
            expression: input.to_string(),
            offset: e.offset(),
        })
}

fn token<'i>(c: char) -> impl Parser<&'i str, char, ErrMode<ContextError>> {
    delimited(multispace0, c, multispace0)
}

fn expression(input: &mut &str) -> ModalResult<VisibilityExpr> {
    let terms: Vec<VisibilityExpr> = separated(1.., conjunction, token('|')).parse_next(input)?;
    Ok(VisibilityExpr::or(terms))
}

fn conjunction(input: &mut &str) -> ModalResult<VisibilityExpr> {
    let terms: Vec<VisibilityExpr> = separated(1.., unary, token('&')).parse_next(input)?;
    Ok(VisibilityExpr::and(terms))
}

fn unary(input: &mut &str) -> ModalResult<VisibilityExpr> {
    alt((
        preceded(token('!'), cut_err(unary)).map(|e| VisibilityExpr::Not(Box::new(e))),
        primary,
    ))
    .parse_next(input)
}

fn primary(input: &mut &str) -> ModalResult<VisibilityExpr> {
    delimited(multispace0, alt((group, quoted_label, label)), multispace0).parse_next(input)
}

fn group(input: &mut &str) -> ModalResult<VisibilityExpr> {
    delimited('(', cut_err(expression), cut_err(')')).parse_next(input)
}

fn label(input: &mut &str) -> ModalResult<VisibilityExpr> {
    take_while(1.., is_label_char)
        .map(|s: &str| VisibilityExpr::Label(SmolStr::new(s)))
        .parse_next(input)
}

fn quoted_label(input: &mut &str) -> ModalResult<VisibilityExpr> {
    delimited(
        '"',
        repeat(
            0..,
            alt((none_of(['"', '\\']), preceded('\\', one_of(['"', '\\'])))),
        ),
        cut_err('"'),
    )
    .map(|s: String| VisibilityExpr::Label(SmolStr::new(s)))
    .parse_next(input)
}
