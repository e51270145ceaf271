//! Truth values of branch tests the Python compiler folds at compile time.
//!
//! `True`, `False`, `None`, `...`, `__debug__`, numeric and string literals
//! are constants; `not`, `and`, `or` and parentheses over them are folded
//! with short-circuit order respected. Anything else may go either way.

use super::logical::{split_top_level, top_level_colon};
use super::tokenizer::{Token, TokenKind};

/// Which outcomes of a test are reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truth {
    pub can_true: bool,
    pub can_false: bool,
}

impl Truth {
    pub const UNKNOWN: Truth = Truth {
        can_true: true,
        can_false: true,
    };

    fn constant(value: bool) -> Self {
        Self {
            can_true: value,
            can_false: !value,
        }
    }

    fn negate(self) -> Self {
        Self {
            can_true: self.can_false,
            can_false: self.can_true,
        }
    }
}

/// Truth of the test in an `if`/`elif`/`while` header line.
pub fn header_test(tokens: &[Token]) -> Truth {
    let Some(colon) = top_level_colon(tokens) else {
        return Truth::UNKNOWN;
    };
    match tokens.get(1..colon) {
        Some(test) => truth(test),
        None => Truth::UNKNOWN,
    }
}

/// An `assert` statement whose test is always false: it always raises.
pub fn is_failing_assert(stmt: &[Token]) -> bool {
    if !stmt.first().is_some_and(|t| t.is_name("assert")) {
        return false;
    }
    let test = &stmt[1..];
    let end = split_top_level(test, |t| t.is_op(","))
        .first()
        .map_or(0, |part| part.len());
    !truth(&test[..end]).can_true
}

pub fn truth(tokens: &[Token]) -> Truth {
    if tokens.is_empty() || has_top_level(tokens, is_opaque) {
        return Truth::UNKNOWN;
    }

    // `or` binds loosest: true as soon as any operand is, false only when
    // every operand was.
    let mut result = Truth {
        can_true: false,
        can_false: true,
    };
    for operand in split_top_level(tokens, |t| t.is_name("or")) {
        let t = conjunction(operand);
        result.can_true |= result.can_false && t.can_true;
        result.can_false &= t.can_false;
    }
    result
}

fn conjunction(tokens: &[Token]) -> Truth {
    let mut result = Truth {
        can_true: true,
        can_false: false,
    };
    for operand in split_top_level(tokens, |t| t.is_name("and")) {
        let t = negation(operand);
        result.can_false |= result.can_true && t.can_false;
        result.can_true &= t.can_true;
    }
    result
}

fn negation(tokens: &[Token]) -> Truth {
    match tokens.split_first() {
        Some((first, rest)) if first.is_name("not") => negation(rest).negate(),
        _ => atom(tokens),
    }
}

fn atom(tokens: &[Token]) -> Truth {
    match tokens {
        [] => Truth::UNKNOWN,
        [open, inner @ .., close] if open.is_op("(") && close.is_op(")") && encloses(tokens) => {
            truth(inner)
        }
        [sign, number] if (sign.is_op("-") || sign.is_op("+")) && number.kind == TokenKind::Number => {
            Truth::constant(!is_zero(&number.text))
        }
        [token] => match token.kind {
            TokenKind::Number => Truth::constant(!is_zero(&token.text)),
            TokenKind::Name => match token.text.as_str() {
                "True" | "__debug__" => Truth::constant(true),
                "False" | "None" => Truth::constant(false),
                _ => Truth::UNKNOWN,
            },
            TokenKind::Op if token.text == "..." => Truth::constant(true),
            _ => strings(tokens),
        },
        _ => strings(tokens),
    }
}

/// Adjacent plain or bytes literals concatenate into one constant.
fn strings(tokens: &[Token]) -> Truth {
    let mut empty = true;
    for token in tokens {
        if token.kind != TokenKind::String {
            return Truth::UNKNOWN;
        }
        let prefix = token.string_prefix();
        if prefix.contains('f') || prefix.contains('t') {
            return Truth::UNKNOWN;
        }
        let quoted = &token.text[prefix.len()..];
        let quote = if quoted.starts_with("\"\"\"") || quoted.starts_with("'''") {
            6
        } else {
            2
        };
        empty &= quoted.len() == quote;
    }
    Truth::constant(!empty)
}

fn is_zero(number: &str) -> bool {
    let digits: String = number
        .chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    if let Some(rest) = ["0x", "0o", "0b"]
        .iter()
        .find_map(|prefix| digits.strip_prefix(prefix))
    {
        return rest.chars().all(|c| c == '0');
    }
    let digits = digits.trim_end_matches('j');
    let mantissa = digits.split('e').next().unwrap_or("");
    mantissa.chars().all(|c| c == '0' || c == '.')
}

/// The first token's bracket closes at the last token.
fn encloses(tokens: &[Token]) -> bool {
    let mut nesting = 0i32;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Op {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => nesting += 1,
            ")" | "]" | "}" => {
                nesting -= 1;
                if nesting == 0 {
                    return i == tokens.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// Conditional expressions, lambdas, walruses and tuples are never folded
/// here.
fn is_opaque(token: &Token) -> bool {
    ["if", "else", "lambda"].iter().any(|k| token.is_name(k))
        || token.is_op(":=")
        || token.is_op(",")
}

fn has_top_level(tokens: &[Token], pred: impl Fn(&Token) -> bool) -> bool {
    split_top_level(tokens, pred).len() > 1
}
