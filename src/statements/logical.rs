//! Grouping of tokens into logical lines, plus the small token-level
//! queries the classifier asks of each line.

use super::constant::is_failing_assert;
use super::tokenizer::{Token, TokenKind};

const COMPOUND_KEYWORDS: [&str; 14] = [
    "if", "elif", "else", "for", "while", "try", "except", "finally", "with", "def", "class",
    "match", "case", "async",
];

const KEYWORDS: [&str; 35] = [
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// One logical line: the significant tokens between two NEWLINE tokens.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    pub tokens: Vec<Token>,
    /// Block nesting level (number of open INDENTs).
    pub depth: usize,
    pub first_line: u32,
    pub last_line: u32,
}

pub fn logical_lines(tokens: Vec<Token>) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0usize;

    for token in tokens {
        match token.kind {
            TokenKind::Indent => depth += 1,
            TokenKind::Dedent => depth = depth.saturating_sub(1),
            TokenKind::Comment | TokenKind::Nl | TokenKind::EndMarker => {}
            TokenKind::Newline => {
                if current.is_empty() {
                    continue;
                }
                let first_line = current[0].start_line;
                let last_line = current
                    .iter()
                    .map(|t| t.end_line)
                    .max()
                    .unwrap_or(first_line)
                    .max(token.start_line);
                lines.push(LogicalLine {
                    tokens: std::mem::take(&mut current),
                    depth,
                    first_line,
                    last_line,
                });
            }
            _ => current.push(token),
        }
    }
    lines
}

impl LogicalLine {
    /// The compound-statement keyword this line opens with, if any.
    /// `async def` / `async for` / `async with` report the second word.
    pub fn keyword(&self) -> Option<&str> {
        let mut tokens = self.tokens.as_slice();
        if tokens.len() > 1
            && tokens[0].is_name("async")
            && ["def", "for", "with"].iter().any(|k| tokens[1].is_name(k))
        {
            tokens = &tokens[1..];
        }
        let first = tokens.first()?;
        if first.kind != TokenKind::Name || !COMPOUND_KEYWORDS.contains(&first.text.as_str()) {
            return None;
        }
        match first.text.as_str() {
            "async" => None,
            "match" | "case" => {
                if is_soft_keyword_use(&tokens[1..]) && top_level_colon(tokens).is_some() {
                    Some(first.text.as_str())
                } else {
                    None
                }
            }
            kw => Some(kw),
        }
    }

    pub fn is_decorator(&self) -> bool {
        self.tokens.first().is_some_and(|t| t.is_op("@"))
    }

    /// Line ends with `:` and so opens an indented block.
    pub fn opens_block(&self) -> bool {
        self.tokens.last().is_some_and(|t| t.is_op(":"))
    }

    /// Tokens after the header colon of a compound statement.
    pub fn inline_body(&self) -> &[Token] {
        match top_level_colon(&self.tokens) {
            Some(i) => &self.tokens[i + 1..],
            None => &[],
        }
    }

    /// Line of the last colon at bracket depth zero, lambda colons included.
    pub fn last_bare_colon_line(&self) -> Option<u32> {
        let mut nesting = 0i32;
        let mut found = None;
        for token in &self.tokens {
            if token.kind != TokenKind::Op {
                continue;
            }
            match token.text.as_str() {
                "(" | "[" | "{" => nesting += 1,
                ")" | "]" | "}" => nesting -= 1,
                ":" if nesting == 0 => found = Some(token.end_line),
                _ => {}
            }
        }
        found
    }
}

/// After `match`/`case`, the next token decides keyword versus identifier:
/// `match x:` is a statement, `match = 1` or `match.group()` is not.
fn is_soft_keyword_use(rest: &[Token]) -> bool {
    match rest.first() {
        None => false,
        Some(t) if t.kind == TokenKind::Op => {
            ["(", "[", "{", "-", "*", "~"].contains(&t.text.as_str())
        }
        Some(_) => true,
    }
}

/// Index of the first colon at bracket depth zero that does not belong to a
/// lambda.
pub fn top_level_colon(tokens: &[Token]) -> Option<usize> {
    let mut nesting = 0i32;
    let mut lambdas = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        if nesting == 0 && token.is_name("lambda") {
            lambdas += 1;
            continue;
        }
        if token.kind != TokenKind::Op {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => nesting += 1,
            ")" | "]" | "}" => nesting -= 1,
            ":" if nesting == 0 => {
                if lambdas > 0 {
                    lambdas -= 1;
                } else {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `;` at bracket depth zero.
pub fn simple_statements(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut nesting = 0i32;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Op {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => nesting += 1,
            ")" | "]" | "}" => nesting -= 1,
            ";" if nesting == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts.retain(|p| !p.is_empty());
    parts
}

/// Split on tokens matching `is_separator` at bracket depth zero. Always
/// returns at least one (possibly empty) part.
pub fn split_top_level(tokens: &[Token], is_separator: impl Fn(&Token) -> bool) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut nesting = 0i32;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind == TokenKind::Op {
            match token.text.as_str() {
                "(" | "[" | "{" => nesting += 1,
                ")" | "]" | "}" => nesting -= 1,
                _ => {}
            }
        }
        if nesting == 0 && is_separator(token) {
            parts.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// `return`, `raise`, `break`, `continue`, or an `assert` that always fails.
pub fn is_terminator(stmt: &[Token]) -> bool {
    let keyword = stmt.first().is_some_and(|t| {
        t.kind == TokenKind::Name
            && matches!(t.text.as_str(), "return" | "raise" | "break" | "continue")
    });
    keyword || is_failing_assert(stmt)
}

pub fn is_break(stmt: &[Token]) -> bool {
    stmt.first().is_some_and(|t| t.is_name("break"))
}

/// A `case` header whose pattern matches every subject: a wildcard or a
/// bare capture name, possibly parenthesized, bound with `as`, or as one
/// alternative of an or-pattern. Guarded cases never qualify.
pub fn is_irrefutable_case(tokens: &[Token]) -> bool {
    match top_level_colon(tokens) {
        Some(colon) if colon > 1 => {
            let pattern = &tokens[1..colon];
            split_top_level(pattern, |t| t.is_name("if")).len() == 1
                && irrefutable_pattern(pattern)
        }
        _ => false,
    }
}

fn irrefutable_pattern(pattern: &[Token]) -> bool {
    let alternatives = split_top_level(pattern, |t| t.is_op("|"));
    if alternatives.len() > 1 {
        return alternatives.into_iter().any(irrefutable_pattern);
    }
    let bound = split_top_level(pattern, |t| t.is_name("as"));
    if bound.len() == 2 {
        return irrefutable_pattern(bound[0]);
    }
    match pattern {
        [open, inner @ .., close] if open.is_op("(") && close.is_op(")") => {
            irrefutable_pattern(inner)
        }
        [name] => {
            name.kind == TokenKind::Name && !matches!(name.text.as_str(), "True" | "False" | "None")
        }
        _ => false,
    }
}

/// `name: type` with no value. Compiles to nothing inside a function body.
pub fn is_bare_annotation(stmt: &[Token]) -> bool {
    let Some(first) = stmt.first() else {
        return false;
    };
    if first.kind != TokenKind::Name || KEYWORDS.contains(&first.text.as_str()) {
        return false;
    }
    let mut nesting = 0i32;
    let mut has_colon = false;
    for token in stmt {
        if token.kind != TokenKind::Op {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => nesting += 1,
            ")" | "]" | "}" => nesting -= 1,
            ":" if nesting == 0 => has_colon = true,
            "=" if nesting == 0 => return false,
            _ => {}
        }
    }
    has_colon
}

/// A plain `str` literal expression, possibly implicitly concatenated or
/// parenthesized. f-strings and bytes do not qualify.
pub fn is_string_expression(stmt: &[Token]) -> bool {
    let mut tokens = stmt;
    while tokens.len() >= 2 && tokens[0].is_op("(") && tokens[tokens.len() - 1].is_op(")") {
        tokens = &tokens[1..tokens.len() - 1];
    }
    !tokens.is_empty()
        && tokens.iter().all(|t| {
            if t.kind != TokenKind::String {
                return false;
            }
            let prefix = t.string_prefix();
            !prefix.contains('f') && !prefix.contains('b') && !prefix.contains('t')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statements::tokenizer::tokenize;

    fn lines(source: &str) -> Vec<LogicalLine> {
        logical_lines(tokenize(source).unwrap())
    }

    #[test]
    fn test_logical_line_spans() {
        let ls = lines("x = [\n    1,\n]\ny = 2\n");
        assert_eq!(ls.len(), 2);
        assert_eq!((ls[0].first_line, ls[0].last_line), (1, 3));
        assert_eq!((ls[1].first_line, ls[1].last_line), (4, 4));
    }

    #[test]
    fn test_depth_tracking() {
        let ls = lines("def f():\n    if x:\n        pass\n    return 1\n");
        let depths: Vec<usize> = ls.iter().map(|l| l.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 1]);
    }

    #[test]
    fn test_keywords() {
        let ls = lines(
            "async def f():\n    pass\nmatch x:\n    case 1:\n        pass\nmatch = 3\nx = 1\n",
        );
        let kws: Vec<Option<&str>> = ls.iter().map(|l| l.keyword()).collect();
        assert_eq!(
            kws,
            vec![Some("def"), None, Some("match"), Some("case"), None, None, None]
        );
    }

    #[test]
    fn test_top_level_colon_skips_lambda_and_brackets() {
        let ls = lines("if f(lambda: 1, {1: 2}): x = lambda y: y\n");
        let body = ls[0].inline_body();
        assert_eq!(body[0].text, "x");
    }

    #[test]
    fn test_simple_statements_split() {
        let ls = lines("a = 1; b = (2; 3) if False else 0; c\n");
        // The parenthesized semicolon is nonsense Python but must not split.
        assert_eq!(simple_statements(&ls[0].tokens).len(), 3);
    }

    #[test]
    fn test_bare_annotation() {
        let ls = lines("x: int\ny: int = 3\nlambda: 0\nz[0]: str\n");
        let flags: Vec<bool> = ls.iter().map(|l| is_bare_annotation(&l.tokens)).collect();
        assert_eq!(flags, vec![true, false, false, true]);
    }

    #[test]
    fn test_irrefutable_case() {
        let ls = lines(
            "match x:\n    case 1:\n        pass\n    case _:\n        pass\n    case y:\n        pass\n\
             \x20   case _ if y:\n        pass\n    case (1 | other):\n        pass\n\
             \x20   case a.b:\n        pass\n    case None:\n        pass\n    case _ as z:\n        pass\n",
        );
        let flags: Vec<bool> = ls
            .iter()
            .filter(|l| l.keyword() == Some("case"))
            .map(|l| is_irrefutable_case(&l.tokens))
            .collect();
        assert_eq!(flags, vec![false, true, true, false, true, false, false, true]);
    }

    #[test]
    fn test_failing_assert_terminates() {
        let ls = lines("assert False, 'unreachable'\nassert x\nassert 0\n");
        let flags: Vec<bool> = ls.iter().map(|l| is_terminator(&l.tokens)).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_string_expression() {
        let ls = lines("'a'\n('a' 'b')\nf'a'\nb'a'\n'a' + 'b'\nu'a'\n");
        let flags: Vec<bool> = ls.iter().map(|l| is_string_expression(&l.tokens)).collect();
        assert_eq!(flags, vec![true, true, false, false, false, true]);
    }
}
