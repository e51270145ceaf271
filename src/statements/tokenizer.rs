//! Python tokenizer.
//!
//! Produces the token stream the statement classifier needs: names,
//! numbers, strings (including triple-quoted and f-strings with nested
//! replacement fields), operators, comments, and the layout tokens
//! NEWLINE / NL / INDENT / DEDENT. Line numbers are 1-based.
//!
//! This is not a validating parser. It rejects what the CPython tokenizer
//! rejects (unterminated strings, unbalanced brackets, bad dedents, stray
//! characters) and leaves grammar to the caller.

use crate::error::ParseError;

const TAB_SIZE: usize = 8;

const OPERATORS_3: [&str; 5] = ["**=", "//=", ">>=", "<<=", "..."];
const OPERATORS_2: [&str; 20] = [
    "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "@=", ":=", "<>",
];
const OPERATORS_1: &str = "+-*/%@&|^~<>()[]{},:;.=!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Name,
    Number,
    String,
    Op,
    Comment,
    /// End of a logical line.
    Newline,
    /// Line break that does not end a logical line (blank line, comment-only
    /// line, or inside brackets).
    Nl,
    Indent,
    Dedent,
    EndMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl Token {
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    pub fn is_name(&self, name: &str) -> bool {
        self.kind == TokenKind::Name && self.text == name
    }

    /// Lowercased string prefix (`""`, `"f"`, `"rb"`, ...). Empty for
    /// non-string tokens.
    pub fn string_prefix(&self) -> String {
        if self.kind != TokenKind::String {
            return String::new();
        }
        self.text
            .chars()
            .take_while(|c| *c != '"' && *c != '\'')
            .collect::<String>()
            .to_lowercase()
    }
}

/// Tokenize Python source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Tokenizer::new(source).run()
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    brackets: Vec<(char, u32)>,
    line_has_content: bool,
}

impl Tokenizer {
    fn new(source: &str) -> Self {
        let mut chars: Vec<char> = source.chars().collect();
        if chars.first() == Some(&'\u{feff}') {
            chars.remove(0);
        }
        Self {
            chars,
            pos: 0,
            line: 1,
            tokens: Vec::new(),
            indents: vec![0],
            brackets: Vec::new(),
            line_has_content: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Length of the line break at `pos + offset`, if there is one.
    fn newline_len(&self, offset: usize) -> Option<usize> {
        match self.peek(offset) {
            Some('\r') if self.peek(offset + 1) == Some('\n') => Some(2),
            Some('\r') | Some('\n') => Some(1),
            _ => None,
        }
    }

    fn text(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn push(&mut self, kind: TokenKind, text: String, start_line: u32) {
        if matches!(
            kind,
            TokenKind::Name | TokenKind::Number | TokenKind::String | TokenKind::Op
        ) {
            self.line_has_content = true;
        }
        self.tokens.push(Token {
            kind,
            text,
            start_line,
            end_line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start {
                at_line_start = false;
                let col = self.read_indent();
                match self.peek(0) {
                    None => break,
                    Some('#') => {
                        self.read_comment();
                        if self.consume_blank_line_break() {
                            at_line_start = true;
                        }
                        continue;
                    }
                    Some('\r') | Some('\n') => {
                        self.consume_blank_line_break();
                        at_line_start = true;
                        continue;
                    }
                    Some(_) => self.indent_to(col)?,
                }
            }

            let Some(c) = self.peek(0) else { break };
            match c {
                ' ' | '\t' | '\x0c' => self.pos += 1,
                '\0' => {
                    return Err(ParseError::new(
                        self.line,
                        "source code cannot contain null bytes",
                    ))
                }
                '#' => self.read_comment(),
                '\r' | '\n' => {
                    let start_line = self.line;
                    let n = self.newline_len(0).unwrap_or(1);
                    self.pos += n;
                    if self.brackets.is_empty() && self.line_has_content {
                        self.push(TokenKind::Newline, "\n".to_string(), start_line);
                        self.line_has_content = false;
                        at_line_start = true;
                    } else {
                        self.push(TokenKind::Nl, "\n".to_string(), start_line);
                        if self.brackets.is_empty() {
                            at_line_start = true;
                        }
                    }
                    self.line += 1;
                }
                '\\' => match self.newline_len(1) {
                    Some(n) => {
                        self.pos += 1 + n;
                        self.line += 1;
                    }
                    None if self.peek(1).is_none() => {
                        return Err(ParseError::new(
                            self.line,
                            "unexpected EOF while scanning line continuation",
                        ))
                    }
                    None => {
                        return Err(ParseError::new(
                            self.line,
                            "unexpected character after line continuation character",
                        ))
                    }
                },
                '"' | '\'' => self.read_string(self.pos)?,
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) =>
                {
                    self.read_number()
                }
                c if is_identifier_start(c) => self.read_name_or_string()?,
                _ => self.read_operator()?,
            }
        }

        if let Some(&(open, line)) = self.brackets.last() {
            return Err(ParseError::new(line, format!("'{open}' was never closed")));
        }
        if self.line_has_content {
            let line = self.line;
            self.push(TokenKind::Newline, String::new(), line);
        }
        let line = self.line;
        for _ in 1..self.indents.len() {
            self.push(TokenKind::Dedent, String::new(), line);
        }
        self.push(TokenKind::EndMarker, String::new(), line);
        Ok(self.tokens)
    }

    /// Consume the line break after a blank or comment-only line.
    fn consume_blank_line_break(&mut self) -> bool {
        match self.newline_len(0) {
            Some(n) => {
                let line = self.line;
                self.pos += n;
                self.push(TokenKind::Nl, "\n".to_string(), line);
                self.line += 1;
                true
            }
            None => false,
        }
    }

    fn read_indent(&mut self) -> usize {
        let mut col = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => col += 1,
                '\t' => col = (col / TAB_SIZE + 1) * TAB_SIZE,
                '\x0c' => col = 0,
                _ => break,
            }
            self.pos += 1;
        }
        col
    }

    fn indent_to(&mut self, col: usize) -> Result<(), ParseError> {
        let top = self.indents.last().copied().unwrap_or(0);
        if col > top {
            self.indents.push(col);
            let line = self.line;
            self.push(TokenKind::Indent, String::new(), line);
            return Ok(());
        }
        while col < self.indents.last().copied().unwrap_or(0) {
            self.indents.pop();
            let line = self.line;
            self.push(TokenKind::Dedent, String::new(), line);
        }
        if col != self.indents.last().copied().unwrap_or(0) {
            return Err(ParseError::new(
                self.line,
                "unindent does not match any outer indentation level",
            ));
        }
        Ok(())
    }

    fn read_comment(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            if c == '\r' || c == '\n' {
                break;
            }
            self.pos += 1;
        }
        let line = self.line;
        let text = self.text(start);
        self.tokens.push(Token {
            kind: TokenKind::Comment,
            text,
            start_line: line,
            end_line: line,
        });
    }

    fn read_number(&mut self) {
        let start = self.pos;
        let radix_prefixed = self.peek(0) == Some('0')
            && matches!(self.peek(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'));
        while let Some(c) = self.peek(0) {
            if !(c.is_ascii_alphanumeric() || c == '_' || c == '.') {
                break;
            }
            self.pos += 1;
            if !radix_prefixed && (c == 'e' || c == 'E') && matches!(self.peek(0), Some('+' | '-'))
            {
                self.pos += 1;
            }
        }
        let line = self.line;
        let text = self.text(start);
        self.push(TokenKind::Number, text, line);
    }

    fn read_name_or_string(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        while self.peek(0).is_some_and(is_identifier_continue) {
            self.pos += 1;
        }
        if matches!(self.peek(0), Some('"' | '\'')) && is_string_prefix(&self.text(start)) {
            return self.read_string(start);
        }
        let line = self.line;
        let text = self.text(start);
        self.push(TokenKind::Name, text, line);
        Ok(())
    }

    /// Read a string literal whose prefix starts at `start`; `self.pos` is at
    /// the opening quote.
    fn read_string(&mut self, start: usize) -> Result<(), ParseError> {
        let prefix = self.text(start).to_lowercase();
        let formatted = prefix.contains('f') || prefix.contains('t');
        let Some(quote) = self.peek(0) else {
            return Err(ParseError::new(self.line, "unterminated string literal"));
        };
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let start_line = self.line;
        self.pos += if triple { 3 } else { 1 };
        self.scan_string_body(quote, triple, formatted, start_line)?;
        let text = self.text(start);
        self.push(TokenKind::String, text, start_line);
        Ok(())
    }

    fn scan_string_body(
        &mut self,
        quote: char,
        triple: bool,
        formatted: bool,
        start_line: u32,
    ) -> Result<(), ParseError> {
        loop {
            let Some(c) = self.peek(0) else {
                let message = if triple {
                    "unterminated triple-quoted string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(ParseError::new(start_line, message));
            };
            match c {
                '\\' => {
                    self.pos += 1;
                    if let Some(n) = self.newline_len(0) {
                        self.pos += n;
                        self.line += 1;
                    } else if self.peek(0).is_some() {
                        self.pos += 1;
                    }
                }
                '\r' | '\n' => {
                    if !triple {
                        return Err(ParseError::new(start_line, "unterminated string literal"));
                    }
                    self.pos += self.newline_len(0).unwrap_or(1);
                    self.line += 1;
                }
                c if c == quote => {
                    if !triple {
                        self.pos += 1;
                        return Ok(());
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        return Ok(());
                    }
                    self.pos += 1;
                }
                '{' if formatted => {
                    if self.peek(1) == Some('{') {
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        self.scan_replacement_field(start_line)?;
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Skip an f-string replacement field up to and including its closing
    /// brace. Nested brackets, format-spec fields and string literals are
    /// balanced along the way.
    fn scan_replacement_field(&mut self, start_line: u32) -> Result<(), ParseError> {
        let mut depth = 0usize;
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ParseError::new(
                    start_line,
                    "f-string: expecting '}'",
                ));
            };
            match c {
                '(' | '[' | '{' => {
                    depth += 1;
                    self.pos += 1;
                }
                ')' | ']' => {
                    depth = depth.saturating_sub(1);
                    self.pos += 1;
                }
                '}' => {
                    self.pos += 1;
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                '"' | '\'' => {
                    let triple = self.peek(1) == Some(c) && self.peek(2) == Some(c);
                    let line = self.line;
                    self.pos += if triple { 3 } else { 1 };
                    self.scan_string_body(c, triple, false, line)?;
                }
                '\r' | '\n' => {
                    self.pos += self.newline_len(0).unwrap_or(1);
                    self.line += 1;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn read_operator(&mut self) -> Result<(), ParseError> {
        let line = self.line;
        for op in OPERATORS_3.iter().chain(OPERATORS_2.iter()) {
            if self.matches(op) {
                self.pos += op.chars().count();
                self.push(TokenKind::Op, (*op).to_string(), line);
                return Ok(());
            }
        }

        let Some(c) = self.peek(0) else {
            return Ok(());
        };
        if !OPERATORS_1.contains(c) {
            return Err(ParseError::new(line, format!("invalid character '{c}'")));
        }
        match c {
            '(' | '[' | '{' => self.brackets.push((c, line)),
            ')' | ']' | '}' => {
                let Some((open, _)) = self.brackets.pop() else {
                    return Err(ParseError::new(line, format!("unmatched '{c}'")));
                };
                if closing_for(open) != c {
                    return Err(ParseError::new(
                        line,
                        format!(
                            "closing parenthesis '{c}' does not match opening parenthesis '{open}'"
                        ),
                    ));
                }
            }
            _ => {}
        }
        self.pos += 1;
        self.push(TokenKind::Op, c.to_string(), line);
        Ok(())
    }

    fn matches(&self, op: &str) -> bool {
        op.chars()
            .enumerate()
            .all(|(i, c)| self.peek(i) == Some(c))
    }
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || unicode_ident::is_xid_start(c)
}

fn is_identifier_continue(c: char) -> bool {
    unicode_ident::is_xid_continue(c)
}

fn is_string_prefix(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "r" | "u" | "b" | "br" | "rb" | "f" | "fr" | "rf" | "t" | "tr" | "rt"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn significant(source: &str) -> Vec<(TokenKind, String, u32, u32)> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .filter(|t| {
                matches!(
                    t.kind,
                    TokenKind::Name | TokenKind::Number | TokenKind::String | TokenKind::Op
                )
            })
            .map(|t| (t.kind, t.text, t.start_line, t.end_line))
            .collect()
    }

    #[test]
    fn test_simple_statement() {
        use TokenKind::*;
        assert_eq!(
            kinds("x = 1\n"),
            vec![Name, Op, Number, Newline, EndMarker]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        use TokenKind::*;
        assert_eq!(
            kinds("if x:\n    y\nz\n"),
            vec![
                Name, Name, Op, Newline, Indent, Name, Newline, Dedent, Name, Newline, EndMarker
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_are_nl() {
        use TokenKind::*;
        assert_eq!(
            kinds("# header\n\nx\n"),
            vec![Comment, Nl, Nl, Name, Newline, EndMarker]
        );
    }

    #[test]
    fn test_missing_final_newline() {
        use TokenKind::*;
        assert_eq!(kinds("x"), vec![Name, Newline, EndMarker]);
    }

    #[test]
    fn test_brackets_suppress_newline() {
        use TokenKind::*;
        assert_eq!(
            kinds("f(\n  1,\n)\n"),
            vec![Name, Op, Nl, Number, Op, Nl, Op, Newline, EndMarker]
        );
    }

    #[test]
    fn test_backslash_continuation() {
        let toks = significant("x = 1 + \\\n    2\n");
        assert_eq!(toks.last().unwrap().2, 2);
        let newline = tokenize("x = 1 + \\\n    2\n")
            .unwrap()
            .into_iter()
            .find(|t| t.kind == TokenKind::Newline)
            .unwrap();
        assert_eq!(newline.start_line, 2);
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let toks = significant("s = \"\"\"a\nb\nc\"\"\"\n");
        let s = &toks[2];
        assert_eq!(s.0, TokenKind::String);
        assert_eq!((s.2, s.3), (1, 3));
    }

    #[test]
    fn test_string_prefixes() {
        let toks = tokenize("x = rb'\\d' + F\"{y}\"\n").unwrap();
        let strings: Vec<String> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::String)
            .map(Token::string_prefix)
            .collect();
        assert_eq!(strings, vec!["rb".to_string(), "f".to_string()]);
    }

    #[test]
    fn test_fstring_nested_quotes_and_braces() {
        let source = "x = f\"{d[\"key\"]:{width}} {{literal}}\"\ny = 2\n";
        let toks = significant(source);
        assert_eq!(toks[2].0, TokenKind::String);
        assert_eq!(toks[3].1, "y");
        assert_eq!(toks[3].2, 2);
    }

    #[test]
    fn test_tabs_expand_to_eight_columns() {
        // A tab and eight spaces are the same indentation level.
        assert!(tokenize("if x:\n\ty = 1\n        z = 2\n").is_ok());
    }

    #[test]
    fn test_operators_longest_match() {
        let ops: Vec<String> = significant("a **= b // c -> d := e\n")
            .into_iter()
            .filter(|t| t.0 == TokenKind::Op)
            .map(|t| t.1)
            .collect();
        assert_eq!(ops, vec!["**=", "//", "->", ":="]);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc\ny = 1\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_unterminated_triple_quoted_string() {
        let err = tokenize("x = 1\ns = '''abc\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("triple-quoted"));
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = tokenize("x = [1,\n2\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("never closed"));
    }

    #[test]
    fn test_mismatched_bracket() {
        let err = tokenize("x = (1]\n").unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_unmatched_closer() {
        let err = tokenize("x = 1)\n").unwrap_err();
        assert!(err.message.contains("unmatched"));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n    y\n  z\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn test_null_byte() {
        assert!(tokenize("x = 1\0\n").is_err());
    }

    #[test]
    fn test_non_ascii_identifiers() {
        // Devanagari with a virama, and a combining acute accent.
        let names: Vec<String> = significant("नमस्ते = 1\nx\u{301} = 2\n")
            .into_iter()
            .filter(|(kind, ..)| *kind == TokenKind::Name)
            .map(|(_, text, ..)| text)
            .collect();
        assert_eq!(names, vec!["नमस्ते".to_string(), "x\u{301}".to_string()]);
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("x = $\n").unwrap_err();
        assert!(err.message.contains("invalid character"));
    }
}
