//! Executable-statement extraction for Python source.
//!
//! Given the text of a Python file, report the set of line numbers that
//! coverage.py would count as statements: the first line of every logical
//! line that produces code, minus docstrings and minus lines excluded by
//! the exclusion pattern. The result is what "missing lines" are measured
//! against, so it has to agree with coverage.py line for line.

mod constant;
mod logical;
pub mod tokenizer;

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::DEFAULT_EXCLUDE;
use crate::error::ParseError;
use crate::model::LineSet;
use constant::header_test;
use logical::{
    is_bare_annotation, is_break, is_irrefutable_case, is_string_expression, is_terminator,
    logical_lines, simple_statements, LogicalLine,
};

static DEFAULT_PARSER: LazyLock<StatementParser> = LazyLock::new(StatementParser::default);

/// Statement lines of `text` with the default `# pragma: no cover` exclusion.
pub fn statements(text: &str) -> Result<LineSet, ParseError> {
    DEFAULT_PARSER.parse(text)
}

#[derive(Debug, Clone)]
pub struct StatementParser {
    exclude: Option<Regex>,
}

impl Default for StatementParser {
    fn default() -> Self {
        Self {
            exclude: Regex::new(DEFAULT_EXCLUDE).ok(),
        }
    }
}

impl StatementParser {
    /// Build a parser whose exclusion regex is the alternation of `patterns`.
    /// An empty list disables exclusion entirely.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        if patterns.is_empty() {
            return Ok(Self::without_exclusions());
        }
        let joined = patterns
            .iter()
            .map(|p| format!("(?:{})", p.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            exclude: Some(Regex::new(&joined)?),
        })
    }

    pub fn without_exclusions() -> Self {
        Self { exclude: None }
    }

    pub fn parse(&self, text: &str) -> Result<LineSet, ParseError> {
        let lines = logical_lines(tokenizer::tokenize(text)?);
        let matched = self.matching_lines(text);
        let analysis = Analysis::run(&lines, &matched)?;
        Ok(analysis.statements())
    }

    /// Physical lines the exclusion regex matches.
    fn matching_lines(&self, text: &str) -> BTreeSet<u32> {
        let Some(regex) = &self.exclude else {
            return BTreeSet::new();
        };
        physical_lines(text)
            .enumerate()
            .filter(|(_, line)| regex.is_match(line))
            .map(|(i, _)| i as u32 + 1)
            .collect()
    }
}

/// Split on `\r\n`, `\n` or a lone `\r`, the same breaks the tokenizer counts.
fn physical_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(text);
    std::iter::from_fn(move || {
        let s = rest?;
        match s.find(['\r', '\n']) {
            Some(i) => {
                let skip = if s[i..].starts_with("\r\n") { 2 } else { 1 };
                rest = Some(&s[i + skip..]);
                Some(&s[..i])
            }
            None => {
                rest = None;
                Some(s)
            }
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Module,
    Class,
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainKind {
    If,
    Try,
    Loop,
    Match,
    Case,
    Other,
}

/// Whether the clause just entered can run at all.
#[derive(Debug, Clone, Copy, Default)]
struct ClauseReach {
    header_dead: bool,
    body_dead: bool,
}

/// A compound statement whose clauses are still being read, tracking
/// whether control can fall out of the bottom of it.
#[derive(Debug)]
struct Chain {
    kind: ChainKind,
    line: u32,
    /// Keyword of the clause currently open.
    clause: String,
    branches_terminated: Vec<bool>,
    handlers_terminated: Vec<bool>,
    body_terminated: bool,
    else_terminated: Option<bool>,
    finally_terminated: Option<bool>,
    /// If: some test so far can be false. Loop: the loop can end without
    /// `break`.
    falls_through: bool,
    /// A live `break` leaves this loop.
    broke: bool,
    /// The latest `case` pattern matches anything.
    irrefutable: bool,
}

impl Chain {
    fn start(keyword: &str, line: &LogicalLine) -> (Self, ClauseReach) {
        let kind = match keyword {
            "if" => ChainKind::If,
            "try" => ChainKind::Try,
            "for" | "while" => ChainKind::Loop,
            "match" => ChainKind::Match,
            "case" => ChainKind::Case,
            _ => ChainKind::Other,
        };
        let mut chain = Self {
            kind,
            line: line.first_line,
            clause: keyword.to_string(),
            branches_terminated: Vec::new(),
            handlers_terminated: Vec::new(),
            body_terminated: false,
            else_terminated: None,
            finally_terminated: None,
            falls_through: true,
            broke: false,
            irrefutable: false,
        };
        let reach = chain.enter(keyword, line);
        (chain, reach)
    }

    /// Whether `keyword` continues this statement.
    fn accepts(&self, keyword: &str) -> bool {
        match (self.kind, keyword) {
            (ChainKind::If, "elif") => self.clause != "else",
            (ChainKind::If, "else") => self.clause != "else",
            (ChainKind::Loop, "else") => self.clause != "else",
            (ChainKind::Try, "except") => matches!(self.clause.as_str(), "try" | "except"),
            (ChainKind::Try, "else") => self.clause == "except",
            (ChainKind::Try, "finally") => self.clause != "finally",
            (ChainKind::Case, "case") => true,
            _ => false,
        }
    }

    /// Open the clause introduced by `line`.
    fn enter(&mut self, keyword: &str, line: &LogicalLine) -> ClauseReach {
        let reach = match (self.kind, keyword) {
            (ChainKind::If, "if" | "elif") => {
                let header_dead = !self.falls_through;
                let test = header_test(&line.tokens);
                self.falls_through &= test.can_false;
                ClauseReach {
                    header_dead,
                    body_dead: header_dead || !test.can_true,
                }
            }
            (ChainKind::If, "else") => {
                let dead = !self.falls_through;
                self.falls_through = false;
                ClauseReach {
                    header_dead: dead,
                    body_dead: dead,
                }
            }
            (ChainKind::Loop, "while") => {
                let test = header_test(&line.tokens);
                self.falls_through = test.can_false;
                ClauseReach {
                    header_dead: false,
                    body_dead: !test.can_true,
                }
            }
            (ChainKind::Loop, "else") => ClauseReach {
                header_dead: !self.falls_through,
                body_dead: !self.falls_through,
            },
            (ChainKind::Try, "else") => ClauseReach {
                header_dead: self.body_terminated,
                body_dead: self.body_terminated,
            },
            (ChainKind::Case, "case") => {
                self.irrefutable = is_irrefutable_case(&line.tokens);
                ClauseReach::default()
            }
            _ => ClauseReach::default(),
        };
        self.clause = keyword.to_string();
        reach
    }

    /// Record how the body of the current clause ended. A body that can
    /// never run counts as ended.
    fn close_clause(&mut self, terminated: bool) {
        match (self.kind, self.clause.as_str()) {
            (ChainKind::If | ChainKind::Case, _) => self.branches_terminated.push(terminated),
            (ChainKind::Try, "try") => self.body_terminated = terminated,
            (ChainKind::Try, "except") => self.handlers_terminated.push(terminated),
            (ChainKind::Try | ChainKind::Loop, "else") => self.else_terminated = Some(terminated),
            (ChainKind::Try, "finally") => self.finally_terminated = Some(terminated),
            (ChainKind::Match, _) => self.body_terminated = terminated,
            _ => {}
        }
    }

    fn validate(&self) -> Result<(), ParseError> {
        if self.kind == ChainKind::Try
            && self.handlers_terminated.is_empty()
            && self.finally_terminated.is_none()
        {
            return Err(ParseError::new(
                self.line,
                "expected 'except' or 'finally' block",
            ));
        }
        Ok(())
    }

    /// No path leaves the statement normally.
    fn terminates(&self) -> bool {
        match self.kind {
            ChainKind::If => {
                !self.falls_through
                    && !self.branches_terminated.is_empty()
                    && self.branches_terminated.iter().all(|t| *t)
            }
            ChainKind::Try => {
                if self.finally_terminated == Some(true) {
                    return true;
                }
                let falls_through =
                    !self.body_terminated && !self.else_terminated.unwrap_or(false);
                !falls_through && self.handlers_terminated.iter().all(|t| *t)
            }
            ChainKind::Loop => {
                !self.broke && (!self.falls_through || self.else_terminated == Some(true))
            }
            ChainKind::Match => self.body_terminated,
            ChainKind::Case => {
                self.irrefutable
                    && !self.branches_terminated.is_empty()
                    && self.branches_terminated.iter().all(|t| *t)
            }
            ChainKind::Other => false,
        }
    }
}

#[derive(Debug)]
struct Block {
    scope: Scope,
    dead: bool,
    terminated: bool,
    expect_docstring: bool,
    /// Body of a `for`/`while` clause; `break` targets it.
    loop_body: bool,
    /// Body of a `def`/`class`; `break` never crosses it.
    definition_body: bool,
    saw_break: bool,
    chain: Option<Chain>,
}

impl Block {
    fn new(scope: Scope, dead: bool, expect_docstring: bool) -> Self {
        Self {
            scope,
            dead,
            terminated: false,
            expect_docstring,
            loop_body: false,
            definition_body: false,
            saw_break: false,
            chain: None,
        }
    }

    /// Close any open compound statement, folding its outcome into this block.
    fn finish_chain(&mut self) -> Result<(), ParseError> {
        if let Some(chain) = self.chain.take() {
            chain.validate()?;
            if chain.terminates() {
                self.terminated = true;
            }
        }
        Ok(())
    }
}

/// Credit a live `break` to the innermost enclosing loop body.
fn note_break(blocks: &mut [Block]) {
    for block in blocks.iter_mut().rev() {
        if block.loop_body {
            block.saw_break = true;
            return;
        }
        if block.definition_body {
            return;
        }
    }
}

/// A `def` or `class`, with its decorators and body.
#[derive(Debug)]
struct Definition {
    start: u32,
    def_line: u32,
    index: usize,
    depth: usize,
}

#[derive(Debug, Default)]
struct Analysis {
    raw: BTreeSet<u32>,
    docstrings: BTreeSet<u32>,
    excluded: BTreeSet<u32>,
    first_line: HashMap<u32, u32>,
}

impl Analysis {
    fn run(lines: &[LogicalLine], matched: &BTreeSet<u32>) -> Result<Self, ParseError> {
        let mut analysis = Analysis::default();
        let mut blocks = vec![Block::new(Scope::Module, false, true)];
        let mut opener: Option<&LogicalLine> = None;
        let mut decorator_start: Option<u32> = None;
        let mut definitions = Vec::new();
        let mut excluded_raw = matched.clone();
        let mut excluding: Option<usize> = None;

        for (index, line) in lines.iter().enumerate() {
            let depth = line.depth;

            // Block structure.
            match opener.take() {
                Some(open) if depth != open.depth + 1 => {
                    return Err(expected_block(open));
                }
                None if depth + 1 > blocks.len() => {
                    return Err(ParseError::new(line.first_line, "unexpected indent"));
                }
                _ => {}
            }
            close_blocks(&mut blocks, depth + 1)?;

            // Suites under an excluded header.
            if excluding.is_some_and(|d| depth <= d) {
                excluding = None;
            }
            if excluding.is_some() {
                excluded_raw.insert(line.first_line);
            } else if let Some(colon_line) = line.last_bare_colon_line() {
                if matched.range(line.first_line..=colon_line).next().is_some() {
                    excluded_raw.insert(colon_line);
                    excluding = Some(depth);
                }
            }

            let keyword = line.keyword();

            if let Some(start) = decorator_start {
                if !line.is_decorator() && !matches!(keyword, Some("def" | "class")) {
                    return Err(ParseError::new(start, "decorator must precede a def or class"));
                }
            }

            let block = blocks
                .last_mut()
                .ok_or_else(|| ParseError::new(line.first_line, "unexpected dedent"))?;
            let continues_chain = match (keyword, &block.chain) {
                (Some(kw), Some(chain)) => chain.accepts(kw),
                _ => false,
            };
            if !continues_chain {
                if matches!(keyword, Some("elif" | "else" | "except" | "finally")) {
                    return Err(ParseError::new(line.first_line, "invalid syntax"));
                }
                block.finish_chain()?;
            }

            let mut reach = ClauseReach::default();
            if let Some(kw) = keyword {
                if continues_chain {
                    if let Some(chain) = block.chain.as_mut() {
                        reach = chain.enter(kw, line);
                    }
                } else {
                    let (chain, entered) = Chain::start(kw, line);
                    block.chain = Some(chain);
                    reach = entered;
                }
            }

            let dead = block.dead || block.terminated || reach.header_dead;
            let child_dead = dead || reach.body_dead;
            let scope = block.scope;
            let child_scope = match keyword {
                Some("def") => Scope::Function,
                Some("class") => Scope::Class,
                _ => scope,
            };

            if std::mem::take(&mut block.expect_docstring) && is_string_expression(&line.tokens) {
                analysis.docstrings.extend(line.first_line..=line.last_line);
            }
            if matches!(keyword, Some("def" | "class"))
                && !line.opens_block()
                && simple_statements(line.inline_body())
                    .first()
                    .is_some_and(|s| is_string_expression(s))
            {
                analysis.docstrings.extend(line.first_line..=line.last_line);
            }

            if !dead && generates_code(line, keyword, scope, child_scope) {
                analysis.raw.insert(line.first_line);
            }

            match keyword {
                Some(kw) if !line.opens_block() => {
                    let body = simple_statements(line.inline_body());
                    let terminated = child_dead || body.iter().any(|s| is_terminator(s));
                    let breaks = !child_dead && body.iter().any(|s| is_break(s));
                    let own_loop = matches!(kw, "for" | "while");
                    if let Some(chain) = block.chain.as_mut() {
                        chain.close_clause(terminated);
                        chain.broke |= breaks && own_loop;
                    }
                    if breaks && !own_loop {
                        note_break(&mut blocks);
                    }
                }
                Some(_) => {}
                None => {
                    let parts = simple_statements(&line.tokens);
                    if parts.iter().any(|s| is_terminator(s)) {
                        block.terminated = true;
                    }
                    if !dead && parts.iter().any(|s| is_break(s)) {
                        note_break(&mut blocks);
                    }
                }
            }

            if line.opens_block() {
                let mut child = Block::new(
                    child_scope,
                    child_dead,
                    matches!(keyword, Some("def" | "class")),
                );
                child.loop_body = matches!(keyword, Some("for" | "while"));
                child.definition_body = matches!(keyword, Some("def" | "class"));
                blocks.push(child);
                opener = Some(line);
            }

            if line.last_line > line.first_line {
                for l in line.first_line..=line.last_line {
                    analysis.first_line.insert(l, line.first_line);
                }
            }

            if line.is_decorator() {
                decorator_start.get_or_insert(line.first_line);
            } else {
                if matches!(keyword, Some("def" | "class")) {
                    definitions.push(Definition {
                        start: decorator_start.unwrap_or(line.first_line),
                        def_line: line.first_line,
                        index,
                        depth,
                    });
                }
                decorator_start = None;
            }
        }

        if let Some(open) = opener {
            return Err(expected_block(open));
        }
        if let Some(start) = decorator_start {
            return Err(ParseError::new(start, "decorator must precede a def or class"));
        }
        close_blocks(&mut blocks, 1)?;
        if let Some(module) = blocks.last_mut() {
            module.finish_chain()?;
        }

        analysis.excluded = excluded_raw
            .iter()
            .map(|l| analysis.map_first_line(*l))
            .collect();

        // An excluded decorator or signature takes the whole definition.
        for def in &definitions {
            if analysis
                .excluded
                .range(def.start..=def.def_line)
                .next()
                .is_some()
            {
                let end = definition_end(lines, def);
                analysis.excluded.extend(def.start..=end);
            }
        }

        Ok(analysis)
    }

    fn map_first_line(&self, line: u32) -> u32 {
        self.first_line.get(&line).copied().unwrap_or(line)
    }

    fn statements(&self) -> LineSet {
        let ignore: BTreeSet<u32> = self.excluded.union(&self.docstrings).copied().collect();
        self.raw
            .iter()
            .filter(|l| !ignore.contains(l))
            .map(|l| self.map_first_line(*l))
            .filter(|l| !ignore.contains(l))
            .collect()
    }
}

/// Pop blocks until `keep` remain, reporting each closed body's outcome to
/// the statement that opened it.
fn close_blocks(blocks: &mut Vec<Block>, keep: usize) -> Result<(), ParseError> {
    while blocks.len() > keep {
        let Some(mut child) = blocks.pop() else { break };
        child.finish_chain()?;
        if let Some(chain) = blocks.last_mut().and_then(|b| b.chain.as_mut()) {
            chain.close_clause(child.terminated || child.dead);
            chain.broke |= child.saw_break;
        }
    }
    Ok(())
}

fn expected_block(open: &LogicalLine) -> ParseError {
    let keyword = open
        .keyword()
        .or_else(|| open.tokens.first().map(|t| t.text.as_str()))
        .unwrap_or("block");
    ParseError::new(
        open.first_line,
        format!(
            "expected an indented block after '{}' statement on line {}",
            keyword, open.first_line
        ),
    )
}

/// Last physical line belonging to a definition's body.
fn definition_end(lines: &[LogicalLine], def: &Definition) -> u32 {
    let mut end = lines[def.index].last_line;
    for line in &lines[def.index + 1..] {
        if line.depth <= def.depth {
            break;
        }
        end = line.last_line;
    }
    end
}

fn generates_code(line: &LogicalLine, keyword: Option<&str>, scope: Scope, child: Scope) -> bool {
    if line.is_decorator() {
        return true;
    }
    match keyword {
        Some("else" | "finally") => simple_statements(line.inline_body())
            .iter()
            .any(|s| statement_generates_code(s, child)),
        Some(_) => true,
        None => simple_statements(&line.tokens)
            .iter()
            .any(|s| statement_generates_code(s, scope)),
    }
}

fn statement_generates_code(stmt: &[tokenizer::Token], scope: Scope) -> bool {
    let Some(first) = stmt.first() else {
        return false;
    };
    if first.is_name("global") || first.is_name("nonlocal") {
        return false;
    }
    !(scope == Scope::Function && is_bare_annotation(stmt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(source: &str) -> Vec<u32> {
        statements(source).unwrap().into_iter().collect()
    }

    #[test]
    fn test_simple_module() {
        assert_eq!(lines("a = 1\nb = 2\nc = 3\nd = 4\ne = 5\n"), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_and_comment_only() {
        assert!(lines("").is_empty());
        assert!(lines("# nothing here\n\n# at all\n").is_empty());
    }

    #[test]
    fn test_multiline_statement_maps_to_first_line() {
        assert_eq!(lines("x = [\n    1,\n    2,\n]\ny = 3\n"), vec![1, 5]);
        assert_eq!(lines("x = 1 + \\\n    2\n"), vec![1]);
    }

    #[test]
    fn test_docstrings_are_ignored() {
        let source = "\"\"\"Module doc.\n\nMore.\n\"\"\"\nimport os\n\n\
                      class A:\n    \"\"\"Class doc.\"\"\"\n    x = 1\n\n\
                      def f():\n    'function doc'\n    return 1\n";
        assert_eq!(lines(source), vec![5, 7, 9, 11, 13]);
    }

    #[test]
    fn test_fstring_and_bytes_are_not_docstrings() {
        assert_eq!(lines("def f():\n    f'x'\n    return 1\n"), vec![1, 2, 3]);
        assert_eq!(lines("b'bytes'\nx = 1\n"), vec![1, 2]);
    }

    #[test]
    fn test_docstring_only_first_statement() {
        assert_eq!(lines("x = 1\n'not a docstring'\n"), vec![1, 2]);
    }

    #[test]
    fn test_one_line_def_with_docstring() {
        assert_eq!(lines("def f(): 'doc'\nx = 1\n"), vec![2]);
    }

    #[test]
    fn test_else_and_finally_headers_are_not_statements() {
        let source = "if a:\n    b = 1\nelse:\n    b = 2\n\
                      try:\n    x()\nexcept ValueError:\n    pass\nfinally:\n    y()\n";
        assert_eq!(lines(source), vec![1, 2, 4, 5, 6, 7, 8, 10]);
    }

    #[test]
    fn test_else_with_inline_body_is_a_statement() {
        assert_eq!(lines("if a: b = 1\nelse: b = 2\n"), vec![1, 2]);
    }

    #[test]
    fn test_decorators_and_definitions() {
        assert_eq!(lines("@dec\n@other(1)\ndef f():\n    pass\n"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_global_and_nonlocal_are_not_statements() {
        let source =
            "def f():\n    global X\n    X = 1\n    y = 0\n    def g():\n        nonlocal y\n";
        // The body of g compiles to nothing, but the def line still counts.
        assert_eq!(lines(source), vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_function_annotations_without_value() {
        assert_eq!(lines("def f():\n    x: int\n    y: int = 2\n"), vec![1, 3]);
        // At module level the annotation is stored, so it is code.
        assert_eq!(lines("x: int\n"), vec![1]);
    }

    #[test]
    fn test_code_after_return_is_unreachable() {
        assert_eq!(lines("def f():\n    return 1\n    x = 2\n"), vec![1, 2]);
        assert_eq!(
            lines("for i in x:\n    if i:\n        break\n        print(i)\n    y = i\n"),
            vec![1, 2, 3, 5]
        );
    }

    #[test]
    fn test_code_after_exhaustive_if_is_unreachable() {
        let source = "def f(a):\n    if a:\n        return 1\n    else:\n        return 2\n    x = 3\n";
        assert_eq!(lines(source), vec![1, 2, 3, 5]);
        // Without an else branch the fall-through path survives.
        let source = "def f(a):\n    if a:\n        return 1\n    x = 3\n";
        assert_eq!(lines(source), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_try_else_after_returning_body_is_unreachable() {
        let source =
            "def f():\n    try:\n        return g()\n    except E:\n        pass\n    else:\n        x = 1\n    y = 2\n";
        assert_eq!(lines(source), vec![1, 2, 3, 4, 5, 8]);
    }

    #[test]
    fn test_constant_false_tests_skip_their_body() {
        assert_eq!(lines("if False:\n    x = 1\ny = 2\n"), vec![1, 3]);
        assert_eq!(lines("if 0:\n    x = 1\nelse:\n    y = 2\n"), vec![1, 4]);
        assert_eq!(lines("while False:\n    x = 1\ny = 2\n"), vec![1, 3]);
        assert_eq!(lines("if 0 and x:\n    y = 1\nz = 2\n"), vec![1, 3]);
        assert_eq!(lines("if not __debug__:\n    x = 1\ny = 2\n"), vec![1, 3]);
    }

    #[test]
    fn test_constant_true_tests_skip_later_branches() {
        assert_eq!(lines("print(1)\nif True:\n    a()\nelse:\n    b()\n"), vec![1, 2, 3]);
        assert_eq!(lines("if True:\n    a()\nelif b:\n    c()\n"), vec![1, 2]);
        assert_eq!(
            lines("def f():\n    if 1:\n        return 1\n    x = 2\n"),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_infinite_loop_never_falls_through() {
        assert_eq!(lines("while True:\n    pass\nx = 1\n"), vec![1, 2]);
        assert_eq!(lines("while 1: pass\nx = 1\n"), vec![1]);
        assert_eq!(
            lines("while True:\n    work()\nelse:\n    never()\ndone()\n"),
            vec![1, 2]
        );
    }

    #[test]
    fn test_break_leaves_infinite_loop() {
        assert_eq!(
            lines("while True:\n    if done():\n        break\nx = 1\n"),
            vec![1, 2, 3, 4]
        );
        assert_eq!(lines("while True: break\nx = 1\n"), vec![1, 2]);
        // The break belongs to the inner loop.
        assert_eq!(
            lines("while True:\n    for i in y:\n        break\nx = 1\n"),
            vec![1, 2, 3]
        );
        // A break in dead code does not count.
        assert_eq!(
            lines("while True:\n    if False:\n        break\nx = 1\n"),
            vec![1, 2]
        );
    }

    #[test]
    fn test_loop_with_returning_body_and_else() {
        let source =
            "def f(xs):\n    for x in xs:\n        return x\n    else:\n        return None\n    y = 1\n";
        assert_eq!(lines(source), vec![1, 2, 3, 5]);
        // An else that falls through keeps the code after the loop.
        let source = "def f(xs):\n    for x in xs:\n        return x\n    else:\n        pass\n    y = 1\n";
        assert_eq!(lines(source), vec![1, 2, 3, 5, 6]);
    }

    #[test]
    fn test_exhaustive_match_terminates() {
        let source = "def f(x):\n    match x:\n        case 1:\n            return 1\n\
                      \x20       case _:\n            return 2\n    y = 3\n";
        assert_eq!(lines(source), vec![1, 2, 3, 4, 5, 6]);
        // Without an irrefutable case a subject can match nothing.
        let source = "def f(x):\n    match x:\n        case 1:\n            return 1\n\
                      \x20       case 2:\n            return 2\n    y = 3\n";
        assert_eq!(lines(source), vec![1, 2, 3, 4, 5, 6, 7]);
        // A guard makes the wildcard refutable.
        let source = "def f(x):\n    match x:\n        case 1:\n            return 1\n\
                      \x20       case _ if x:\n            return 2\n    y = 3\n";
        assert_eq!(lines(source), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_failing_assert_is_a_terminator() {
        assert_eq!(lines("def f():\n    assert False, 'never'\n    x = 1\n"), vec![1, 2]);
        assert_eq!(lines("def f(a):\n    assert a\n    x = 1\n"), vec![1, 2, 3]);
    }

    #[test]
    fn test_non_ascii_identifiers() {
        assert_eq!(lines("नमस्ते = 1\ny = 2\n"), vec![1, 2]);
        assert_eq!(lines("x\u{301} = 1\n"), vec![1]);
    }

    #[test]
    fn test_semicolon_statements() {
        assert_eq!(lines("def f():\n    global X; X = 1\n"), vec![1, 2]);
        assert_eq!(lines("def f():\n    global X; global Y\n    pass\n"), vec![1, 3]);
    }

    #[test]
    fn test_pass_and_ellipsis_are_statements() {
        assert_eq!(lines("class A:\n    ...\nclass B:\n    pass\n"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pragma_excludes_line() {
        assert_eq!(lines("a = 1\nb = 2  # pragma: no cover\nc = 3\n"), vec![1, 3]);
    }

    #[test]
    fn test_pragma_on_continuation_excludes_statement() {
        assert_eq!(lines("x = f(\n    1,  # pragma: no cover\n)\ny = 2\n"), vec![4]);
    }

    #[test]
    fn test_pragma_on_header_excludes_suite() {
        let source = "if debug:  # pragma: no cover\n    log()\n    more()\nz = 1\n";
        assert_eq!(lines(source), vec![4]);
    }

    #[test]
    fn test_pragma_on_nested_header() {
        let source = "def f():\n    if x:  # pragma: no cover\n        a()\n    b()\n";
        assert_eq!(lines(source), vec![1, 4]);
    }

    #[test]
    fn test_pragma_on_decorator_excludes_definition() {
        let source = "@dec  # pragma: no cover\ndef f():\n    return 1\nx = 2\n";
        assert_eq!(lines(source), vec![4]);
    }

    #[test]
    fn test_pragma_variants() {
        assert_eq!(lines("a = 1  #pragma:no cover\nb = 2  # PRAGMA NO COVER\nc = 3\n"), vec![3]);
    }

    #[test]
    fn test_custom_exclusions() {
        let parser = StatementParser::new(&["raise NotImplementedError"]).unwrap();
        let got: Vec<u32> = parser
            .parse("def f():\n    raise NotImplementedError\nx = 1  # pragma: no cover\n")
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(got, vec![1, 3]);
    }

    #[test]
    fn test_without_exclusions() {
        let got: Vec<u32> = StatementParser::without_exclusions()
            .parse("a = 1  # pragma: no cover\n")
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(got, vec![1]);
    }

    #[test]
    fn test_match_statement() {
        let source = "match cmd:\n    case 'go':\n        run()\n    case _:\n        pass\n";
        assert_eq!(lines(source), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_string_with_hash_is_not_excluded_comment() {
        // The regex runs over raw lines, so this is excluded like coverage.py does.
        assert_eq!(lines("s = '# pragma: no cover'\nt = 1\n"), vec![2]);
    }

    #[test]
    fn test_crlf_line_endings() {
        assert_eq!(lines("a = 1\r\nb = [\r\n  2]\r\nc = 3\r\n"), vec![1, 2, 4]);
    }

    #[test]
    fn test_parse_errors() {
        for source in [
            "x = (1,\n",
            "s = 'abc\n",
            "def f():\nx = 1\n",
            "x = 1\n    y = 2\n",
            "if x:\n",
            "else:\n    pass\n",
            "try:\n    pass\nx = 1\n",
            "@dec\nx = 1\n",
            "x = 1\0\n",
        ] {
            assert!(statements(source).is_err(), "expected failure for {source:?}");
        }
    }

    #[test]
    fn test_parse_error_line() {
        let err = statements("a = 1\nb = 2\nif c:\nd = 4\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_physical_lines() {
        let parts: Vec<&str> = physical_lines("a\r\nb\rc\nd").collect();
        assert_eq!(parts, vec!["a", "b", "c", "d"]);
    }
}
