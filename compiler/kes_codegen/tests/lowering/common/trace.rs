//! A small interpreter for the control skeleton of emitted C.
//!
//! Runtime calls are opaque: they are recorded in the trace and produce
//! unknown values unless the test gives them a result. Native variables,
//! labels, `goto`, `switch`, loops and conditions over known values are
//! executed, which is enough to observe the paths a lowered function takes.
//!
//! Unknown conditions are false; the empty condition of `for (;;)` is true.
//! Evaluated conditions are traced as
//! `if (cond)` statements. A call statement passing `&x` marks `x` as filled
//! in (value 1), which models the runtime's out-parameters.

use std::cell::RefCell;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;

/// Upper bound on executed lines, so a miscompiled loop fails the test
/// instead of hanging it.
const STEP_LIMIT: usize = 100_000;

/// Types that may appear in a C cast inside a condition.
const CAST_TYPES: &[&str] = &["int", "long", "double", "char", "short", "size_t", "Kes_ssize_t"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Label(String),
    Stmt(String),
}

#[derive(Clone, Debug)]
enum Block {
    If(String),
    Plain,
    While,
    For { init: String, cond: String, step: String },
    Switch(String),
}

#[derive(Clone, Debug)]
enum Op {
    Nop,
    Label(String),
    Goto(String),
    /// `KES_ERR(line, label)`
    Raise(i64, String),
    Break,
    Return(String),
    Exec(String),
    Seq(Vec<Op>),
    When(String, Box<Op>),
    /// `case k:` (`None` for `default:`) followed by an optional statement.
    Case(Option<i64>, Box<Op>),
    Open(Block),
    /// `} else {`
    Else,
    Close,
}

impl Op {
    fn opens(&self) -> bool {
        match self {
            Op::Open(_) | Op::Else => true,
            Op::Case(_, op) => op.opens(),
            _ => false,
        }
    }

    fn closes(&self) -> bool {
        matches!(self, Op::Close | Op::Else)
    }

    fn block(&self) -> Option<&Block> {
        match self {
            Op::Open(block) => Some(block),
            Op::Case(_, op) => op.block(),
            _ => None,
        }
    }
}

enum Flow {
    Next,
    Jump(usize),
    Return(String),
}

/// Result of running a program once.
#[derive(Debug)]
pub struct Outcome {
    /// Text of the returned expression.
    pub returned: String,
    /// Its value, when known.
    pub value: Option<i64>,
    pub trace: Vec<Event>,
}

impl Outcome {
    /// A label whose name ends in `suffix` was passed.
    pub fn visited(&self, suffix: &str) -> bool {
        self.trace
            .iter()
            .any(|e| matches!(e, Event::Label(l) if l.ends_with(suffix)))
    }

    /// A statement containing `fragment` was executed.
    pub fn executed(&self, fragment: &str) -> bool {
        self.trace
            .iter()
            .any(|e| matches!(e, Event::Stmt(s) if s.contains(fragment)))
    }

    /// Number of executed statements containing `fragment`.
    pub fn count(&self, fragment: &str) -> usize {
        self.trace
            .iter()
            .filter(|e| matches!(e, Event::Stmt(s) if s.contains(fragment)))
            .count()
    }
}

/// Variable values and call results shared across runs.
#[derive(Debug, Default)]
pub struct State {
    pub vars: FxHashMap<String, i64>,
    pub calls: FxHashMap<String, i64>,
    /// Results handed out one per call before falling back to `calls`.
    scripted: RefCell<FxHashMap<String, VecDeque<i64>>>,
}

impl State {
    pub fn new() -> Self {
        State::default()
    }

    #[must_use]
    pub fn with_var(mut self, name: &str, value: i64) -> Self {
        self.vars.insert(name.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_call(mut self, name: &str, value: i64) -> Self {
        self.calls.insert(name.to_owned(), value);
        self
    }

    /// Calls to `name` return `values` in order, then the `calls` result.
    #[must_use]
    pub fn with_call_sequence(self, name: &str, values: impl IntoIterator<Item = i64>) -> Self {
        self.scripted
            .borrow_mut()
            .insert(name.to_owned(), values.into_iter().collect());
        self
    }

    pub fn var(&self, name: &str) -> Option<i64> {
        self.vars.get(name).copied()
    }

    fn call_result(&self, name: &str) -> Option<i64> {
        let next = self
            .scripted
            .borrow_mut()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        next.or_else(|| self.calls.get(name).copied())
    }

    fn truthy(&self, cond: &str) -> bool {
        cond.is_empty() || eval(cond, self).is_some_and(|v| v != 0)
    }

    fn execute(&mut self, stmt: &str, trace: &mut Vec<Event>) {
        if stmt.is_empty() {
            return;
        }
        trace.push(Event::Stmt(stmt.to_owned()));
        if let Some(var) = stmt.strip_suffix("++") {
            self.update(var.trim(), "+", "1");
            return;
        }
        if let Some(var) = stmt.strip_suffix("--") {
            self.update(var.trim(), "-", "1");
            return;
        }
        match find_assignment(stmt) {
            Some((lhs, op, rhs)) => {
                let Some(var) = last_lvalue(lhs) else {
                    return;
                };
                if op.is_empty() {
                    match eval(rhs, self) {
                        Some(v) => {
                            self.vars.insert(var, v);
                        }
                        None => {
                            self.vars.remove(&var);
                        }
                    }
                } else {
                    self.update(&var, op, rhs);
                }
            }
            None => {
                for out in out_parameters(stmt) {
                    self.vars.insert(out, 1);
                }
            }
        }
    }

    fn update(&mut self, var: &str, op: &str, rhs: &str) {
        let current = self.vars.get(var).copied();
        let value = eval(rhs, self);
        let next = match (current, value) {
            (Some(a), Some(b)) => match op {
                "+" => Some(a + b),
                "-" => Some(a - b),
                "*" => Some(a * b),
                _ => None,
            },
            _ => None,
        };
        match next {
            Some(v) => {
                self.vars.insert(var.to_owned(), v);
            }
            None => {
                self.vars.remove(var);
            }
        }
    }
}

/// A parsed function body.
#[derive(Debug)]
pub struct Program {
    ops: Vec<Op>,
    labels: FxHashMap<String, usize>,
    /// For every opener, the index of its closing line.
    close: Vec<Option<usize>>,
    /// For every closing line, the index of its opener.
    open: Vec<Option<usize>>,
    /// Innermost enclosing opener of every line.
    parent: Vec<Option<usize>>,
}

impl Program {
    /// Parse the body of the function whose definition header names `cname`.
    ///
    /// # Panics
    ///
    /// When `c` defines no such function or its braces do not balance.
    pub fn function(c: &str, cname: &str) -> Program {
        let call = format!("{cname}(");
        let mut lines = c.lines();
        let found = lines
            .by_ref()
            .any(|l| l.starts_with("static ") && l.contains(&call) && l.ends_with('{'));
        assert!(found, "no definition of {cname} in:\n{c}");
        let body: Vec<&str> = lines.take_while(|l| *l != "}").collect();
        Program::parse(&body)
    }

    pub fn parse(lines: &[&str]) -> Program {
        let ops: Vec<Op> = lines.iter().map(|l| parse_line(l)).collect();
        let n = ops.len();
        let mut close = vec![None; n];
        let mut open = vec![None; n];
        let mut parent = vec![None; n];
        let mut labels = FxHashMap::default();
        let mut stack: Vec<usize> = Vec::new();
        for (pc, op) in ops.iter().enumerate() {
            if let Op::Label(name) = op {
                labels.insert(name.clone(), pc);
            }
            if op.closes() {
                let opener = stack.pop().unwrap_or_else(|| panic!("unbalanced '}}' at line {pc}"));
                close[opener] = Some(pc);
                open[pc] = Some(opener);
            }
            parent[pc] = stack.last().copied();
            if op.opens() {
                stack.push(pc);
            }
        }
        assert!(stack.is_empty(), "unclosed block at line {:?}", stack.last());
        Program {
            ops,
            labels,
            close,
            open,
            parent,
        }
    }

    /// Run from the first line until a `return`.
    ///
    /// # Panics
    ///
    /// When execution does not return within the step limit, or runs off
    /// the end of the body.
    pub fn run(&self, state: &mut State) -> Outcome {
        let mut trace = Vec::new();
        let mut pc = 0;
        for _ in 0..STEP_LIMIT {
            let Some(op) = self.ops.get(pc) else {
                panic!("ran off the end of the function; trace: {trace:#?}");
            };
            match self.step(pc, op, state, &mut trace) {
                Flow::Next => pc += 1,
                Flow::Jump(target) => pc = target,
                Flow::Return(text) => {
                    let value = eval(&text, state);
                    return Outcome {
                        returned: text,
                        value,
                        trace,
                    };
                }
            }
        }
        panic!("step limit exceeded; last events: {:#?}", &trace[trace.len().saturating_sub(20)..]);
    }

    fn step(&self, pc: usize, op: &Op, state: &mut State, trace: &mut Vec<Event>) -> Flow {
        match op {
            Op::Nop => Flow::Next,
            Op::Label(name) => {
                trace.push(Event::Label(name.clone()));
                Flow::Next
            }
            Op::Goto(label) => Flow::Jump(self.label(label)),
            Op::Raise(line, label) => {
                state.vars.insert("__kes_lineno".to_owned(), *line);
                Flow::Jump(self.label(label))
            }
            Op::Break => self.break_out(pc),
            Op::Return(text) => Flow::Return(text.clone()),
            Op::Exec(stmt) => {
                state.execute(stmt, trace);
                Flow::Next
            }
            Op::Seq(ops) => {
                for op in ops {
                    match self.step(pc, op, state, trace) {
                        Flow::Next => {}
                        flow => return flow,
                    }
                }
                Flow::Next
            }
            Op::When(cond, then) => {
                trace.push(Event::Stmt(format!("if ({cond})")));
                if state.truthy(cond) {
                    self.step(pc, then, state, trace)
                } else {
                    Flow::Next
                }
            }
            Op::Case(_, then) => self.step(pc, then, state, trace),
            Op::Open(block) => self.enter(pc, block, state, trace),
            Op::Else => Flow::Jump(self.after(pc)),
            Op::Close => {
                let Some(opener) = self.open[pc] else {
                    return Flow::Next;
                };
                match self.ops[opener].block() {
                    Some(Block::While) => Flow::Jump(opener + 1),
                    Some(Block::For { cond, step, .. }) => {
                        state.execute(step, trace);
                        if state.truthy(cond) {
                            Flow::Jump(opener + 1)
                        } else {
                            Flow::Next
                        }
                    }
                    _ => Flow::Next,
                }
            }
        }
    }

    fn enter(&self, pc: usize, block: &Block, state: &mut State, trace: &mut Vec<Event>) -> Flow {
        match block {
            Block::If(cond) => {
                trace.push(Event::Stmt(format!("if ({cond})")));
                if state.truthy(cond) {
                    Flow::Next
                } else {
                    Flow::Jump(self.after(pc))
                }
            }
            Block::Plain | Block::While => Flow::Next,
            Block::For { init, cond, .. } => {
                state.execute(init, trace);
                if state.truthy(cond) {
                    Flow::Next
                } else {
                    Flow::Jump(self.after(pc))
                }
            }
            Block::Switch(subject) => {
                let value = eval(subject, state);
                let mut default = None;
                for (line, op) in self.ops.iter().enumerate().skip(pc + 1) {
                    if self.parent[line] != Some(pc) {
                        continue;
                    }
                    match op {
                        Op::Case(Some(k), _) if Some(*k) == value => return Flow::Jump(line),
                        Op::Case(None, _) => default = default.or(Some(line)),
                        _ => {}
                    }
                }
                Flow::Jump(default.unwrap_or_else(|| self.after(pc)))
            }
        }
    }

    /// Line after the block opened at `pc`.
    fn after(&self, pc: usize) -> usize {
        self.close[pc].map_or(pc + 1, |c| c + 1)
    }

    fn break_out(&self, pc: usize) -> Flow {
        let mut current = self.parent[pc];
        while let Some(opener) = current {
            if matches!(
                self.ops[opener].block(),
                Some(Block::While | Block::For { .. } | Block::Switch(_))
            ) {
                return Flow::Jump(self.after(opener));
            }
            current = self.parent[opener];
        }
        panic!("'break' outside a loop or switch at line {pc}");
    }

    fn label(&self, name: &str) -> usize {
        *self
            .labels
            .get(name)
            .unwrap_or_else(|| panic!("jump to undefined label {name}"))
    }
}

// Line parsing

fn strip_comments(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(end) => rest = &rest[start + end + 2..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn parse_line(line: &str) -> Op {
    let text = strip_comments(line);
    let s = text.trim();
    if s.is_empty() || s.starts_with('#') {
        return Op::Nop;
    }
    if s == "}" {
        return Op::Close;
    }
    if s == "} else {" {
        return Op::Else;
    }
    if let Some(rest) = s.strip_prefix("case ") {
        if let Some((value, tail)) = rest.split_once(':') {
            if let Ok(k) = value.trim().parse() {
                return Op::Case(Some(k), Box::new(parse_line(tail)));
            }
        }
    }
    if let Some(tail) = s.strip_prefix("default:") {
        return Op::Case(None, Box::new(parse_line(tail)));
    }
    if let Some(name) = s.strip_suffix(":;") {
        if is_identifier(name) {
            return Op::Label(name.to_owned());
        }
    }
    if s == "while (1) {" {
        return Op::Open(Block::While);
    }
    if let Some(rest) = s.strip_prefix("for ") {
        if let Some((header, "{")) = split_paren(rest) {
            let parts = split_top_level(header, ';');
            if let [init, cond, step] = parts.as_slice() {
                return Op::Open(Block::For {
                    init: (*init).to_owned(),
                    cond: (*cond).to_owned(),
                    step: (*step).to_owned(),
                });
            }
        }
    }
    if let Some(rest) = s.strip_prefix("switch ") {
        if let Some((subject, "{")) = split_paren(rest) {
            return Op::Open(Block::Switch(subject.to_owned()));
        }
    }
    if let Some(rest) = s.strip_prefix("if ") {
        if let Some((cond, tail)) = split_paren(rest) {
            let cond = cond.to_owned();
            if tail == "{" {
                return Op::Open(Block::If(cond));
            }
            if let Some(inner) = tail.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
                return Op::When(cond, Box::new(parse_statements(inner)));
            }
            return Op::When(cond, Box::new(parse_statements(tail)));
        }
    }
    if s == "{" || s.ends_with(" {") && !s.contains('(') {
        return Op::Open(Block::Plain);
    }
    parse_statements(s)
}

fn parse_statements(text: &str) -> Op {
    let mut ops: Vec<Op> = split_top_level(text, ';')
        .into_iter()
        .filter(|s| !s.is_empty())
        .map(parse_simple)
        .collect();
    match ops.len() {
        0 => Op::Nop,
        1 => ops.remove(0),
        _ => Op::Seq(ops),
    }
}

fn parse_simple(stmt: &str) -> Op {
    if let Some(label) = stmt.strip_prefix("goto ") {
        return Op::Goto(label.trim().to_owned());
    }
    if let Some(args) = stmt
        .strip_prefix("KES_ERR(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        if let Some((line, label)) = args.split_once(',') {
            return Op::Raise(line.trim().parse().unwrap_or(0), label.trim().to_owned());
        }
    }
    if stmt == "break" {
        return Op::Break;
    }
    if stmt == "return" {
        return Op::Return(String::new());
    }
    if let Some(value) = stmt.strip_prefix("return ") {
        return Op::Return(value.trim().to_owned());
    }
    Op::Exec(stmt.to_owned())
}

/// Split `(inner) tail` into `inner` and the trimmed `tail`.
fn split_paren(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if !text.starts_with('(') {
        return None;
    }
    let mut depth = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[1..i], text[i + 1..].trim()));
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut in_string = false;
    let mut prev = '\0';
    for (i, c) in text.char_indices() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '(' | '[' | '{' if !in_string => depth += 1,
            ')' | ']' | '}' if !in_string => depth -= 1,
            c if c == sep && depth == 0 && !in_string => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
        prev = c;
    }
    parts.push(text[start..].trim());
    parts
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `lhs op= rhs` or `lhs = rhs`; `op` is empty for plain assignment.
fn find_assignment(stmt: &str) -> Option<(&str, &str, &str)> {
    let bytes = stmt.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_string = !in_string,
            b'(' | b'[' | b'{' if !in_string => depth += 1,
            b')' | b']' | b'}' if !in_string => depth -= 1,
            b'=' if depth == 0 && !in_string => {
                let next = bytes.get(i + 1).copied();
                if next == Some(b'=') {
                    return None;
                }
                let prev = if i > 0 { bytes[i - 1] } else { 0 };
                return match prev {
                    b'+' | b'-' | b'*' => Some((
                        &stmt[..i - 1],
                        &stmt[i - 1..i],
                        stmt[i + 1..].trim(),
                    )),
                    b'=' | b'!' | b'<' | b'>' => None,
                    _ => Some((&stmt[..i], "", stmt[i + 1..].trim())),
                };
            }
            _ => {}
        }
    }
    None
}

/// The assigned variable of a (possibly declaring) left-hand side.
fn last_lvalue(lhs: &str) -> Option<String> {
    let lhs = lhs.trim();
    let start = lhs
        .rfind(|c: char| c == ' ' || c == '*' || c == '(')
        .map_or(0, |i| i + 1);
    let var = lhs[start..].trim();
    (!var.is_empty()).then(|| var.to_owned())
}

fn out_parameters(stmt: &str) -> Vec<String> {
    let mut outs = Vec::new();
    let mut rest = stmt;
    while let Some(i) = rest.find('&') {
        let tail = &rest[i + 1..];
        if tail.starts_with('&') {
            rest = &tail[1..];
            continue;
        }
        let end = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        if end > 0 {
            outs.push(tail[..end].to_owned());
        }
        rest = &tail[end..];
    }
    outs
}

// Expression evaluation

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!", "(", ")", ",", "&",
];

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            while i < chars.len() && matches!(chars[i], 'L' | 'l' | 'U' | 'u') {
                i += 1;
            }
            tokens.push(Token::Num(digits.parse().ok()?));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            loop {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                if chars.get(i) == Some(&'-') && chars.get(i + 1) == Some(&'>') {
                    i += 2;
                } else if chars.get(i) == Some(&'.')
                    && chars.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic() || *c == '_')
                {
                    i += 1;
                } else if chars.get(i) == Some(&'[') {
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(chars[start..i.min(chars.len())].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS.iter().find(|op| rest.starts_with(**op))?;
            tokens.push(Token::Op(op));
            i += op.len();
        }
    }
    Some(tokens)
}

/// Evaluate a C condition or value; `None` when it depends on anything
/// unknown.
pub fn eval(text: &str, state: &State) -> Option<i64> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        state,
        unknown: false,
    };
    let value = parser.or()?;
    (parser.pos == parser.tokens.len() && !parser.unknown).then_some(value)
}

struct Parser<'s> {
    tokens: Vec<Token>,
    pos: usize,
    state: &'s State,
    /// Some operand was unknown; the value is meaningless.
    unknown: bool,
}

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn binary(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Option<i64>,
        apply: fn(&str, i64, i64) -> Option<i64>,
    ) -> Option<i64> {
        let mut lhs = next(self)?;
        while let Some(op) = self.peek_op().filter(|op| ops.contains(op)) {
            self.pos += 1;
            let rhs = next(self)?;
            lhs = apply(op, lhs, rhs).unwrap_or_else(|| {
                self.unknown = true;
                0
            });
        }
        Some(lhs)
    }

    fn or(&mut self) -> Option<i64> {
        self.binary(&["||"], Self::and, |_, a, b| Some(i64::from(a != 0 || b != 0)))
    }

    fn and(&mut self) -> Option<i64> {
        self.binary(&["&&"], Self::equality, |_, a, b| Some(i64::from(a != 0 && b != 0)))
    }

    fn equality(&mut self) -> Option<i64> {
        self.binary(&["==", "!="], Self::relational, |op, a, b| {
            Some(i64::from(if op == "==" { a == b } else { a != b }))
        })
    }

    fn relational(&mut self) -> Option<i64> {
        self.binary(&["<", "<=", ">", ">="], Self::additive, |op, a, b| {
            Some(i64::from(match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                _ => a >= b,
            }))
        })
    }

    fn additive(&mut self) -> Option<i64> {
        self.binary(&["+", "-"], Self::multiplicative, |op, a, b| {
            if op == "+" {
                a.checked_add(b)
            } else {
                a.checked_sub(b)
            }
        })
    }

    fn multiplicative(&mut self) -> Option<i64> {
        self.binary(&["*", "/", "%"], Self::unary, |op, a, b| match op {
            "*" => a.checked_mul(b),
            "/" => a.checked_div(b),
            _ => a.checked_rem(b),
        })
    }

    fn unary(&mut self) -> Option<i64> {
        if self.eat("!") {
            return self.unary().map(|v| i64::from(v == 0));
        }
        if self.eat("-") {
            return self.unary().map(i64::wrapping_neg);
        }
        if self.eat("&") {
            self.unary()?;
            self.unknown = true;
            return Some(0);
        }
        self.primary()
    }

    fn primary(&mut self) -> Option<i64> {
        match self.tokens.get(self.pos).cloned()? {
            Token::Num(n) => {
                self.pos += 1;
                Some(n)
            }
            Token::Op("(") => {
                self.pos += 1;
                if let (Some(Token::Ident(ty)), Some(Token::Op(")"))) =
                    (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
                {
                    if CAST_TYPES.contains(&ty.as_str()) {
                        self.pos += 2;
                        return self.unary();
                    }
                }
                let value = self.or()?;
                self.eat(")").then_some(value)
            }
            Token::Ident(name) => {
                self.pos += 1;
                if self.eat("(") {
                    return self.call(&name);
                }
                if name == "NULL" {
                    return Some(0);
                }
                match self.state.vars.get(&name) {
                    Some(v) => Some(*v),
                    None => {
                        self.unknown = true;
                        Some(0)
                    }
                }
            }
            Token::Op(_) => None,
        }
    }

    fn call(&mut self, name: &str) -> Option<i64> {
        let mut args = Vec::new();
        let outer_unknown = self.unknown;
        if !self.eat(")") {
            loop {
                self.unknown = false;
                let value = self.or()?;
                args.push((!self.unknown).then_some(value));
                if self.eat(")") {
                    break;
                }
                if !self.eat(",") {
                    return None;
                }
            }
        }
        self.unknown = outer_unknown;
        if matches!(name, "likely" | "unlikely") {
            return match args.as_slice() {
                [Some(v)] => Some(*v),
                _ => {
                    self.unknown = true;
                    Some(0)
                }
            };
        }
        match self.state.call_result(name) {
            Some(v) => Some(v),
            None => {
                self.unknown = true;
                Some(0)
            }
        }
    }
}

#[test]
fn conditions_over_known_values() {
    let state = State::new().with_var("__kes_v_i", 3).with_call("Kes_TUPLE_SIZE", 2);
    assert_eq!(eval("((__kes_v_i < 5) && !(__kes_v_i == 4))", &state), Some(1));
    assert_eq!(eval("likely(Kes_TUPLE_SIZE(__kes_args) < 1)", &state), Some(0));
    assert_eq!(eval("((int)__kes_v_i)", &state), Some(3));
    assert_eq!(eval("__kes_v_unknown + 1", &state), None);
}

#[test]
fn endless_for_runs_until_break() {
    let program = Program::parse(&[
        "for (;;) {",
        "t = Kes_IterNext(it);",
        "if (unlikely(!t)) {",
        "break;",
        "}",
        "a += 1;",
        "}",
        "return a;",
    ]);
    let mut state = State::new()
        .with_var("a", 0)
        .with_call("Kes_IterNext", 0)
        .with_call_sequence("Kes_IterNext", [5, 6, 7]);
    assert_eq!(program.run(&mut state).value, Some(3));
}

#[test]
fn switch_falls_through_cases() {
    let program = Program::parse(&[
        "switch (__kes_n) {",
        "case 2: a += 1;",
        "case 1: a += 10;",
        "case 0: break;",
        "default: goto bad;",
        "}",
        "return a;",
        "bad:;",
        "return -1;",
    ]);
    let mut state = State::new().with_var("__kes_n", 2).with_var("a", 0);
    assert_eq!(program.run(&mut state).value, Some(11));
    let mut state = State::new().with_var("__kes_n", 7).with_var("a", 0);
    assert_eq!(program.run(&mut state).value, Some(-1));
}
