//! Shell Command Parser
//!
//! Quote-aware scanner that splits a raw command line into segments joined by
//! shell operators, records redirections, heredocs and command substitutions,
//! and tokenises each segment with `shell-words`.
//!
//! Nested scripts (`$(...)`, backticks, `bash -c "..."`, `eval`, heredocs fed
//! to a shell) are parsed recursively up to [`MAX_NESTING_DEPTH`].
//!
//! The parser never fails. Anything it cannot make sense of is reported as a
//! [`ParseAnomaly`] and the caller treats the command conservatively.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Commands longer than this are not parsed at all
pub const MAX_COMMAND_BYTES: usize = 16 * 1024;

/// Maximum depth of nested scripts
pub const MAX_NESTING_DEPTH: usize = 4;

/// Marker prefix for redirection operators inside a segment buffer.
/// Control characters are rejected up front, so user input never contains it.
const REDIRECT_MARK: char = '\u{1}';

/// Placeholder left in argv where a command substitution was
pub const SUBSTITUTION_PLACEHOLDER: &str = "$(…)";

/// Shell interpreters whose `-c` script is parsed as a nested command
pub const SHELL_INTERPRETERS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "fish"];

// ============================================================================
// TYPES
// ============================================================================

/// Operator that joins a segment to the one before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Sequence,
    Pipe,
    And,
    Or,
    Background,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Sequence => ";",
            Operator::Pipe => "|",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Background => "&",
        }
    }

    pub fn is_chain(&self) -> bool {
        !matches!(self, Operator::Pipe)
    }
}

/// Why a command could not be parsed cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseAnomaly {
    Empty,
    TooLong,
    ControlCharacter,
    UnbalancedQuotes,
    UnclosedSubstitution,
    Tokenize,
    DepthExceeded,
}

impl ParseAnomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseAnomaly::Empty => "empty command",
            ParseAnomaly::TooLong => "command exceeds 16 KiB",
            ParseAnomaly::ControlCharacter => "control character in command",
            ParseAnomaly::UnbalancedQuotes => "unbalanced quotes",
            ParseAnomaly::UnclosedSubstitution => "unclosed command substitution",
            ParseAnomaly::Tokenize => "segment could not be tokenised",
            ParseAnomaly::DepthExceeded => "nested scripts too deep",
        }
    }
}

/// Output redirection to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub target: String,
    pub append: bool,
    /// Source descriptor (`2>` = 2), `None` for stdout or `&>`
    pub fd: Option<u32>,
}

/// One simple command inside a command line
#[derive(Debug, Clone, Default)]
pub struct Segment {
    /// Tokens with redirections removed
    pub argv: Vec<String>,
    /// Executable name after wrappers are peeled, directory stripped
    pub verb: Option<String>,
    /// Arguments following the verb
    pub args: Vec<String>,
    /// Peeled wrappers in order (`sudo`, `env`, ...)
    pub wrappers: Vec<String>,
    pub joined_by: Option<Operator>,
    pub redirects: Vec<Redirect>,
    pub heredoc_bodies: Vec<String>,
}

/// Structured view of a raw command line
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    pub segments: Vec<Segment>,
    pub operators: Vec<Operator>,
    pub substitution_count: usize,
    pub has_heredoc: bool,
    /// Scripts found inside this command (substitutions, `sh -c`, ...)
    pub nested: Vec<ParsedCommand>,
    pub anomalies: Vec<ParseAnomaly>,
}

impl ParsedCommand {
    /// Every segment, including those of nested scripts
    pub fn all_segments(&self) -> Vec<&Segment> {
        let mut out: Vec<&Segment> = self.segments.iter().collect();
        for inner in &self.nested {
            out.extend(inner.all_segments());
        }
        out
    }

    /// Every anomaly, including those of nested scripts
    pub fn all_anomalies(&self) -> Vec<ParseAnomaly> {
        let mut out = self.anomalies.clone();
        for inner in &self.nested {
            out.extend(inner.all_anomalies());
        }
        out
    }

    pub fn is_unparseable(&self) -> bool {
        !self.all_anomalies().is_empty()
    }

    pub fn total_substitutions(&self) -> usize {
        self.substitution_count + self.nested.iter().map(|n| n.total_substitutions()).sum::<usize>()
    }

    pub fn all_operators(&self) -> Vec<Operator> {
        let mut out = self.operators.clone();
        for inner in &self.nested {
            out.extend(inner.all_operators());
        }
        out
    }

    /// Top-level tokens with operators interleaved, for the audit record
    pub fn argv(&self) -> Vec<String> {
        let mut out = Vec::new();
        for segment in &self.segments {
            if let (Some(op), false) = (segment.joined_by, out.is_empty()) {
                out.push(op.as_str().to_string());
            }
            out.extend(segment.argv.iter().cloned());
        }
        out
    }
}

// ============================================================================
// ENTRY POINT
// ============================================================================

/// Parse a raw command line
pub fn parse(raw: &str) -> ParsedCommand {
    parse_at_depth(raw, 0)
}

fn parse_at_depth(raw: &str, depth: usize) -> ParsedCommand {
    if let Some(anomaly) = precheck(raw) {
        return ParsedCommand {
            anomalies: vec![anomaly],
            ..Default::default()
        };
    }

    let (mut parsed, substitutions) = Scanner::new(raw).run();
    expand_nested(&mut parsed, substitutions, depth);
    parsed
}

fn precheck(raw: &str) -> Option<ParseAnomaly> {
    if raw.trim().is_empty() {
        return Some(ParseAnomaly::Empty);
    }
    if raw.len() > MAX_COMMAND_BYTES {
        return Some(ParseAnomaly::TooLong);
    }
    if raw.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r')) {
        return Some(ParseAnomaly::ControlCharacter);
    }
    None
}

/// Parse substitution bodies and scripts carried inside segments
/// (`sh -c`, `eval`, heredocs fed to a shell)
fn expand_nested(parsed: &mut ParsedCommand, substitutions: Vec<String>, depth: usize) {
    let mut scripts = substitutions;
    for segment in &parsed.segments {
        let Some(verb) = segment.verb.as_deref() else {
            continue;
        };
        if SHELL_INTERPRETERS.contains(&verb) {
            if let Some(script) = shell_c_script(&segment.args) {
                scripts.push(script.to_string());
            }
            scripts.extend(segment.heredoc_bodies.iter().cloned());
        } else if verb == "eval" && !segment.args.is_empty() {
            scripts.push(segment.args.join(" "));
        }
    }

    for script in scripts.into_iter().filter(|s| !s.trim().is_empty()) {
        if depth + 1 > MAX_NESTING_DEPTH {
            parsed.anomalies.push(ParseAnomaly::DepthExceeded);
            break;
        }
        parsed.nested.push(parse_at_depth(&script, depth + 1));
    }
}

/// `-c <script>`, also combined short flags like `-lc`
fn shell_c_script(args: &[String]) -> Option<&str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let is_c_flag = arg == "-c" || (arg.starts_with('-') && !arg.starts_with("--") && arg[1..].contains('c'));
        if is_c_flag {
            return iter.next().map(String::as_str);
        }
        if !arg.starts_with('-') {
            // `bash script.sh -c` passes -c to the script
            return None;
        }
    }
    None
}

// ============================================================================
// SCANNER
// ============================================================================

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    buf: String,
    pending_op: Option<Operator>,
    /// (segment index, delimiter) for heredocs whose body starts at the next newline
    pending_heredocs: Vec<(usize, String)>,
    substitutions: Vec<String>,
    out: ParsedCommand,
}

impl Scanner {
    fn new(raw: &str) -> Self {
        Self {
            chars: raw.chars().collect(),
            pos: 0,
            buf: String::new(),
            pending_op: None,
            pending_heredocs: Vec::new(),
            substitutions: Vec::new(),
            out: ParsedCommand::default(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(mut self) -> (ParsedCommand, Vec<String>) {
        let mut quote: Option<char> = None;

        while let Some(c) = self.peek(0) {
            match quote {
                Some('\'') => {
                    self.buf.push(c);
                    if c == '\'' {
                        quote = None;
                    }
                    self.pos += 1;
                }
                Some(q) => {
                    match c {
                        '\\' => {
                            self.buf.push(c);
                            if let Some(next) = self.peek(1) {
                                self.buf.push(next);
                            }
                            self.pos += 2;
                        }
                        '$' if self.peek(1) == Some('(') => {
                            if !self.dollar_paren() {
                                break;
                            }
                        }
                        '`' => {
                            if !self.backtick() {
                                break;
                            }
                        }
                        _ => {
                            self.buf.push(c);
                            if c == q {
                                quote = None;
                            }
                            self.pos += 1;
                        }
                    }
                }
                None => {
                    if !self.unquoted(c, &mut quote) {
                        break;
                    }
                }
            }
        }

        if quote.is_some() {
            self.out.anomalies.push(ParseAnomaly::UnbalancedQuotes);
        }
        self.finish_segment();
        (self.out, self.substitutions)
    }

    /// Handle one character outside quotes. Returns false to stop scanning.
    fn unquoted(&mut self, c: char, quote: &mut Option<char>) -> bool {
        match c {
            '\'' | '"' => {
                *quote = Some(c);
                self.buf.push(c);
                self.pos += 1;
            }
            '\\' => {
                if self.peek(1) == Some('\n') {
                    self.buf.push(' ');
                } else {
                    self.buf.push(c);
                    if let Some(next) = self.peek(1) {
                        self.buf.push(next);
                    }
                }
                self.pos += 2;
            }
            '#' if self.at_token_start() => {
                while let Some(ch) = self.peek(0) {
                    if ch == '\n' {
                        break;
                    }
                    self.pos += 1;
                }
            }
            ';' => {
                self.pos += if self.peek(1) == Some(';') { 2 } else { 1 };
                self.operator(Operator::Sequence);
            }
            '\n' | '\r' => {
                self.pos += 1;
                self.operator(Operator::Sequence);
                self.read_heredoc_bodies();
            }
            '|' => match self.peek(1) {
                Some('|') => {
                    self.pos += 2;
                    self.operator(Operator::Or);
                }
                Some('&') => {
                    self.pos += 2;
                    self.operator(Operator::Pipe);
                }
                _ => {
                    self.pos += 1;
                    self.operator(Operator::Pipe);
                }
            },
            '&' => match self.peek(1) {
                Some('&') => {
                    self.pos += 2;
                    self.operator(Operator::And);
                }
                Some('>') => {
                    self.pos += 1;
                    self.redirect_out(None);
                }
                _ => {
                    self.pos += 1;
                    self.operator(Operator::Background);
                }
            },
            '>' => {
                let fd = self.pop_fd();
                self.redirect_out(fd.or(Some(1)));
            }
            '<' => self.redirect_in(),
            '(' | ')' => {
                self.buf.push(' ');
                self.pos += 1;
            }
            '$' if self.peek(1) == Some('(') => return self.dollar_paren(),
            '`' => return self.backtick(),
            _ => {
                self.buf.push(c);
                self.pos += 1;
            }
        }
        true
    }

    fn at_token_start(&self) -> bool {
        self.buf.chars().last().map_or(true, char::is_whitespace)
    }

    fn operator(&mut self, op: Operator) {
        self.finish_segment();
        self.out.operators.push(op);
        self.pending_op = Some(op);
    }

    fn finish_segment(&mut self) {
        let text = std::mem::take(&mut self.buf);
        if text.trim().is_empty() {
            return;
        }

        let tokens = match shell_words::split(&text) {
            Ok(tokens) => tokens,
            Err(_) => {
                self.out.anomalies.push(ParseAnomaly::Tokenize);
                text.split_whitespace().map(str::to_string).collect()
            }
        };

        let mut segment = Segment {
            joined_by: if self.out.segments.is_empty() { None } else { self.pending_op },
            ..Default::default()
        };

        let mut iter = tokens.into_iter();
        while let Some(token) = iter.next() {
            if let Some(op) = token.strip_prefix(REDIRECT_MARK) {
                let target = iter.next();
                if let (Some(rest), Some(target)) = (op.strip_prefix('>'), target) {
                    let (fd, append) = decode_redirect(rest);
                    segment.redirects.push(Redirect { target, append, fd });
                }
                continue;
            }
            if token == "{" || token == "}" {
                continue;
            }
            segment.argv.push(token);
        }

        if segment.argv.is_empty() && segment.redirects.is_empty() {
            return;
        }

        let (verb, args, wrappers) = resolve_invocation(&segment.argv);
        segment.verb = verb;
        segment.args = args;
        segment.wrappers = wrappers;
        self.out.segments.push(segment);
    }

    /// Strip a descriptor number written directly before `>` (`2>`)
    fn pop_fd(&mut self) -> Option<u32> {
        let digits: String = self
            .buf
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return None;
        }
        let prefix_len = self.buf.len() - digits.len();
        let before = self.buf[..prefix_len].chars().last();
        if before.map_or(true, char::is_whitespace) {
            self.buf.truncate(prefix_len);
            digits.chars().rev().collect::<String>().parse().ok()
        } else {
            None
        }
    }

    /// At `>`. `fd` of `None` means both streams (`&>`).
    fn redirect_out(&mut self, fd: Option<u32>) {
        self.pos += 1;
        let mut append = false;
        match self.peek(0) {
            Some('>') => {
                append = true;
                self.pos += 1;
            }
            Some('|') => self.pos += 1,
            _ => {}
        }

        // descriptor duplication (`2>&1`, `>&-`) writes no file
        if self.peek(0) == Some('&') {
            self.pos += 1;
            while let Some(c) = self.peek(0) {
                if c.is_ascii_digit() || c == '-' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return;
        }

        let fd_tag = fd.map_or_else(|| "&".to_string(), |n| n.to_string());
        let op = if append { ">>" } else { ">" };
        self.buf.push_str(&format!(" {}{}{} ", REDIRECT_MARK, op, fd_tag));
    }

    fn redirect_in(&mut self) {
        match (self.peek(1), self.peek(2)) {
            (Some('('), _) => {
                // process substitution `<(...)`
                self.pos += 1;
                self.paren_substitution();
            }
            (Some('<'), Some('<')) => {
                self.pos += 3;
                self.buf.push(' ');
                self.buf.push(REDIRECT_MARK);
                self.buf.push_str("< ");
            }
            (Some('<'), _) => {
                self.pos += 2;
                self.heredoc();
            }
            _ => {
                self.pos += 1;
                self.buf.push(' ');
                self.buf.push(REDIRECT_MARK);
                self.buf.push_str("< ");
            }
        }
    }

    fn heredoc(&mut self) {
        if self.peek(0) == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(0), Some(' ') | Some('\t')) {
            self.pos += 1;
        }
        let mut delimiter = String::new();
        while let Some(c) = self.peek(0) {
            if c.is_whitespace() || matches!(c, ';' | '|' | '&' | '<' | '>' | '(' | ')') {
                break;
            }
            if c != '\'' && c != '"' && c != '\\' {
                delimiter.push(c);
            }
            self.pos += 1;
        }
        self.out.has_heredoc = true;
        let segment_index = self.out.segments.len();
        self.pending_heredocs.push((segment_index, delimiter));
    }

    /// Consume heredoc bodies that start after the newline just scanned
    fn read_heredoc_bodies(&mut self) {
        let pending = std::mem::take(&mut self.pending_heredocs);
        for (segment_index, delimiter) in pending {
            let mut body = String::new();
            loop {
                let start = self.pos;
                while let Some(c) = self.peek(0) {
                    self.pos += 1;
                    if c == '\n' {
                        break;
                    }
                }
                if start == self.pos {
                    break;
                }
                let line: String = self.chars[start..self.pos].iter().collect();
                if line.trim() == delimiter {
                    break;
                }
                body.push_str(&line);
            }
            if let Some(segment) = self.out.segments.get_mut(segment_index) {
                segment.heredoc_bodies.push(body);
            }
        }
    }

    /// At `$(`. Returns false if the substitution never closes.
    fn dollar_paren(&mut self) -> bool {
        if self.peek(2) == Some('(') {
            // arithmetic expansion `$((...))`
            self.pos += 1;
            match matching_paren(&self.chars, self.pos) {
                Some(end) => {
                    self.buf.push('0');
                    self.pos = end + 1;
                    true
                }
                None => {
                    self.out.anomalies.push(ParseAnomaly::UnclosedSubstitution);
                    false
                }
            }
        } else {
            self.pos += 1;
            self.paren_substitution()
        }
    }

    /// At `(` opening a substitution body
    fn paren_substitution(&mut self) -> bool {
        match matching_paren(&self.chars, self.pos) {
            Some(end) => {
                let inner: String = self.chars[self.pos + 1..end].iter().collect();
                self.record_substitution(inner);
                self.pos = end + 1;
                true
            }
            None => {
                self.out.anomalies.push(ParseAnomaly::UnclosedSubstitution);
                false
            }
        }
    }

    fn backtick(&mut self) -> bool {
        let start = self.pos + 1;
        let mut i = start;
        while i < self.chars.len() {
            match self.chars[i] {
                '\\' => i += 2,
                '`' => {
                    let inner: String = self.chars[start..i].iter().collect();
                    self.record_substitution(inner);
                    self.pos = i + 1;
                    return true;
                }
                _ => i += 1,
            }
        }
        self.out.anomalies.push(ParseAnomaly::UnclosedSubstitution);
        false
    }

    fn record_substitution(&mut self, inner: String) {
        self.out.substitution_count += 1;
        self.buf.push_str(SUBSTITUTION_PLACEHOLDER);
        self.substitutions.push(inner);
    }
}

/// Index of the `)` closing the `(` at `open`, honouring quotes
fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = open;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some('"') if c == '\\' => i += 1,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '\\' => i += 1,
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// `>`/`>>` marker suffix is the descriptor tag written by `redirect_out`
fn decode_redirect(rest: &str) -> (Option<u32>, bool) {
    let (append, tag) = match rest.strip_prefix('>') {
        Some(tag) => (true, tag),
        None => (false, rest),
    };
    let fd = if tag == "&" { None } else { tag.parse().ok() };
    (fd, append)
}

// ============================================================================
// WRAPPER RESOLUTION
// ============================================================================

/// `sudo -u deploy env FOO=1 nice -n 5 rm -rf x` resolves to verb `rm`
/// with wrappers `[sudo, env, nice]`
pub fn resolve_invocation(argv: &[String]) -> (Option<String>, Vec<String>, Vec<String>) {
    let mut wrappers = Vec::new();
    let mut idx = 0;

    loop {
        while idx < argv.len() && is_assignment(&argv[idx]) {
            idx += 1;
        }
        let Some(word) = argv.get(idx) else {
            return (None, Vec::new(), wrappers);
        };
        let name = basename(word);

        let value_options: &[&str] = match name {
            "sudo" | "doas" => &["-u", "-g", "-C", "-h", "-p", "-U", "-r", "-t", "-D", "-R"],
            "env" => &["-u", "-C", "-S"],
            "nice" => &["-n"],
            "timeout" => &["-s", "-k", "--signal", "--kill-after"],
            "xargs" => &["-I", "-n", "-P", "-L", "-d", "-E", "-s", "-a"],
            "nohup" | "time" | "command" | "exec" | "builtin" | "stdbuf" => &[],
            "!" | "then" | "do" | "else" | "elif" | "if" | "while" | "until" => {
                idx += 1;
                continue;
            }
            _ => break,
        };

        wrappers.push(name.to_string());
        idx += 1;
        while let Some(arg) = argv.get(idx) {
            if arg == "--" {
                idx += 1;
                break;
            }
            if name == "env" && is_assignment(arg) {
                idx += 1;
                continue;
            }
            if !arg.starts_with('-') || arg == "-" {
                break;
            }
            idx += if value_options.contains(&arg.as_str()) { 2 } else { 1 };
        }
        if name == "timeout" && argv.get(idx).is_some() {
            // duration
            idx += 1;
        }
    }

    let verb = basename(&argv[idx]).to_string();
    let args = argv[idx + 1..].to_vec();
    (Some(verb), args, wrappers)
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// `/usr/bin/rm` -> `rm`
pub fn basename(word: &str) -> &str {
    Path::new(word)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(word)
}

// ============================================================================
// TESTS
// ============================================================================
