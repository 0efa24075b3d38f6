//! Template tokenizer and parser.
//!
//! Source text is split into literal text and three kinds of markers:
//!
//! ```text
//! {{ expr }}      escaped interpolation
//! {{{ expr }}}    raw interpolation
//! {% tag ... %}   control and composition tags
//! {# ... #}       comment, dropped
//! ```
//!
//! Block tags (`if`, `for`, `define`) nest and close with `{% end %}`.

use super::TemplateError;
use serde::{Deserialize, Serialize};

/// A value reference inside a marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    /// Dotted lookup such as `page.meta.tags` or `item.pages.0`.
    Path(Vec<String>),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Text(String),
    Emit {
        expr: Expr,
        escape: bool,
    },
    If {
        negate: bool,
        cond: Expr,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    For {
        binding: String,
        iter: Expr,
        body: Vec<Node>,
    },
    Define {
        name: String,
        body: Vec<Node>,
    },
    Body,
    Section {
        name: String,
        required: bool,
    },
    Title,
    Include(String),
    Blurb(Expr),
}

#[derive(Debug)]
enum Word {
    Ident(String),
    Str(String),
}

#[derive(Debug)]
enum Token {
    Text(String),
    Emit { expr: Expr, escape: bool },
    Tag { words: Vec<Word>, line: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Else,
    End,
}

fn syntax(line: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        line,
        message: message.into(),
    }
}

/// Parse template source into its node tree.
pub fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens: tokens.into_iter(),
    };
    match parser.block()? {
        (nodes, None) => Ok(nodes),
        (_, Some((Terminator::Else, line))) => Err(syntax(line, "'else' without 'if'")),
        (_, Some((Terminator::End, line))) => Err(syntax(line, "'end' without an open block")),
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

fn find_open(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    text.match_indices('{')
        .map(|(idx, _)| idx)
        .find(|&idx| matches!(bytes.get(idx + 1), Some(b'{' | b'%' | b'#')))
}

fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut line = 1;

    while !rest.is_empty() {
        let Some(start) = find_open(rest) else {
            tokens.push(Token::Text(rest.to_string()));
            break;
        };
        if start > 0 {
            let text = &rest[..start];
            line += text.matches('\n').count();
            tokens.push(Token::Text(text.to_string()));
            rest = &rest[start..];
        }

        let (open, close) = if rest.starts_with("{{{") {
            ("{{{", "}}}")
        } else if rest.starts_with("{{") {
            ("{{", "}}")
        } else if rest.starts_with("{%") {
            ("{%", "%}")
        } else {
            ("{#", "#}")
        };
        let after_open = &rest[open.len()..];
        let end = after_open
            .find(close)
            .ok_or_else(|| syntax(line, format!("'{open}' is never closed")))?;
        let inner = &after_open[..end];

        match open {
            "{#" => {}
            "{%" => tokens.push(Token::Tag {
                words: lex_words(inner, line)?,
                line,
            }),
            _ => tokens.push(Token::Emit {
                expr: single_expr(inner, line)?,
                escape: open == "{{",
            }),
        }

        line += inner.matches('\n').count();
        rest = &after_open[end + close.len()..];
    }

    Ok(tokens)
}

fn lex_words(inner: &str, line: usize) -> Result<Vec<Word>, TemplateError> {
    let mut words = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => break,
                    },
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(syntax(line, "unterminated string literal"));
            }
            words.push(Word::Str(value));
            continue;
        }
        let mut ident = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '"' {
                break;
            }
            ident.push(c);
            chars.next();
        }
        words.push(Word::Ident(ident));
    }
    Ok(words)
}

fn single_expr(inner: &str, line: usize) -> Result<Expr, TemplateError> {
    let mut words = lex_words(inner, line)?;
    if words.len() != 1 {
        return Err(syntax(line, "expected exactly one expression"));
    }
    word_expr(words.remove(0), line)
}

fn word_expr(word: Word, line: usize) -> Result<Expr, TemplateError> {
    match word {
        Word::Str(s) => Ok(Expr::Literal(s)),
        Word::Ident(ident) => {
            let valid = ident
                .split('.')
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'));
            if !valid {
                return Err(syntax(line, format!("invalid expression '{ident}'")));
            }
            Ok(Expr::Path(ident.split('.').map(str::to_string).collect()))
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    /// Parse nodes until a terminator tag or the end of input.
    fn block(&mut self) -> Result<(Vec<Node>, Option<(Terminator, usize)>), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Emit { expr, escape } => nodes.push(Node::Emit { expr, escape }),
                Token::Tag { words, line } => match self.tag(words, line)? {
                    Ok(node) => nodes.push(node),
                    Err(terminator) => return Ok((nodes, Some((terminator, line)))),
                },
            }
        }
        Ok((nodes, None))
    }

    /// Parse the body of a block that must close with `{% end %}`.
    fn closed_block(&mut self, tag: &str, line: usize) -> Result<Vec<Node>, TemplateError> {
        match self.block()? {
            (nodes, Some((Terminator::End, _))) => Ok(nodes),
            (_, Some((Terminator::Else, else_line))) => {
                Err(syntax(else_line, format!("'else' inside '{tag}'")))
            }
            (_, None) => Err(syntax(line, format!("'{tag}' is never closed with 'end'"))),
        }
    }

    fn tag(
        &mut self,
        words: Vec<Word>,
        line: usize,
    ) -> Result<Result<Node, Terminator>, TemplateError> {
        let mut words = words.into_iter();
        let keyword = match words.next() {
            Some(Word::Ident(keyword)) => keyword,
            Some(Word::Str(_)) => return Err(syntax(line, "tag must start with a keyword")),
            None => return Err(syntax(line, "empty tag")),
        };
        let args: Vec<Word> = words.collect();

        let node = match keyword.as_str() {
            "else" => {
                no_args(&keyword, &args, line)?;
                return Ok(Err(Terminator::Else));
            }
            "end" => {
                no_args(&keyword, &args, line)?;
                return Ok(Err(Terminator::End));
            }
            "if" => {
                let mut args = args.into_iter();
                let (negate, cond) = match (args.next(), args.next(), args.next()) {
                    (Some(Word::Ident(not)), Some(cond), None) if not == "not" => {
                        (true, word_expr(cond, line)?)
                    }
                    (Some(cond), None, None) => (false, word_expr(cond, line)?),
                    _ => return Err(syntax(line, "expected '{% if [not] expr %}'")),
                };
                let (then, otherwise) = match self.block()? {
                    (then, Some((Terminator::End, _))) => (then, Vec::new()),
                    (then, Some((Terminator::Else, _))) => (then, self.closed_block("else", line)?),
                    (_, None) => return Err(syntax(line, "'if' is never closed with 'end'")),
                };
                Node::If {
                    negate,
                    cond,
                    then,
                    otherwise,
                }
            }
            "for" => {
                let mut args = args.into_iter();
                let (binding, iter) = match (args.next(), args.next(), args.next(), args.next()) {
                    (Some(Word::Ident(binding)), Some(Word::Ident(kw)), Some(iter), None)
                        if kw == "in" && !binding.contains('.') =>
                    {
                        (binding, word_expr(iter, line)?)
                    }
                    _ => return Err(syntax(line, "expected '{% for name in expr %}'")),
                };
                Node::For {
                    binding,
                    iter,
                    body: self.closed_block("for", line)?,
                }
            }
            "define" => {
                let name = single_string(&keyword, args, line)?;
                Node::Define {
                    name,
                    body: self.closed_block("define", line)?,
                }
            }
            "body" => {
                no_args(&keyword, &args, line)?;
                Node::Body
            }
            "title" => {
                no_args(&keyword, &args, line)?;
                Node::Title
            }
            "section" => {
                let mut args = args.into_iter();
                match (args.next(), args.next(), args.next()) {
                    (Some(Word::Str(name)), None, None) => Node::Section {
                        name,
                        required: true,
                    },
                    (Some(Word::Str(name)), Some(Word::Ident(flag)), None) if flag == "optional" => {
                        Node::Section {
                            name,
                            required: false,
                        }
                    }
                    _ => return Err(syntax(line, "expected '{% section \"name\" [optional] %}'")),
                }
            }
            "include" => Node::Include(single_string(&keyword, args, line)?),
            "blurb" => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(target), None) => Node::Blurb(word_expr(target, line)?),
                    _ => return Err(syntax(line, "expected '{% blurb expr %}'")),
                }
            }
            other => return Err(syntax(line, format!("unknown tag '{other}'"))),
        };
        Ok(Ok(node))
    }
}

fn no_args(keyword: &str, args: &[Word], line: usize) -> Result<(), TemplateError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(syntax(line, format!("'{keyword}' takes no arguments")))
    }
}

fn single_string(keyword: &str, args: Vec<Word>, line: usize) -> Result<String, TemplateError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(Word::Str(value)), None) => Ok(value),
        _ => Err(syntax(
            line,
            format!("expected '{{% {keyword} \"...\" %}}'"),
        )),
    }
}
