//! The canonical reader.
//!
//! Contract: `parse(source) -> { root, diagnostics }`. The first diagnostic,
//! if any, is fatal for program load; callers never evaluate a tree that
//! arrived with diagnostics.

use std::iter::Peekable;
use std::str::CharIndices;

use aos_tree::{AttrValue, Diagnostic, Pos, Span, Tree};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message} at line {line}, column {column}")]
struct ReadError {
    code: &'static str,
    message: String,
    line: u32,
    column: u32,
}

impl ReadError {
    fn at(code: &'static str, message: impl Into<String>, pos: Pos) -> Self {
        Self {
            code,
            message: message.into(),
            line: pos.line,
            column: pos.column,
        }
    }

    fn into_diagnostic(self) -> Diagnostic {
        let message = self.to_string();
        Diagnostic::new(self.code, message)
    }
}

/// Result of parsing one source text.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub root: Option<Tree>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parses exactly one tree from `source`. Trailing non-trivia input after
/// the root tree is a `PAR004` diagnostic.
pub fn parse(source: &str) -> ParseOutcome {
    let mut reader = Reader::new(source);
    match reader.read_tree() {
        Ok(root) => {
            reader.skip_trivia();
            let mut diagnostics = Vec::new();
            if reader.peek().is_some() {
                let pos = reader.pos();
                diagnostics.push(
                    ReadError::at("PAR004", "trailing input after root tree", pos)
                        .into_diagnostic(),
                );
            }
            ParseOutcome {
                root: Some(root),
                diagnostics,
            }
        }
        Err(error) => ParseOutcome {
            root: None,
            diagnostics: vec![error.into_diagnostic()],
        },
    }
}

struct Reader<'a> {
    chars: Peekable<CharIndices<'a>>,
    len: usize,
    line: u32,
    column: u32,
}

impl<'a> Reader<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.char_indices().peekable(),
            len: source.len(),
            line: 1,
            column: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn pos(&mut self) -> Pos {
        let offset = self.chars.peek().map(|(i, _)| *i).unwrap_or(self.len) as u32;
        Pos {
            line: self.line,
            column: self.column,
            offset,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(ch) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_tree(&mut self) -> Result<Tree, ReadError> {
        self.skip_trivia();
        let start = self.pos();
        match self.peek() {
            Some('(') => {
                self.bump();
            }
            Some(other) => {
                return Err(ReadError::at(
                    "PAR002",
                    format!("expected '(' but found {other:?}"),
                    start,
                ));
            }
            None => {
                return Err(ReadError::at("PAR001", "unexpected end of input", start));
            }
        }

        let kind = self.read_word()?;
        let mut tree = Tree::new(kind);

        self.skip_trivia();
        if self.peek() == Some('@') {
            self.bump();
            tree.id = self.read_word()?;
        }

        loop {
            self.skip_trivia();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    break;
                }
                Some('(') => {
                    let child = self.read_tree()?;
                    tree.children.push(child);
                }
                Some(ch) if is_word_start(ch) => {
                    let key = self.read_word()?;
                    self.skip_trivia();
                    if self.peek() != Some('=') {
                        let pos = self.pos();
                        return Err(ReadError::at(
                            "PAR002",
                            format!("expected '=' after attribute key {key:?}"),
                            pos,
                        ));
                    }
                    self.bump();
                    self.skip_trivia();
                    let value = self.read_scalar()?;
                    tree.attrs.insert(key, value);
                }
                Some(other) => {
                    let pos = self.pos();
                    return Err(ReadError::at(
                        "PAR002",
                        format!("unexpected character {other:?}"),
                        pos,
                    ));
                }
                None => {
                    let pos = self.pos();
                    return Err(ReadError::at("PAR001", "unexpected end of input", pos));
                }
            }
        }

        let end = self.pos();
        tree.span = Span { start, end };
        Ok(tree)
    }

    fn read_word(&mut self) -> Result<String, ReadError> {
        let pos = self.pos();
        match self.peek() {
            Some(ch) if is_word_start(ch) => {}
            Some(other) => {
                return Err(ReadError::at(
                    "PAR002",
                    format!("expected identifier but found {other:?}"),
                    pos,
                ));
            }
            None => {
                return Err(ReadError::at("PAR001", "unexpected end of input", pos));
            }
        }
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if is_word_continue(ch) {
                word.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        Ok(word)
    }

    fn read_scalar(&mut self) -> Result<AttrValue, ReadError> {
        let pos = self.pos();
        match self.peek() {
            Some('"') => self.read_string(),
            Some(ch) if ch == '-' || ch.is_ascii_digit() => {
                let mut text = String::new();
                if ch == '-' {
                    text.push(ch);
                    self.bump();
                }
                while let Some(digit) = self.peek() {
                    if digit.is_ascii_digit() {
                        text.push(digit);
                        self.bump();
                    } else {
                        break;
                    }
                }
                text.parse::<i64>().map(AttrValue::Int).map_err(|_| {
                    ReadError::at("PAR002", format!("invalid integer literal {text:?}"), pos)
                })
            }
            Some(ch) if is_word_start(ch) => {
                let word = self.read_word()?;
                Ok(match word.as_str() {
                    "true" => AttrValue::Bool(true),
                    "false" => AttrValue::Bool(false),
                    _ => AttrValue::Ident(word),
                })
            }
            Some(other) => Err(ReadError::at(
                "PAR002",
                format!("expected attribute value but found {other:?}"),
                pos,
            )),
            None => Err(ReadError::at("PAR001", "unexpected end of input", pos)),
        }
    }

    fn read_string(&mut self) -> Result<AttrValue, ReadError> {
        // Opening quote already peeked by the caller.
        self.bump();
        let mut text = String::new();
        loop {
            let pos = self.pos();
            match self.bump() {
                Some('"') => return Ok(AttrValue::Str(text)),
                Some('\\') => match self.bump() {
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some('n') => text.push('\n'),
                    Some('r') => text.push('\r'),
                    Some('t') => text.push('\t'),
                    Some(other) => {
                        return Err(ReadError::at(
                            "PAR003",
                            format!("unknown escape sequence \\{other}"),
                            pos,
                        ));
                    }
                    None => {
                        return Err(ReadError::at("PAR001", "unterminated string", pos));
                    }
                },
                Some(other) => text.push(other),
                None => {
                    return Err(ReadError::at("PAR001", "unterminated string", pos));
                }
            }
        }
    }
}

fn is_word_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_word_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '.'
}

#[cfg(test)]
mod tests {
    use aos_tree::AttrValue;

    use super::parse;

    #[test]
    fn parses_attrs_ids_and_children() {
        let source = r#"
            ; kernel result
            (Trace @t1
              (Step kind="EventDispatch" event="Start")
              (Step kind="CommandExecute" index=2 replay=false))
        "#;
        let outcome = parse(source);
        assert!(outcome.diagnostics.is_empty(), "{:?}", outcome.diagnostics);
        let root = outcome.root.unwrap();
        assert_eq!(root.kind, "Trace");
        assert_eq!(root.id, "t1");
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].attr_int("index"), Some(2));
        assert_eq!(root.children[1].attr_bool("replay"), Some(false));
    }

    #[test]
    fn scalar_types_are_distinguished() {
        let root = parse(r#"(Lit a="x" b=3 c=true d=runtime.start e=-7)"#)
            .root
            .unwrap();
        assert_eq!(root.attr("a"), Some(&AttrValue::Str("x".into())));
        assert_eq!(root.attr("b"), Some(&AttrValue::Int(3)));
        assert_eq!(root.attr("c"), Some(&AttrValue::Bool(true)));
        assert_eq!(
            root.attr("d"),
            Some(&AttrValue::Ident("runtime.start".into()))
        );
        assert_eq!(root.attr("e"), Some(&AttrValue::Int(-7)));
    }

    #[test]
    fn spans_track_source_positions() {
        let root = parse("  (Lit value=1)").root.unwrap();
        assert_eq!(root.span.start.offset, 2);
        assert_eq!(root.span.start.line, 1);
        assert_eq!(root.span.start.column, 3);
        assert_eq!(root.span.end.offset, 15);
    }

    #[test]
    fn truncated_input_is_par001() {
        let outcome = parse("(Block (Lit value=1)");
        assert!(outcome.root.is_none());
        assert_eq!(outcome.diagnostics[0].code, "PAR001");
    }

    #[test]
    fn bad_escape_is_par003() {
        let outcome = parse(r#"(Lit value="a\qb")"#);
        assert_eq!(outcome.diagnostics[0].code, "PAR003");
    }

    #[test]
    fn trailing_input_is_par004() {
        let outcome = parse("(Lit value=1) (Lit value=2)");
        assert!(outcome.root.is_some());
        assert_eq!(outcome.diagnostics[0].code, "PAR004");
    }
}
