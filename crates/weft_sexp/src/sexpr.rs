//! A minimal tagged-list text grammar: whitespace/comma-separated atoms
//! and `[...]` lists. There is no ecosystem crate for this bespoke
//! grammar, so the reader and writer are hand-rolled rather than built on
//! `serde`.

use weft_core::error::{Error, Result};

const CODEC: &str = "sexp";

fn codec_err(message: impl Into<String>) -> Error {
    Error::Codec {
        codec: CODEC,
        message: message.into(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SExpr {
    Null,
    Bool(bool),
    Int(String),
    Float(f64),
    Str(String),
    List(Vec<SExpr>),
}

pub fn write(expr: &SExpr, out: &mut String) {
    match expr {
        SExpr::Null => out.push_str("null"),
        SExpr::Bool(true) => out.push_str("true"),
        SExpr::Bool(false) => out.push_str("false"),
        SExpr::Int(digits) => out.push_str(digits),
        SExpr::Float(f) => out.push_str(&format!("{f}")),
        SExpr::Str(s) => write_string(s, out),
        SExpr::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write(item, out);
            }
            out.push(']');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

pub fn parse(text: &str) -> Result<SExpr> {
    let mut p = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    p.skip_ws();
    let expr = p.parse_expr()?;
    p.skip_ws();
    if p.pos != p.chars.len() {
        return Err(codec_err("trailing input after top-level expression"));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace() || c == ',') {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<SExpr> {
        self.skip_ws();
        match self.peek() {
            Some('[') => self.parse_list(),
            Some('"') => self.parse_string().map(SExpr::Str),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(_) => self.parse_symbol(),
            None => Err(codec_err("unexpected end of input")),
        }
    }

    fn parse_list(&mut self) -> Result<SExpr> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(']') {
                self.bump();
                break;
            }
            items.push(self.parse_expr()?);
            self.skip_ws();
        }
        Ok(SExpr::List(items))
    }

    fn parse_string(&mut self) -> Result<String> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(other) => s.push(other),
                    None => return Err(codec_err("unterminated escape in string")),
                },
                Some(c) => s.push(c),
                None => return Err(codec_err("unterminated string")),
            }
        }
        Ok(s)
    }

    fn parse_number(&mut self) -> Result<SExpr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.bump();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>().map(SExpr::Float).map_err(|e| codec_err(e.to_string()))
        } else {
            Ok(SExpr::Int(text))
        }
    }

    fn parse_symbol(&mut self) -> Result<SExpr> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        if self.pos == start {
            return Err(codec_err(format!(
                "unexpected character {:?}",
                self.peek().unwrap_or(' ')
            )));
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "null" => Ok(SExpr::Null),
            "true" => Ok(SExpr::Bool(true)),
            "false" => Ok(SExpr::Bool(false)),
            other => Err(codec_err(format!("unknown bareword `{other}`"))),
        }
    }
}
