//! Permissive literal decoder.
//!
//! Accepts the literal syntax remote tools commonly emit when they print a
//! value instead of serializing it: single- or double-quoted strings,
//! `True`/`False`/`None`, integers with leading zeros, tuples and sets
//! (decoded as arrays), and dicts whose keys may be non-strings.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Nesting limit for containers.
const MAX_DEPTH: usize = 128;

/// Literal decode error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("invalid escape sequence at offset {0}")]
    InvalidEscape(usize),
    #[error("invalid number at offset {0}")]
    InvalidNumber(usize),
    #[error("nesting deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("trailing input at offset {0}")]
    TrailingInput(usize),
}

/// Decode `input` as a single literal.
///
/// # Errors
/// Returns error if `input` is not exactly one well-formed literal.
pub fn parse_literal(input: &str) -> Result<Value, LiteralError> {
    let mut parser = Parser {
        chars: input.char_indices().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    match parser.peek() {
        None => Ok(value),
        Some(_) => Err(LiteralError::TrailingInput(parser.offset())),
    }
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or_else(
            || self.chars.last().map_or(0, |&(i, c)| i + c.len_utf8()),
            |&(i, _)| i,
        )
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> LiteralError {
        self.peek().map_or(LiteralError::UnexpectedEnd, |ch| {
            LiteralError::UnexpectedChar {
                ch,
                offset: self.offset(),
            }
        })
    }

    fn expect(&mut self, want: char) -> Result<(), LiteralError> {
        self.skip_ws();
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn value(&mut self) -> Result<Value, LiteralError> {
        self.skip_ws();
        match self.peek() {
            None => Err(LiteralError::UnexpectedEnd),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('{') => self.dict_or_set(),
            Some(q @ ('"' | '\'')) => self.string(q).map(Value::String),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            Some(c) if c.is_alphabetic() => self.keyword(),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn enter(&mut self) -> Result<(), LiteralError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(LiteralError::TooDeep)
        } else {
            Ok(())
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, LiteralError> {
        self.enter()?;
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                break;
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some(c) if c == close => break,
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
        self.depth -= 1;
        Ok(Value::Array(items))
    }

    fn dict_or_set(&mut self) -> Result<Value, LiteralError> {
        self.enter()?;
        self.expect('{')?;
        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            self.depth -= 1;
            return Ok(Value::Object(Map::new()));
        }

        let first = self.value()?;
        self.skip_ws();
        let result = if self.peek() == Some(':') {
            self.pos += 1;
            let mut map = Map::new();
            let value = self.value()?;
            map.insert(key_string(first), value);
            self.dict_rest(&mut map)?;
            Value::Object(map)
        } else {
            let mut items = vec![first];
            self.set_rest(&mut items)?;
            Value::Array(items)
        };
        self.depth -= 1;
        Ok(result)
    }

    fn dict_rest(&mut self, map: &mut Map<String, Value>) -> Result<(), LiteralError> {
        loop {
            self.skip_ws();
            match self.bump() {
                Some('}') => return Ok(()),
                Some(',') => {
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        self.pos += 1;
                        return Ok(());
                    }
                    let key = self.value()?;
                    self.expect(':')?;
                    let value = self.value()?;
                    map.insert(key_string(key), value);
                }
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
    }

    fn set_rest(&mut self, items: &mut Vec<Value>) -> Result<(), LiteralError> {
        loop {
            self.skip_ws();
            match self.bump() {
                Some('}') => return Ok(()),
                Some(',') => {
                    self.skip_ws();
                    if self.peek() == Some('}') {
                        self.pos += 1;
                        return Ok(());
                    }
                    items.push(self.value()?);
                }
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(LiteralError::UnexpectedEnd),
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<String, LiteralError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let escape_at = self.offset();
            match self.bump() {
                None | Some('\n') => return Err(LiteralError::UnexpectedEnd),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => {
                    let c = self.bump().ok_or(LiteralError::UnexpectedEnd)?;
                    match c {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' | '\'' | '"' => out.push(c),
                        'x' => out.push(self.hex_escape(2, escape_at)?),
                        'u' => out.push(self.hex_escape(4, escape_at)?),
                        'U' => out.push(self.hex_escape(8, escape_at)?),
                        '\n' => {}
                        _ => return Err(LiteralError::InvalidEscape(escape_at)),
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn hex_escape(&mut self, len: usize, at: usize) -> Result<char, LiteralError> {
        let mut code = 0u32;
        for _ in 0..len {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or(LiteralError::InvalidEscape(at))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or(LiteralError::InvalidEscape(at))
    }

    fn number(&mut self) -> Result<Value, LiteralError> {
        let start = self.offset();
        let mut text = String::new();
        if let Some(sign @ ('-' | '+')) = self.peek() {
            self.pos += 1;
            if sign == '-' {
                text.push('-');
            }
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' | 'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                }
                '-' | '+' if text.ends_with(['e', 'E']) => text.push(c),
                _ => break,
            }
            self.pos += 1;
        }

        if is_float {
            let parsed: f64 = text.parse().map_err(|_| LiteralError::InvalidNumber(start))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or(LiteralError::InvalidNumber(start))
        } else if let Ok(n) = text.parse::<i64>() {
            Ok(Value::Number(n.into()))
        } else if let Ok(n) = text.parse::<u64>() {
            Ok(Value::Number(n.into()))
        } else {
            let parsed: f64 = text.parse().map_err(|_| LiteralError::InvalidNumber(start))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or(LiteralError::InvalidNumber(start))
        }
    }

    fn keyword(&mut self) -> Result<Value, LiteralError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().map(|&(_, c)| c).collect();
        match word.as_str() {
            "True" | "true" => Ok(Value::Bool(true)),
            "False" | "false" => Ok(Value::Bool(false)),
            "None" | "null" => Ok(Value::Null),
            _ => {
                self.pos = start;
                Err(self.unexpected())
            }
        }
    }
}

fn key_string(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_python_style_containers() {
        let value = parse_literal("[{'name': 'users', 'rows': 3}, ('a', True, None)]").unwrap();
        assert_eq!(
            value,
            json!([{"name": "users", "rows": 3}, ["a", true, null]])
        );
    }

    #[test]
    fn test_leading_zeros_decode_as_integer() {
        assert_eq!(parse_literal("007").unwrap(), json!(7));
        assert_eq!(parse_literal("-0012").unwrap(), json!(-12));
    }

    #[test]
    fn test_floats_and_exponents() {
        assert_eq!(parse_literal("1.5").unwrap(), json!(1.5));
        assert_eq!(parse_literal("2e3").unwrap(), json!(2000.0));
    }

    #[test]
    fn test_non_string_dict_keys() {
        assert_eq!(parse_literal("{1: 'a', True: 'b'}").unwrap(), json!({"1": "a", "true": "b"}));
    }

    #[test]
    fn test_sets_and_trailing_commas() {
        assert_eq!(parse_literal("{1, 2,}").unwrap(), json!([1, 2]));
        assert_eq!(parse_literal("(1,)").unwrap(), json!([1]));
        assert_eq!(parse_literal("{}").unwrap(), json!({}));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(parse_literal(r"'it\'s\n\x41'").unwrap(), json!("it's\nA"));
    }

    #[test]
    fn test_rejects_bare_words_and_trailing_input() {
        assert!(matches!(
            parse_literal("hello"),
            Err(LiteralError::UnexpectedChar { ch: 'h', offset: 0 })
        ));
        assert!(matches!(parse_literal("1 2"), Err(LiteralError::TrailingInput(2))));
        assert_eq!(parse_literal("[1, 2"), Err(LiteralError::UnexpectedEnd));
    }

    #[test]
    fn test_depth_limit() {
        let deep = "[".repeat(MAX_DEPTH + 1) + &"]".repeat(MAX_DEPTH + 1);
        assert_eq!(parse_literal(&deep), Err(LiteralError::TooDeep));
    }
}
