//! A forgiving JSON reader for object literals written the way models write
//! them: single or backtick quotes, bare keys, trailing commas, comments,
//! raw newlines inside strings.

use serde_json::{Map, Number, Value};

pub fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let mut reader = Reader {
        chars: text.chars().collect(),
        pos: 0,
    };
    reader.skip_trivia();
    let value = reader.value()?;
    reader.skip_trivia();
    if reader.pos != reader.chars.len() {
        return None;
    }
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => self.pos += 1,
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    while self.pos < self.chars.len() {
                        if self.peek() == Some('*') && self.peek_at(1) == Some('/') {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            '{' => self.object(),
            '[' => self.array(),
            '"' | '\'' | '`' => self.string().map(Value::String),
            c if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            c if is_ident_start(c) => match self.identifier().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                "null" | "undefined" => Some(Value::Null),
                _ => None,
            },
            _ => None,
        }
    }

    fn object(&mut self) -> Option<Value> {
        self.bump();
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            if self.peek()? == '}' {
                self.bump();
                return Some(Value::Object(map));
            }
            let key = match self.peek()? {
                '"' | '\'' | '`' => self.string()?,
                c if is_ident_start(c) || c.is_ascii_digit() => self.identifier(),
                _ => return None,
            };
            self.skip_trivia();
            if self.bump()? != ':' {
                return None;
            }
            self.skip_trivia();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_trivia();
            match self.bump()? {
                ',' => continue,
                '}' => return Some(Value::Object(map)),
                _ => return None,
            }
        }
    }

    fn array(&mut self) -> Option<Value> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek()? == ']' {
                self.bump();
                return Some(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_trivia();
            match self.bump()? {
                ',' => continue,
                ']' => return Some(Value::Array(items)),
                _ => return None,
            }
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            let c = self.bump()?;
            if c == quote {
                return Some(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            match self.bump()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'v' => out.push('\u{b}'),
                '0' => out.push('\0'),
                '\n' => {}
                'u' => out.push(self.hex_escape(4)?),
                'x' => out.push(self.hex_escape(2)?),
                other => out.push(other),
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Option<char> {
        let hex: String = (0..digits).map(|_| self.bump()).collect::<Option<_>>()?;
        char::from_u32(u32::from_str_radix(&hex, 16).ok()?)
    }

    fn identifier(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let raw = raw.strip_prefix('+').unwrap_or(&raw);
        if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            return i64::from_str_radix(hex, 16).ok().map(Value::from);
        }
        if let Ok(int) = raw.parse::<i64>() {
            return Some(Value::from(int));
        }
        let float = raw.parse::<f64>().ok()?;
        Number::from_f64(float).map(Value::Number)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_javascript_style_literals() {
        let map = parse_object(
            "{ path: 'src/a.js', // target\n  content: `line one\nline two`, retries: +3, ratio: .5, }",
        )
        .expect("object");
        assert_eq!(
            Value::Object(map),
            json!({"path": "src/a.js", "content": "line one\nline two", "retries": 3, "ratio": 0.5})
        );
    }

    #[test]
    fn handles_escapes_and_nesting() {
        let map = parse_object(r#"{"files": [{'path': 'a\'b.txt', "content": "A\tB"},], /* x */}"#)
            .expect("object");
        assert_eq!(map["files"][0]["path"], "a'b.txt");
        assert_eq!(map["files"][0]["content"], "A\tB");
    }

    #[test]
    fn rejects_non_objects_and_trailing_text() {
        assert!(parse_object("[1, 2]").is_none());
        assert!(parse_object("{a: 1} trailing").is_none());
        assert!(parse_object("{a: 'unterminated}").is_none());
        assert!(parse_object("{a: nope}").is_none());
    }
}
