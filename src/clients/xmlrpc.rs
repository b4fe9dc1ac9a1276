//! Minimal XML-RPC codec: enough of the wire format to talk to the
//! subtitle service.

use super::ClientError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    String(String),
    Double(f64),
    Base64(Vec<u8>),
    Array(Vec<Self>),
    Struct(BTreeMap<String, Self>),
    Nil,
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integers, and strings holding integers. The subtitle service sends
    /// most numbers as strings.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_struct(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Struct member lookup; `None` for missing members and non-structs.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_struct().and_then(|m| m.get(key))
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            Self::Int(i) => {
                let _ = write!(out, "<int>{i}</int>");
            }
            Self::Bool(b) => {
                let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
            }
            Self::String(s) => {
                let _ = write!(out, "<string>{}</string>", escape(s.as_str()));
            }
            Self::Double(d) => {
                let _ = write!(out, "<double>{d}</double>");
            }
            Self::Base64(bytes) => {
                let _ = write!(out, "<base64>{}</base64>", STANDARD.encode(bytes));
            }
            Self::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write_xml(out);
                }
                out.push_str("</data></array>");
            }
            Self::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    let _ = write!(out, "<member><name>{}</name>", escape(name.as_str()));
                    value.write_xml(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            Self::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(members: BTreeMap<String, Value>) -> Self {
        Self::Struct(members)
    }
}

/// Renders a `methodCall` document.
#[must_use]
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from(r#"<?xml version="1.0"?><methodCall><methodName>"#);
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        param.write_xml(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
}

fn malformed(message: impl Into<String>) -> ClientError {
    ClientError::Decode(message.into())
}

fn resolve_entity(name: &str) -> Result<char, ClientError> {
    let code = match name {
        "amp" => return Ok('&'),
        "lt" => return Ok('<'),
        "gt" => return Ok('>'),
        "quot" => return Ok('"'),
        "apos" => return Ok('\''),
        _ => name
            .strip_prefix("#x")
            .map(|hex| u32::from_str_radix(hex, 16))
            .or_else(|| name.strip_prefix('#').map(str::parse::<u32>))
            .and_then(Result::ok),
    };
    code.and_then(char::from_u32)
        .ok_or_else(|| malformed(format!("unknown entity &{name};")))
}

fn utf8(bytes: &[u8]) -> Result<&str, ClientError> {
    std::str::from_utf8(bytes).map_err(|e| malformed(e.to_string()))
}

/// Flattens the document into open/close/text tokens, merging adjacent text,
/// entity references and CDATA into a single text token.
fn tokenize(xml: &str) -> Result<Vec<Token>, ClientError> {
    let mut reader = Reader::from_str(xml);
    let mut tokens = Vec::new();
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("invalid XML: {e}")))?;

        match event {
            Event::Text(t) => text.push_str(utf8(&t)?),
            Event::CData(t) => text.push_str(utf8(&t)?),
            Event::GeneralRef(r) => text.push(resolve_entity(utf8(&r)?)?),
            Event::Start(_) | Event::End(_) | Event::Empty(_) | Event::Eof
                if !text.is_empty() =>
            {
                tokens.push(Token::Text(std::mem::take(&mut text)));
                match event {
                    Event::Eof => break,
                    other => tokens.push(structural(&other)?),
                }
            }
            Event::Eof => break,
            Event::Start(_) | Event::End(_) | Event::Empty(_) => tokens.push(structural(&event)?),
            _ => {}
        }
    }

    Ok(tokens)
}

fn structural(event: &Event<'_>) -> Result<Token, ClientError> {
    Ok(match event {
        Event::Start(e) => Token::Open(utf8(e.name().as_ref())?.to_string()),
        Event::End(e) => Token::Close(utf8(e.name().as_ref())?.to_string()),
        Event::Empty(e) => Token::Empty(utf8(e.name().as_ref())?.to_string()),
        _ => return Err(malformed("unexpected event")),
    })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Skips whitespace-only text between elements.
    fn skip_blank(&mut self) {
        while let Some(Token::Text(t)) = self.peek() {
            if !t.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn open(&mut self, name: &str) -> Result<(), ClientError> {
        self.skip_blank();
        match self.bump() {
            Some(Token::Open(n)) if n == name => Ok(()),
            other => Err(malformed(format!("expected <{name}>, got {other:?}"))),
        }
    }

    fn close(&mut self, name: &str) -> Result<(), ClientError> {
        self.skip_blank();
        match self.bump() {
            Some(Token::Close(n)) if n == name => Ok(()),
            other => Err(malformed(format!("expected </{name}>, got {other:?}"))),
        }
    }

    fn text_until_close(&mut self, name: &str) -> Result<String, ClientError> {
        let text = match self.peek() {
            Some(Token::Text(t)) => {
                let t = t.clone();
                self.pos += 1;
                t
            }
            _ => String::new(),
        };
        match self.bump() {
            Some(Token::Close(n)) if n == name => Ok(text),
            other => Err(malformed(format!("expected </{name}>, got {other:?}"))),
        }
    }

    fn value(&mut self) -> Result<Value, ClientError> {
        self.skip_blank();
        match self.bump() {
            Some(Token::Empty(n)) if n == "value" => return Ok(Value::String(String::new())),
            Some(Token::Open(n)) if n == "value" => {}
            other => return Err(malformed(format!("expected <value>, got {other:?}"))),
        }

        // A value without a type element is a string.
        let leading = match self.peek() {
            Some(Token::Text(t)) => Some(t.clone()),
            _ => None,
        };
        if let Some(text) = &leading {
            self.pos += 1;
            if !text.trim().is_empty() || matches!(self.peek(), Some(Token::Close(n)) if n == "value")
            {
                self.close("value")?;
                return Ok(Value::String(text.clone()));
            }
        }
        if matches!(self.peek(), Some(Token::Close(n)) if n == "value") {
            self.pos += 1;
            return Ok(Value::String(String::new()));
        }

        let value = match self.bump() {
            Some(Token::Empty(kind)) => match kind.as_str() {
                "nil" => Value::Nil,
                "string" => Value::String(String::new()),
                "array" => Value::Array(Vec::new()),
                "struct" => Value::Struct(BTreeMap::new()),
                other => return Err(malformed(format!("empty <{other}/> has no value"))),
            },
            Some(Token::Open(kind)) => self.typed(&kind)?,
            other => return Err(malformed(format!("expected value type, got {other:?}"))),
        };

        self.close("value")?;
        Ok(value)
    }

    fn typed(&mut self, kind: &str) -> Result<Value, ClientError> {
        match kind {
            "int" | "i4" | "i8" => {
                let text = self.text_until_close(kind)?;
                text.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| malformed(format!("bad integer {text:?}")))
            }
            "boolean" => match self.text_until_close(kind)?.trim() {
                "1" => Ok(Value::Bool(true)),
                "0" => Ok(Value::Bool(false)),
                other => Err(malformed(format!("bad boolean {other:?}"))),
            },
            "string" => Ok(Value::String(self.text_until_close(kind)?)),
            "double" => {
                let text = self.text_until_close(kind)?;
                text.trim()
                    .parse()
                    .map(Value::Double)
                    .map_err(|_| malformed(format!("bad double {text:?}")))
            }
            "base64" => {
                let text = self.text_until_close(kind)?;
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                STANDARD
                    .decode(compact)
                    .map(Value::Base64)
                    .map_err(|e| malformed(format!("bad base64: {e}")))
            }
            "nil" => {
                self.close(kind)?;
                Ok(Value::Nil)
            }
            "array" => self.array(),
            "struct" => self.members(),
            other => Err(malformed(format!("unknown value type <{other}>"))),
        }
    }

    fn array(&mut self) -> Result<Value, ClientError> {
        let mut items = Vec::new();
        self.skip_blank();
        match self.bump() {
            Some(Token::Empty(n)) if n == "data" => {}
            Some(Token::Open(n)) if n == "data" => loop {
                self.skip_blank();
                if matches!(self.peek(), Some(Token::Close(n)) if n == "data") {
                    self.pos += 1;
                    break;
                }
                items.push(self.value()?);
            },
            other => return Err(malformed(format!("expected <data>, got {other:?}"))),
        }
        self.close("array")?;
        Ok(Value::Array(items))
    }

    fn members(&mut self) -> Result<Value, ClientError> {
        let mut members = BTreeMap::new();
        loop {
            self.skip_blank();
            match self.peek() {
                Some(Token::Close(n)) if n == "struct" => {
                    self.pos += 1;
                    return Ok(Value::Struct(members));
                }
                _ => {
                    self.open("member")?;
                    self.open("name")?;
                    let name = self.text_until_close("name")?;
                    let value = self.value()?;
                    self.close("member")?;
                    members.insert(name, value);
                }
            }
        }
    }
}

/// Decodes a `methodResponse`, turning a `<fault>` into [`ClientError::Fault`].
pub fn decode_response(xml: &str) -> Result<Value, ClientError> {
    let mut parser = Parser {
        tokens: tokenize(xml)?,
        pos: 0,
    };

    parser.open("methodResponse")?;
    parser.skip_blank();
    match parser.bump() {
        Some(Token::Open(n)) if n == "params" => {
            parser.open("param")?;
            let value = parser.value()?;
            parser.close("param")?;
            parser.close("params")?;
            Ok(value)
        }
        Some(Token::Open(n)) if n == "fault" => {
            let fault = parser.value()?;
            let code = fault.get("faultCode").and_then(Value::as_i64).unwrap_or_default();
            let message = fault
                .get("faultString")
                .and_then(Value::as_str)
                .unwrap_or("unknown fault")
                .to_string();
            Err(ClientError::Fault { code, message })
        }
        other => Err(malformed(format!("expected <params> or <fault>, got {other:?}"))),
    }
}
