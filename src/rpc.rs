//! XML-RPC boundary to the hosting platform's API.
//!
//! The API is treated as an opaque call/response surface: requests are a
//! method name plus positional [`Value`]s, responses decode into a [`Value`].
//! Only the handful of XML-RPC shapes the platform actually returns are
//! supported.

use std::{collections::BTreeMap, fmt::Write as _, time::Duration};

use quick_xml::{escape::escape, events::Event, Reader};

use crate::error::{Error, Result};

/// Production API endpoint.
pub const GANDI_API_URL: &str = "https://rpc.gandi.net/xmlrpc/";

/// A decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Value {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Struct member lookup.
    pub fn get(&self, member: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(member),
            _ => None,
        }
    }
}

/// Client for one XML-RPC endpoint.
///
/// The endpoint is a parameter (rather than baked in) so tests can point at a
/// local server; production code uses [`GANDI_API_URL`].
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RpcClient {
    pub fn new(endpoint: impl Into<String>) -> Result<RpcClient> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(RpcClient {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Make one method call and decode the response.
    ///
    /// Faults come back as [`Error::RpcFault`]. There are no retries; the
    /// caller decides whether a whole run is worth repeating.
    pub async fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
        let body = encode_call(method, params);

        log::debug!("Call api method: {method}");

        let res = self
            .http
            .post(&self.endpoint)
            .header("content-type", "text/xml")
            .body(body)
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;

        if !status.is_success() {
            return Err(Error::RpcProtocol(format!("http status {status}")));
        }

        decode_response(&text)
    }
}

pub(crate) fn encode_call(method: &str, params: &[Value]) -> String {
    let mut body = String::with_capacity(256);

    body.push_str(r#"<?xml version="1.0"?>"#);
    body.push_str("<methodCall><methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName><params>");

    for param in params {
        body.push_str("<param>");
        write_value(&mut body, param);
        body.push_str("</param>");
    }

    body.push_str("</params></methodCall>");
    body
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");

    match value {
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s));
            out.push_str("</string>");
        }

        Value::Int(i) => {
            let _ = write!(out, "<int>{i}</int>");
        }

        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", u8::from(*b));
        }

        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }

        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }

    out.push_str("</value>");
}

pub(crate) fn decode_response(xml: &str) -> Result<Value> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fault = false;

    loop {
        match read(&mut reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"methodResponse" | b"params" | b"param" => {}

                b"fault" => fault = true,

                b"value" => {
                    let value = parse_value(&mut reader)?;
                    return if fault { Err(fault_of(&value)) } else { Ok(value) };
                }

                other => return Err(unexpected(other)),
            },

            Event::Eof => return Err(truncated()),

            _ => {}
        }
    }
}

/// Parses the contents of a `<value>` element; the opening tag has already
/// been consumed, the closing tag is consumed before returning.
fn parse_value(reader: &mut Reader<&[u8]>) -> Result<Value> {
    let mut value = None;

    loop {
        match read(reader)? {
            // bare text inside <value> is an untyped string
            Event::Text(text) => {
                let text = text.unescape().map_err(xml_err)?;
                value = Some(Value::String(text.into_owned()));
            }

            Event::Start(e) => {
                let parsed = match e.name().as_ref() {
                    b"string" => Value::String(read_text(reader, b"string")?),

                    b"int" | b"i4" | b"i8" => {
                        let tag = e.name().as_ref().to_vec();
                        let text = read_text(reader, &tag)?;
                        let int = text.trim().parse().map_err(|_| {
                            Error::RpcProtocol(format!("bad integer value {text:?}"))
                        })?;
                        Value::Int(int)
                    }

                    b"boolean" => {
                        let text = read_text(reader, b"boolean")?;
                        Value::Bool(text.trim() == "1")
                    }

                    b"struct" => parse_struct(reader)?,

                    b"array" => parse_array(reader)?,

                    // doubles, dates and other scalars we have no use for
                    // are carried as their text representation
                    other => {
                        let tag = other.to_vec();
                        Value::String(read_text(reader, &tag)?)
                    }
                };

                value = Some(parsed);
            }

            // <string/>, <nil/>, ...
            Event::Empty(_) => value = Some(Value::String(String::new())),

            Event::End(e) if e.name().as_ref() == b"value" => {
                // <value></value> means the empty string
                return Ok(value.unwrap_or(Value::String(String::new())));
            }

            Event::Eof => return Err(truncated()),

            _ => {}
        }
    }
}

fn parse_struct(reader: &mut Reader<&[u8]>) -> Result<Value> {
    let mut members = BTreeMap::new();
    let mut name: Option<String> = None;

    loop {
        match read(reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"member" => name = None,

                b"name" => name = Some(read_text(reader, b"name")?),

                b"value" => {
                    let value = parse_value(reader)?;
                    let name = name
                        .take()
                        .ok_or_else(|| Error::RpcProtocol("struct member without name".into()))?;
                    members.insert(name, value);
                }

                other => return Err(unexpected(other)),
            },

            Event::End(e) if e.name().as_ref() == b"struct" => {
                return Ok(Value::Struct(members));
            }

            // </member>
            Event::End(_) => {}

            Event::Eof => return Err(truncated()),

            _ => {}
        }
    }
}

fn parse_array(reader: &mut Reader<&[u8]>) -> Result<Value> {
    let mut items = Vec::new();

    loop {
        match read(reader)? {
            Event::Start(e) => match e.name().as_ref() {
                b"data" => {}
                b"value" => items.push(parse_value(reader)?),
                other => return Err(unexpected(other)),
            },

            Event::End(e) if e.name().as_ref() == b"array" => {
                return Ok(Value::Array(items));
            }

            // </data>
            Event::End(_) => {}

            Event::Eof => return Err(truncated()),

            _ => {}
        }
    }
}

/// Collects the text content up to the named closing tag.
fn read_text(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<String> {
    let mut out = String::new();

    loop {
        match read(reader)? {
            Event::Text(text) => out.push_str(&text.unescape().map_err(xml_err)?),
            Event::End(e) if e.name().as_ref() == tag => return Ok(out),
            Event::Eof => return Err(truncated()),
            _ => {}
        }
    }
}

fn fault_of(value: &Value) -> Error {
    let code = value.get("faultCode").and_then(Value::as_i64);
    let message = value.get("faultString").and_then(Value::as_str);

    match (code, message) {
        (Some(code), Some(message)) => Error::RpcFault {
            code,
            message: message.to_owned(),
        },
        _ => Error::RpcProtocol("fault without faultCode/faultString".into()),
    }
}

fn read<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>> {
    reader.read_event().map_err(xml_err)
}

fn xml_err(err: impl std::fmt::Display) -> Error {
    Error::RpcProtocol(err.to_string())
}

fn truncated() -> Error {
    Error::RpcProtocol("truncated response".into())
}

fn unexpected(tag: &[u8]) -> Error {
    Error::RpcProtocol(format!("unexpected element {:?}", String::from_utf8_lossy(tag)))
}
