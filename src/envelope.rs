//! Decoding of the REST response envelope
//!
//! Every API response is wrapped in an envelope whose `stat` attribute is
//! `ok` or `fail`.  The API can serve the same payload as XML or JSON; one
//! decoder normalizes both into a single [`ApiResponse`] tree so the rest
//! of the crate never cares which wire format is selected.
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::{Result, VimeoError};

/// Which wire format the client asks the API for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    Xml,
    #[default]
    Json,
}

/// A decoded `stat=ok` envelope.
///
/// XML attributes and JSON fields both land as fields of nested objects;
/// element text lands under `_content`; repeated sibling elements become
/// arrays.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    root: Map<String, Value>,
}

impl ApiResponse {
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        Some(current)
    }

    /// String lookup tolerant of the JSON decoder producing numbers where
    /// the XML decoder produces attribute strings.
    pub fn string_at(&self, path: &[&str]) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn u64_at(&self, path: &[&str]) -> Option<u64> {
        match self.get(path)? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

/// Decodes a response body, mapping `stat=fail` to [`VimeoError::Api`] and
/// anything that does not look like an envelope to [`VimeoError::Protocol`].
pub(crate) fn decode(format: ResponseFormat, body: &str) -> Result<ApiResponse> {
    let root = match format {
        ResponseFormat::Json => match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(VimeoError::protocol("response is not a JSON object")),
            Err(e) => {
                return Err(VimeoError::protocol(format!(
                    "response is not valid JSON: {}",
                    e
                )))
            }
        },
        ResponseFormat::Xml => xml_to_map(body)?,
    };

    let stat = root
        .get("stat")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| VimeoError::protocol("response envelope has no stat attribute"))?;
    match stat.as_str() {
        "ok" => Ok(ApiResponse { root }),
        "fail" => Err(api_error(&root, body)),
        other => Err(VimeoError::protocol(format!(
            "unknown envelope stat '{}'",
            other
        ))),
    }
}

fn api_error(root: &Map<String, Value>, raw: &str) -> VimeoError {
    let Some(err) = root.get("err").and_then(Value::as_object) else {
        return VimeoError::protocol("stat=fail without an err element");
    };
    let code = match err.get("code") {
        Some(Value::String(s)) => s.parse::<u32>().ok(),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        _ => None,
    };
    let Some(code) = code else {
        return VimeoError::protocol("err element without a numeric code");
    };
    let message = match err.get("msg") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    VimeoError::Api {
        code,
        message,
        raw: raw.to_string(),
    }
}

fn xml_to_map(body: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<(String, Map<String, Value>)> = Vec::new();
    let mut root: Option<Map<String, Value>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                stack.push((element_name(&e), attributes_to_map(&e)?));
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e);
                let map = attributes_to_map(&e)?;
                close_element(&mut stack, &mut root, name, map);
            }
            Ok(Event::End(_)) => {
                let Some((name, map)) = stack.pop() else {
                    return Err(VimeoError::protocol("unbalanced XML in response"));
                };
                close_element(&mut stack, &mut root, name, map);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| VimeoError::protocol(format!("invalid XML text: {}", e)))?;
                let text = text.trim();
                if !text.is_empty() {
                    if let Some((_, map)) = stack.last_mut() {
                        insert_child(map, "_content".to_string(), Value::String(text.to_string()));
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(VimeoError::protocol(format!("invalid XML: {}", e))),
        }
    }

    if !stack.is_empty() {
        return Err(VimeoError::protocol("truncated XML in response"));
    }
    root.ok_or_else(|| VimeoError::protocol("empty response body"))
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attributes_to_map(e: &BytesStart<'_>) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for attr in e.attributes() {
        let attr =
            attr.map_err(|e| VimeoError::protocol(format!("invalid XML attribute: {}", e)))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| VimeoError::protocol(format!("invalid XML attribute: {}", e)))?;
        map.insert(key, Value::String(value.into_owned()));
    }
    Ok(map)
}

/// Attaches a finished element to its parent, or makes it the root when
/// the stack is empty.
fn close_element(
    stack: &mut Vec<(String, Map<String, Value>)>,
    root: &mut Option<Map<String, Value>>,
    name: String,
    map: Map<String, Value>,
) {
    if let Some((_, parent)) = stack.last_mut() {
        insert_child(parent, name, Value::Object(map));
    } else if root.is_none() {
        *root = Some(map);
    }
}

/// Repeated siblings of the same name collapse into an array, matching the
/// JSON rendering of element lists.
fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        None => {
            map.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}
