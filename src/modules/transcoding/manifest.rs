//! Converts a DASH `.mpd` manifest into the JSON shape stored on rendition
//! records.
//!
//! Conventions: attributes go under `@attributes`, child elements are keyed
//! by local name (repeated names become arrays), text-only elements collapse
//! to strings, and text next to attributes is kept under `#text`. The root
//! element's own name is not included.

use roxmltree::{Document, Node};
use serde_json::{Map, Value};

use crate::error::{TranscodeError, TranscodeResult};

pub fn mpd_to_json(xml: &str) -> TranscodeResult<Value> {
    let doc = Document::parse(xml).map_err(|e| TranscodeError::manifest(e.to_string()))?;
    Ok(element_to_json(doc.root_element()))
}

fn element_to_json(node: Node<'_, '_>) -> Value {
    let mut object = Map::new();

    let attributes: Map<String, Value> = node
        .attributes()
        .map(|attr| (attr.name().to_string(), Value::String(attr.value().to_string())))
        .collect();

    let mut children: Vec<(String, Value)> = Vec::new();
    for child in node.children().filter(Node::is_element) {
        children.push((child.tag_name().name().to_string(), element_to_json(child)));
    }

    let text: String = node
        .children()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string();

    if attributes.is_empty() && children.is_empty() {
        return if text.is_empty() {
            Value::Object(Map::new())
        } else {
            Value::String(text)
        };
    }

    if !attributes.is_empty() {
        object.insert("@attributes".to_string(), Value::Object(attributes));
    }

    for (name, value) in children {
        match object.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(name, value);
            }
        }
    }

    if children_is_empty(&object) && !text.is_empty() {
        object.insert("#text".to_string(), Value::String(text));
    }

    Value::Object(object)
}

fn children_is_empty(object: &Map<String, Value>) -> bool {
    object.keys().all(|key| key == "@attributes")
}
