//! Dotted-path access into a process instance's variable bag.
//!
//! Paths look like `order.items.0.sku`. A numeric segment indexes into an
//! array; every other segment is an object key.

use serde_json::{Map, Value};

/// Variable bag owned by a process instance.
pub type Variables = Map<String, Value>;

/// Largest number of nulls a single write may append to an array.
pub const MAX_ARRAY_PADDING: usize = 1024;

/// A write that cannot be applied to the variable bag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("index {index} in '{path}' is too far past the end of an array of length {len}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
}

/// Look up a dotted path, returning `None` when any segment is missing.
pub fn get_path<'a>(variables: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = variables.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at a dotted path, creating intermediate objects as needed.
///
/// An intermediate that exists but is not a container is replaced by an
/// empty object. Writing past the end of an array pads it with nulls, up to
/// [`MAX_ARRAY_PADDING`] of them; a write further out leaves the bag untouched.
pub fn set_path(variables: &mut Variables, path: &str, value: Value) -> Result<(), PathError> {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((first, rest)) = segments.split_first() else {
        return Ok(());
    };
    check_indexes(variables.get(*first), rest, path)?;
    let slot = variables.entry(first.to_string()).or_insert(Value::Null);
    write_segments(slot, rest, value);
    Ok(())
}

/// Walk the existing structure and reject array indexes beyond the padding bound.
fn check_indexes(mut node: Option<&Value>, segments: &[&str], path: &str) -> Result<(), PathError> {
    for segment in segments {
        node = match node {
            Some(Value::Array(items)) => match segment.parse::<usize>() {
                Ok(index) => {
                    let limit = items.len().saturating_add(MAX_ARRAY_PADDING);
                    if index > limit {
                        return Err(PathError::IndexOutOfRange {
                            path: path.to_string(),
                            index,
                            len: items.len(),
                        });
                    }
                    items.get(index)
                }
                Err(_) => None,
            },
            Some(Value::Object(map)) => map.get(*segment),
            _ => return Ok(()),
        };
    }
    Ok(())
}

fn write_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    let array_index = match (&*node, head.parse::<usize>()) {
        (Value::Array(_), Ok(index)) => Some(index),
        _ => None,
    };
    if array_index.is_none() && !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match (node, array_index) {
        (Value::Array(items), Some(index)) => {
            if items.len() <= index {
                items.resize(index.saturating_add(1), Value::Null);
            }
            if let Some(slot) = items.get_mut(index) {
                write_segments(slot, rest, value);
            }
        }
        (Value::Object(map), _) => {
            let slot = map.entry(head.to_string()).or_insert(Value::Null);
            write_segments(slot, rest, value);
        }
        _ => {}
    }
}

/// True when the path resolves to a value other than `null`.
pub fn is_populated(variables: &Variables, path: &str) -> bool {
    matches!(get_path(variables, path), Some(value) if !value.is_null())
}
