use serde_json::Value;

use errors::*;
use results::ResultStore;

/// The `Emit` trait specifies structs which accept key-value pairs emitted by user code.
///
/// Keys arrive as raw script values; an implementation rejects keys which are not valid result
/// keys.
pub trait Emit {
    fn emit(&mut self, key: Value, value: Value) -> Result<()>;
}

impl Emit for ResultStore {
    fn emit(&mut self, key: Value, value: Value) -> Result<()> {
        self.add(key, value)
    }
}

/// Emits every pair of a hook's output.
///
/// The output is either `null` (nothing emitted) or a list whose items are `[key, value]` pairs or
/// `{"key": ..., "value": ...}` objects. Returns the number of emitted pairs.
pub fn emit_pairs(emitter: &mut Emit, output: Value) -> Result<usize> {
    let items = match output {
        Value::Null => return Ok(0),
        Value::Array(items) => items,
        other => {
            return Err(
                format!("expected a list of key-value pairs, got {}", other).into(),
            )
        }
    };

    let mut emitted = 0;
    for item in items {
        let (key, value) = match item {
            Value::Array(mut pair) => {
                if pair.len() != 2 {
                    return Err(
                        format!("a key-value pair must have 2 items, got {}", pair.len())
                            .into(),
                    );
                }
                let value = pair.pop().unwrap_or(Value::Null);
                let key = pair.pop().unwrap_or(Value::Null);
                (key, value)
            }
            Value::Object(mut object) => {
                let key = object.remove("key").unwrap_or(Value::Null);
                let value = object.remove("value").unwrap_or(Value::Null);
                (key, value)
            }
            other => return Err(format!("invalid key-value pair {}", other).into()),
        };
        emitter.emit(key, value)?;
        emitted += 1;
    }
    Ok(emitted)
}
