use serde_json::{Value, json};

use crate::messages::Turn;

/// Merge the model's static parameters with the assembled turns under the
/// DashScope envelope: the turns array lives at `input.messages`, everything
/// else (model name, `parameters` object) is registered per model and passed
/// through opaquely.
pub(super) fn build_request(params: &Value, turns: &[Turn]) -> Value {
    let mut body = match params {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };

    let messages = serde_json::to_value(turns).unwrap_or_else(|_| json!([]));
    body["input"] = json!({ "messages": messages });

    body
}
