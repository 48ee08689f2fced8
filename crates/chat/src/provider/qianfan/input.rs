use serde_json::{Value, json};

use crate::messages::Turn;

/// Merge the model's static parameters with the assembled turns under the
/// Qianfan envelope: a flat body with a top-level `messages` array.
///
/// The parameter object is registered per model and passed through opaquely;
/// only `messages` is owned by the gateway.
pub(super) fn build_request(params: &Value, turns: &[Turn]) -> Value {
    let mut body = match params {
        Value::Object(map) => Value::Object(map.clone()),
        _ => json!({}),
    };

    body["messages"] = serde_json::to_value(turns).unwrap_or_else(|_| json!([]));

    body
}
