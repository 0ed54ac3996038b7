//! The value serializer contract (§6.3): opaque byte encode/decode of user
//! values, preserving a distinguished 64-bit-unsigned variant ([`KvU64`]).
//!
//! Rust's type system already rejects non-serializable values at compile
//! time, so there is no runtime "reject non-structured-cloneable values"
//! check to perform here — any value reaching [`ValueSerializer::serialize`]
//! is already a `serde_json::Value`, i.e. already structured data.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{CResult, Error};

/// A distinguished 64-bit unsigned wrapper. Only values of this kind
/// participate in `sum`/`min`/`max` mutations (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KvU64(pub u64);

impl KvU64 {
    pub fn wrapping_add(self, operand: u64) -> Self {
        KvU64(self.0.wrapping_add(operand))
    }
}

/// A stored value: either arbitrary structured JSON, or the distinguished
/// [`KvU64`] wrapper.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Json(Json),
    U64(KvU64),
}

impl Value {
    pub fn as_kv_u64(&self) -> Option<KvU64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Value::Json(v)
    }
}

impl From<KvU64> for Value {
    fn from(v: KvU64) -> Self {
        Value::U64(v)
    }
}

/// The wire shape round-tripped by the serializer: `{isU64, value}` (§6.3).
#[derive(Serialize, Deserialize)]
struct WireValue {
    #[serde(rename = "isU64")]
    is_u64: bool,
    value: Json,
}

/// Encodes/decodes [`Value`]s to bytes as a small JSON envelope rather than
/// a binary format, since the stored value is already an arbitrary JSON
/// document in the common case.
pub struct ValueSerializer;

impl ValueSerializer {
    pub fn serialize(value: &Value) -> CResult<Vec<u8>> {
        let wire = match value {
            Value::U64(v) => WireValue { is_u64: true, value: Json::from(v.0) },
            Value::Json(v) => WireValue { is_u64: false, value: v.clone() },
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn deserialize(bytes: &[u8]) -> CResult<Value> {
        let wire: WireValue = serde_json::from_slice(bytes)?;
        if wire.is_u64 {
            let n = wire
                .value
                .as_u64()
                .ok_or_else(|| Error::Parse("isU64 true but value is not a u64".into()))?;
            Ok(Value::U64(KvU64(n)))
        } else {
            Ok(Value::Json(wire.value))
        }
    }
}
