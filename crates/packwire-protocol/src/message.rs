//! The three wire messages and their array encoding.
//!
//! Every frame is an array whose first element says what it is:
//!
//! ```text
//! Request   [0, id, method, params]
//! Response  [1, id, error, result]
//! Notify    [2, method, params]
//! ```
//!
//! Conversion goes through the generic [`Value`] tree so the same logic works
//! with any [`Codec`].

use std::fmt;

use rmpv::Value;

use crate::{Codec, ProtocolError};

/// Correlates a Request with its Response within one client session.
pub type MsgId = u32;

/// `kind` of the error value sent back for a Request naming an
/// unregistered method.
pub const NO_METHOD_ERROR: &str = "NoMethodError";

/// Builds the error value for a Request naming an unregistered method:
/// `{"kind": "NoMethodError", "message": "method not found: <name>"}`.
pub fn no_method_error(method: &str) -> Value {
    Value::Map(vec![
        (Value::from("kind"), Value::from(NO_METHOD_ERROR)),
        (
            Value::from("message"),
            Value::from(format!("method not found: {method}")),
        ),
    ])
}

/// Returns the message of a [`no_method_error`] value, or `None` if
/// `error` is anything else.
pub fn as_no_method_error(error: &Value) -> Option<&str> {
    let entries = error.as_map()?;
    let field = |name: &str| {
        entries
            .iter()
            .find(|(key, _)| key.as_str() == Some(name))
            .and_then(|(_, value)| value.as_str())
    };
    (field("kind")? == NO_METHOD_ERROR).then(|| field("message")).flatten()
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The discriminator stored in the first slot of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request = 0,
    Response = 1,
    Notify = 2,
}

impl MessageKind {
    /// Number of array elements a frame of this kind carries.
    pub fn frame_len(self) -> usize {
        match self {
            Self::Request | Self::Response => 4,
            Self::Notify => 3,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value.as_u64()? {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Notify),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One RPC frame.
///
/// In a `Response`, [`Value::Nil`] stands for "absent". A non-nil `error`
/// wins over `result`, even if a misbehaving peer sets both.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: MsgId,
        method: String,
        params: Vec<Value>,
    },
    Response {
        id: MsgId,
        error: Value,
        result: Value,
    },
    Notify {
        method: String,
        params: Vec<Value>,
    },
}

impl Message {
    /// Builds a Request frame.
    pub fn request(
        id: MsgId,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Builds a Notify frame.
    pub fn notify(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Notify {
            method: method.into(),
            params,
        }
    }

    /// Builds a Response frame from a handler outcome.
    ///
    /// `Ok` fills `result` and leaves `error` nil; `Err` does the opposite.
    pub fn response(id: MsgId, outcome: Result<Value, Value>) -> Self {
        match outcome {
            Ok(result) => Self::Response {
                id,
                error: Value::Nil,
                result,
            },
            Err(error) => Self::Response {
                id,
                error,
                result: Value::Nil,
            },
        }
    }

    /// Which of the three shapes this is.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request { .. } => MessageKind::Request,
            Self::Response { .. } => MessageKind::Response,
            Self::Notify { .. } => MessageKind::Notify,
        }
    }

    /// Converts the message into its wire array.
    pub fn into_value(self) -> Value {
        let kind = Value::from(self.kind() as u8);
        match self {
            Self::Request { id, method, params } => Value::Array(vec![
                kind,
                Value::from(id),
                Value::from(method),
                Value::Array(params),
            ]),
            Self::Response { id, error, result } => {
                Value::Array(vec![kind, Value::from(id), error, result])
            }
            Self::Notify { method, params } => Value::Array(vec![
                kind,
                Value::from(method),
                Value::Array(params),
            ]),
        }
    }

    /// Validates and converts a wire array into a message.
    ///
    /// The outer shape is checked first (an array of 3 or 4 elements with a
    /// known discriminator), then the contents of each slot.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] for a bad shape or slot,
    /// and [`ProtocolError::UnknownMessageType`] for an unknown
    /// discriminator.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let items = match value {
            Value::Array(items) if items.len() == 3 || items.len() == 4 => {
                items
            }
            other => {
                return Err(ProtocolError::InvalidMessage(format!(
                    "expected an array of 3 or 4 elements, got {other}"
                )));
            }
        };

        let kind = MessageKind::from_value(&items[0])
            .ok_or_else(|| ProtocolError::UnknownMessageType(items[0].clone()))?;

        if items.len() != kind.frame_len() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{kind} frame must have {} elements, got {}",
                kind.frame_len(),
                Value::Array(items)
            )));
        }

        let mut slots = items.into_iter().skip(1);
        // Length was checked above, so every `next()` below yields a slot.
        let mut slot = move || slots.next().unwrap_or(Value::Nil);

        match kind {
            MessageKind::Request => {
                let id = msg_id(slot())?;
                let method = method_name(slot())?;
                let params = param_list(slot())?;
                Ok(Self::Request { id, method, params })
            }
            MessageKind::Response => {
                let id = msg_id(slot())?;
                let error = slot();
                let result = slot();
                Ok(Self::Response { id, error, result })
            }
            MessageKind::Notify => {
                let method = method_name(slot())?;
                let params = param_list(slot())?;
                Ok(Self::Notify { method, params })
            }
        }
    }

    /// Encodes the message with `codec`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the codec cannot represent one
    /// of the parameter values.
    pub fn encode(self, codec: &dyn Codec) -> Result<Vec<u8>, ProtocolError> {
        codec.encode(&self.into_value())
    }

    /// Decodes exactly one message from `data`.
    ///
    /// # Errors
    /// Any decode or validation failure, see [`Message::from_value`].
    pub fn decode(codec: &dyn Codec, data: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_value(codec.decode(data)?)
    }
}

fn msg_id(value: Value) -> Result<MsgId, ProtocolError> {
    value
        .as_u64()
        .and_then(|id| MsgId::try_from(id).ok())
        .ok_or_else(|| {
            ProtocolError::InvalidMessage(format!("invalid message id: {value}"))
        })
}

fn method_name(value: Value) -> Result<String, ProtocolError> {
    match value {
        Value::String(s) => s.into_str().ok_or_else(|| {
            ProtocolError::InvalidMessage("method name is not UTF-8".into())
        }),
        other => Err(ProtocolError::InvalidMessage(format!(
            "method name must be a string, got {other}"
        ))),
    }
}

fn param_list(value: Value) -> Result<Vec<Value>, ProtocolError> {
    match value {
        Value::Array(params) => Ok(params),
        other => Err(ProtocolError::InvalidMessage(format!(
            "params must be an array, got {other}"
        ))),
    }
}
