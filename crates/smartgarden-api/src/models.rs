// JSON:API wire types for the smart system API.
//
// REST documents and push messages share the same resource object shape:
// `{ id, type, attributes, relationships }`. Service attributes are wrapped
// as `{ value, timestamp }`; location attributes are plain values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── Resource objects ─────────────────────────────────────────────────

/// A single JSON:API resource object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: Option<Value>,
}

/// A `{ value, timestamp }` service attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeValue<'a> {
    pub value: &'a Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Resource {
    /// Hardware device id: the part of a service id before the first `:`.
    pub fn device_id(&self) -> &str {
        self.id.split(':').next().unwrap_or(&self.id)
    }

    /// Look up a wrapped service attribute.
    pub fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
        let raw = self.attributes.get(name)?;
        let value = raw.get("value")?;
        let timestamp = raw
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Some(AttributeValue { value, timestamp })
    }

    /// Look up a plain (unwrapped) string attribute, as used by locations.
    pub fn plain_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Newest attribute timestamp carried by this resource.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.attributes
            .keys()
            .filter_map(|name| self.attribute(name).and_then(|a| a.timestamp))
            .max()
    }

    /// Ids listed under `relationships.{name}.data[]`.
    pub fn related_ids(&self, name: &str) -> Vec<String> {
        let Some(data) = self
            .relationships
            .as_ref()
            .and_then(|r| r.get(name))
            .and_then(|r| r.get("data"))
        else {
            return Vec::new();
        };

        match data {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| item.get("id").and_then(Value::as_str))
                .map(str::to_owned)
                .collect(),
            Value::Object(_) => data
                .get("id")
                .and_then(Value::as_str)
                .map(|id| vec![id.to_owned()])
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

// ── Documents ────────────────────────────────────────────────────────

/// `GET /v2/locations` response.
#[derive(Debug, Deserialize)]
pub struct LocationList {
    #[serde(default)]
    pub data: Vec<Resource>,
}

/// `GET /v2/locations/{id}` response: the location plus every service
/// of every device in `included`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationDocument {
    pub data: Resource,
    #[serde(default)]
    pub included: Vec<Resource>,
}

// ── Websocket negotiation ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(crate) struct WebSocketRequest<'a> {
    pub data: WebSocketRequestData<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WebSocketRequestData<'a> {
    pub id: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: WebSocketRequestAttributes<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebSocketRequestAttributes<'a> {
    pub location_id: &'a str,
}

impl<'a> WebSocketRequest<'a> {
    pub(crate) fn for_location(location_id: &'a str) -> Self {
        Self {
            data: WebSocketRequestData {
                id: "does-not-matter",
                kind: "WEBSOCKET",
                attributes: WebSocketRequestAttributes { location_id },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebSocketResponse {
    pub data: WebSocketResponseData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebSocketResponseData {
    pub attributes: WebSocketResponseAttributes,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebSocketResponseAttributes {
    pub url: String,
}

// ── Commands ─────────────────────────────────────────────────────────

/// `PUT /v2/command/{serviceId}` body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRequest {
    pub data: CommandData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandData {
    pub id: String,
    #[serde(rename = "type")]
    pub control: String,
    pub attributes: CommandAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandAttributes {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,
}

impl CommandRequest {
    /// Build a control command with a fresh request id.
    ///
    /// `control` is the service control type (`VALVE_CONTROL`,
    /// `MOWER_CONTROL`, `POWER_SOCKET_CONTROL`).
    pub fn new(control: &str, command: &str, seconds: Option<u64>) -> Self {
        Self::with_id(Uuid::new_v4(), control, command, seconds)
    }

    /// Build a control command with a caller-chosen request id.
    pub fn with_id(id: Uuid, control: &str, command: &str, seconds: Option<u64>) -> Self {
        Self {
            data: CommandData {
                id: id.to_string(),
                control: control.to_owned(),
                attributes: CommandAttributes {
                    command: command.to_owned(),
                    seconds,
                },
            },
        }
    }
}
