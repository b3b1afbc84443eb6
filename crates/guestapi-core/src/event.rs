//! Event model for the guest events stream.
//!
//! The host pushes one envelope per change: a timestamp, a `type`
//! discriminator and a `metadata` object whose shape depends on the type.
//! Here that envelope is a tagged union: [`EventPayload`] has exactly one
//! case per [`EventType`], each carrying only its own payload.

use std::fmt;
use std::str::FromStr;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::InvalidEventType;

/// The closed set of event types the host can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A `user.*` or `cloud-init.*` config key changed.
    Config,
    /// A device was added to, removed from or updated on the instance.
    Device,
}

impl EventType {
    /// Every known event type, in wire order.
    pub const ALL: [EventType; 2] = [EventType::Config, EventType::Device];

    /// Wire name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Device => "device",
        }
    }

    /// Returns `true` if `name` is one of the known wire names.
    pub fn is_valid(name: &str) -> bool {
        name.parse::<EventType>().is_ok()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for EventType {
    type Err = InvalidEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "device" => Ok(Self::Device),
            other => Err(InvalidEventType(other.to_string())),
        }
    }
}

/// Metadata of a `config` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub key: String,
    pub old_value: String,
    pub value: String,
}

/// Metadata of a `device` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceUpdate {
    pub name: String,
    /// e.g. `added`, `removed`, `updated`.
    pub action: String,
    pub config: DeviceConfig,
}

/// The device config carried by a [`DeviceUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
}

/// Type-specific payload of an [`Event`].
///
/// `None` means the host sent a known type without a `metadata` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Config(Option<ConfigUpdate>),
    Device(Option<DeviceUpdate>),
}

impl EventPayload {
    /// The discriminator this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Config(_) => EventType::Config,
            Self::Device(_) => EventType::Device,
        }
    }
}

/// A decoded notification from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Host-supplied timestamp, passed through verbatim.
    pub timestamp: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Config metadata, if this is a `config` event that carried some.
    pub fn as_config(&self) -> Option<&ConfigUpdate> {
        match &self.payload {
            EventPayload::Config(meta) => meta.as_ref(),
            EventPayload::Device(_) => None,
        }
    }

    /// Device metadata, if this is a `device` event that carried some.
    pub fn as_device(&self) -> Option<&DeviceUpdate> {
        match &self.payload {
            EventPayload::Device(meta) => meta.as_ref(),
            EventPayload::Config(_) => None,
        }
    }
}

impl FromStr for Event {
    type Err = crate::error::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::envelope::decode_event_str(s)
    }
}

// Serializes back into the wire envelope shape.
impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let has_metadata = match &self.payload {
            EventPayload::Config(meta) => meta.is_some(),
            EventPayload::Device(meta) => meta.is_some(),
        };
        let mut state =
            serializer.serialize_struct("Event", if has_metadata { 3 } else { 2 })?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("type", &self.event_type())?;
        match &self.payload {
            EventPayload::Config(Some(meta)) => state.serialize_field("metadata", meta)?,
            EventPayload::Device(Some(meta)) => state.serialize_field("metadata", meta)?,
            _ => {}
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_parse_and_display() {
        for ty in EventType::ALL {
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
            assert_eq!(ty.to_string(), ty.as_str());
        }
        let err = "Config".parse::<EventType>().unwrap_err();
        assert_eq!(err, InvalidEventType("Config".into()));
    }

    #[test]
    fn validity_is_closed() {
        assert!(EventType::is_valid("config"));
        assert!(EventType::is_valid("device"));
        assert!(!EventType::is_valid(""));
        assert!(!EventType::is_valid("logging"));
    }

    #[test]
    fn accessors_follow_payload() {
        let ev = Event {
            timestamp: "t".into(),
            payload: EventPayload::Device(Some(DeviceUpdate {
                name: "eth1".into(),
                action: "added".into(),
                config: DeviceConfig::default(),
            })),
        };
        assert_eq!(ev.event_type(), EventType::Device);
        assert!(ev.as_config().is_none());
        assert_eq!(ev.as_device().unwrap().name, "eth1");
    }

    #[test]
    fn serializes_to_envelope() {
        let ev = Event {
            timestamp: "2024-01-01T00:00:00Z".into(),
            payload: EventPayload::Config(Some(ConfigUpdate {
                key: "user.foo".into(),
                old_value: "a".into(),
                value: "b".into(),
            })),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "config");
        assert_eq!(json["metadata"]["old_value"], "a");

        let bare = Event {
            timestamp: "t".into(),
            payload: EventPayload::Device(None),
        };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn device_config_type_field_renamed() {
        let cfg: DeviceConfig =
            serde_json::from_str(r#"{"type":"unix-char","path":"/dev/kvm"}"#).unwrap();
        assert_eq!(cfg.kind, "unix-char");
        assert_eq!(cfg.path, "/dev/kvm");
    }
}
