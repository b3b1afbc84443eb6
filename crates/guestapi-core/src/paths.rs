//! Endpoint paths of the versioned guest API and the rules for building them.
//!
//! See <https://linuxcontainers.org/incus/docs/main/dev-incus/>.

use std::borrow::Cow;

use url::Url;

use crate::error::GuestError;
use crate::event::EventType;

/// Socket the host exposes inside every instance.
pub const DEFAULT_SOCKET_PATH: &str = "/dev/incus/sock";

/// Authority placed in request URIs. The host ignores it; HTTP/1.1 needs one.
pub const SOCKET_AUTHORITY: &str = "incus";

pub const API_ROOT: &str = "/1.0";
pub const DEVICES_PATH: &str = "/1.0/devices";
pub const CONFIG_PATH: &str = "/1.0/config";
pub const METADATA_PATH: &str = "/1.0/meta-data";
pub const EVENTS_PATH: &str = "/1.0/events";

/// Namespaces an instance is allowed to read.
pub const USER_PREFIX: &str = "user.";
pub const CLOUD_INIT_PREFIX: &str = "cloud-init.";

/// Prefix `key` with `user.` unless it is already in an instance-readable namespace.
pub fn qualify_config_key(key: &str) -> Cow<'_, str> {
    if key.starts_with(USER_PREFIX) || key.starts_with(CLOUD_INIT_PREFIX) {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(format!("{USER_PREFIX}{key}"))
    }
}

/// Request target for a single config key, with the key qualified and
/// percent-encoded as one path segment.
pub fn config_key_path(key: &str) -> Result<String, GuestError> {
    let mut url = Url::parse(&format!("http://{SOCKET_AUTHORITY}"))?;
    url.set_path(CONFIG_PATH);
    url.path_segments_mut()
        .map_err(|_| GuestError::Endpoint(format!("cannot append '{key}' to {CONFIG_PATH}")))?
        .push(&qualify_config_key(key));
    Ok(url[url::Position::BeforePath..].to_string())
}

/// Keep the valid event type names from `types`, dropping unknown entries and
/// repeats while preserving the caller's order.
pub fn filter_event_types<I, T>(types: I) -> Vec<EventType>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut kept = Vec::new();
    for name in types {
        match name.as_ref().parse::<EventType>() {
            Ok(ty) if !kept.contains(&ty) => kept.push(ty),
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "dropping invalid event type from subscription"),
        }
    }
    kept
}

/// Strict counterpart of [`filter_event_types`]: the first unknown name is an
/// error instead of being dropped. Repeats are still collapsed.
pub fn parse_event_types<I, T>(types: I) -> Result<Vec<EventType>, GuestError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut kept = Vec::new();
    for name in types {
        let ty: EventType = name.as_ref().parse()?;
        if !kept.contains(&ty) {
            kept.push(ty);
        }
    }
    Ok(kept)
}

/// Request target for the events stream.
///
/// With no valid requested types the query is omitted and the host delivers
/// every event type.
pub fn events_path<I, T>(types: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let kept = filter_event_types(types);
    if kept.is_empty() {
        return EVENTS_PATH.to_string();
    }

    let joined = kept
        .iter()
        .map(EventType::as_str)
        .collect::<Vec<_>>()
        .join(",");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("type", &joined)
        .finish();
    format!("{EVENTS_PATH}?{query}")
}
