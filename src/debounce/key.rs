use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::notification::{Channel, NotificationType};

const KEY_PREFIX: &str = "notify:debounce:";

/// `(type, group_on, channel)` encoded as `notify:debounce:{type}:{channel}:{group_on}`.
///
/// The same string is the TTL-store key, the payload of the flush message and
/// the correlation key of the aggregation query. `group_on` goes last so it may
/// contain `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DebounceKey {
    pub notification_type: NotificationType,
    pub group_on: String,
    pub channel: Channel,
}

impl DebounceKey {
    pub fn new(notification_type: NotificationType, group_on: impl Into<String>, channel: Channel) -> Self {
        Self {
            notification_type,
            group_on: group_on.into(),
            channel,
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}:{}",
            KEY_PREFIX,
            self.notification_type.as_str(),
            self.channel.as_str(),
            self.group_on
        )
    }

    /// Returns `None` for keys this service did not arm.
    pub fn decode(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(KEY_PREFIX)?;
        let mut parts = rest.splitn(3, ':');
        let notification_type = parts.next()?.parse().ok()?;
        let channel = parts.next()?.parse().ok()?;
        let group_on = parts.next()?;
        if group_on.is_empty() {
            return None;
        }

        Some(Self::new(notification_type, group_on, channel))
    }
}

impl std::fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<DebounceKey> for String {
    fn from(key: DebounceKey) -> Self {
        key.encode()
    }
}

impl TryFrom<String> for DebounceKey {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        DebounceKey::decode(&raw).ok_or_else(|| format!("not a debounce key: {}", raw))
    }
}

/// Re-injected onto the flush topic when a debounce key expires.
///
/// Carries no rows: the aggregation worker re-reads the current unsent set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushMessage {
    pub debounce_key: DebounceKey,
    pub fired_at: DateTime<Utc>,
}

impl FlushMessage {
    pub fn new(debounce_key: DebounceKey) -> Self {
        Self {
            debounce_key,
            fired_at: Utc::now(),
        }
    }
}
