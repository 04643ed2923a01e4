//! Event records decoded from the change stream.

use serde::Deserialize;

/// Prefix marking a line that carries an event payload.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// One change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Upstream event id, unique per event. Used only for dedup.
    pub id: String,
    pub user: String,
    pub is_bot: bool,
    pub server: String,
    /// Event timestamp exactly as sent upstream; also the resume point.
    pub observed_at: String,
}

impl EventRecord {
    /// Decode one stream line.
    ///
    /// Returns `None` for lines that carry no event (comments, `event:` and
    /// `id:` fields, blank separators).
    pub fn from_line(line: &[u8]) -> Option<Result<Self, serde_json::Error>> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let payload = line.strip_prefix(DATA_PREFIX)?;
        Some(serde_json::from_slice::<WireEvent>(payload).map(Into::into))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireEvent {
    meta: WireMeta,
    #[serde(default)]
    user: String,
    #[serde(default)]
    bot: bool,
    #[serde(default)]
    server_url: String,
}

#[derive(Debug, Deserialize)]
struct WireMeta {
    id: String,
    #[serde(default)]
    dt: String,
}

impl From<WireEvent> for EventRecord {
    fn from(wire: WireEvent) -> Self {
        Self {
            id: wire.meta.id,
            user: wire.user,
            is_bot: wire.bot,
            server: wire.server_url,
            observed_at: wire.meta.dt,
        }
    }
}
