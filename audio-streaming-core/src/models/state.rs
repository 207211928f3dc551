/// Stream state machine.
///
/// State transitions:
/// ```text
/// Unknown ─┬─ start ─→ Connecting ── connected ─→ Connected ── stop ─→ Disconnecting
///          │               │                          │                     │
///          │               └─ failed / denied ─→ Error ←─ fatal error       └─ closed ─→ Disconnected
///          │                                       │
///          └─ stop ─────────────────────────────── ┴─ stop ─→ Disconnected ── start ─→ Connecting
/// ```
///
/// `Unknown` and `Disconnected` are both "ready to start".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    #[default]
    Unknown,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Error,
}

impl StreamState {
    /// Whether `start` may begin a new attempt from this state.
    pub fn is_ready_to_start(&self) -> bool {
        matches!(self, Self::Unknown | Self::Disconnected)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
