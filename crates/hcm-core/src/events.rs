//! Unsolicited notification events.
//!
//! The module pushes URC lines such as `+QBLESTAT:1` without being asked.
//! The IO task in `hcm-at-io` parses them into [`NotificationEvent`]s and
//! delivers them to the registered handler and to every
//! [`tokio::sync::broadcast`] subscriber.

/// A parsed unsolicited result code.
///
/// `kind` is the text between the leading `+` and the first colon; `fields`
/// is everything after that colon split on commas (surrounding whitespace
/// removed). `raw` is the received line with surrounding whitespace removed,
/// for consumers that prefer to do their own parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Event type, e.g. `"QBLESTAT"`.
    pub kind: String,
    /// Ordered field values.
    pub fields: Vec<String>,
    /// The line as received, trimmed.
    pub raw: String,
}

impl NotificationEvent {
    /// Return field `index`, if present.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// `true` if this is a `+QBLESTAT` event reporting a new connection.
    ///
    /// `+QBLESTAT:1` is what the module sends when a central connects.
    pub fn is_connected(&self) -> bool {
        self.kind == "QBLESTAT" && self.field(0) == Some("1")
    }
}
