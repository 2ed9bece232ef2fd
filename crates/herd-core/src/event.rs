use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::KernelError;

/// Maximum length of the event type field, in bytes.
pub const MAX_TYPE_LEN: usize = 64;
/// Maximum length of the sender field, in bytes.
pub const MAX_SENDER_LEN: usize = 64;
/// Maximum length of the data field, in bytes; longer payloads are truncated.
pub const MAX_DATA_LEN: usize = 4096;

/// One bus event. The serialized form is exactly `TYPE|SENDER|DATA\n`.
///
/// The first two `|` separators are significant; any further `|` belongs to
/// the data field. The sender is declarative: it states the child's own
/// identity and is not validated against the registered tool name.
#[derive(Clone, Debug)]
pub struct Event {
    pub event_type: String,
    pub sender: String,
    pub data: String,
    pub captured_at: DateTime<Utc>,
}

impl Event {
    /// Build an event from owned copies of the three fields.
    ///
    /// Type and sender must be non-empty, free of `|` and newlines, and
    /// within their byte limits. Data is truncated at [`MAX_DATA_LEN`]
    /// with a WARN; embedded newlines in data are rejected because they
    /// would corrupt the line framing.
    pub fn new(event_type: &str, sender: &str, data: &str) -> Result<Self, KernelError> {
        validate_field("type", event_type, MAX_TYPE_LEN)?;
        validate_field("sender", sender, MAX_SENDER_LEN)?;
        if data.contains('\n') || data.contains('\r') {
            return Err(KernelError::InvalidArg(
                "event data must not contain newlines".into(),
            ));
        }
        Ok(Self {
            event_type: event_type.to_string(),
            sender: sender.to_string(),
            data: truncate_data(data),
            captured_at: Utc::now(),
        })
    }

    /// Wire form, terminated with `\n`.
    pub fn serialize(&self) -> String {
        format!("{}|{}|{}\n", self.event_type, self.sender, self.data)
    }

    /// Parse one line (no trailing newline) as `TYPE|SENDER|DATA`.
    pub fn parse(line: &str) -> Result<Self, KernelError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut parts = line.splitn(3, '|');
        let (Some(event_type), Some(sender), Some(data)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(KernelError::ParseFailed(format!(
                "expected TYPE|SENDER|DATA, got '{line}'"
            )));
        };
        if event_type.is_empty() || sender.is_empty() {
            return Err(KernelError::ParseFailed(format!(
                "empty type or sender in '{line}'"
            )));
        }
        if event_type.len() > MAX_TYPE_LEN || sender.len() > MAX_SENDER_LEN {
            return Err(KernelError::ParseFailed(format!(
                "type or sender exceeds {MAX_TYPE_LEN} bytes in '{line}'"
            )));
        }
        Ok(Self {
            event_type: event_type.to_string(),
            sender: sender.to_string(),
            data: truncate_data(data),
            captured_at: Utc::now(),
        })
    }
}

fn validate_field(label: &str, value: &str, max_len: usize) -> Result<(), KernelError> {
    if value.is_empty() {
        return Err(KernelError::InvalidArg(format!(
            "event {label} must not be empty"
        )));
    }
    if value.contains('|') || value.contains('\n') || value.contains('\r') {
        return Err(KernelError::InvalidArg(format!(
            "event {label} must not contain '|' or newlines"
        )));
    }
    if value.len() > max_len {
        return Err(KernelError::InvalidArg(format!(
            "event {label} exceeds {max_len} bytes"
        )));
    }
    Ok(())
}

/// Cut data at [`MAX_DATA_LEN`] bytes, backing up to a char boundary.
fn truncate_data(data: &str) -> String {
    if data.len() <= MAX_DATA_LEN {
        return data.to_string();
    }
    let mut cut = MAX_DATA_LEN;
    while cut > 0 && !data.is_char_boundary(cut) {
        cut -= 1;
    }
    warn!(
        len = data.len(),
        max = MAX_DATA_LEN,
        "event data truncated"
    );
    data[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_then_parse_round_trips() {
        let event = Event::new("STATUS", "gen", "ready|phase=2").unwrap();
        let parsed = Event::parse(event.serialize().trim_end()).unwrap();
        assert_eq!(parsed.event_type, "STATUS");
        assert_eq!(parsed.sender, "gen");
        assert_eq!(parsed.data, "ready|phase=2");
    }

    #[test]
    fn parse_keeps_extra_separators_in_data() {
        let event = Event::parse("A|b|c|d|e").unwrap();
        assert_eq!(event.data, "c|d|e");
    }

    #[test]
    fn parse_accepts_empty_data() {
        let event = Event::parse("HELLO|crasher|").unwrap();
        assert_eq!(event.data, "");
    }

    #[test]
    fn parse_strips_carriage_return() {
        let event = Event::parse("PING|gen|p1\r").unwrap();
        assert_eq!(event.data, "p1");
    }

    #[test]
    fn parse_rejects_missing_separators() {
        assert!(matches!(
            Event::parse("no separators here"),
            Err(KernelError::ParseFailed(_))
        ));
        assert!(matches!(
            Event::parse("ONE|field"),
            Err(KernelError::ParseFailed(_))
        ));
    }

    #[test]
    fn parse_rejects_empty_type_or_sender() {
        assert!(Event::parse("|gen|x").is_err());
        assert!(Event::parse("PING||x").is_err());
    }

    #[test]
    fn new_rejects_separator_in_type() {
        assert!(matches!(
            Event::new("A|B", "gen", ""),
            Err(KernelError::InvalidArg(_))
        ));
    }

    #[test]
    fn data_at_exactly_max_len_survives() {
        let data = "x".repeat(MAX_DATA_LEN);
        let event = Event::new("T", "s", &data).unwrap();
        assert_eq!(event.data.len(), MAX_DATA_LEN);
        let parsed = Event::parse(event.serialize().trim_end()).unwrap();
        assert_eq!(parsed.data.len(), MAX_DATA_LEN);
    }

    #[test]
    fn data_one_past_max_len_loses_last_byte() {
        let data = "x".repeat(MAX_DATA_LEN + 1);
        let event = Event::new("T", "s", &data).unwrap();
        assert_eq!(event.data.len(), MAX_DATA_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut data = "x".repeat(MAX_DATA_LEN - 1);
        data.push('é');
        let event = Event::new("T", "s", &data).unwrap();
        assert!(event.data.len() <= MAX_DATA_LEN);
        assert!(event.data.is_char_boundary(event.data.len()));
    }

    #[test]
    fn oversized_type_fails_to_parse() {
        let line = format!("{}|s|d", "T".repeat(MAX_TYPE_LEN + 1));
        assert!(Event::parse(&line).is_err());
    }
}
