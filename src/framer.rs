//! Length-prefixed envelope framing over the streaming transport.
//!
//! Two frame shapes travel on the wire: a data frame, whose header is the
//! literal marker `~m~`, a decimal byte length, the marker again, and
//! exactly that many bytes of JSON payload; and a heartbeat frame, whose
//! header is the marker `~h~` followed by a decimal counter and no payload.
//! Multiple frames may arrive concatenated in a single transport read, so
//! decoding scans the whole buffer and returns every frame found in it.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::errors::Error;

/// One decoded unit taken off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A structured JSON payload.
    Data(Value),
    /// A heartbeat counter, echoed back verbatim by the caller.
    Heartbeat(u64),
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"~m~(\d+)~m~|~h~(\d+)").unwrap())
}

/// Stateless encoder/decoder for the envelope described above.
pub struct Framer;

impl Framer {
    /// Scans `raw` for every frame header it contains and decodes each one.
    ///
    /// Invalid JSON inside an otherwise well-formed data frame is discarded
    /// (the caller should log it); a header whose declared length runs past
    /// the end of the buffer is a framing violation and fails the whole
    /// batch, since the transport delivered a truncated or corrupt stream.
    pub fn decode(raw: &str) -> Result<Vec<Frame>, Error> {
        let mut frames = Vec::new();
        for capture in header_pattern().captures_iter(raw) {
            if let Some(counter) = capture.get(2) {
                let n: u64 = counter
                    .as_str()
                    .parse()
                    .map_err(|_| Error::TransportError("malformed heartbeat counter".into()))?;
                frames.push(Frame::Heartbeat(n));
                continue;
            }

            let length_match = capture.get(1).expect("data or heartbeat group must match");
            let length: usize = length_match
                .as_str()
                .parse()
                .map_err(|_| Error::TransportError("malformed frame length".into()))?;
            let whole = capture.get(0).unwrap();
            let start = whole.end();
            let end = start + length;
            if end > raw.len() {
                return Err(Error::TransportError(format!(
                    "frame declares {length} bytes but only {} remain",
                    raw.len() - start
                )));
            }
            let content = &raw[start..end];
            match serde_json::from_str::<Value>(content) {
                Ok(payload) => frames.push(Frame::Data(payload)),
                Err(_) => {
                    tracing::warn!(content = %truncate(content, 100), "discarding frame with invalid JSON payload");
                }
            }
        }
        Ok(frames)
    }

    /// Encodes a single structured outbound message as one data frame.
    pub fn encode_data(payload: &Value) -> String {
        let content = serde_json::to_string(payload).expect("Value serialization is infallible");
        Self::wrap(&content)
    }

    /// Encodes a heartbeat echo frame.
    pub fn encode_heartbeat(counter: u64) -> String {
        format!("~h~{counter}")
    }

    fn wrap(content: &str) -> String {
        format!("~m~{}~m~{}", content.len(), content)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_single_data_frame() {
        let payload = json!({"m": "qsd", "p": ["qs_1", {"n": "BIST:THYAO"}]});
        let wire = Framer::encode_data(&payload);
        let frames = Framer::decode(&wire).unwrap();
        assert_eq!(frames, vec![Frame::Data(payload)]);
    }

    #[test]
    fn decodes_heartbeat_frame() {
        let frames = Framer::decode("~h~42").unwrap();
        assert_eq!(frames, vec![Frame::Heartbeat(42)]);
    }

    #[test]
    fn decodes_concatenated_frames_from_a_single_read() {
        let a = json!({"m": "quote_completed", "p": ["qs_1", "THYAO"]});
        let wire = format!("{}~h~7{}", Framer::encode_data(&a), Framer::encode_data(&a));
        let frames = Framer::decode(&wire).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Data(a.clone()), Frame::Heartbeat(7), Frame::Data(a)]
        );
    }

    #[test]
    fn re_encoding_a_decoded_payload_is_byte_identical() {
        let payload = json!({"m": "qsd", "p": ["qs_1", {"n": "BIST:THYAO", "v": {"lp": 299.0}}]});
        let wire = Framer::encode_data(&payload);
        let frames = Framer::decode(&wire).unwrap();
        let Frame::Data(decoded) = &frames[0] else { panic!("expected data frame") };
        assert_eq!(Framer::encode_data(decoded), wire);
    }

    #[test]
    fn discards_invalid_json_payload_without_erroring() {
        let wire = "~m~9~m~not-json";
        let frames = Framer::decode(wire).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn declared_length_past_buffer_end_is_a_framing_error() {
        let wire = "~m~100~m~short";
        assert!(Framer::decode(wire).is_err());
    }
}
