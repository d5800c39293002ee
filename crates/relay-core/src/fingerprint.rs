//! CRC32 fingerprints over canonical transcript serializations.
//!
//! A fingerprint is the IEEE CRC32 of the compact JSON encoding of a message
//! slice, rendered as eight lowercase hex digits. The split form joins the
//! checksum of the earlier conversation and of the latest exchange with
//! [`SPLIT_SEPARATOR`].

use crate::transcript::Message;

/// Separator between the two halves of a split fingerprint.
pub const SPLIT_SEPARATOR: &str = "--";

/// Fingerprint a message slice.
pub fn fingerprint(messages: &[Message]) -> String {
    format!("{:08x}", crc32fast::hash(&canonical_bytes(messages)))
}

/// Fingerprint the earlier conversation and the latest exchange separately.
pub fn fingerprint_split(previous: &[Message], latest: &[Message]) -> String {
    format!(
        "{}{SPLIT_SEPARATOR}{}",
        fingerprint(previous),
        fingerprint(latest)
    )
}

/// Everything before the final exchange; the whole transcript when it has
/// two messages or fewer.
pub fn prefix(messages: &[Message]) -> &[Message] {
    if messages.len() <= 2 {
        messages
    } else {
        &messages[..messages.len() - 2]
    }
}

/// The final exchange, i.e. the messages [`prefix`] leaves out. Empty when
/// the prefix is the whole transcript.
pub fn latest_exchange(messages: &[Message]) -> &[Message] {
    &messages[prefix(messages).len()..]
}

fn canonical_bytes(messages: &[Message]) -> Vec<u8> {
    // `Message` holds only an enum and a `String`; encoding cannot fail.
    serde_json::to_vec(messages).expect("message serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn convo() -> Vec<Message> {
        vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("how are you?"),
        ]
    }

    #[test]
    fn canonical_form_is_compact_and_ordered() {
        let bytes = canonical_bytes(&[Message::user("hi")]);
        assert_eq!(bytes, br#"[{"role":"user","content":"hi"}]"#);
    }

    #[test]
    fn matches_reference_crc32() {
        // CRC32/IEEE("123456789") is the standard check value.
        assert_eq!(format!("{:08x}", crc32fast::hash(b"123456789")), "cbf43926");
        let fp = fingerprint(&[Message::user("hi")]);
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn equal_transcripts_share_a_fingerprint() {
        assert_eq!(fingerprint(&convo()), fingerprint(&convo()));
    }

    #[test]
    fn single_character_change_alters_fingerprint() {
        let mut other = convo();
        other[1].content = "hj".into();
        assert_ne!(fingerprint(&convo()), fingerprint(&other));
    }

    #[test]
    fn prefix_drops_final_exchange() {
        let messages = convo();
        assert_eq!(prefix(&messages), &messages[..2]);
        assert_eq!(latest_exchange(&messages), &messages[2..]);

        let short = &messages[..2];
        assert_eq!(prefix(short), short);
        assert!(latest_exchange(short).is_empty());
    }

    #[test]
    fn split_joins_both_halves() {
        let messages = convo();
        let split = fingerprint_split(prefix(&messages), latest_exchange(&messages));
        let (prev, latest) = split.split_once(SPLIT_SEPARATOR).unwrap();
        assert_eq!(prev, fingerprint(&messages[..2]));
        assert_eq!(latest, fingerprint(&messages[2..]));
        assert_eq!(split.len(), 8 + SPLIT_SEPARATOR.len() + 8);
    }
}
