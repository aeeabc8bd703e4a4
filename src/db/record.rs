//! Value record framing.
//!
//! Before encryption every value is prefixed with its write time:
//! ```text
//! 1700000000,blue
//! ^^^^^^^^^^ ten-digit unix seconds, then one separator byte, then the value
//! ```

use chrono::{DateTime, TimeZone, Utc};

use super::error::{DatabaseError, DatabaseResult};

/// width of the timestamp prefix
pub const METADATA_LEN: usize = 10;

/// byte between metadata and payload
pub const SEPARATOR: u8 = b',';

/// A decrypted value split into write-time metadata and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Entry {
    /// The write time recorded in the metadata.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let secs: i64 = std::str::from_utf8(&self.metadata).ok()?.trim().parse().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }

    /// payload as text, if it is utf-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Prefix `value` with the current time.
pub fn wrap(value: &[u8]) -> Vec<u8> {
    wrap_at(Utc::now(), value)
}

/// Prefix `value` with `at`.
pub fn wrap_at(at: DateTime<Utc>, value: &[u8]) -> Vec<u8> {
    let mut out = format!("{:0width$}", at.timestamp(), width = METADATA_LEN).into_bytes();
    out.push(SEPARATOR);
    out.extend_from_slice(value);
    out
}

/// Split a decrypted record into metadata and payload.
pub fn split(plain: &[u8]) -> DatabaseResult<Entry> {
    if plain.len() <= METADATA_LEN || plain[METADATA_LEN] != SEPARATOR {
        return Err(DatabaseError::MalformedValue(format!(
            "record of {} bytes has no {}-byte metadata prefix",
            plain.len(),
            METADATA_LEN
        )));
    }
    Ok(Entry {
        metadata: plain[..METADATA_LEN].to_vec(),
        payload: plain[METADATA_LEN + 1..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wrap_layout() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(wrap_at(at, b"blue"), b"1700000000,blue");
    }

    #[test]
    fn test_wrap_pads_small_timestamps() {
        let at = Utc.timestamp_opt(42, 0).unwrap();
        assert_eq!(wrap_at(at, b"x"), b"0000000042,x");
    }

    #[test]
    fn test_split_recovers_timestamp() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let entry = split(&wrap_at(at, b"Some value")).unwrap();
        assert_eq!(entry.metadata, b"1700000000");
        assert_eq!(entry.payload_str(), Some("Some value"));
        assert_eq!(entry.timestamp(), Some(at));
    }

    #[test]
    fn test_split_keeps_separators_in_payload() {
        let entry = split(b"1700000000,a,b,c").unwrap();
        assert_eq!(entry.payload, b"a,b,c");
    }

    #[test]
    fn test_split_empty_payload() {
        let entry = split(b"1700000000,").unwrap();
        assert!(entry.payload.is_empty());
    }

    #[test]
    fn test_split_rejects_short_records() {
        assert!(split(b"").is_err());
        assert!(split(b"1700000000").is_err());
        assert!(split(b"17000000000blue").is_err());
    }

    proptest! {
        #[test]
        fn prop_split_inverts_wrap(secs in 0i64..9_999_999_999, value in proptest::collection::vec(any::<u8>(), 0..64)) {
            let at = Utc.timestamp_opt(secs, 0).unwrap();
            let entry = split(&wrap_at(at, &value)).unwrap();
            prop_assert_eq!(entry.timestamp(), Some(at));
            prop_assert_eq!(&entry.payload, &value);
        }
    }
}
