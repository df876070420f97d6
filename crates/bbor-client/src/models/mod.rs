//! Resource documents returned by the server.

pub mod study;
pub mod trial;
pub mod user;

use serde::{Deserialize, Serialize};

pub use study::{Diffraction, MonochromaticBeam, Study};
pub use trial::{Refine, Trial};
pub use user::{Group, User};

/// Reference to a document in another collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub collection: String,
    pub id: String,
}

/// Server timestamps, with or without a UTC offset.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| Utc.from_utc_datetime(&naive))
            .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn accepts_offset_and_naive_forms() {
            let with_offset = parse("2025-03-01T12:00:00+09:00").expect("offset");
            let naive = parse("2025-03-01T03:00:00.250").expect("naive");
            assert_eq!(with_offset.to_rfc3339(), "2025-03-01T03:00:00+00:00");
            assert_eq!(naive.timestamp_millis() - with_offset.timestamp_millis(), 250);
            assert!(parse("yesterday").is_err());
        }
    }
}
