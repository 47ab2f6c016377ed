use serde::{Deserialize, Deserializer, Serializer};
use time::{
    OffsetDateTime, PrimitiveDateTime,
    format_description::{BorrowedFormatItem, well_known::Rfc3339},
    macros::format_description,
};

/// Serde helpers for time::OffsetDateTime.
///
/// Input format: `YYYY-mm-dd HH:MM:SS` (the database column format)
/// Output format: RFC 3339 (e.g. `2025-01-02T03:04:05Z`).
pub mod offset_datetime {

    use super::*;

    pub(crate) const INPUT_FORMAT: &[BorrowedFormatItem] = format_description!(
        "[year]-[month padding:zero]-[day padding:zero] [hour padding:zero]:[minute padding:zero]:[second padding:zero]"
    );
    pub(super) const OUTPUT_FORMAT: Rfc3339 = Rfc3339;

    pub fn serialize<S>(dt: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(
            &dt.format(&OUTPUT_FORMAT)
                .map_err(serde::ser::Error::custom)?
                .to_string(),
        )
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        PrimitiveDateTime::parse(&raw, INPUT_FORMAT)
            // Be tolerant and accept the output format as input too.
            .or_else(|_| PrimitiveDateTime::parse(&raw, &OUTPUT_FORMAT))
            .map_err(serde::de::Error::custom)
            .map(|pdt| pdt.assume_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn roundtrips_database_datetime() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Wrapper {
            #[serde(with = "crate::serde_helpers::offset_datetime")]
            ts: OffsetDateTime,
        }

        let dt = PrimitiveDateTime::parse(
            "2025-08-23 19:21:00",
            crate::serde_helpers::offset_datetime::INPUT_FORMAT,
        )
        .unwrap()
        .assume_utc();
        let value = Wrapper { ts: dt };
        let serialized = serde_json::to_string(&value).unwrap();
        assert_eq!(
            serialized, "{\"ts\":\"2025-08-23T19:21:00Z\"}",
            "Expected 2025-08-23T19:21:00Z got {}",
            serialized
        );

        let deserialized: Wrapper = serde_json::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized, value,
            "Deserialized value did not match original. Got {:?}, expected {:?}",
            deserialized, value
        );
    }
}
