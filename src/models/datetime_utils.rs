use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{self, Bson};
use serde::{self, Deserialize, Deserializer, Serialize, Serializer};

/// Stores a chrono timestamp as a native BSON date so range queries on
/// `timestamp` work server-side.
pub fn serialize_datetime<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let bson_dt = Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis()));
    bson_dt.serialize(serializer)
}

pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match Bson::deserialize(deserializer)? {
        Bson::DateTime(dt) => Utc
            .timestamp_millis_opt(dt.timestamp_millis())
            .single()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        _ => Err(serde::de::Error::custom("expecting DateTime")),
    }
}

/// Half-open `[start, end)` bounds of a UTC calendar year as BSON dates.
pub fn year_bounds(year: i32) -> Option<(bson::DateTime, bson::DateTime)> {
    let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
    let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
    Some((
        bson::DateTime::from_millis(start.timestamp_millis()),
        bson::DateTime::from_millis(end.timestamp_millis()),
    ))
}
