//! A set of tools for working with the sea_orm date/time types.

use sea_orm::prelude::TimeDateTime;
use time::OffsetDateTime;

/// Convert from a unix timestamp in seconds to a TimeDateTime object.
pub fn from_unix_timestamp_s(timestamp: u64) -> TimeDateTime {
    let offset = OffsetDateTime::from_unix_timestamp(timestamp as i64)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    TimeDateTime::new(offset.date(), offset.time())
}

/// Get the current time as a sql date time object.
pub fn now() -> TimeDateTime {
    let offset = OffsetDateTime::now_utc();
    TimeDateTime::new(offset.date(), offset.time())
}

/// Convert a sql date time object back to unix seconds.
pub fn to_unix_timestamp_s(datetime: TimeDateTime) -> u64 {
    datetime.assume_utc().unix_timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_round_trip() {
        let ts = 1_700_000_000;
        assert_eq!(to_unix_timestamp_s(from_unix_timestamp_s(ts)), ts);
    }
}
