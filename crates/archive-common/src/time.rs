//! Init-time enumeration and monthly run chunks.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

/// One calendar-month slice of a requested archive range.
///
/// `start` is inclusive and `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthChunk {
    pub year: i32,
    pub month: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Split the inclusive date range `[start, end]` into calendar-month chunks.
pub fn month_chunks(start: NaiveDate, end: NaiveDate) -> Vec<MonthChunk> {
    let mut chunks = Vec::new();
    if end < start {
        return chunks;
    }

    let range_end = day_start(end) + Duration::days(1);
    let mut cursor = day_start(start);

    while cursor < range_end {
        let (year, month) = (cursor.year(), cursor.month());
        let next_month = if month == 12 {
            Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
        } else {
            Utc.with_ymd_and_hms(year, month + 1, 1, 0, 0, 0)
        }
        .single()
        .unwrap_or(range_end);

        let chunk_end = next_month.min(range_end);
        chunks.push(MonthChunk {
            year,
            month,
            start: cursor,
            end: chunk_end,
        });
        cursor = chunk_end;
    }

    chunks
}

/// Model init times in `[start, end)` whose hour is a multiple of `cycle_hours`.
pub fn init_times(start: DateTime<Utc>, end: DateTime<Utc>, cycle_hours: u32) -> Vec<DateTime<Utc>> {
    let cycle = cycle_hours.max(1);
    let mut times = Vec::new();

    let mut t = start
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(start);
    if t < start {
        t = t + Duration::hours(1);
    }
    while t.hour() % cycle != 0 {
        t = t + Duration::hours(1);
    }

    while t < end {
        times.push(t);
        t = t + Duration::hours(cycle as i64);
    }

    times
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}
