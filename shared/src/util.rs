//! 本地时区日期比较

use chrono::{DateTime, Datelike, FixedOffset, Utc};

/// Whether `at` falls on the same calendar day as `now` in `now`'s offset
pub fn same_local_day(at: DateTime<Utc>, now: DateTime<FixedOffset>) -> bool {
    let local = at.with_timezone(now.offset());
    local.date_naive() == now.date_naive()
}

/// Whether `at` falls in the same calendar month as `now` in `now`'s offset
pub fn same_local_month(at: DateTime<Utc>, now: DateTime<FixedOffset>) -> bool {
    let local = at.with_timezone(now.offset());
    local.year() == now.year() && local.month() == now.month()
}
