//! Trading-session calendar
//!
//! The cache uses a [`TradingCalendar`] to pick the short (intraday) or long
//! (overnight / weekend) TTL for a freshly written entry.

use chrono::{
    DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

/// Predicate deciding whether a timestamp falls within the trading session
pub trait TradingCalendar: Send + Sync {
    fn is_trading_hours(&self, at: DateTime<Utc>) -> bool;
}

/// US cash-equity session, evaluated in New York local time
///
/// Full-day NYSE holidays are closed (see [`is_exchange_holiday`]). Early
/// closes such as the day after Thanksgiving are treated as full sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsEquitySession {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for UsEquitySession {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl UsEquitySession {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }
}

impl TradingCalendar for UsEquitySession {
    fn is_trading_hours(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&eastern_offset(at));
        let weekday = local.weekday();
        if matches!(weekday, Weekday::Sat | Weekday::Sun) || is_exchange_holiday(local.date_naive())
        {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }
}

/// UTC offset of America/New_York at `at`
///
/// DST runs from the second Sunday of March, 02:00 EST (07:00 UTC), to the
/// first Sunday of November, 02:00 EDT (06:00 UTC).
pub fn eastern_offset(at: DateTime<Utc>) -> FixedOffset {
    const EST: i32 = -5 * 3600;
    const EDT: i32 = -4 * 3600;

    let year = at.year();
    let start = sunday_at_utc(year, 3, 2, 7);
    let end = sunday_at_utc(year, 11, 1, 6);

    let seconds = match (start, end) {
        (Some(start), Some(end)) if at >= start && at < end => EDT,
        _ => EST,
    };
    FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix())
}

/// Calendar date in New York at `at`
pub fn eastern_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&eastern_offset(at)).date_naive()
}

/// True when NYSE is closed all day on `date` for a holiday
///
/// Fixed-date holidays falling on a Saturday are observed the Friday before,
/// on a Sunday the Monday after. New Year's Day on a Saturday is not observed.
/// Unscheduled closures are not known.
pub fn is_exchange_holiday(date: NaiveDate) -> bool {
    let year = date.year();
    let nth = |month: u32, weekday: Weekday, n: u8| {
        NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
    };
    let fixed = |month: u32, day: u32| NaiveDate::from_ymd_opt(year, month, day).and_then(observed);

    let holidays = [
        NaiveDate::from_ymd_opt(year, 1, 1)
            .filter(|d| d.weekday() != Weekday::Sat)
            .and_then(observed),
        // Martin Luther King Jr. Day, Washington's Birthday
        nth(1, Weekday::Mon, 3),
        nth(2, Weekday::Mon, 3),
        // Good Friday
        easter_sunday(year).and_then(|d| d.checked_sub_days(Days::new(2))),
        // Memorial Day
        nth(5, Weekday::Mon, 5).or_else(|| nth(5, Weekday::Mon, 4)),
        (year >= 2022).then(|| fixed(6, 19)).flatten(),
        fixed(7, 4),
        // Labor Day, Thanksgiving
        nth(9, Weekday::Mon, 1),
        nth(11, Weekday::Thu, 4),
        fixed(12, 25),
    ];
    holidays.contains(&Some(date))
}

fn observed(date: NaiveDate) -> Option<NaiveDate> {
    match date.weekday() {
        Weekday::Sat => date.pred_opt(),
        Weekday::Sun => date.succ_opt(),
        _ => Some(date),
    }
}

/// Western Easter, anonymous Gregorian algorithm
fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
}

fn sunday_at_utc(year: i32, month: u32, nth: u8, hour_utc: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, nth)?;
    let naive = date.and_hms_opt(hour_utc, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}
