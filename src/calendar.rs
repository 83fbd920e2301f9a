// =============================================================================
// Market Calendar — trading-day classification and event proximity
// =============================================================================
//
// All session logic is anchored to America/New_York. Daily risk counters
// reset at the exchange-local midnight, and the daily snapshot job fires at
// the configured exchange-local time.
//
// Holiday and FOMC tables are static for the seasons the engine trades;
// extend them alongside the yearly calendar refresh.
// =============================================================================

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;

/// Full-day US equity market holidays.
const MARKET_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2025
    (2025, 1, 1),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    // 2026
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
];

/// Scheduled FOMC decision days (second day of each two-day meeting).
const FOMC_DAYS: &[(i32, u32, u32)] = &[
    (2025, 1, 29),
    (2025, 3, 19),
    (2025, 5, 7),
    (2025, 6, 18),
    (2025, 7, 30),
    (2025, 9, 17),
    (2025, 10, 29),
    (2025, 12, 10),
    (2026, 1, 28),
    (2026, 3, 18),
    (2026, 4, 29),
    (2026, 6, 17),
    (2026, 7, 29),
    (2026, 9, 16),
    (2026, 10, 28),
    (2026, 12, 9),
];

/// Session classification and event-calendar lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketCalendar;

impl MarketCalendar {
    pub fn new() -> Self {
        Self
    }

    /// Today's date at the exchange (America/New_York).
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&New_York).date_naive()
    }

    /// True on weekdays that are not full-day market holidays.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.is_holiday(date)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        MARKET_HOLIDAYS
            .iter()
            .any(|&(y, m, d)| date.year() == y && date.month() == m && date.day() == d)
    }

    /// The next trading day strictly after `date`.
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut d = date.succ_opt().expect("date overflow");
        while !self.is_trading_day(d) {
            d = d.succ_opt().expect("date overflow");
        }
        d
    }

    /// Days to expiration, exclusive of today. Never negative.
    pub fn dte(&self, expiration: NaiveDate, today: NaiveDate) -> i64 {
        (expiration - today).num_days().max(0)
    }

    /// Third Friday of the given month (monthly options expiration).
    pub fn third_friday(&self, year: i32, month: u32) -> NaiveDate {
        let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
        let offset = (Weekday::Fri.num_days_from_monday() + 7
            - first.weekday().num_days_from_monday())
            % 7;
        first + chrono::Duration::days(offset as i64 + 14)
    }

    /// True when `date` falls in the Monday-Sunday week containing the
    /// month's third Friday.
    pub fn is_opex_week(&self, date: NaiveDate) -> bool {
        let opex = self.third_friday(date.year(), date.month());
        let week_start = opex - chrono::Duration::days(opex.weekday().num_days_from_monday() as i64);
        let week_end = week_start + chrono::Duration::days(6);
        date >= week_start && date <= week_end
    }

    /// Days until the next scheduled FOMC decision on or after `date`.
    /// `None` once the static table runs out.
    pub fn days_to_fomc(&self, date: NaiveDate) -> Option<i64> {
        FOMC_DAYS
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
            .filter(|fomc| *fomc >= date)
            .map(|fomc| (fomc - date).num_days())
            .min()
    }

    /// Seconds from now until the next occurrence of `time_hhmm`
    /// (exchange-local "HH:MM") on a trading day.
    pub fn seconds_until_next(&self, time_hhmm: &str) -> Option<u64> {
        let target_time = NaiveTime::parse_from_str(time_hhmm, "%H:%M").ok()?;
        let now_ny = Utc::now().with_timezone(&New_York);

        let mut date = now_ny.date_naive();
        if now_ny.time() >= target_time || !self.is_trading_day(date) {
            date = self.next_trading_day(date);
        }
        while !self.is_trading_day(date) {
            date = self.next_trading_day(date);
        }

        let target = New_York
            .from_local_datetime(&date.and_time(target_time))
            .single()?;
        let delta = target.signed_duration_since(now_ny).num_seconds();
        Some(delta.max(0) as u64)
    }
}
