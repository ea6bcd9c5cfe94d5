use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};

use crate::catalog::TableKey;
use crate::ledger::LedgerEntry;

/// Local-time range bucketing ledger entries into one business day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDayPolicy {
    pub utc_offset_minutes: i32,
    pub start_minutes: u32,
    pub end_minutes: u32,
}

/// Half-open `[start, end)` range in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessDayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusinessDayWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub table: TableKey,
    pub rounds: usize,
    pub total_amount: i64,
    pub total_units: i64,
    pub money: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyReport {
    pub window: BusinessDayWindow,
    pub games: Vec<String>,
    pub tables: Vec<String>,
    pub rounds: usize,
    pub total_amount: i64,
    pub total_units: i64,
    pub money: i64,
}

impl DailyReport {
    pub fn is_empty(&self) -> bool {
        self.rounds == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReportAggregator {
    pub unit_size: i64,
    pub business_day: BusinessDayPolicy,
}

impl ReportAggregator {
    pub fn round_report(&self, entries: &[LedgerEntry], table: &TableKey) -> RoundReport {
        let mut report = RoundReport {
            table: table.clone(),
            rounds: 0,
            total_amount: 0,
            total_units: 0,
            money: 0,
        };
        for entry in entries.iter().filter(|e| e.table == *table) {
            report.rounds += 1;
            report.total_amount += entry.amount;
            report.total_units += entry.units;
        }
        report.money = report.total_units * self.unit_size;
        report
    }

    pub fn daily_report(&self, entries: &[LedgerEntry], window: BusinessDayWindow) -> DailyReport {
        let mut report = DailyReport {
            window,
            games: Vec::new(),
            tables: Vec::new(),
            rounds: 0,
            total_amount: 0,
            total_units: 0,
            money: 0,
        };
        for entry in entries.iter().filter(|e| window.contains(e.settled_at)) {
            report.rounds += 1;
            report.total_amount += entry.amount;
            report.total_units += entry.units;
            if !report.games.contains(&entry.table.game) {
                report.games.push(entry.table.game.clone());
            }
            let short = entry.table.short_name();
            if !report.tables.contains(&short) {
                report.tables.push(short);
            }
        }
        report.money = report.total_units * self.unit_size;
        report
    }

    pub fn current_window(&self, now: DateTime<Utc>) -> BusinessDayWindow {
        business_day_window(now, self.business_day)
    }
}

/// The most recent business day whose start is not after `now`.
pub fn business_day_window(now: DateTime<Utc>, policy: BusinessDayPolicy) -> BusinessDayWindow {
    let offset =
        FixedOffset::east_opt(policy.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    let local_date = now.with_timezone(&offset).date_naive();
    let local_midnight = local_date
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    let mut start = local_midnight + Duration::minutes(policy.start_minutes as i64);
    while start > now {
        start -= Duration::days(1);
    }
    let length = policy.end_minutes.saturating_sub(policy.start_minutes) as i64;
    BusinessDayWindow {
        start,
        end: start + Duration::minutes(length),
    }
}
