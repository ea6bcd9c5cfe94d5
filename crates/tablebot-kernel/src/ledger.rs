use chrono::{DateTime, Utc};

use crate::catalog::TableKey;
use crate::sequence::Side;
use crate::session::Recommendation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub table: TableKey,
    pub side: Side,
    pub amount: i64,
    pub actual: Side,
    pub units: i64,
    pub settled_at: DateTime<Utc>,
}

/// `round(amount / unit_size)`, halves rounded away from zero.
pub fn units_of(amount: i64, unit_size: i64) -> i64 {
    let unit_size = unit_size.max(1);
    let quotient = amount / unit_size;
    let remainder = amount % unit_size;
    if remainder.abs() * 2 >= unit_size {
        quotient + amount.signum()
    } else {
        quotient
    }
}

pub fn settle(
    rec: &Recommendation,
    actual: Side,
    unit_size: i64,
    settled_at: DateTime<Utc>,
) -> LedgerEntry {
    let sign = if actual == rec.side { 1 } else { -1 };
    LedgerEntry {
        table: rec.table.clone(),
        side: rec.side,
        amount: rec.amount,
        actual,
        units: units_of(rec.amount, unit_size) * sign,
        settled_at,
    }
}

/// Append-only settled rounds of one actor, in settlement order.
#[derive(Debug, Clone, Default)]
pub struct LedgerBook {
    entries: Vec<LedgerEntry>,
}

impl LedgerBook {
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StakeTier;

    fn rec(side: Side, amount: i64) -> Recommendation {
        Recommendation {
            table: TableKey::new("DG", "Flagship", "D01"),
            side,
            amount,
            confidence: 70,
            tier: StakeTier::Medium,
            issued_at: DateTime::<Utc>::from_timestamp_millis(0).unwrap(),
        }
    }

    #[test]
    fn winning_round_earns_positive_units() {
        let now = Utc::now();
        let entry = settle(&rec(Side::Banker, 1000), Side::Banker, 100, now);
        assert_eq!(entry.units, 10);
        assert_eq!(entry.settled_at, now);
    }

    #[test]
    fn losing_round_costs_units() {
        let entry = settle(&rec(Side::Banker, 1000), Side::Player, 100, Utc::now());
        assert_eq!(entry.units, -10);
        let tie = settle(&rec(Side::Player, 300), Side::Tie, 100, Utc::now());
        assert_eq!(tie.units, -3);
    }

    #[test]
    fn units_round_half_away_from_zero() {
        assert_eq!(units_of(150, 100), 2);
        assert_eq!(units_of(149, 100), 1);
        assert_eq!(units_of(-150, 100), -2);
        assert_eq!(units_of(2900, 1000), 3);
    }

    #[test]
    fn book_keeps_insertion_order() {
        let mut book = LedgerBook::default();
        book.append(settle(&rec(Side::Banker, 100), Side::Banker, 100, Utc::now()));
        book.append(settle(&rec(Side::Player, 200), Side::Banker, 100, Utc::now()));
        let units: Vec<i64> = book.entries().iter().map(|e| e.units).collect();
        assert_eq!(units, vec![1, -2]);
    }
}
