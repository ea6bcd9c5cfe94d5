use chrono::{DateTime, Utc};

use crate::catalog::TableKey;
use crate::sequence::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeTier {
    Observe,
    Small,
    Medium,
    Heavy,
}

impl StakeTier {
    pub fn label(self) -> &'static str {
        match self {
            StakeTier::Observe => "觀望",
            StakeTier::Small => "小注",
            StakeTier::Medium => "中注",
            StakeTier::Heavy => "重注",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recommendation {
    pub table: TableKey,
    pub side: Side,
    pub amount: i64,
    pub confidence: u8,
    pub tier: StakeTier,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSequence {
    pub table: TableKey,
    pub symbols: Vec<Side>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    GameChosen,
    HallChosen,
    TableChosen,
    SequenceEntered,
    AwaitingOutcome,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::GameChosen => "game_chosen",
            Stage::HallChosen => "hall_chosen",
            Stage::TableChosen => "table_chosen",
            Stage::SequenceEntered => "sequence_entered",
            Stage::AwaitingOutcome => "awaiting_outcome",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub browsing_game: Option<String>,
    pub browsing_hall: Option<String>,
    pub current_table: Option<TableKey>,
    pub pending_sequence: Option<PendingSequence>,
    pub last_recommendation: Option<Recommendation>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_result_press_at: Option<DateTime<Utc>>,
    pub qa_mode_expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn stage(&self) -> Stage {
        if self.last_recommendation.is_some() {
            Stage::AwaitingOutcome
        } else if self.pending_sequence.is_some() {
            Stage::SequenceEntered
        } else if self.current_table.is_some() {
            Stage::TableChosen
        } else if self.browsing_hall.is_some() {
            Stage::HallChosen
        } else if self.browsing_game.is_some() {
            Stage::GameChosen
        } else {
            Stage::Idle
        }
    }

    pub fn is_idle_expired(&self, now: DateTime<Utc>, inactive_ms: u64) -> bool {
        match self.last_activity_at {
            Some(last) => now.signed_duration_since(last).num_milliseconds() > inactive_ms as i64,
            None => false,
        }
    }

    /// Back to a blank conversation; only the activity clock survives.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = SessionState {
            last_activity_at: Some(now),
            ..SessionState::default()
        };
    }

    pub fn qa_open(&self, now: DateTime<Utc>) -> bool {
        self.qa_mode_expires_at
            .map(|until| now < until)
            .unwrap_or(false)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(now);
    }

    /// Any menu selection invalidates an unconfirmed history string.
    pub(crate) fn clear_pending(&mut self) {
        self.pending_sequence = None;
    }
}
