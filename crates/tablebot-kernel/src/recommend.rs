use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::catalog::TableKey;
use crate::sequence::{render_sequence, Side};
use crate::session::{Recommendation, StakeTier};

/// Side and stake for a table given its recent history. Deterministic in
/// `(table, history)`; `issued_at` is only recorded.
pub fn derive_recommendation(
    table: &TableKey,
    history: &[Side],
    issued_at: DateTime<Utc>,
) -> Recommendation {
    let seed = seed_bytes(&[
        "rec",
        &table.to_string(),
        &render_sequence(history),
    ]);
    let side = if seed[0] % 2 == 0 {
        Side::Banker
    } else {
        Side::Player
    };
    let (confidence, tier, amount) = stake_from_seed(&seed);
    Recommendation {
        table: table.clone(),
        side,
        amount,
        confidence,
        tier,
        issued_at,
    }
}

/// Stake for a side picked by a group admin. `round` is the number of
/// rounds already settled for the group, so successive rounds differ.
pub fn derive_admin_recommendation(
    table: &TableKey,
    side: Side,
    round: usize,
    issued_at: DateTime<Utc>,
) -> Recommendation {
    let round = round.to_string();
    let symbol = side.symbol().to_string();
    let seed = seed_bytes(&["admin", &table.to_string(), &symbol, &round]);
    let (confidence, tier, amount) = stake_from_seed(&seed);
    Recommendation {
        table: table.clone(),
        side,
        amount,
        confidence,
        tier,
        issued_at,
    }
}

fn stake_from_seed(seed: &[u8; 32]) -> (u8, StakeTier, i64) {
    let confidence = 45 + (seed[1] % 46);
    let pick = u16::from_le_bytes([seed[2], seed[3]]) as i64;
    let (tier, amount) = match confidence {
        0..=50 => (StakeTier::Observe, 100),
        51..=65 => (StakeTier::Small, hundreds_in(100, 1000, pick)),
        66..=75 => (StakeTier::Medium, hundreds_in(1100, 2000, pick)),
        _ => (StakeTier::Heavy, hundreds_in(2100, 3000, pick)),
    };
    (confidence, tier, amount)
}

fn hundreds_in(min: i64, max: i64, pick: i64) -> i64 {
    let start = min / 100;
    let end = max / 100;
    (start + pick % (end - start + 1)) * 100
}

fn seed_bytes(parts: &[&str]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let mut out = [0_u8; 32];
    out.copy_from_slice(&digest);
    out
}
