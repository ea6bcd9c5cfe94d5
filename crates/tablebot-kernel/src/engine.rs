use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tablebot_contracts::{Actor, ActorKind};

use crate::catalog::{TableCatalog, TableKey};
use crate::command::Command;
use crate::ledger::{settle, LedgerBook, LedgerEntry};
use crate::recommend::{derive_admin_recommendation, derive_recommendation};
use crate::report::{BusinessDayWindow, DailyReport, ReportAggregator, RoundReport};
use crate::sequence::{validate_sequence, SequenceBounds, SequenceError, Side};
use crate::session::{PendingSequence, Recommendation, SessionState};

pub const TABLES_PER_PAGE: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    pub inactive_ms: u64,
    pub result_cooldown_ms: u64,
    pub qa_window_ms: u64,
    pub sequence: SequenceBounds,
    pub reports: ReportAggregator,
}

/// Who sent an event and where it came from.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub origin: Actor,
    pub sender_user_id: Option<String>,
}

/// Typed reply content. Wording and card layout live with the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Unauthorized {
        user_id: String,
    },
    SessionExpired,
    Intro,
    Contact,
    ReportMenu,
    GameMenu {
        games: Vec<String>,
    },
    HallMenu {
        game: String,
        halls: Vec<String>,
    },
    TableList {
        game: String,
        hall: String,
        tables: Vec<String>,
        page: usize,
        next_page: Option<usize>,
    },
    UnknownSelection,
    SequencePrompt {
        table: TableKey,
        min_len: usize,
        max_len: usize,
    },
    SequenceAccepted {
        table: TableKey,
        len: usize,
    },
    SequenceInvalid,
    SequenceTooShort {
        len: usize,
        min_len: usize,
    },
    SequenceTooLong {
        len: usize,
        max_len: usize,
    },
    NoTableSelected,
    NoPendingSequence,
    Recommendation {
        rec: Recommendation,
        dragon_tiger: bool,
    },
    CooldownActive,
    OutcomeRecorded {
        table: TableKey,
        actual: Side,
        settled: Option<LedgerEntry>,
        group: Option<Actor>,
        dragon_tiger: bool,
    },
    RoundReport(RoundReport),
    DailyReport(DailyReport),
    NoActivity {
        window: BusinessDayWindow,
    },
    AdminPanel {
        table: TableKey,
        group: Actor,
        dragon_tiger: bool,
    },
    PublicResult {
        rec: Recommendation,
        dragon_tiger: bool,
    },
    AdminFollowUp {
        table: TableKey,
        group: Actor,
        dragon_tiger: bool,
    },
    QaPrompt,
    /// Resolved by the chat collaborator before delivery.
    Ask {
        question: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Answer the originating event (reply token, then push fallback).
    Reply,
    Push(Actor),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub route: Route,
    pub reply: Reply,
}

impl Outbound {
    fn reply(reply: Reply) -> Self {
        Self {
            route: Route::Reply,
            reply,
        }
    }

    fn push(to: Actor, reply: Reply) -> Self {
        Self {
            route: Route::Push(to),
            reply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    Rejected,
    Unauthorized,
    Expired,
    Ignored,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Accepted => "accepted",
            Disposition::Rejected => "rejected",
            Disposition::Unauthorized => "unauthorized",
            Disposition::Expired => "expired",
            Disposition::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub disposition: Disposition,
    pub outbound: Vec<Outbound>,
    pub settled: Option<LedgerEntry>,
}

impl Dispatch {
    fn new(disposition: Disposition, outbound: Vec<Outbound>) -> Self {
        Self {
            disposition,
            outbound,
            settled: None,
        }
    }

    fn ignored() -> Self {
        Self::new(Disposition::Ignored, Vec::new())
    }

    fn rejected(reply: Reply) -> Self {
        Self::new(Disposition::Rejected, vec![Outbound::reply(reply)])
    }

    fn accepted(reply: Reply) -> Self {
        Self::new(Disposition::Accepted, vec![Outbound::reply(reply)])
    }
}

/// Actor whose session and ledger a command acts on. Group-mediated
/// commands name their group or room explicitly and may arrive from the
/// admin's private chat.
pub fn state_actor(origin: &Actor, command: &Command) -> Actor {
    command.target_group().unwrap_or(origin).clone()
}

pub struct ConversationEngine {
    policy: EnginePolicy,
    catalog: Arc<TableCatalog>,
    allowed_users: HashSet<String>,
    group_admins: HashSet<String>,
}

impl ConversationEngine {
    pub fn new(
        policy: EnginePolicy,
        catalog: Arc<TableCatalog>,
        allowed_users: impl IntoIterator<Item = String>,
        group_admins: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            policy,
            catalog,
            allowed_users: allowed_users.into_iter().collect(),
            group_admins: group_admins.into_iter().collect(),
        }
    }

    pub fn catalog(&self) -> &TableCatalog {
        &self.catalog
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.group_admins.contains(user_id)
    }

    pub fn is_authorized(&self, user_id: &str) -> bool {
        self.allowed_users.contains(user_id) || self.is_admin(user_id)
    }

    /// Runs one command against the session and ledger of
    /// [`state_actor`]`(ctx.origin, command)`. The caller holds both for the
    /// duration of the call.
    pub fn dispatch(
        &self,
        ctx: &DispatchContext,
        command: Command,
        session: &mut SessionState,
        ledger: &mut LedgerBook,
        now: DateTime<Utc>,
    ) -> Dispatch {
        let sender = ctx.sender_user_id.as_deref().unwrap_or_default();
        if !self.is_authorized(sender) {
            return Dispatch::new(
                Disposition::Unauthorized,
                vec![Outbound::reply(Reply::Unauthorized {
                    user_id: sender.to_string(),
                })],
            );
        }

        let group_mediated = ctx.origin.is_group_like() || command.target_group().is_some();
        if group_mediated
            && !command.is_public()
            && (matches!(command, Command::SubmitSequence(_)) || !self.is_admin(sender))
        {
            return Dispatch::ignored();
        }

        let target = state_actor(&ctx.origin, &command);
        if target.kind == ActorKind::User && session.is_idle_expired(now, self.policy.inactive_ms) {
            session.reset(now);
            return Dispatch::new(
                Disposition::Expired,
                vec![
                    Outbound::reply(Reply::SessionExpired),
                    Outbound::reply(Reply::Intro),
                ],
            );
        }

        let dispatch = self.transition(ctx, sender, command, session, ledger, now);
        if dispatch.disposition == Disposition::Accepted {
            session.touch(now);
        }
        dispatch
    }

    fn transition(
        &self,
        ctx: &DispatchContext,
        sender: &str,
        command: Command,
        session: &mut SessionState,
        ledger: &mut LedgerBook,
        now: DateTime<Utc>,
    ) -> Dispatch {
        match command {
            Command::Intro => Dispatch::accepted(Reply::Intro),
            Command::Contact => Dispatch::accepted(Reply::Contact),
            Command::ReportMenu => Dispatch::accepted(Reply::ReportMenu),
            Command::StartPrediction => Dispatch::accepted(Reply::GameMenu {
                games: self.catalog.games().iter().map(|g| g.name.clone()).collect(),
            }),
            Command::PickGame { game } => {
                let Some(entry) = self.catalog.game(&game) else {
                    return Dispatch::rejected(Reply::UnknownSelection);
                };
                let halls = entry.halls.iter().map(|h| h.name.clone()).collect();
                session.clear_pending();
                session.browsing_game = Some(game.clone());
                session.browsing_hall = None;
                Dispatch::accepted(Reply::HallMenu { game, halls })
            }
            Command::PickHall { game, hall } => {
                let Some(reply) = self.table_page(&game, &hall, 1) else {
                    return Dispatch::rejected(Reply::UnknownSelection);
                };
                session.clear_pending();
                session.browsing_game = Some(game);
                session.browsing_hall = Some(hall);
                Dispatch::accepted(reply)
            }
            Command::ListTables { game, hall, page } => match self.table_page(&game, &hall, page) {
                Some(reply) => Dispatch::accepted(reply),
                None => Dispatch::rejected(Reply::UnknownSelection),
            },
            Command::PickTable(table) => {
                if !self.catalog.contains(&table) {
                    return Dispatch::rejected(Reply::UnknownSelection);
                }
                session.clear_pending();
                session.browsing_game = Some(table.game.clone());
                session.browsing_hall = Some(table.hall.clone());
                session.current_table = Some(table.clone());
                let dragon_tiger = self.catalog.is_dragon_tiger(&table);
                if ctx.origin.is_group_like() {
                    Dispatch::accepted(Reply::AdminPanel {
                        table,
                        group: ctx.origin.clone(),
                        dragon_tiger,
                    })
                } else {
                    Dispatch::accepted(Reply::SequencePrompt {
                        table,
                        min_len: self.policy.sequence.min_len,
                        max_len: self.policy.sequence.max_len,
                    })
                }
            }
            Command::SubmitSequence(text) => {
                let invalid = matches!(
                    validate_sequence(&text, self.policy.sequence),
                    Err(SequenceError::InvalidSymbols)
                );
                if invalid && session.qa_open(now) {
                    Dispatch::accepted(Reply::Ask { question: text })
                } else {
                    self.submit_sequence(&text, session)
                }
            }
            Command::Analyze(table) => {
                let history = match &session.pending_sequence {
                    Some(pending) if pending.table == table => pending.symbols.clone(),
                    _ => return Dispatch::rejected(Reply::NoPendingSequence),
                };
                let rec = derive_recommendation(&table, &history, now);
                session.last_recommendation = Some(rec.clone());
                Dispatch::accepted(Reply::Recommendation {
                    dragon_tiger: self.catalog.is_dragon_tiger(&table),
                    rec,
                })
            }
            Command::ReportOutcome { actual, table } => {
                self.report_outcome(actual, table, None, session, ledger, now)
            }
            Command::ReportGroupOutcome {
                actual,
                table,
                group,
            } => self.report_outcome(actual, table, Some(group), session, ledger, now),
            Command::AdminSet { side, table, group } => {
                let rec = derive_admin_recommendation(&table, side, ledger.len(), now);
                let dragon_tiger = self.catalog.is_dragon_tiger(&table);
                session.current_table = Some(table.clone());
                session.last_recommendation = Some(rec.clone());
                Dispatch::new(
                    Disposition::Accepted,
                    vec![
                        Outbound::push(group.clone(), Reply::PublicResult { rec, dragon_tiger }),
                        Outbound::push(
                            Actor::user(sender),
                            Reply::AdminFollowUp {
                                table,
                                group,
                                dragon_tiger,
                            },
                        ),
                    ],
                )
            }
            Command::OpenQa { question } => {
                session.qa_mode_expires_at =
                    Some(now + Duration::milliseconds(self.policy.qa_window_ms as i64));
                match question {
                    Some(question) => Dispatch::accepted(Reply::Ask { question }),
                    None => Dispatch::accepted(Reply::QaPrompt),
                }
            }
            Command::RoundReport => match &session.current_table {
                Some(table) => Dispatch::accepted(Reply::RoundReport(
                    self.policy.reports.round_report(ledger.entries(), table),
                )),
                None => Dispatch::rejected(Reply::NoTableSelected),
            },
            Command::DailyReport => {
                let window = self.policy.reports.current_window(now);
                let report = self.policy.reports.daily_report(ledger.entries(), window);
                if report.is_empty() {
                    Dispatch::accepted(Reply::NoActivity { window })
                } else {
                    Dispatch::accepted(Reply::DailyReport(report))
                }
            }
            Command::Unrecognized(text) => {
                if session.qa_open(now) && !ctx.origin.is_group_like() {
                    Dispatch::accepted(Reply::Ask { question: text })
                } else {
                    Dispatch::ignored()
                }
            }
        }
    }

    fn table_page(&self, game: &str, hall: &str, page: usize) -> Option<Reply> {
        let entry = self.catalog.hall(game, hall)?;
        let start = page.checked_sub(1)?.checked_mul(TABLES_PER_PAGE)?;
        if start >= entry.tables.len() {
            return None;
        }
        let end = (start + TABLES_PER_PAGE).min(entry.tables.len());
        Some(Reply::TableList {
            game: game.to_string(),
            hall: hall.to_string(),
            tables: entry.tables[start..end].to_vec(),
            page,
            next_page: (end < entry.tables.len()).then_some(page + 1),
        })
    }

    fn submit_sequence(&self, text: &str, session: &mut SessionState) -> Dispatch {
        let symbols = match validate_sequence(text, self.policy.sequence) {
            Ok(symbols) => symbols,
            Err(SequenceError::InvalidSymbols) => return Dispatch::rejected(Reply::SequenceInvalid),
            Err(SequenceError::TooShort { len, min_len }) => {
                return Dispatch::rejected(Reply::SequenceTooShort { len, min_len })
            }
            Err(SequenceError::TooLong { len, max_len }) => {
                return Dispatch::rejected(Reply::SequenceTooLong { len, max_len })
            }
        };
        let Some(table) = session.current_table.clone() else {
            return Dispatch::rejected(Reply::NoTableSelected);
        };
        let len = symbols.len();
        session.pending_sequence = Some(PendingSequence {
            table: table.clone(),
            symbols,
        });
        Dispatch::accepted(Reply::SequenceAccepted { table, len })
    }

    fn report_outcome(
        &self,
        actual: Side,
        table: TableKey,
        group: Option<Actor>,
        session: &mut SessionState,
        ledger: &mut LedgerBook,
        now: DateTime<Utc>,
    ) -> Dispatch {
        let cooldown = Duration::milliseconds(self.policy.result_cooldown_ms as i64);
        if let Some(last) = session.last_result_press_at {
            if now.signed_duration_since(last) < cooldown {
                return Dispatch::rejected(Reply::CooldownActive);
            }
        }
        session.last_result_press_at = Some(now);

        let matches = session
            .last_recommendation
            .as_ref()
            .is_some_and(|rec| rec.table == table);
        let settled = match session.last_recommendation.take() {
            Some(rec) if matches => {
                let entry = settle(&rec, actual, self.policy.reports.unit_size, now);
                ledger.append(entry.clone());
                if let Some(pending) = session
                    .pending_sequence
                    .as_mut()
                    .filter(|p| p.table == table)
                {
                    pending.symbols.push(actual);
                    let overflow = pending
                        .symbols
                        .len()
                        .saturating_sub(self.policy.sequence.max_len);
                    pending.symbols.drain(..overflow);
                }
                Some(entry)
            }
            other => {
                session.last_recommendation = other;
                None
            }
        };

        let mut dispatch = Dispatch::accepted(Reply::OutcomeRecorded {
            dragon_tiger: self.catalog.is_dragon_tiger(&table),
            table,
            actual,
            settled: settled.clone(),
            group,
        });
        dispatch.settled = settled;
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogGame, CatalogHall};
    use crate::command::{encode_analyze, encode_outcome, encode_pick_table, parse_command};
    use crate::report::BusinessDayPolicy;
    use crate::session::Stage;

    const USER: &str = "Uallowed";
    const ADMIN: &str = "Uadmin";
    const GROUP: &str = "Cgroup";

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap()
    }

    fn catalog() -> TableCatalog {
        TableCatalog::new(vec![CatalogGame {
            name: "DG真人".to_string(),
            halls: vec![
                CatalogHall {
                    name: "旗艦廳".to_string(),
                    tables: (1..=12).map(|n| format!("百家樂D{n:02}")).collect(),
                    dragon_tiger: false,
                },
                CatalogHall {
                    name: "龍虎鬥".to_string(),
                    tables: vec!["D龍虎".to_string()],
                    dragon_tiger: true,
                },
            ],
        }])
    }

    fn engine() -> ConversationEngine {
        ConversationEngine::new(
            EnginePolicy {
                inactive_ms: 120_000,
                result_cooldown_ms: 10_000,
                qa_window_ms: 180_000,
                sequence: SequenceBounds {
                    min_len: 3,
                    max_len: 10,
                },
                reports: ReportAggregator {
                    unit_size: 100,
                    business_day: BusinessDayPolicy {
                        utc_offset_minutes: 480,
                        start_minutes: 720,
                        end_minutes: 1440,
                    },
                },
            },
            Arc::new(catalog()),
            vec![USER.to_string()],
            vec![ADMIN.to_string()],
        )
    }

    fn d01() -> TableKey {
        TableKey::new("DG真人", "旗艦廳", "百家樂D01")
    }

    fn d02() -> TableKey {
        TableKey::new("DG真人", "旗艦廳", "百家樂D02")
    }

    struct Harness {
        engine: ConversationEngine,
        ctx: DispatchContext,
        session: SessionState,
        ledger: LedgerBook,
    }

    impl Harness {
        fn private(user: &str) -> Self {
            Self {
                engine: engine(),
                ctx: DispatchContext {
                    origin: Actor::user(user),
                    sender_user_id: Some(user.to_string()),
                },
                session: SessionState::default(),
                ledger: LedgerBook::default(),
            }
        }

        fn in_group(user: &str) -> Self {
            Self {
                ctx: DispatchContext {
                    origin: Actor::group(GROUP),
                    sender_user_id: Some(user.to_string()),
                },
                ..Self::private(user)
            }
        }

        fn send(&mut self, text: &str, now: DateTime<Utc>) -> Dispatch {
            let command = parse_command(text, self.engine.catalog());
            self.engine.dispatch(
                &self.ctx,
                command,
                &mut self.session,
                &mut self.ledger,
                now,
            )
        }

        fn only_reply(&mut self, text: &str, now: DateTime<Utc>) -> Reply {
            let mut dispatch = self.send(text, now);
            assert_eq!(dispatch.outbound.len(), 1, "{dispatch:?}");
            let outbound = dispatch.outbound.remove(0);
            assert_eq!(outbound.route, Route::Reply);
            outbound.reply
        }
    }

    #[test]
    fn ppbbp_end_to_end() {
        let mut h = Harness::private(USER);
        let table = d01();

        h.send(&encode_pick_table(&table), at(0));
        assert_eq!(
            h.only_reply("PPBBP", at(1_000)),
            Reply::SequenceAccepted {
                table: table.clone(),
                len: 5
            }
        );

        let rec = match h.only_reply(&encode_analyze(&table), at(2_000)) {
            Reply::Recommendation { rec, .. } => rec,
            other => panic!("unexpected reply {other:?}"),
        };
        assert_eq!(h.session.stage(), Stage::AwaitingOutcome);

        let dispatch = h.send(&encode_outcome(rec.side, &table), at(3_000));
        let entry = dispatch.settled.expect("settled entry");
        assert_eq!(entry.units, crate::ledger::units_of(rec.amount, 100));
        assert_eq!(h.ledger.len(), 1);
        assert!(h.session.last_recommendation.is_none());
        let pending = h.session.pending_sequence.as_ref().unwrap();
        assert_eq!(pending.symbols.len(), 6);
        assert_eq!(pending.symbols.last(), Some(&rec.side));
    }

    #[test]
    fn unauthorized_sender_gets_disclosure_and_no_state() {
        let mut h = Harness::private("Ustranger");
        let reply = h.only_reply("開始預測", at(0));
        assert_eq!(
            reply,
            Reply::Unauthorized {
                user_id: "Ustranger".to_string()
            }
        );
        assert_eq!(h.session, SessionState::default());
    }

    #[test]
    fn group_admins_are_implicitly_allowed() {
        let mut h = Harness::private(ADMIN);
        assert!(matches!(h.only_reply("開始預測", at(0)), Reply::GameMenu { .. }));
    }

    #[test]
    fn sequence_validation_reports_specific_failure() {
        let mut h = Harness::private(USER);
        h.send(&encode_pick_table(&d01()), at(0));
        assert_eq!(
            h.only_reply("PB", at(10)),
            Reply::SequenceTooShort { len: 2, min_len: 3 }
        );
        assert_eq!(h.only_reply("PBX", at(20)), Reply::SequenceInvalid);
        assert_eq!(
            h.only_reply("PPPPPBBBBBT", at(30)),
            Reply::SequenceTooLong {
                len: 11,
                max_len: 10
            }
        );
        assert!(h.session.pending_sequence.is_none());
        assert_eq!(h.session.last_activity_at, Some(at(0)));
    }

    #[test]
    fn sequence_without_table_is_rejected() {
        let mut h = Harness::private(USER);
        assert_eq!(h.only_reply("閒莊閒", at(0)), Reply::NoTableSelected);
        assert!(h.session.pending_sequence.is_none());
    }

    #[test]
    fn switching_table_invalidates_pending_sequence() {
        let mut h = Harness::private(USER);
        h.send(&encode_pick_table(&d01()), at(0));
        h.send("PPBBP", at(10));
        h.send(&encode_pick_table(&d02()), at(20));
        assert!(h.session.pending_sequence.is_none());
        assert_eq!(
            h.only_reply(&encode_analyze(&d01()), at(30)),
            Reply::NoPendingSequence
        );
        assert_eq!(
            h.only_reply(&encode_analyze(&d02()), at(40)),
            Reply::NoPendingSequence
        );
    }

    #[test]
    fn idle_session_is_reset_whatever_the_command() {
        let mut h = Harness::private(USER);
        h.send(&encode_pick_table(&d01()), at(0));
        h.send("PPBBP", at(1_000));

        let dispatch = h.send(&encode_analyze(&d01()), at(1_000 + 120_001));
        assert_eq!(dispatch.disposition, Disposition::Expired);
        let replies: Vec<Reply> = dispatch.outbound.into_iter().map(|o| o.reply).collect();
        assert_eq!(replies, vec![Reply::SessionExpired, Reply::Intro]);
        assert_eq!(h.session.stage(), Stage::Idle);
        assert_eq!(h.session.last_activity_at, Some(at(121_001)));
    }

    #[test]
    fn idle_threshold_itself_does_not_reset() {
        let mut h = Harness::private(USER);
        h.send(&encode_pick_table(&d01()), at(0));
        let dispatch = h.send("PPB", at(120_000));
        assert_eq!(dispatch.disposition, Disposition::Accepted);
    }

    #[test]
    fn cooldown_blocks_second_report() {
        let mut h = Harness::private(USER);
        let table = d01();
        h.send(&encode_pick_table(&table), at(0));
        h.send("PPBBP", at(100));
        h.send(&encode_analyze(&table), at(200));
        let first = h.send(&encode_outcome(Side::Banker, &table), at(1_000));
        assert!(first.settled.is_some());

        h.send(&encode_analyze(&table), at(2_000));
        assert_eq!(
            h.only_reply(&encode_outcome(Side::Banker, &table), at(10_999)),
            Reply::CooldownActive
        );
        assert_eq!(h.ledger.len(), 1);
        assert!(h.session.last_recommendation.is_some());

        let later = h.send(&encode_outcome(Side::Banker, &table), at(11_000));
        assert!(later.settled.is_some());
        assert_eq!(h.ledger.len(), 2);
    }

    #[test]
    fn report_for_other_table_is_an_accepted_no_op() {
        let mut h = Harness::private(USER);
        h.send(&encode_pick_table(&d01()), at(0));
        h.send("PPBBP", at(100));
        h.send(&encode_analyze(&d01()), at(200));

        let dispatch = h.send(&encode_outcome(Side::Player, &d02()), at(300));
        assert_eq!(dispatch.disposition, Disposition::Accepted);
        assert!(dispatch.settled.is_none());
        assert!(h.ledger.is_empty());
        assert!(h.session.last_recommendation.is_some());
        assert_eq!(h.session.last_result_press_at, Some(at(300)));
    }

    #[test]
    fn table_pages_hold_ten_and_link_the_next() {
        let mut h = Harness::private(USER);
        match h.only_reply("DG真人|旗艦廳", at(0)) {
            Reply::TableList {
                tables, next_page, ..
            } => {
                assert_eq!(tables.len(), 10);
                assert_eq!(next_page, Some(2));
            }
            other => panic!("unexpected reply {other:?}"),
        }
        match h.only_reply("下一頁|2|DG真人|旗艦廳", at(10)) {
            Reply::TableList {
                tables, next_page, ..
            } => {
                assert_eq!(tables, vec!["百家樂D11".to_string(), "百家樂D12".to_string()]);
                assert_eq!(next_page, None);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(
            h.only_reply("下一頁|3|DG真人|旗艦廳", at(20)),
            Reply::UnknownSelection
        );
    }

    #[test]
    fn unknown_table_is_rejected_without_mutation() {
        let mut h = Harness::private(USER);
        let bogus = TableKey::new("DG真人", "旗艦廳", "百家樂Z99");
        assert_eq!(
            h.only_reply(&encode_pick_table(&bogus), at(0)),
            Reply::UnknownSelection
        );
        assert!(h.session.current_table.is_none());
    }

    #[test]
    fn qa_window_forwards_free_text() {
        let mut h = Harness::private(USER);
        assert!(h.send("隨便聊聊", at(0)).outbound.is_empty());
        assert_eq!(h.only_reply("AI問與答", at(10)), Reply::QaPrompt);
        assert_eq!(
            h.only_reply("隨便聊聊", at(20)),
            Reply::Ask {
                question: "隨便聊聊".to_string()
            }
        );
        assert!(matches!(h.only_reply("報表", at(150_000)), Reply::ReportMenu));
        assert!(h.send("隨便聊聊", at(10 + 180_000)).outbound.is_empty());
    }

    #[test]
    fn qa_window_takes_token_questions_but_not_valid_histories() {
        let mut h = Harness::private(USER);
        h.send(&encode_pick_table(&d01()), at(0));
        assert_eq!(h.only_reply("AI問與答", at(10)), Reply::QaPrompt);
        assert_eq!(
            h.only_reply("B2B?", at(20)),
            Reply::Ask {
                question: "B2B?".to_string()
            }
        );
        assert_eq!(
            h.only_reply("B2B", at(30)),
            Reply::Ask {
                question: "B2B".to_string()
            }
        );
        assert!(matches!(
            h.only_reply("PPB", at(40)),
            Reply::SequenceAccepted { len: 3, .. }
        ));
        assert!(matches!(h.only_reply("報表", at(150_000)), Reply::ReportMenu));
        assert_eq!(h.only_reply("B2B", at(10 + 180_000)), Reply::SequenceInvalid);
    }

    #[test]
    fn round_report_needs_a_table() {
        let mut h = Harness::private(USER);
        assert_eq!(h.only_reply("當局報表", at(0)), Reply::NoTableSelected);
    }

    #[test]
    fn daily_report_without_entries_is_no_activity() {
        let mut h = Harness::private(USER);
        assert!(matches!(
            h.only_reply("本日報表", at(0)),
            Reply::NoActivity { .. }
        ));
    }

    #[test]
    fn group_ignores_non_admin_except_public_keywords() {
        let mut h = Harness::in_group(USER);
        assert!(h.send("開始預測", at(0)).outbound.is_empty());
        assert_eq!(h.only_reply("聯絡客服", at(10)), Reply::Contact);
        assert_eq!(h.session.last_activity_at, Some(at(10)));
    }

    #[test]
    fn group_ignores_sequences_even_from_admin() {
        let mut h = Harness::in_group(ADMIN);
        h.send(&encode_pick_table(&d01()), at(0));
        let dispatch = h.send("PPBBP", at(10));
        assert_eq!(dispatch.disposition, Disposition::Ignored);
        assert!(h.session.pending_sequence.is_none());
    }

    #[test]
    fn group_table_pick_shows_admin_panel() {
        let mut h = Harness::in_group(ADMIN);
        assert_eq!(
            h.only_reply(&encode_pick_table(&d01()), at(0)),
            Reply::AdminPanel {
                table: d01(),
                group: Actor::group(GROUP),
                dragon_tiger: false
            }
        );
        assert_eq!(h.session.current_table, Some(d01()));
    }

    #[test]
    fn admin_set_pushes_public_result_and_follow_up() {
        let mut h = Harness::in_group(ADMIN);
        let data = crate::command::encode_admin_set(Side::Banker, &d01(), &Actor::group(GROUP));
        let dispatch = h.send(&data, at(0));
        assert_eq!(dispatch.outbound.len(), 2);
        assert_eq!(dispatch.outbound[0].route, Route::Push(Actor::group(GROUP)));
        assert!(matches!(
            dispatch.outbound[0].reply,
            Reply::PublicResult { ref rec, .. } if rec.side == Side::Banker
        ));
        assert_eq!(dispatch.outbound[1].route, Route::Push(Actor::user(ADMIN)));
        assert!(h.session.last_recommendation.is_some());
    }

    #[test]
    fn group_outcome_from_admin_private_chat_settles_group_ledger() {
        let engine = engine();
        let mut group_session = SessionState::default();
        let mut group_ledger = LedgerBook::default();
        let group = Actor::group(GROUP);
        let admin_dm = DispatchContext {
            origin: Actor::user(ADMIN),
            sender_user_id: Some(ADMIN.to_string()),
        };

        let set = parse_command(
            &crate::command::encode_admin_set(Side::Player, &d01(), &group),
            engine.catalog(),
        );
        assert_eq!(state_actor(&admin_dm.origin, &set), group);
        engine.dispatch(&admin_dm, set, &mut group_session, &mut group_ledger, at(0));

        let report = parse_command(
            &crate::command::encode_group_outcome(Side::Banker, &d01(), &group),
            engine.catalog(),
        );
        let dispatch = engine.dispatch(
            &admin_dm,
            report,
            &mut group_session,
            &mut group_ledger,
            at(5_000),
        );
        let entry = dispatch.settled.expect("group round settled");
        assert!(entry.units < 0);
        assert_eq!(group_ledger.len(), 1);
    }

    #[test]
    fn room_round_set_in_room_settles_from_admin_private_chat() {
        let engine = engine();
        let room = Actor::new(ActorKind::Room, "Rroom");
        let in_room = DispatchContext {
            origin: room.clone(),
            sender_user_id: Some(ADMIN.to_string()),
        };
        let admin_dm = DispatchContext {
            origin: Actor::user(ADMIN),
            sender_user_id: Some(ADMIN.to_string()),
        };
        let mut room_session = SessionState::default();
        let mut room_ledger = LedgerBook::default();

        let set = parse_command(
            &crate::command::encode_admin_set(Side::Banker, &d01(), &room),
            engine.catalog(),
        );
        assert_eq!(state_actor(&in_room.origin, &set), room);
        let dispatch = engine.dispatch(&in_room, set, &mut room_session, &mut room_ledger, at(0));
        assert_eq!(dispatch.outbound[0].route, Route::Push(room.clone()));
        let follow_up = match &dispatch.outbound[1].reply {
            Reply::AdminFollowUp { group, .. } => group.clone(),
            other => panic!("unexpected reply {other:?}"),
        };
        assert_eq!(follow_up, room);

        let report = parse_command(
            &crate::command::encode_group_outcome(Side::Banker, &d01(), &follow_up),
            engine.catalog(),
        );
        assert_eq!(state_actor(&admin_dm.origin, &report), room);
        let dispatch = engine.dispatch(
            &admin_dm,
            report,
            &mut room_session,
            &mut room_ledger,
            at(5_000),
        );
        let entry = dispatch.settled.expect("room round settled");
        assert!(entry.units > 0);
        assert_eq!(room_ledger.len(), 1);
        assert!(room_session.last_recommendation.is_none());
    }

    #[test]
    fn group_commands_from_non_admin_are_ignored() {
        let mut h = Harness::private(USER);
        let data = crate::command::encode_admin_set(Side::Banker, &d01(), &Actor::group(GROUP));
        let dispatch = h.send(&data, at(0));
        assert_eq!(dispatch.disposition, Disposition::Ignored);
        assert!(h.session.last_recommendation.is_none());
    }

    #[test]
    fn dragon_tiger_hall_is_flagged_on_recommendation() {
        let mut h = Harness::private(USER);
        let table = TableKey::new("DG真人", "龍虎鬥", "D龍虎");
        h.send(&encode_pick_table(&table), at(0));
        h.send("BBP", at(10));
        assert!(matches!(
            h.only_reply(&encode_analyze(&table), at(20)),
            Reply::Recommendation {
                dragon_tiger: true,
                ..
            }
        ));
    }
}
