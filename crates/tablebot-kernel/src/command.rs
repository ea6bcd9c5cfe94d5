//! Command grammar. Inbound text (typed messages and button postbacks) is
//! parsed once into [`Command`]; anything that does not fit a known shape
//! becomes [`Command::Unrecognized`].

use tablebot_contracts::{Actor, ActorKind};

use crate::catalog::{TableCatalog, TableKey};
use crate::sequence::{is_sequence_candidate, Side};

pub const KW_START: &str = "開始預測";
pub const KW_MEMBERSHIP: &str = "會員開通";
pub const KW_GUIDE: &str = "AI算牌說明";
pub const KW_CONTACT: &str = "聯絡客服";
pub const KW_REPORT_MENU: &str = "報表";
pub const KW_ROUND_REPORT: &str = "當局報表";
pub const KW_DAILY_REPORT: &str = "本日報表";
pub const KW_QA: &str = "AI問與答";

pub const TAG_PICK_TABLE: &str = "選擇桌號";
pub const TAG_NEXT_PAGE: &str = "下一頁";
pub const TAG_ANALYZE: &str = "開始分析";
pub const TAG_OUTCOME: &str = "當局結果為";
pub const TAG_ADMIN_SET: &str = "管理員設定";

const DELIM: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartPrediction,
    Intro,
    Contact,
    ReportMenu,
    RoundReport,
    DailyReport,
    PickGame {
        game: String,
    },
    PickHall {
        game: String,
        hall: String,
    },
    ListTables {
        game: String,
        hall: String,
        page: usize,
    },
    PickTable(TableKey),
    SubmitSequence(String),
    Analyze(TableKey),
    ReportOutcome {
        actual: Side,
        table: TableKey,
    },
    ReportGroupOutcome {
        actual: Side,
        table: TableKey,
        group: Actor,
    },
    AdminSet {
        side: Side,
        table: TableKey,
        group: Actor,
    },
    OpenQa {
        question: Option<String>,
    },
    Unrecognized(String),
}

impl Command {
    /// Group or room whose session this command acts on, for the
    /// group-mediated shapes that name one explicitly.
    pub fn target_group(&self) -> Option<&Actor> {
        match self {
            Command::ReportGroupOutcome { group, .. } | Command::AdminSet { group, .. } => {
                Some(group)
            }
            _ => None,
        }
    }

    /// Public keywords anyone authorized may use, also inside groups.
    pub fn is_public(&self) -> bool {
        matches!(self, Command::Contact | Command::ReportMenu)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::StartPrediction => "start_prediction",
            Command::Intro => "intro",
            Command::Contact => "contact",
            Command::ReportMenu => "report_menu",
            Command::RoundReport => "round_report",
            Command::DailyReport => "daily_report",
            Command::PickGame { .. } => "pick_game",
            Command::PickHall { .. } => "pick_hall",
            Command::ListTables { .. } => "list_tables",
            Command::PickTable(_) => "pick_table",
            Command::SubmitSequence(_) => "submit_sequence",
            Command::Analyze(_) => "analyze",
            Command::ReportOutcome { .. } => "report_outcome",
            Command::ReportGroupOutcome { .. } => "report_group_outcome",
            Command::AdminSet { .. } => "admin_set",
            Command::OpenQa { .. } => "open_qa",
            Command::Unrecognized(_) => "unrecognized",
        }
    }
}

pub fn parse_command(text: &str, catalog: &TableCatalog) -> Command {
    let text = text.trim();
    match text {
        KW_START => return Command::StartPrediction,
        KW_MEMBERSHIP | KW_GUIDE => return Command::Intro,
        KW_CONTACT => return Command::Contact,
        KW_REPORT_MENU => return Command::ReportMenu,
        KW_ROUND_REPORT => return Command::RoundReport,
        KW_DAILY_REPORT => return Command::DailyReport,
        _ => {}
    }

    if let Some(rest) = text.strip_prefix(KW_QA) {
        let question = rest.trim();
        return Command::OpenQa {
            question: (!question.is_empty()).then(|| question.to_string()),
        };
    }

    let parts: Vec<&str> = text.split(DELIM).map(str::trim).collect();
    let parsed = match parts.as_slice() {
        [game] if catalog.game(game).is_some() => Some(Command::PickGame {
            game: game.to_string(),
        }),
        [game, hall] if catalog.game(game).is_some() => Some(Command::PickHall {
            game: game.to_string(),
            hall: hall.to_string(),
        }),
        [TAG_NEXT_PAGE, page, game, hall] => {
            page.parse::<usize>()
                .ok()
                .filter(|p| *p >= 1)
                .map(|page| Command::ListTables {
                    game: game.to_string(),
                    hall: hall.to_string(),
                    page,
                })
        }
        [TAG_PICK_TABLE, game, hall, table] => non_empty(&[game, hall, table])
            .then(|| Command::PickTable(TableKey::new(*game, *hall, *table))),
        [TAG_ANALYZE, table] => TableKey::parse(table).map(Command::Analyze),
        [TAG_OUTCOME, side, table] => {
            let actual = Side::from_label(side);
            let table = TableKey::parse(table);
            actual
                .zip(table)
                .map(|(actual, table)| Command::ReportOutcome { actual, table })
        }
        [TAG_OUTCOME, side, table, group] => match (
            Side::from_label(side),
            TableKey::parse(table),
            parse_conversation(group),
        ) {
            (Some(actual), Some(table), Some(group)) => Some(Command::ReportGroupOutcome {
                actual,
                table,
                group,
            }),
            _ => None,
        },
        [TAG_ADMIN_SET, side, table, group] => match (
            Side::from_label(side),
            TableKey::parse(table),
            parse_conversation(group),
        ) {
            (Some(side), Some(table), Some(group)) => {
                Some(Command::AdminSet { side, table, group })
            }
            _ => None,
        },
        _ => None,
    };
    if let Some(command) = parsed {
        return command;
    }

    if parts.len() == 1 && is_sequence_candidate(text) {
        return Command::SubmitSequence(text.to_string());
    }
    Command::Unrecognized(text.to_string())
}

fn non_empty(parts: &[&&str]) -> bool {
    parts.iter().all(|p| !p.is_empty())
}

/// Trailing segment of the group-mediated shapes: `group:<id>` or
/// `room:<id>`. A bare id names a group.
fn parse_conversation(segment: &str) -> Option<Actor> {
    let (kind, id) = match segment.split_once(':') {
        Some(("group", id)) => (ActorKind::Group, id),
        Some(("room", id)) => (ActorKind::Room, id),
        Some(_) => return None,
        None => (ActorKind::Group, segment),
    };
    (!id.is_empty()).then(|| Actor::new(kind, id))
}

pub fn encode_pick_game(game: &str) -> String {
    game.to_string()
}

pub fn encode_pick_hall(game: &str, hall: &str) -> String {
    format!("{game}{DELIM}{hall}")
}

pub fn encode_list_tables(game: &str, hall: &str, page: usize) -> String {
    format!("{TAG_NEXT_PAGE}{DELIM}{page}{DELIM}{game}{DELIM}{hall}")
}

pub fn encode_pick_table(key: &TableKey) -> String {
    format!(
        "{TAG_PICK_TABLE}{DELIM}{}{DELIM}{}{DELIM}{}",
        key.game, key.hall, key.table
    )
}

pub fn encode_analyze(key: &TableKey) -> String {
    format!("{TAG_ANALYZE}{DELIM}{key}")
}

pub fn encode_outcome(actual: Side, key: &TableKey) -> String {
    format!("{TAG_OUTCOME}{DELIM}{}{DELIM}{key}", actual.symbol())
}

pub fn encode_group_outcome(actual: Side, key: &TableKey, group: &Actor) -> String {
    format!(
        "{TAG_OUTCOME}{DELIM}{}{DELIM}{key}{DELIM}{group}",
        actual.symbol()
    )
}

pub fn encode_admin_set(side: Side, key: &TableKey, group: &Actor) -> String {
    format!(
        "{TAG_ADMIN_SET}{DELIM}{}{DELIM}{key}{DELIM}{group}",
        side.symbol()
    )
}
