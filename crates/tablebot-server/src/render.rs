//! Turns engine replies into platform messages. Menus are flex cards whose
//! postback buttons carry the same command strings users could type.

use serde_json::{json, Value};
use tablebot_contracts::OutboundMessage;
use tablebot_kernel::command::{
    encode_admin_set, encode_analyze, encode_group_outcome, encode_list_tables, encode_outcome,
    encode_pick_game, encode_pick_hall, encode_pick_table, KW_START,
};
use tablebot_kernel::report::{DailyReport, RoundReport};
use tablebot_kernel::session::Recommendation;
use tablebot_kernel::{Reply, Side, TableKey};

const BRAND: &str = "SKwin AI算牌系統";
const GREEN: &str = "#00B900";
const RED: &str = "#DB2828";
const TIE_GREEN: &str = "#21BA45";
const BLUE: &str = "#2185D0";

/// Platform messages for `reply`. [`Reply::Ask`] renders to nothing; the
/// caller answers it through the chat service.
pub fn render(reply: &Reply) -> Vec<OutboundMessage> {
    match reply {
        Reply::Unauthorized { user_id } => vec![OutboundMessage::text(format!(
            "您沒有使用權限，請先開通會員。\n\n您的uid為：{user_id}\n\n將此id回傳至客服\n完成註冊步驟即可獲得權限，謝謝。"
        ))],
        Reply::SessionExpired => vec![OutboundMessage::text("當次預測已中斷 請重新點選開始預測")],
        Reply::Intro => vec![OutboundMessage::flex(
            format!("{BRAND} 注意事項"),
            intro_card(),
        )],
        Reply::Contact => vec![OutboundMessage::text(
            "💥加入會員立刻領取5000折抵金💥\n有任何疑問，客服隨時為您服務。",
        )],
        Reply::ReportMenu => vec![OutboundMessage::text("請輸入：當局報表 / 本日報表")],
        Reply::GameMenu { games } => vec![OutboundMessage::flex(
            "請選擇遊戲",
            menu_card(
                BRAND,
                "請選擇遊戲",
                games
                    .iter()
                    .map(|g| button(g, &encode_pick_game(g), GREEN))
                    .collect(),
            ),
        )],
        Reply::HallMenu { game, halls } => vec![OutboundMessage::flex(
            format!("{game} 遊戲廳選擇"),
            menu_card(
                &format!("遊戲：{game}"),
                "請選擇遊戲廳",
                halls
                    .iter()
                    .map(|h| button(h, &encode_pick_hall(game, h), GREEN))
                    .collect(),
            ),
        )],
        Reply::TableList {
            game,
            hall,
            tables,
            page,
            next_page,
        } => vec![OutboundMessage::flex(
            format!("{game} {hall} 牌桌列表 頁{page}"),
            table_carousel(game, hall, tables, *next_page),
        )],
        Reply::UnknownSelection => vec![OutboundMessage::text("查無此選項，請重新選擇。")],
        Reply::SequencePrompt {
            table,
            min_len,
            max_len,
        } => vec![OutboundMessage::flex(
            format!("請輸入 {table} 前{max_len}局結果"),
            bubble(vec![
                title("分析中", GREEN),
                line(&format!("桌號：{table}")),
                line(&format!(
                    "請輸入前{max_len}局閒莊和的結果，最少需要輸入前{min_len}局，例:閒莊閒莊閒莊閒莊和閒"
                )),
                button("開始分析", &encode_analyze(table), GREEN),
            ]),
        )],
        Reply::SequenceAccepted { len, .. } => vec![OutboundMessage::text(format!(
            "已接收前{len}局結果，請點擊「開始分析」按鈕開始計算。"
        ))],
        Reply::SequenceInvalid => vec![OutboundMessage::text(
            "只能輸入閒、莊、和（或 P、B、T），例：閒莊閒閒和莊。",
        )],
        Reply::SequenceTooShort { len, min_len } => vec![OutboundMessage::text(format!(
            "目前只輸入{len}局，最少需要輸入前{min_len}局，例：閒莊閒閒和莊。"
        ))],
        Reply::SequenceTooLong { len, max_len } => vec![OutboundMessage::text(format!(
            "輸入了{len}局，最多只能輸入前{max_len}局結果，請重新輸入。"
        ))],
        Reply::NoTableSelected => vec![OutboundMessage::text(
            "尚未選擇牌桌，請先點選開始預測並選擇桌號。",
        )],
        Reply::NoPendingSequence => vec![OutboundMessage::text(
            "目前尚未輸入此桌的前幾局資訊，請先輸入（至少三局）。",
        )],
        Reply::Recommendation { rec, dragon_tiger } => vec![OutboundMessage::flex(
            format!("分析結果 - {}", rec.table),
            recommendation_card(rec, *dragon_tiger),
        )],
        Reply::CooldownActive => vec![OutboundMessage::text(
            "當局牌局尚未結束，請當局結束再操作。",
        )],
        Reply::OutcomeRecorded {
            table,
            actual,
            settled,
            group,
            dragon_tiger,
        } => {
            if group.is_some() {
                return vec![OutboundMessage::text("已回報群組當局結果 ✅")];
            }
            let mut contents = vec![
                title("已記錄當局結果", GREEN),
                line(&format!("桌號：{table}")),
                line(&format!("開獎結果：{}", actual.label(*dragon_tiger))),
            ];
            if let Some(entry) = settled {
                contents.push(line(&format!("本局柱碼：{}柱", signed(entry.units))));
            }
            contents.push(button("分析下一局", &encode_analyze(table), GREEN));
            vec![OutboundMessage::flex("當局結果", bubble(contents))]
        }
        Reply::RoundReport(report) => {
            vec![OutboundMessage::flex("當局報表", round_report_card(report))]
        }
        Reply::DailyReport(report) => {
            vec![OutboundMessage::flex("本日報表", daily_report_card(report))]
        }
        Reply::NoActivity { .. } => vec![OutboundMessage::text("今日尚無可統計的投注紀錄。")],
        Reply::AdminPanel {
            table,
            group,
            dragon_tiger,
        } => vec![OutboundMessage::flex(
            "管理員面板",
            bubble(vec![
                title("管理員面板", RED),
                line(&format!("桌號：{table}")),
                line("請選擇本局預測："),
                side_buttons(*dragon_tiger, |side| {
                    encode_admin_set(side, table, group)
                }),
                note("（僅供管理員使用）"),
            ]),
        )],
        Reply::PublicResult { rec, dragon_tiger } => vec![OutboundMessage::flex(
            "Ai分析結果",
            bubble(vec![
                title("SKwin百家分析系統", GREEN),
                line("Ai分析結果"),
                line(&format!(
                    "本局預測：{}（{}）",
                    rec.side.label(*dragon_tiger),
                    rec.tier.label()
                )),
                line(&format!("牌桌：{}/{}", rec.table.game, rec.table.short_name())),
                line(&format!("勝率：{}%", rec.confidence)),
                line(&format!("建議下注：{}元", rec.amount)),
            ]),
        )],
        Reply::AdminFollowUp {
            table,
            group,
            dragon_tiger,
        } => vec![OutboundMessage::flex(
            "回報當局結果",
            bubble(vec![
                title("已發佈到群組 ✅", GREEN),
                line(&format!("桌號：{table}")),
                line("請於開獎後回報當局結果："),
                side_buttons(*dragon_tiger, |side| {
                    encode_group_outcome(side, table, group)
                }),
            ]),
        )],
        Reply::QaPrompt => vec![OutboundMessage::text("請問您想詢問甚麼主題或是具體問題呢?")],
        Reply::Ask { .. } => Vec::new(),
    }
}

fn recommendation_card(rec: &Recommendation, dragon_tiger: bool) -> Value {
    bubble(vec![
        title("分析結果", GREEN),
        line(&format!("牌桌：{}", rec.table)),
        line(&format!(
            "預測結果為：{}（{}）",
            rec.side.label(dragon_tiger),
            rec.tier.label()
        )),
        line(&format!("推薦下注金額：{} 元", rec.amount)),
        line(&format!("過關機率：約 {}%", rec.confidence)),
        line("開獎後請回報當局結果："),
        side_buttons(dragon_tiger, |side| encode_outcome(side, &rec.table)),
    ])
}

fn round_report_card(report: &RoundReport) -> Value {
    bubble(vec![
        title("(當局報表)", GREEN),
        line(&format!("廳別：{}", report.table.hall)),
        line(&format!("桌別：{}", report.table.short_name())),
        line(&format!("局數：{}", report.rounds)),
        line(&format!("總下注金額：{}", report.total_amount)),
        line(&format!("輸贏金額：{}", signed(report.money))),
        line(&format!("柱碼：{}柱", signed(report.total_units))),
    ])
}

fn daily_report_card(report: &DailyReport) -> Value {
    bubble(vec![
        title("(本日報表)", GREEN),
        line(&format!("系統：{}", report.games.join("/"))),
        line(&format!("桌別：{}", report.tables.join("/"))),
        line(&format!("局數：{}", report.rounds)),
        line(&format!("總下注金額：{}", report.total_amount)),
        line(&format!("輸贏金額：{}", signed(report.money))),
        line(&format!("柱碼：{}柱", signed(report.total_units))),
    ])
}

fn intro_card() -> Value {
    let rules = [
        "1. 每次啟動請先觀察3~5局預測再下注。",
        "2. 同桌連輸3局請換桌。",
        "3. 請正確回報當局結果，以免影響分析。",
        "4. 兩分鐘未操作自動中斷（僅私聊）。",
        "5. 本系統為輔助工具，請理性投注。",
    ];
    let mut contents = vec![title(BRAND, GREEN), line("注意事項及使用說明")];
    contents.extend(rules.iter().map(|r| line(r)));
    contents.push(button("開始預測", KW_START, GREEN));
    bubble(contents)
}

fn table_carousel(game: &str, hall: &str, tables: &[String], next_page: Option<usize>) -> Value {
    let mut bubbles: Vec<Value> = tables
        .iter()
        .map(|table| {
            let key = TableKey::new(game, hall, table.as_str());
            bubble(vec![
                title(table, GREEN),
                note("進行中"),
                note("最低下注：100元"),
                note("最高限額：10000元"),
                button("選擇", &encode_pick_table(&key), GREEN),
            ])
        })
        .collect();
    if let Some(page) = next_page {
        bubbles.push(bubble(vec![
            line("還有更多牌桌，點擊下一頁"),
            button("下一頁", &encode_list_tables(game, hall, page), GREEN),
        ]));
    }
    json!({"type": "carousel", "contents": bubbles})
}

fn menu_card(heading: &str, prompt: &str, buttons: Vec<Value>) -> Value {
    let mut contents = vec![title(heading, GREEN), line(prompt)];
    contents.extend(buttons);
    bubble(contents)
}

fn side_buttons(dragon_tiger: bool, data: impl Fn(Side) -> String) -> Value {
    let buttons: Vec<Value> = [
        (Side::Player, BLUE),
        (Side::Tie, TIE_GREEN),
        (Side::Banker, RED),
    ]
    .into_iter()
    .map(|(side, color)| {
        let mut b = button(side.label(dragon_tiger), &data(side), color);
        b["flex"] = json!(1);
        b
    })
    .collect();
    json!({"type": "box", "layout": "horizontal", "spacing": "sm", "margin": "md", "contents": buttons})
}

fn bubble(contents: Vec<Value>) -> Value {
    json!({
        "type": "bubble",
        "body": {"type": "box", "layout": "vertical", "contents": contents}
    })
}

fn title(text: &str, color: &str) -> Value {
    json!({"type": "text", "text": text, "weight": "bold", "size": "lg", "color": color, "align": "center", "wrap": true})
}

fn line(text: &str) -> Value {
    json!({"type": "text", "text": text, "margin": "md", "wrap": true})
}

fn note(text: &str) -> Value {
    json!({"type": "text", "text": text, "size": "sm", "color": "#555555", "margin": "sm"})
}

fn button(label: &str, data: &str, color: &str) -> Value {
    json!({
        "type": "button",
        "style": "primary",
        "color": color,
        "margin": "md",
        "action": {"type": "postback", "label": label, "data": data, "displayText": label}
    })
}

fn signed(value: i64) -> String {
    if value >= 0 {
        format!("+{value}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tablebot_kernel::parse_command;
    use tablebot_kernel::session::StakeTier;
    use tablebot_contracts::{Actor, ActorKind};
    use tablebot_kernel::{CatalogGame, CatalogHall, Command, TableCatalog};

    fn buttons(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                if map.get("type").and_then(Value::as_str) == Some("postback") {
                    if let Some(data) = map.get("data").and_then(Value::as_str) {
                        out.push(data.to_string());
                    }
                }
                map.values().for_each(|v| buttons(v, out));
            }
            Value::Array(items) => items.iter().for_each(|v| buttons(v, out)),
            _ => {}
        }
    }

    fn postback_data(messages: &[OutboundMessage]) -> Vec<String> {
        let mut out = Vec::new();
        for message in messages {
            if let OutboundMessage::Flex { contents, .. } = message {
                buttons(contents, &mut out);
            }
        }
        out
    }

    #[test]
    fn recommendation_buttons_parse_as_outcome_reports() {
        let table = TableKey::new("DG真人", "旗艦廳", "百家樂D01");
        let catalog = TableCatalog::new(vec![CatalogGame {
            name: "DG真人".to_string(),
            halls: vec![CatalogHall {
                name: "旗艦廳".to_string(),
                tables: vec!["百家樂D01".to_string()],
                dragon_tiger: false,
            }],
        }]);
        let reply = Reply::Recommendation {
            rec: Recommendation {
                table: table.clone(),
                side: Side::Banker,
                amount: 1200,
                confidence: 70,
                tier: StakeTier::Medium,
                issued_at: Utc::now(),
            },
            dragon_tiger: false,
        };
        let data = postback_data(&render(&reply));
        assert_eq!(data.len(), 3);
        for d in data {
            assert!(
                matches!(parse_command(&d, &catalog), Command::ReportOutcome { table: ref t, .. } if *t == table),
                "{d}"
            );
        }
    }

    #[test]
    fn table_list_links_next_page() {
        let reply = Reply::TableList {
            game: "DG真人".to_string(),
            hall: "旗艦廳".to_string(),
            tables: vec!["百家樂D01".to_string()],
            page: 1,
            next_page: Some(2),
        };
        let data = postback_data(&render(&reply));
        assert_eq!(
            data,
            vec![
                "選擇桌號|DG真人|旗艦廳|百家樂D01".to_string(),
                "下一頁|2|DG真人|旗艦廳".to_string()
            ]
        );
    }

    #[test]
    fn room_follow_up_buttons_report_to_the_room() {
        let table = TableKey::new("DG真人", "旗艦廳", "百家樂D01");
        let room = Actor::new(ActorKind::Room, "R1");
        let catalog = TableCatalog::new(vec![CatalogGame {
            name: "DG真人".to_string(),
            halls: vec![CatalogHall {
                name: "旗艦廳".to_string(),
                tables: vec!["百家樂D01".to_string()],
                dragon_tiger: false,
            }],
        }]);
        let reply = Reply::AdminFollowUp {
            table: table.clone(),
            group: room.clone(),
            dragon_tiger: false,
        };
        let data = postback_data(&render(&reply));
        assert_eq!(data.len(), 3);
        for wire in data {
            assert!(matches!(
                parse_command(&wire, &catalog),
                Command::ReportGroupOutcome { ref group, .. } if *group == room
            ));
        }
    }

    #[test]
    fn dragon_tiger_panels_use_dragon_tiger_labels() {
        let reply = Reply::AdminPanel {
            table: TableKey::new("WM真人", "龍虎鬥", "D龍虎"),
            group: Actor::group("C1"),
            dragon_tiger: true,
        };
        let text = serde_json::to_string(&render(&reply)).unwrap();
        assert!(text.contains("\"label\":\"龍\""));
        assert!(text.contains("\"label\":\"虎\""));
    }

    #[test]
    fn unauthorized_reply_discloses_uid() {
        let messages = render(&Reply::Unauthorized {
            user_id: "U123".to_string(),
        });
        assert!(matches!(&messages[0], OutboundMessage::Text { text } if text.contains("U123")));
    }

    #[test]
    fn report_money_is_signed() {
        assert_eq!(signed(300), "+300");
        assert_eq!(signed(0), "+0");
        assert_eq!(signed(-200), "-200");
    }
}
