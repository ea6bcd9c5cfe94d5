use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Messaging platform cap on messages per reply or push call.
pub const MAX_MESSAGES_PER_CALL: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookBody {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub postback: Option<Postback>,
    #[serde(default)]
    pub delivery_context: Option<DeliveryContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Postback {
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    #[serde(default)]
    pub is_redelivery: bool,
}

impl WebhookEvent {
    pub fn is_redelivery(&self) -> bool {
        self.delivery_context
            .as_ref()
            .map(|ctx| ctx.is_redelivery)
            .unwrap_or(false)
    }

    pub fn sender_user_id(&self) -> Option<&str> {
        self.source
            .as_ref()
            .and_then(|s| s.user_id.as_deref())
            .filter(|v| !v.is_empty())
    }

    /// The conversation the event belongs to: the group or room when there
    /// is one, otherwise the sending user.
    pub fn actor(&self) -> Option<Actor> {
        let source = self.source.as_ref()?;
        let (kind, id) = match source.kind.as_str() {
            "group" => (ActorKind::Group, source.group_id.as_deref()),
            "room" => (ActorKind::Room, source.room_id.as_deref()),
            _ => (ActorKind::User, source.user_id.as_deref()),
        };
        id.filter(|v| !v.is_empty()).map(|id| Actor::new(kind, id))
    }

    /// Trimmed text payload for text messages and postbacks; `None` for
    /// every other event kind.
    pub fn command_text(&self) -> Option<String> {
        let raw = match self.kind.as_str() {
            "message" => self
                .message
                .as_ref()
                .filter(|m| m.kind == "text")
                .and_then(|m| m.text.as_deref()),
            "postback" => self.postback.as_ref().map(|p| p.data.as_str()),
            _ => None,
        }?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    Group,
    Room,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(ActorKind::User, id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new(ActorKind::Group, id)
    }

    pub fn is_group_like(&self) -> bool {
        matches!(self.kind, ActorKind::Group | ActorKind::Room)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ActorKind::User => "user",
            ActorKind::Group => "group",
            ActorKind::Room => "room",
        };
        write!(f, "{kind}:{}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Flex {
        #[serde(rename = "altText")]
        alt_text: String,
        contents: Value,
    },
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn flex(alt_text: impl Into<String>, contents: Value) -> Self {
        Self::Flex {
            alt_text: alt_text.into(),
            contents,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub reply_token: String,
    pub messages: Vec<OutboundMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub to: String,
    pub messages: Vec<OutboundMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_event_maps_to_group_actor() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "type": "message",
            "timestamp": 1,
            "source": {"type": "group", "groupId": "C1", "userId": "U1"},
            "replyToken": "r",
            "message": {"id": "m1", "type": "text", "text": "  開始預測 "}
        }))
        .unwrap();
        assert_eq!(event.actor(), Some(Actor::group("C1")));
        assert_eq!(event.sender_user_id(), Some("U1"));
        assert_eq!(event.command_text().as_deref(), Some("開始預測"));
        assert!(!event.is_redelivery());
    }

    #[test]
    fn non_text_message_has_no_command() {
        let event: WebhookEvent = serde_json::from_value(json!({
            "type": "message",
            "source": {"type": "user", "userId": "U1"},
            "message": {"id": "m1", "type": "sticker"},
            "deliveryContext": {"isRedelivery": true}
        }))
        .unwrap();
        assert!(event.command_text().is_none());
        assert!(event.is_redelivery());
    }

    #[test]
    fn flex_message_uses_platform_field_names() {
        let msg = OutboundMessage::flex("menu", json!({"type": "bubble"}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "flex");
        assert_eq!(value["altText"], "menu");
    }
}
