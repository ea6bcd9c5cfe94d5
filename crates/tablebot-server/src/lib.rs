pub mod chat;
pub mod delivery;
pub mod ingress;
pub mod journal;
pub mod mailbox;
pub mod render;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tablebot_config::Config;
use tablebot_contracts::{Actor, OutboundMessage, WebhookBody, WebhookEvent};
use tablebot_kernel::{
    parse_command, state_actor, throttle_key, BusinessDayPolicy, CatalogGame, CatalogHall,
    Command, ConversationEngine, DedupeCache, DispatchContext, EnginePolicy, GateDecision,
    RateGate, ReportAggregator, Reply, Route, SequenceBounds, TableCatalog,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use chat::{ChatCompleter, ChatError, ChatService, OpenAiChat};
pub use delivery::{
    DeliveryOutcome, DeliveryService, LineTransport, MessagingTransport, RetryPolicy,
    TransportError,
};
pub use journal::{verify_journal_chain, Journal, JournalError, JournalRecord};

use crate::ingress::{event_key, verify_signature, SIGNATURE_HEADER};
use crate::mailbox::Mailboxes;
use crate::store::{LedgerStore, SessionStore};

const MAILBOX_IDLE: Duration = Duration::from_secs(300);

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "tablebot listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

/// App wired to the messaging platform and, when enabled, the chat endpoint.
pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let transport = Arc::new(LineTransport::new(
        &cfg.channel.api_base,
        &cfg.channel.access_token,
        cfg.channel.request_timeout_ms,
    )?);
    let chat: Option<Arc<dyn ChatCompleter>> = match cfg.chat.endpoint.as_deref() {
        Some(endpoint) if cfg.chat.enabled => Some(Arc::new(OpenAiChat::new(
            endpoint,
            cfg.chat.api_key.as_deref(),
            &cfg.chat.model,
        )?)),
        _ => None,
    };
    build_app_with(cfg, transport, chat).await
}

/// Same as [`build_app`] with the outbound collaborators supplied.
pub async fn build_app_with(
    cfg: Config,
    transport: Arc<dyn MessagingTransport>,
    chat: Option<Arc<dyn ChatCompleter>>,
) -> Result<Router, String> {
    let state = AppState::new(cfg, transport, chat).await?;
    Ok(Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/webhook", post(webhook))
        .with_state(state))
}

#[derive(Clone)]
struct AppState {
    channel_secret: Option<String>,
    gates: Arc<Mutex<Gates>>,
    catalog: Arc<TableCatalog>,
    mailboxes: Arc<Mailboxes<Job>>,
}

struct Gates {
    dedupe: DedupeCache,
    rate: RateGate,
}

/// One admitted event, queued on the mailbox of the actor it acts on.
struct Job {
    event_key: String,
    origin: Actor,
    target: Actor,
    sender_user_id: Option<String>,
    reply_token: Option<String>,
    command: Command,
    received_at: DateTime<Utc>,
}

struct Processor {
    engine: ConversationEngine,
    sessions: SessionStore,
    ledgers: LedgerStore,
    delivery: DeliveryService,
    chat: ChatService,
    journal: Option<Arc<Journal>>,
}

impl AppState {
    async fn new(
        cfg: Config,
        transport: Arc<dyn MessagingTransport>,
        chat: Option<Arc<dyn ChatCompleter>>,
    ) -> Result<Self, String> {
        let catalog = Arc::new(catalog_from(&cfg));
        let journal = match cfg.journal.jsonl_path.as_deref() {
            Some(path) if !path.is_empty() => Some(Journal::open(path).await?),
            _ => None,
        };

        let processor = Arc::new(Processor {
            engine: ConversationEngine::new(
                engine_policy(&cfg),
                catalog.clone(),
                cfg.access.allowed_users.clone(),
                cfg.access.group_admins.clone(),
            ),
            sessions: SessionStore::new(),
            ledgers: LedgerStore::new(),
            delivery: DeliveryService::new(
                transport,
                RetryPolicy {
                    max_attempts: cfg.delivery.retry_max_attempts,
                    base_delay_ms: cfg.delivery.retry_base_delay_ms,
                    jitter_ms: cfg.delivery.retry_jitter_ms,
                },
            ),
            chat: ChatService::new(chat, cfg.chat.timeout_ms),
            journal,
        });
        let mailboxes = Mailboxes::new(MAILBOX_IDLE, move |job: Job| {
            let processor = processor.clone();
            async move { processor.handle(job).await }
        });

        Ok(Self {
            channel_secret: cfg
                .channel
                .channel_secret
                .clone()
                .filter(|s| !s.trim().is_empty()),
            gates: Arc::new(Mutex::new(Gates {
                dedupe: DedupeCache::new(cfg.ingress.dedupe_ttl_ms),
                rate: RateGate::new(cfg.ingress.min_interval_ms),
            })),
            catalog,
            mailboxes: Arc::new(mailboxes),
        })
    }

    /// Gates an event and queues it. Everything after this point runs on
    /// the actor's mailbox.
    async fn admit(&self, event: WebhookEvent) {
        let now = Utc::now();
        let key = event_key(&event);
        let Some(origin) = event.actor() else {
            debug!(event_key = %key, "event without source dropped");
            return;
        };
        let sender = event.sender_user_id().map(str::to_string);

        {
            let mut gates = self.gates.lock().await;
            if gates.dedupe.seen(&key, now) {
                debug!(event_key = %key, "duplicate event dropped");
                return;
            }
            let throttle = throttle_key(&origin.id, sender.as_deref());
            if let GateDecision::Deny { reason_code } = gates.rate.evaluate(&throttle, now) {
                debug!(event_key = %key, reason_code, "event throttled");
                return;
            }
        }

        let Some(text) = event.command_text() else {
            debug!(event_key = %key, kind = %event.kind, "event carries no command");
            return;
        };
        let command = parse_command(&text, &self.catalog);
        let target = state_actor(&origin, &command);
        self.mailboxes
            .enqueue(
                target.clone(),
                Job {
                    event_key: key,
                    origin,
                    target,
                    sender_user_id: sender,
                    reply_token: event.reply_token.clone(),
                    command,
                    received_at: now,
                },
            )
            .await;
    }
}

impl Processor {
    async fn handle(&self, job: Job) {
        let command_name = job.command.name();
        let ctx = DispatchContext {
            origin: job.origin.clone(),
            sender_user_id: job.sender_user_id.clone(),
        };

        let (dispatch, stage) = {
            let session = self.sessions.slot(&job.target).await;
            let ledger = self.ledgers.slot(&job.target).await;
            let mut session = session.lock().await;
            let mut ledger = ledger.lock().await;
            let dispatch = self.engine.dispatch(
                &ctx,
                job.command,
                &mut session,
                &mut ledger,
                job.received_at,
            );
            (dispatch, session.stage())
        };

        let mut replies = Vec::new();
        let mut pushes: Vec<(Actor, Vec<OutboundMessage>)> = Vec::new();
        for outbound in &dispatch.outbound {
            let messages = self.resolve(&outbound.reply).await;
            match &outbound.route {
                Route::Reply => replies.extend(messages),
                Route::Push(to) => match pushes.iter_mut().find(|(a, _)| a == to) {
                    Some((_, queued)) => queued.extend(messages),
                    None => pushes.push((to.clone(), messages)),
                },
            }
        }

        let mut delivery = None;
        if !replies.is_empty() {
            let outcome = self
                .delivery
                .send(job.reply_token.as_deref(), &job.origin, replies)
                .await;
            delivery = Some(outcome);
        }
        for (to, messages) in pushes {
            let outcome = self.delivery.push(&to, messages).await;
            if delivery.is_none() || matches!(outcome, DeliveryOutcome::Failed(_)) {
                delivery = Some(outcome);
            }
        }

        let settled_units = dispatch.settled.as_ref().map(|e| e.units);
        info!(
            event_key = %job.event_key,
            actor = %job.target,
            command = command_name,
            disposition = dispatch.disposition.as_str(),
            stage = stage.as_str(),
            delivery = delivery.as_ref().map(DeliveryOutcome::as_str).unwrap_or("none"),
            settled_units,
            "event processed"
        );
        if let Some(DeliveryOutcome::Failed(reason)) = &delivery {
            warn!(event_key = %job.event_key, %reason, "delivery abandoned");
        }

        if let Some(journal) = &self.journal {
            let mut record = JournalRecord::new(
                &job.event_key,
                &job.target.to_string(),
                command_name,
                dispatch.disposition.as_str(),
            )
            .with_settled_units(settled_units);
            if let Some(outcome) = &delivery {
                record = record.with_delivery(outcome.as_str());
            }
            journal.append(record).await;
        }
    }

    async fn resolve(&self, reply: &Reply) -> Vec<OutboundMessage> {
        match reply {
            Reply::Ask { question } => {
                vec![OutboundMessage::text(self.chat.answer(question).await)]
            }
            other => render::render(other),
        }
    }
}

async fn root() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if let Some(secret) = &state.channel_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, signature) {
            warn!("webhook signature mismatch");
            return (StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let payload: WebhookBody = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "malformed webhook body");
            return (StatusCode::BAD_REQUEST, "invalid body");
        }
    };
    debug!(events = payload.events.len(), "webhook received");
    for event in payload.events {
        state.admit(event).await;
    }
    (StatusCode::OK, "ok")
}

fn catalog_from(cfg: &Config) -> TableCatalog {
    TableCatalog::new(
        cfg.catalog
            .games
            .iter()
            .map(|game| CatalogGame {
                name: game.name.clone(),
                halls: game
                    .halls
                    .iter()
                    .map(|hall| CatalogHall {
                        name: hall.name.clone(),
                        tables: hall.tables.clone(),
                        dragon_tiger: hall.dragon_tiger,
                    })
                    .collect(),
            })
            .collect(),
    )
}

fn engine_policy(cfg: &Config) -> EnginePolicy {
    EnginePolicy {
        inactive_ms: cfg.session.inactive_ms,
        result_cooldown_ms: cfg.session.result_cooldown_ms,
        qa_window_ms: cfg.session.qa_window_ms,
        sequence: SequenceBounds {
            min_len: cfg.session.sequence_min_len,
            max_len: cfg.session.sequence_max_len,
        },
        reports: ReportAggregator {
            unit_size: cfg.ledger.unit_size,
            business_day: BusinessDayPolicy {
                utc_offset_minutes: cfg.ledger.utc_offset_minutes,
                start_minutes: cfg.ledger.day_start_minutes,
                end_minutes: cfg.ledger.day_end_minutes,
            },
        },
    }
}
