//! Payment module.
//!
//! Unlike the typed-event modules, payment events are loose
//! key/value attribute bags: each attribute is parsed through a
//! per-attribute parser table into a field map, which is augmented
//! with the block height and timestamp before being dispatched on
//! the event-type tag.
//!
//! The module also installs a periodic job that flags stream records
//! whose settle timestamp has passed, and imports the initial stream
//! records from the genesis application state.

pub mod storage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use harbor_chain::events::{EVENT_PAYMENT_ACCOUNT_UPDATE, EVENT_STREAM_RECORD_UPDATE};
use harbor_core::error::{ModuleError, ModuleResult};
use harbor_core::models::GenesisDoc;
use harbor_core::ports::{
    Event, EventContext, EventHandler, GenesisHandler, Module, PeriodicOperations, PrepareTables,
};
use harbor_core::services::PeriodicScheduler;
use harbor_storage::Database;

use crate::util::{parse_bool, parse_decimal, parse_i32, parse_i64};

pub use storage::{PaymentAccount, PaymentStorage, PgPaymentStorage, StreamRecord};

const OWNED_EVENTS: &[&str] = &[EVENT_STREAM_RECORD_UPDATE, EVENT_PAYMENT_ACCOUNT_UPDATE];

/// How often the settle job runs.
const SETTLE_INTERVAL: Duration = Duration::from_secs(300);

// =============================================================================
// Attribute parsing
// =============================================================================

/// How one attribute is parsed into the field map.
#[derive(Debug, Clone, Copy)]
enum AttrParser {
    Str,
    Address,
    Bool,
    I64,
    I32,
    Decimal,
}

/// A parsed attribute value.
#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    Str(String),
    Bool(bool),
    I64(i64),
    I32(i32),
    Decimal(String),
}

impl FieldValue {
    fn as_str(&self) -> &str {
        match self {
            FieldValue::Str(s) | FieldValue::Decimal(s) => s,
            _ => "",
        }
    }

    fn as_i64(&self) -> i64 {
        match self {
            FieldValue::I64(v) => *v,
            FieldValue::I32(v) => *v as i64,
            _ => 0,
        }
    }

    fn as_bool(&self) -> bool {
        matches!(self, FieldValue::Bool(true))
    }
}

/// Per-event parser tables: attribute name -> parser.
fn stream_record_parsers() -> &'static [(&'static str, AttrParser)] {
    &[
        ("account", AttrParser::Address),
        ("crud_timestamp", AttrParser::I64),
        ("netflow_rate", AttrParser::Decimal),
        ("static_balance", AttrParser::Decimal),
        ("buffer_balance", AttrParser::Decimal),
        ("lock_balance", AttrParser::Decimal),
        ("status", AttrParser::Str),
        ("settle_timestamp", AttrParser::I64),
    ]
}

fn payment_account_parsers() -> &'static [(&'static str, AttrParser)] {
    &[
        ("addr", AttrParser::Address),
        ("owner", AttrParser::Address),
        ("refundable", AttrParser::Bool),
        ("version", AttrParser::I32),
    ]
}

/// Build the field map for an event using its parser table. Unknown
/// attributes are ignored; listed attributes default when absent.
fn parse_attributes(
    event: &Event,
    parsers: &[(&'static str, AttrParser)],
) -> HashMap<&'static str, FieldValue> {
    let mut fields = HashMap::with_capacity(parsers.len());

    for (name, parser) in parsers {
        // Attribute values carry the protobuf JSON encoding, so
        // strings arrive quoted.
        let raw = event
            .attribute(name)
            .map(|v| v.trim_matches('"'))
            .unwrap_or("");

        let value = match parser {
            AttrParser::Str | AttrParser::Address => FieldValue::Str(raw.to_string()),
            AttrParser::Bool => FieldValue::Bool(parse_bool(raw)),
            AttrParser::I64 => FieldValue::I64(parse_i64(raw)),
            AttrParser::I32 => FieldValue::I32(parse_i32(raw)),
            AttrParser::Decimal => FieldValue::Decimal(parse_decimal(raw)),
        };
        fields.insert(*name, value);
    }

    fields
}

// =============================================================================
// Module
// =============================================================================

/// Payment module: owns the `stream_records` and `payment_accounts`
/// tables.
pub struct PaymentModule {
    storage: Arc<dyn PaymentStorage>,
}

impl PaymentModule {
    pub fn new(db: Database) -> Self {
        Self {
            storage: Arc::new(PgPaymentStorage::new(db)),
        }
    }

    pub fn with_storage(storage: Arc<dyn PaymentStorage>) -> Self {
        Self { storage }
    }

    async fn handle_stream_record(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        let fields = parse_attributes(event, stream_record_parsers());

        let account = fields["account"].as_str().to_string();
        if account.is_empty() {
            return Err(ModuleError::MissingAttribute {
                event: EVENT_STREAM_RECORD_UPDATE.to_string(),
                attribute: "account".to_string(),
            });
        }

        self.storage
            .save_stream_record(&StreamRecord {
                account,
                crud_timestamp: fields["crud_timestamp"].as_i64(),
                netflow_rate: fields["netflow_rate"].as_str().to_string(),
                static_balance: fields["static_balance"].as_str().to_string(),
                buffer_balance: fields["buffer_balance"].as_str().to_string(),
                lock_balance: fields["lock_balance"].as_str().to_string(),
                status: fields["status"].as_str().to_string(),
                settle_timestamp: fields["settle_timestamp"].as_i64(),
                update_at: ctx.height as i64,
                update_time: ctx.timestamp.timestamp(),
            })
            .await?;
        Ok(())
    }

    async fn handle_payment_account(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        let fields = parse_attributes(event, payment_account_parsers());

        let addr = fields["addr"].as_str().to_string();
        if addr.is_empty() {
            return Err(ModuleError::MissingAttribute {
                event: EVENT_PAYMENT_ACCOUNT_UPDATE.to_string(),
                attribute: "addr".to_string(),
            });
        }

        self.storage
            .save_payment_account(&PaymentAccount {
                addr,
                owner: fields["owner"].as_str().to_string(),
                refundable: fields["refundable"].as_bool(),
                update_at: ctx.height as i64,
                update_time: ctx.timestamp.timestamp(),
            })
            .await?;
        Ok(())
    }
}

impl Module for PaymentModule {
    fn name(&self) -> &'static str {
        "payment"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(self)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(self)
    }

    fn genesis_handler(&self) -> Option<&dyn GenesisHandler> {
        Some(self)
    }

    fn periodic_operations(&self) -> Option<&dyn PeriodicOperations> {
        Some(self)
    }
}

#[async_trait]
impl PrepareTables for PaymentModule {
    async fn prepare_tables(&self) -> ModuleResult<()> {
        self.storage.prepare_tables().await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for PaymentModule {
    fn owned_events(&self) -> &'static [&'static str] {
        OWNED_EVENTS
    }

    async fn handle_event(&self, ctx: &EventContext, event: &Event) -> ModuleResult<()> {
        // Dispatch on the event-type tag.
        match event.type_url.as_str() {
            EVENT_STREAM_RECORD_UPDATE => self.handle_stream_record(ctx, event).await,
            EVENT_PAYMENT_ACCOUNT_UPDATE => self.handle_payment_account(ctx, event).await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl GenesisHandler for PaymentModule {
    /// Import the initial stream records from the payment app state.
    async fn handle_genesis(&self, doc: &GenesisDoc) -> ModuleResult<()> {
        let records = doc
            .app_state
            .get("payment")
            .and_then(|state| state.get("stream_records"))
            .and_then(|records| records.as_array())
            .cloned()
            .unwrap_or_default();

        info!(records = records.len(), "Importing genesis stream records");
        let genesis_ts = doc.genesis_time.timestamp();

        for record in records {
            let account = record
                .get("account")
                .and_then(|a| a.as_str())
                .unwrap_or_default()
                .to_string();
            if account.is_empty() {
                continue;
            }

            let field = |name: &str| -> String {
                parse_decimal(record.get(name).and_then(|v| v.as_str()).unwrap_or("0"))
            };

            self.storage
                .save_stream_record(&StreamRecord {
                    account,
                    crud_timestamp: parse_i64(
                        record
                            .get("crud_timestamp")
                            .and_then(|v| v.as_str())
                            .unwrap_or("0"),
                    ),
                    netflow_rate: field("netflow_rate"),
                    static_balance: field("static_balance"),
                    buffer_balance: field("buffer_balance"),
                    lock_balance: field("lock_balance"),
                    status: record
                        .get("status")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    settle_timestamp: parse_i64(
                        record
                            .get("settle_timestamp")
                            .and_then(|v| v.as_str())
                            .unwrap_or("0"),
                    ),
                    update_at: 0,
                    update_time: genesis_ts,
                })
                .await?;
        }

        Ok(())
    }
}

impl PeriodicOperations for PaymentModule {
    fn register_periodic(&self, scheduler: &mut PeriodicScheduler) {
        let storage = self.storage.clone();
        scheduler.every(SETTLE_INTERVAL, "payment:settle_stream_records", move || {
            let storage = storage.clone();
            async move {
                let flipped = storage
                    .settle_due_stream_records(Utc::now().timestamp())
                    .await?;
                if flipped > 0 {
                    debug!(flipped, "Stream records moved to settling");
                }
                Ok(())
            }
        });
    }
}
