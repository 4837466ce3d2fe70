pub mod timeline;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::errors::EventError;
use crate::models::events::{EventKind, EventPayload, NormalizedEvent, RawEvent};
use crate::utils::casing::keys_to_camel;

pub use timeline::{MergeOutcome, Timeline};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Turns raw wire events into [`NormalizedEvent`]s and merges batches into a [`Timeline`].
///
/// Owns the sequence counter, so indices are strictly increasing across every batch this
/// instance sees, independent of batch boundaries or reconnects.
#[derive(Debug, Default)]
pub struct Reconciler {
    next_index: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next successfully normalized event will receive.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Normalizes a single raw event. Malformed events are rejected before an index is taken.
    pub fn normalize(&mut self, raw: Value) -> Result<NormalizedEvent, EventError> {
        let raw: RawEvent =
            serde_json::from_value(keys_to_camel(raw)).map_err(|e| EventError::InvalidShape {
                reason: e.to_string(),
            })?;

        let occurred_at = parse_block_timestamp(
            raw.block_timestamp
                .as_ref()
                .ok_or(EventError::MissingField {
                    field: "blockTimestamp",
                })?,
        )?;

        let body = raw
            .event
            .ok_or(EventError::MissingField { field: "event" })?;
        let kind = body
            .event
            .as_deref()
            .map(EventKind::from)
            .ok_or(EventError::MissingField {
                field: "event.event",
            })?;

        // The wire format promises at least one data entry; only the first one is used
        let data = body.data.into_iter().next().ok_or(EventError::EmptyData)?;
        let actor_account_id = data
            .get("accountId")
            .and_then(Value::as_str)
            .ok_or(EventError::MissingField {
                field: "event.data[0].accountId",
            })?
            .to_string();

        let payload = EventPayload::from_data(&kind, &data);

        let sequence_index = self.next_index;
        self.next_index += 1;

        Ok(NormalizedEvent {
            sequence_index,
            occurred_at,
            actor_account_id,
            kind,
            payload,
            data,
            block_height: raw.block_height.as_ref().and_then(value_as_u64),
            receipt_id: raw.receipt_id,
        })
    }

    /// Normalizes a batch in wire order, skipping malformed events. Returns the normalized
    /// events and the number skipped.
    pub fn normalize_batch(&mut self, raw_batch: Vec<Value>) -> (Vec<NormalizedEvent>, usize) {
        let mut skipped = 0;
        let events = raw_batch
            .into_iter()
            .filter_map(|raw| match self.normalize(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Skipping malformed event: {}", e);
                    skipped += 1;
                    None
                }
            })
            .collect();
        (events, skipped)
    }

    /// Normalizes `raw_batch` and merges it into `timeline`. A batch with nothing newer than the
    /// current head leaves the timeline untouched.
    pub fn merge(&mut self, timeline: &mut Timeline, raw_batch: Vec<Value>) -> MergeOutcome {
        let received = raw_batch.len();
        let (events, skipped) = self.normalize_batch(raw_batch);
        let (inserted, evicted) = timeline.merge_batch(events);

        debug!(
            "Merged batch: received={}, skipped={}, inserted={}, evicted={}, timeline_len={}",
            received,
            skipped,
            inserted,
            evicted,
            timeline.len()
        );

        MergeOutcome {
            received,
            skipped,
            inserted,
            evicted,
        }
    }
}

/// Block timestamps are nanoseconds since epoch, as a decimal string or a JSON number.
pub fn parse_block_timestamp(value: &Value) -> Result<DateTime<Utc>, EventError> {
    let invalid = || EventError::InvalidTimestamp {
        got: value.to_string(),
    };

    let millis = match value {
        Value::String(s) => match s.trim().parse::<u64>() {
            Ok(nanos) => (nanos / NANOS_PER_MILLI) as i64,
            Err(_) => float_nanos_to_millis(s.trim().parse::<f64>().map_err(|_| invalid())?)
                .ok_or_else(invalid)?,
        },
        Value::Number(n) => match n.as_u64() {
            Some(nanos) => (nanos / NANOS_PER_MILLI) as i64,
            None => float_nanos_to_millis(n.as_f64().ok_or_else(invalid)?).ok_or_else(invalid)?,
        },
        _ => return Err(invalid()),
    };

    DateTime::from_timestamp_millis(millis).ok_or_else(invalid)
}

fn float_nanos_to_millis(nanos: f64) -> Option<i64> {
    if !nanos.is_finite() || nanos < 0.0 {
        return None;
    }
    Some((nanos / NANOS_PER_MILLI as f64).floor() as i64)
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
