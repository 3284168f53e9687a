//! Wire format for everything that crosses the broker.
//!
//! Batches, reports and confirmations are all JSON arrays of
//! `[id, amount, iban, date]` rows. Trigger messages are empty bodies;
//! trigger and confirmation share one queue per side and are told apart
//! by payload shape alone.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::AppResult;
use crate::ledger::models::Payment;

/// A payment row as it travels over the wire.
pub type WireRecord = (i64, Decimal, String, NaiveDate);

/// The empty trigger payload. The content is immaterial; it is the act
/// of receipt that causes a side to respond.
pub const TRIGGER: &[u8] = b"";

impl From<Payment> for WireRecord {
    fn from(p: Payment) -> Self {
        (p.id, p.amount, p.iban, p.date)
    }
}

impl From<WireRecord> for Payment {
    fn from((id, amount, iban, date): WireRecord) -> Self {
        Payment { id, amount, iban, date }
    }
}

/// Serialize a batch, report or confirmation message.
pub fn encode_rows(rows: &[Payment]) -> AppResult<Vec<u8>> {
    let wire: Vec<WireRecord> = rows.iter().cloned().map(WireRecord::from).collect();
    Ok(serde_json::to_vec(&wire)?)
}

/// Strict decode: the whole message must be well-formed. Used where the
/// payload is produced by a trusted component (reports, confirmations).
pub fn decode_rows(payload: &[u8]) -> AppResult<Vec<Payment>> {
    let wire: Vec<WireRecord> = serde_json::from_slice(payload)?;
    Ok(wire.into_iter().map(Payment::from).collect())
}

/// Lenient decode for inbound batches: the message must be a JSON array,
/// but individual elements may be malformed. Malformed elements come back
/// as `Err` with the raw value so the ingestor can tally them without
/// aborting the batch.
pub fn decode_batch_lenient(payload: &[u8]) -> AppResult<Vec<Result<Payment, Value>>> {
    let elements: Vec<Value> = serde_json::from_slice(payload)?;
    Ok(elements
        .into_iter()
        .map(|value| {
            serde_json::from_value::<WireRecord>(value.clone())
                .map(Payment::from)
                .map_err(|_| value)
        })
        .collect())
}

/// What arrived on a side's reconciliation queue.
#[derive(Debug)]
pub enum ReconMessage {
    /// Empty payload: report the pending backlog.
    Trigger,
    /// Non-empty payload: the reconciler's confirmed match set.
    Confirm(Vec<Payment>),
}

impl ReconMessage {
    pub fn parse(payload: &[u8]) -> AppResult<Self> {
        if payload.is_empty() {
            return Ok(ReconMessage::Trigger);
        }
        Ok(ReconMessage::Confirm(decode_rows(payload)?))
    }
}
