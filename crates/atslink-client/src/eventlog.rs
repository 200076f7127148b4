//! Event-log traversal.
//!
//! The log is a ring the panel serves one record at a time: open it, then
//! step the cursor with first/next selects. Records are fixed-size — 60
//! bytes on the extended family, 70 elsewhere — and the end of the ring
//! shows up as two consecutive records with sequence 0. Panels that never
//! report sequence 0 exist, so iteration is always bounded by the
//! caller's `max_events`.

use atslink_proto::messages::{
    LOG_ENTRY, LOG_FIRST, LOG_NEXT, OPEN_LOG, SELECT_LOG_ENTRY, START_MONITOR,
};
use atslink_proto::template::{Value, fixed_str};
use atslink_proto::timestamp::decode_timestamp;
use chrono::NaiveDateTime;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::client::{Client, response_payload};
use crate::error::ClientError;

/// Consecutive replies that are not log entries before the stream ends.
const ERROR_BUDGET: u8 = 3;

/// Record layout, common to both sizes (offsets into the record bytes).
mod layout {
    pub const TIMESTAMP: usize = 1;
    pub const SEQUENCE: usize = 7;
    pub const LOG_TYPE: usize = 8;
    pub const EVENT_ID: usize = 9;
    pub const CLASS_ID: usize = 11;
    pub const SUB_ID: usize = 12;
    pub const ENTITY_ID: usize = 13;
    pub const AREA: usize = 15;
    pub const DETAILS: usize = 16;
    pub const DESCRIPTION: usize = 28;
}

/// One decoded event-log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogRecord {
    /// Local time of the event; `None` when the BCD bytes are nonsense.
    pub timestamp: Option<NaiveDateTime>,
    /// Ring sequence number (0-255).
    pub sequence: u8,
    /// Log type byte.
    pub log_type: u8,
    /// Event id.
    pub event_id: u16,
    /// Event class id.
    pub class_id: u8,
    /// Event sub-id within the class.
    pub sub_id: u8,
    /// Entity the event refers to.
    pub entity_id: u16,
    /// Area the event refers to.
    pub area: u8,
    /// Raw detail bytes, taxonomy left to richer data tables.
    pub details: [u8; 7],
    /// Fixed-length description text from the panel.
    pub description: String,
}

/// Lazy finite traversal of the panel's event log.
pub struct EventLogStream<'a> {
    client: &'a Client,
    record_len: usize,
    first: bool,
    prev_sequence: Option<u8>,
    remaining: usize,
    errors: u8,
    done: bool,
}

impl Client {
    /// Open the event log for reading at most `max_events` records.
    pub async fn open_event_log(
        &self,
        max_events: usize,
    ) -> Result<EventLogStream<'_>, ClientError> {
        if self.panel.is_extended_family() {
            self.call(&START_MONITOR, &[]).await?;
        }
        self.call(&OPEN_LOG, &[]).await?;

        Ok(EventLogStream {
            record_len: self.panel.log_record_len(),
            client: self,
            first: true,
            prev_sequence: None,
            remaining: max_events,
            errors: 0,
            done: false,
        })
    }
}

impl EventLogStream<'_> {
    /// The next record, or `None` once the log is exhausted.
    pub async fn next(&mut self) -> Result<Option<EventLogRecord>, ClientError> {
        loop {
            if self.done || self.remaining == 0 {
                return Ok(None);
            }

            let direction = if self.first { LOG_FIRST } else { LOG_NEXT };
            let reply = self
                .client
                .call(&SELECT_LOG_ENTRY, &[("direction", Value::Int(u64::from(direction)))])
                .await?;
            let payload = response_payload(&reply)?;

            if !LOG_ENTRY.matches(payload, 0) {
                // Transient in-flight replies (acks) are skipped, but not
                // forever
                self.errors += 1;
                if self.errors >= ERROR_BUDGET {
                    debug!("ending log stream after repeated non-log replies");
                    self.done = true;
                    return Ok(None);
                }
                continue;
            }
            self.errors = 0;
            self.first = false;

            let record = payload.get(LOG_ENTRY.msg_id.len()..).unwrap_or_default();
            let decoded = decode_record(record, self.record_len)?;

            // Two consecutive zero sequences mark the end of the ring
            if decoded.sequence == 0 && self.prev_sequence == Some(0) {
                self.done = true;
                return Ok(None);
            }
            self.prev_sequence = Some(decoded.sequence);
            self.remaining -= 1;
            return Ok(Some(decoded));
        }
    }

    /// Drain the stream into a vector, honouring `cancel`.
    pub async fn collect(mut self, cancel: &CancelToken) -> Result<Vec<EventLogRecord>, ClientError> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn decode_record(record: &[u8], record_len: usize) -> Result<EventLogRecord, ClientError> {
    if record.len() < record_len {
        return Err(ClientError::MalformedResponse {
            operation: "log_entry",
            reason: format!("record of {} bytes, expected {record_len}", record.len()),
        });
    }

    let ts_bytes: [u8; 6] = record[layout::TIMESTAMP..layout::TIMESTAMP + 6]
        .try_into()
        .unwrap_or([0u8; 6]);
    let details: [u8; 7] =
        record[layout::DETAILS..layout::DETAILS + 7].try_into().unwrap_or([0u8; 7]);
    let description_len = record_len - layout::DESCRIPTION;

    Ok(EventLogRecord {
        timestamp: decode_timestamp(&ts_bytes),
        sequence: record[layout::SEQUENCE],
        log_type: record[layout::LOG_TYPE],
        event_id: u16::from_le_bytes([record[layout::EVENT_ID], record[layout::EVENT_ID + 1]]),
        class_id: record[layout::CLASS_ID],
        sub_id: record[layout::SUB_ID],
        entity_id: u16::from_le_bytes([
            record[layout::ENTITY_ID],
            record[layout::ENTITY_ID + 1],
        ]),
        area: record[layout::AREA],
        details,
        description: fixed_str(record, layout::DESCRIPTION, description_len)
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(sequence: u8, len: usize) -> Vec<u8> {
        let mut record = vec![0u8; len];
        record[0] = 0x01;
        // 2025-12-31 23:59:08 in BCD
        record[1..7].copy_from_slice(&[0x25, 0x12, 0x31, 0x23, 0x59, 0x08]);
        record[layout::SEQUENCE] = sequence;
        record[layout::LOG_TYPE] = 2;
        record[layout::EVENT_ID..layout::EVENT_ID + 2].copy_from_slice(&[0x34, 0x12]);
        record[layout::CLASS_ID] = 7;
        record[layout::SUB_ID] = 1;
        record[layout::ENTITY_ID..layout::ENTITY_ID + 2].copy_from_slice(&[5, 0]);
        record[layout::AREA] = 1;
        record[layout::DETAILS..layout::DETAILS + 7].copy_from_slice(&[9; 7]);
        record[layout::DESCRIPTION..layout::DESCRIPTION + 8].copy_from_slice(b"Zone 005");
        record
    }

    #[test]
    fn decodes_a_70_byte_record() {
        let decoded = decode_record(&sample_record(3, 70), 70).unwrap();
        assert_eq!(decoded.sequence, 3);
        assert_eq!(decoded.event_id, 0x1234);
        assert_eq!(decoded.entity_id, 5);
        assert_eq!(decoded.description, "Zone 005");
        assert_eq!(decoded.timestamp.unwrap().to_string(), "2025-12-31 23:59:08");
        assert_eq!(decoded.details, [9; 7]);
    }

    #[test]
    fn decodes_a_60_byte_record() {
        let decoded = decode_record(&sample_record(0, 60), 60).unwrap();
        assert_eq!(decoded.sequence, 0);
        assert_eq!(decoded.description, "Zone 005");
    }

    #[test]
    fn short_record_is_rejected() {
        assert!(decode_record(&[0u8; 10], 60).is_err());
    }
}
