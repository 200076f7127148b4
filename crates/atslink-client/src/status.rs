//! Entity status reads and the table-driven flag decoder.
//!
//! The panel reports raw status bytes per entity; what each bit means is
//! pure data. The cache in [`crate::Client`] keeps the latest raw bytes
//! so the monitor can diff, and [`EntityStatus::flags`] renders them as
//! named booleans for callers that want meaning instead of hex.

use atslink_proto::batch::{build_batch, split_batch, status_object_id};
use atslink_proto::messages::{
    BATCH_STATUS_REQUEST_LEN, GET_STATUS, STATUS_DATA_OFFSET,
};
use atslink_proto::template::Value;
use atslink_proto::{EntityKind, ProtocolError};
use tracing::debug;

use crate::client::{Client, response_payload};
use crate::error::ClientError;

/// Entities per batched status request.
const STATUS_BATCH_CHUNK: usize = 16;

/// One bit of a status byte.
#[derive(Debug, Clone, Copy)]
pub struct FlagDef {
    /// Index into the raw status bytes
    pub byte: usize,
    /// Bit mask
    pub mask: u8,
    /// Flag name
    pub name: &'static str,
}

const fn flag(byte: usize, mask: u8, name: &'static str) -> FlagDef {
    FlagDef { byte, mask, name }
}

const AREA_FLAGS: &[FlagDef] = &[
    flag(0, 0x01, "set"),
    flag(0, 0x02, "part1_set"),
    flag(0, 0x04, "part2_set"),
    flag(0, 0x08, "alarm"),
    flag(0, 0x10, "fire_alarm"),
    flag(0, 0x20, "exit_timer"),
    flag(0, 0x40, "entry_timer"),
    flag(1, 0x01, "tamper"),
    flag(1, 0x02, "fault"),
    flag(1, 0x04, "ready_to_set"),
];

const ZONE_FLAGS: &[FlagDef] = &[
    flag(0, 0x01, "active"),
    flag(0, 0x02, "tamper"),
    flag(0, 0x04, "fault"),
    flag(0, 0x08, "masked"),
    flag(0, 0x10, "inhibited"),
    flag(0, 0x20, "isolated"),
    flag(1, 0x01, "alarm_memory"),
];

const OUTPUT_FLAGS: &[FlagDef] = &[flag(0, 0x01, "active")];

const TRIGGER_FLAGS: &[FlagDef] = &[flag(0, 0x01, "active")];

const DOOR_FLAGS: &[FlagDef] = &[
    flag(0, 0x01, "unlocked"),
    flag(0, 0x02, "unlocked_period"),
    flag(0, 0x04, "time_unlocked"),
    flag(0, 0x08, "standard_time_unlocked"),
    flag(0, 0x10, "disabled"),
    flag(1, 0x01, "open"),
    flag(1, 0x02, "forced"),
];

const FILTER_FLAGS: &[FlagDef] = &[flag(0, 0x01, "satisfied")];

/// Flag table for one entity kind.
#[must_use]
pub fn flag_table(kind: EntityKind) -> &'static [FlagDef] {
    match kind {
        EntityKind::Area => AREA_FLAGS,
        EntityKind::Zone => ZONE_FLAGS,
        EntityKind::Output => OUTPUT_FLAGS,
        EntityKind::Trigger => TRIGGER_FLAGS,
        EntityKind::Door => DOOR_FLAGS,
        EntityKind::Filter => FILTER_FLAGS,
    }
}

/// Decode raw status bytes to named booleans. Bytes the frame did not
/// carry are skipped, not defaulted.
#[must_use]
pub fn decode_flags(kind: EntityKind, raw: &[u8]) -> Vec<(&'static str, bool)> {
    flag_table(kind)
        .iter()
        .filter_map(|def| raw.get(def.byte).map(|&b| (def.name, b & def.mask != 0)))
        .collect()
}

/// A door is locked exactly when none of the unlock states hold.
#[must_use]
pub fn door_is_locked(raw: &[u8]) -> bool {
    raw.first().is_none_or(|&b| b & 0x0F == 0)
}

/// Status snapshot of one entity.
#[derive(Debug, Clone)]
pub struct EntityStatus {
    /// Entity family
    pub kind: EntityKind,
    /// Entity number
    pub id: u16,
    /// Configured name, when the inventory knows one
    pub name: Option<String>,
    /// Raw status bytes as reported
    pub raw: Vec<u8>,
}

impl EntityStatus {
    /// Named flag view of [`Self::raw`].
    #[must_use]
    pub fn flags(&self) -> Vec<(&'static str, bool)> {
        decode_flags(self.kind, &self.raw)
    }

    /// Names of the flags currently set.
    #[must_use]
    pub fn active_flags(&self) -> Vec<&'static str> {
        self.flags().into_iter().filter_map(|(name, on)| on.then_some(name)).collect()
    }
}

impl Client {
    /// Read the status of every valid entity of `kind`, updating the
    /// cache.
    pub async fn entity_statuses(
        &mut self,
        kind: EntityKind,
    ) -> Result<Vec<EntityStatus>, ClientError> {
        let ids: Vec<u16> =
            self.inventory.valid.get(&kind).map(|set| set.iter().copied().collect()).unwrap_or_default();
        let raw = self.fetch_raw_statuses(kind, &ids).await?;

        let mut out = Vec::with_capacity(raw.len());
        for (id, bytes) in raw {
            self.states.insert((kind, id), bytes.clone());
            out.push(EntityStatus {
                kind,
                id,
                name: self.inventory.name_of(kind, id),
                raw: bytes,
            });
        }
        Ok(out)
    }

    /// Fetch raw status bytes for the given entities, batching where the
    /// panel allows it. The cache is NOT touched here; callers decide.
    pub(crate) async fn fetch_raw_statuses(
        &self,
        kind: EntityKind,
        ids: &[u16],
    ) -> Result<Vec<(u16, Vec<u8>)>, ClientError> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(STATUS_BATCH_CHUNK) {
            match self.fetch_status_chunk(kind, chunk).await {
                Ok(mut part) => out.append(&mut part),
                Err(ClientError::Protocol(ProtocolError::MalformedBatch { reason })) => {
                    debug!(reason, "batch status parse failed, retrying one by one");
                    for &id in chunk {
                        out.push(self.fetch_single_status(kind, id).await?);
                    }
                },
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn fetch_status_chunk(
        &self,
        kind: EntityKind,
        ids: &[u16],
    ) -> Result<Vec<(u16, Vec<u8>)>, ClientError> {
        if let [id] = ids {
            return Ok(vec![self.fetch_single_status(kind, *id).await?]);
        }

        let mut requests = Vec::with_capacity(ids.len());
        for &id in ids {
            requests.push(GET_STATUS.construct(&[
                ("kind", Value::Int(u64::from(kind.type_tag()))),
                ("id", Value::Int(u64::from(id))),
            ])?);
        }
        let batch = build_batch(&requests, BATCH_STATUS_REQUEST_LEN)?;
        let reply = self.transport.call_encrypted(&batch, true).await?;

        let parts = split_batch(&reply)?;
        let mut out = Vec::with_capacity(parts.len());
        for part in parts {
            out.push(parse_status_payload(kind, &part)?);
        }
        Ok(out)
    }

    async fn fetch_single_status(
        &self,
        kind: EntityKind,
        id: u16,
    ) -> Result<(u16, Vec<u8>), ClientError> {
        let reply = self
            .call(&GET_STATUS, &[
                ("kind", Value::Int(u64::from(kind.type_tag()))),
                ("id", Value::Int(u64::from(id))),
            ])
            .await?;
        parse_status_payload(kind, response_payload(&reply)?)
    }
}

/// Pull `(entity id, raw status bytes)` out of one status payload.
fn parse_status_payload(
    kind: EntityKind,
    payload: &[u8],
) -> Result<(u16, Vec<u8>), ClientError> {
    if payload.first() != GET_STATUS.msg_id.first() || payload.get(1) != Some(&kind.type_tag()) {
        return Err(ClientError::MalformedResponse {
            operation: "get_status",
            reason: format!("unexpected reply {payload:02x?}"),
        });
    }
    let id = status_object_id(payload).ok_or_else(|| ClientError::MalformedResponse {
        operation: "get_status",
        reason: "reply too short for an entity id".to_string(),
    })?;
    let end = kind.status_response_len().min(payload.len());
    let raw = payload.get(STATUS_DATA_OFFSET..end).unwrap_or_default().to_vec();
    Ok((id, raw))
}
