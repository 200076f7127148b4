//! Change-of-state monitoring.
//!
//! The reader task hands every unsolicited frame to the monitor's
//! channel. A 0xCA notification names (at most) one affected entity type;
//! the monitor acknowledges it, waits a short settle, asks the panel
//! which entities of that type changed, refreshes exactly those (or all
//! of the type when the bitmap comes back empty — the bitmap lags the
//! notification on some panels), and emits one [`ChangeEvent`] per entity
//! whose raw status actually differs from the cache.
//!
//! One notification is handled at a time; anything arriving mid-handle is
//! dropped by the transport's capacity-1 channel. That is safe because
//! the refresh is idempotent: whatever changed is picked up by the next
//! bitmap query.

use atslink_proto::messages::{
    CHANGE_ALL, CHANGES_BITMAP_OFFSET, COS_ACK, COS_MARKER, GET_CHANGES, USER_INFO,
};
use atslink_proto::template::{Value, numbers_from_bitmap};
use atslink_proto::EntityKind;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::client::{Client, response_payload};
use crate::error::ClientError;

/// One observed entity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Entity family
    pub kind: EntityKind,
    /// Entity number
    pub id: u16,
    /// Configured name, when known
    pub name: Option<String>,
    /// Previous raw status bytes; `None` on the first observation
    pub old: Option<Vec<u8>>,
    /// New raw status bytes
    pub new: Vec<u8>,
}

impl Client {
    /// Run the change-of-state loop until cancelled.
    ///
    /// Emits [`ChangeEvent`]s on `events`. Call [`Self::load_inventory`]
    /// first so the monitor knows which entities exist.
    pub async fn run_monitor(
        &mut self,
        events: mpsc::Sender<ChangeEvent>,
        cancel: &CancelToken,
    ) -> Result<(), ClientError> {
        // Activates panel-side event notifications
        self.call(&USER_INFO, &[]).await?;

        let mut cos_rx = self.cos_rx.take().ok_or_else(|| ClientError::MalformedResponse {
            operation: "monitor",
            reason: "monitor is already running on this connection".to_string(),
        })?;
        let mut cancel = cancel.clone();

        let result = loop {
            tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                frame = cos_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = self.handle_notification(&frame, &events).await {
                            break Err(e);
                        }
                    },
                    None => {
                        break Err(ClientError::Transport(std::io::Error::new(
                            std::io::ErrorKind::ConnectionAborted,
                            "connection closed",
                        )));
                    },
                },
            }
        };

        self.cos_rx = Some(cos_rx);
        result
    }

    async fn handle_notification(
        &mut self,
        frame: &[u8],
        events: &mpsc::Sender<ChangeEvent>,
    ) -> Result<(), ClientError> {
        // Unsolicited frames that are not change-of-state are ignored
        if frame.get(1) != Some(&COS_MARKER) {
            debug!(frame = ?frame.first(), "ignoring non-COS unsolicited frame");
            return Ok(());
        }

        let payload = frame.get(3..).unwrap_or_default();
        let tag = payload.get(2).copied().unwrap_or(CHANGE_ALL);

        // Fire-and-forget acknowledgement; no response follows
        if let Err(e) = self.transport.send_encrypted(COS_ACK).await {
            warn!(error = %e, "could not acknowledge notification");
        }

        // Give the panel a moment to update its change bitmaps
        tokio::time::sleep(self.config.cos_settle).await;

        let kinds: Vec<EntityKind> = match EntityKind::from_tag(tag) {
            Some(kind) => vec![kind],
            // 0xFF and anything unknown mean "everything may have changed"
            None => EntityKind::ALL.to_vec(),
        };
        debug!(tag = format_args!("{tag:#04x}"), ?kinds, "handling change notification");

        for kind in kinds {
            self.refresh_changed(kind, events).await?;
        }
        Ok(())
    }

    async fn refresh_changed(
        &mut self,
        kind: EntityKind,
        events: &mpsc::Sender<ChangeEvent>,
    ) -> Result<(), ClientError> {
        let valid = self.inventory.valid.get(&kind).cloned().unwrap_or_default();
        if valid.is_empty() {
            return Ok(());
        }

        let changed = self.query_changed(kind).await?;
        // An empty bitmap for an advertised type means the panel has not
        // filled it in yet; refresh the whole type instead of dropping
        // the event
        let targets: Vec<u16> = if changed.is_empty() {
            valid.iter().copied().collect()
        } else {
            changed.into_iter().filter(|n| valid.contains(n)).collect()
        };
        if targets.is_empty() {
            return Ok(());
        }

        let statuses = self.fetch_raw_statuses(kind, &targets).await?;
        for (id, raw) in statuses {
            let old = self.states.get(&(kind, id)).cloned();
            if old.as_deref() == Some(raw.as_slice()) {
                continue;
            }
            self.states.insert((kind, id), raw.clone());
            let event = ChangeEvent {
                kind,
                id,
                name: self.inventory.name_of(kind, id),
                old,
                new: raw,
            };
            if events.send(event).await.is_err() {
                // Receiver gone: nothing left to notify
                return Ok(());
            }
        }
        Ok(())
    }

    /// Which entities of `kind` the panel flags as changed.
    async fn query_changed(&self, kind: EntityKind) -> Result<Vec<u16>, ClientError> {
        let tag = kind.type_tag();
        let reply = self.call(&GET_CHANGES, &[("kind", Value::Int(u64::from(tag)))]).await?;
        let payload = response_payload(&reply)?;

        if payload.first() != GET_CHANGES.msg_id.first() || payload.get(1) != Some(&tag) {
            return Err(ClientError::MalformedResponse {
                operation: "get_changes",
                reason: format!("unexpected reply {payload:02x?}"),
            });
        }
        let bitmap = payload.get(CHANGES_BITMAP_OFFSET..).unwrap_or_default();
        Ok(numbers_from_bitmap(bitmap))
    }
}
