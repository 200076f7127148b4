//! Supervised control operations.
//!
//! Every mutating verb runs inside a short-lived control session on the
//! panel: create, act, (for arming) poll, and destroy. The destroy is
//! unconditional — success, refusal, timeout and cancellation all release
//! the session; only the destroy's own failure is merely logged.
//!
//! Arming is the one polled operation. The panel walks the session
//! through state ids keyed by set type (full/part1/part2); faulted,
//! active and inhibited zones either fail the attempt with the offending
//! zone list, or — with force — trigger one corrective action and a short
//! grace of extra polls.

use atslink_proto::messages::{
    ACTIVATE_OUTPUT, ACTIVATE_TRIGGER, ARM_AREAS, BOOLEAN_RESPONSE, CONTROL_SESSION_STATUS,
    CREATE_CONTROL_SESSION, DEACTIVATE_OUTPUT, DEACTIVATE_TRIGGER, DESTROY_CONTROL_SESSION,
    DISABLE_DOOR, DISARM_AREAS, DOOR_VERB_OK, ENABLE_DOOR, GET_ACTIVE_ZONES, GET_FAULT_ZONES,
    GET_INHIBITED_ZONES, INHIBIT_ZONE, ISSUE_ZONE_OFFSET, LOCK_DOOR, RESPONSE_ERROR,
    SET_AREA_FORCED, SHORT_RESPONSE, STATE_ID_OFFSET, UNINHIBIT_ZONE, UNLOCK_DOOR,
    UNLOCK_DOOR_STANDARD, UNLOCK_DOOR_TIME,
};
use atslink_proto::template::{Template, Value, bitmap_from_numbers};
use atslink_proto::{EntityKind, SessionPurpose, SetType};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::client::{Client, response_payload};
use crate::error::ClientError;
use crate::status::{decode_flags, door_is_locked};

/// Bytes in an area bitmap of a control request.
const AREA_BITMAP_LEN: usize = 4;

/// Upper bound on the issue-list traversal; the lists are best-effort.
const MAX_ISSUE_ZONES: usize = 256;

/// Outcome of an arm attempt.
///
/// Transport and panel errors surface as [`ClientError`]; everything the
/// state machine itself decides is a variant here so callers can render
/// the offending zones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmOutcome {
    /// The panel reached the setting or set state.
    Armed,
    /// Faulted zones blocked the set (best-effort list).
    Faults(Vec<u16>),
    /// Active zones blocked the set (best-effort list).
    ActiveZones(Vec<u16>),
    /// Inhibited zones blocked the set (best-effort list).
    InhibitedZones(Vec<u16>),
    /// A force was attempted but the panel stayed in the blocking state.
    ForceFailed {
        /// Last state id observed
        state: u16,
    },
    /// The poll budget ran out without a decisive state.
    TimedOut,
}

impl ArmOutcome {
    /// Whether the areas ended up armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed)
    }
}

/// Outcome of a non-polled verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// The verb ran and the panel accepted it.
    Done,
    /// The entity was already in the requested state; no session opened.
    Skipped {
        /// Why the verb was skipped
        reason: String,
    },
}

/// Door verbs, one control-session action each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorOp {
    /// Lock the door.
    Lock,
    /// Unlock until locked again.
    Unlock,
    /// Unlock for the panel's standard time.
    UnlockStandard,
    /// Unlock for an explicit number of seconds.
    UnlockTimed(u16),
    /// Take the door out of service.
    Disable,
    /// Put the door back in service.
    Enable,
}

impl DoorOp {
    fn template(self) -> &'static Template {
        match self {
            Self::Lock => &LOCK_DOOR,
            Self::Unlock => &UNLOCK_DOOR,
            Self::UnlockStandard => &UNLOCK_DOOR_STANDARD,
            Self::UnlockTimed(_) => &UNLOCK_DOOR_TIME,
            Self::Disable => &DISABLE_DOOR,
            Self::Enable => &ENABLE_DOOR,
        }
    }

    /// Reason to skip when the door already satisfies the verb.
    fn already_satisfied(self, raw: &[u8]) -> Option<&'static str> {
        let disabled = raw.first().is_some_and(|&b| b & 0x10 != 0);
        match self {
            Self::Lock if door_is_locked(raw) => Some("door is already locked"),
            Self::Unlock if raw.first().is_some_and(|&b| b & 0x01 != 0) => {
                Some("door is already unlocked")
            },
            Self::Disable if disabled => Some("door is already disabled"),
            Self::Enable if !disabled => Some("door is already enabled"),
            _ => None,
        }
    }
}

impl Client {
    /// Arm areas with the given set type, polling until decided.
    ///
    /// With `force`, faulted or active zones are forced past with
    /// `set_area_forced`, and inhibited zones with a re-sent arm; either
    /// way the panel gets a short grace of extra polls to transition.
    pub async fn arm(
        &mut self,
        areas: &[u16],
        set_type: SetType,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<ArmOutcome, ClientError> {
        let session = self.create_control_session(SessionPurpose::Arm, areas).await?;
        let outcome = self.run_arm(session, areas, set_type, force, cancel).await;
        self.destroy_control_session(session).await;

        if let Ok(outcome) = &outcome {
            info!(?set_type, force, ?outcome, "arm finished");
        }
        outcome
    }

    async fn run_arm(
        &self,
        session: u16,
        areas: &[u16],
        set_type: SetType,
        force: bool,
        cancel: &CancelToken,
    ) -> Result<ArmOutcome, ClientError> {
        let bitmap = bitmap_from_numbers(areas.iter().copied(), AREA_BITMAP_LEN);
        self.call(&ARM_AREAS, &[
            ("session", Value::Int(u64::from(session))),
            ("set_type", Value::Int(u64::from(set_type.code()))),
            ("areas", Value::Bytes(bitmap.clone())),
        ])
        .await?;

        let mut ticks = self.config.arm_poll_ticks;
        let mut forced = false;
        let mut force_polls = self.config.force_poll_ticks;

        loop {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            if ticks == 0 {
                return Ok(ArmOutcome::TimedOut);
            }
            ticks -= 1;
            tokio::time::sleep(self.config.arm_poll_interval).await;

            // Intervening non-status replies are ignored and re-polled
            let Some(state) = self.poll_session_state(session).await? else {
                continue;
            };

            if state == set_type.state_setting() || state == set_type.state_set() {
                return Ok(ArmOutcome::Armed);
            }

            if state == set_type.state_fault() || state == set_type.state_active() {
                if !force {
                    let issues = if state == set_type.state_fault() {
                        self.read_arm_issues(&GET_FAULT_ZONES).await
                    } else {
                        self.read_arm_issues(&GET_ACTIVE_ZONES).await
                    };
                    return Ok(if state == set_type.state_fault() {
                        ArmOutcome::Faults(issues)
                    } else {
                        ArmOutcome::ActiveZones(issues)
                    });
                }
                if !forced {
                    debug!(state = format_args!("{state:#06x}"), "forcing past blocking zones");
                    self.call(&SET_AREA_FORCED, &[
                        ("session", Value::Int(u64::from(session))),
                        ("areas", Value::Bytes(bitmap.clone())),
                    ])
                    .await?;
                    forced = true;
                } else if force_polls == 0 {
                    return Ok(ArmOutcome::ForceFailed { state });
                } else {
                    force_polls -= 1;
                }
                continue;
            }

            if state == set_type.state_inhibited() {
                if !force {
                    let issues = self.read_arm_issues(&GET_INHIBITED_ZONES).await;
                    return Ok(ArmOutcome::InhibitedZones(issues));
                }
                if !forced {
                    // Inhibited zones are not forced; the arm is re-sent
                    debug!("re-sending arm past inhibited zones");
                    self.call(&ARM_AREAS, &[
                        ("session", Value::Int(u64::from(session))),
                        ("set_type", Value::Int(u64::from(set_type.code()))),
                        ("areas", Value::Bytes(bitmap.clone())),
                    ])
                    .await?;
                    forced = true;
                } else if force_polls == 0 {
                    return Ok(ArmOutcome::ForceFailed { state });
                } else {
                    force_polls -= 1;
                }
                continue;
            }

            // A state belonging to another set type or an unknown one:
            // keep polling
        }
    }

    /// Disarm areas. Not polled: the response decides.
    pub async fn disarm(&mut self, areas: &[u16]) -> Result<(), ClientError> {
        let session = self.create_control_session(SessionPurpose::Disarm, areas).await?;
        let bitmap = bitmap_from_numbers(areas.iter().copied(), AREA_BITMAP_LEN);
        let result = self
            .call(&DISARM_AREAS, &[
                ("session", Value::Int(u64::from(session))),
                ("areas", Value::Bytes(bitmap)),
            ])
            .await
            .map(|_| ());
        self.destroy_control_session(session).await;
        result
    }

    /// Inhibit a zone for one arming cycle.
    pub async fn inhibit_zone(&mut self, zone: u16) -> Result<(), ClientError> {
        self.boolean_verb(SessionPurpose::Zone, &INHIBIT_ZONE, zone, "inhibit", EntityKind::Zone)
            .await
    }

    /// Clear a zone inhibit.
    pub async fn uninhibit_zone(&mut self, zone: u16) -> Result<(), ClientError> {
        self.boolean_verb(
            SessionPurpose::Zone,
            &UNINHIBIT_ZONE,
            zone,
            "uninhibit",
            EntityKind::Zone,
        )
        .await
    }

    /// Switch an output on or off.
    pub async fn set_output(&mut self, output: u16, active: bool) -> Result<(), ClientError> {
        let (template, verb): (&Template, _) = if active {
            (&ACTIVATE_OUTPUT, "activate")
        } else {
            (&DEACTIVATE_OUTPUT, "deactivate")
        };
        self.boolean_verb(SessionPurpose::Output, template, output, verb, EntityKind::Output)
            .await
    }

    /// Raise or clear a trigger flag. Skipped without a session when the
    /// trigger already matches.
    pub async fn set_trigger(
        &mut self,
        trigger: u16,
        active: bool,
    ) -> Result<ControlOutcome, ClientError> {
        let (_, raw) = self.fetch_raw_statuses(EntityKind::Trigger, &[trigger]).await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::MalformedResponse {
                operation: "get_status",
                reason: format!("no status for trigger {trigger}"),
            })?;
        let currently = decode_flags(EntityKind::Trigger, &raw)
            .iter()
            .any(|&(name, on)| name == "active" && on);
        if currently == active {
            let reason = format!(
                "trigger {trigger} is already {}",
                if active { "active" } else { "inactive" }
            );
            debug!(reason, "skipping trigger verb");
            return Ok(ControlOutcome::Skipped { reason });
        }

        let template: &Template = if active { &ACTIVATE_TRIGGER } else { &DEACTIVATE_TRIGGER };
        let verb = if active { "activate" } else { "deactivate" };
        self.boolean_verb(SessionPurpose::Trigger, template, trigger, verb, EntityKind::Trigger)
            .await?;
        Ok(ControlOutcome::Done)
    }

    /// Run a door verb. Skipped without a session when the door already
    /// satisfies it.
    pub async fn door_operation(
        &mut self,
        door: u16,
        op: DoorOp,
    ) -> Result<ControlOutcome, ClientError> {
        let (_, raw) = self.fetch_raw_statuses(EntityKind::Door, &[door]).await?
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::MalformedResponse {
                operation: "get_status",
                reason: format!("no status for door {door}"),
            })?;
        if let Some(reason) = op.already_satisfied(&raw) {
            debug!(reason, "skipping door verb");
            return Ok(ControlOutcome::Skipped { reason: reason.to_string() });
        }

        let session = self.create_control_session(SessionPurpose::Door, &[]).await?;
        let mut props = vec![
            ("session", Value::Int(u64::from(session))),
            ("object", Value::Int(u64::from(door))),
        ];
        if let DoorOp::UnlockTimed(seconds) = op {
            props.push(("seconds", Value::Int(u64::from(seconds))));
        }

        // Door verbs answer with the header class: 0xF0 raises a panel
        // error inside call(), success is the fixed `a0 00 01 00` reply
        let result = match self.call(op.template(), &props).await {
            Ok(reply) if reply == DOOR_VERB_OK => Ok(ControlOutcome::Done),
            Ok(reply) => Err(ClientError::MalformedResponse {
                operation: "door verb",
                reason: format!("unexpected reply {reply:02x?}"),
            }),
            Err(e) => Err(e),
        };
        self.destroy_control_session(session).await;
        result
    }

    /// Create a control session and return its 16-bit id.
    pub(crate) async fn create_control_session(
        &self,
        purpose: SessionPurpose,
        areas: &[u16],
    ) -> Result<u16, ClientError> {
        let bitmap = bitmap_from_numbers(areas.iter().copied(), AREA_BITMAP_LEN);
        let reply = self
            .call(&CREATE_CONTROL_SESSION, &[
                ("purpose", Value::Int(u64::from(purpose.code()))),
                ("areas", Value::Bytes(bitmap)),
            ])
            .await
            .map_err(|e| ClientError::ControlSession { reason: e.to_string() })?;

        let payload = response_payload(&reply)?;
        if !SHORT_RESPONSE.matches(payload, 0) {
            return Err(ClientError::ControlSession {
                reason: format!("expected a session id, got {payload:02x?}"),
            });
        }
        let session = SHORT_RESPONSE
            .get(payload, "value")?
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ClientError::ControlSession {
                reason: "session id missing from reply".to_string(),
            })?;
        debug!(session, ?purpose, "control session created");
        Ok(session as u16)
    }

    /// Release a control session. Failure here is logged, never
    /// propagated: the caller's own outcome matters more.
    pub(crate) async fn destroy_control_session(&self, session: u16) {
        match self
            .call(&DESTROY_CONTROL_SESSION, &[("session", Value::Int(u64::from(session)))])
            .await
        {
            Ok(_) => debug!(session, "control session destroyed"),
            Err(e) => warn!(session, error = %e, "failed to destroy control session"),
        }
    }

    /// One status poll. `None` when the reply was not a session-status
    /// message (the caller re-polls).
    async fn poll_session_state(&self, session: u16) -> Result<Option<u16>, ClientError> {
        let reply = self
            .call(&CONTROL_SESSION_STATUS, &[("session", Value::Int(u64::from(session)))])
            .await?;
        let payload = response_payload(&reply)?;
        if !CONTROL_SESSION_STATUS.matches(payload, 0) {
            return Ok(None);
        }
        let (Some(&hi), Some(&lo)) =
            (payload.get(STATE_ID_OFFSET), payload.get(STATE_ID_OFFSET + 1))
        else {
            return Ok(None);
        };
        // The state id is the one big-endian value of the protocol
        Ok(Some(u16::from_be_bytes([hi, lo])))
    }

    /// Traverse an issue list (fault/active/inhibited zones) until a
    /// boolean reply or an error ends it. Best-effort: an error mid-way
    /// returns the partial list.
    async fn read_arm_issues(&self, template: &Template) -> Vec<u16> {
        let mut zones = Vec::new();
        let mut next = 0u64;

        while zones.len() < MAX_ISSUE_ZONES {
            let reply = match self.call_no_throw(template, &[("next", Value::Int(next))]).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(error = %e, "issue traversal ended by error");
                    break;
                },
            };
            if reply.first() == Some(&RESPONSE_ERROR) {
                break;
            }
            let Ok(payload) = response_payload(&reply) else {
                break;
            };
            if BOOLEAN_RESPONSE.matches(payload, 0) {
                break;
            }
            let Some(&zone) = payload.get(ISSUE_ZONE_OFFSET) else {
                break;
            };
            zones.push(u16::from(zone));
            next = 1;
        }
        zones
    }

    async fn boolean_verb(
        &mut self,
        purpose: SessionPurpose,
        template: &Template,
        object: u16,
        verb: &'static str,
        kind: EntityKind,
    ) -> Result<(), ClientError> {
        let session = self.create_control_session(purpose, &[]).await?;
        let result = self.run_boolean_verb(session, template, object, verb, kind).await;
        self.destroy_control_session(session).await;
        result
    }

    async fn run_boolean_verb(
        &self,
        session: u16,
        template: &Template,
        object: u16,
        verb: &'static str,
        kind: EntityKind,
    ) -> Result<(), ClientError> {
        let reply = self
            .call(template, &[
                ("session", Value::Int(u64::from(session))),
                ("object", Value::Int(u64::from(object))),
            ])
            .await?;
        let payload = response_payload(&reply)?;

        if !BOOLEAN_RESPONSE.matches(payload, 0) {
            return Err(ClientError::MalformedResponse {
                operation: "boolean verb",
                reason: format!("unexpected reply {payload:02x?}"),
            });
        }
        let ok = BOOLEAN_RESPONSE
            .get(payload, "value")?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(ClientError::VerbRefused { verb, kind: kind.label(), id: object })
        }
    }
}
