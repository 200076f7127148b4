//! The static message table for the ACE 2 (v6) protocol.
//!
//! One [`Template`] constant per operation, grouped in wire-id blocks:
//! session management (0x00-0x07), event log (0x0A-0x0E), naming and
//! configuration (0x10-0x15), status and change queries (0x30-0x32),
//! control sessions and verbs (0x40-0x46), and the batch container
//! (`EE E0 EE EE`). Every constant the rest of the workspace needs to
//! speak the protocol lives here; swapping a wire id touches this file
//! only.

use crate::template::{Field, FieldKind, Template};

/// Header byte of requests and panel-originated unsolicited frames.
pub const REQUEST_HEADER: u8 = 0xC0;

/// Header byte of a success response.
pub const RESPONSE_OK: u8 = 0xA0;

/// Header byte of an error response; the body carries the panel's error
/// code verbatim.
pub const RESPONSE_ERROR: u8 = 0xF0;

/// Second byte of an unsolicited change-of-state notification.
pub const COS_MARKER: u8 = 0xCA;

/// Change-of-state acknowledgement, sent encrypted and fire-and-forget.
pub const COS_ACK: &[u8] = &[0xA0, 0x00, 0x01, 0x01];

/// Success reply of the door control verbs.
pub const DOOR_VERB_OK: &[u8] = &[0xA0, 0x00, 0x01, 0x00];

/// Change-type tag meaning "every entity type may have changed".
pub const CHANGE_ALL: u8 = 0xFF;

/// The controllable and observable entity families of a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    /// Logical grouping of zones, armed and disarmed together
    Area,
    /// Individual sensor input
    Zone,
    /// Switchable output
    Output,
    /// Logical trigger flag
    Trigger,
    /// Controlled door
    Door,
    /// Condition filter
    Filter,
}

impl EntityKind {
    /// Every kind, in the panel's enumeration order.
    pub const ALL: [Self; 6] =
        [Self::Area, Self::Zone, Self::Output, Self::Trigger, Self::Door, Self::Filter];

    /// Wire tag used in name requests, status queries and COS payloads.
    #[must_use]
    pub fn type_tag(self) -> u8 {
        match self {
            Self::Zone => 0x01,
            Self::Area => 0x02,
            Self::Output => 0x07,
            Self::Filter => 0x08,
            Self::Door => 0x0B,
            Self::Trigger => 0x14,
        }
    }

    /// Reverse of [`Self::type_tag`].
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Zone),
            0x02 => Some(Self::Area),
            0x07 => Some(Self::Output),
            0x08 => Some(Self::Filter),
            0x0B => Some(Self::Door),
            0x14 => Some(Self::Trigger),
            _ => None,
        }
    }

    /// Fixed payload length of this kind's embedded status response.
    #[must_use]
    pub fn status_response_len(self) -> usize {
        match self {
            Self::Area => 17,
            Self::Zone => 7,
            Self::Door => 6,
            Self::Output | Self::Trigger | Self::Filter => 5,
        }
    }

    /// Lowercase display name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Area => "area",
            Self::Zone => "zone",
            Self::Output => "output",
            Self::Trigger => "trigger",
            Self::Door => "door",
            Self::Filter => "filter",
        }
    }
}

/// Arm variant selected by a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetType {
    /// Full set
    Full,
    /// Part set 1
    Part1,
    /// Part set 2
    Part2,
}

impl SetType {
    /// Byte carried in the `arm_areas` request.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Full => 0x05,
            Self::Part1 => 0x04,
            Self::Part2 => 0x10,
        }
    }

    fn state(self, low: u8) -> u16 {
        (u16::from(self.code()) << 8) | u16::from(low)
    }

    /// `controlSessionStatus` state id while the panel is setting.
    #[must_use]
    pub fn state_setting(self) -> u16 {
        self.state(0x04)
    }

    /// State id once the areas are set.
    #[must_use]
    pub fn state_set(self) -> u16 {
        self.state(0x05)
    }

    /// State id when faulted zones block the set.
    #[must_use]
    pub fn state_fault(self) -> u16 {
        self.state(0x01)
    }

    /// State id when active zones block the set.
    #[must_use]
    pub fn state_active(self) -> u16 {
        self.state(0x02)
    }

    /// State id when inhibited zones block the set.
    #[must_use]
    pub fn state_inhibited(self) -> u16 {
        self.state(0x03)
    }
}

/// Purpose byte of `create_control_session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPurpose {
    /// Arming one or more areas
    Arm,
    /// Disarming one or more areas
    Disarm,
    /// Zone operations (inhibit / uninhibit)
    Zone,
    /// Output operations
    Output,
    /// Trigger operations
    Trigger,
    /// Door operations
    Door,
}

impl SessionPurpose {
    /// Wire byte.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Arm => 0x01,
            Self::Disarm => 0x02,
            Self::Zone => 0x03,
            Self::Output => 0x04,
            Self::Trigger => 0x05,
            Self::Door => 0x06,
        }
    }
}

// Written as macros rather than `const fn`s: the entries array literal
// depends on a parameter, which defeats rvalue static promotion to
// `'static` (E0716) when called from a `const` initializer. Expanding
// inline at each call site keeps the array a plain literal.
macro_rules! session_field {
    ($name:expr) => {
        Field { name: $name, entries: &[(2, 0xFF), (3, 0xFF)], length: None, kind: None }
    };
}

macro_rules! byte_field {
    ($name:expr, $offset:expr) => {
        Field {
            name: $name,
            entries: &[($offset, 0xFF)],
            length: None,
            kind: Some(FieldKind::Byte),
        }
    };
}

// --- Session management ------------------------------------------------

/// Plain boot query answered with the panel descriptor.
pub const DEVICE_INFO: Template =
    Template { name: "device_info", msg_id: &[0x00], defaults: &[0x01], fields: &[] };

/// Byte ranges of the device-info reply (payload coordinates, header
/// stripped). Fixed-length ASCII, NUL padded.
pub mod device_info_layout {
    /// Product name, e.g. `ATS1500A-IP`.
    pub const PRODUCT: (usize, usize) = (2, 16);
    /// Firmware string, e.g. `MR_4.1.38741`.
    pub const FIRMWARE: (usize, usize) = (18, 16);
    /// 16-character base64 serial.
    pub const SERIAL: (usize, usize) = (34, 16);
    /// Encryption-mode indicator byte.
    pub const MODE: usize = 50;
}

/// Session-key exchange. The 18-byte body carries our 8 key bytes (zeros
/// by design) and 8 pad bytes.
pub const CREATE_SESSION: Template = Template {
    name: "create_session",
    msg_id: &[0x01],
    defaults: &[0x01, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    fields: &[Field { name: "client_key", entries: &[(2, 0xFF)], length: Some(8), kind: None }],
};

/// Panel half of the session key in the `create_session` reply (payload
/// coordinates).
pub const CREATE_SESSION_PANEL_KEY: std::ops::Range<usize> = 4..12;

/// Switches the link to the freshly combined session key. Traffic after
/// this call's reply must use the session key.
pub const ENABLE_ENCRYPTION: Template =
    Template { name: "enable_encryption", msg_id: &[0x02], defaults: &[0x01], fields: &[] };

/// PIN login for the standard panel families.
pub const LOGIN_PIN: Template = Template {
    name: "login_pin",
    msg_id: &[0x03],
    defaults: &[0x01, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x03],
    fields: &[
        byte_field!("permissions", 2),
        Field { name: "pin", entries: &[(3, 0xFF)], length: Some(10), kind: None },
        byte_field!("method", 13),
    ],
};

/// Username/password login for the extended (x700) family.
pub const LOGIN_ACCOUNT: Template = Template {
    name: "login_account",
    msg_id: &[0x04],
    defaults: &[
        0x01, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0x03,
    ],
    fields: &[
        byte_field!("permissions", 2),
        Field { name: "username", entries: &[(3, 0xFF)], length: Some(32), kind: None },
        Field { name: "password", entries: &[(35, 0xFF)], length: Some(32), kind: None },
        byte_field!("method", 67),
    ],
};

/// Post-login activation; also enables panel-side event notifications.
pub const USER_INFO: Template =
    Template { name: "user_info", msg_id: &[0x05], defaults: &[0x01], fields: &[] };

/// Byte range of the user name in the `user_info` reply.
pub const USER_INFO_NAME: (usize, usize) = (2, 16);

/// Keep-alive, sent every 30 seconds once logged in.
pub const PING: Template = Template { name: "ping", msg_id: &[0x06], defaults: &[0x01], fields: &[] };

/// Session teardown, sent best-effort on disconnect.
pub const LOGOUT: Template =
    Template { name: "logout", msg_id: &[0x07], defaults: &[0x01], fields: &[] };

/// Generic status reply (`a0 00 00` on success).
pub const SIMPLE_RESPONSE: Template = Template {
    name: "simple_response",
    msg_id: &[0x00],
    defaults: &[0x00],
    fields: &[byte_field!("status", 1)],
};

// --- Event log ---------------------------------------------------------

/// Required before `open_log` on the extended family.
pub const START_MONITOR: Template =
    Template { name: "start_monitor", msg_id: &[0x0A], defaults: &[0x01], fields: &[] };

/// Opens the event log for traversal.
pub const OPEN_LOG: Template =
    Template { name: "open_log", msg_id: &[0x0C], defaults: &[0x01], fields: &[] };

/// A log record reply; the record bytes follow the message id directly.
pub const LOG_ENTRY: Template =
    Template { name: "log_entry", msg_id: &[0x0D], defaults: &[], fields: &[] };

/// Steps the log cursor. Direction 0 selects the first record, 3 the next.
pub const SELECT_LOG_ENTRY: Template = Template {
    name: "select_log_entry",
    msg_id: &[0x0E],
    defaults: &[0x01, 0x00],
    fields: &[byte_field!("direction", 2)],
};

/// `select_log_entry` direction for the first record.
pub const LOG_FIRST: u8 = 0x00;

/// `select_log_entry` direction for the following record.
pub const LOG_NEXT: u8 = 0x03;

// --- Naming and configuration ------------------------------------------

/// Name page request, standard format (16 entries of 16 bytes).
pub const GET_NAMES: Template = Template {
    name: "get_names",
    msg_id: &[0x10],
    defaults: &[0x00, 0x00, 0x00],
    fields: &[
        byte_field!("kind", 1),
        Field { name: "index", entries: &[(2, 0xFF), (3, 0xFF)], length: None, kind: None },
    ],
};

/// Name page request, extended format (4 entries of 30 bytes).
pub const GET_NAMES_EXTENDED: Template = Template {
    name: "get_names_extended",
    msg_id: &[0x15],
    defaults: &[0x00, 0x00, 0x00],
    fields: &[
        byte_field!("kind", 1),
        Field { name: "index", entries: &[(2, 0xFF), (3, 0xFF)], length: None, kind: None },
    ],
};

/// Layout of both name-page reply formats (payload coordinates).
pub mod name_page_layout {
    /// Offset of the first entry; byte 2 is the entry count.
    pub const ENTRIES: usize = 3;
    /// Standard format: 1-byte number, 16-byte name.
    pub const STD_NAME_LEN: usize = 16;
    /// Standard entries per page.
    pub const STD_PAGE_SIZE: usize = 16;
    /// Extended format: 2-byte number, 30-byte name.
    pub const EXT_NAME_LEN: usize = 30;
    /// Extended entries per page.
    pub const EXT_PAGE_SIZE: usize = 4;
}

/// Which area numbers exist on this panel. Unsupported on the extended
/// family, which simply has areas 1..max.
pub const GET_VALID_AREAS: Template =
    Template { name: "get_valid_areas", msg_id: &[0x13], defaults: &[0x02], fields: &[] };

/// Offset of the valid-areas bitset (payload coordinates; body offset 1).
pub const VALID_AREAS_BITSET_OFFSET: usize = 2;

// --- Status and change queries -----------------------------------------

/// Point status query for a single entity.
pub const GET_STATUS: Template = Template {
    name: "get_status",
    msg_id: &[0x31],
    defaults: &[0x00, 0x00, 0x00, 0x00, 0x00],
    fields: &[byte_field!("kind", 1), byte_field!("id", 3)],
};

/// Offset of the entity id within any status response payload.
pub const STATUS_OBJECT_ID_OFFSET: usize = 3;

/// Offset of the raw status bytes within a status response payload.
pub const STATUS_DATA_OFFSET: usize = 4;

/// Change bitmap query, one entity kind per request.
pub const GET_CHANGES: Template = Template {
    name: "get_changes",
    msg_id: &[0x30],
    defaults: &[0x00],
    fields: &[byte_field!("kind", 1)],
};

/// Offset of the change bitmap in the `get_changes` reply.
pub const CHANGES_BITMAP_OFFSET: usize = 2;

/// Zones assigned to one area, as a 30-byte zone bitset.
pub const GET_ZONES_ASSIGNED: Template = Template {
    name: "get_zones_assigned",
    msg_id: &[0x32],
    defaults: &[0x02, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0],
    fields: &[byte_field!("area", 3)],
};

/// Bitset range of the zones-assigned reply (payload coordinates).
pub const ZONES_ASSIGNED_BITSET: std::ops::Range<usize> = 2..32;

/// Fixed payload length of the zones-assigned reply.
pub const ZONES_ASSIGNED_RESPONSE_LEN: usize = 32;

/// Embedded body length of batched status requests.
pub const BATCH_STATUS_REQUEST_LEN: usize = 6;

/// Embedded body length of batched zones-assigned requests.
pub const BATCH_ZONES_REQUEST_LEN: usize = 12;

// --- Control sessions ---------------------------------------------------

/// Opens a control context scoping a mutating operation.
pub const CREATE_CONTROL_SESSION: Template = Template {
    name: "create_control_session",
    msg_id: &[0x40],
    defaults: &[0x01, 0, 0, 0, 0],
    fields: &[
        byte_field!("purpose", 1),
        Field { name: "areas", entries: &[(2, 0xFF)], length: Some(4), kind: None },
    ],
};

/// 16-bit value reply, used for freshly created session ids.
pub const SHORT_RESPONSE: Template = Template {
    name: "short_response",
    msg_id: &[0x41],
    defaults: &[0x01],
    fields: &[Field {
        name: "value",
        entries: &[(2, 0xFF), (3, 0xFF)],
        length: None,
        kind: None,
    }],
};

/// Starts arming the areas of the bitmap under a control session.
pub const ARM_AREAS: Template = Template {
    name: "arm_areas",
    msg_id: &[0x42],
    defaults: &[0x01, 0, 0, 0x05, 0, 0, 0, 0],
    fields: &[
        session_field!("session"),
        byte_field!("set_type", 4),
        Field { name: "areas", entries: &[(5, 0xFF)], length: Some(4), kind: None },
    ],
};

/// Disarms the areas of the bitmap. Not polled.
pub const DISARM_AREAS: Template = Template {
    name: "disarm_areas",
    msg_id: &[0x42],
    defaults: &[0x02, 0, 0, 0, 0, 0, 0],
    fields: &[
        session_field!("session"),
        Field { name: "areas", entries: &[(4, 0xFF)], length: Some(4), kind: None },
    ],
};

const fn object_verb(name: &'static str, defaults: &'static [u8]) -> Template {
    // All single-object verbs share the layout: session short + object byte
    Template {
        name,
        msg_id: &[0x42],
        defaults,
        fields: &[session_field!("session"), byte_field!("object", 4)],
    }
}

/// Mutes a zone for one arming cycle.
pub const INHIBIT_ZONE: Template = object_verb("inhibit_zone", &[0x03, 0, 0, 0]);

/// Clears a zone inhibit.
pub const UNINHIBIT_ZONE: Template = object_verb("uninhibit_zone", &[0x04, 0, 0, 0]);

/// Switches an output on.
pub const ACTIVATE_OUTPUT: Template = object_verb("activate_output", &[0x05, 0, 0, 0]);

/// Switches an output off.
pub const DEACTIVATE_OUTPUT: Template = object_verb("deactivate_output", &[0x06, 0, 0, 0]);

/// Raises a trigger flag.
pub const ACTIVATE_TRIGGER: Template = object_verb("activate_trigger", &[0x07, 0, 0, 0]);

/// Clears a trigger flag.
pub const DEACTIVATE_TRIGGER: Template = object_verb("deactivate_trigger", &[0x08, 0, 0, 0]);

/// Locks a door.
pub const LOCK_DOOR: Template = object_verb("lock_door", &[0x09, 0, 0, 0]);

/// Unlocks a door until locked again.
pub const UNLOCK_DOOR: Template = object_verb("unlock_door", &[0x0A, 0, 0, 0]);

/// Unlocks a door for the panel's standard time.
pub const UNLOCK_DOOR_STANDARD: Template = object_verb("unlock_door_standard", &[0x0B, 0, 0, 0]);

/// Unlocks a door for an explicit number of seconds.
pub const UNLOCK_DOOR_TIME: Template = Template {
    name: "unlock_door_time",
    msg_id: &[0x42],
    defaults: &[0x0C, 0, 0, 0, 0, 0],
    fields: &[
        session_field!("session"),
        byte_field!("object", 4),
        Field { name: "seconds", entries: &[(5, 0xFF), (6, 0xFF)], length: None, kind: None },
    ],
};

/// Re-enables a disabled door.
pub const ENABLE_DOOR: Template = object_verb("enable_door", &[0x0D, 0, 0, 0]);

/// Takes a door out of service.
pub const DISABLE_DOOR: Template = object_verb("disable_door", &[0x0E, 0, 0, 0]);

/// Forces the set past faulted or active zones.
pub const SET_AREA_FORCED: Template = Template {
    name: "set_area_forced",
    msg_id: &[0x42],
    defaults: &[0x0F, 0, 0, 0, 0, 0, 0],
    fields: &[
        session_field!("session"),
        Field { name: "areas", entries: &[(4, 0xFF)], length: Some(4), kind: None },
    ],
};

/// Polls the state of a control session.
pub const CONTROL_SESSION_STATUS: Template = Template {
    name: "control_session_status",
    msg_id: &[0x43],
    defaults: &[0x01, 0, 0],
    fields: &[session_field!("session")],
};

/// Offset of the big-endian state id in the session-status reply.
pub const STATE_ID_OFFSET: usize = 2;

/// Releases a control session. Issued on every termination path.
pub const DESTROY_CONTROL_SESSION: Template = Template {
    name: "destroy_control_session",
    msg_id: &[0x44],
    defaults: &[0x01, 0, 0],
    fields: &[session_field!("session")],
};

const fn issue_query(name: &'static str, defaults: &'static [u8]) -> Template {
    Template { name, msg_id: &[0x45], defaults, fields: &[byte_field!("next", 2)] }
}

/// Traverses the zones faulting an arm attempt.
pub const GET_FAULT_ZONES: Template = issue_query("get_fault_zones", &[0x01, 0x00]);

/// Traverses the zones active during an arm attempt.
pub const GET_ACTIVE_ZONES: Template = issue_query("get_active_zones", &[0x02, 0x00]);

/// Traverses the zones inhibited during an arm attempt.
pub const GET_INHIBITED_ZONES: Template = issue_query("get_inhibited_zones", &[0x03, 0x00]);

/// Offset of the zone number in an issue-traversal reply.
pub const ISSUE_ZONE_OFFSET: usize = 2;

/// Boolean verb outcome for zone/output/trigger operations.
pub const BOOLEAN_RESPONSE: Template = Template {
    name: "boolean_response",
    msg_id: &[0x46],
    defaults: &[0x01],
    fields: &[Field {
        name: "value",
        entries: &[(2, 0xFF)],
        length: None,
        kind: Some(FieldKind::Bool),
    }],
};

// --- Batch container ----------------------------------------------------

/// Container for several embedded requests in one round trip.
pub const BATCH: Template =
    Template { name: "batch", msg_id: &[0xEE, 0xE0, 0xEE, 0xEE], defaults: &[], fields: &[] };

/// Message id of a batch response (after the 0xA0 header).
pub const BATCH_RESPONSE_ID: &[u8] = &[0xEE, 0xEE];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Value;

    #[test]
    fn login_pin_layout() {
        let buf = LOGIN_PIN
            .construct(&[("pin", Value::Str("1234".to_string()))])
            .unwrap();
        // header, msg id, type id
        assert_eq!(&buf[..3], &[0xC0, 0x03, 0x01]);
        // 10-byte PIN field, zero padded, at payload offset 3
        assert_eq!(&buf[4..14], &[b'1', b'2', b'3', b'4', 0, 0, 0, 0, 0, 0]);
        // connection method defaults to the mobile-app marker
        assert_eq!(buf[14], 0x03);
    }

    #[test]
    fn create_session_body_is_18_bytes() {
        let buf = CREATE_SESSION.construct(&[]).unwrap();
        assert_eq!(buf.len(), 1 + 1 + 18);
    }

    #[test]
    fn arm_areas_defaults_to_full_set() {
        let buf = ARM_AREAS
            .construct(&[
                ("session", Value::Int(0x0102)),
                ("areas", Value::Bytes(vec![0x01, 0, 0, 0])),
            ])
            .unwrap();
        assert_eq!(&buf[..3], &[0xC0, 0x42, 0x01]);
        // session id little-endian at payload offset 2
        assert_eq!(&buf[3..5], &[0x02, 0x01]);
        assert_eq!(buf[5], SetType::Full.code());
        assert_eq!(&buf[6..10], &[0x01, 0, 0, 0]);
    }

    #[test]
    fn arm_state_table() {
        assert_eq!(SetType::Full.state_setting(), 0x0504);
        assert_eq!(SetType::Full.state_set(), 0x0505);
        assert_eq!(SetType::Full.state_fault(), 0x0501);
        assert_eq!(SetType::Full.state_active(), 0x0502);
        assert_eq!(SetType::Full.state_inhibited(), 0x0503);
        assert_eq!(SetType::Part1.state_setting(), 0x0404);
        assert_eq!(SetType::Part2.state_set(), 0x1005);
    }

    #[test]
    fn short_response_value_is_little_endian() {
        let payload = [0x41, 0x01, 0x34, 0x12];
        assert_eq!(
            SHORT_RESPONSE.get(&payload, "value").unwrap(),
            Some(Value::Int(0x1234))
        );
    }

    #[test]
    fn entity_tags_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_tag(kind.type_tag()), Some(kind));
        }
        assert_eq!(EntityKind::from_tag(0xFE), None);
    }

    #[test]
    fn status_request_is_batchable_length() {
        let buf = GET_STATUS
            .construct(&[
                ("kind", Value::Int(u64::from(EntityKind::Zone.type_tag()))),
                ("id", Value::Int(5)),
            ])
            .unwrap();
        // minus the header this must match the batch embedded length
        assert_eq!(buf.len() - 1, BATCH_STATUS_REQUEST_LEN);
        assert_eq!(buf[4], 5);
    }

    #[test]
    fn zones_assigned_request_is_batchable_length() {
        let buf = GET_ZONES_ASSIGNED.construct(&[("area", Value::Int(2))]).unwrap();
        assert_eq!(buf.len() - 1, BATCH_ZONES_REQUEST_LEN);
    }
}
