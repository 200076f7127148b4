//! Panel descriptor parsed from the plain `device_info` boot query.

use atslink_proto::messages::device_info_layout;
use atslink_proto::serial::{SERIAL_LEN, decode_serial, looks_like_serial};
use atslink_proto::template::fixed_str;
use atslink_proto::version::protocol_version;

use crate::error::ClientError;

/// Fallback limits for a model the table does not know.
const DEFAULT_LIMITS: (u16, u16) = (4, 240);

/// Immutable descriptor of the connected panel.
///
/// Created once per connection from the `device_info` reply; everything
/// model-dependent (entity limits, name format, log record size, login
/// flavour) keys off this.
#[derive(Debug, Clone)]
pub struct PanelInfo {
    /// Product name as reported, e.g. `ATS1500A-IP`.
    pub product: String,
    /// Model tag extracted from the product name, e.g. `ATS1500`.
    pub model: Option<String>,
    /// Firmware string, e.g. `MR_4.1.38741`.
    pub firmware: String,
    /// Protocol version derived from the firmware string.
    pub protocol_version: Option<u32>,
    /// 16-character serial as reported, when it matched the wire shape.
    pub serial_text: Option<String>,
    /// Decoded 6-byte hardware serial; zeros when undecodable.
    pub serial: [u8; SERIAL_LEN],
    /// Encryption-mode indicator byte, surfaced for diagnostics only.
    pub encryption_mode: u8,
    /// Highest area number this model supports.
    pub max_areas: u16,
    /// Highest zone number this model supports.
    pub max_zones: u16,
}

impl PanelInfo {
    /// Parse the header-stripped `device_info` reply payload.
    ///
    /// # Errors
    ///
    /// - `ClientError::MalformedResponse` when the payload is too short to
    ///   carry the descriptor
    pub fn from_payload(payload: &[u8]) -> Result<Self, ClientError> {
        let (product_at, product_len) = device_info_layout::PRODUCT;
        let (firmware_at, firmware_len) = device_info_layout::FIRMWARE;
        let (serial_at, serial_len) = device_info_layout::SERIAL;

        let product = fixed_str(payload, product_at, product_len).ok_or_else(|| {
            ClientError::MalformedResponse {
                operation: "device_info",
                reason: format!("payload of {} bytes is too short", payload.len()),
            }
        })?;
        let firmware = fixed_str(payload, firmware_at, firmware_len).unwrap_or_default();
        let serial_field = fixed_str(payload, serial_at, serial_len).unwrap_or_default();
        let encryption_mode = payload.get(device_info_layout::MODE).copied().unwrap_or(0);

        let model = extract_model(&product);
        let (max_areas, max_zones) =
            model.as_deref().map_or(DEFAULT_LIMITS, model_limits);

        let serial_text = looks_like_serial(&serial_field).then_some(serial_field);
        let serial = serial_text
            .as_deref()
            .and_then(|text| decode_serial(text).ok())
            .unwrap_or([0u8; SERIAL_LEN]);

        Ok(Self {
            protocol_version: protocol_version(&firmware),
            product,
            model,
            firmware,
            serial_text,
            serial,
            encryption_mode,
            max_areas,
            max_zones,
        })
    }

    /// Whether this is an x700 panel: account login, 30-byte names, 60-byte
    /// log records, no valid-areas query.
    #[must_use]
    pub fn is_extended_family(&self) -> bool {
        self.model
            .as_deref()
            .is_some_and(|m| m.ends_with("700"))
    }

    /// Whether name pages use the extended 30-byte format: every x700
    /// panel, and x500 panels from protocol 4004 on.
    #[must_use]
    pub fn uses_extended_names(&self) -> bool {
        if self.is_extended_family() {
            return true;
        }
        self.model.as_deref().is_some_and(|m| m.ends_with("500"))
            && self.protocol_version.is_some_and(|v| v >= 4004)
    }

    /// Event-log record length for this family.
    #[must_use]
    pub fn log_record_len(&self) -> usize {
        if self.is_extended_family() { 60 } else { 70 }
    }
}

/// `ATS` followed by digits, anywhere in the product name.
fn extract_model(product: &str) -> Option<String> {
    let at = product.find("ATS")?;
    let digits: String =
        product[at + 3..].chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("ATS{digits}"))
}

/// Maximum areas and zones per model tag.
fn model_limits(model: &str) -> (u16, u16) {
    match model {
        "ATS1000" => (4, 16),
        "ATS1500" | "ATS1700" => (4, 48),
        "ATS2000" | "ATS2700" => (8, 64),
        "ATS3500" | "ATS3700" => (8, 128),
        "ATS4500" | "ATS4700" => (16, 240),
        _ => DEFAULT_LIMITS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_info_payload(product: &str, firmware: &str, serial: &str) -> Vec<u8> {
        let mut payload = vec![0u8; 51];
        payload[0] = 0x00;
        payload[1] = 0x01;
        payload[2..2 + product.len()].copy_from_slice(product.as_bytes());
        payload[18..18 + firmware.len()].copy_from_slice(firmware.as_bytes());
        payload[34..34 + serial.len()].copy_from_slice(serial.as_bytes());
        payload[50] = 0x01;
        payload
    }

    #[test]
    fn parses_standard_panel() {
        let payload = device_info_payload("ATS1500A-IP", "MR_4.1.38741", "ABCDEFGHIJKLMNOP");
        let info = PanelInfo::from_payload(&payload).unwrap();

        assert_eq!(info.model.as_deref(), Some("ATS1500"));
        assert_eq!(info.protocol_version, Some(4001));
        assert_eq!(info.max_areas, 4);
        assert_eq!(info.max_zones, 48);
        assert!(!info.is_extended_family());
        assert!(info.serial_text.is_some());
        assert_ne!(info.serial, [0u8; 6]);
        assert_eq!(info.log_record_len(), 70);
    }

    #[test]
    fn x700_is_extended_family() {
        let payload = device_info_payload("ATS3700", "MR_22.3.0", "");
        let info = PanelInfo::from_payload(&payload).unwrap();

        assert!(info.is_extended_family());
        assert!(info.uses_extended_names());
        assert_eq!(info.protocol_version, Some(22));
        assert_eq!(info.log_record_len(), 60);
        assert_eq!(info.serial, [0u8; 6]);
    }

    #[test]
    fn x500_gains_extended_names_at_4004() {
        let old = device_info_payload("ATS1500", "MR_4.1.38741", "");
        assert!(!PanelInfo::from_payload(&old).unwrap().uses_extended_names());

        let new = device_info_payload("ATS1500", "MR_4.4.1", "");
        assert!(PanelInfo::from_payload(&new).unwrap().uses_extended_names());
    }

    #[test]
    fn unknown_model_gets_default_limits() {
        let payload = device_info_payload("FUTURE9000", "MR_4.1.0", "");
        let info = PanelInfo::from_payload(&payload).unwrap();
        assert_eq!(info.model, None);
        assert_eq!((info.max_areas, info.max_zones), DEFAULT_LIMITS);
    }
}
