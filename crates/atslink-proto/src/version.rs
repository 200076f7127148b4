//! Firmware string to protocol version mapping.
//!
//! Firmware strings look like `MR_4.1.38741`. Panels below major 22 encode
//! the protocol version as `major * 1000 + minor`; from major 22 on, the
//! major alone is the version.

/// Parse `PREFIX_M.m.build` into the protocol version integer.
///
/// `None` when the string does not match the firmware shape.
#[must_use]
pub fn protocol_version(firmware: &str) -> Option<u32> {
    let (_, rest) = firmware.split_once('_')?;
    let mut parts = rest.split('.');

    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;

    if major <= 21 { Some(major * 1000 + minor) } else { Some(major) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_firmware_packs_major_and_minor() {
        assert_eq!(protocol_version("MR_4.1.38741"), Some(4001));
    }

    #[test]
    fn new_firmware_uses_major_only() {
        assert_eq!(protocol_version("MR_22.3.0"), Some(22));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(protocol_version("GARBAGE"), None);
        assert_eq!(protocol_version("MR_x.y.z"), None);
        assert_eq!(protocol_version("MR_4"), None);
    }
}
