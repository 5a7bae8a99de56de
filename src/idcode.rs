//! IEEE 1149.1 device identification code decoding.

use std::fmt;

/// A 32-bit IDCODE register value.
///
/// Silicon revision sits in the top nibble, the part number below it, then
/// the 11-bit JEDEC manufacturer id. Bit 0 reads 1 for a device that
/// implements IDCODE; a device in BYPASS contributes a single 0 bit instead.
#[bitfield_struct::bitfield(u32, order = Lsb)]
pub struct IdCode {
    pub marker: bool,
    #[bits(11)]
    pub manufacturer: u16,
    #[bits(16)]
    pub part: u16,
    #[bits(4)]
    pub version: u8,
}

impl IdCode {
    /// False for codes that cannot be a captured IDCODE: all-zero, all-one,
    /// or missing the marker bit.
    pub fn plausible(&self) -> bool {
        let raw = u32::from(*self);
        raw != 0 && raw != u32::MAX && self.marker()
    }

    /// JEDEC JEP106 manufacturer name, when assigned.
    pub fn manufacturer_name(&self) -> Option<&'static str> {
        let cont = (self.manufacturer() >> 7) as u8;
        let code = (self.manufacturer() & 0x7f) as u8;
        jep106::JEP106Code::new(cont, code).get()
    }
}

impl fmt::Display for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.manufacturer_name().unwrap_or("unknown");
        write!(
            f,
            "0x{:08X} (version {}, part 0x{:04X}, {})",
            u32::from(*self),
            self.version(),
            self.part(),
            name
        )
    }
}

#[cfg(test)]
mod test {
    use super::IdCode;

    // An ARM debug access port TAP.
    const ARM_DAP: u32 = 0x4BA00477;

    #[test]
    fn field_extraction() {
        let code = IdCode::from(ARM_DAP);
        assert!(code.marker());
        assert_eq!(code.version(), 0x4);
        assert_eq!(code.part(), 0xBA00);
        assert_eq!(code.manufacturer(), 0x23B);
        assert_eq!(code.manufacturer_name(), Some("ARM Ltd"));
    }

    #[test]
    fn plausibility() {
        assert!(IdCode::from(ARM_DAP).plausible());
        assert!(!IdCode::from(0u32).plausible());
        assert!(!IdCode::from(u32::MAX).plausible());
        // marker bit clear
        assert!(!IdCode::from(ARM_DAP & !1).plausible());
    }

    #[test]
    fn display_names_the_manufacturer() {
        let text = IdCode::from(ARM_DAP).to_string();
        assert!(text.starts_with("0x4BA00477"));
        assert!(text.contains("ARM Ltd"));
    }
}
