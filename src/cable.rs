//! Cable transports and the selector that constructs them.
//!
//! Every supported adapter ends up behind the [`Cable`] trait: a raw JTAG
//! signal surface (TMS stepping plus data shifting) with a verbosity toggle.
//! [`open_cable`] maps a [`CableConfig`] to exactly one boxed transport,
//! filling in the well-known USB ids for a cable kind when the caller did
//! not supply any.

use std::fmt;
use std::str::FromStr;

pub mod ftdi;
pub mod fx2;
pub mod parport;
mod usb;
pub mod xpc;

/// Raw JTAG signal access provided by every cable backend.
///
/// Bits travel LSB first within each byte. `shift_data` with `last` raises
/// TMS on the final clock so the TAP leaves its shift state together with
/// the data.
pub trait Cable {
    /// Clock `bits` TMS values out of `pattern`, TDI held at `tdi`.
    fn shift_tms(&mut self, pattern: u8, bits: usize, tdi: bool) -> Result<(), CableError>;

    /// Clock `bits` data bits out of `tdi`; capture and return TDO bytes
    /// when `capture` is set, otherwise return an empty vector.
    fn shift_data(
        &mut self,
        tdi: &[u8],
        bits: usize,
        capture: bool,
        last: bool,
    ) -> Result<Vec<u8>, CableError>;

    /// Enable per-transfer wire tracing.
    fn set_verbose(&mut self, verbose: bool);
}

/// Transport-level failure inside a cable backend.
#[derive(Debug, thiserror::Error)]
pub enum CableError {
    #[error("USB transfer failed")]
    Usb(#[source] std::io::Error),

    #[error("no USB device matches {vendor:04x}:{product:04x}")]
    NotFound { vendor: u16, product: u16 },

    #[error("parallel port access failed")]
    Port(#[source] std::io::Error),

    #[error("open failed: {0}")]
    OpenFailed(String),

    #[error("unsupported FTDI chip revision {0:#06x}")]
    UnsupportedChip(u16),

    #[error("cable rejected MPSSE command {0:#04x}")]
    BadMpsseCommand(u8),

    #[error("short response from cable: expected {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },
}

/// The supported adapter families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableKind {
    /// Parallel-port bit-banger (DLC5 style).
    Parallel,
    /// FTDI FT2232-family MPSSE bridge.
    Ftdi,
    /// Cypress FX2 running a JTAG shift firmware.
    Fx2,
    /// Xilinx Platform Cable USB.
    Xpc,
}

impl Default for CableKind {
    fn default() -> Self {
        CableKind::Parallel
    }
}

impl CableKind {
    /// The command-line token for this kind.
    pub fn token(self) -> &'static str {
        match self {
            CableKind::Parallel => "pp",
            CableKind::Ftdi => "ftdi",
            CableKind::Fx2 => "fx2",
            CableKind::Xpc => "xpc",
        }
    }
}

impl fmt::Display for CableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for CableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pp" => Ok(CableKind::Parallel),
            "ftdi" => Ok(CableKind::Ftdi),
            "fx2" => Ok(CableKind::Fx2),
            "xpc" => Ok(CableKind::Xpc),
            _ => Err(format!("unknown cable type '{s}' (expected pp, ftdi, fx2 or xpc)")),
        }
    }
}

/// Adapter-specific variant selector.
///
/// `ikda`, `olimex` and `amontec` choose FTDI output-enable wirings,
/// `int` targets the XPC internal chain. Which tokens a cable accepts is
/// checked by the selector, not the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableSubtype {
    Ikda,
    Olimex,
    Amontec,
    Internal,
}

impl CableSubtype {
    pub fn token(self) -> &'static str {
        match self {
            CableSubtype::Ikda => "ikda",
            CableSubtype::Olimex => "olimex",
            CableSubtype::Amontec => "amontec",
            CableSubtype::Internal => "int",
        }
    }
}

impl fmt::Display for CableSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for CableSubtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ikda" => Ok(CableSubtype::Ikda),
            "olimex" => Ok(CableSubtype::Olimex),
            "amontec" => Ok(CableSubtype::Amontec),
            "int" => Ok(CableSubtype::Internal),
            _ => Err(format!(
                "unknown cable subtype '{s}' (expected ikda, olimex, amontec or int)"
            )),
        }
    }
}

/// Everything needed to pick and open one cable. Built once from the command
/// line and consumed by [`open_cable`].
#[derive(Debug, Clone, Default)]
pub struct CableConfig {
    pub kind: CableKind,
    /// Device path, parallel port only.
    pub device: Option<String>,
    pub vendor: Option<u16>,
    pub product: Option<u16>,
    /// USB product string filter.
    pub description: Option<String>,
    /// USB serial number filter.
    pub serial: Option<String>,
    pub subtype: Option<CableSubtype>,
    pub verbose: bool,
}

impl CableConfig {
    /// The vendor:product pair an open attempt will use, with the cable
    /// kind's well-known defaults filled in per field. `None` for the
    /// parallel port, where USB ids are meaningless.
    pub fn resolved_usb_ids(&self) -> Option<(u16, u16)> {
        let (default_vendor, default_product) = match self.kind {
            CableKind::Parallel => return None,
            CableKind::Ftdi => match self.subtype {
                Some(CableSubtype::Olimex) => ftdi::ID_OLIMEX,
                Some(CableSubtype::Amontec) => ftdi::ID_AMONTEC,
                _ => ftdi::ID_DEFAULT,
            },
            CableKind::Fx2 => fx2::ID_DEFAULT,
            CableKind::Xpc => xpc::ID_DEFAULT,
        };
        Some((
            self.vendor.unwrap_or(default_vendor),
            self.product.unwrap_or(default_product),
        ))
    }
}

/// Failure to construct the requested transport.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Could not access USB device {vendor:04x}:{product:04x}.")]
    UsbAccess {
        vendor: u16,
        product: u16,
        #[source]
        source: CableError,
    },

    #[error("Could not access parallel port '{device}'.")]
    ParportAccess {
        device: String,
        #[source]
        source: CableError,
    },

    #[error("subtype '{subtype}' is not valid for the {kind} cable")]
    BadSubtype {
        subtype: CableSubtype,
        kind: CableKind,
    },
}

/// Construct the transport described by `config`.
///
/// Applies default USB ids, validates the subtype against the cable kind
/// before touching hardware, and pushes the verbosity flag into the opened
/// transport.
pub fn open_cable(config: &CableConfig) -> Result<Box<dyn Cable>, OpenError> {
    let mut cable: Box<dyn Cable> = match config.kind {
        CableKind::Parallel => {
            let device = config.device.as_deref().unwrap_or(parport::DEFAULT_DEVICE);
            if config.subtype.is_some() {
                log::debug!("parallel cable has no subtypes, ignoring");
            }
            let port = parport::Parport::open(device).map_err(|source| {
                OpenError::ParportAccess {
                    device: device.to_string(),
                    source,
                }
            })?;
            Box::new(port)
        }
        CableKind::Ftdi => {
            let variant = match config.subtype {
                None => ftdi::FtdiVariant::Plain,
                Some(CableSubtype::Ikda) => ftdi::FtdiVariant::Ikda,
                Some(CableSubtype::Olimex) => ftdi::FtdiVariant::Olimex,
                Some(CableSubtype::Amontec) => ftdi::FtdiVariant::Amontec,
                Some(subtype) => {
                    return Err(OpenError::BadSubtype {
                        subtype,
                        kind: config.kind,
                    });
                }
            };
            let (vendor, product) = config.resolved_usb_ids().unwrap_or(ftdi::ID_DEFAULT);
            let cable = ftdi::FtdiCable::open(
                vendor,
                product,
                config.description.as_deref(),
                config.serial.as_deref(),
                variant,
            )
            .map_err(|source| OpenError::UsbAccess {
                vendor,
                product,
                source,
            })?;
            Box::new(cable)
        }
        CableKind::Fx2 => {
            if config.subtype.is_some() {
                log::debug!("fx2 cable has no subtypes, ignoring");
            }
            let (vendor, product) = config.resolved_usb_ids().unwrap_or(fx2::ID_DEFAULT);
            let cable = fx2::Fx2Cable::open(
                vendor,
                product,
                config.description.as_deref(),
                config.serial.as_deref(),
            )
            .map_err(|source| OpenError::UsbAccess {
                vendor,
                product,
                source,
            })?;
            Box::new(cable)
        }
        CableKind::Xpc => {
            let target = match config.subtype {
                None => xpc::XpcTarget::External,
                Some(CableSubtype::Internal) => xpc::XpcTarget::Internal,
                Some(subtype) => {
                    return Err(OpenError::BadSubtype {
                        subtype,
                        kind: config.kind,
                    });
                }
            };
            let (vendor, product) = config.resolved_usb_ids().unwrap_or(xpc::ID_DEFAULT);
            let cable = xpc::XpcCable::open(
                vendor,
                product,
                config.description.as_deref(),
                config.serial.as_deref(),
                target,
            )
            .map_err(|source| OpenError::UsbAccess {
                vendor,
                product,
                source,
            })?;
            Box::new(cable)
        }
    };
    cable.set_verbose(config.verbose);
    Ok(cable)
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(kind: CableKind, subtype: Option<CableSubtype>) -> CableConfig {
        CableConfig {
            kind,
            subtype,
            ..Default::default()
        }
    }

    #[test]
    fn kind_tokens_round_trip() {
        for kind in [
            CableKind::Parallel,
            CableKind::Ftdi,
            CableKind::Fx2,
            CableKind::Xpc,
        ] {
            assert_eq!(kind.token().parse::<CableKind>(), Ok(kind));
        }
        assert!("usb9".parse::<CableKind>().is_err());
        assert_eq!("FTDI".parse::<CableKind>(), Ok(CableKind::Ftdi));
    }

    #[test]
    fn subtype_tokens_round_trip() {
        for subtype in [
            CableSubtype::Ikda,
            CableSubtype::Olimex,
            CableSubtype::Amontec,
            CableSubtype::Internal,
        ] {
            assert_eq!(subtype.token().parse::<CableSubtype>(), Ok(subtype));
        }
        assert!("xilinx".parse::<CableSubtype>().is_err());
    }

    #[test]
    fn defaults_apply_when_ids_unset() {
        assert_eq!(config(CableKind::Parallel, None).resolved_usb_ids(), None);
        assert_eq!(
            config(CableKind::Ftdi, None).resolved_usb_ids(),
            Some((0x0403, 0x6010))
        );
        assert_eq!(
            config(CableKind::Ftdi, Some(CableSubtype::Ikda)).resolved_usb_ids(),
            Some((0x0403, 0x6010))
        );
        assert_eq!(
            config(CableKind::Ftdi, Some(CableSubtype::Olimex)).resolved_usb_ids(),
            Some((0x15ba, 0x0003))
        );
        assert_eq!(
            config(CableKind::Ftdi, Some(CableSubtype::Amontec)).resolved_usb_ids(),
            Some((0x0403, 0xcff8))
        );
        assert_eq!(
            config(CableKind::Fx2, None).resolved_usb_ids(),
            Some((0xfffe, 0x0002))
        );
        assert_eq!(
            config(CableKind::Xpc, None).resolved_usb_ids(),
            Some((0x03fd, 0x0008))
        );
    }

    #[test]
    fn explicit_ids_win_over_defaults() {
        let mut cfg = config(CableKind::Ftdi, Some(CableSubtype::Olimex));
        cfg.vendor = Some(0x1234);
        assert_eq!(cfg.resolved_usb_ids(), Some((0x1234, 0x0003)));
        cfg.product = Some(0x5678);
        assert_eq!(cfg.resolved_usb_ids(), Some((0x1234, 0x5678)));
    }

    #[test]
    fn mismatched_subtype_is_rejected_before_hardware() {
        let err = open_cable(&config(CableKind::Ftdi, Some(CableSubtype::Internal)))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            OpenError::BadSubtype {
                subtype: CableSubtype::Internal,
                kind: CableKind::Ftdi,
            }
        ));

        let err = open_cable(&config(CableKind::Xpc, Some(CableSubtype::Olimex)))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            OpenError::BadSubtype {
                subtype: CableSubtype::Olimex,
                kind: CableKind::Xpc,
            }
        ));
    }

    #[test]
    fn usb_access_error_reports_resolved_ids() {
        let err = OpenError::UsbAccess {
            vendor: 0x15ba,
            product: 0x0003,
            source: CableError::NotFound {
                vendor: 0x15ba,
                product: 0x0003,
            },
        };
        assert_eq!(err.to_string(), "Could not access USB device 15ba:0003.");
    }
}
