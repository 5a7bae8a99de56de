//! FTDI MPSSE cable backend for FT2232-family bridges.

use std::time::Duration;

use futures_lite::future::{block_on, zip};
use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer};

use crate::cable::{Cable, CableError, usb};
use crate::mpsse::MpsseCmdBuilder;

pub const ID_DEFAULT: (u16, u16) = (0x0403, 0x6010);
pub const ID_OLIMEX: (u16, u16) = (0x15ba, 0x0003);
pub const ID_AMONTEC: (u16, u16) = (0x0403, 0xcff8);

// JTAG on ADBUS0..3, AN108 2.2 ordering.
const TCK: u8 = 1 << 0;
const TDI: u8 = 1 << 1;
#[allow(unused)]
const TDO: u8 = 1 << 2;
const TMS: u8 = 1 << 3;

const TCK_FREQUENCY_HZ: usize = 6_000_000;
const IO_TIMEOUT: Duration = Duration::from_secs(1);

// MPSSE lives on interface A.
const INTERFACE_INDEX: u16 = 1;
const WRITE_EP: u8 = 0x02;
const READ_EP: u8 = 0x81;

const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;
const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
const SIO_SET_BITMODE_REQUEST: u8 = 0x0B;
const BITMODE_MPSSE: u8 = 2;

/// FT2232-family revisions with a working MPSSE, from `bcdDevice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChipKind {
    Ft2232d,
    Ft2232h,
    Ft4232h,
    Ft232h,
}

impl ChipKind {
    fn from_device_version(version: u16) -> Option<ChipKind> {
        match version {
            0x500 => Some(ChipKind::Ft2232d),
            0x700 => Some(ChipKind::Ft2232h),
            0x800 => Some(ChipKind::Ft4232h),
            0x900 => Some(ChipKind::Ft232h),
            _ => None,
        }
    }

    /// Highest TCK in Hz and whether the divide-by-5 prescaler exists.
    fn clock_base(self) -> (usize, Option<bool>) {
        match self {
            ChipKind::Ft2232d => (6_000_000, None),
            ChipKind::Ft2232h | ChipKind::Ft4232h | ChipKind::Ft232h => (30_000_000, Some(false)),
        }
    }
}

/// Output-enable wiring variants of otherwise identical FT2232 boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtdiVariant {
    /// Plain breakout, only the four JTAG lines driven.
    #[default]
    Plain,
    /// IKDA boards gate the header through ACBUS2, active low.
    Ikda,
    /// Olimex ARM-USB-OCD: ADBUS4 enables the drivers (low), ACBUS3 is a LED.
    Olimex,
    /// Amontec JTAGkey: ADBUS4 is the active-low JTAG enable.
    Amontec,
}

struct GpioSetup {
    low_value: u8,
    low_dir: u8,
    high: Option<(u8, u8)>,
}

impl FtdiVariant {
    fn gpio(self) -> GpioSetup {
        // TCK idles low, TMS idles high.
        let low_dir = TCK | TDI | TMS;
        let low_value = TMS;
        match self {
            FtdiVariant::Plain => GpioSetup {
                low_value,
                low_dir,
                high: None,
            },
            FtdiVariant::Ikda => GpioSetup {
                low_value,
                low_dir,
                high: Some((0, 1 << 2)),
            },
            FtdiVariant::Olimex => GpioSetup {
                low_value,
                low_dir: low_dir | 1 << 4,
                high: Some((0, 1 << 3)),
            },
            FtdiVariant::Amontec => GpioSetup {
                low_value,
                low_dir: low_dir | 1 << 4,
                high: None,
            },
        }
    }
}

pub struct FtdiCable {
    interface: nusb::Interface,
    max_packet_size: usize,
    verbose: bool,
}

impl FtdiCable {
    /// Open, claim and switch a matching bridge into MPSSE mode with the
    /// variant's pin setup applied.
    pub fn open(
        vendor: u16,
        product: u16,
        description: Option<&str>,
        serial: Option<&str>,
        variant: FtdiVariant,
    ) -> Result<Self, CableError> {
        let info = usb::find_device(vendor, product, description, serial)?;
        let chip = ChipKind::from_device_version(info.device_version())
            .ok_or(CableError::UnsupportedChip(info.device_version()))?;
        let device = info.open().map_err(CableError::Usb)?;
        let max_packet_size = device
            .active_configuration()
            .map_err(|e| CableError::Usb(e.into()))?
            .interface_alt_settings()
            .next()
            .ok_or_else(|| CableError::OpenFailed("no interface descriptor".to_string()))?
            .endpoints()
            .next()
            .ok_or_else(|| CableError::OpenFailed("no endpoint descriptor".to_string()))?
            .max_packet_size();
        let interface = device
            .detach_and_claim_interface(0)
            .map_err(CableError::Usb)?;

        let mut cable = FtdiCable {
            interface,
            max_packet_size,
            verbose: false,
        };
        cable.init(chip, variant)?;
        log::debug!("{chip:?} ({variant:?} wiring) up at {TCK_FREQUENCY_HZ} Hz");
        Ok(cable)
    }

    fn init(&mut self, chip: ChipKind, variant: FtdiVariant) -> Result<(), CableError> {
        self.sio_write(SIO_RESET_REQUEST, SIO_RESET_SIO)?;
        self.sio_write(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX)?;
        self.sio_write(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX)?;
        self.sio_write(SIO_SET_LATENCY_TIMER_REQUEST, 16)?;
        self.sio_write(
            SIO_SET_BITMODE_REQUEST,
            u16::from_le_bytes([0, BITMODE_MPSSE]),
        )?;

        let (base_hz, div_by5) = chip.clock_base();
        let gpio = variant.gpio();
        let mut cmd = MpsseCmdBuilder::new();
        cmd.enable_loopback(false);
        if div_by5.is_some() {
            cmd.enable_3phase_clocking(false)
                .enable_adaptive_clocking(false);
        }
        cmd.set_clock(clock_divisor(base_hz, TCK_FREQUENCY_HZ), div_by5);
        cmd.set_gpio_lower(gpio.low_value, gpio.low_dir);
        if let Some((value, direction)) = gpio.high {
            cmd.set_gpio_upper(value, direction);
        }
        self.transfer(cmd)?;
        Ok(())
    }

    fn sio_write(&self, request: u8, value: u16) -> Result<(), CableError> {
        self.interface
            .control_out_blocking(
                Control {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: INTERFACE_INDEX,
                },
                &[],
                IO_TIMEOUT,
            )
            .map_err(|e| CableError::Usb(e.into()))?;
        Ok(())
    }

    /// Flush one command batch and collect its response bytes.
    fn transfer(&self, cmd: MpsseCmdBuilder) -> Result<Vec<u8>, CableError> {
        let (bytes, read_len) = cmd.finish();
        let mut response = vec![0u8; read_len];
        self.write_read(&bytes, &mut response)?;
        Ok(response)
    }

    /// Paired bulk write/read. Every IN packet starts with two modem status
    /// bytes that carry no shift data; a 0xFA status flags a rejected
    /// command and names it in the following byte.
    fn write_read(&self, write: &[u8], read: &mut [u8]) -> Result<(), CableError> {
        let write = async {
            for batch in write.chunks(self.max_packet_size) {
                self.interface
                    .bulk_out(WRITE_EP, Vec::from(batch))
                    .await
                    .into_result()
                    .map_err(|e| CableError::Usb(e.into()))?;
            }
            Result::<(), CableError>::Ok(())
        };
        let read = async {
            let mut read_len = 0;
            while read_len < read.len() {
                let packet = self
                    .interface
                    .bulk_in(READ_EP, RequestBuffer::new(self.max_packet_size))
                    .await
                    .into_result()
                    .map_err(|e| CableError::Usb(e.into()))?;
                if packet.len() > 2 {
                    let (status, data) = packet.split_at(2);
                    if status[0] == 0xFA {
                        return Err(CableError::BadMpsseCommand(status[1]));
                    }
                    let take = data.len().min(read.len() - read_len);
                    read[read_len..read_len + take].copy_from_slice(&data[..take]);
                    read_len += take;
                }
            }
            Result::<(), CableError>::Ok(())
        };
        let (wrote, got) = block_on(zip(write, read));
        wrote.and(got)
    }
}

impl Cable for FtdiCable {
    fn shift_tms(&mut self, pattern: u8, bits: usize, tdi: bool) -> Result<(), CableError> {
        assert!(bits <= 8, "TMS patterns are at most one byte");
        if self.verbose {
            log::trace!("mpsse tms {pattern:#010b} ({bits} bits)");
        }
        let mut cmd = MpsseCmdBuilder::new();
        // one TMS command moves at most 7 bits
        if bits > 7 {
            cmd.tms_out(pattern & 0x7f, 7, tdi);
            cmd.tms_out(pattern >> 7, bits - 7, tdi);
        } else {
            cmd.tms_out(pattern, bits, tdi);
        }
        self.transfer(cmd)?;
        Ok(())
    }

    fn shift_data(
        &mut self,
        tdi: &[u8],
        bits: usize,
        capture: bool,
        last: bool,
    ) -> Result<Vec<u8>, CableError> {
        assert!(bits >= 1, "empty shift");
        assert!(bits <= tdi.len() * 8, "TDI buffer shorter than bit count");
        if self.verbose {
            log::trace!("mpsse shift {bits} bits, capture={capture}, last={last}");
        }
        // The final bit travels in a TMS command so TMS can rise with it.
        let body = if last { bits - 1 } else { bits };
        let full_bytes = body / 8;
        let rem_bits = body % 8;

        let mut cmd = MpsseCmdBuilder::new();
        if capture {
            cmd.shift_bytes_io(&tdi[..full_bytes]);
            if rem_bits > 0 {
                cmd.shift_bits_io(tdi[full_bytes], rem_bits);
            }
        } else {
            cmd.shift_bytes_out(&tdi[..full_bytes]);
            if rem_bits > 0 {
                cmd.shift_bits_out(tdi[full_bytes], rem_bits);
            }
        }
        if last {
            let last_bit = tdi[(bits - 1) / 8] >> ((bits - 1) % 8) & 1 == 1;
            if capture {
                cmd.tms_io(1, 1, last_bit);
            } else {
                cmd.tms_out(1, 1, last_bit);
            }
        }

        let response = self.transfer(cmd)?;
        if !capture {
            return Ok(Vec::new());
        }
        Ok(repack_capture(&response, full_bytes, rem_bits, last, bits))
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

fn clock_divisor(base_hz: usize, target_hz: usize) -> u16 {
    let steps = base_hz.div_ceil(target_hz).clamp(1, u16::MAX as usize + 1);
    (steps - 1) as u16
}

/// Reassemble LSB-first capture bytes from an MPSSE response: full bytes
/// come back as-is, a partial-bit read arrives left-justified and the TMS
/// capture bit lands in bit 7 of its own byte.
fn repack_capture(
    response: &[u8],
    full_bytes: usize,
    rem_bits: usize,
    last: bool,
    bits: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; bits.div_ceil(8)];
    out[..full_bytes].copy_from_slice(&response[..full_bytes]);
    let mut next = full_bytes;
    if rem_bits > 0 {
        out[full_bytes] = response[next] >> (8 - rem_bits);
        next += 1;
    }
    if last {
        let bit = response[next] >> 7 & 1;
        out[(bits - 1) / 8] |= bit << ((bits - 1) % 8);
    }
    out
}
