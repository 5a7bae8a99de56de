//! Xilinx Platform Cable USB backend.
//!
//! Vendor control requests handle setup (firmware probe, output enable);
//! shift traffic goes to the cable CPLD as 16-bit words, each encoding up
//! to four TCK cycles: TMS values in bits 0..4, TDI in bits 4..8, a capture
//! mask in bits 8..12. Bit 12 routes the word to the internal CPLD chain
//! instead of the external header.

use std::time::Duration;

use futures_lite::future::{block_on, zip};
use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer};

use crate::cable::{Cable, CableError, usb};

pub const ID_DEFAULT: (u16, u16) = (0x03fd, 0x0008);

const WRITE_EP: u8 = 0x02;
const READ_EP: u8 = 0x86;
const MAX_PACKET: usize = 512;
const IO_TIMEOUT: Duration = Duration::from_secs(1);

const XPC_REQUEST: u8 = 0xb0;
const VALUE_FIRMWARE_VERSION: u16 = 0x0050;
const VALUE_ENABLE_OUTPUTS: u16 = 0x0018;
const VALUE_DISABLE_OUTPUTS: u16 = 0x0010;

const CLOCKS_PER_WORD: usize = 4;
const WORD_INTERNAL: u16 = 1 << 12;

/// Which chain the cable drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XpcTarget {
    /// The external JTAG header.
    #[default]
    External,
    /// The cable's own CPLD chain.
    Internal,
}

struct ClockOp {
    tms: bool,
    tdi: bool,
    capture: bool,
}

pub struct XpcCable {
    interface: nusb::Interface,
    target: XpcTarget,
    verbose: bool,
}

impl XpcCable {
    pub fn open(
        vendor: u16,
        product: u16,
        description: Option<&str>,
        serial: Option<&str>,
        target: XpcTarget,
    ) -> Result<Self, CableError> {
        let info = usb::find_device(vendor, product, description, serial)?;
        let device = info.open().map_err(CableError::Usb)?;
        let interface = device
            .detach_and_claim_interface(0)
            .map_err(CableError::Usb)?;
        let cable = XpcCable {
            interface,
            target,
            verbose: false,
        };

        let mut version = [0u8; 2];
        cable.control_in(VALUE_FIRMWARE_VERSION, &mut version)?;
        log::debug!(
            "xpc firmware {}.{}, driving the {target:?} chain",
            version[1],
            version[0]
        );
        cable.control_out(VALUE_ENABLE_OUTPUTS)?;
        Ok(cable)
    }

    fn control_out(&self, value: u16) -> Result<(), CableError> {
        self.interface
            .control_out_blocking(
                Control {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: XPC_REQUEST,
                    value,
                    index: 0,
                },
                &[],
                IO_TIMEOUT,
            )
            .map_err(|e| CableError::Usb(e.into()))?;
        Ok(())
    }

    fn control_in(&self, value: u16, data: &mut [u8]) -> Result<(), CableError> {
        self.interface
            .control_in_blocking(
                Control {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: XPC_REQUEST,
                    value,
                    index: 0,
                },
                data,
                IO_TIMEOUT,
            )
            .map_err(|e| CableError::Usb(e.into()))?;
        Ok(())
    }

    /// Run a batch of TCK cycles through the CPLD word protocol and return
    /// the captured TDO bits in clock order.
    fn clock_run(&self, ops: &[ClockOp]) -> Result<Vec<bool>, CableError> {
        let internal = match self.target {
            XpcTarget::External => 0,
            XpcTarget::Internal => WORD_INTERNAL,
        };
        let mut wire = Vec::with_capacity(ops.len().div_ceil(CLOCKS_PER_WORD) * 2);
        let mut capture_any = false;
        for chunk in ops.chunks(CLOCKS_PER_WORD) {
            let mut word = internal;
            for (slot, op) in chunk.iter().enumerate() {
                if op.tms {
                    word |= 1 << slot;
                }
                if op.tdi {
                    word |= 1 << (slot + 4);
                }
                if op.capture {
                    word |= 1 << (slot + 8);
                    capture_any = true;
                }
            }
            wire.extend_from_slice(&word.to_le_bytes());
        }

        let words = wire.len() / 2;
        let mut reply = vec![0u8; if capture_any { words } else { 0 }];

        let write = async {
            for batch in wire.chunks(MAX_PACKET) {
                self.interface
                    .bulk_out(WRITE_EP, Vec::from(batch))
                    .await
                    .into_result()
                    .map_err(|e| CableError::Usb(e.into()))?;
            }
            Result::<(), CableError>::Ok(())
        };
        let read = async {
            let mut got = 0;
            while got < reply.len() {
                let chunk = self
                    .interface
                    .bulk_in(READ_EP, RequestBuffer::new(MAX_PACKET))
                    .await
                    .into_result()
                    .map_err(|e| CableError::Usb(e.into()))?;
                if chunk.is_empty() {
                    return Err(CableError::ShortResponse {
                        expected: reply.len(),
                        got,
                    });
                }
                let take = chunk.len().min(reply.len() - got);
                reply[got..got + take].copy_from_slice(&chunk[..take]);
                got += take;
            }
            Result::<(), CableError>::Ok(())
        };
        let (wrote, got) = block_on(zip(write, read));
        wrote.and(got)?;

        // each reply byte carries its word's captured bits in the low nibble
        let mut bits = Vec::new();
        for (index, op) in ops.iter().enumerate() {
            if op.capture {
                let byte = reply[index / CLOCKS_PER_WORD];
                bits.push(byte >> (index % CLOCKS_PER_WORD) & 1 == 1);
            }
        }
        Ok(bits)
    }
}

impl Cable for XpcCable {
    fn shift_tms(&mut self, pattern: u8, bits: usize, tdi: bool) -> Result<(), CableError> {
        assert!(bits <= 8, "TMS patterns are at most one byte");
        if self.verbose {
            log::trace!("xpc tms {pattern:#010b} ({bits} bits)");
        }
        let ops = (0..bits)
            .map(|i| ClockOp {
                tms: pattern >> i & 1 == 1,
                tdi,
                capture: false,
            })
            .collect::<Vec<_>>();
        self.clock_run(&ops)?;
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
            log::trace!("xpc shift {bits} bits, capture={capture}, last={last}");
        }
        let ops = (0..bits)
            .map(|i| ClockOp {
                tms: last && i == bits - 1,
                tdi: tdi[i / 8] >> (i % 8) & 1 == 1,
                capture,
            })
            .collect::<Vec<_>>();
        let tdo = self.clock_run(&ops)?;
        if !capture {
            return Ok(Vec::new());
        }
        let mut out = vec![0u8; bits.div_ceil(8)];
        for (i, bit) in tdo.iter().enumerate() {
            if *bit {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(out)
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

impl Drop for XpcCable {
    fn drop(&mut self) {
        if let Err(err) = self.control_out(VALUE_DISABLE_OUTPUTS) {
            log::debug!("disabling xpc outputs failed: {err}");
        }
    }
}
