//! Cypress FX2 cable backend (USRP-style JTAG shift firmware).
//!
//! The firmware exposes a simple bulk protocol: a four-byte header
//! (opcode, little-endian bit count, flags) followed by packed TDI bytes;
//! replies carry packed TDO bytes when capture was requested.

use futures_lite::future::{block_on, zip};
use nusb::transfer::RequestBuffer;

use crate::cable::{Cable, CableError, usb};

pub const ID_DEFAULT: (u16, u16) = (0xfffe, 0x0002);

const WRITE_EP: u8 = 0x02;
const READ_EP: u8 = 0x86;
const MAX_PACKET: usize = 512;

const CMD_SHIFT_DATA: u8 = 0x01;
const CMD_SHIFT_TMS: u8 = 0x02;

const FLAG_CAPTURE: u8 = 0x01;
const FLAG_LAST: u8 = 0x02;
const FLAG_TDI_HIGH: u8 = 0x04;

pub struct Fx2Cable {
    interface: nusb::Interface,
    verbose: bool,
}

impl Fx2Cable {
    pub fn open(
        vendor: u16,
        product: u16,
        description: Option<&str>,
        serial: Option<&str>,
    ) -> Result<Self, CableError> {
        let info = usb::find_device(vendor, product, description, serial)?;
        let device = info.open().map_err(CableError::Usb)?;
        let interface = device
            .detach_and_claim_interface(0)
            .map_err(CableError::Usb)?;
        log::debug!("fx2 firmware claimed at {vendor:04x}:{product:04x}");
        Ok(Fx2Cable {
            interface,
            verbose: false,
        })
    }

    /// Send one framed command and collect the reply bytes it announces.
    fn command(
        &self,
        opcode: u8,
        flags: u8,
        bits: usize,
        payload: &[u8],
    ) -> Result<Vec<u8>, CableError> {
        assert!(bits > 0 && bits <= u16::MAX as usize, "bit count out of frame range");
        let mut packet = Vec::with_capacity(4 + payload.len());
        packet.extend_from_slice(&[opcode, (bits & 0xFF) as u8, (bits >> 8) as u8, flags]);
        packet.extend_from_slice(payload);

        let expected = if flags & FLAG_CAPTURE != 0 {
            bits.div_ceil(8)
        } else {
            0
        };
        let mut reply = vec![0u8; expected];

        let write = async {
            for batch in packet.chunks(MAX_PACKET) {
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
        Ok(reply)
    }
}

impl Cable for Fx2Cable {
    fn shift_tms(&mut self, pattern: u8, bits: usize, tdi: bool) -> Result<(), CableError> {
        assert!(bits <= 8, "TMS patterns are at most one byte");
        if self.verbose {
            log::trace!("fx2 tms {pattern:#010b} ({bits} bits)");
        }
        let flags = if tdi { FLAG_TDI_HIGH } else { 0 };
        self.command(CMD_SHIFT_TMS, flags, bits, &[pattern])?;
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
            log::trace!("fx2 shift {bits} bits, capture={capture}, last={last}");
        }
        let mut flags = 0;
        if capture {
            flags |= FLAG_CAPTURE;
        }
        if last {
            flags |= FLAG_LAST;
        }
        self.command(CMD_SHIFT_DATA, flags, bits, &tdi[..bits.div_ceil(8)])
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}
