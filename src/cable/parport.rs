//! Parallel-port bit-banger for DLC5-style cables via Linux ppdev.
//!
//! TDI, TCK and TMS sit on data bits 0..2; TDO comes back on status bit 4.
//! One TCK cycle costs two data writes, so this transport is slow and only
//! suited to short scans.

#![allow(unsafe_code)] // generated ppdev ioctl calls

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;

use crate::cable::{Cable, CableError};

pub(crate) const DEFAULT_DEVICE: &str = "/dev/parport0";

const TDI: u8 = 0x01;
const TCK: u8 = 0x02;
const TMS: u8 = 0x04;
const TDO_STATUS: u8 = 0x10;

const PP_IOCTL: u8 = b'p';
nix::ioctl_read!(pp_read_status, PP_IOCTL, 0x81, nix::libc::c_uchar);
nix::ioctl_write_ptr!(pp_write_data, PP_IOCTL, 0x86, nix::libc::c_uchar);
nix::ioctl_none!(pp_claim, PP_IOCTL, 0x8b);
nix::ioctl_none!(pp_release, PP_IOCTL, 0x8c);

pub struct Parport {
    file: File,
    verbose: bool,
}

impl Parport {
    /// Open and claim a ppdev device node.
    pub fn open(device: &str) -> Result<Self, CableError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(CableError::Port)?;
        unsafe { pp_claim(file.as_raw_fd()) }.map_err(errno_to_port_error)?;
        let mut port = Parport {
            file,
            verbose: false,
        };
        // park all lines low, TCK idle low
        port.write_data(0)?;
        log::debug!("claimed {device}");
        Ok(port)
    }

    fn write_data(&mut self, value: u8) -> Result<(), CableError> {
        unsafe { pp_write_data(self.file.as_raw_fd(), &value) }.map_err(errno_to_port_error)?;
        Ok(())
    }

    fn read_tdo(&mut self) -> Result<bool, CableError> {
        let mut status: nix::libc::c_uchar = 0;
        unsafe { pp_read_status(self.file.as_raw_fd(), &mut status) }
            .map_err(errno_to_port_error)?;
        Ok(status & TDO_STATUS != 0)
    }

    /// One TCK cycle: present TDI/TMS with the clock low, sample TDO, then
    /// raise the clock. The next cycle's first write produces the falling
    /// edge.
    fn clock(&mut self, tms: bool, tdi: bool, sample: bool) -> Result<bool, CableError> {
        let mut lines = 0;
        if tdi {
            lines |= TDI;
        }
        if tms {
            lines |= TMS;
        }
        self.write_data(lines)?;
        let bit = if sample { self.read_tdo()? } else { false };
        self.write_data(lines | TCK)?;
        Ok(bit)
    }
}

fn errno_to_port_error(errno: nix::errno::Errno) -> CableError {
    CableError::Port(errno.into())
}

impl Cable for Parport {
    fn shift_tms(&mut self, pattern: u8, bits: usize, tdi: bool) -> Result<(), CableError> {
        assert!(bits <= 8, "TMS patterns are at most one byte");
        for i in 0..bits {
            let tms = pattern >> i & 1 == 1;
            self.clock(tms, tdi, false)?;
        }
        self.write_data(if tdi { TDI } else { 0 })?;
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
            log::trace!("pp shift {bits} bits, capture={capture}, last={last}");
        }
        let mut out = vec![0u8; if capture { bits.div_ceil(8) } else { 0 }];
        for i in 0..bits {
            let tdi_bit = tdi[i / 8] >> (i % 8) & 1 == 1;
            let tms = last && i == bits - 1;
            if self.clock(tms, tdi_bit, capture)? && capture {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        self.write_data(0)?;
        Ok(out)
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}

impl Drop for Parport {
    fn drop(&mut self) {
        if let Err(err) = unsafe { pp_release(self.file.as_raw_fd()) } {
            log::debug!("releasing parallel port failed: {err}");
        }
    }
}
