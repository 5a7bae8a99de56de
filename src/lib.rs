//! JTAG boundary-scan chain detection.
//!
//! Walks the scan chain behind a debug cable, reads the IDCODE of every
//! device on it and resolves each code to a part name and instruction
//! register width via a line-oriented device list. The result is one
//! report line per chain position, nearest-TDI first.
//!
//! Supported cables:
//!
//! * Linux parallel-port bit-banger (DLC5 style) via ppdev
//! * FTDI FT2232-family MPSSE bridges, including the IKDA, Olimex and
//!   Amontec wirings
//! * Cypress FX2 boards running a JTAG shift firmware
//! * Xilinx Platform Cable USB, external or internal chain
//!
//! **Note:**
//! USB cables are accessed directly through the kernel's usbfs, so Linux
//! users need udev rules (or root) for the cable's vendor:product pair;
//! the parallel port needs read/write access to `/dev/parportN`.

#![deny(unsafe_code)]

pub mod cable;
pub mod chain;
pub mod detect;
pub mod devicedb;
pub mod idcode;
mod mpsse;
