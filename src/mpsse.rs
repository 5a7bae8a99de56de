//! Command builder for the FTDI Multi-Protocol Synchronous Serial Engine.
//!
//! Commands are batched into a byte vector and flushed in one bulk transfer;
//! the builder tracks how many response bytes the batch will produce. Opcode
//! layout follows FTDI AN108.

/// Fixed-function MPSSE opcodes.
#[repr(u8)]
#[derive(Debug, Copy, Clone)]
enum Opcode {
    SetDataBitsLowbyte = 0x80,
    SetDataBitsHighbyte = 0x82,
    EnableLoopback = 0x84,
    DisableLoopback = 0x85,
    SetClockDivisor = 0x86,
    SendImmediate = 0x87,
    DisableClockDivideBy5 = 0x8A,
    EnableClockDivideBy5 = 0x8B,
    Enable3PhaseClocking = 0x8C,
    Disable3PhaseClocking = 0x8D,
    EnableAdaptiveClocking = 0x96,
    DisableAdaptiveClocking = 0x97,
}

/// Data-shift opcode byte (AN108 3.2).
///
/// The JTAG convention is fixed here: TCK idles low, TDI launches on the
/// falling edge, TDO samples on the rising edge, bits travel LSB first
/// (AN108 2.2).
#[bitfield_struct::bitfield(u8, order = Lsb)]
struct ShiftCmd {
    write_neg: bool,
    #[bits(default = true)] // constant for TMS commands
    bit_mode: bool,
    read_neg: bool,
    #[bits(default = true)] // constant for TMS commands
    lsb_first: bool,
    write_tdi: bool,
    read_tdo: bool,
    #[bits(default = false)]
    write_tms: bool,
    #[bits(default = false)]
    _const_0: bool,
}

impl ShiftCmd {
    fn data(bit_mode: bool, write: bool, read: bool) -> u8 {
        debug_assert!(write || read, "a shift must move data in some direction");
        ShiftCmd::new()
            .with_write_neg(write)
            .with_bit_mode(bit_mode)
            .with_read_neg(false)
            .with_lsb_first(true)
            .with_write_tdi(write)
            .with_read_tdo(read)
            .into()
    }

    fn tms(read: bool) -> u8 {
        ShiftCmd::new()
            .with_write_neg(true)
            .with_read_neg(false)
            .with_read_tdo(read)
            .with_write_tms(true)
            .into()
    }
}

const MAX_BYTE_SHIFT: usize = 65536;
const MAX_BIT_SHIFT: usize = 8;
const MAX_TMS_SHIFT: usize = 7;

/// Batches MPSSE commands and the expected response length.
#[derive(Default)]
pub(crate) struct MpsseCmdBuilder {
    cmd: Vec<u8>,
    read_len: usize,
}

impl MpsseCmdBuilder {
    pub(crate) fn new() -> MpsseCmdBuilder {
        Default::default()
    }

    /// Terminate the batch, forcing buffered response bytes out immediately.
    pub(crate) fn finish(mut self) -> (Vec<u8>, usize) {
        self.cmd.push(Opcode::SendImmediate as u8);
        (self.cmd, self.read_len)
    }

    /// Set the TCK divisor; `div_by5` selects the 60 MHz/12 MHz base on
    /// chips that have the divide-by-5 prescaler.
    pub(crate) fn set_clock(&mut self, divisor: u16, div_by5: Option<bool>) -> &mut Self {
        match div_by5 {
            Some(true) => self.cmd.push(Opcode::EnableClockDivideBy5 as u8),
            Some(false) => self.cmd.push(Opcode::DisableClockDivideBy5 as u8),
            None => {}
        }
        self.cmd.extend_from_slice(&[
            Opcode::SetClockDivisor as u8,
            (divisor & 0xFF) as u8,
            (divisor >> 8) as u8,
        ]);
        self
    }

    pub(crate) fn enable_loopback(&mut self, state: bool) -> &mut Self {
        if state {
            self.cmd.push(Opcode::EnableLoopback as u8);
        } else {
            self.cmd.push(Opcode::DisableLoopback as u8);
        }
        self
    }

    /// Only meaningful on FTx232H devices.
    pub(crate) fn enable_3phase_clocking(&mut self, state: bool) -> &mut Self {
        if state {
            self.cmd.push(Opcode::Enable3PhaseClocking as u8);
        } else {
            self.cmd.push(Opcode::Disable3PhaseClocking as u8);
        }
        self
    }

    /// Only meaningful on FTx232H devices.
    pub(crate) fn enable_adaptive_clocking(&mut self, state: bool) -> &mut Self {
        if state {
            self.cmd.push(Opcode::EnableAdaptiveClocking as u8);
        } else {
            self.cmd.push(Opcode::DisableAdaptiveClocking as u8);
        }
        self
    }

    /// Value and direction masks for the ADBUS pins; direction bit 1 = output.
    pub(crate) fn set_gpio_lower(&mut self, value: u8, direction: u8) -> &mut Self {
        self.cmd
            .extend_from_slice(&[Opcode::SetDataBitsLowbyte as u8, value, direction]);
        self
    }

    /// Value and direction masks for the ACBUS pins.
    pub(crate) fn set_gpio_upper(&mut self, value: u8, direction: u8) -> &mut Self {
        self.cmd
            .extend_from_slice(&[Opcode::SetDataBitsHighbyte as u8, value, direction]);
        self
    }

    /// Clock whole bytes out on TDI, discarding TDO.
    pub(crate) fn shift_bytes_out(&mut self, data: &[u8]) -> &mut Self {
        for chunk in data.chunks(MAX_BYTE_SHIFT) {
            let len = chunk.len() - 1;
            self.cmd.extend_from_slice(&[
                ShiftCmd::data(false, true, false),
                (len & 0xFF) as u8,
                (len >> 8) as u8,
            ]);
            self.cmd.extend_from_slice(chunk);
        }
        self
    }

    /// Clock whole bytes out on TDI while capturing TDO.
    pub(crate) fn shift_bytes_io(&mut self, data: &[u8]) -> &mut Self {
        for chunk in data.chunks(MAX_BYTE_SHIFT) {
            let len = chunk.len() - 1;
            self.read_len += chunk.len();
            self.cmd.extend_from_slice(&[
                ShiftCmd::data(false, true, true),
                (len & 0xFF) as u8,
                (len >> 8) as u8,
            ]);
            self.cmd.extend_from_slice(chunk);
        }
        self
    }

    /// Clock up to 8 bits out on TDI, discarding TDO.
    pub(crate) fn shift_bits_out(&mut self, data: u8, len: usize) -> &mut Self {
        if len == 0 {
            return self;
        }
        assert!(len <= MAX_BIT_SHIFT, "at most {MAX_BIT_SHIFT} bits per shift");
        self.cmd
            .extend_from_slice(&[ShiftCmd::data(true, true, false), (len - 1) as u8, data]);
        self
    }

    /// Clock up to 8 bits out on TDI while capturing TDO.
    ///
    /// The captured bits arrive left-justified in one response byte.
    pub(crate) fn shift_bits_io(&mut self, data: u8, len: usize) -> &mut Self {
        if len == 0 {
            return self;
        }
        assert!(len <= MAX_BIT_SHIFT, "at most {MAX_BIT_SHIFT} bits per shift");
        self.read_len += 1;
        self.cmd
            .extend_from_slice(&[ShiftCmd::data(true, true, true), (len - 1) as u8, data]);
        self
    }

    /// Clock up to 7 TMS bits out of `pattern`, TDI held at `tdi`.
    pub(crate) fn tms_out(&mut self, pattern: u8, len: usize, tdi: bool) -> &mut Self {
        if len == 0 {
            return self;
        }
        assert!(len <= MAX_TMS_SHIFT, "at most {MAX_TMS_SHIFT} TMS bits per shift");
        let data = if tdi { pattern | 0x80 } else { pattern };
        self.cmd
            .extend_from_slice(&[ShiftCmd::tms(false), (len - 1) as u8, data]);
        self
    }

    /// Clock up to 7 TMS bits out while capturing TDO.
    pub(crate) fn tms_io(&mut self, pattern: u8, len: usize, tdi: bool) -> &mut Self {
        if len == 0 {
            return self;
        }
        assert!(len <= MAX_TMS_SHIFT, "at most {MAX_TMS_SHIFT} TMS bits per shift");
        self.read_len += 1;
        let data = if tdi { pattern | 0x80 } else { pattern };
        self.cmd
            .extend_from_slice(&[ShiftCmd::tms(true), (len - 1) as u8, data]);
        self
    }
}
