//! Boundary-scan chain walking.
//!
//! After test-logic-reset every TAP loads its IDCODE (or BYPASS) into the
//! data register, so one pass through Shift-DR reads the whole chain: 32
//! bits per device, stopping at the all-zero word that marks the end of
//! the chain. Captured codes arrive nearest-TDO first and are reversed so
//! that position 0 is the device closest to TDI.

use crate::cable::{Cable, CableError};

/// Scan stops after this many devices even without a terminator word.
const MAX_CHAIN_DEVICES: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("cable i/o failed")]
    Cable(#[from] CableError),
    #[error("position {position} is outside the {length}-device chain")]
    BadPosition { position: usize, length: usize },
    #[error("no TMS path from {from:?} to {to:?}")]
    BadTransition { from: TapState, to: TapState },
}

/// States of the IEEE 1149.1 TAP controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    TestLogicReset,
    RunTestIdle,
    SelectDrScan,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIrScan,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
}

impl TapState {
    /// TMS sequence (LSB first) stepping from `self` to `to`.
    ///
    /// Only the hops the scan flow needs are defined. Five TMS=1 clocks
    /// reach test-logic-reset from any state, which is also the only way
    /// to move when the hardware state is unknown.
    pub fn tms_path_to(self, to: TapState) -> Option<(u8, usize)> {
        use TapState::*;
        match (self, to) {
            (_, TestLogicReset) => Some((0b1_1111, 5)),
            (TestLogicReset, RunTestIdle) => Some((0b0, 1)),
            (RunTestIdle, ShiftDr) => Some((0b001, 3)),
            (RunTestIdle, ShiftIr) => Some((0b0011, 4)),
            (ShiftDr | ShiftIr, RunTestIdle) => Some((0b011, 3)),
            (Exit1Dr | Exit1Ir, RunTestIdle) => Some((0b01, 2)),
            _ => None,
        }
    }
}

fn step(cable: &mut dyn Cable, state: &mut TapState, to: TapState) -> Result<(), ChainError> {
    let (pattern, bits) = state
        .tms_path_to(to)
        .ok_or(ChainError::BadTransition { from: *state, to })?;
    cable.shift_tms(pattern, bits, true)?;
    *state = to;
    Ok(())
}

/// Read access to a scanned chain, one device at a time.
///
/// Positions are strictly ordered: callers walk 0..`chain_length()` and
/// record each device's instruction register length as soon as it is
/// known, since later register framing depends on it.
pub trait ChainWalker {
    fn chain_length(&self) -> usize;
    fn idcode_at(&self, position: usize) -> Result<u32, ChainError>;
    fn commit_ir_length(&mut self, position: usize, bits: usize) -> Result<(), ChainError>;
}

/// A scanned JTAG chain.
///
/// The cable is only borrowed for the scan itself; every later access
/// works on the captured codes.
pub struct JtagChain {
    idcodes: Vec<u32>,
    ir_lengths: Vec<Option<usize>>,
}

impl JtagChain {
    /// Reset the TAPs and read every IDCODE on the chain.
    pub fn scan(cable: &mut dyn Cable) -> Result<Self, ChainError> {
        // the hardware state is unknown here, but the first hop is the
        // reset-from-anywhere path
        let mut state = TapState::RunTestIdle;
        step(cable, &mut state, TapState::TestLogicReset)?;
        step(cable, &mut state, TapState::RunTestIdle)?;
        step(cable, &mut state, TapState::ShiftDr)?;

        let mut idcodes = Vec::new();
        loop {
            let word = cable.shift_data(&[0, 0, 0, 0], 32, true, false)?;
            let idcode = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            match idcode {
                0x0000_0000 => break,
                0xffff_ffff => {
                    if !idcodes.is_empty() {
                        log::warn!(
                            "all-ones IDCODE after {} devices, broken chain?",
                            idcodes.len()
                        );
                    }
                    break;
                }
                _ => idcodes.push(idcode),
            }
            if idcodes.len() == MAX_CHAIN_DEVICES {
                log::warn!("no chain terminator after {MAX_CHAIN_DEVICES} devices, stopping");
                break;
            }
        }
        idcodes.reverse();

        step(cable, &mut state, TapState::RunTestIdle)?;

        log::debug!("chain scan found {} devices", idcodes.len());
        let ir_lengths = vec![None; idcodes.len()];
        Ok(JtagChain {
            idcodes,
            ir_lengths,
        })
    }

    /// Instruction register length recorded for a position, if any.
    ///
    /// Positions whose code was never resolved keep `None`, so their
    /// devices stay at the default framing. When the real width differs,
    /// everything behind them on the chain shifts misaligned.
    pub fn ir_length(&self, position: usize) -> Option<usize> {
        self.ir_lengths.get(position).copied().flatten()
    }
}

impl ChainWalker for JtagChain {
    fn chain_length(&self) -> usize {
        self.idcodes.len()
    }

    fn idcode_at(&self, position: usize) -> Result<u32, ChainError> {
        self.idcodes
            .get(position)
            .copied()
            .ok_or(ChainError::BadPosition {
                position,
                length: self.idcodes.len(),
            })
    }

    fn commit_ir_length(&mut self, position: usize, bits: usize) -> Result<(), ChainError> {
        let length = self.idcodes.len();
        let slot = self
            .ir_lengths
            .get_mut(position)
            .ok_or(ChainError::BadPosition { position, length })?;
        *slot = Some(bits);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct WireLog {
        tms: Vec<(u8, usize)>,
        reads: usize,
    }

    /// Replays canned 32-bit DR words in read order.
    struct FakeCable {
        words: VecDeque<u32>,
        log: Rc<RefCell<WireLog>>,
    }

    impl FakeCable {
        fn new(words: &[u32]) -> (FakeCable, Rc<RefCell<WireLog>>) {
            let log = Rc::new(RefCell::new(WireLog::default()));
            let cable = FakeCable {
                words: words.iter().copied().collect(),
                log: log.clone(),
            };
            (cable, log)
        }
    }

    impl Cable for FakeCable {
        fn shift_tms(&mut self, pattern: u8, bits: usize, _tdi: bool) -> Result<(), CableError> {
            self.log.borrow_mut().tms.push((pattern, bits));
            Ok(())
        }

        fn shift_data(
            &mut self,
            tdi: &[u8],
            bits: usize,
            capture: bool,
            last: bool,
        ) -> Result<Vec<u8>, CableError> {
            assert_eq!(tdi, &[0, 0, 0, 0]);
            assert_eq!(bits, 32);
            assert!(capture);
            assert!(!last);
            self.log.borrow_mut().reads += 1;
            let word = self.words.pop_front().unwrap_or(0);
            Ok(word.to_le_bytes().to_vec())
        }

        fn set_verbose(&mut self, _verbose: bool) {}
    }

    #[test]
    fn reset_is_reachable_from_every_state() {
        use TapState::*;
        for from in [TestLogicReset, RunTestIdle, ShiftDr, PauseIr, UpdateDr] {
            assert_eq!(from.tms_path_to(TestLogicReset), Some((0b1_1111, 5)));
        }
    }

    #[test]
    fn shift_paths_match_the_documented_sequences() {
        use TapState::*;
        assert_eq!(RunTestIdle.tms_path_to(ShiftDr), Some((0b001, 3)));
        assert_eq!(RunTestIdle.tms_path_to(ShiftIr), Some((0b0011, 4)));
        assert_eq!(ShiftDr.tms_path_to(RunTestIdle), Some((0b011, 3)));
        assert_eq!(Exit1Ir.tms_path_to(RunTestIdle), Some((0b01, 2)));
        assert_eq!(PauseDr.tms_path_to(ShiftIr), None);
    }

    #[test]
    fn scan_reverses_into_tdi_order() {
        // nearest TDO shifts out first, so position 0 must be the last read
        let (mut cable, _) = FakeCable::new(&[0x0643_3041, 0x4ba0_0477, 0x0000_0000]);
        let chain = JtagChain::scan(&mut cable).unwrap();
        assert_eq!(chain.chain_length(), 2);
        assert_eq!(chain.idcode_at(0).unwrap(), 0x4ba0_0477);
        assert_eq!(chain.idcode_at(1).unwrap(), 0x0643_3041);
    }

    #[test]
    fn scan_walks_the_tap_through_shift_dr_and_back() {
        let (mut cable, log) = FakeCable::new(&[0x4ba0_0477, 0x0000_0000]);
        JtagChain::scan(&mut cable).unwrap();
        let log = log.borrow();
        assert_eq!(
            log.tms,
            vec![(0b1_1111, 5), (0b0, 1), (0b001, 3), (0b011, 3)],
            "reset, settle in idle, enter shift-dr, return to idle"
        );
        assert_eq!(log.reads, 2, "one word per device plus the terminator");
    }

    #[test]
    fn all_ones_ends_the_scan_without_a_device() {
        let (mut cable, _) = FakeCable::new(&[0x4ba0_0477, 0xffff_ffff]);
        let chain = JtagChain::scan(&mut cable).unwrap();
        assert_eq!(chain.chain_length(), 1);
        assert_eq!(chain.idcode_at(0).unwrap(), 0x4ba0_0477);
    }

    #[test]
    fn empty_chain_scans_to_zero_devices() {
        let (mut cable, log) = FakeCable::new(&[0x0000_0000]);
        let chain = JtagChain::scan(&mut cable).unwrap();
        assert_eq!(chain.chain_length(), 0);
        assert_eq!(log.borrow().reads, 1);
    }

    #[test]
    fn out_of_range_position_is_an_error() {
        let (mut cable, _) = FakeCable::new(&[0x4ba0_0477, 0x0000_0000]);
        let chain = JtagChain::scan(&mut cable).unwrap();
        assert!(matches!(
            chain.idcode_at(5),
            Err(ChainError::BadPosition {
                position: 5,
                length: 1
            })
        ));
    }

    #[test]
    fn committed_ir_lengths_are_recorded_per_position() {
        let (mut cable, _) = FakeCable::new(&[0x0643_3041, 0x4ba0_0477, 0x0000_0000]);
        let mut chain = JtagChain::scan(&mut cable).unwrap();
        chain.commit_ir_length(0, 4).unwrap();
        assert_eq!(chain.ir_length(0), Some(4));
        assert_eq!(chain.ir_length(1), None);
        assert!(chain.commit_ir_length(9, 8).is_err());
    }
}
