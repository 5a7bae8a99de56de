//! Chain discovery.
//!
//! Walks a scanned chain position by position, resolves each code against
//! the part list and reports one line per device. Resolved instruction
//! register widths are committed back to the walker before the next
//! position is read so the chain framing stays aligned.

use std::io::Write;

use crate::chain::{ChainError, ChainWalker};
use crate::devicedb::{DeviceDb, DeviceMatch};
use crate::idcode::IdCode;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("chain walk failed")]
    Chain(#[from] ChainError),
    #[error("writing the report failed")]
    Report(#[from] std::io::Error),
}

/// One finalized position of the chain report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPosition {
    pub index: usize,
    pub idcode: u32,
    pub device: Option<DeviceMatch>,
}

/// Walk the whole chain and emit one report line per position.
///
/// Positions are visited strictly in order and each line is written
/// before the next read, so a mid-walk failure leaves every position
/// finished so far on `out`. An unresolved code is a normal outcome:
/// nothing is committed for it and the walk continues.
pub fn detect_chain(
    walker: &mut dyn ChainWalker,
    db: &DeviceDb,
    out: &mut dyn Write,
) -> Result<Vec<ChainPosition>, DetectError> {
    log::info!("resolving devices against {}", db.source());
    let length = walker.chain_length();
    let mut positions = Vec::with_capacity(length);
    for index in 0..length {
        let idcode = walker.idcode_at(index)?;
        let device = db.resolve(idcode);
        match &device {
            Some(found) => walker.commit_ir_length(index, found.ir_length)?,
            None => {
                let code = IdCode::from(idcode);
                if code.plausible() {
                    log::info!("position {index} is unlisted: {code}");
                } else {
                    log::debug!("position {index} reads as implausible code {idcode:#010x}");
                }
            }
        }
        let position = ChainPosition {
            index,
            idcode,
            device,
        };
        write_position(out, &position, db.source())?;
        positions.push(position);
    }
    Ok(positions)
}

fn write_position(
    out: &mut dyn Write,
    position: &ChainPosition,
    source: &str,
) -> std::io::Result<()> {
    match &position.device {
        Some(found) => writeln!(
            out,
            "JTAG loc.: {}\tIDCODE: 0x{:08x}\tDesc: {:>15}\tIR length: {}",
            position.index, position.idcode, found.description, found.ir_length
        ),
        None => writeln!(
            out,
            "JTAG loc.: {}\tIDCODE: 0x{:08x}\tnot found in '{}'.",
            position.index, position.idcode, source
        ),
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;
    use crate::cable::CableError;

    #[derive(Debug, PartialEq, Eq)]
    enum Op {
        Read(usize),
        Commit(usize, usize),
    }

    /// Serves scripted codes and records every walker call in order.
    struct ScriptedWalker {
        codes: Vec<u32>,
        fail_at: Option<usize>,
        trace: RefCell<Vec<Op>>,
    }

    impl ScriptedWalker {
        fn new(codes: &[u32]) -> Self {
            ScriptedWalker {
                codes: codes.to_vec(),
                fail_at: None,
                trace: RefCell::new(Vec::new()),
            }
        }

        fn failing_at(codes: &[u32], position: usize) -> Self {
            let mut walker = Self::new(codes);
            walker.fail_at = Some(position);
            walker
        }
    }

    impl ChainWalker for ScriptedWalker {
        fn chain_length(&self) -> usize {
            self.codes.len()
        }

        fn idcode_at(&self, position: usize) -> Result<u32, ChainError> {
            self.trace.borrow_mut().push(Op::Read(position));
            if self.fail_at == Some(position) {
                return Err(ChainError::Cable(CableError::ShortResponse {
                    expected: 4,
                    got: 0,
                }));
            }
            Ok(self.codes[position])
        }

        fn commit_ir_length(&mut self, position: usize, bits: usize) -> Result<(), ChainError> {
            self.trace.borrow_mut().push(Op::Commit(position, bits));
            Ok(())
        }
    }

    fn example_db() -> DeviceDb {
        DeviceDb::from_text(
            "0x01414093 6 XC3S200\n0x4ba00477 4 ARM-DAP\n",
            "example list",
        )
    }

    #[test]
    fn commits_each_width_before_the_next_read() {
        let mut walker = ScriptedWalker::new(&[0x0141_4093, 0x4ba0_0477]);
        let mut out = Vec::new();
        let positions = detect_chain(&mut walker, &example_db(), &mut out).unwrap();

        assert_eq!(positions.len(), 2);
        assert_eq!(
            *walker.trace.borrow(),
            vec![
                Op::Read(0),
                Op::Commit(0, 6),
                Op::Read(1),
                Op::Commit(1, 4)
            ]
        );
    }

    #[test]
    fn unresolved_position_commits_nothing_and_continues() {
        let mut walker = ScriptedWalker::new(&[0x0141_4093, 0xdead_beef, 0x4ba0_0477]);
        let mut out = Vec::new();
        let positions = detect_chain(&mut walker, &example_db(), &mut out).unwrap();

        assert_eq!(positions.len(), 3);
        assert!(positions[1].device.is_none());
        assert_eq!(
            *walker.trace.borrow(),
            vec![
                Op::Read(0),
                Op::Commit(0, 6),
                Op::Read(1),
                Op::Read(2),
                Op::Commit(2, 4)
            ]
        );
    }

    #[test]
    fn report_lines_match_the_fixed_format() {
        let db = DeviceDb::from_text("0x149511c3 6 EXAMPLE-FPGA\n", "example list");
        let mut walker = ScriptedWalker::new(&[0x1495_11c3, 0x0000_0000]);
        let mut out = Vec::new();
        detect_chain(&mut walker, &db, &mut out).unwrap();

        let report = String::from_utf8(out).unwrap();
        assert_eq!(
            report,
            "JTAG loc.: 0\tIDCODE: 0x149511c3\tDesc:    EXAMPLE-FPGA\tIR length: 6\n\
             JTAG loc.: 1\tIDCODE: 0x00000000\tnot found in 'example list'.\n"
        );
    }

    #[test]
    fn failure_at_position_k_leaves_k_lines() {
        let codes = [0x0141_4093, 0x4ba0_0477, 0x0141_4093, 0x4ba0_0477];
        let mut walker = ScriptedWalker::failing_at(&codes, 2);
        let mut out = Vec::new();
        let result = detect_chain(&mut walker, &example_db(), &mut out);

        assert!(matches!(result, Err(DetectError::Chain(_))));
        let report = String::from_utf8(out).unwrap();
        assert_eq!(report.lines().count(), 2);
    }

    #[test]
    fn empty_chain_reports_nothing() {
        let mut walker = ScriptedWalker::new(&[]);
        let mut out = Vec::new();
        let positions = detect_chain(&mut walker, &example_db(), &mut out).unwrap();
        assert!(positions.is_empty());
        assert!(out.is_empty());
    }
}
