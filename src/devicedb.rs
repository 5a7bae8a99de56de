//! IDCODE part list.
//!
//! A line-oriented database mapping identification codes to part names
//! and instruction register widths. Sources, in order: an explicit file
//! path, the `JTAGSCAN_DEVICEDB` environment variable, the compiled-in
//! list. Matching ignores the version nibble so one entry covers every
//! silicon revision of a part.

use std::path::Path;
use std::{env, fs};

/// Environment variable naming an alternative part-list file.
pub const ENV_DEVICEDB: &str = "JTAGSCAN_DEVICEDB";

/// Bits compared during lookup; the version nibble (31:28) is not part
/// of a device's identity.
const MATCH_MASK: u32 = 0x0fff_ffff;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("could not read device list '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A resolved part: what it is and how wide its instruction register is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatch {
    pub description: String,
    pub ir_length: usize,
}

struct Entry {
    code: u32,
    ir_length: usize,
    description: String,
}

pub struct DeviceDb {
    entries: Vec<Entry>,
    source: String,
}

impl DeviceDb {
    /// Load the part list from the highest-priority available source.
    pub fn load(override_path: Option<&Path>) -> Result<Self, DbError> {
        if let Some(path) = override_path {
            return Self::from_file(path);
        }
        if let Ok(path) = env::var(ENV_DEVICEDB) {
            return Self::from_file(Path::new(&path));
        }
        Ok(Self::from_text(
            include_str!("devlist.txt"),
            "built-in device list",
        ))
    }

    pub fn from_file(path: &Path) -> Result<Self, DbError> {
        let path = path.display().to_string();
        let text = fs::read_to_string(&path).map_err(|source| DbError::Read {
            path: path.clone(),
            source,
        })?;
        Ok(Self::from_text(&text, &path))
    }

    /// Parse `0x<code> <ir length> <description>` lines. Blank lines and
    /// `#` comments are ignored; a malformed line is skipped with a
    /// warning instead of failing the whole load.
    pub fn from_text(text: &str, source: &str) -> Self {
        let mut entries = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some(entry) => entries.push(entry),
                None => log::warn!("{source}:{}: malformed device entry", number + 1),
            }
        }
        log::debug!("loaded {} device entries from {source}", entries.len());
        DeviceDb {
            entries,
            source: source.to_string(),
        }
    }

    /// Look up a code read from the chain. The marker bit must be set;
    /// the first entry whose masked code matches wins.
    pub fn resolve(&self, code: u32) -> Option<DeviceMatch> {
        if code & 1 == 0 {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.code & MATCH_MASK == code & MATCH_MASK)
            .map(|entry| DeviceMatch {
                description: entry.description.clone(),
                ir_length: entry.ir_length,
            })
    }

    /// Human-readable name of where the entries came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str) -> Option<Entry> {
    let mut fields = line.split_whitespace();
    let code = fields.next()?.strip_prefix("0x")?;
    let code = u32::from_str_radix(code, 16).ok()?;
    let ir_length = fields.next()?.parse::<usize>().ok()?;
    let description = fields.collect::<Vec<_>>().join(" ");
    if ir_length == 0 || description.is_empty() {
        return None;
    }
    Some(Entry {
        code,
        ir_length,
        description,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn builtin() -> DeviceDb {
        DeviceDb::from_text(include_str!("devlist.txt"), "built-in device list")
    }

    #[test]
    fn builtin_list_parses_cleanly() {
        let db = builtin();
        assert!(db.len() >= 15, "expected the full part list, got {}", db.len());
        let arm = db.resolve(0x4ba0_0477).unwrap();
        assert_eq!(arm.description, "ARM-DAP");
        assert_eq!(arm.ir_length, 4);
    }

    #[test]
    fn version_nibble_is_ignored_on_both_sides() {
        let db = DeviceDb::from_text("0xf1414093 6 XC3S200", "test");
        assert!(db.resolve(0x0141_4093).is_some());
        assert!(db.resolve(0x3141_4093).is_some());
        assert!(db.resolve(0x0141_4095).is_none());
    }

    #[test]
    fn marker_bit_is_required() {
        let db = DeviceDb::from_text("0x01414092 6 BADLIST", "test");
        assert!(db.resolve(0x0141_4092).is_none());
    }

    #[test]
    fn comments_and_malformed_lines_are_skipped() {
        let text = "\
# header comment
0x01414093 6 XC3S200

0x01414093 six XC3S200
not a line
0x24001093 6 XC6SLX9 (Spartan-6)
0xdeadbeef 0 ZEROWIDTH
";
        let db = DeviceDb::from_text(text, "test");
        assert_eq!(db.len(), 2);
        assert_eq!(
            db.resolve(0x2400_1093).unwrap().description,
            "XC6SLX9 (Spartan-6)"
        );
    }

    #[test]
    fn first_matching_entry_wins() {
        let text = "0x01414093 6 FIRST\n0x11414093 8 SECOND\n";
        let db = DeviceDb::from_text(text, "test");
        let found = db.resolve(0x0141_4093).unwrap();
        assert_eq!(found.description, "FIRST");
        assert_eq!(found.ir_length, 6);
    }

    #[test]
    fn resolving_twice_returns_equal_matches() {
        let db = builtin();
        assert_eq!(db.resolve(0x0141_4093), db.resolve(0x0141_4093));
    }

    #[test]
    fn file_source_is_named_by_path() -> anyhow::Result<()> {
        let path = env::temp_dir().join("jtagscan-devlist-test.txt");
        fs::write(&path, "0x4ba00477 4 ARM-DAP\n")?;
        let db = DeviceDb::from_file(&path)?;
        assert_eq!(db.source(), path.display().to_string());
        assert_eq!(db.len(), 1);
        fs::remove_file(&path)?;

        let missing = DeviceDb::from_file(Path::new("/nonexistent/devlist.txt"));
        assert!(matches!(missing, Err(DbError::Read { .. })));
        Ok(())
    }

    #[test]
    fn empty_db_resolves_nothing() {
        let db = DeviceDb::from_text("# nothing here\n", "test");
        assert!(db.is_empty());
        assert!(db.resolve(0x4ba0_0477).is_none());
    }
}
