//! Partition name resolution for image files.
//!
//! Maps a candidate image filename to a target partition, verified
//! against the loaded PIT when there is one and inferred from well-known
//! names otherwise.

use std::fmt;

use crate::pit::PitTable;

/// Filename stems that name a partition under another name.
pub const ALIASES: &[(&str, &str)] = &[
    ("MODEM", "RADIO"),
    ("SYSTEM", "FACTORYFS"),
    ("DBDATA", "PARAM"),
    ("ZIMAGE", "KERNEL"),
];

/// Partition names accepted without a PIT.
pub const WELL_KNOWN_PARTITIONS: &[&str] = &[
    "BOOT",
    "RECOVERY",
    "CACHE",
    "KERNEL",
    "RADIO",
    "FACTORYFS",
    "PARAM",
    "HIDDEN",
    "EFS",
    "SBL",
    "SBL2",
    "USERDATA",
    "DATAFS",
];

/// How much the mapping can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Matched an entry of the loaded PIT.
    Verified,
    /// No PIT was loaded; the name was inferred from the filename alone.
    Inferred,
}

/// A resolved target partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub partition: String,
    pub confidence: Confidence,
}

impl Resolution {
    pub fn is_verified(&self) -> bool {
        self.confidence == Confidence::Verified
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.confidence {
            Confidence::Verified => write!(f, "{}", self.partition),
            Confidence::Inferred => write!(f, "{} (unverified)", self.partition),
        }
    }
}

/// Resolve `filename` to a partition name.
///
/// The directory and extension are stripped and the rest uppercased;
/// the candidate is then looked up, and failing that its alias. `None`
/// means the partition cannot be determined.
pub fn resolve(filename: &str, table: Option<&PitTable>) -> Option<Resolution> {
    let candidate = candidate_name(filename)?;

    lookup(&candidate, table).or_else(|| {
        alias_for(&candidate).and_then(|alias| lookup(alias, table))
    })
}

/// Uppercased file stem, or `None` if nothing is left.
pub fn candidate_name(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_ascii_uppercase())
}

pub fn alias_for(candidate: &str) -> Option<&'static str> {
    ALIASES
        .iter()
        .find(|(from, _)| from.eq_ignore_ascii_case(candidate))
        .map(|(_, to)| *to)
}

fn lookup(name: &str, table: Option<&PitTable>) -> Option<Resolution> {
    match table {
        Some(table) => table
            .entries()
            .iter()
            .find(|e| {
                e.matches(name)
                    || candidate_name(&e.flash_filename.to_string_lossy())
                        .is_some_and(|stem| stem.eq_ignore_ascii_case(name))
            })
            .map(|e| Resolution {
                partition: e.partition_name.to_string_lossy().into_owned(),
                confidence: Confidence::Verified,
            }),
        None => WELL_KNOWN_PARTITIONS
            .iter()
            .find(|known| known.eq_ignore_ascii_case(name))
            .map(|known| Resolution {
                partition: (*known).to_string(),
                confidence: Confidence::Inferred,
            }),
    }
}
