//! Content fingerprints and the first (hashing) pass

use crate::error::{ShuffleContext, ShuffleResult};
use crate::label::LabelExtractor;
use crate::manifest::LabelCounts;
use crate::permutation::PermutationEntry;
use crate::record_io::pack_record;
use log::info;
use sha1::{Digest, Sha1};

/// Width of a fingerprint in bytes (a SHA-1 digest)
pub const FINGERPRINT_LEN: usize = 20;

/// Fixed-width digest of a record, used only as a sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Fingerprint whose ordering matches `value`; handy for hand-built orders
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes[..8].copy_from_slice(&value.to_be_bytes());
        Fingerprint(bytes)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Strategy computing a record's fingerprint
pub trait Fingerprinter {
    fn digest(&self, record: &[u8]) -> Fingerprint;
}

impl<F> Fingerprinter for F
where
    F: Fn(&[u8]) -> Fingerprint,
{
    fn digest(&self, record: &[u8]) -> Fingerprint {
        self(record)
    }
}

/// SHA-1 over the raw record bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha1Fingerprinter;

impl Fingerprinter for Sha1Fingerprinter {
    fn digest(&self, record: &[u8]) -> Fingerprint {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&Sha1::digest(record));
        Fingerprint(bytes)
    }
}

/// Everything the hashing pass produces
#[derive(Debug, Default)]
pub struct Assignment {
    /// One entry per record, in original order
    pub entries: Vec<PermutationEntry>,
    pub labels: LabelCounts,
    /// Packed records by original index, when asked to keep them resident
    pub resident: Option<Vec<Vec<u8>>>,
}

/// Fingerprint and label every record of one pass
pub fn assign_fingerprints<I, F, L>(
    records: I,
    fingerprinter: &F,
    extractor: &L,
    keep_resident: bool,
) -> ShuffleResult<Assignment>
where
    I: IntoIterator<Item = ShuffleResult<(u64, Vec<u8>)>>,
    F: Fingerprinter + ?Sized,
    L: LabelExtractor + ?Sized,
{
    let mut assignment = Assignment {
        resident: keep_resident.then(Vec::new),
        ..Default::default()
    };

    for record in records {
        let (index, bytes) = record?;
        let fingerprint = fingerprinter.digest(&bytes);
        let label = extractor
            .extract(&bytes)
            .with_context(|| format!("record {index}"))?;

        assignment.labels.add(label);
        assignment
            .entries
            .push(PermutationEntry::new(fingerprint, index, label));
        if let Some(resident) = assignment.resident.as_mut() {
            resident.push(pack_record(&bytes));
        }
    }

    info!(
        "Hashed {} records ({} distinct labels)",
        assignment.entries.len(),
        assignment.labels.per_label().len()
    );
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShuffleError;
    use crate::label::Label;
    use crate::record_io::unpack_record;

    fn records(data: &[&[u8]]) -> Vec<ShuffleResult<(u64, Vec<u8>)>> {
        data.iter()
            .enumerate()
            .map(|(i, r)| Ok((i as u64, r.to_vec())))
            .collect()
    }

    fn first_byte(r: &[u8]) -> ShuffleResult<Label> {
        Ok(i64::from(r[0]))
    }

    #[test]
    fn test_sha1_known_digest() {
        let fp = Sha1Fingerprinter.digest(b"abc");
        assert_eq!(fp.to_string(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_from_u64_orders_numerically() {
        assert!(Fingerprint::from_u64(2) < Fingerprint::from_u64(10));
        assert!(Fingerprint::from_u64(255) < Fingerprint::from_u64(256));
    }

    #[test]
    fn test_assignment_collects_entries_and_labels() -> ShuffleResult<()> {
        let fp = |r: &[u8]| Fingerprint::from_u64(u64::from(r[1]));
        let input = records(&[b"\x00\x09", b"\x01\x03", b"\x00\x05"]);
        let assignment = assign_fingerprints(input, &fp, &first_byte, true)?;

        let indices: Vec<u64> = assignment.entries.iter().map(|e| e.original_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(assignment.entries[1].fingerprint, Fingerprint::from_u64(3));
        assert_eq!(assignment.entries[2].label, 0);
        assert_eq!(assignment.labels.total(), 3);
        assert_eq!(assignment.labels.count(0), 2);

        let resident = assignment.resident.expect("records kept resident");
        assert_eq!(unpack_record(&resident[1])?, b"\x01\x03".to_vec());
        Ok(())
    }

    #[test]
    fn test_resident_records_only_on_request() -> ShuffleResult<()> {
        let assignment =
            assign_fingerprints(records(&[b"\x01"]), &Sha1Fingerprinter, &first_byte, false)?;
        assert!(assignment.resident.is_none());
        Ok(())
    }

    #[test]
    fn test_label_failure_names_record() {
        let reject = |_: &[u8]| -> ShuffleResult<Label> { Err(ShuffleError::malformed("no label")) };
        let err = assign_fingerprints(records(&[b"a", b"b"]), &Sha1Fingerprinter, &reject, false)
            .unwrap_err();
        assert_eq!(err.to_string(), "Malformed record: record 0: no label");
    }
}
