use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{Dataset, Record};
use crate::error::{Result, SisError};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Drop every later exact duplicate without asking.
    Forceful,
    /// Ask per candidate through a [`DedupReview`].
    Soft,
}

impl FromStr for DedupMode {
    type Err = SisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forceful" => Ok(DedupMode::Forceful),
            "soft" => Ok(DedupMode::Soft),
            other => Err(SisError::Validation(format!(
                "unknown dedup mode '{other}' (use 'forceful' or 'soft')"
            ))),
        }
    }
}

/// What makes two rows "the same" for review purposes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DuplicateKey {
    #[default]
    FullRow,
    Columns(Vec<String>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Remove,
}

pub type Fingerprint = [u8; 32];

/// BLAKE3 over length-prefixed cells, so ("ab","c") and ("a","bc") differ.
pub fn row_fingerprint<'a>(cells: impl IntoIterator<Item = &'a str>) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    for cell in cells {
        hasher.update(&(cell.len() as u64).to_le_bytes());
        hasher.update(cell.as_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// `(duplicate_row, first_occurrence_row)` pairs, in store order.
pub fn duplicate_pairs(table: &Dataset, key: &DuplicateKey) -> Result<Vec<(usize, usize)>> {
    match key {
        DuplicateKey::FullRow => Ok(pairs_by(table, None)),
        DuplicateKey::Columns(cols) => {
            let mut idx = Vec::with_capacity(cols.len());
            for c in cols {
                idx.push(table.column_index(c).ok_or_else(|| {
                    SisError::Validation(format!("unknown duplicate key column '{c}'"))
                })?);
            }
            Ok(pairs_by(table, Some(&idx)))
        }
    }
}

/// `None` keys on the whole row.
fn pairs_by(table: &Dataset, key_idx: Option<&[usize]>) -> Vec<(usize, usize)> {
    let mut first_seen: HashMap<Fingerprint, usize> = HashMap::with_capacity(table.len());
    let mut pairs = Vec::new();
    for (i, row) in table.rows().iter().enumerate() {
        let fp = match key_idx {
            None => row_fingerprint(row.iter().map(String::as_str)),
            Some(idx) => row_fingerprint(idx.iter().map(|&k| row[k].as_str())),
        };
        match first_seen.entry(fp) {
            Entry::Occupied(first) => pairs.push((i, *first.get())),
            Entry::Vacant(slot) => {
                slot.insert(i);
            }
        }
    }
    pairs
}

/// Forceful mode: keep first occurrences, preserve order. Returns rows removed.
pub fn drop_duplicates(table: &mut Dataset) -> usize {
    let drop: HashSet<usize> = pairs_by(table, None).into_iter().map(|(dup, _)| dup).collect();
    if drop.is_empty() {
        return 0;
    }
    table.retain_indices(|i| !drop.contains(&i));
    drop.len()
}

/// A pending duplicate shown to whoever is deciding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Row index in the store.
    pub row: usize,
    /// Row index of the occurrence that will survive regardless.
    pub first_occurrence: usize,
    pub record: Record,
}

/// Pull-based review over duplicate candidates.
///
/// Nothing touches the store until the review is committed through the
/// store (or pipeline). An abandoned review can be handed back to
/// `resume_review` while the store is unchanged.
#[derive(Debug)]
pub struct DedupReview {
    table: Dataset,
    snapshot: Option<Fingerprint>,
    key: DuplicateKey,
    pairs: Vec<(usize, usize)>,
    cursor: usize,
    remove: Vec<usize>,
}

impl DedupReview {
    pub(crate) fn new(table: Dataset, snapshot: Option<Fingerprint>, key: &DuplicateKey) -> Result<Self> {
        let pairs = duplicate_pairs(&table, key)?;
        Ok(Self {
            table,
            snapshot,
            key: key.clone(),
            pairs,
            cursor: 0,
            remove: Vec::new(),
        })
    }

    /// The candidate awaiting a decision, if any.
    pub fn current(&self) -> Option<Candidate> {
        let &(row, first_occurrence) = self.pairs.get(self.cursor)?;
        Some(Candidate {
            row,
            first_occurrence,
            record: self.table.record(row)?,
        })
    }

    /// Decide the current candidate and move to the next one.
    pub fn decide(&mut self, decision: Decision) -> Result<()> {
        let &(row, _) = self
            .pairs
            .get(self.cursor)
            .ok_or_else(|| SisError::Conflict("no duplicate candidate awaiting a decision".into()))?;
        if decision == Decision::Remove {
            self.remove.push(row);
        }
        self.cursor += 1;
        Ok(())
    }

    /// Run `decider` over every remaining candidate.
    pub fn decide_all<F>(&mut self, mut decider: F) -> Result<()>
    where
        F: FnMut(&Candidate) -> Decision,
    {
        while let Some(c) = self.current() {
            let d = decider(&c);
            self.decide(d)?;
        }
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.pairs.len()
    }

    pub fn remaining(&self) -> usize {
        self.pairs.len() - self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }

    pub fn marked_for_removal(&self) -> usize {
        self.remove.len()
    }

    pub fn key(&self) -> &DuplicateKey {
        &self.key
    }

    /// Carry `previous`'s decisions over, leaving the cursor at its first
    /// undecided candidate. Both must come from the same store contents.
    pub(crate) fn adopt_decisions(&mut self, previous: DedupReview) -> Result<()> {
        if previous.snapshot != self.snapshot || previous.pairs != self.pairs {
            return Err(SisError::Conflict(
                "store changed since the review was opened; start a new review".into(),
            ));
        }
        self.cursor = previous.cursor;
        self.remove = previous.remove;
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Option<&Fingerprint> {
        self.snapshot.as_ref()
    }

    /// Dataset with the removals applied, plus how many rows went.
    pub(crate) fn into_result(self) -> (Dataset, usize) {
        let mut table = self.table;
        let drop: HashSet<usize> = self.remove.into_iter().collect();
        table.retain_indices(|i| !drop.contains(&i));
        (table, drop.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[[&str; 2]]) -> Dataset {
        let mut t = Dataset::new(["a", "q"]);
        for r in rows {
            t.push_row(r.iter().map(|s| s.to_string()).collect()).unwrap();
        }
        t
    }

    #[test]
    fn fingerprint_is_boundary_sensitive() {
        assert_ne!(row_fingerprint(["ab", "c"]), row_fingerprint(["a", "bc"]));
        assert_eq!(row_fingerprint(["a", "b"]), row_fingerprint(["a", "b"]));
    }

    #[test]
    fn forceful_keeps_first_and_order() {
        let mut t = table(&[["A", "1"], ["B", "2"], ["A", "1"], ["C", "3"], ["B", "2"], ["A", "1"]]);
        let before = t.len();
        let removed = drop_duplicates(&mut t);
        assert_eq!(removed, 3);
        assert_eq!(removed + t.len(), before);
        assert_eq!(t, table(&[["A", "1"], ["B", "2"], ["C", "3"]]));
        assert_eq!(drop_duplicates(&mut t), 0);
    }

    #[test]
    fn review_walks_candidates_in_store_order() {
        let t = table(&[["A", "1"], ["A", "1"], ["B", "2"], ["A", "1"], ["B", "2"]]);
        let mut review = DedupReview::new(t, None, &DuplicateKey::FullRow).unwrap();
        assert_eq!(review.total(), 3);

        let c = review.current().unwrap();
        assert_eq!((c.row, c.first_occurrence), (1, 0));
        assert_eq!(c.record.get("a"), Some("A"));
        review.decide(Decision::Remove).unwrap();

        assert_eq!(review.current().unwrap().row, 3);
        review.decide(Decision::Keep).unwrap();

        let c = review.current().unwrap();
        assert_eq!((c.row, c.first_occurrence), (4, 2));
        review.decide(Decision::Remove).unwrap();

        assert!(review.is_complete());
        assert!(matches!(review.decide(Decision::Keep), Err(SisError::Conflict(_))));

        let (after, removed) = review.into_result();
        assert_eq!(removed, 2);
        assert_eq!(after, table(&[["A", "1"], ["B", "2"], ["A", "1"]]));
    }

    #[test]
    fn review_can_key_on_a_column_subset() {
        let t = table(&[["A", "1"], ["A", "2"], ["B", "2"]]);
        let key = DuplicateKey::Columns(vec!["a".into()]);
        let mut review = DedupReview::new(t.clone(), None, &key).unwrap();
        assert_eq!(review.total(), 1);
        review.decide_all(|_| Decision::Remove).unwrap();
        let (after, removed) = review.into_result();
        assert_eq!(removed, 1);
        assert_eq!(after, table(&[["A", "1"], ["B", "2"]]));

        let bad = DuplicateKey::Columns(vec!["nope".into()]);
        assert!(matches!(
            DedupReview::new(t, None, &bad),
            Err(SisError::Validation(_))
        ));
    }

    #[test]
    fn decisions_carry_over_to_a_fresh_review() {
        let t = table(&[["A", "1"], ["A", "1"], ["A", "1"]]);
        let mut first = DedupReview::new(t.clone(), None, &DuplicateKey::FullRow).unwrap();
        first.decide(Decision::Remove).unwrap();

        let mut resumed = DedupReview::new(t.clone(), None, &DuplicateKey::FullRow).unwrap();
        resumed.adopt_decisions(first).unwrap();
        assert_eq!(resumed.remaining(), 1);
        assert_eq!(resumed.current().unwrap().row, 2);
        resumed.decide(Decision::Keep).unwrap();
        let (after, removed) = resumed.into_result();
        assert_eq!(removed, 1);
        assert_eq!(after.len(), 2);

        let stale = DedupReview::new(t.clone(), Some([1; 32]), &DuplicateKey::FullRow).unwrap();
        let mut fresh = DedupReview::new(t, Some([2; 32]), &DuplicateKey::FullRow).unwrap();
        assert!(matches!(fresh.adopt_decisions(stale), Err(SisError::Conflict(_))));
    }

    #[test]
    fn mode_parses_from_text() {
        assert_eq!("Forceful".parse::<DedupMode>().unwrap(), DedupMode::Forceful);
        assert_eq!("soft".parse::<DedupMode>().unwrap(), DedupMode::Soft);
        assert!("maybe".parse::<DedupMode>().is_err());
    }
}
