//! Unit record deduplication across extraction passes.
//!
//! Different passes (recipe, generic table, regex fallback, OCR) can each
//! re-read the same drawn unit. Records sharing an identity collapse to
//! one, keeping the record from the most trusted method; the losing
//! record's evidence stays in the keeper's audit trail.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::models::UnitRecord;

/// Result of deduplicating the concatenated pass outputs.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub records: Vec<UnitRecord>,
    pub duplicates_dropped: usize,
}

/// Collapse records from multiple extraction passes by identity.
///
/// Identity is the drawn unit id when present, otherwise a per-pass
/// page/row position key, so repeated passes over the same page collide
/// while distinct anonymous rows on one page do not. First-seen order is
/// preserved; on collision the higher trust rank wins, and equal ranks
/// keep the earlier record. Idempotent: feeding the output back in as a
/// single pass reproduces it.
pub fn dedup_records(passes: Vec<Vec<UnitRecord>>) -> DedupOutcome {
    let mut order: Vec<String> = Vec::new();
    let mut kept: HashMap<String, UnitRecord> = HashMap::new();
    let mut duplicates_dropped = 0;

    for pass in passes {
        let mut row_counters: HashMap<u32, usize> = HashMap::new();
        for record in pass {
            let index = row_counters.entry(record.source.page).or_default();
            let identity = record.identity(*index);
            *index += 1;

            match kept.entry(identity.clone()) {
                Entry::Occupied(mut slot) => {
                    duplicates_dropped += 1;
                    let incumbent = slot.get_mut();
                    if record.source.method.trust_rank() > incumbent.source.method.trust_rank() {
                        let prior_evidence = incumbent.source.evidence.clone();
                        *incumbent = record;
                        if !prior_evidence.is_empty() {
                            incumbent
                                .source
                                .evidence
                                .push_str(&format!(" | superseded: {}", prior_evidence));
                        }
                    }
                }
                Entry::Vacant(slot) => {
                    order.push(identity);
                    slot.insert(record);
                }
            }
        }
    }

    let records = order
        .into_iter()
        .filter_map(|identity| kept.remove(&identity))
        .collect();

    DedupOutcome {
        records,
        duplicates_dropped,
    }
}
