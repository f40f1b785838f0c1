// Copyright (c) 2024 Botho Foundation

use parking_lot::Mutex;
use pegnode::address::Address;
use pegnode::chain::{Entry, GradeError, GradeResult, Grader, Winner};
use pegnode::params::GraderVersion;
use pegnode::ticker::Ticker;
use std::collections::{BTreeMap, HashSet};

/// Grades every non-empty oracle block to the same configured rates.
///
/// Each oracle entry wins, paying out to the address in the first 32 bytes
/// of its content.
#[derive(Default)]
pub struct FixedGrader {
    rates: Mutex<BTreeMap<Ticker, u64>>,
    failures: Mutex<HashSet<u64>>,
}

impl FixedGrader {
    pub fn new(rates: &[(Ticker, u64)]) -> Self {
        Self {
            rates: Mutex::new(rates.iter().copied().collect()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_rates(&self, rates: &[(Ticker, u64)]) {
        *self.rates.lock() = rates.iter().copied().collect();
    }

    pub fn fail_once(&self, height: u64) {
        self.failures.lock().insert(height);
    }
}

impl Grader for FixedGrader {
    fn grade(
        &self,
        _version: GraderVersion,
        height: u64,
        entries: &[Entry],
    ) -> Result<GradeResult, GradeError> {
        if self.failures.lock().remove(&height) {
            return Err(GradeError(format!("injected failure at {height}")));
        }
        if entries.is_empty() {
            return Ok(GradeResult::default());
        }
        let winners = entries
            .iter()
            .filter_map(|entry| {
                let payout: [u8; 32] = entry.content.get(..32)?.try_into().ok()?;
                Some(Winner {
                    entry_hash: entry.hash,
                    payout: Address(payout),
                })
            })
            .collect();
        Ok(GradeResult {
            rates: self.rates.lock().clone(),
            winners,
        })
    }
}
