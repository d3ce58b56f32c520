use std::collections::HashSet;

use rand::Rng;

use crate::errors::{AppError, AppResult};
use crate::foursquare::BaseVenue;

/// Candidates for the current discovery session. The list is fixed at
/// construction (source order preserved); exclusion is permanent for the
/// session. Picking and excluding are separate steps so a pick can be
/// committed only once the caller decides to keep it.
#[derive(Debug)]
pub struct SelectionPool {
    candidates: Vec<BaseVenue>,
    excluded: HashSet<String>,
}

impl SelectionPool {
    pub fn new(candidates: Vec<BaseVenue>) -> AppResult<Self> {
        if candidates.is_empty() {
            return Err(AppError::EmptyCandidateSet);
        }
        Ok(Self {
            candidates,
            excluded: HashSet::new(),
        })
    }

    pub fn eligible(&self) -> Vec<&BaseVenue> {
        self.candidates
            .iter()
            .filter(|venue| !self.excluded.contains(&venue.id))
            .collect()
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible().len()
    }

    /// Uniform pick over the eligible remainder. Does not exclude.
    pub fn pick_random<R: Rng>(&self, rng: &mut R) -> AppResult<BaseVenue> {
        let eligible = self.eligible();
        if eligible.is_empty() {
            return Err(AppError::NoEligibleCandidates);
        }
        let index = rng.gen_range(0..eligible.len());
        Ok(eligible[index].clone())
    }

    /// Idempotent; excluding an unknown id is a no-op.
    pub fn exclude(&mut self, id: &str) {
        if self.candidates.iter().any(|venue| venue.id == id) {
            self.excluded.insert(id.to_string());
        }
    }
}
