use crate::models::CompanyUpdate;

/// Enriched companies waiting to be written.
///
/// `push` hands back the whole batch as soon as the flush threshold is
/// reached, so the buffer never holds `save_frequency` entries between
/// calls.
#[derive(Debug)]
pub struct ResultsBuffer {
    entries: Vec<CompanyUpdate>,
    save_frequency: usize,
}

impl ResultsBuffer {
    pub fn new(save_frequency: usize) -> Self {
        let save_frequency = save_frequency.max(1);
        Self {
            entries: Vec::with_capacity(save_frequency),
            save_frequency,
        }
    }

    /// Append an update, returning the batch to flush once the threshold is hit
    pub fn push(&mut self, update: CompanyUpdate) -> Option<Vec<CompanyUpdate>> {
        self.entries.push(update);
        if self.entries.len() >= self.save_frequency {
            Some(self.drain())
        } else {
            None
        }
    }

    /// Take everything buffered so far
    pub fn drain(&mut self) -> Vec<CompanyUpdate> {
        std::mem::replace(&mut self.entries, Vec::with_capacity(self.save_frequency))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save_frequency(&self) -> usize {
        self.save_frequency
    }
}
