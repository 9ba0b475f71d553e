use crate::dataset::BatchSource;
use crate::model::Batch;

/// Infinite view over a finite [`BatchSource`].
///
/// When the current pass runs dry the cursor restarts from the beginning of
/// the source and the lap counter advances. Laps are diagnostic only.
pub struct Cycle<'a, S: BatchSource + ?Sized> {
    source: &'a S,
    cursor: Box<dyn Iterator<Item = Batch> + 'a>,
    laps: u64,
}

impl<'a, S: BatchSource + ?Sized> Cycle<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source, cursor: source.batches(), laps: 0 }
    }

    /// Next batch, restarting the source as often as needed.
    ///
    /// Returns `None` only if a fresh pass yields nothing, i.e. the source is empty.
    pub fn next_batch(&mut self) -> Option<Batch> {
        if let Some(batch) = self.cursor.next() {
            return Some(batch);
        }

        self.cursor = self.source.batches();
        let batch = self.cursor.next()?;
        self.laps += 1;
        tracing::info!(lap = self.laps, "completed epoch");
        Some(batch)
    }

    /// Number of full passes completed so far.
    pub fn laps(&self) -> u64 {
        self.laps
    }
}

impl<S: BatchSource + ?Sized> Iterator for Cycle<'_, S> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        self.next_batch()
    }
}
