//! Chunked devotee imports.
//!
//! A validated upload is parked in the user's session as an [`UploadJob`].
//! Each poll from the browser runs one round: the next `batch_size × workers`
//! rows are split into chunks and written by a small pool of blocking
//! workers. Chunks run concurrently, so rows of one round may land in any
//! order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::attendance::percentage;
use crate::database::Database;
use crate::models::DevoteeInput;

/// Rows waiting to be imported plus the progress so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadJob {
    pub rows: Vec<DevoteeInput>,
    /// Number of rounds already run.
    pub cursor: usize,
    pub created: usize,
    pub updated: usize,
}

impl UploadJob {
    pub fn new(rows: Vec<DevoteeInput>) -> Self {
        UploadJob {
            rows,
            ..Default::default()
        }
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    /// Rows covered by the rounds run so far.
    pub fn processed(&self, round_size: usize) -> usize {
        (self.cursor * round_size.max(1)).min(self.total())
    }

    pub fn is_complete(&self, round_size: usize) -> bool {
        self.processed(round_size) >= self.total()
    }

    fn progress(&self, round_size: usize) -> BatchProgress {
        let processed = self.processed(round_size);
        let total = self.total();
        BatchProgress {
            processed,
            total,
            created: self.created,
            updated: self.updated,
            complete: processed >= total,
            percentage: if total == 0 { 100 } else { percentage(processed, total) },
            current_batch: self.cursor,
        }
    }
}

/// What the upload page's progress bar shows after each round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub created: usize,
    pub updated: usize,
    pub complete: bool,
    pub percentage: u32,
    pub current_batch: usize,
}

/// Run one round of `job` and advance its cursor.
///
/// A chunk whose write fails (or whose worker panics) is logged and counts
/// as nothing created or updated; the round still completes.
pub async fn process_round(
    db: Arc<Database>,
    job: &mut UploadJob,
    batch_size: usize,
    workers: usize,
) -> BatchProgress {
    let batch_size = batch_size.max(1);
    let round_size = batch_size * workers.max(1);
    let total = job.total();

    let start = (job.cursor * round_size).min(total);
    let end = (start + round_size).min(total);
    if start >= end {
        return job.progress(round_size);
    }

    let mut set = JoinSet::new();
    for chunk in job.rows[start..end].chunks(batch_size) {
        let db = Arc::clone(&db);
        let chunk = chunk.to_vec();
        set.spawn_blocking(move || db.import_devotees(&chunk));
    }

    let mut created = 0;
    let mut updated = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok((c, u))) => {
                created += c;
                updated += u;
            }
            Ok(Err(e)) => log::error!("Import chunk failed: {}", e),
            Err(e) => log::error!("Import worker stopped: {}", e),
        }
    }

    job.cursor += 1;
    job.created += created;
    job.updated += updated;

    let progress = job.progress(round_size);
    log::info!(
        "Import round {}: {}/{} rows ({} created, {} updated)",
        progress.current_batch,
        progress.processed,
        progress.total,
        progress.created,
        progress.updated
    );
    progress
}
