//! Background batch production.
//!
//! Each domain gets a small pool of OS threads that pull file paths from a
//! shared [`FileCycler`], decode them, assemble fixed-size batches and push
//! them into a bounded tokio channel. The consumer blocks on an empty queue
//! and producers block on a full one.
//!
//! Shutdown stops the pool's [`StopToken`], closes the receiver so that
//! producers parked in `blocking_send` wake up, then joins every thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::folder::{FileCycler, ImageFolder};
use crate::stop::StopToken;
use crate::types::{Domain, ImageBatch, SourceError};

/// Sizing of one domain's producer pool.
#[derive(Debug, Clone, Copy)]
pub struct PrefetchConfig {
    /// Images per batch.
    pub batch_size: usize,
    /// Producer threads per domain.
    pub num_workers: usize,
    /// Batches buffered ahead of the consumer.
    pub queue_capacity: usize,
    /// Seed for the per-epoch file shuffle.
    pub seed: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            num_workers: 2,
            queue_capacity: 4,
            seed: 0,
        }
    }
}

/// A running producer pool for one domain.
pub struct DomainPrefetcher {
    domain: Domain,
    rx: mpsc::Receiver<ImageBatch>,
    stop: StopToken,
    workers: Vec<JoinHandle<()>>,
}

impl DomainPrefetcher {
    /// Start `config.num_workers` producers for `folder`.
    ///
    /// The pool stops when `stop` (or the pool's own child token) is stopped.
    pub fn spawn(domain: Domain, folder: ImageFolder, config: PrefetchConfig, stop: &StopToken) -> Self {
        let stop = stop.child();
        tracing::debug!(domain = %domain, root = %folder.root().display(), "Spawning batch producers");
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let seed = match domain {
            Domain::X => config.seed,
            Domain::Y => config.seed.wrapping_add(1),
        };
        let cycler = Arc::new(FileCycler::new(folder.files().to_vec(), seed));
        let folder = Arc::new(folder);

        let workers = (0..config.num_workers.max(1))
            .map(|worker_id| {
                let tx = tx.clone();
                let stop = stop.clone();
                let cycler = Arc::clone(&cycler);
                let folder = Arc::clone(&folder);
                let batch_size = config.batch_size.max(1);
                std::thread::spawn(move || {
                    produce(domain, worker_id, &folder, &cycler, batch_size, &stop, &tx);
                })
            })
            .collect();

        tracing::info!(
            domain = %domain,
            workers = config.num_workers.max(1),
            batch_size = config.batch_size,
            queue_capacity = config.queue_capacity.max(1),
            "Started batch producers"
        );

        Self {
            domain,
            rx,
            stop,
            workers,
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Block until the next batch is ready.
    pub fn next_batch(&mut self) -> Result<ImageBatch, SourceError> {
        if self.stop.is_stopped() {
            return Err(SourceError::Cancelled);
        }
        match self.rx.blocking_recv() {
            Some(batch) => Ok(batch),
            None if self.stop.is_stopped() => Err(SourceError::Cancelled),
            None => Err(SourceError::ProducersExited(self.domain)),
        }
    }

    /// Stop producers, wake any blocked on a full queue and join them all.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.stop.stop();
        self.rx.close();
        // Drain so buffered batches are freed before joining.
        while self.rx.try_recv().is_ok() {}
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!(domain = %self.domain, "Batch producer panicked");
            }
        }
        tracing::debug!(domain = %self.domain, "Batch producers joined");
    }
}

impl Drop for DomainPrefetcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn produce(
    domain: Domain,
    worker_id: usize,
    folder: &ImageFolder,
    cycler: &FileCycler,
    batch_size: usize,
    stop: &StopToken,
    tx: &mpsc::Sender<ImageBatch>,
) {
    let shape = folder.shape();

    'batches: loop {
        let mut images = Vec::with_capacity(batch_size);
        while images.len() < batch_size {
            if stop.is_stopped() {
                break 'batches;
            }
            let Some((epoch, path)) = cycler.next_with_epoch() else {
                break 'batches;
            };
            match folder.decode(&path) {
                Ok(pixels) => images.push(pixels),
                Err(e) => {
                    tracing::warn!(domain = %domain, worker_id, error = %e, "Skipping undecodable image");
                    if cycler.record_failure(epoch) {
                        tracing::error!(
                            domain = %domain,
                            worker_id,
                            epoch,
                            "No decodable image in a full pass, stopping producer"
                        );
                        break 'batches;
                    }
                }
            }
        }

        let batch = match ImageBatch::from_images(shape, images) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(domain = %domain, worker_id, error = %e, "Failed to assemble batch");
                break;
            }
        };
        if tx.blocking_send(batch).is_err() {
            // Receiver closed.
            break;
        }
    }
    tracing::debug!(domain = %domain, worker_id, "Batch producer exiting");
}
