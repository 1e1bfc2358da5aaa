//! The batch source interface consumed by the trainer.

use std::path::PathBuf;

use crate::folder::ImageFolder;
use crate::prefetch::{DomainPrefetcher, PrefetchConfig};
use crate::stop::StopToken;
use crate::types::{Crop, Domain, ImageBatch, ImageShape, SourceError};

/// Infinite, blocking supply of image batches for both domains.
///
/// Every call for a given domain returns a batch of the same shape and size.
/// `Err(SourceError::Cancelled)` signals a controlled shutdown.
pub trait BatchSource {
    fn next_batch(&mut self, domain: Domain) -> Result<ImageBatch, SourceError>;

    /// Release background resources. Called once the trainer is done pulling.
    fn shutdown(&mut self) {}
}

/// Where one domain's images live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec {
    pub dir: PathBuf,
    pub crop: Crop,
}

/// Batches decoded from two image folders by background producer pools.
pub struct FolderSource {
    x: DomainPrefetcher,
    y: DomainPrefetcher,
}

impl FolderSource {
    /// Validate both folders, then start their producers.
    ///
    /// Validation happens before any thread is spawned, so a bad directory
    /// fails here and not on the first `next_batch`.
    pub fn open(
        x: &DomainSpec,
        y: &DomainSpec,
        shape: ImageShape,
        config: PrefetchConfig,
        stop: &StopToken,
    ) -> Result<Self, SourceError> {
        let x_folder = ImageFolder::open(&x.dir, shape, x.crop)?;
        let y_folder = ImageFolder::open(&y.dir, shape, y.crop)?;
        Ok(Self {
            x: DomainPrefetcher::spawn(Domain::X, x_folder, config, stop),
            y: DomainPrefetcher::spawn(Domain::Y, y_folder, config, stop),
        })
    }
}

impl BatchSource for FolderSource {
    fn next_batch(&mut self, domain: Domain) -> Result<ImageBatch, SourceError> {
        match domain {
            Domain::X => self.x.next_batch(),
            Domain::Y => self.y.next_batch(),
        }
    }

    fn shutdown(&mut self) {
        self.x.shutdown();
        self.y.shutdown();
    }
}

/// Fixed in-memory batches, returned round-robin.
///
/// Used for tests and for translating a known set of images.
#[derive(Debug, Clone)]
pub struct StaticSource {
    x: Vec<ImageBatch>,
    y: Vec<ImageBatch>,
    cursor_x: usize,
    cursor_y: usize,
}

impl StaticSource {
    pub fn new(x: Vec<ImageBatch>, y: Vec<ImageBatch>) -> Self {
        Self {
            x,
            y,
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    /// A source that always returns the same pair of batches.
    pub fn repeating(x: ImageBatch, y: ImageBatch) -> Self {
        Self::new(vec![x], vec![y])
    }
}

impl BatchSource for StaticSource {
    fn next_batch(&mut self, domain: Domain) -> Result<ImageBatch, SourceError> {
        let (batches, cursor) = match domain {
            Domain::X => (&self.x, &mut self.cursor_x),
            Domain::Y => (&self.y, &mut self.cursor_y),
        };
        if batches.is_empty() {
            return Err(SourceError::ProducersExited(domain));
        }
        let batch = batches[*cursor % batches.len()].clone();
        *cursor += 1;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_source_round_robin() {
        let shape = ImageShape::new(1, 1, 1).unwrap();
        let a = ImageBatch::filled(shape, 2, 0.0);
        let b = ImageBatch::filled(shape, 2, 1.0);
        let mut source = StaticSource::new(vec![a.clone(), b.clone()], vec![b.clone()]);

        assert_eq!(source.next_batch(Domain::X).unwrap(), a);
        assert_eq!(source.next_batch(Domain::X).unwrap(), b);
        assert_eq!(source.next_batch(Domain::X).unwrap(), a);
        assert_eq!(source.next_batch(Domain::Y).unwrap(), b);
    }

    #[test]
    fn test_static_source_empty_domain_errors() {
        let shape = ImageShape::new(1, 1, 1).unwrap();
        let mut source = StaticSource::new(vec![ImageBatch::filled(shape, 1, 0.0)], vec![]);
        assert!(matches!(
            source.next_batch(Domain::Y),
            Err(SourceError::ProducersExited(Domain::Y))
        ));
    }
}
