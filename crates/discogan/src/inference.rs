//! Inference: translate image batches with trained generators, and the
//! evaluation loop that writes translation grids without any optimizer step.

use std::marker::PhantomData;

use burn::prelude::*;
use image_source::{BatchSource, Domain, ImageBatch, SourceError};

use crate::model::bridge::{batch_to_tensor, tensor_to_batch};
use crate::model::ImageGenerator;
use crate::training::sample::SampleSink;

/// Pair of generators used for translation only.
///
/// Use inference-mode modules (`valid()` of an autodiff module, or a module
/// loaded on a plain backend): batch norm then uses running statistics.
pub struct Translator<B: Backend, G> {
    g: G,
    f: G,
    device: B::Device,
    _backend: PhantomData<B>,
}

impl<B, G> Translator<B, G>
where
    B: Backend,
    G: ImageGenerator<B>,
{
    /// `g` maps X → Y, `f` maps Y → X.
    pub fn new(g: G, f: G, device: B::Device) -> Self {
        Self {
            g,
            f,
            device,
            _backend: PhantomData,
        }
    }

    /// Translate a batch from `domain` into the other domain.
    pub fn translate(&self, domain: Domain, batch: &ImageBatch) -> Result<ImageBatch, SourceError> {
        let input = batch_to_tensor::<B>(batch, &self.device);
        let output = match domain {
            Domain::X => self.g.generate(input),
            Domain::Y => self.f.generate(input),
        };
        tensor_to_batch(output)
    }

    /// Columns `[x, G(x), y, F(y)]`.
    pub fn sample_columns(&self, x: &ImageBatch, y: &ImageBatch) -> Result<Vec<ImageBatch>, SourceError> {
        Ok(vec![
            x.clone(),
            self.translate(Domain::X, x)?,
            y.clone(),
            self.translate(Domain::Y, y)?,
        ])
    }

    /// Columns `[input, translated, reconstructed]` for a batch from `domain`.
    pub fn round_trip(&self, domain: Domain, batch: &ImageBatch) -> Result<Vec<ImageBatch>, SourceError> {
        let translated = self.translate(domain, batch)?;
        let other = match domain {
            Domain::X => Domain::Y,
            Domain::Y => Domain::X,
        };
        let reconstructed = self.translate(other, &translated)?;
        Ok(vec![batch.clone(), translated, reconstructed])
    }
}

/// Grid tag for a round-trip translation.
pub fn round_trip_tag(prefix: &str, domain: Domain, round: usize) -> String {
    let direction = match domain {
        Domain::X => "x2y",
        Domain::Y => "y2x",
    };
    format!("{prefix}{direction}_{round}")
}

/// Write `rounds` round-trip grids per direction, each of `count` fresh images.
///
/// Source errors (including cancellation) are returned; sink failures are
/// logged and skipped. Returns the number of grids written.
pub fn write_translations<B, G, S, K>(
    translator: &Translator<B, G>,
    source: &mut S,
    sink: &mut K,
    prefix: &str,
    rounds: usize,
    count: usize,
) -> Result<usize, SourceError>
where
    B: Backend,
    G: ImageGenerator<B>,
    S: BatchSource + ?Sized,
    K: SampleSink + ?Sized,
{
    let mut written = 0;
    for round in 0..rounds {
        for domain in [Domain::X, Domain::Y] {
            let batch = source.next_batch(domain)?.take(count);
            let columns = translator.round_trip(domain, &batch)?;
            let tag = round_trip_tag(prefix, domain, round);
            match sink.write(&tag, &columns) {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(tag, error = %e, "Failed to write translation grid"),
            }
        }
        tracing::debug!(round, rounds, "Translation round done");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use image_source::{ImageShape, StaticSource};

    use crate::model::GeneratorConfig;

    type TestBackend = NdArray<f32>;

    struct Collect(Vec<(String, usize)>);

    impl SampleSink for Collect {
        fn write(&mut self, tag: &str, columns: &[ImageBatch]) -> anyhow::Result<()> {
            self.0.push((tag.to_string(), columns[0].len()));
            Ok(())
        }
    }

    fn translator() -> Translator<TestBackend, crate::model::Generator<TestBackend>> {
        let device = Default::default();
        let config = GeneratorConfig::new().with_base_filters(4).with_channels(1);
        Translator::new(config.init(&device), config.init(&device), device)
    }

    #[test]
    fn test_translate_preserves_shape() {
        let batch = ImageBatch::filled(ImageShape::new(16, 16, 1).unwrap(), 2, 0.3);
        let out = translator().translate(Domain::X, &batch).unwrap();
        assert_eq!(out.dims(), batch.dims());
        assert!(out.pixels().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_sample_columns_order() {
        let shape = ImageShape::new(16, 16, 1).unwrap();
        let x = ImageBatch::filled(shape, 2, 0.1);
        let y = ImageBatch::filled(shape, 2, 0.9);
        let columns = translator().sample_columns(&x, &y).unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0], x);
        assert_eq!(columns[2], y);
    }

    #[test]
    fn test_write_translations_rounds_and_count() {
        let shape = ImageShape::new(16, 16, 1).unwrap();
        let mut source = StaticSource::repeating(
            ImageBatch::filled(shape, 5, 0.2),
            ImageBatch::filled(shape, 5, 0.8),
        );
        let mut sink = Collect(Vec::new());

        let written = write_translations(&translator(), &mut source, &mut sink, "test_", 2, 3).unwrap();

        assert_eq!(written, 4);
        let tags: Vec<&str> = sink.0.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(tags, vec!["test_x2y_0", "test_y2x_0", "test_x2y_1", "test_y2x_1"]);
        assert!(sink.0.iter().all(|(_, n)| *n == 3), "each grid must hold `count` images");
    }
}
