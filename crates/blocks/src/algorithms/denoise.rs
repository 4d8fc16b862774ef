use chain_kit_common::{BlockIdentity, ImageMetadata, OptionValue};

use crate::block::{ProcessContext, ProcessOutput, Processor};
use crate::error::ProcessingError;
use crate::options::{Constraint, DefaultSource, OptionDecl, OptionKind};

/// Gaussian denoising.
///
/// The blur width defaults to twice the physical pixel size when the
/// acquired image carries one, clamped to a sane range; images without a
/// calibrated pixel size fall back to one pixel.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianDenoise;

fn default_sigma(metadata: &ImageMetadata) -> Option<OptionValue> {
    let sigma = match metadata.pixel_size_um {
        Some(pixel_size) => (2.0 * pixel_size).clamp(0.5, 5.0),
        None => 1.0,
    };
    Some(OptionValue::Float(sigma))
}

impl Processor for GaussianDenoise {
    fn identity(&self) -> BlockIdentity {
        BlockIdentity::new("denoise", "1.0.0")
    }

    fn declared_options(&self) -> Vec<OptionDecl> {
        vec![
            OptionDecl::new("sigma", OptionKind::Float, "Gaussian blur width in pixels")
                .with_constraint(Constraint::GreaterThan(0.0))
                .with_default(DefaultSource::FromMetadata(default_sigma)),
        ]
    }

    fn process(
        &self,
        ctx: ProcessContext<'_>,
    ) -> Result<ProcessOutput, ProcessingError> {
        let sigma = ctx.options.require_float("sigma")?;
        ctx.log.append(format!("gaussian blur sigma={sigma}"));
        let pixels = ctx.image.pixels.blur(sigma as f32);
        Ok(ProcessOutput::Image {
            pixels,
            metadata: ctx.image.metadata.derived("denoised"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::keepalive::NoopKeepAlive;
    use crate::store::memory::MemoryStore;
    use crate::store::ImageStore;
    use image::{DynamicImage, GenericImageView};

    #[test]
    fn test_denoise_preserves_dimensions() {
        let store = MemoryStore::new();
        let metadata = ImageMetadata::new("noisy", 32, 24).unwrap();
        let mut pixels = image::GrayImage::new(32, 24);
        for (x, y, p) in pixels.enumerate_pixels_mut() {
            p.0[0] = if (x + y) % 2 == 0 { 255 } else { 0 };
        }
        let origin = store.insert_image(DynamicImage::ImageLuma8(pixels), metadata);

        let mut block = Block::new(GaussianDenoise).with_option("sigma", OptionValue::Float(1.5));
        let result = block.run(&store, &origin, &NoopKeepAlive);

        assert!(result.status.is_success());
        let output = store.fetch_image(&result.output.unwrap()).unwrap();
        assert_eq!(output.pixels.dimensions(), (32, 24));
        assert_eq!(output.metadata.name, "noisy-denoised");
    }

    #[test]
    fn test_default_sigma_tracks_pixel_size() {
        let calibrated = ImageMetadata::new("a", 8, 8).unwrap().with_pixel_size_um(0.25);
        assert_eq!(default_sigma(&calibrated), Some(OptionValue::Float(0.5)));

        let coarse = ImageMetadata::new("b", 8, 8).unwrap().with_pixel_size_um(10.0);
        assert_eq!(default_sigma(&coarse), Some(OptionValue::Float(5.0)));

        let uncalibrated = ImageMetadata::new("c", 8, 8).unwrap();
        assert_eq!(default_sigma(&uncalibrated), Some(OptionValue::Float(1.0)));
    }
}
