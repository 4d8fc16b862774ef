use chain_kit_common::{BlockIdentity, OptionValue};
use image::DynamicImage;

use crate::block::{ProcessContext, ProcessOutput, Processor};
use crate::error::ProcessingError;
use crate::options::{Constraint, DefaultSource, OptionDecl, OptionKind};

/// Binary thresholding on the luminance plane
#[derive(Debug, Clone, Copy, Default)]
pub struct Threshold;

impl Processor for Threshold {
    fn identity(&self) -> BlockIdentity {
        BlockIdentity::new("threshold", "1.0.0")
    }

    fn declared_options(&self) -> Vec<OptionDecl> {
        vec![
            OptionDecl::new("level", OptionKind::Int, "cutoff intensity")
                .with_constraint(Constraint::Range { min: 0.0, max: 255.0 })
                .with_default(DefaultSource::Static(OptionValue::Int(128))),
        ]
    }

    fn process(
        &self,
        ctx: ProcessContext<'_>,
    ) -> Result<ProcessOutput, ProcessingError> {
        let level = ctx.options.require_int("level")? as u8;
        ctx.log.append(format!("threshold level={level}"));
        let binary = imageproc::contrast::threshold(&ctx.image.pixels.to_luma8(), level);
        Ok(ProcessOutput::Image {
            pixels: DynamicImage::ImageLuma8(binary),
            metadata: ctx.image.metadata.derived("thresholded"),
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
    use chain_kit_common::ImageMetadata;
    use image::Luma;

    #[test]
    fn test_threshold_binarizes() {
        let store = MemoryStore::new();
        let mut pixels = image::GrayImage::new(4, 4);
        pixels.put_pixel(0, 0, Luma([200]));
        pixels.put_pixel(1, 0, Luma([50]));
        let origin = store.insert_image(
            DynamicImage::ImageLuma8(pixels),
            ImageMetadata::new("cells", 4, 4).unwrap(),
        );

        let mut block = Block::new(Threshold).with_option("level", OptionValue::Int(100));
        let result = block.run(&store, &origin, &NoopKeepAlive);

        assert!(result.status.is_success());
        let output = store.fetch_image(&result.output.unwrap()).unwrap().pixels.to_luma8();
        assert_eq!(output.get_pixel(0, 0).0[0], 255);
        assert_eq!(output.get_pixel(1, 0).0[0], 0);
    }

    #[test]
    fn test_level_out_of_range_rejected() {
        let store = MemoryStore::new();
        let origin = store.insert_image(
            DynamicImage::new_luma8(4, 4),
            ImageMetadata::new("cells", 4, 4).unwrap(),
        );
        let mut block = Block::new(Threshold).with_option("level", OptionValue::Int(300));
        let result = block.run(&store, &origin, &NoopKeepAlive);
        assert!(!result.status.is_success());
    }
}
