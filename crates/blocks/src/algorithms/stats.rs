use chain_kit_common::{BlockIdentity, OptionValue};
use serde_json::json;

use crate::block::{ProcessContext, ProcessOutput, Processor};
use crate::error::ProcessingError;
use crate::options::{Constraint, DefaultSource, OptionDecl, OptionKind};

/// Luminance statistics, published as a JSON report on the input image.
///
/// A measurement block: it produces no derived image, so the chain forwards
/// its input unchanged to the next member.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntensityStats;

impl Processor for IntensityStats {
    fn identity(&self) -> BlockIdentity {
        BlockIdentity::new("intensity-stats", "1.0.0")
    }

    fn declared_options(&self) -> Vec<OptionDecl> {
        vec![
            OptionDecl::new("bins", OptionKind::Int, "histogram bin count")
                .with_constraint(Constraint::Range { min: 2.0, max: 1024.0 })
                .with_default(DefaultSource::Static(OptionValue::Int(256))),
        ]
    }

    fn process(
        &self,
        ctx: ProcessContext<'_>,
    ) -> Result<ProcessOutput, ProcessingError> {
        let bins = ctx.options.require_int("bins")? as usize;
        let plane = ctx.image.pixels.to_luma8();
        let total = plane.len();
        if total == 0 {
            return Err(ProcessingError::InvalidImage("empty luminance plane".into()));
        }

        let mut histogram = vec![0u64; bins];
        let mut sum = 0.0f64;
        let mut min = u8::MAX;
        let mut max = u8::MIN;
        for value in plane.iter().copied() {
            sum += value as f64;
            min = min.min(value);
            max = max.max(value);
            let bin = (value as usize * bins) / 256;
            histogram[bin] += 1;
        }
        let mean = sum / total as f64;
        let variance = plane
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / total as f64;

        ctx.log.append(format!(
            "intensity stats over {total} pixel(s): mean={mean:.2} min={min} max={max}"
        ));

        Ok(ProcessOutput::Report {
            name: "intensity-stats".into(),
            payload: json!({
                "pixels": total,
                "min": min,
                "max": max,
                "mean": mean,
                "stddev": variance.sqrt(),
                "bins": bins,
                "histogram": histogram,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockStage};
    use crate::keepalive::NoopKeepAlive;
    use crate::store::memory::MemoryStore;
    use chain_kit_common::ImageMetadata;
    use image::{DynamicImage, Luma};

    #[test]
    fn test_report_published_on_input_and_ref_forwarded() {
        let store = MemoryStore::new();
        let mut pixels = image::GrayImage::new(2, 2);
        pixels.put_pixel(0, 0, Luma([0]));
        pixels.put_pixel(1, 0, Luma([255]));
        pixels.put_pixel(0, 1, Luma([128]));
        pixels.put_pixel(1, 1, Luma([128]));
        let origin = store.insert_image(
            DynamicImage::ImageLuma8(pixels),
            ImageMetadata::new("field", 2, 2).unwrap(),
        );

        let mut block = Block::new(IntensityStats);
        let result = block.run(&store, &origin, &NoopKeepAlive);

        assert!(result.status.is_success());
        assert_eq!(block.stage(), BlockStage::Annotated);
        // The input reference is forwarded, not a new image.
        assert_eq!(result.output.as_ref(), Some(&origin));
        assert_eq!(store.image_count(), 1);

        let attachments = store.attachments(&origin);
        let report = attachments
            .iter()
            .find(|a| a.name == "intensity-stats.json")
            .expect("report attachment");
        assert_eq!(report.mime, "application/json");
        let payload: serde_json::Value = serde_json::from_slice(&report.content).unwrap();
        assert_eq!(payload["pixels"], 4);
        assert_eq!(payload["min"], 0);
        assert_eq!(payload["max"], 255);
        // No self-link for a measurement block.
        assert!(store.links().is_empty());
    }
}
