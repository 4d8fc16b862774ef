use chain_kit_common::{BlockIdentity, OptionValue};
use image::{DynamicImage, ImageBuffer, Luma};

use crate::block::{ProcessContext, ProcessOutput, Processor};
use crate::error::{BlockError, ProcessingError, Result};
use crate::options::{Constraint, DefaultSource, OptionDecl, OptionKind, ResolvedOptions};

type PlaneF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

const EPSILON: f32 = 1e-6;

/// Richardson–Lucy deconvolution with a Gaussian point-spread function.
///
/// Works on the luminance plane. `psf_sigma` has no universal default (it
/// depends on the optics that acquired the image), so it must be supplied
/// explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct RichardsonLucyDeconvolve;

impl Processor for RichardsonLucyDeconvolve {
    fn identity(&self) -> BlockIdentity {
        BlockIdentity::new("deconvolve", "1.0.0")
    }

    fn declared_options(&self) -> Vec<OptionDecl> {
        vec![
            OptionDecl::new("psf_sigma", OptionKind::Float, "PSF width in pixels")
                .with_constraint(Constraint::GreaterThan(0.0)),
            OptionDecl::new("iterations", OptionKind::Int, "Richardson-Lucy iterations")
                .with_constraint(Constraint::Range { min: 1.0, max: 100.0 })
                .with_default(DefaultSource::Static(OptionValue::Int(10))),
        ]
    }

    fn validate_options(&self, options: &ResolvedOptions) -> Result<()> {
        let iterations = options.int("iterations").unwrap_or(0);
        let psf_sigma = options.float("psf_sigma").unwrap_or(0.0);
        if iterations > 50 && psf_sigma > 5.0 {
            return Err(BlockError::invalid_option(
                "iterations",
                OptionValue::Int(iterations),
                "more than 50 iterations are unstable with psf_sigma > 5",
            ));
        }
        Ok(())
    }

    fn process(
        &self,
        ctx: ProcessContext<'_>,
    ) -> std::result::Result<ProcessOutput, ProcessingError> {
        let psf_sigma = ctx.options.require_float("psf_sigma")? as f32;
        let iterations = ctx.options.require_int("iterations")?;
        ctx.log.append(format!(
            "richardson-lucy: {iterations} iteration(s), psf_sigma={psf_sigma}"
        ));

        let observed = ctx.image.pixels.to_luma32f();
        let mut estimate = observed.clone();

        for _ in 0..iterations {
            // Iterations over large stacks are the slow part; keep the
            // session alive between them.
            ctx.keepalive.beat();
            let reblurred = image::imageops::blur(&estimate, psf_sigma);
            let ratio = combine(&observed, &reblurred, |o, b| o / b.max(EPSILON));
            let correction = image::imageops::blur(&ratio, psf_sigma);
            estimate = combine(&estimate, &correction, |e, c| e * c);
        }

        Ok(ProcessOutput::Image {
            pixels: DynamicImage::ImageLuma8(to_luma8(&estimate)),
            metadata: ctx.image.metadata.derived("deconvolved"),
        })
    }
}

fn combine(a: &PlaneF32, b: &PlaneF32, f: impl Fn(f32, f32) -> f32) -> PlaneF32 {
    let values = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&x, &y)| f(x, y))
        .collect();
    // Dimensions match by construction; from_raw only fails on a length
    // mismatch.
    PlaneF32::from_raw(a.width(), a.height(), values).unwrap_or_else(|| a.clone())
}

fn to_luma8(plane: &PlaneF32) -> ImageBuffer<Luma<u8>, Vec<u8>> {
    let values = plane
        .as_raw()
        .iter()
        .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();
    ImageBuffer::from_raw(plane.width(), plane.height(), values)
        .unwrap_or_else(|| ImageBuffer::new(plane.width(), plane.height()))
}
