//! The block lifecycle state machine.
//!
//! A block runs exactly one acquire → configure → process → publish →
//! annotate pass over one input image. Algorithm-specific behaviour lives
//! behind the [`Processor`] trait; everything else (option resolution,
//! store I/O at the boundaries, log flushing, provenance annotation) is
//! the fixed lifecycle implemented here.

use std::collections::BTreeMap;
use std::time::Instant;

use chain_kit_common::{BlockIdentity, ImageMetadata, ImageRef, OptionValue};
use image::DynamicImage;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::error::{BlockError, ErrorKind, ProcessingError, Result};
use crate::keepalive::KeepAlive;
use crate::log::LogBuffer;
use crate::options::{self, OptionDecl, ResolvedOptions};
use crate::store::{ImageStore, StoreError};

/// Lifecycle stages, in strict order. `Failed` is terminal and reachable
/// from any stage; `Annotated` is the terminal success stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BlockStage {
    Created,
    Acquired,
    Configured,
    Processed,
    Published,
    Annotated,
    Failed,
}

/// The input image as fetched from the store, available from the acquire
/// stage onwards
#[derive(Debug, Clone)]
pub struct AcquiredImage {
    pub reference: ImageRef,
    pub pixels: DynamicImage,
    pub metadata: ImageMetadata,
}

/// What a process stage produces
#[derive(Debug)]
pub enum ProcessOutput {
    /// A derived image, stored as a new store entry
    Image {
        pixels: DynamicImage,
        metadata: ImageMetadata,
    },
    /// A structured result for non-image-producing blocks, attached to the
    /// input image; the input reference is forwarded down the chain
    Report {
        name: String,
        payload: serde_json::Value,
    },
}

/// Everything a processor sees during its process stage
pub struct ProcessContext<'a> {
    pub image: &'a AcquiredImage,
    pub options: &'a ResolvedOptions,
    pub log: &'a mut LogBuffer,
    pub keepalive: &'a dyn KeepAlive,
}

/// The algorithm-specific seam of the lifecycle.
///
/// A chain composes blocks through this trait only; it never depends on a
/// concrete variant. Implementations must be deterministic for fixed input
/// and options; explicitly stochastic algorithms take their seed as a
/// declared option, never as hidden state.
pub trait Processor: Send + Sync {
    /// Stable name/version used for logging and provenance
    fn identity(&self) -> BlockIdentity;

    /// Ordered option declarations; defaults may derive from the acquired
    /// image, which is why resolution happens after acquisition
    fn declared_options(&self) -> Vec<OptionDecl> {
        Vec::new()
    }

    /// Cross-option consistency check, run after per-option validation
    fn validate_options(&self, _options: &ResolvedOptions) -> Result<()> {
        Ok(())
    }

    /// The transformation itself
    fn process(&self, ctx: ProcessContext<'_>)
        -> std::result::Result<ProcessOutput, ProcessingError>;
}

/// Terminal status of one lifecycle run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BlockStatus {
    Succeeded,
    /// Published fine, but annotation was incomplete
    SucceededWithWarnings,
    Failed {
        kind: ErrorKind,
        message: String,
    },
    /// Disabled member; input forwarded unchanged
    Skipped,
}

impl BlockStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::SucceededWithWarnings)
    }
}

/// What a lifecycle run reports back to its caller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlockResult {
    pub identity: BlockIdentity,
    pub status: BlockStatus,
    pub output: Option<ImageRef>,
    pub warnings: Vec<String>,
    pub log: String,
}

/// One processing block: a boxed [`Processor`] plus all lifecycle state.
///
/// Construction takes static configuration only and performs no I/O; the
/// store is first touched when [`Block::run`] acquires the input.
pub struct Block {
    processor: Box<dyn Processor>,
    supplied: BTreeMap<String, OptionValue>,
    enabled: bool,
    stage: BlockStage,
    input: Option<ImageRef>,
    acquired: Option<AcquiredImage>,
    options: Option<ResolvedOptions>,
    produced: Option<ProcessOutput>,
    output: Option<ImageRef>,
    warnings: Vec<String>,
    log: LogBuffer,
}

impl Block {
    pub fn new(processor: impl Processor + 'static) -> Self {
        Self::from_boxed(Box::new(processor))
    }

    pub fn from_boxed(processor: Box<dyn Processor>) -> Self {
        let log = LogBuffer::new(processor.identity().to_string());
        Self {
            processor,
            supplied: BTreeMap::new(),
            enabled: true,
            stage: BlockStage::Created,
            input: None,
            acquired: None,
            options: None,
            produced: None,
            output: None,
            warnings: Vec::new(),
            log,
        }
    }

    /// Supply an explicit option value, overriding the declared default
    pub fn with_option(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.supplied.insert(name.into(), value);
        self
    }

    pub fn with_options(mut self, supplied: BTreeMap<String, OptionValue>) -> Self {
        self.supplied.extend(supplied);
        self
    }

    /// Mark this block to be skipped by the owning chain
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn identity(&self) -> BlockIdentity {
        self.processor.identity()
    }

    pub fn stage(&self) -> BlockStage {
        self.stage
    }

    pub fn declared_options(&self) -> Vec<OptionDecl> {
        self.processor.declared_options()
    }

    /// The options resolved during configure.
    ///
    /// Errors while the block has not reached `Configured`; the map itself
    /// has no mutation API, so it is frozen once this succeeds.
    pub fn resolved_options(&self) -> Result<&ResolvedOptions> {
        self.options
            .as_ref()
            .ok_or(BlockError::OptionsUnavailable { stage: self.stage })
    }

    /// Set iff the publish stage has succeeded
    pub fn output_ref(&self) -> Option<&ImageRef> {
        self.output.as_ref()
    }

    /// Run the whole lifecycle against one input image.
    ///
    /// Fatal stage errors end the block in `Failed`; annotation problems
    /// downgrade the result to `SucceededWithWarnings`. The log buffer is
    /// flushed to the store best-effort in every case.
    pub fn run(
        &mut self,
        store: &dyn ImageStore,
        input: &ImageRef,
        keepalive: &dyn KeepAlive,
    ) -> BlockResult {
        let identity = self.processor.identity();
        self.input = Some(input.clone());
        self.log.append(format!("run starting on {input}"));

        let status = match self.drive(store, input, keepalive) {
            Ok(()) => {
                if self.warnings.is_empty() {
                    BlockStatus::Succeeded
                } else {
                    BlockStatus::SucceededWithWarnings
                }
            }
            Err(err) => {
                self.stage = BlockStage::Failed;
                self.log.warn(format!("failed: {err}"));
                self.flush_log_to(store, input, &identity);
                BlockStatus::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        };

        BlockResult {
            identity,
            status,
            output: self.output.clone(),
            warnings: self.warnings.clone(),
            log: self.log.render(),
        }
    }

    fn drive(
        &mut self,
        store: &dyn ImageStore,
        input: &ImageRef,
        keepalive: &dyn KeepAlive,
    ) -> Result<()> {
        self.acquire(store, input)?;
        keepalive.beat();
        self.configure(store)?;
        keepalive.beat();
        self.process(keepalive)?;
        keepalive.beat();
        self.publish(store)?;
        keepalive.beat();
        self.annotate(store);
        Ok(())
    }

    fn expect(&self, entering: BlockStage, current: BlockStage) -> Result<()> {
        if self.stage == current {
            Ok(())
        } else {
            Err(BlockError::StageOrder {
                entering,
                current: self.stage,
            })
        }
    }

    fn acquire(&mut self, store: &dyn ImageStore, input: &ImageRef) -> Result<()> {
        self.expect(BlockStage::Acquired, BlockStage::Created)?;
        let fetched = store
            .fetch_image(input)
            .map_err(|source| BlockError::Acquisition {
                reference: input.clone(),
                source,
            })?;
        self.log.append(format!(
            "acquired {} `{}` ({}x{}, {} channel(s))",
            input,
            fetched.metadata.name,
            fetched.metadata.width,
            fetched.metadata.height,
            fetched.metadata.channels
        ));
        self.acquired = Some(AcquiredImage {
            reference: input.clone(),
            pixels: fetched.pixels,
            metadata: fetched.metadata,
        });
        self.stage = BlockStage::Acquired;
        Ok(())
    }

    fn configure(&mut self, store: &dyn ImageStore) -> Result<()> {
        self.expect(BlockStage::Configured, BlockStage::Acquired)?;
        let Some(acquired) = self.acquired.as_ref() else {
            return Err(BlockError::StageOrder {
                entering: BlockStage::Configured,
                current: self.stage,
            });
        };
        let decls = self.processor.declared_options();
        let resolved = options::resolve(
            &decls,
            &self.supplied,
            &acquired.reference,
            &acquired.metadata,
            store,
        )?;
        self.processor.validate_options(&resolved)?;

        let summary = resolved
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.log.append(format!("options resolved: {summary}"));
        self.options = Some(resolved);
        self.stage = BlockStage::Configured;
        Ok(())
    }

    fn process(&mut self, keepalive: &dyn KeepAlive) -> Result<()> {
        self.expect(BlockStage::Processed, BlockStage::Configured)?;
        let (Some(acquired), Some(opts)) = (self.acquired.as_ref(), self.options.as_ref()) else {
            return Err(BlockError::StageOrder {
                entering: BlockStage::Processed,
                current: self.stage,
            });
        };
        let started = Instant::now();
        let produced = self.processor.process(ProcessContext {
            image: acquired,
            options: opts,
            log: &mut self.log,
            keepalive,
        })?;
        self.log.append(format!(
            "processed in {:.3}s",
            started.elapsed().as_secs_f64()
        ));
        self.produced = Some(produced);
        self.stage = BlockStage::Processed;
        Ok(())
    }

    fn publish(&mut self, store: &dyn ImageStore) -> Result<()> {
        self.expect(BlockStage::Published, BlockStage::Processed)?;
        let Some(produced) = self.produced.take() else {
            return Err(BlockError::StageOrder {
                entering: BlockStage::Published,
                current: self.stage,
            });
        };
        match produced {
            ProcessOutput::Image { pixels, metadata } => {
                let child = store.store_image(pixels, metadata).map_err(BlockError::Publish)?;
                self.log.append(format!("published {child}"));
                self.output = Some(child);
            }
            ProcessOutput::Report { name, payload } => {
                let Some(input) = self.input.clone() else {
                    return Err(BlockError::StageOrder {
                        entering: BlockStage::Published,
                        current: self.stage,
                    });
                };
                let body = serde_json::to_vec_pretty(&payload)
                    .map_err(|e| BlockError::Publish(StoreError::StoreRejected(e.to_string())))?;
                store
                    .attach_file(&input, &format!("{name}.json"), &body, "application/json")
                    .map_err(BlockError::Publish)?;
                self.log.append(format!("published report `{name}` on {input}"));
                self.output = Some(input);
            }
        }
        self.stage = BlockStage::Published;
        Ok(())
    }

    /// Best-effort: attach the log to the published output and record the
    /// parent→child link. Problems become warnings, never failures: the
    /// processing result is already durably published.
    fn annotate(&mut self, store: &dyn ImageStore) {
        if self.stage != BlockStage::Published {
            return;
        }
        let (Some(input), Some(output)) = (self.input.clone(), self.output.clone()) else {
            return;
        };
        let identity = self.processor.identity();

        let name = format!("{}.log", identity.name);
        if let Err(e) = store.attach_file(&output, &name, self.log.render().as_bytes(), "text/plain")
        {
            let warning = format!("could not attach log to {output}: {e}");
            self.log.warn(&warning);
            self.warnings.push(warning);
        }

        // Report blocks forward their input; a self-link carries no lineage.
        if output != input {
            match store.link_parent_child(&input, &output) {
                Ok(()) => self.log.append(format!("linked {input} -> {output}")),
                Err(e) => {
                    let warning = format!("could not link {input} -> {output}: {e}");
                    self.log.warn(&warning);
                    self.warnings.push(warning);
                }
            }
        }

        self.stage = BlockStage::Annotated;
    }

    fn flush_log_to(&self, store: &dyn ImageStore, target: &ImageRef, identity: &BlockIdentity) {
        let name = format!("{}.log", identity.name);
        if let Err(e) = store.attach_file(target, &name, self.log.render().as_bytes(), "text/plain")
        {
            tracing::warn!(scope = %identity, "could not flush log to {target}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::keepalive::test_support::CountingKeepAlive;
    use crate::keepalive::NoopKeepAlive;
    use crate::options::{Constraint, DefaultSource, OptionKind};
    use crate::store::memory::MemoryStore;

    /// Inverts the image; declares a single thresholded option
    struct Inverter;

    impl Processor for Inverter {
        fn identity(&self) -> BlockIdentity {
            BlockIdentity::new("invert", "1.0.0")
        }

        fn declared_options(&self) -> Vec<OptionDecl> {
            vec![OptionDecl::new("gain", OptionKind::Float, "output gain")
                .with_constraint(Constraint::GreaterThan(0.0))
                .with_default(DefaultSource::Static(OptionValue::Float(1.0)))]
        }

        fn process(
            &self,
            ctx: ProcessContext<'_>,
        ) -> std::result::Result<ProcessOutput, ProcessingError> {
            let gain = ctx.options.require_float("gain")?;
            ctx.log.append(format!("inverting with gain {gain}"));
            let mut pixels = ctx.image.pixels.clone();
            pixels.invert();
            Ok(ProcessOutput::Image {
                pixels,
                metadata: ctx.image.metadata.derived("inverted"),
            })
        }
    }

    struct Exploder;

    impl Processor for Exploder {
        fn identity(&self) -> BlockIdentity {
            BlockIdentity::new("exploder", "1.0.0")
        }

        fn process(
            &self,
            _ctx: ProcessContext<'_>,
        ) -> std::result::Result<ProcessOutput, ProcessingError> {
            Err(ProcessingError::Algorithm("kernel diverged".into()))
        }
    }

    fn seeded_store() -> (MemoryStore, ImageRef) {
        let store = MemoryStore::new();
        let metadata = ImageMetadata::new("specimen", 8, 8).unwrap();
        let reference = store.insert_image(DynamicImage::new_luma8(8, 8), metadata);
        (store, reference)
    }

    #[test]
    fn test_success_path_reaches_annotated() {
        let (store, input) = seeded_store();
        let mut block = Block::new(Inverter);
        assert_eq!(block.stage(), BlockStage::Created);

        let result = block.run(&store, &input, &NoopKeepAlive);

        assert_eq!(result.status, BlockStatus::Succeeded);
        assert_eq!(block.stage(), BlockStage::Annotated);
        let output = result.output.expect("published output");
        assert_eq!(output.id(), "img-2");
        assert_eq!(store.links(), vec![(input.clone(), output.clone())]);
        let attachments = store.attachments(&output);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "invert.log");
        assert!(result.log.contains("options resolved: gain=1"));
    }

    #[test]
    fn test_output_unset_until_publish_succeeds() {
        let (store, input) = seeded_store();
        store.fail_writes(true);
        let mut block = Block::new(Inverter);

        let result = block.run(&store, &input, &NoopKeepAlive);

        assert_eq!(block.stage(), BlockStage::Failed);
        assert!(result.output.is_none());
        assert!(block.output_ref().is_none());
        match result.status {
            BlockStatus::Failed { kind, .. } => assert_eq!(kind, ErrorKind::Publish),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn test_resolved_options_unreadable_before_configure() {
        let block = Block::new(Inverter);
        let err = block.resolved_options().unwrap_err();
        assert!(matches!(err, BlockError::OptionsUnavailable { .. }));
    }

    #[test]
    fn test_resolved_options_frozen_after_run() {
        let (store, input) = seeded_store();
        let mut block = Block::new(Inverter).with_option("gain", OptionValue::Float(2.0));
        block.run(&store, &input, &NoopKeepAlive);

        let options = block.resolved_options().unwrap();
        assert_eq!(options.float("gain"), Some(2.0));
    }

    #[test]
    fn test_annotation_failure_downgrades_not_fails() {
        let (store, input) = seeded_store();
        store.fail_attachments(true);
        store.fail_links(true);
        let mut block = Block::new(Inverter);

        let result = block.run(&store, &input, &NoopKeepAlive);

        assert_eq!(result.status, BlockStatus::SucceededWithWarnings);
        assert!(result.status.is_success());
        assert_eq!(block.stage(), BlockStage::Annotated);
        assert!(result.output.is_some());
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_no_stage_reentry() {
        let (store, input) = seeded_store();
        let mut block = Block::new(Inverter);
        let first = block.run(&store, &input, &NoopKeepAlive);
        assert!(first.status.is_success());

        let second = block.run(&store, &input, &NoopKeepAlive);
        match second.status {
            BlockStatus::Failed { kind, .. } => assert_eq!(kind, ErrorKind::Lifecycle),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn test_missing_input_is_acquisition_failure() {
        let store = MemoryStore::new();
        let mut block = Block::new(Inverter);
        let result = block.run(&store, &ImageRef::new("img-404"), &NoopKeepAlive);
        match result.status {
            BlockStatus::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::Acquisition);
                assert!(message.contains("img-404"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_option_names_option_and_value() {
        let (store, input) = seeded_store();
        let mut block = Block::new(Inverter).with_option("gain", OptionValue::Float(-3.0));
        let result = block.run(&store, &input, &NoopKeepAlive);
        match result.status {
            BlockStatus::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::OptionValidation);
                assert!(message.contains("gain"));
                assert!(message.contains("-3"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn test_processing_error_aborts_before_publish() {
        let (store, input) = seeded_store();
        let mut block = Block::new(Exploder);
        let result = block.run(&store, &input, &NoopKeepAlive);
        match result.status {
            BlockStatus::Failed { kind, message } => {
                assert_eq!(kind, ErrorKind::Processing);
                assert!(message.contains("kernel diverged"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(store.image_count(), 1);
    }

    #[test]
    fn test_failed_run_flushes_log_to_input() {
        let (store, input) = seeded_store();
        let mut block = Block::new(Exploder);
        block.run(&store, &input, &NoopKeepAlive);

        let attachments = store.attachments(&input);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "exploder.log");
        let text = String::from_utf8(attachments[0].content.clone()).unwrap();
        assert!(text.contains("kernel diverged"));
    }

    #[test]
    fn test_keepalive_beats_at_stage_boundaries() {
        let (store, input) = seeded_store();
        let keepalive = CountingKeepAlive::default();
        let mut block = Block::new(Inverter);
        block.run(&store, &input, &keepalive);
        assert_eq!(keepalive.beats(), 4);
    }
}
