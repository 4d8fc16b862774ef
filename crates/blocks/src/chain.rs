//! Ordered composition of blocks into a processing chain.
//!
//! Execution order and data-flow order are identical: member *i+1*'s input
//! is member *i*'s published output, and no member starts before its
//! predecessor has published. The first failing member aborts the chain;
//! outputs already published by earlier members stay in the store (rollback
//! is an operational concern, not the chain's).

use chain_kit_common::{BlockIdentity, ImageRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockStatus};
use crate::error::{ChainError, ErrorKind};
use crate::keepalive::KeepAlive;
use crate::log::LogBuffer;
use crate::options::OptionDecl;
use crate::store::ImageStore;

/// Aggregate status of a chain launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChainStatus {
    Succeeded,
    /// Aborted at the named member; later members never ran
    Failed {
        /// 1-indexed position of the failing member
        position: usize,
        identity: BlockIdentity,
        kind: ErrorKind,
    },
}

/// Terminal status of one member, keyed by position to disambiguate a block
/// variant appearing more than once
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MemberOutcome {
    /// 1-indexed position in the chain
    pub position: usize,
    pub identity: BlockIdentity,
    pub status: BlockStatus,
    pub output: Option<ImageRef>,
}

/// What a chain launch reports back to its caller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChainResult {
    pub status: ChainStatus,
    /// The last member's output; unset when the chain aborted early
    pub final_ref: Option<ImageRef>,
    pub members: Vec<MemberOutcome>,
    pub warnings: Vec<String>,
    pub log: String,
}

/// Fluent builder for a chain
pub struct ChainBuilder {
    members: Vec<Block>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self { members: Vec::new() }
    }

    pub fn add_block(mut self, block: Block) -> Self {
        self.members.push(block);
        self
    }

    /// A chain needs at least one member
    pub fn build(self) -> Result<Chain, ChainError> {
        if self.members.is_empty() {
            return Err(ChainError::Empty);
        }
        Ok(Chain {
            members: self.members,
        })
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered, non-empty sequence of blocks
pub struct Chain {
    members: Vec<Block>,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn identities(&self) -> Vec<BlockIdentity> {
        self.members.iter().map(Block::identity).collect()
    }

    /// Every member's declared options under collision-free keys.
    ///
    /// Options are namespaced by zero-padded position plus block name, so a
    /// block variant repeated in the chain (say two denoise passes with
    /// different widths) exposes distinct keys.
    pub fn namespaced_options(&self) -> Vec<(String, OptionDecl)> {
        let width = self.members.len().to_string().len();
        self.members
            .iter()
            .enumerate()
            .flat_map(|(idx, member)| {
                let prefix = format!("{:0width$}.{}", idx + 1, member.identity().name);
                member
                    .declared_options()
                    .into_iter()
                    .map(move |decl| (format!("{prefix}.{}", decl.name), decl))
            })
            .collect()
    }

    /// Run every enabled member in order, feeding each output forward.
    ///
    /// Disabled members forward their input unchanged and record `Skipped`.
    /// On full success the chain records its own origin→final provenance
    /// link and attaches a summary log to the final image, both best-effort.
    pub fn launch(
        &mut self,
        store: &dyn ImageStore,
        origin: &ImageRef,
        keepalive: &dyn KeepAlive,
    ) -> ChainResult {
        let total = self.members.len();
        let mut log = LogBuffer::new("chain");
        let mut outcomes: Vec<MemberOutcome> = Vec::with_capacity(total);
        let mut warnings: Vec<String> = Vec::new();
        let mut member_logs: Vec<String> = Vec::new();
        let mut current = origin.clone();

        log.append(format!("launching {total} member(s) on {origin}"));

        for (idx, member) in self.members.iter_mut().enumerate() {
            let position = idx + 1;
            let identity = member.identity();

            if !member.enabled() {
                log.append(format!(
                    "member {position}/{total} {identity} disabled, forwarding {current}"
                ));
                outcomes.push(MemberOutcome {
                    position,
                    identity,
                    status: BlockStatus::Skipped,
                    output: None,
                });
                continue;
            }

            log.append(format!("member {position}/{total} {identity} starting on {current}"));
            let result = member.run(store, &current, keepalive);
            member_logs.push(result.log);
            warnings.extend(
                result
                    .warnings
                    .iter()
                    .map(|w| format!("member {position} {identity}: {w}")),
            );

            match &result.status {
                BlockStatus::Failed { kind, message } => {
                    log.warn(format!(
                        "member {position}/{total} {identity} failed ({kind}): {message}"
                    ));
                    outcomes.push(MemberOutcome {
                        position,
                        identity: identity.clone(),
                        status: result.status.clone(),
                        output: None,
                    });
                    return ChainResult {
                        status: ChainStatus::Failed {
                            position,
                            identity,
                            kind: *kind,
                        },
                        final_ref: None,
                        members: outcomes,
                        warnings,
                        log: Self::render_log(&log, &member_logs),
                    };
                }
                _ => {
                    let Some(output) = result.output.clone() else {
                        // A successful member without an output violates the
                        // publish guarantee; treat it as that member failing.
                        log.warn(format!(
                            "member {position}/{total} {identity} reported success without an output"
                        ));
                        outcomes.push(MemberOutcome {
                            position,
                            identity: identity.clone(),
                            status: BlockStatus::Failed {
                                kind: ErrorKind::Publish,
                                message: "no output reference on success".into(),
                            },
                            output: None,
                        });
                        return ChainResult {
                            status: ChainStatus::Failed {
                                position,
                                identity,
                                kind: ErrorKind::Publish,
                            },
                            final_ref: None,
                            members: outcomes,
                            warnings,
                            log: Self::render_log(&log, &member_logs),
                        };
                    };
                    outcomes.push(MemberOutcome {
                        position,
                        identity,
                        status: result.status.clone(),
                        output: Some(output.clone()),
                    });
                    current = output;
                }
            }
        }

        let final_ref = current;
        if final_ref != *origin {
            // One aggregate link from the chain's very first input to its
            // very last output, on top of the per-member links.
            if let Err(e) = store.link_parent_child(origin, &final_ref) {
                let warning = format!("could not link {origin} -> {final_ref}: {e}");
                log.warn(&warning);
                warnings.push(warning);
            } else {
                log.append(format!("linked {origin} -> {final_ref}"));
            }
        }

        let rendered = Self::render_log(&log, &member_logs);
        if let Err(e) = store.attach_file(&final_ref, "chain.log", rendered.as_bytes(), "text/plain")
        {
            warnings.push(format!("could not attach chain log to {final_ref}: {e}"));
        }

        ChainResult {
            status: ChainStatus::Succeeded,
            final_ref: Some(final_ref),
            members: outcomes,
            warnings,
            log: rendered,
        }
    }

    /// Chain narrative first, then each member's records
    fn render_log(log: &LogBuffer, member_logs: &[String]) -> String {
        let mut out = log.render();
        for member_log in member_logs {
            out.push_str(member_log);
        }
        out
    }
}
