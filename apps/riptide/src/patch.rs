//! Applies server patch batches to the document tree.
//!
//! Instructions run strictly in order, each against the tree the previous one
//! left behind. The first instruction that cannot be applied aborts the rest
//! of the batch; earlier instructions stay applied.

use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::binder;
use crate::dom::{Document, DomError, NodeId, Selector, SelectorError};
use crate::protocol::{PatchBatch, PatchInstruction, PatchKind};
use crate::telemetry::PerfGuard;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("no element matches selector {selector:?}")]
    TargetNotFound { selector: String },
    #[error(transparent)]
    InvalidSelector(#[from] SelectorError),
    #[error("{kind} instruction carries no attribute")]
    MissingAttribute { kind: PatchKind },
    #[error("{kind} content produced no node")]
    EmptyFragment { kind: PatchKind },
    #[error("{kind} target {node} has no parent")]
    Orphan { kind: PatchKind, node: NodeId },
    #[error(transparent)]
    Dom(#[from] DomError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Skipped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub applied: usize,
    pub skipped: usize,
    /// Index of the instruction that aborted the batch.
    pub aborted_at: Option<usize>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.aborted_at.is_none()
    }
}

/// Applies `batch` if it is addressed to `component_id`; returns `None` for
/// batches meant for another component.
pub fn apply(doc: &mut Document, component_id: &str, batch: &PatchBatch) -> Option<BatchReport> {
    if batch.component_id != component_id {
        trace!(
            target: "riptide::patch",
            component = component_id,
            addressed_to = %batch.component_id,
            "batch for another component"
        );
        return None;
    }
    Some(apply_batch(doc, batch))
}

pub fn apply_batch(doc: &mut Document, batch: &PatchBatch) -> BatchReport {
    let _perf = PerfGuard::new("patch.batch");
    let mut report = BatchReport::default();

    for (index, instruction) in batch.instructions.iter().enumerate() {
        match apply_instruction(doc, instruction) {
            Ok(Outcome::Applied) => report.applied += 1,
            Ok(Outcome::Skipped) => report.skipped += 1,
            Err(err) => {
                error!(
                    target: "riptide::patch",
                    component = %batch.component_id,
                    index,
                    kind = %instruction.kind,
                    selector = %instruction.selector,
                    error = %err,
                    "patch instruction failed; discarding rest of batch"
                );
                report.aborted_at = Some(index);
                break;
            }
        }
    }

    debug!(
        target: "riptide::patch",
        component = %batch.component_id,
        applied = report.applied,
        skipped = report.skipped,
        aborted = report.aborted_at.is_some(),
        "batch processed"
    );
    report
}

pub fn apply_instruction(doc: &mut Document, instruction: &PatchInstruction) -> Result<Outcome, PatchError> {
    let kind = &instruction.kind;
    if let PatchKind::Unrecognized(code) = kind {
        warn!(
            target: "riptide::patch",
            code = %code,
            selector = %instruction.selector,
            "skipping unrecognized instruction type"
        );
        return Ok(Outcome::Skipped);
    }

    let target = resolve(doc, &instruction.selector)?;
    trace!(target: "riptide::patch", %kind, node = %target, "applying instruction");

    match kind {
        PatchKind::SetAttr => {
            let attr = instruction
                .attr
                .as_ref()
                .ok_or_else(|| PatchError::MissingAttribute { kind: kind.clone() })?;
            let has_live_value = doc
                .value_property(target)
                .is_some_and(|value| !value.is_empty());
            if attr.name.eq_ignore_ascii_case("value") && has_live_value {
                doc.set_value_property(target, attr.value.clone())?;
            } else {
                doc.set_attr(target, &attr.name, attr.value.clone())?;
            }
        }
        PatchKind::RemoveAttr => {
            let attr = instruction
                .attr
                .as_ref()
                .ok_or_else(|| PatchError::MissingAttribute { kind: kind.clone() })?;
            doc.remove_attr(target, &attr.name)?;
        }
        PatchKind::Replace => {
            let parent = parent_of(doc, kind, target)?;
            let replacement = first_fragment_node(doc, kind, instruction.content.as_deref())?;
            doc.replace_child(parent, replacement, target)?;
            binder::connect(doc, parent);
        }
        PatchKind::Remove => {
            parent_of(doc, kind, target)?;
            doc.detach(target)?;
        }
        PatchKind::SetInnerHtml => {
            let content = instruction.content.as_deref().unwrap_or_default();
            if doc.is_text(target) {
                doc.set_text(target, content)?;
            } else {
                let nodes = doc.parse_fragment(content);
                doc.replace_children(target, &nodes)?;
                binder::connect(doc, target);
            }
        }
        PatchKind::Append => {
            let child = first_fragment_node(doc, kind, instruction.content.as_deref())?;
            doc.append_child(target, child)?;
            binder::connect(doc, target);
        }
        PatchKind::Move => {
            let parent = parent_of(doc, kind, target)?;
            doc.detach(target)?;
            let reference = doc.element_children(parent).get(instruction.index).copied();
            doc.insert_before(parent, target, reference)?;
        }
        PatchKind::Unrecognized(_) => return Ok(Outcome::Skipped),
    }
    Ok(Outcome::Applied)
}

fn resolve(doc: &Document, selector: &str) -> Result<NodeId, PatchError> {
    Selector::parse(selector)?
        .first(doc, doc.root())
        .ok_or_else(|| PatchError::TargetNotFound {
            selector: selector.to_string(),
        })
}

fn parent_of(doc: &Document, kind: &PatchKind, node: NodeId) -> Result<NodeId, PatchError> {
    doc.parent(node).ok_or_else(|| PatchError::Orphan {
        kind: kind.clone(),
        node,
    })
}

fn first_fragment_node(doc: &mut Document, kind: &PatchKind, content: Option<&str>) -> Result<NodeId, PatchError> {
    doc.parse_fragment(content.unwrap_or_default())
        .first()
        .copied()
        .ok_or_else(|| PatchError::EmptyFragment { kind: kind.clone() })
}
