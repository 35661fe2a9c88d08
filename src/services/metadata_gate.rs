//! Tag-driven transition decisions for the snapshot and replace stages.

use crate::models::tag::ClassificationTag;

/// Which per-key stage is being gated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Snapshot,
    Replace,
}

impl Stage {
    /// Tag value that marks this stage as done.
    pub fn terminal_tag(self) -> ClassificationTag {
        match self {
            Stage::Snapshot => ClassificationTag::Backup,
            Stage::Replace => ClassificationTag::Compressed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Proceed,
    SkipAlreadyDone,
    SkipUnexpectedTag,
    SkipPriorFailure,
}

/// Decide what a stage should do given the tag currently on its target key.
///
/// `force` bypasses every rule. Without it, an unrecognized tag is reported
/// and left alone: state this pipeline did not write is never overwritten.
pub fn decide(stage: Stage, tag: Option<&ClassificationTag>, force: bool) -> Transition {
    if force {
        return Transition::Proceed;
    }

    let Some(tag) = tag else {
        return Transition::Proceed;
    };

    if *tag == stage.terminal_tag() {
        return Transition::SkipAlreadyDone;
    }

    match (stage, tag) {
        (Stage::Replace, ClassificationTag::CompressionFailed) => Transition::SkipPriorFailure,
        _ => Transition::SkipUnexpectedTag,
    }
}
