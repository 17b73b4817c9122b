//! # Document Model
//!
//! The engine treats content as opaque beyond three capabilities: apply a
//! step, serialize a snapshot, and report the entity ids it embeds (so the
//! entity watcher can map out-of-band changes back to documents).
//!
//! `BlockDocument` is the block-tree model served by the binary.

use std::collections::HashSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of an entity in the backing data graph
pub type EntityId = Uuid;

/// Identifier of an editing user
pub type UserId = Uuid;

/// Identity of a live document: tenant plus document entity id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    pub tenant: String,
    pub document_id: EntityId,
}

impl DocumentKey {
    pub fn new(tenant: impl Into<String>, document_id: EntityId) -> Self {
        Self {
            tenant: tenant.into(),
            document_id,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.document_id)
    }
}

/// A step could not be applied to the current content
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StepError(pub String);

/// Content that can be driven by an ordered sequence of steps
pub trait Document: Clone + Send + Sync + 'static {
    /// One edit operation
    type Step: Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Apply one step in place
    fn apply(&mut self, step: &Self::Step) -> Result<(), StepError>;

    /// Serialize the materialized content
    fn to_json(&self) -> Value;

    /// Entities embedded in this document (the document's own id excluded)
    fn entity_ids(&self) -> Vec<EntityId>;

    /// Apply a batch, stopping at the first failing step
    fn apply_all(&mut self, steps: &[Self::Step]) -> Result<(), StepError> {
        for (index, step) in steps.iter().enumerate() {
            self.apply(step)
                .map_err(|e| StepError(format!("step {}: {}", index, e.0)))?;
        }
        Ok(())
    }
}

/// One block of a block-tree document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Entity backing this block
    pub entity_id: EntityId,
    /// Block type, e.g. `paragraph` or `heading`
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl Block {
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            entity_id: Uuid::new_v4(),
            kind: kind.into(),
            text: text.into(),
        }
    }
}

/// Edit operations on a `BlockDocument`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStep {
    InsertBlock { index: usize, block: Block },
    RemoveBlock { index: usize },
    SetText { index: usize, text: String },
    /// Reorders siblings in one step; `to` is the index after removal.
    MoveBlock { from: usize, to: usize },
}

/// Ordered list of blocks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDocument {
    pub blocks: Vec<Block>,
}

impl BlockDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn check_index(&self, index: usize) -> Result<(), StepError> {
        if index >= self.blocks.len() {
            return Err(StepError(format!(
                "block index {} out of range (len {})",
                index,
                self.blocks.len()
            )));
        }
        Ok(())
    }
}

impl Document for BlockDocument {
    type Step = BlockStep;

    fn apply(&mut self, step: &BlockStep) -> Result<(), StepError> {
        match step {
            BlockStep::InsertBlock { index, block } => {
                if *index > self.blocks.len() {
                    return Err(StepError(format!(
                        "insert index {} out of range (len {})",
                        index,
                        self.blocks.len()
                    )));
                }
                if self.blocks.iter().any(|b| b.entity_id == block.entity_id) {
                    return Err(StepError(format!(
                        "block {} already present",
                        block.entity_id
                    )));
                }
                self.blocks.insert(*index, block.clone());
            }
            BlockStep::RemoveBlock { index } => {
                self.check_index(*index)?;
                self.blocks.remove(*index);
            }
            BlockStep::SetText { index, text } => {
                self.check_index(*index)?;
                self.blocks[*index].text = text.clone();
            }
            BlockStep::MoveBlock { from, to } => {
                self.check_index(*from)?;
                let block = self.blocks.remove(*from);
                if *to > self.blocks.len() {
                    self.blocks.insert(*from, block);
                    return Err(StepError(format!("move target {} out of range", to)));
                }
                self.blocks.insert(*to, block);
            }
        }
        Ok(())
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn entity_ids(&self) -> Vec<EntityId> {
        let mut seen = HashSet::new();
        self.blocks
            .iter()
            .map(|b| b.entity_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}
