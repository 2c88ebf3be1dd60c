//! Coarse document outline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One entry in the document outline (chapter, section, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralNode {
    /// Unique within the document
    pub structural_id: String,

    /// Node title
    pub title: String,

    /// Nesting level (1 = top level)
    pub level: u8,

    /// Short text expected at or near the start of the node
    #[serde(default)]
    pub anchor_text: String,

    /// Enclosing node
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl StructuralNode {
    /// Create a top-level node whose anchor is its title.
    pub fn new(structural_id: impl Into<String>, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            structural_id: structural_id.into(),
            anchor_text: title.clone(),
            title,
            level: 1,
            parent_id: None,
        }
    }

    /// Set the anchor text.
    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchor_text = anchor.into();
        self
    }

    /// Nest under `parent`.
    pub fn child_of(mut self, parent: &StructuralNode) -> Self {
        self.level = parent.level.saturating_add(1);
        self.parent_id = Some(parent.structural_id.clone());
        self
    }

    /// Whether this is a top-level node.
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Synthetic root used when a document has no outline.
pub fn root_node(document_id: &str) -> StructuralNode {
    StructuralNode {
        structural_id: format!("{}-root", document_id),
        title: "Document".to_string(),
        level: 1,
        anchor_text: String::new(),
        parent_id: None,
    }
}

/// Check outline invariants: unique ids, 1-based levels that grow with depth,
/// parents declared before their children.
pub fn validate_outline(nodes: &[StructuralNode]) -> Result<()> {
    let mut levels: HashMap<&str, u8> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        if node.structural_id.is_empty() {
            return Err(Error::MalformedInput("outline node without id".into()));
        }
        if node.level == 0 {
            return Err(Error::MalformedInput(format!(
                "outline node {} has level 0",
                node.structural_id
            )));
        }
        match &node.parent_id {
            None if node.level != 1 => {
                return Err(Error::MalformedInput(format!(
                    "top-level node {} has level {}",
                    node.structural_id, node.level
                )));
            }
            Some(parent) => match levels.get(parent.as_str()) {
                Some(parent_level) if *parent_level < node.level => {}
                Some(parent_level) => {
                    return Err(Error::MalformedInput(format!(
                        "node {} (level {}) is not deeper than its parent {} (level {})",
                        node.structural_id, node.level, parent, parent_level
                    )));
                }
                None => {
                    return Err(Error::MalformedInput(format!(
                        "node {} references unknown parent {}",
                        node.structural_id, parent
                    )));
                }
            },
            None => {}
        }
        if levels
            .insert(node.structural_id.as_str(), node.level)
            .is_some()
        {
            return Err(Error::MalformedInput(format!(
                "duplicate structural id {}",
                node.structural_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_outline() {
        let chapter = StructuralNode::new("s1", "Chapter One");
        let section = StructuralNode::new("s2", "Background").child_of(&chapter);
        assert_eq!(section.level, 2);
        assert!(validate_outline(&[chapter, section]).is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let a = StructuralNode::new("s1", "One");
        let b = StructuralNode::new("s1", "Two");
        assert!(matches!(
            validate_outline(&[a, b]),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn test_child_before_parent_rejected() {
        let chapter = StructuralNode::new("s1", "Chapter One");
        let section = StructuralNode::new("s2", "Background").child_of(&chapter);
        assert!(validate_outline(&[section, chapter]).is_err());
    }

    #[test]
    fn test_level_must_grow_with_depth() {
        let chapter = StructuralNode::new("s1", "Chapter One");
        let mut section = StructuralNode::new("s2", "Background").child_of(&chapter);
        section.level = 1;
        assert!(validate_outline(&[chapter, section]).is_err());
    }

    #[test]
    fn test_root_node() {
        let root = root_node("doc");
        assert_eq!(root.structural_id, "doc-root");
        assert!(root.is_top_level());
    }
}
