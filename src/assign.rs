//! Cross-referencing elements to outline nodes.
//!
//! One priority order applies to every element kind:
//!
//! 1. **Anchor**: the element's context snippet contains a node's anchor
//!    text, first verbatim, then after collapsing whitespace and folding
//!    case. The longest matching anchor wins; ties go to the earlier node.
//! 2. **Interpolation**: `floor(unit_index / total_units * node_count)`,
//!    clamped to the node list.
//! 3. **Default**: with no outline at all, the synthetic document root.
//!
//! Elements that already carry a structural id are left alone, so running the
//! assigner twice changes nothing.

use crate::model::{root_node, ProgressiveSchema, StructuralNode, SubElement};

/// Counts of what an assignment run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentReport {
    /// Assigned by anchor text
    pub anchored: usize,
    /// Assigned by position
    pub interpolated: usize,
    /// Assigned to the document root
    pub defaulted: usize,
    /// Already assigned before this run
    pub skipped: usize,
}

impl AssignmentReport {
    /// Elements assigned during this run.
    pub fn assigned(&self) -> usize {
        self.anchored + self.interpolated + self.defaulted
    }
}

/// How an element was placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Context contains the node's anchor
    Anchored(String),
    /// Proportional position of the element's unit
    Interpolated(String),
    /// No outline; document root
    Default(String),
}

impl Placement {
    /// Structural id of the placement.
    pub fn structural_id(&self) -> &str {
        match self {
            Placement::Anchored(id) | Placement::Interpolated(id) | Placement::Default(id) => id,
        }
    }
}

/// Assigns structural ids to elements.
#[derive(Debug, Clone)]
pub struct StructuralAssigner {
    nodes: Vec<StructuralNode>,
    normalized_anchors: Vec<String>,
    total_units: u32,
    root_id: String,
}

impl StructuralAssigner {
    /// Build an assigner for `nodes` over a document of `total_units` units.
    pub fn new(document_id: &str, nodes: Vec<StructuralNode>, total_units: u32) -> Self {
        let normalized_anchors = nodes.iter().map(|n| normalize(&n.anchor_text)).collect();
        Self {
            nodes,
            normalized_anchors,
            total_units,
            root_id: root_node(document_id).structural_id,
        }
    }

    /// Build an assigner from a schema's outline and page count.
    pub fn for_schema(schema: &ProgressiveSchema) -> Self {
        let total_units = match schema.document_summary.page_count {
            0 => schema.elements().map(|e| e.unit_index).max().unwrap_or(1),
            n => n,
        };
        Self::new(&schema.document_id, schema.outline().to_vec(), total_units)
    }

    /// Assign every unassigned element of `schema`.
    pub fn assign(schema: &mut ProgressiveSchema) -> AssignmentReport {
        let assigner = Self::for_schema(schema);
        let mut report = AssignmentReport::default();

        for element in schema.elements_mut() {
            if element.structural_id.is_some() {
                report.skipped += 1;
                continue;
            }
            let placement = assigner.locate(element);
            match &placement {
                Placement::Anchored(_) => report.anchored += 1,
                Placement::Interpolated(_) => report.interpolated += 1,
                Placement::Default(_) => report.defaulted += 1,
            }
            element.assign_structure(placement.structural_id());
        }

        log::info!(
            "Assigned {} elements ({} anchored, {} interpolated, {} defaulted, {} skipped)",
            report.assigned(),
            report.anchored,
            report.interpolated,
            report.defaulted,
            report.skipped
        );
        report
    }

    /// Where `element` belongs.
    pub fn locate(&self, element: &SubElement) -> Placement {
        if self.nodes.is_empty() {
            return Placement::Default(self.root_id.clone());
        }
        if let Some(node) = self.anchor_match(&element.context_snippet) {
            return Placement::Anchored(node.structural_id.clone());
        }
        Placement::Interpolated(self.interpolate(element.unit_index).structural_id.clone())
    }

    fn anchor_match(&self, context: &str) -> Option<&StructuralNode> {
        if context.is_empty() {
            return None;
        }

        let exact = longest(self.nodes.iter().filter_map(|node| {
            let anchor = node.anchor_text.trim();
            (!anchor.is_empty() && context.contains(anchor))
                .then(|| (anchor.chars().count(), node))
        }));
        if exact.is_some() {
            return exact;
        }

        let context = normalize(context);
        longest(
            self.nodes
                .iter()
                .zip(&self.normalized_anchors)
                .filter_map(|(node, anchor)| {
                    (!anchor.is_empty() && context.contains(anchor.as_str()))
                        .then(|| (anchor.chars().count(), node))
                }),
        )
    }

    fn interpolate(&self, unit_index: u32) -> &StructuralNode {
        let count = self.nodes.len() as u64;
        let total = u64::from(self.total_units.max(1));
        let position = (u64::from(unit_index) * count / total).min(count - 1);
        &self.nodes[position as usize]
    }
}

/// Longest candidate; the first one wins a tie.
fn longest<'a>(
    candidates: impl Iterator<Item = (usize, &'a StructuralNode)>,
) -> Option<&'a StructuralNode> {
    let mut best: Option<(usize, &StructuralNode)> = None;
    for (len, node) in candidates {
        if best.map_or(true, |(best_len, _)| len > best_len) {
            best = Some((len, node));
        }
    }
    best.map(|(_, node)| node)
}

/// Collapse whitespace runs to one space and fold case.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ElementKind, Payload};

    fn element(unit: u32, context: &str) -> SubElement {
        SubElement::new("e", "doc", unit, ElementKind::Image, Payload::Inline("x".into()))
            .with_context(context)
    }

    fn chapters() -> Vec<StructuralNode> {
        vec![
            StructuralNode::new("c1", "Chapter One"),
            StructuralNode::new("c2", "Chapter Two"),
        ]
    }

    #[test]
    fn test_anchor_beats_position() {
        let assigner = StructuralAssigner::new("doc", chapters(), 10);
        let placement = assigner.locate(&element(1, "Chapter Two intro text"));
        assert_eq!(placement, Placement::Anchored("c2".into()));
    }

    #[test]
    fn test_normalized_anchor() {
        let assigner = StructuralAssigner::new("doc", chapters(), 10);
        let placement = assigner.locate(&element(1, "see CHAPTER\n  two for details"));
        assert_eq!(placement, Placement::Anchored("c2".into()));
    }

    #[test]
    fn test_longest_anchor_wins() {
        let nodes = vec![
            StructuralNode::new("p", "Part"),
            StructuralNode::new("c1", "Chapter 1"),
            StructuralNode::new("c10", "Chapter 10"),
        ];
        let assigner = StructuralAssigner::new("doc", nodes, 10);
        assert_eq!(
            assigner.locate(&element(1, "Part II, Chapter 10 begins")),
            Placement::Anchored("c10".into())
        );
    }

    #[test]
    fn test_interpolation() {
        let assigner = StructuralAssigner::new("doc", chapters(), 4);
        assert_eq!(assigner.locate(&element(1, "")), Placement::Interpolated("c1".into()));
        assert_eq!(assigner.locate(&element(2, "")), Placement::Interpolated("c2".into()));
        // floor(4 / 4 * 2) = 2 is clamped to the last node.
        assert_eq!(assigner.locate(&element(4, "")), Placement::Interpolated("c2".into()));
    }

    #[test]
    fn test_default_root() {
        let assigner = StructuralAssigner::new("doc", Vec::new(), 4);
        assert_eq!(
            assigner.locate(&element(3, "Chapter Two")),
            Placement::Default("doc-root".into())
        );
    }

    #[test]
    fn test_empty_anchor_never_matches() {
        let nodes = vec![
            StructuralNode::new("a", "A").with_anchor(""),
            StructuralNode::new("b", "B").with_anchor("   "),
        ];
        let assigner = StructuralAssigner::new("doc", nodes, 2);
        assert!(matches!(
            assigner.locate(&element(1, "anything")),
            Placement::Interpolated(_)
        ));
    }
}
