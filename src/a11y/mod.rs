//! Accessibility-tree capture and encoding
//!
//! The browser's accessibility tree is used as a compact, agent-legible page
//! representation. This module turns the flat node list the protocol returns
//! into a pruned hierarchical tree, rendered as indented text, with every
//! kept element addressable by [`EncodedId`].

pub mod encoded_id;
pub mod tree;

pub use encoded_id::EncodedId;
pub use tree::{build_frame_tree, FrameTreeBuild};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw accessibility node as returned by `Accessibility.getFullAXTree`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxNode {
    pub node_id: String,
    pub role: Option<AxValue>,
    pub name: Option<AxValue>,
    pub description: Option<AxValue>,
    pub value: Option<AxValue>,
    #[serde(rename = "backendDOMNodeId")]
    pub backend_dom_node_id: Option<i64>,
    pub parent_id: Option<String>,
    pub child_ids: Option<Vec<String>>,
    pub properties: Option<Vec<AxProperty>>,
}

/// Typed value wrapper used throughout the accessibility domain
#[derive(Debug, Clone, Deserialize)]
pub struct AxValue {
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: Option<Value>,
}

/// One property attached to an accessibility node
#[derive(Debug, Clone, Deserialize)]
pub struct AxProperty {
    pub name: String,
    pub value: Option<Value>,
}

/// One node of the simplified, pruned accessibility tree
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityNode {
    /// Stable-within-snapshot identity; absent for nodes without a backend id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoded_id: Option<EncodedId>,

    pub role: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_dom_node_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AccessibilityNode>,
}

/// Bounding box coordinates for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Create a new BoundingBox
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check if the bounding box is visible (has non-zero dimensions)
    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    /// Calculate the area of the bounding box
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Build from the 8-number content quad of a `DOM.getBoxModel` result
    pub fn from_content_quad(quad: &[f64]) -> Option<Self> {
        if quad.len() < 8 {
            return None;
        }
        let xs = [quad[0], quad[2], quad[4], quad[6]];
        let ys = [quad[1], quad[3], quad[5], quad[7]];
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }
}
