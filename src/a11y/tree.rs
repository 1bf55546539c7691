use crate::a11y::{AccessibilityNode, AxNode, BoundingBox, EncodedId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Result of building one frame's pruned accessibility tree
#[derive(Debug, Default)]
pub struct FrameTreeBuild {
    /// Root nodes of the pruned hierarchy
    pub roots: Vec<AccessibilityNode>,

    /// Indented `[encodedId] role: name` rendering of the hierarchy
    pub rendered: String,

    /// Lookup from encoded id to the kept node, in depth-first order
    pub elements: IndexMap<EncodedId, AccessibilityNode>,

    /// Backend ids of `<iframe>` host elements found in this frame
    pub iframe_backend_ids: Vec<i64>,

    /// URLs attached to accessibility nodes (links, frames), by AX node id
    pub id_to_url: HashMap<String, String>,
}

/// Roles that exist only for layout structure
fn is_structural_role(role: &str) -> bool {
    matches!(role, "generic" | "none")
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build one frame's tree from the flat protocol node list.
///
/// Six passes: convert+filter, wire edges, collect roots, structural cleanup,
/// render, and lookup construction. Nodes survive the first pass only if they
/// have a non-empty name, children, or an interactive role; everything else
/// is dropped to keep the tree small and legible.
pub fn build_frame_tree(
    nodes: Vec<AxNode>,
    frame_index: u64,
    tag_names: &HashMap<i64, String>,
    scrollable_backend_ids: &HashSet<i64>,
    bounding_boxes: Option<&HashMap<i64, BoundingBox>>,
) -> FrameTreeBuild {
    let mut build = FrameTreeBuild::default();

    // Pass 1: convert and filter.
    let mut converted: HashMap<String, AccessibilityNode> = HashMap::new();
    let mut parents: HashMap<String, Option<String>> = HashMap::new();
    let mut child_lists: HashMap<String, Vec<String>> = HashMap::new();
    let mut insertion_order: Vec<String> = Vec::new();

    for node_data in nodes {
        // Negative ids are ephemeral synthetic nodes.
        if node_data
            .node_id
            .parse::<i64>()
            .map(|v| v < 0)
            .unwrap_or(false)
        {
            continue;
        }

        if let Some(url) = extract_url_property(&node_data) {
            build.id_to_url.insert(node_data.node_id.clone(), url);
        }

        let role_value = node_data
            .role
            .as_ref()
            .and_then(|r| r.value.as_ref())
            .map(json_value_to_string)
            .unwrap_or_default();

        let name_value = node_data
            .name
            .as_ref()
            .and_then(|n| n.value.as_ref())
            .map(json_value_to_string);

        let has_valid_name = name_value
            .as_ref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false);

        let has_children = node_data
            .child_ids
            .as_ref()
            .map(|ids| !ids.is_empty())
            .unwrap_or(false);

        let is_interactive = !matches!(role_value.as_str(), "" | "none" | "generic" | "InlineTextBox");

        if !has_valid_name && !has_children && !is_interactive {
            continue;
        }

        if role_value == "Iframe" {
            if let Some(backend_id) = node_data.backend_dom_node_id {
                build.iframe_backend_ids.push(backend_id);
            }
        }

        let role = decorate_scrollable(
            &role_value,
            node_data.backend_dom_node_id,
            scrollable_backend_ids,
        );

        let encoded_id = node_data
            .backend_dom_node_id
            .and_then(|b| u64::try_from(b).ok())
            .map(|b| EncodedId::new(frame_index, b));

        let bounding_box = node_data
            .backend_dom_node_id
            .and_then(|b| bounding_boxes.and_then(|m| m.get(&b)))
            .cloned();

        let node = AccessibilityNode {
            encoded_id,
            role,
            name: name_value,
            description: node_data
                .description
                .as_ref()
                .and_then(|d| d.value.as_ref())
                .map(json_value_to_string),
            value: node_data
                .value
                .as_ref()
                .and_then(|v| v.value.as_ref())
                .map(json_value_to_string),
            backend_dom_node_id: node_data.backend_dom_node_id,
            bounding_box,
            children: Vec::new(),
        };

        parents.insert(node_data.node_id.clone(), node_data.parent_id.clone());
        child_lists.insert(
            node_data.node_id.clone(),
            node_data.child_ids.clone().unwrap_or_default(),
        );
        insertion_order.push(node_data.node_id.clone());
        converted.insert(node_data.node_id, node);
    }

    // Passes 2 + 3: wire parent->child edges and collect roots.
    let root_ids: Vec<String> = insertion_order
        .iter()
        .filter(|id| {
            parents
                .get(*id)
                .map(|p| p.as_ref().map(|pid| !converted.contains_key(pid)).unwrap_or(true))
                .unwrap_or(true)
        })
        .cloned()
        .collect();

    let mut raw_roots = Vec::new();
    for root_id in root_ids {
        let mut visiting = HashSet::new();
        if let Some(subtree) = assemble_subtree(&root_id, &converted, &child_lists, &mut visiting) {
            raw_roots.push(subtree);
        }
    }

    // Pass 4: structural cleanup.
    let mut roots = Vec::new();
    for root in raw_roots {
        if let Some(cleaned) = clean_structural_node(root, tag_names) {
            roots.push(cleaned);
        }
    }

    // Pass 5: render.
    let rendered = roots
        .iter()
        .map(|root| render_tree(root, 0))
        .collect::<Vec<_>>()
        .join("\n");

    // Pass 6: encoded-id lookup by full tree walk.
    let mut elements = IndexMap::new();
    for root in &roots {
        collect_elements(root, &mut elements);
    }

    build.roots = roots;
    build.rendered = rendered;
    build.elements = elements;
    build
}

fn extract_url_property(node: &AxNode) -> Option<String> {
    for prop in node.properties.as_ref()? {
        if prop.name != "url" {
            continue;
        }
        let url = prop
            .value
            .as_ref()?
            .as_object()?
            .get("value")?
            .as_str()?
            .trim()
            .to_string();
        return Some(url);
    }
    None
}

/// Prefix the role with `scrollable` for members of the scrollable set
fn decorate_scrollable(
    role: &str,
    backend_id: Option<i64>,
    scrollable_backend_ids: &HashSet<i64>,
) -> String {
    let is_scrollable = backend_id
        .map(|b| scrollable_backend_ids.contains(&b))
        .unwrap_or(false);

    if !is_scrollable {
        return role.to_string();
    }

    if role.is_empty() || is_structural_role(role) {
        "scrollable".to_string()
    } else {
        format!("scrollable, {}", role)
    }
}

fn assemble_subtree(
    node_id: &str,
    converted: &HashMap<String, AccessibilityNode>,
    child_lists: &HashMap<String, Vec<String>>,
    visiting: &mut HashSet<String>,
) -> Option<AccessibilityNode> {
    if !visiting.insert(node_id.to_string()) {
        // Cycle guard; malformed input must not recurse forever.
        return converted.get(node_id).cloned();
    }

    let mut node = converted.get(node_id)?.clone();

    if let Some(child_ids) = child_lists.get(node_id) {
        for child_id in child_ids {
            if let Some(child) = assemble_subtree(child_id, converted, child_lists, visiting) {
                node.children.push(child);
            }
        }
    }

    visiting.remove(node_id);
    Some(node)
}

/// Collapse or drop nodes that exist only for layout structure.
///
/// A structural node with one child is replaced by that child; with none it
/// disappears. Structural nodes that remain (multiple children) get their
/// role replaced by the host element's tag name when one is known, so the
/// rendered tree says `nav`/`ul` instead of `generic`.
fn clean_structural_node(
    mut node: AccessibilityNode,
    tag_names: &HashMap<i64, String>,
) -> Option<AccessibilityNode> {
    let children = std::mem::take(&mut node.children);
    let mut cleaned: Vec<AccessibilityNode> = children
        .into_iter()
        .filter_map(|child| clean_structural_node(child, tag_names))
        .collect();

    if is_structural_role(&node.role) {
        match cleaned.len() {
            0 => return None,
            1 => return cleaned.pop(),
            _ => {}
        }
    }

    if let Some(backend_id) = node.backend_dom_node_id {
        if let Some(tag) = tag_names.get(&backend_id) {
            if is_structural_role(&node.role) {
                node.role = tag.clone();
            } else if node.role == "combobox" && tag == "select" {
                node.role = "select".to_string();
            }
        }
    }

    cleaned = remove_redundant_static_text_children(&node, cleaned);

    node.children = cleaned;
    Some(node)
}

/// Drop StaticText children whose combined text merely repeats the parent name
fn remove_redundant_static_text_children(
    parent: &AccessibilityNode,
    children: Vec<AccessibilityNode>,
) -> Vec<AccessibilityNode> {
    let Some(target) = parent
        .name
        .as_deref()
        .map(normalize_whitespace)
        .filter(|n| !n.is_empty())
    else {
        return children;
    };

    let combined = children
        .iter()
        .filter(|c| c.role == "StaticText")
        .filter_map(|c| c.name.as_deref())
        .fold(String::new(), |mut acc, name| {
            acc.push_str(&normalize_whitespace(name));
            acc
        });

    if combined == target {
        children
            .into_iter()
            .filter(|c| {
                c.role != "StaticText"
                    || c.name.as_deref().map(|n| n.is_empty()).unwrap_or(true)
            })
            .collect()
    } else {
        children
    }
}

fn render_tree(node: &AccessibilityNode, level: usize) -> String {
    let indent = "  ".repeat(level);

    let label = match &node.encoded_id {
        Some(id) => format!("[{}] {}", id, node.role),
        None => node.role.clone(),
    };

    let name_part = node
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .map(|n| format!(": {}", n))
        .unwrap_or_default();

    let mut out = format!("{}{}{}", indent, label, name_part);
    for child in &node.children {
        out.push('\n');
        out.push_str(&render_tree(child, level + 1));
    }
    out
}

fn collect_elements(node: &AccessibilityNode, elements: &mut IndexMap<EncodedId, AccessibilityNode>) {
    if let Some(id) = node.encoded_id {
        elements.insert(id, node.clone());
    }
    for child in &node.children {
        collect_elements(child, elements);
    }
}
