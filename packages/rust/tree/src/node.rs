//! Document tree shape: the [`TreeNode`] capability trait and the JSON [`Node`].
//!
//! The scanner and rewriter only ever talk to [`TreeNode`], so any tree that
//! can answer "do you have children / are you a link / are you text / are you
//! a citation" can be enriched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A citation-like node as seen by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Citation<'a> {
    /// Text the author wrote after `@`.
    pub label: &'a str,
    /// Key the parser resolved the citation to, if any.
    pub identifier: Option<&'a str>,
}

/// The minimal set of node capabilities the enrichment core depends on.
pub trait TreeNode: Sized {
    /// Node type tag (`"text"`, `"link"`, `"inlineCode"`, ...).
    fn node_type(&self) -> &str;

    fn children(&self) -> Option<&[Self]>;

    fn children_mut(&mut self) -> Option<&mut Vec<Self>>;

    /// Target of a link-like node.
    fn link_url(&self) -> Option<&str>;

    /// Raw content of a text-like leaf.
    fn text_value(&self) -> Option<&str>;

    fn citation(&self) -> Option<Citation<'_>>;

    /// Space-separated style classes.
    fn classes(&self) -> Option<&str>;

    fn set_classes(&mut self, classes: String);

    fn title(&self) -> Option<&str>;

    fn set_title(&mut self, title: String);

    fn new_text(value: String) -> Self;

    /// A link node with a single text child.
    fn new_link(url: String, class: String, text: String) -> Self;
}

/// Follow an index path from `root` down to a descendant.
pub fn node_at_mut<'a, N: TreeNode>(root: &'a mut N, path: &[usize]) -> Option<&'a mut N> {
    let mut current = root;
    for &index in path {
        current = current.children_mut()?.get_mut(index)?;
    }
    Some(current)
}

/// Replace the node at `path` with `replacement` (any length), shifting later siblings.
///
/// Returns `false` if the path does not address a child node.
pub fn splice_at<N: TreeNode>(root: &mut N, path: &[usize], replacement: Vec<N>) -> bool {
    let Some((&index, parent_path)) = path.split_last() else {
        return false;
    };
    let Some(siblings) = node_at_mut(root, parent_path).and_then(N::children_mut) else {
        return false;
    };
    if index >= siblings.len() {
        return false;
    }
    siblings.splice(index..=index, replacement);
    true
}

// ---------------------------------------------------------------------------
// JSON node
// ---------------------------------------------------------------------------

/// An mdast-style JSON node.
///
/// Fields the core reads or writes are typed; everything else is kept in
/// `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    /// A bare node of type `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            children: None,
            value: None,
            url: None,
            title: None,
            class: None,
            label: None,
            identifier: None,
            extra: Map::new(),
        }
    }

    /// A container node of type `kind`.
    pub fn parent(kind: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            children: Some(children),
            ..Self::new(kind)
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new("text")
        }
    }

    pub fn link(url: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::parent("link", children)
        }
    }

    pub fn inline_code(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::new("inlineCode")
        }
    }

    pub fn cite(label: impl Into<String>, identifier: Option<String>) -> Self {
        Self {
            label: Some(label.into()),
            identifier,
            ..Self::new("cite")
        }
    }
}

impl TreeNode for Node {
    fn node_type(&self) -> &str {
        &self.kind
    }

    fn children(&self) -> Option<&[Self]> {
        self.children.as_deref()
    }

    fn children_mut(&mut self) -> Option<&mut Vec<Self>> {
        self.children.as_mut()
    }

    fn link_url(&self) -> Option<&str> {
        if self.kind == "link" {
            self.url.as_deref()
        } else {
            None
        }
    }

    fn text_value(&self) -> Option<&str> {
        if self.kind == "text" {
            self.value.as_deref()
        } else {
            None
        }
    }

    fn citation(&self) -> Option<Citation<'_>> {
        if self.kind != "cite" {
            return None;
        }
        Some(Citation {
            label: self.label.as_deref()?,
            identifier: self.identifier.as_deref(),
        })
    }

    fn classes(&self) -> Option<&str> {
        self.class.as_deref()
    }

    fn set_classes(&mut self, classes: String) {
        self.class = Some(classes);
    }

    fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    fn new_text(value: String) -> Self {
        Self::text(value)
    }

    fn new_link(url: String, class: String, text: String) -> Self {
        Self {
            class: Some(class),
            ..Self::link(url, vec![Self::text(text)])
        }
    }
}
