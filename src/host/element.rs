// src/host/element.rs
//! DOM-like element tree used by click dispatch and enrichment
//!
//! The host runtime hands the click tap the clicked element; ancestry walks,
//! selector matching, and structural-path building all run against this type.

use std::collections::BTreeMap;
use std::sync::Arc;

/// One node in the host's element tree.
#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
    pub parent: Option<Arc<Element>>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_parent(mut self, parent: Arc<Element>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Match a simple selector: `tag`, `#id`, or `.class`.
    pub fn matches_selector(&self, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            self.id.as_deref() == Some(id)
        } else if let Some(class) = selector.strip_prefix('.') {
            self.classes.iter().any(|c| c == class)
        } else {
            self.tag.eq_ignore_ascii_case(selector)
        }
    }

    /// Walk from this element up through its ancestors, self first.
    pub fn ancestors(self: &Arc<Self>) -> impl Iterator<Item = Arc<Element>> {
        std::iter::successors(Some(Arc::clone(self)), |el| el.parent.clone())
    }

    /// Nearest element (self or ancestor) satisfying the predicate.
    pub fn closest(
        self: &Arc<Self>,
        predicate: impl Fn(&Element) -> bool,
    ) -> Option<Arc<Element>> {
        self.ancestors().find(|el| predicate(el))
    }

    /// One structural-path segment: `tag#id`, `tag.class-list`, or `tag`.
    pub fn descriptor(&self) -> String {
        if let Some(id) = &self.id {
            format!("{}#{}", self.tag, id)
        } else if !self.classes.is_empty() {
            format!("{}.{}", self.tag, self.classes.join("."))
        } else {
            self.tag.clone()
        }
    }

    /// Structural path from this element upward, excluding `body` and above.
    pub fn path_to_body(self: &Arc<Self>) -> Vec<String> {
        self.ancestors()
            .take_while(|el| !el.tag.eq_ignore_ascii_case("body"))
            .map(|el| el.descriptor())
            .collect()
    }
}
