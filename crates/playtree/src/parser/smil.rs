//! WSX/SMIL element handlers. Containers nest; `seq`, `excl` and `switch`
//! attach under the node currently being built (or its parent when that
//! node is a leaf), and the shared timing attributes apply to whichever
//! node an element just created.

use crate::clock::{parse_repeat_count, parse_smil_clock};
use crate::error::{codes, DiagnosticCategory, PlaytreeError, PlaytreeResult};
use crate::tree::{Mode, NodeId, Playlist};

use super::{kind::ElementKind, ParseContext};

impl ParseContext<'_> {
    pub(super) fn smil_start_element(
        &mut self,
        name: &str,
        attrs: &[(String, String)],
    ) -> PlaytreeResult<()> {
        let kind = ElementKind::from_name(name);
        self.push_kind(kind);

        match kind {
            ElementKind::Smil => {
                if self.depth() != 2 || !self.assert_parent_kind(ElementKind::Root as u32) {
                    let message = "playlist root element in an unexpected position".to_string();
                    self.report(
                        DiagnosticCategory::DocumentFormat,
                        codes::PARSE,
                        message.clone(),
                    );
                    return Err(PlaytreeError::DocumentFormat(message));
                }
                let tree = Playlist::new(Mode::Sequential);
                let root = tree.root();
                self.tree = Some(tree);
                self.current_entry = Some(root);
                self.smil_common_attrs(root, kind, attrs);
            }
            ElementKind::Switch => {
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("id") {
                        self.check_smil_id(value);
                    } else {
                        self.invalid_attribute(key);
                    }
                }
                if let Some(node) = self.open_container(Mode::Switch) {
                    self.current_entry = Some(node);
                }
            }
            ElementKind::Excl => {
                if let Some(node) = self.open_container(Mode::Exclusive) {
                    self.current_entry = Some(node);
                    self.smil_common_attrs(node, kind, attrs);
                }
            }
            ElementKind::Seq => {
                if let Some(node) = self.open_container(Mode::Sequential) {
                    self.current_entry = Some(node);
                    self.smil_common_attrs(node, kind, attrs);
                }
            }
            ElementKind::Media => {
                let Some(parent) = self.insertion_parent() else {
                    return Ok(());
                };
                let entry = match &mut self.tree {
                    Some(tree) => tree.add_entry(parent),
                    None => return Ok(()),
                };
                self.current_entry = Some(entry);
                self.smil_common_attrs(entry, kind, attrs);
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("role") {
                        if let Some(tree) = &mut self.tree {
                            tree.data_mut(entry).set_role(Some(value.clone()));
                        }
                    } else if key.eq_ignore_ascii_case("src") {
                        let source = self.checked_source_reference(value)?;
                        if let Some(tree) = &mut self.tree {
                            tree.data_mut(entry).set_source(Some(source));
                        }
                    }
                }
            }
            _ => self.invalid_element(name),
        }
        Ok(())
    }

    pub(super) fn smil_end_element(&mut self) {
        match self.current_kind() {
            ElementKind::Switch | ElementKind::Seq | ElementKind::Excl => {
                // Step construction back out of the closed container.
                if let (Some(tree), Some(node)) = (self.tree.as_ref(), self.current_entry) {
                    self.current_entry = if tree.is_container(node) {
                        tree.parent(node)
                    } else {
                        tree.parent(node).and_then(|parent| tree.parent(parent))
                    };
                }
            }
            _ => {}
        }
        self.pop_kind();
    }

    /// Timing and identity attributes shared by `smil`, `seq`, `excl` and
    /// `media`.
    fn smil_common_attrs(&mut self, node: NodeId, kind: ElementKind, attrs: &[(String, String)]) {
        for (key, value) in attrs {
            if key.eq_ignore_ascii_case("id") {
                self.check_smil_id(value);
            } else if key.eq_ignore_ascii_case("repeatDur") {
                match parse_smil_clock(value) {
                    Ok(duration) => {
                        tracing::debug!(?duration, "found repeatDur");
                        if let Some(tree) = &mut self.tree {
                            tree.data_mut(node).set_repeat_duration(duration);
                        }
                    }
                    Err(error) => self.grammar_diagnostic(&error),
                }
            } else if key.eq_ignore_ascii_case("dur") {
                match parse_smil_clock(value) {
                    Ok(duration) => {
                        tracing::debug!(?duration, "found dur");
                        if let Some(tree) = &mut self.tree {
                            tree.data_mut(node).set_duration(duration);
                        }
                    }
                    Err(error) => self.grammar_diagnostic(&error),
                }
            } else if key.eq_ignore_ascii_case("repeatCount") {
                match parse_repeat_count(value) {
                    Ok(count) => {
                        tracing::debug!(count, "found repeatCount");
                        if let Some(tree) = &mut self.tree {
                            tree.data_mut(node).set_repeat_count(count);
                        }
                    }
                    Err(error) => self.grammar_diagnostic(&error),
                }
            } else if kind == ElementKind::Media
                && (key.eq_ignore_ascii_case("src")
                    || key.eq_ignore_ascii_case("clipBegin")
                    || key.eq_ignore_ascii_case("clipEnd")
                    || key.eq_ignore_ascii_case("role"))
            {
                // Valid only on media; handled by the media arm (clip
                // attributes are accepted but not acted on yet).
            } else {
                self.invalid_attribute(key);
            }
        }
    }

    fn check_smil_id(&mut self, value: &str) {
        if !value.chars().next().map_or(false, |c| c.is_ascii_alphabetic()) {
            self.invalid_attribute("id");
        }
    }

    /// Where a newly opened container or media element attaches: the node
    /// under construction when it is a container, otherwise that node's
    /// parent.
    fn insertion_parent(&self) -> Option<NodeId> {
        let tree = self.tree.as_ref()?;
        match self.current_entry {
            Some(node) if tree.is_container(node) => Some(node),
            Some(node) => tree.parent(node).or_else(|| Some(tree.root())),
            None => Some(tree.root()),
        }
    }

    fn open_container(&mut self, mode: Mode) -> Option<NodeId> {
        let parent = self.insertion_parent()?;
        let tree = self.tree.as_mut()?;
        Some(tree.add_container(parent, mode))
    }
}
