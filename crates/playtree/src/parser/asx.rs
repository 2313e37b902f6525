//! ASX v3 element handlers. Element and attribute names are matched
//! case-insensitively; construct-level problems become diagnostics while
//! the parse keeps going.

use crate::clock::{parse_clock_literal, Dur};
use crate::error::{codes, DiagnosticCategory, PlaytreeError, PlaytreeResult};
use crate::reference::Reference;
use crate::tree::{Mode, Playlist};

use super::{is_all_whitespace, kind::ElementKind, ParseContext};

/// Elements whose text applies to the nearest entry or the playlist root.
const CONTENT_PARENTS: u32 = ElementKind::Asx as u32 | ElementKind::Entry as u32;
/// Elements carrying timing values.
const TIMING_PARENTS: u32 = ElementKind::Entry as u32 | ElementKind::Ref as u32;

impl ParseContext<'_> {
    pub(super) fn asx_start_element(
        &mut self,
        name: &str,
        attrs: &[(String, String)],
    ) -> PlaytreeResult<()> {
        let kind = ElementKind::from_name(name);
        self.text = None;
        self.push_kind(kind);

        match kind {
            ElementKind::Abstract
            | ElementKind::Author
            | ElementKind::Banner
            | ElementKind::Copyright
            | ElementKind::Title
            | ElementKind::LogUrl => {
                if let Some((key, _)) = attrs.first() {
                    self.invalid_attribute(key);
                }
            }
            ElementKind::Asx => {
                // The root must sit directly under the document root.
                if self.depth() != 2 || !self.assert_parent_kind(ElementKind::Root as u32) {
                    let message = "playlist root element in an unexpected position".to_string();
                    self.report(
                        DiagnosticCategory::DocumentFormat,
                        codes::PARSE,
                        message.clone(),
                    );
                    return Err(PlaytreeError::DocumentFormat(message));
                }
                self.tree = Some(Playlist::new(Mode::Sequential));
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("VERSION") {
                        if value == "3" || value == "3.0" {
                            self.version = Some(3);
                        } else {
                            self.report(
                                DiagnosticCategory::DocumentFormat,
                                codes::PARSE,
                                format!("unsupported playlist version: {value}"),
                            );
                        }
                    } else if key.eq_ignore_ascii_case("BANNERBAR")
                        || key.eq_ignore_ascii_case("PREVIEWMODE")
                    {
                        self.unsupported_attribute(key);
                    } else {
                        self.invalid_attribute(key);
                    }
                }
            }
            ElementKind::Base => {
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("HREF") {
                        if let Some(node) = self.current_content() {
                            let base = self.checked_source_reference(value)?;
                            if let Some(tree) = &mut self.tree {
                                tree.data_mut(node).set_base(Some(base));
                            }
                        }
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
            }
            ElementKind::Duration => {
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("VALUE") {
                        match parse_clock_literal(value) {
                            Ok(duration) => {
                                if self.parent_kind() != Some(ElementKind::Ref) {
                                    if let (Some(tree), Some(entry)) =
                                        (self.tree.as_mut(), self.current_entry)
                                    {
                                        tree.data_mut(entry).set_duration(duration);
                                    }
                                }
                            }
                            Err(error) => self.grammar_diagnostic(&error),
                        }
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
            }
            ElementKind::Entry => {
                let mut client_skip = true;
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("CLIENTSKIP") {
                        if value.eq_ignore_ascii_case("YES") {
                            client_skip = true;
                        } else if value.eq_ignore_ascii_case("NO") {
                            client_skip = false;
                        } else {
                            self.report(
                                DiagnosticCategory::DocumentFormat,
                                codes::PARSE,
                                format!("invalid CLIENTSKIP value: {value}"),
                            );
                            break;
                        }
                    } else if key.eq_ignore_ascii_case("SKIPIFREF") {
                        self.unsupported_attribute(key);
                        break;
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
                if let Some(tree) = &mut self.tree {
                    let root = tree.root();
                    let entry = tree.add_entry(root);
                    tree.data_mut(entry).set_client_skip(client_skip);
                    self.current_entry = Some(entry);
                }
            }
            ElementKind::EntryRef => {
                let mut href = None;
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("HREF") {
                        if href.is_none() {
                            href = Some(value.clone());
                        }
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
                let source = match href {
                    Some(href) => match Reference::parse(&href, true) {
                        Ok(reference) => Some(reference),
                        Err(_) => {
                            let message = format!("unparsable reference: {href}");
                            self.report(
                                DiagnosticCategory::Policy,
                                codes::UNKNOWN,
                                message.clone(),
                            );
                            return Err(PlaytreeError::Policy(message));
                        }
                    },
                    None => None,
                };
                if let Some(tree) = &mut self.tree {
                    let root = tree.root();
                    let entry = tree.add_entry(root);
                    tree.data_mut(entry).set_source(source);
                    self.current_entry = Some(entry);
                }
            }
            ElementKind::MoreInfo => {
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("HREF") {
                        if let (Some(tree), Some(entry)) = (self.tree.as_mut(), self.current_entry)
                        {
                            tree.data_mut(entry).set_info_url(Some(value.clone()));
                        }
                    } else if key.eq_ignore_ascii_case("TARGET") {
                        if let (Some(tree), Some(entry)) = (self.tree.as_mut(), self.current_entry)
                        {
                            tree.data_mut(entry).set_info_target(Some(value.clone()));
                        }
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
            }
            ElementKind::StartTime => {
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("VALUE") {
                        match parse_clock_literal(value) {
                            Ok(Dur::Millis(start)) => {
                                if self.parent_kind() != Some(ElementKind::Ref) {
                                    if let (Some(tree), Some(entry)) =
                                        (self.tree.as_mut(), self.current_entry)
                                    {
                                        tree.data_mut(entry).set_start_time(start);
                                    }
                                }
                            }
                            Ok(Dur::Forever) => {}
                            Err(error) => self.grammar_diagnostic(&error),
                        }
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
            }
            ElementKind::Ref => {
                for (key, value) in attrs {
                    if key.eq_ignore_ascii_case("HREF") {
                        let unset_entry = self.current_entry.filter(|entry| {
                            self.tree
                                .as_ref()
                                .map_or(false, |tree| tree.data(*entry).source().is_none())
                        });
                        if let Some(entry) = unset_entry {
                            match Reference::parse(value, true) {
                                Ok(reference) => {
                                    if let Some(tree) = &mut self.tree {
                                        tree.data_mut(entry).set_source(Some(reference));
                                    }
                                }
                                Err(_) => {
                                    let message = format!("unparsable reference: {value}");
                                    self.report(
                                        DiagnosticCategory::Policy,
                                        codes::UNKNOWN,
                                        message.clone(),
                                    );
                                    return Err(PlaytreeError::Policy(message));
                                }
                            }
                        }
                    } else {
                        self.invalid_attribute(key);
                        break;
                    }
                }
            }
            ElementKind::StartMarker
            | ElementKind::EndMarker
            | ElementKind::Repeat
            | ElementKind::Param
            | ElementKind::Event => self.unsupported_element(name),
            _ => self.invalid_element(name),
        }
        Ok(())
    }

    pub(super) fn asx_end_element(&mut self) {
        let kind = self.current_kind();
        match kind {
            ElementKind::Abstract => {
                if self.assert_parent_kind(CONTENT_PARENTS) {
                    let text = self.text.take();
                    let node = self.current_content();
                    if let (Some(tree), Some(node)) = (self.tree.as_mut(), node) {
                        tree.data_mut(node).set_abstract(text);
                    }
                }
            }
            ElementKind::Author => {
                if self.assert_parent_kind(CONTENT_PARENTS) {
                    let text = self.text.take();
                    let node = self.current_content();
                    if let (Some(tree), Some(node)) = (self.tree.as_mut(), node) {
                        tree.data_mut(node).set_author(text);
                    }
                }
            }
            ElementKind::Base => {
                self.assert_parent_kind(CONTENT_PARENTS);
            }
            ElementKind::Copyright => {
                if self.assert_parent_kind(CONTENT_PARENTS) {
                    let text = self.text.take();
                    let node = self.current_content();
                    if let (Some(tree), Some(node)) = (self.tree.as_mut(), node) {
                        tree.data_mut(node).set_copyright(text);
                    }
                }
            }
            ElementKind::Title => {
                if self.assert_parent_kind(CONTENT_PARENTS) {
                    let text = self.text.take();
                    let node = self.current_content();
                    if let (Some(tree), Some(node)) = (self.tree.as_mut(), node) {
                        tree.data_mut(node).set_title(text);
                    }
                }
            }
            ElementKind::Duration => {
                if self.assert_parent_kind(TIMING_PARENTS) {
                    if let Some(text) = self.text.take() {
                        match parse_clock_literal(&text) {
                            Ok(duration) => {
                                if let (Some(tree), Some(entry)) =
                                    (self.tree.as_mut(), self.current_entry)
                                {
                                    tree.data_mut(entry).set_duration(duration);
                                }
                            }
                            Err(error) => self.grammar_diagnostic(&error),
                        }
                    }
                }
            }
            ElementKind::Entry | ElementKind::EntryRef => {
                self.assert_parent_kind(ElementKind::Asx as u32);
            }
            ElementKind::StartTime => {
                if self.assert_parent_kind(TIMING_PARENTS)
                    && !is_all_whitespace(self.text.as_deref())
                {
                    self.report(
                        DiagnosticCategory::DocumentFormat,
                        codes::PARSE,
                        "unexpected character data in STARTTIME".to_string(),
                    );
                }
            }
            ElementKind::Ref => {
                if self.assert_parent_kind(ElementKind::Entry as u32)
                    && !is_all_whitespace(self.text.as_deref())
                {
                    self.report(
                        DiagnosticCategory::DocumentFormat,
                        codes::PARSE,
                        "unexpected character data in REF".to_string(),
                    );
                }
            }
            ElementKind::MoreInfo => {
                if self.assert_parent_kind(CONTENT_PARENTS)
                    && !is_all_whitespace(self.text.as_deref())
                {
                    self.report(
                        DiagnosticCategory::DocumentFormat,
                        codes::PARSE,
                        "unexpected character data in MOREINFO".to_string(),
                    );
                }
            }
            ElementKind::Asx => {
                tracing::debug!(version = ?self.version, "closed playlist root");
                self.assert_parent_kind(ElementKind::Root as u32);
            }
            ElementKind::Banner | ElementKind::LogUrl => {}
            _ => {
                self.report(
                    DiagnosticCategory::DocumentFormat,
                    codes::PARSE,
                    format!("unexpected {kind:?} close"),
                );
            }
        }

        self.text = None;
        if self.current_kind() == ElementKind::Entry {
            self.current_entry = None;
        }
        self.pop_kind();
    }
}
