//! The playback sequencer: walks a finished playback tree entry by entry,
//! driving the host's transport and absorbing its completion events.
//!
//! Suspension is a flag, never a block: an entry whose media is still being
//! fetched leaves its container `waiting`, and the host resumes sequencing
//! by re-entering [`Sequencer::media_ready`], [`Sequencer::on_entry_ended`]
//! or [`Sequencer::on_entry_failed`].

use std::rc::Rc;

use crate::clock::Dur;
use crate::consumer::{FetchRequest, MediaResource, PlaybackHost};
use crate::error::PlaytreeError;
use crate::tree::{Mode, NodeId, Playlist};

#[derive(Debug, Clone)]
pub struct SequencerOptions {
    /// How many nested playlist indirections may stack up before a merge is
    /// refused.
    pub max_indirection_depth: usize,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            max_indirection_depth: 5,
        }
    }
}

/// Owns the playback tree for its lifetime and advances it in response to
/// host events. All methods run synchronously on the caller's context.
pub struct Sequencer {
    tree: Playlist,
    options: SequencerOptions,
}

impl Sequencer {
    pub fn new(tree: Playlist) -> Self {
        Self::with_options(tree, SequencerOptions::default())
    }

    pub fn with_options(tree: Playlist, options: SequencerOptions) -> Self {
        Self { tree, options }
    }

    pub fn tree(&self) -> &Playlist {
        &self.tree
    }

    /// The leaf the cursor chain currently rests on.
    pub fn current_entry(&self) -> Option<NodeId> {
        let mut node = self.tree.root();
        loop {
            let child = self.tree.current_child(node)?;
            if self.tree.is_container(child) {
                node = child;
            } else {
                return Some(child);
            }
        }
    }

    /// Reset the cursor chain to the first playable entry and open it.
    pub fn open(&mut self, host: &mut dyn PlaybackHost) {
        let root = self.tree.root();
        self.open_at(root, host);
    }

    fn open_at(&mut self, id: NodeId, host: &mut dyn PlaybackHost) {
        if !self.tree.is_container(id) {
            return self.open_entry(id, host);
        }

        // Entries declared with an explicit zero-length span never play.
        let count = self.tree.children(id).len();
        let mut index = 0;
        while index < count {
            let child = self.tree.children(id)[index];
            if self.tree.data(child).duration() == Some(Dur::Millis(0)) {
                tracing::debug!("skipping zero-length entry");
                index += 1;
            } else {
                break;
            }
        }

        if index >= count {
            self.tree.set_cursor(id, None);
            return;
        }
        self.tree.set_cursor(id, Some(index));
        let child = self.tree.children(id)[index];
        self.open_at(child, host);
    }

    fn open_entry(&mut self, id: NodeId, host: &mut dyn PlaybackHost) {
        if let Some(media) = self.tree.data(id).media() {
            host.set_media(media);
            return;
        }
        match self.tree.full_source(id) {
            Some(url) => host.fetch(FetchRequest::streaming(url)),
            None => tracing::warn!("entry has no source to open"),
        }
    }

    /// Start (or request) playback of the current entry. Returns false when
    /// the entry cannot start yet; the start completes on `media_ready`.
    pub fn play(&mut self, host: &mut dyn PlaybackHost) -> bool {
        let root = self.tree.root();
        self.play_at(root, host)
    }

    fn play_at(&mut self, id: NodeId, host: &mut dyn PlaybackHost) -> bool {
        if !self.tree.is_container(id) {
            return self.play_entry(id, host);
        }
        if self.tree.cursor(id).is_none() {
            if self.tree.children(id).is_empty() {
                return false;
            }
            self.tree.set_cursor(id, Some(0));
        }
        match self.tree.current_child(id) {
            Some(child) => self.play_at(child, host),
            None => false,
        }
    }

    fn play_entry(&mut self, id: NodeId, host: &mut dyn PlaybackHost) -> bool {
        let Some(media) = self.tree.data(id).media() else {
            // Not resolved yet; remember the intent and start the fetch.
            self.tree.data_mut(id).set_play_when_available(true);
            self.open_entry(id, host);
            return false;
        };

        host.set_media(media);
        host.play();
        self.tree.data_mut(id).set_play_when_available(false);
        host.play_started();
        true
    }

    pub fn pause(&mut self, host: &mut dyn PlaybackHost) -> bool {
        let Some(leaf) = self.current_entry() else {
            return false;
        };
        self.tree.data_mut(leaf).set_play_when_available(false);
        host.pause();
        true
    }

    /// Stop the current chain. A non-single-file root also reinitializes
    /// the consumer and reopens the tree from the start.
    pub fn stop(&mut self, host: &mut dyn PlaybackHost) {
        let root = self.tree.root();
        if self.tree.current_child(root).is_none() {
            return;
        }
        self.stop_at(root, host);
        if !self.tree.is_single_file() {
            host.reinitialize();
            self.open(host);
        }
    }

    fn stop_at(&mut self, id: NodeId, host: &mut dyn PlaybackHost) {
        if self.tree.is_container(id) {
            if let Some(child) = self.tree.current_child(id) {
                self.stop_at(child, host);
            }
            self.tree.set_cursor(id, None);
        } else {
            self.tree.data_mut(id).set_play_when_available(false);
            host.stop();
            if !self.tree.is_single_file() {
                self.tree.data_mut(id).clear_media();
            }
        }
    }

    /// The current entry finished normally.
    pub fn on_entry_ended(&mut self, host: &mut dyn PlaybackHost) {
        self.play_next(false, host);
    }

    /// The current entry failed; failure becomes forward progress.
    pub fn on_entry_failed(&mut self, host: &mut dyn PlaybackHost) {
        self.play_next(true, host);
    }

    /// Advance the cursor chain after the current entry ended or failed.
    pub fn play_next(&mut self, fail: bool, host: &mut dyn PlaybackHost) {
        let root = self.tree.root();
        self.play_next_at(root, fail, host);
    }

    fn play_next_at(&mut self, id: NodeId, fail: bool, host: &mut dyn PlaybackHost) {
        let Some(cursor) = self.tree.cursor(id) else {
            return;
        };
        self.tree.set_waiting(id, false);

        let Some(current) = self.tree.current_child(id) else {
            return;
        };

        if fail {
            self.tree.data_mut(current).set_repeat_count(0);
        }

        let count = self.tree.data(current).repeat_count();
        if count > 1 {
            self.tree.data_mut(current).set_repeat_count(count - 1);
            host.set_play_requested();
            self.play_at(current, host);
            return;
        }
        if count == -1 {
            // Repeat forever: replay without decrementing.
            host.set_play_requested();
            self.play_at(current, host);
            return;
        }

        if self.tree.data(current).duration() == Some(Dur::Forever) {
            host.set_play_requested();
            self.play_at(current, host);
            return;
        }

        if self.tree.is_container(current) {
            self.play_next_at(current, fail, host);
            if self.tree.waiting(current) {
                self.tree.set_waiting(id, true);
                return;
            }
        }

        let next_index = cursor + 1;
        if next_index < self.tree.children(id).len() {
            self.tree.set_cursor(id, Some(next_index));
            let next = self.tree.children(id)[next_index];
            // Switch only auto-starts an alternative when the previous one
            // failed; every other mode advances on its own.
            let auto_start = fail || self.tree.mode(id) != Some(Mode::Switch);
            if auto_start {
                host.set_play_requested();
                if !self.play_at(next, host) {
                    self.tree.set_waiting(id, true);
                }
            }
        }
        // No next sibling: sequencing at this level is done; the caller
        // decides whether to stop, loop or report completion.
    }

    /// Asynchronous completion of a media fetch for the current entry.
    pub fn media_ready(&mut self, media: Rc<dyn MediaResource>, host: &mut dyn PlaybackHost) {
        let Some(leaf) = self.current_entry() else {
            return;
        };
        self.tree.data_mut(leaf).set_media(media);
        if self.tree.data(leaf).play_when_available() {
            self.play_entry(leaf, host);
        }
    }

    /// A reference entry resolved to a whole nested playlist: splice its
    /// root in place of the placeholder leaf, carrying inherited metadata
    /// over. Refused with a recursion-limit failure once indirections stack
    /// too deep.
    pub fn replace_current_entry(
        &mut self,
        subtree: Playlist,
        host: &mut dyn PlaybackHost,
    ) -> bool {
        // Descend to the innermost container whose current child is a leaf.
        let mut container = self.tree.root();
        let placeholder = loop {
            let Some(child) = self.tree.current_child(container) else {
                return false;
            };
            if self.tree.is_container(child) {
                container = child;
            } else {
                break child;
            }
        };

        let mut depth = 0;
        let mut ancestor = self.tree.parent(placeholder);
        while let Some(node) = ancestor {
            depth += 1;
            ancestor = self.tree.parent(node);
        }
        if depth > self.options.max_indirection_depth {
            tracing::warn!(depth, "refusing playlist indirection");
            host.media_failed(PlaytreeError::RecursionLimit);
            return false;
        }

        let Some(index) = self.tree.cursor(container) else {
            return false;
        };

        let new_root = self.tree.graft(subtree);
        let placeholder_data = self.tree.data(placeholder).clone();
        self.tree.data_mut(new_root).merge_from(&placeholder_data);
        self.tree.replace_child(container, index, new_root);

        host.tree_merged();
        true
    }

    /// True when the cursor rests on the final child at every level.
    pub fn is_current_entry_last(&self) -> bool {
        self.last_at(self.tree.root())
    }

    fn last_at(&self, id: NodeId) -> bool {
        let children = self.tree.children(id);
        let Some(&last) = children.last() else {
            return false;
        };
        match self.tree.cursor(id) {
            Some(index) if children.get(index) == Some(&last) => {}
            _ => return false,
        }
        if self.tree.is_container(last) {
            self.last_at(last)
        } else {
            true
        }
    }

    /// Metadata for the current entry, inherited up the parent chain.
    pub fn media_attributes(&self) -> Vec<(&'static str, String)> {
        self.current_entry()
            .map(|leaf| self.tree.media_attributes(leaf))
            .unwrap_or_default()
    }
}
