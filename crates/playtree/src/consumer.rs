//! The seam between the playback tree and the media host.
//!
//! The sequencer never touches transport or decode directly; it asks the
//! host to do things and the host re-enters the sequencer when asynchronous
//! work completes.

use std::rc::Rc;

use crate::error::{DiagnosticSink, PlaytreeError};

/// Opaque handle to an opened media resource. The host decides what backs
/// it; the tree only caches and hands it back.
pub trait MediaResource: std::fmt::Debug {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPolicy {
    Streaming,
    Progressive,
}

/// A request for the media-fetch collaborator.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub verb: &'static str,
    pub url: String,
    pub policy: FetchPolicy,
}

impl FetchRequest {
    pub(crate) fn streaming(url: String) -> Self {
        Self {
            verb: "GET",
            url,
            policy: FetchPolicy::Streaming,
        }
    }
}

/// Everything the sequencer asks of its host: media fetch, transport
/// control, and notifications. Completion of a fetch is signalled back by
/// calling [`crate::sequencer::Sequencer::media_ready`] (or
/// `on_entry_failed` on failure); end of playback for the current entry by
/// `on_entry_ended`.
pub trait PlaybackHost: DiagnosticSink {
    /// Start resolving a media reference. Completes asynchronously.
    fn fetch(&mut self, request: FetchRequest);

    /// Hand the host the media for the entry about to play.
    fn set_media(&mut self, media: Rc<dyn MediaResource>);

    fn play(&mut self);

    fn pause(&mut self);

    fn stop(&mut self);

    /// Record that playback should begin as soon as the pending entry is
    /// able to start.
    fn set_play_requested(&mut self);

    /// Reset host playback state before the tree is reopened.
    fn reinitialize(&mut self);

    /// A fatal error ended the current operation.
    fn media_failed(&mut self, error: PlaytreeError);

    /// An entry actually started playing.
    fn play_started(&mut self) {}

    /// A placeholder entry was replaced by a fetched nested playlist.
    fn tree_merged(&mut self) {}
}
