//! Streaming playlist parser and playback sequencer.
//!
//! ```text
//! ┌─────────────┐      ┌──────────────────┐      ┌───────────────┐
//! │             │ peek │                  │ tree │               │
//! │ Byte source ├──────►  Format handler  ├──────►   Sequencer   │
//! │             │      │                  │      │               │
//! │             │◄─────┤  ASX / WSX / kv  │      │ open/play/... │
//! └─────────────┘ read └────────┬─────────┘      └───────┬───────┘
//!                               │ repair                 │ fetch, play,
//!                               ▼ & restart              ▼ notifications
//!                      ┌──────────────────┐      ┌───────────────┐
//!                      │  Patched memory  │      │ Playback host │
//!                      │      source      │      │ (collaborator)│
//!                      └──────────────────┘      └───────────────┘
//! ```
//!
//! A playlist document flows in through a [`ByteSource`], is sniffed and
//! parsed into a [`Playlist`] tree once fully buffered, and the tree is then
//! handed to a [`Sequencer`] that advances it entry by entry against a
//! [`PlaybackHost`].

pub mod clock;
pub mod consumer;
pub mod error;
pub mod parser;
pub mod reference;
pub mod sequencer;
pub mod source;
pub mod tree;

pub use clock::Dur;
pub use consumer::{FetchPolicy, FetchRequest, MediaResource, PlaybackHost};
pub use error::{Diagnostic, DiagnosticCategory, DiagnosticSink, PlaytreeError, PlaytreeResult};
pub use parser::{detect, ParseOutcome, ParserOptions, PlaylistParser, PlaylistType};
pub use reference::Reference;
pub use sequencer::{Sequencer, SequencerOptions};
pub use source::{ByteSource, MemorySource};
pub use tree::{EntryData, Mode, NodeId, Playlist};
