//! The playback tree: a single-owner arena of entries and containers built
//! by the format handlers and walked by the sequencer.
//!
//! Parent links are plain indices used only for attribute inheritance; a
//! node is owned by exactly one container's child list.

use std::rc::Rc;

use crate::clock::Dur;
use crate::consumer::MediaResource;
use crate::reference::Reference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// How a container advances through its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Children play one after another.
    Sequential,
    /// One child plays; alternatives start only on failure.
    Switch,
    /// One child plays with failure-driven fallback.
    Exclusive,
}

/// Which first-write-wins fields have been written. A first write counts
/// even when the written value is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct SetFields(u16);

impl SetFields {
    const BASE: SetFields = SetFields(1 << 0);
    const TITLE: SetFields = SetFields(1 << 1);
    const AUTHOR: SetFields = SetFields(1 << 2);
    const ABSTRACT: SetFields = SetFields(1 << 3);
    const COPYRIGHT: SetFields = SetFields(1 << 4);
    const START_TIME: SetFields = SetFields(1 << 5);
    const DURATION: SetFields = SetFields(1 << 6);
    const ROLE: SetFields = SetFields(1 << 7);
    const INFO_TARGET: SetFields = SetFields(1 << 8);
    const INFO_URL: SetFields = SetFields(1 << 9);

    fn contains(self, other: SetFields) -> bool {
        self.0 & other.0 != 0
    }

    fn insert(&mut self, other: SetFields) {
        self.0 |= other.0;
    }
}

/// The attribute block shared by entries and containers.
#[derive(Debug, Clone)]
pub struct EntryData {
    source: Option<Reference>,
    full_source: Option<String>,
    base: Option<Reference>,
    start_time: u64,
    duration: Option<Dur>,
    repeat_duration: Option<Dur>,
    repeat_count: i32,
    title: Option<String>,
    author: Option<String>,
    abstract_: Option<String>,
    copyright: Option<String>,
    role: Option<String>,
    info_target: Option<String>,
    info_url: Option<String>,
    client_skip: bool,
    media: Option<Rc<dyn MediaResource>>,
    play_when_available: bool,
    set: SetFields,
}

impl Default for EntryData {
    fn default() -> Self {
        Self {
            source: None,
            full_source: None,
            base: None,
            start_time: 0,
            duration: None,
            repeat_duration: None,
            repeat_count: 1,
            title: None,
            author: None,
            abstract_: None,
            copyright: None,
            role: None,
            info_target: None,
            info_url: None,
            client_skip: true,
            media: None,
            play_when_available: false,
            set: SetFields::default(),
        }
    }
}

impl EntryData {
    pub fn source(&self) -> Option<&Reference> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: Option<Reference>) {
        self.source = source;
        self.full_source = None;
    }

    pub fn base(&self) -> Option<&Reference> {
        self.base.as_ref()
    }

    pub fn set_base(&mut self, base: Option<Reference>) {
        if !self.set.contains(SetFields::BASE) {
            self.base = base;
            self.set.insert(SetFields::BASE);
        }
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn set_start_time(&mut self, start_time: u64) {
        if !self.set.contains(SetFields::START_TIME) {
            self.start_time = start_time;
            self.set.insert(SetFields::START_TIME);
        }
    }

    pub fn duration(&self) -> Option<Dur> {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Dur) {
        if !self.set.contains(SetFields::DURATION) {
            self.duration = Some(duration);
            self.set.insert(SetFields::DURATION);
        }
    }

    pub fn repeat_duration(&self) -> Option<Dur> {
        self.repeat_duration
    }

    pub fn set_repeat_duration(&mut self, duration: Dur) {
        self.repeat_duration = Some(duration);
    }

    pub fn repeat_count(&self) -> i32 {
        self.repeat_count
    }

    pub fn set_repeat_count(&mut self, count: i32) {
        self.repeat_count = count;
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn set_title(&mut self, title: Option<String>) {
        if !self.set.contains(SetFields::TITLE) {
            self.title = title;
            self.set.insert(SetFields::TITLE);
        }
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn set_author(&mut self, author: Option<String>) {
        if !self.set.contains(SetFields::AUTHOR) {
            self.author = author;
            self.set.insert(SetFields::AUTHOR);
        }
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_.as_deref()
    }

    pub fn set_abstract(&mut self, abstract_: Option<String>) {
        if !self.set.contains(SetFields::ABSTRACT) {
            self.abstract_ = abstract_;
            self.set.insert(SetFields::ABSTRACT);
        }
    }

    pub fn copyright(&self) -> Option<&str> {
        self.copyright.as_deref()
    }

    pub fn set_copyright(&mut self, copyright: Option<String>) {
        if !self.set.contains(SetFields::COPYRIGHT) {
            self.copyright = copyright;
            self.set.insert(SetFields::COPYRIGHT);
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn set_role(&mut self, role: Option<String>) {
        if !self.set.contains(SetFields::ROLE) {
            self.role = role;
            self.set.insert(SetFields::ROLE);
        }
    }

    pub fn info_target(&self) -> Option<&str> {
        self.info_target.as_deref()
    }

    pub fn set_info_target(&mut self, info_target: Option<String>) {
        if !self.set.contains(SetFields::INFO_TARGET) {
            self.info_target = info_target;
            self.set.insert(SetFields::INFO_TARGET);
        }
    }

    pub fn info_url(&self) -> Option<&str> {
        self.info_url.as_deref()
    }

    pub fn set_info_url(&mut self, info_url: Option<String>) {
        if !self.set.contains(SetFields::INFO_URL) {
            self.info_url = info_url;
            self.set.insert(SetFields::INFO_URL);
        }
    }

    pub fn client_skip(&self) -> bool {
        self.client_skip
    }

    pub fn set_client_skip(&mut self, value: bool) {
        self.client_skip = value;
    }

    pub fn media(&self) -> Option<Rc<dyn MediaResource>> {
        self.media.clone()
    }

    pub fn set_media(&mut self, media: Rc<dyn MediaResource>) {
        self.media = Some(media);
    }

    pub fn clear_media(&mut self) {
        self.media = None;
    }

    pub fn play_when_available(&self) -> bool {
        self.play_when_available
    }

    pub fn set_play_when_available(&mut self, value: bool) {
        self.play_when_available = value;
    }

    /// Carry inheritable metadata from a placeholder entry onto this node,
    /// through the first-write-wins setters.
    pub(crate) fn merge_from(&mut self, other: &EntryData) {
        self.set_base(other.base.clone());
        self.set_title(other.title.clone());
        self.set_author(other.author.clone());
        self.set_abstract(other.abstract_.clone());
        self.set_copyright(other.copyright.clone());
        self.set_source(other.source.clone());
        if let Some(duration) = other.duration {
            self.set_duration(duration);
        }
    }
}

#[derive(Debug)]
enum NodeBody {
    Entry,
    Container {
        mode: Mode,
        children: Vec<NodeId>,
        current: Option<usize>,
        waiting: bool,
    },
}

#[derive(Debug)]
struct Node {
    data: EntryData,
    body: NodeBody,
    parent: Option<NodeId>,
}

/// The playback tree. Owns every node; the root is always a container.
#[derive(Debug)]
pub struct Playlist {
    nodes: Vec<Node>,
    root: NodeId,
    is_single_file: bool,
}

impl Playlist {
    pub fn new(mode: Mode) -> Self {
        let root = Node {
            data: EntryData::default(),
            body: NodeBody::Container {
                mode,
                children: Vec::new(),
                current: None,
                waiting: false,
            },
            parent: None,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            is_single_file: false,
        }
    }

    /// A synthetic root wrapping one already-resolved media entry.
    pub fn single_file(media: Rc<dyn MediaResource>) -> Self {
        let mut playlist = Self::new(Mode::Sequential);
        playlist.is_single_file = true;
        let entry = playlist.add_entry(playlist.root);
        playlist.data_mut(entry).set_media(media);
        playlist.set_cursor(playlist.root, Some(0));
        playlist
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_single_file(&self) -> bool {
        self.is_single_file
    }

    fn attach(&mut self, parent: NodeId, body: NodeBody) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data: EntryData::default(),
            body,
            parent: Some(parent),
        });
        match &mut self.nodes[parent.0].body {
            NodeBody::Container { children, .. } => children.push(id),
            NodeBody::Entry => unreachable!("attach target is not a container"),
        }
        id
    }

    pub fn add_entry(&mut self, parent: NodeId) -> NodeId {
        self.attach(parent, NodeBody::Entry)
    }

    pub fn add_container(&mut self, parent: NodeId, mode: Mode) -> NodeId {
        self.attach(
            parent,
            NodeBody::Container {
                mode,
                children: Vec::new(),
                current: None,
                waiting: false,
            },
        )
    }

    pub fn data(&self, id: NodeId) -> &EntryData {
        &self.nodes[id.0].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut EntryData {
        &mut self.nodes[id.0].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn is_container(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].body, NodeBody::Container { .. })
    }

    pub fn mode(&self, id: NodeId) -> Option<Mode> {
        match &self.nodes[id.0].body {
            NodeBody::Container { mode, .. } => Some(*mode),
            NodeBody::Entry => None,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.0].body {
            NodeBody::Container { children, .. } => children,
            NodeBody::Entry => &[],
        }
    }

    pub fn cursor(&self, id: NodeId) -> Option<usize> {
        match &self.nodes[id.0].body {
            NodeBody::Container { current, .. } => *current,
            NodeBody::Entry => None,
        }
    }

    pub fn set_cursor(&mut self, id: NodeId, cursor: Option<usize>) {
        if let NodeBody::Container {
            children, current, ..
        } = &mut self.nodes[id.0].body
        {
            debug_assert!(cursor.map_or(true, |index| index < children.len()));
            *current = cursor;
        }
    }

    /// The child the cursor currently names, if any.
    pub fn current_child(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes[id.0].body {
            NodeBody::Container {
                children, current, ..
            } => current.and_then(|index| children.get(index).copied()),
            NodeBody::Entry => None,
        }
    }

    pub fn waiting(&self, id: NodeId) -> bool {
        match &self.nodes[id.0].body {
            NodeBody::Container { waiting, .. } => *waiting,
            NodeBody::Entry => false,
        }
    }

    pub fn set_waiting(&mut self, id: NodeId, value: bool) {
        if let NodeBody::Container { waiting, .. } = &mut self.nodes[id.0].body {
            *waiting = value;
        }
    }

    /// The nearest base reference on this node or an ancestor.
    pub fn base_inherited(&self, id: NodeId) -> Option<&Reference> {
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(base) = self.nodes[node.0].data.base() {
                return Some(base);
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Resolve the node's source against the inherited base and cache the
    /// result. Idempotent for unchanged inputs.
    pub fn full_source(&mut self, id: NodeId) -> Option<String> {
        if let Some(cached) = &self.nodes[id.0].data.full_source {
            return Some(cached.clone());
        }

        let source = self.nodes[id.0].data.source()?.clone();
        let resolved = match self.base_inherited(id) {
            Some(base) => source.combine_with_base(base),
            None => source,
        }
        .to_string();

        self.nodes[id.0].data.full_source = Some(resolved.clone());
        Some(resolved)
    }

    /// Collect the current node's metadata, inheriting each unset value
    /// from the nearest ancestor that carries one.
    pub fn media_attributes(&self, id: NodeId) -> Vec<(&'static str, String)> {
        let mut abstract_ = None;
        let mut author = None;
        let mut copyright = None;
        let mut title = None;
        let mut info_target = None;
        let mut info_url = None;

        let mut current = Some(id);
        while let Some(node) = current {
            let data = self.data(node);
            if abstract_.is_none() {
                abstract_ = data.abstract_text();
            }
            if author.is_none() {
                author = data.author();
            }
            if copyright.is_none() {
                copyright = data.copyright();
            }
            if title.is_none() {
                title = data.title();
            }
            if info_target.is_none() {
                info_target = data.info_target();
            }
            if info_url.is_none() {
                info_url = data.info_url();
            }
            current = self.parent(node);
        }

        [
            ("Abstract", abstract_),
            ("Author", author),
            ("Copyright", copyright),
            ("InfoTarget", info_target),
            ("InfoURL", info_url),
            ("Title", title),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|value| (name, value.to_string())))
        .collect()
    }

    /// Append another tree's nodes into this arena and return the new id of
    /// its root. The grafted root is left unattached; the caller splices it.
    pub(crate) fn graft(&mut self, subtree: Playlist) -> NodeId {
        let offset = self.nodes.len();
        let remap = |id: NodeId| NodeId(id.0 + offset);

        for mut node in subtree.nodes {
            node.parent = node.parent.map(remap);
            if let NodeBody::Container { children, .. } = &mut node.body {
                for child in children.iter_mut() {
                    *child = remap(*child);
                }
            }
            self.nodes.push(node);
        }

        remap(subtree.root)
    }

    /// Replace `parent`'s child at `index` with `new_child`. The old child
    /// stays in the arena but is no longer reachable from the root.
    pub(crate) fn replace_child(&mut self, parent: NodeId, index: usize, new_child: NodeId) {
        self.nodes[new_child.0].parent = Some(parent);
        if let NodeBody::Container { children, .. } = &mut self.nodes[parent.0].body {
            children[index] = new_child;
        }
    }

    /// Indented structural dump for debug logging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: NodeId, depth: usize, out: &mut String) {
        for _ in 0..=depth {
            out.push(' ');
        }
        match self.mode(id) {
            Some(Mode::Sequential) => out.push_str("seq\n"),
            Some(Mode::Switch) => out.push_str("switch\n"),
            Some(Mode::Exclusive) => out.push_str("excl\n"),
            None => {
                let source = self
                    .data(id)
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                out.push_str(&format!("media {source}\n"));
            }
        }
        for child in self.children(id) {
            self.dump_node(*child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeMedia;
    impl MediaResource for FakeMedia {}

    fn reference(text: &str) -> Reference {
        Reference::parse(text, true).unwrap()
    }

    #[test]
    fn test_base_is_set_once() {
        let mut data = EntryData::default();
        data.set_base(Some(reference("http://h/dir/")));
        data.set_base(Some(reference("http://other/")));
        assert_eq!(data.base().unwrap().to_string(), "http://h/dir/");
    }

    #[test]
    fn test_first_write_wins_even_when_empty() {
        let mut data = EntryData::default();
        data.set_title(None);
        data.set_title(Some("late".to_string()));
        assert_eq!(data.title(), None);
    }

    #[test]
    fn test_base_inheritance_walks_parents() {
        let mut tree = Playlist::new(Mode::Sequential);
        tree.data_mut(tree.root())
            .set_base(Some(reference("http://h/dir/")));
        let inner = tree.add_container(tree.root(), Mode::Sequential);
        let leaf = tree.add_entry(inner);
        assert_eq!(
            tree.base_inherited(leaf).unwrap().to_string(),
            "http://h/dir/"
        );
    }

    #[test]
    fn test_full_source_resolves_and_caches() {
        let mut tree = Playlist::new(Mode::Sequential);
        tree.data_mut(tree.root())
            .set_base(Some(reference("http://h/dir/")));
        let leaf = tree.add_entry(tree.root());
        tree.data_mut(leaf).set_source(Some(reference("sub/x")));

        assert_eq!(tree.full_source(leaf).unwrap(), "http://h/dir/sub/x");
        // Second resolution observes the cache, not a recomputation.
        assert_eq!(tree.full_source(leaf).unwrap(), "http://h/dir/sub/x");
    }

    #[test]
    fn test_media_attributes_inherit_from_ancestors() {
        let mut tree = Playlist::new(Mode::Sequential);
        tree.data_mut(tree.root())
            .set_title(Some("album".to_string()));
        tree.data_mut(tree.root())
            .set_author(Some("band".to_string()));
        let leaf = tree.add_entry(tree.root());
        tree.data_mut(leaf).set_title(Some("track".to_string()));

        let attributes = tree.media_attributes(leaf);
        assert!(attributes.contains(&("Title", "track".to_string())));
        assert!(attributes.contains(&("Author", "band".to_string())));
    }

    #[test]
    fn test_single_file_root() {
        let tree = Playlist::single_file(Rc::new(FakeMedia));
        assert!(tree.is_single_file());
        assert_eq!(tree.children(tree.root()).len(), 1);
        let entry = tree.current_child(tree.root()).unwrap();
        assert!(tree.data(entry).media().is_some());
    }

    #[test]
    fn test_merge_from_respects_earlier_writes() {
        let mut target = EntryData::default();
        target.set_title(Some("kept".to_string()));

        let mut placeholder = EntryData::default();
        placeholder.set_title(Some("ignored".to_string()));
        placeholder.set_author(Some("carried".to_string()));

        target.merge_from(&placeholder);
        assert_eq!(target.title(), Some("kept"));
        assert_eq!(target.author(), Some("carried"));
    }
}
