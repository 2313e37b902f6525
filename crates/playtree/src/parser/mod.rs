//! Incremental playlist parsing: format sniffing, the readiness gate, the
//! XML event loop shared by the two XML dialects, the legacy `[Reference]`
//! dialect, and best-effort repair of unescaped markup characters.

mod asx;
mod kind;
mod smil;

use std::io::SeekFrom;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{
    codes, Diagnostic, DiagnosticCategory, DiagnosticSink, PlaytreeError, PlaytreeResult,
};
use crate::reference::Reference;
use crate::source::{ByteSource, MemorySource};
use crate::tree::{Mode, NodeId, Playlist};

use kind::ElementKind;

/// Schemes a base reference or a media source is allowed to use.
pub(crate) const ALLOWED_SCHEMES: &[&str] = &["http", "https", "mms", "rtsp", "rtspt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    /// Legacy `[Reference]` key-value document.
    Asx2,
    /// `<ASX ...>` XML document.
    Asx3,
    /// `<?wsx ...?>` SMIL document.
    Smil,
    Unknown,
}

/// Classify a document from a bounded header peek. Consumes nothing.
pub fn detect(source: &mut dyn ByteSource) -> PlaylistType {
    fn matches_header(source: &mut dyn ByteSource, header: &[u8]) -> bool {
        let mut buffer = [0u8; 20];
        let probe = &mut buffer[..header.len()];
        source.peek(probe) && probe.eq_ignore_ascii_case(header)
    }

    if matches_header(source, b"[Reference]") {
        PlaylistType::Asx2
    } else if matches_header(source, b"<ASX") {
        PlaylistType::Asx3
    } else if matches_header(source, b"<?wsx") {
        PlaylistType::Smil
    } else {
        PlaylistType::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Upper bound on escape-and-reparse rounds for one document.
    pub max_repair_attempts: u32,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_repair_attempts: 8,
        }
    }
}

#[derive(Debug)]
pub enum ParseOutcome {
    Playlist(Playlist),
    /// The document is not fully buffered yet; retry once more bytes arrive.
    NotEnoughData,
}

/// One parser per document. Drives the byte source through the readiness
/// gate, dispatches on the sniffed format and restarts itself over a patched
/// in-memory copy when recovery applies.
pub struct PlaylistParser {
    source: Box<dyn ByteSource>,
    options: ParserOptions,
}

impl PlaylistParser {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self::with_options(source, ParserOptions::default())
    }

    pub fn with_options(source: Box<dyn ByteSource>, options: ParserOptions) -> Self {
        Self { source, options }
    }

    pub fn parse(&mut self, sink: &mut dyn DiagnosticSink) -> PlaytreeResult<ParseOutcome> {
        let mut repairs = 0;
        loop {
            // Don't try to parse anything until the whole document is here.
            match (self.source.size(), self.source.last_available_position()) {
                (Some(size), Some(available)) if size == available => {}
                _ => return Ok(ParseOutcome::NotEnoughData),
            }

            let kind = detect(self.source.as_mut());
            tracing::debug!(?kind, "parsing playlist document");
            match kind {
                PlaylistType::Asx2 => {
                    return self.parse_reference_list().map(ParseOutcome::Playlist)
                }
                PlaylistType::Unknown => return Err(PlaytreeError::UnknownFormat),
                PlaylistType::Asx3 | PlaylistType::Smil => {}
            }

            let document = self.read_document()?;
            match run_document(kind, &document, sink) {
                Ok(tree) => {
                    tracing::debug!("parsed playlist:\n{}", tree.dump());
                    return Ok(ParseOutcome::Playlist(tree));
                }
                Err(RunError::Fatal(error)) => return Err(error),
                Err(RunError::Syntax { offset, message }) => {
                    repairs += 1;
                    let patch = if repairs > self.options.max_repair_attempts {
                        None
                    } else {
                        repair_document(&document, offset)
                    };
                    match patch {
                        Some(patched) => {
                            tracing::debug!(offset, repairs, "escaped an invalid token, reparsing");
                            self.source = Box::new(MemorySource::new(patched));
                        }
                        None => {
                            sink.report(Diagnostic::new(
                                DiagnosticCategory::Syntax,
                                codes::SYNTAX,
                                format!("{message} (byte {offset})"),
                            ));
                            return Err(PlaytreeError::XmlSyntax { offset, message });
                        }
                    }
                }
            }
        }
    }

    fn read_document(&mut self) -> PlaytreeResult<Vec<u8>> {
        self.source.seek(SeekFrom::Start(0))?;
        let mut document = Vec::new();
        // Playlist documents don't tend to be big.
        let mut chunk = [0u8; 1024];
        loop {
            let count = self.source.read_some(&mut chunk)?;
            if count == 0 {
                break;
            }
            document.extend_from_slice(&chunk[..count]);
        }
        Ok(document)
    }

    /// The legacy dialect: a key-value document whose `Ref1` names an ASF
    /// resource over HTTP, rewritten to the matching mms reference.
    fn parse_reference_list(&mut self) -> PlaytreeResult<Playlist> {
        self.source.seek(SeekFrom::Start(0))?;
        let mut buffer = [0u8; 1024];
        let count = self.source.read_some(&mut buffer)?;
        let text = String::from_utf8_lossy(&buffer[..count]);

        let Some(href) = key_value_lookup(&text, "Reference", "Ref1") else {
            tracing::warn!("no Ref1 entry in [Reference] document");
            return Err(PlaytreeError::DocumentFormat(
                "no Ref1 entry in [Reference] document".to_string(),
            ));
        };

        if !href.starts_with("http://") || !href.ends_with("MSWMExt=.asf") {
            tracing::warn!(%href, "Ref1 entry is not a usable stream reference");
            return Err(PlaytreeError::DocumentFormat(
                "Ref1 entry is not a usable stream reference".to_string(),
            ));
        }

        let mms = format!("mms://{}", &href["http://".len()..]);

        let mut tree = Playlist::new(Mode::Sequential);
        let entry = tree.add_entry(tree.root());
        if let Ok(reference) = Reference::parse(&mms, false) {
            tree.data_mut(entry).set_source(Some(reference));
        }
        Ok(tree)
    }
}

fn key_value_lookup(text: &str, section: &str, key: &str) -> Option<String> {
    let mut in_section = false;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') && line.ends_with(']') {
            in_section = line[1..line.len() - 1].eq_ignore_ascii_case(section);
        } else if in_section {
            if let Some((candidate, value)) = line.split_once('=') {
                if candidate.trim().eq_ignore_ascii_case(key) {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// Failure modes of one XML attempt. Syntax failures may be repairable;
/// everything else already aborted the attempt for good.
enum RunError {
    Syntax { offset: u64, message: String },
    Fatal(PlaytreeError),
}

/// Drive the XML event engine over the buffered document, dispatching events
/// into the dialect handlers.
fn run_document(
    kind: PlaylistType,
    document: &[u8],
    sink: &mut dyn DiagnosticSink,
) -> Result<Playlist, RunError> {
    let mut context = ParseContext::new(sink);
    let mut reader = Reader::from_reader(document);
    let mut buf = Vec::new();

    loop {
        let event_start = reader.buffer_position() as u64;
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(error) => {
                return Err(RunError::Syntax {
                    offset: reader.error_position() as u64,
                    message: error.to_string(),
                })
            }
        };
        let event_end = reader.buffer_position() as u64;

        match event {
            Event::Start(start) => {
                let (name, attrs) = decode_start(&start, document, event_start, event_end)?;
                context
                    .start_element(kind, &name, &attrs)
                    .map_err(RunError::Fatal)?;
            }
            Event::Empty(start) => {
                let (name, attrs) = decode_start(&start, document, event_start, event_end)?;
                context
                    .start_element(kind, &name, &attrs)
                    .map_err(RunError::Fatal)?;
                context.end_element(kind);
            }
            Event::End(_) => context.end_element(kind),
            Event::Text(text) => {
                if kind == PlaylistType::Asx3 {
                    let text = text.unescape().map_err(|error| {
                        pin_ampersand(document, event_start, event_end, error.to_string())
                    })?;
                    context.append_text(&text);
                }
            }
            Event::CData(data) => {
                if kind == PlaylistType::Asx3 {
                    context.append_text(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            // Declarations, processing instructions, comments.
            _ => {}
        }
        buf.clear();
    }

    context.finish()
}

fn decode_start(
    start: &quick_xml::events::BytesStart<'_>,
    document: &[u8],
    event_start: u64,
    event_end: u64,
) -> Result<(String, Vec<(String, String)>), RunError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|error| {
            pin_ampersand(document, event_start, event_end, error.to_string())
        })?;
        let value = attr.unescape_value().map_err(|error| {
            pin_ampersand(document, event_start, event_end, error.to_string())
        })?;
        attrs.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok((name, attrs))
}

/// The engine reports entity errors against the event, not the offending
/// byte; pin the offset to the last `&` inside the event's span so the
/// backward repair scan lands on it.
fn pin_ampersand(document: &[u8], event_start: u64, event_end: u64, message: String) -> RunError {
    let start = (event_start as usize).min(document.len());
    let end = (event_end as usize).min(document.len());
    let offset = document[start..end]
        .iter()
        .rposition(|b| *b == b'&')
        .map(|rel| (start + rel) as u64)
        .unwrap_or_else(|| end.saturating_sub(1) as u64);
    RunError::Syntax { offset, message }
}

/// Walk back from the failure offset to the nearest character that needs
/// escaping in content position, and splice its escaped form into a patched
/// copy of the document.
fn repair_document(document: &[u8], offset: u64) -> Option<Vec<u8>> {
    let mut index = (offset as usize).min(document.len().saturating_sub(1));
    let escape: &[u8] = loop {
        match document.get(index)? {
            b'&' => break b"&amp;",
            b'<' => break b"&lt;",
            b'>' => break b"&gt;",
            _ => {
                if index == 0 {
                    return None;
                }
                index -= 1;
            }
        }
    };

    let mut patched = Vec::with_capacity(document.len() + escape.len());
    patched.extend_from_slice(&document[..index]);
    patched.extend_from_slice(escape);
    patched.extend_from_slice(&document[index + 1..]);
    Some(patched)
}

/// Transient state for one parse attempt.
pub(crate) struct ParseContext<'a> {
    pub(crate) tree: Option<Playlist>,
    pub(crate) current_entry: Option<NodeId>,
    kind_stack: Vec<ElementKind>,
    pub(crate) text: Option<String>,
    pub(crate) version: Option<u32>,
    sink: &'a mut dyn DiagnosticSink,
}

impl<'a> ParseContext<'a> {
    fn new(sink: &'a mut dyn DiagnosticSink) -> Self {
        Self {
            tree: None,
            current_entry: None,
            kind_stack: vec![ElementKind::Root],
            text: None,
            version: None,
            sink,
        }
    }

    fn start_element(
        &mut self,
        kind: PlaylistType,
        name: &str,
        attrs: &[(String, String)],
    ) -> PlaytreeResult<()> {
        match kind {
            PlaylistType::Asx3 => self.asx_start_element(name, attrs),
            PlaylistType::Smil => self.smil_start_element(name, attrs),
            _ => Ok(()),
        }
    }

    fn end_element(&mut self, kind: PlaylistType) {
        match kind {
            PlaylistType::Asx3 => self.asx_end_element(),
            PlaylistType::Smil => self.smil_end_element(),
            _ => {}
        }
    }

    fn append_text(&mut self, chunk: &str) {
        match &mut self.text {
            Some(text) => text.push_str(chunk),
            None => self.text = Some(chunk.to_string()),
        }
    }

    fn finish(self) -> Result<Playlist, RunError> {
        self.tree.ok_or_else(|| {
            RunError::Fatal(PlaytreeError::DocumentFormat(
                "document did not produce a playlist".to_string(),
            ))
        })
    }

    pub(crate) fn report(&mut self, category: DiagnosticCategory, code: u32, message: String) {
        tracing::warn!(code, "{message}");
        self.sink.report(Diagnostic::new(category, code, message));
    }

    pub(crate) fn push_kind(&mut self, kind: ElementKind) {
        self.kind_stack.push(kind);
    }

    pub(crate) fn pop_kind(&mut self) {
        self.kind_stack.pop();
    }

    pub(crate) fn current_kind(&self) -> ElementKind {
        *self.kind_stack.last().unwrap_or(&ElementKind::Root)
    }

    pub(crate) fn parent_kind(&self) -> Option<ElementKind> {
        let len = self.kind_stack.len();
        (len >= 2).then(|| self.kind_stack[len - 2])
    }

    pub(crate) fn depth(&self) -> usize {
        self.kind_stack.len()
    }

    /// Check the element under construction against its allowed parents.
    /// A mismatch is reported but does not abort the parse.
    pub(crate) fn assert_parent_kind(&mut self, mask: u32) -> bool {
        if self
            .parent_kind()
            .map_or(false, |parent| parent.in_mask(mask))
        {
            return true;
        }
        self.report(
            DiagnosticCategory::DocumentFormat,
            codes::PARSE,
            format!("{:?} element has a disallowed parent", self.current_kind()),
        );
        false
    }

    /// The node attribute-bearing elements apply to: the entry under
    /// construction, or failing that the root.
    pub(crate) fn current_content(&self) -> Option<NodeId> {
        self.current_entry
            .or_else(|| self.tree.as_ref().map(|tree| tree.root()))
    }

    pub(crate) fn invalid_element(&mut self, name: &str) {
        self.report(
            DiagnosticCategory::DocumentFormat,
            codes::INVALID_ELEMENT,
            format!("invalid element: {name}"),
        );
    }

    pub(crate) fn unsupported_element(&mut self, name: &str) {
        self.report(
            DiagnosticCategory::DocumentFormat,
            codes::UNSUPPORTED_ELEMENT,
            format!("unsupported element: {name}"),
        );
    }

    pub(crate) fn invalid_attribute(&mut self, key: &str) {
        self.report(
            DiagnosticCategory::DocumentFormat,
            codes::INVALID_ATTRIBUTE,
            format!("invalid attribute: {key}"),
        );
    }

    pub(crate) fn unsupported_attribute(&mut self, key: &str) {
        self.report(
            DiagnosticCategory::DocumentFormat,
            codes::UNSUPPORTED_ATTRIBUTE,
            format!("unsupported attribute: {key}"),
        );
    }

    pub(crate) fn grammar_diagnostic(&mut self, error: &PlaytreeError) {
        self.report(
            DiagnosticCategory::Grammar,
            codes::INVALID_ARGUMENT,
            error.to_string(),
        );
    }

    /// Parse a reference that must be absolute with an allowed scheme.
    /// Violations are policy failures, fatal to the parse.
    pub(crate) fn checked_source_reference(&mut self, text: &str) -> PlaytreeResult<Reference> {
        let allowed = Reference::parse(text, true).ok().filter(|reference| {
            reference
                .scheme()
                .map_or(false, |scheme| ALLOWED_SCHEMES.contains(&scheme))
        });
        match allowed {
            Some(reference) => Ok(reference),
            None => {
                let message = format!("disallowed reference: {text}");
                self.report(DiagnosticCategory::Policy, codes::UNKNOWN, message.clone());
                Err(PlaytreeError::Policy(message))
            }
        }
    }
}

pub(crate) fn is_all_whitespace(text: Option<&str>) -> bool {
    text.map_or(true, |text| {
        text.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Dur;
    use crate::error::Diagnostic;

    fn parser_for(bytes: &'static [u8]) -> PlaylistParser {
        PlaylistParser::new(Box::new(MemorySource::new(bytes)))
    }

    fn parse_tree(bytes: &'static [u8]) -> (Playlist, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let outcome = parser_for(bytes).parse(&mut diagnostics).unwrap();
        match outcome {
            ParseOutcome::Playlist(tree) => (tree, diagnostics),
            ParseOutcome::NotEnoughData => panic!("fully buffered source reported as not ready"),
        }
    }

    #[test]
    fn test_detect_is_mutually_exclusive_and_consumes_nothing() {
        let cases: [(&[u8], PlaylistType); 4] = [
            (b"[Reference]\r\nRef1=x", PlaylistType::Asx2),
            (b"<asx version=\"3.0\">", PlaylistType::Asx3),
            (b"<?WSX version=\"1.0\"?>", PlaylistType::Smil),
            (b"#EXTM3U\n", PlaylistType::Unknown),
        ];
        for (bytes, expected) in cases {
            let mut source = MemorySource::new(bytes);
            assert_eq!(detect(&mut source), expected);

            let mut everything = vec![0u8; bytes.len()];
            assert_eq!(source.read_some(&mut everything).unwrap(), bytes.len());
            assert_eq!(everything, bytes);
        }
    }

    #[test]
    fn test_detect_needs_enough_header() {
        let mut source = MemorySource::new(&b"<A"[..]);
        assert_eq!(detect(&mut source), PlaylistType::Unknown);
    }

    struct TricklingSource {
        inner: MemorySource,
        available: Option<u64>,
    }

    impl ByteSource for TricklingSource {
        fn peek(&mut self, buf: &mut [u8]) -> bool {
            self.inner.peek(buf)
        }
        fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read_some(buf)
        }
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
        fn size(&self) -> Option<u64> {
            self.inner.size()
        }
        fn last_available_position(&self) -> Option<u64> {
            self.available
        }
    }

    #[test]
    fn test_readiness_gate_waits_for_full_document() {
        let document = &b"<ASX VERSION=\"3.0\"></ASX>"[..];
        let source = TricklingSource {
            inner: MemorySource::new(document),
            available: Some(5),
        };
        let mut parser = PlaylistParser::new(Box::new(source));
        let mut diagnostics = Vec::new();
        assert!(matches!(
            parser.parse(&mut diagnostics).unwrap(),
            ParseOutcome::NotEnoughData
        ));

        let source = TricklingSource {
            inner: MemorySource::new(document),
            available: None,
        };
        let mut parser = PlaylistParser::new(Box::new(source));
        assert!(matches!(
            parser.parse(&mut diagnostics).unwrap(),
            ParseOutcome::NotEnoughData
        ));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let mut parser = parser_for(b"#EXTM3U\nnot a playlist we know");
        let mut diagnostics = Vec::new();
        assert!(matches!(
            parser.parse(&mut diagnostics),
            Err(PlaytreeError::UnknownFormat)
        ));
    }

    #[test]
    fn test_parse_asx_document() {
        let (tree, diagnostics) = parse_tree(
            b"<ASX VERSION=\"3.0\">\
                <TITLE>Best of</TITLE>\
                <ENTRY CLIENTSKIP=\"NO\">\
                  <REF HREF=\"http://h/one.wma\"/>\
                  <DURATION VALUE=\"0:30\"/>\
                </ENTRY>\
                <ENTRY>\
                  <REF HREF=\"http://h/two.wma\"/>\
                </ENTRY>\
              </ASX>",
        );
        assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");

        let root = tree.root();
        assert_eq!(tree.mode(root), Some(Mode::Sequential));
        assert_eq!(tree.data(root).title(), Some("Best of"));

        let children = tree.children(root).to_vec();
        assert_eq!(children.len(), 2);
        assert!(!tree.data(children[0]).client_skip());
        assert_eq!(
            tree.data(children[0]).source().unwrap().to_string(),
            "http://h/one.wma"
        );
        assert_eq!(tree.data(children[0]).duration(), Some(Dur::Millis(30_000)));
        assert!(tree.data(children[1]).client_skip());
    }

    #[test]
    fn test_parse_smil_document() {
        let (tree, diagnostics) = parse_tree(
            b"<?wsx version=\"1.0\"?>\
              <smil>\
                <seq repeatCount=\"2\">\
                  <media src=\"http://h/a.wmv\" dur=\"30s\"/>\
                  <media src=\"http://h/b.wmv\"/>\
                </seq>\
                <switch>\
                  <media src=\"http://h/hi.wmv\"/>\
                  <media src=\"http://h/lo.wmv\"/>\
                </switch>\
              </smil>",
        );
        assert!(diagnostics.is_empty(), "unexpected: {diagnostics:?}");

        let root = tree.root();
        assert_eq!(tree.mode(root), Some(Mode::Sequential));
        let children = tree.children(root).to_vec();
        assert_eq!(children.len(), 2);

        assert_eq!(tree.mode(children[0]), Some(Mode::Sequential));
        assert_eq!(tree.data(children[0]).repeat_count(), 2);
        let seq_children = tree.children(children[0]).to_vec();
        assert_eq!(seq_children.len(), 2);
        assert_eq!(
            tree.data(seq_children[0]).duration(),
            Some(Dur::Millis(30_000))
        );

        assert_eq!(tree.mode(children[1]), Some(Mode::Switch));
        assert_eq!(tree.children(children[1]).len(), 2);
    }

    #[test]
    fn test_reference_list_rewrites_to_mms() {
        let (tree, _) = parse_tree(
            b"[Reference]\r\nRef1=http://h/stream?MSWMExt=.asf\r\nRef2=http://backup/\r\n",
        );
        let entry = tree.children(tree.root())[0];
        assert_eq!(
            tree.data(entry).source().unwrap().to_string(),
            "mms://h/stream?MSWMExt=.asf"
        );
    }

    #[test]
    fn test_reference_list_requires_asf_reference() {
        let mut parser = parser_for(b"[Reference]\r\nRef1=http://h/stream\r\n");
        let mut diagnostics = Vec::new();
        assert!(matches!(
            parser.parse(&mut diagnostics),
            Err(PlaytreeError::DocumentFormat(_))
        ));
    }

    #[test]
    fn test_repairs_unescaped_ampersand_in_attribute() {
        let (tree, _) = parse_tree(
            b"<ASX VERSION=\"3.0\">\
                <ENTRY><REF HREF=\"http://h/a&b.wma\"/></ENTRY>\
              </ASX>",
        );
        let entry = tree.children(tree.root())[0];
        assert_eq!(
            tree.data(entry).source().unwrap().to_string(),
            "http://h/a&b.wma"
        );
    }

    #[test]
    fn test_repair_attempts_are_bounded() {
        // The backward scan keeps landing on the trailing entity's
        // ampersand, so every repair round leaves the bare one in place.
        let mut parser = PlaylistParser::with_options(
            Box::new(MemorySource::new(
                &b"<ASX VERSION=\"3.0\">\
                     <ENTRY><REF HREF=\"x&y&amp;z\"/></ENTRY>\
                   </ASX>"[..],
            )),
            ParserOptions {
                max_repair_attempts: 3,
            },
        );
        let mut diagnostics = Vec::new();
        assert!(matches!(
            parser.parse(&mut diagnostics),
            Err(PlaytreeError::XmlSyntax { .. })
        ));
        assert!(diagnostics.iter().any(|d| d.code == codes::SYNTAX));
    }

    #[test]
    fn test_repair_document_escapes_nearest_candidate() {
        let document = b"<a v=\"x&y\"/>";
        let offset = document.iter().position(|b| *b == b'&').unwrap() as u64;
        let patched = repair_document(document, offset).unwrap();
        assert_eq!(patched, b"<a v=\"x&amp;y\"/>");
    }

    #[test]
    fn test_key_value_lookup() {
        let text = "[Other]\nRef1=nope\n[Reference]\nRef1 = yes\n";
        assert_eq!(
            key_value_lookup(text, "Reference", "Ref1"),
            Some("yes".to_string())
        );
        assert_eq!(key_value_lookup(text, "Reference", "Ref2"), None);
    }
}
