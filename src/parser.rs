//! Streaming tag source over a MediaWiki XML export.
//!
//! Wraps a `quick_xml` reader and flattens the document into a lazy sequence of
//! [`TagEvent`]s carrying local tag names, nesting depth and the text directly
//! enclosed by each element. Only the element currently being read is held in
//! memory, so arbitrarily large dumps stream in bounded space.

use crate::config::READ_BUFFER_CAPACITY;
use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Local tag names the record builder cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Page,
    Revision,
    Contributor,
    Id,
    Ns,
    Title,
    Restrictions,
    Redirect,
    ParentId,
    Timestamp,
    Comment,
    Text,
    Sha1,
    Model,
    Format,
    Minor,
    Deleted,
    Username,
    Ip,
    Other(String),
}

impl Tag {
    pub fn from_local_name(name: &[u8]) -> Self {
        match name {
            b"page" => Tag::Page,
            b"revision" => Tag::Revision,
            b"contributor" => Tag::Contributor,
            b"id" => Tag::Id,
            b"ns" => Tag::Ns,
            b"title" => Tag::Title,
            b"restrictions" => Tag::Restrictions,
            b"redirect" => Tag::Redirect,
            b"parentid" => Tag::ParentId,
            b"timestamp" => Tag::Timestamp,
            b"comment" => Tag::Comment,
            b"text" => Tag::Text,
            b"sha1" => Tag::Sha1,
            b"model" => Tag::Model,
            b"format" => Tag::Format,
            b"minor" => Tag::Minor,
            b"deleted" => Tag::Deleted,
            b"username" => Tag::Username,
            b"ip" => Tag::Ip,
            other => Tag::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Tag::Page => "page",
            Tag::Revision => "revision",
            Tag::Contributor => "contributor",
            Tag::Id => "id",
            Tag::Ns => "ns",
            Tag::Title => "title",
            Tag::Restrictions => "restrictions",
            Tag::Redirect => "redirect",
            Tag::ParentId => "parentid",
            Tag::Timestamp => "timestamp",
            Tag::Comment => "comment",
            Tag::Text => "text",
            Tag::Sha1 => "sha1",
            Tag::Model => "model",
            Tag::Format => "format",
            Tag::Minor => "minor",
            Tag::Deleted => "deleted",
            Tag::Username => "username",
            Tag::Ip => "ip",
            Tag::Other(name) => name,
        }
    }
}

/// One step of the flattened document. `depth` is the element's own nesting
/// level (root = 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    Start { tag: Tag, depth: usize },
    /// `text` is the character data directly inside the element, unescaped.
    End { tag: Tag, depth: usize, text: String },
}

pub struct TagStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    text: String,
    depth: usize,
    namespace: Option<String>,
    root_seen: bool,
    finished: bool,
}

impl<R: BufRead> TagStream<R> {
    pub fn new(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        // <minor/> must surface as start+end so presence flags see it
        reader.expand_empty_elements(true);
        Self {
            reader,
            buf: Vec::with_capacity(8192),
            text: String::new(),
            depth: 0,
            namespace: None,
            root_seen: false,
            finished: false,
        }
    }

    /// Namespace URI declared on the root element, once it has been read.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Byte offset reached in the input.
    pub fn position(&self) -> usize {
        self.reader.buffer_position()
    }

    fn next_event(&mut self) -> Result<Option<TagEvent>> {
        loop {
            self.buf.clear();
            let position = self.reader.buffer_position();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .with_context(|| format!("Malformed XML near byte {}", position))?;

            match event {
                Event::Start(e) => {
                    self.depth += 1;
                    let tag = Tag::from_local_name(e.local_name().as_ref());

                    if !self.root_seen {
                        self.root_seen = true;
                        let key: Vec<u8> = match e.name().prefix() {
                            Some(prefix) => [b"xmlns:".as_slice(), prefix.as_ref()].concat(),
                            None => b"xmlns".to_vec(),
                        };
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == key.as_slice() {
                                self.namespace =
                                    Some(String::from_utf8_lossy(&attr.value).into_owned());
                            }
                        }
                        debug!(
                            root = tag.as_str(),
                            namespace = self.namespace.as_deref().unwrap_or(""),
                            "Root element read"
                        );
                    }

                    self.text.clear();
                    return Ok(Some(TagEvent::Start {
                        tag,
                        depth: self.depth,
                    }));
                }
                Event::End(e) => {
                    if self.depth == 0 {
                        bail!("Unbalanced end tag near byte {}", position);
                    }
                    let tag = Tag::from_local_name(e.local_name().as_ref());
                    let depth = self.depth;
                    self.depth -= 1;
                    let text = std::mem::take(&mut self.text);
                    return Ok(Some(TagEvent::End { tag, depth, text }));
                }
                Event::Text(e) => {
                    if self.depth > 0 {
                        let text = e
                            .unescape()
                            .with_context(|| format!("Bad character data near byte {}", position))?;
                        self.text.push_str(&text);
                    }
                }
                Event::CData(e) => {
                    if self.depth > 0 {
                        let bytes = e.into_inner();
                        let text = std::str::from_utf8(&bytes)
                            .with_context(|| format!("Non-UTF-8 CDATA near byte {}", position))?;
                        self.text.push_str(text);
                    }
                }
                Event::Eof => {
                    if !self.root_seen {
                        bail!("Input contains no root element");
                    }
                    if self.depth > 0 {
                        bail!(
                            "Unexpected end of input with {} element(s) still open",
                            self.depth
                        );
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for TagStream<R> {
    type Item = Result<TagEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn is_bz2(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|e| e == "bz2")
        .unwrap_or(false)
}

/// Opens a dump from disk, decompressing `.bz2` files (multistream included).
pub fn open_dump(path: &str) -> Result<TagStream<Box<dyn BufRead>>> {
    let file = File::open(path).with_context(|| format!("Failed to open dump at: {}", path))?;
    let compressed = is_bz2(path);

    let source: Box<dyn BufRead> = if compressed {
        Box::new(BufReader::with_capacity(
            READ_BUFFER_CAPACITY,
            MultiBzDecoder::new(file),
        ))
    } else {
        Box::new(BufReader::with_capacity(READ_BUFFER_CAPACITY, file))
    };

    info!(path = path, compressed = compressed, "Opened dump");
    Ok(TagStream::new(source))
}
