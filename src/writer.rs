//! Batched SQL output.
//!
//! Each destination table gets a [`TableWriter`] that buffers pre-rendered row
//! literals and writes them as one multi-row `INSERT` once the buffered bytes
//! pass a threshold. [`SqlOutput`] owns the three writers plus the sink and
//! frames everything in `BEGIN;` / `COMMIT;`.

use crate::config::ConvertOptions;
use crate::models::{PageRow, RevisionRow};
use crate::normalize::push_escaped;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::io::Write;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Text,
    Revision,
    Page,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::Text => "text",
            Table::Revision => "revision",
            Table::Page => "page",
        }
    }

    pub fn columns(self) -> &'static str {
        match self {
            Table::Text => "old_id, old_text, old_flags",
            Table::Revision => {
                "rev_id, rev_page, rev_text_id, rev_comment, rev_user, rev_user_text, \
                 rev_timestamp, rev_minor_edit, rev_deleted, rev_parent_id, rev_sha1, \
                 rev_content_model, rev_content_format"
            }
            Table::Page => {
                "page_id, page_namespace, page_title, page_is_redirect, page_random, \
                 page_touched, page_latest, page_len, page_restrictions"
            }
        }
    }
}

pub struct TableWriter {
    table: Table,
    threshold: usize,
    rows: String,
    count: usize,
    size: usize,
}

impl TableWriter {
    pub fn new(table: Table, threshold: usize) -> Self {
        Self {
            table,
            threshold,
            rows: String::new(),
            count: 0,
            size: 0,
        }
    }

    pub fn buffered_rows(&self) -> usize {
        self.count
    }

    /// Buffers one row literal. Returns the bytes written, which is non-zero
    /// only when this row pushed the buffer past the threshold.
    pub fn add<W: Write>(&mut self, row: &str, sink: &mut W) -> Result<usize> {
        if self.count > 0 {
            self.rows.push(',');
        }
        self.rows.push_str(row);
        self.count += 1;
        self.size += row.len();

        if self.size > self.threshold {
            return self.flush(sink);
        }
        Ok(0)
    }

    /// Writes whatever is still buffered. An empty buffer writes nothing.
    pub fn finish<W: Write>(&mut self, sink: &mut W) -> Result<usize> {
        if self.count == 0 {
            return Ok(0);
        }
        self.flush(sink)
    }

    fn flush<W: Write>(&mut self, sink: &mut W) -> Result<usize> {
        let head = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table.name(),
            self.table.columns()
        );
        sink.write_all(head.as_bytes())
            .and_then(|_| sink.write_all(self.rows.as_bytes()))
            .and_then(|_| sink.write_all(b";\n"))
            .with_context(|| format!("Failed to write {} batch", self.table.name()))?;

        let written = head.len() + self.rows.len() + 2;
        debug!(
            table = self.table.name(),
            rows = self.count,
            bytes = written,
            "Flushed batch"
        );

        self.rows.clear();
        self.count = 0;
        self.size = 0;
        Ok(written)
    }
}

fn push_int<I: itoa::Integer>(out: &mut String, n: I) {
    let mut buf = itoa::Buffer::new();
    out.push_str(buf.format(n));
}

fn push_flag(out: &mut String, flag: bool) {
    out.push(if flag { '1' } else { '0' });
}

fn push_nullable(out: &mut String, value: Option<&str>) {
    match value {
        Some(v) => push_escaped(out, v),
        None => out.push_str("NULL"),
    }
}

/// `(old_id,old_text,old_flags)`
pub fn text_row(rev: &RevisionRow) -> String {
    let mut out = String::with_capacity(rev.text.len() + 32);
    out.push('(');
    push_int(&mut out, rev.id);
    out.push(',');
    push_escaped(&mut out, &rev.text);
    out.push_str(",'utf-8')");
    out
}

pub fn revision_row(rev: &RevisionRow) -> String {
    let mut out = String::with_capacity(rev.comment.len() + rev.user_text.len() + 128);
    out.push('(');
    push_int(&mut out, rev.id);
    out.push(',');
    push_int(&mut out, rev.page_id);
    out.push(',');
    push_int(&mut out, rev.id);
    out.push(',');
    push_escaped(&mut out, &rev.comment);
    out.push(',');
    push_int(&mut out, rev.user);
    out.push(',');
    push_escaped(&mut out, &rev.user_text);
    out.push_str(",'");
    out.push_str(&rev.timestamp);
    out.push_str("',");
    push_flag(&mut out, rev.minor);
    out.push(',');
    push_flag(&mut out, rev.deleted);
    out.push(',');
    match rev.parent_id {
        Some(parent) => push_int(&mut out, parent),
        None => out.push_str("NULL"),
    }
    out.push(',');
    push_escaped(&mut out, &rev.sha1);
    out.push(',');
    push_nullable(&mut out, rev.model.as_deref());
    out.push(',');
    push_nullable(&mut out, rev.format.as_deref());
    out.push(')');
    out
}

pub fn page_row(page: &PageRow) -> String {
    let mut out = String::with_capacity(page.title.len() + page.restrictions.len() + 96);
    out.push('(');
    push_int(&mut out, page.id);
    out.push(',');
    push_int(&mut out, page.namespace);
    out.push(',');
    push_escaped(&mut out, &page.title);
    out.push(',');
    push_flag(&mut out, page.redirect);
    out.push(',');
    // writing into a String cannot fail
    let _ = write!(out, "{}", page.random);
    out.push_str(",'");
    out.push_str(&page.touched);
    out.push_str("',");
    push_int(&mut out, page.latest);
    out.push(',');
    push_int(&mut out, page.len);
    out.push(',');
    push_escaped(&mut out, &page.restrictions);
    out.push(')');
    out
}

/// Transaction framer around the three table writers.
pub struct SqlOutput<W: Write> {
    sink: W,
    text: TableWriter,
    revision: TableWriter,
    page: TableWriter,
    commit_every: Option<u64>,
    since_begin: u64,
    statements: u64,
    bytes: u64,
}

impl<W: Write> SqlOutput<W> {
    /// Writes the opening `BEGIN;`.
    pub fn begin(sink: W, options: &ConvertOptions) -> Result<Self> {
        let mut output = Self {
            sink,
            text: TableWriter::new(Table::Text, options.batch_bytes),
            revision: TableWriter::new(Table::Revision, options.batch_bytes),
            page: TableWriter::new(Table::Page, options.batch_bytes),
            commit_every: options.commit_every,
            since_begin: 0,
            statements: 0,
            bytes: 0,
        };
        output.write_line("BEGIN;\n")?;
        Ok(output)
    }

    pub fn push_revision(&mut self, rev: &RevisionRow) -> Result<()> {
        let written = self.text.add(&text_row(rev), &mut self.sink)?;
        self.record(written)?;
        let written = self.revision.add(&revision_row(rev), &mut self.sink)?;
        self.record(written)
    }

    pub fn push_page(&mut self, page: &PageRow) -> Result<()> {
        let written = self.page.add(&page_row(page), &mut self.sink)?;
        self.record(written)
    }

    /// Flushes remaining batches (page, text, revision) and writes `COMMIT;`.
    pub fn finish(&mut self) -> Result<()> {
        for written in [
            self.page.finish(&mut self.sink)?,
            self.text.finish(&mut self.sink)?,
            self.revision.finish(&mut self.sink)?,
        ] {
            self.count(written);
        }
        self.write_line("COMMIT;\n")?;
        self.sink.flush().context("Failed to flush SQL output")
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    /// INSERT statements written so far.
    pub fn statements(&self) -> u64 {
        self.statements
    }

    /// Total bytes written so far, framing included.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    fn count(&mut self, written: usize) {
        if written > 0 {
            self.statements += 1;
            self.bytes += written as u64;
            self.since_begin += written as u64;
        }
    }

    fn record(&mut self, written: usize) -> Result<()> {
        self.count(written);
        if let Some(limit) = self.commit_every {
            if written > 0 && self.since_begin > limit {
                debug!(bytes = self.since_begin, "Re-framing transaction");
                self.write_line("COMMIT;\nBEGIN;\n")?;
                self.since_begin = 0;
            }
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.sink
            .write_all(line.as_bytes())
            .context("Failed to write SQL output")?;
        self.bytes += line.len() as u64;
        Ok(())
    }
}
