//! mwdump-sql: MediaWiki XML dump to SQL conversion
//!
//! This crate turns a MediaWiki XML export into SQL statements that populate the
//! `page`, `revision` and `text` tables of a pre-created MediaWiki schema. The whole
//! dump is converted in a single forward pass:
//!
//! 1. **Tag stream** -- Stream the XML (optionally BZ2-compressed) as start/end
//!    events with local tag names and element text
//! 2. **Record building** -- Keep one open accumulator per page, revision and
//!    contributor scope and route child field text to the innermost one
//! 3. **Normalization** -- Parse timestamps, strip namespace prefixes from titles,
//!    apply defaults and SQL escaping once per record
//! 4. **Batched output** -- Buffer row literals per table and flush multi-row
//!    `INSERT` statements once a byte threshold is crossed, inside `BEGIN;`/`COMMIT;`
//!
//! # Architecture
//!
//! - **Bounded memory** -- Revisions are written as soon as they close; only the
//!   current page header, the current revision and the per-table batches are held
//! - **Bounded statements** -- Batches flush past `BATCH_THRESHOLD_BYTES` (800 KiB)
//!   so no single `INSERT` grows with the dump
//! - **Fail fast** -- Malformed XML or unparsable timestamps abort the run before
//!   `COMMIT;` is written, so a loader rejects the partial output
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML tag source with BZ2 decompression
//! - [`convert`] -- Stack-scoped record builder driving the pass
//! - [`normalize`] -- Field normalization, defaulting and SQL escaping
//! - [`writer`] -- Per-table batched INSERT writers and transaction framing
//! - [`models`] -- Field accumulators, finished rows and the latest-revision tracker
//! - [`stats`] -- Counters for a conversion run
//! - [`config`] -- Constants and run-time options
//!
//! # Example Usage
//!
//! ```bash
//! # Convert a compressed dump into a SQL file
//! mwdump-sql enwiki-latest-pages-meta-history.xml.bz2 -o enwiki.sql
//!
//! # Pipe straight into MySQL, committing every ~512 MiB
//! mwdump-sql dump.xml --commit-every 536870912 | mysql wikidb
//! ```

pub mod config;
pub mod convert;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod stats;
pub mod writer;

pub use config::ConvertOptions;
pub use convert::{convert, Converter};
pub use stats::ConversionStats;
