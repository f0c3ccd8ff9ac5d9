use crate::models::{LatestRevision, PageFields, PageRow, RevisionFields, RevisionRow};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use std::fmt::Display;
use std::str::FromStr;
use tracing::warn;

/// Fixed-width sortable timestamp layout used by MediaWiki's schema.
pub const COMPACT_TIMESTAMP: &str = "%Y%m%d%H%M%S";

/// Naive layouts tried after RFC 3339 / RFC 2822. `%.f` also matches no fraction.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y%m%d%H%M%S",
];

/// Title prefixes that duplicate the page's numeric namespace and get dropped.
static NAMESPACE_PREFIXES: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "Talk",
        "User",
        "User_talk",
        "Wikipedia",
        "Wikipedia_talk",
        "File",
        "File_talk",
        "MediaWiki",
        "MediaWiki_talk",
        "Template",
        "Template_talk",
        "Help",
        "Help_talk",
        "Category",
        "Category_talk",
        "Portal",
        "Portal_talk",
        "Book",
        "Book_talk",
        "Education_Program",
        "Education_Program_talk",
        "TimedText",
        "TimedText_talk",
        "Module",
        "Module_talk",
    ]
    .into_iter()
    .collect()
});

/// Appends `raw` as a single-quoted MySQL string literal.
pub fn push_escaped(out: &mut String, raw: &str) {
    out.reserve(raw.len() + 2);
    out.push('\'');
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

pub fn escape_sql(raw: &str) -> String {
    let mut out = String::new();
    push_escaped(&mut out, raw);
    out
}

/// Spaces become underscores; a recognized namespace prefix and its colon are
/// removed.
pub fn normalize_title(raw: &str) -> String {
    let title = raw.replace(' ', "_");
    match title.split_once(':') {
        Some((prefix, rest)) if NAMESPACE_PREFIXES.contains(prefix) => rest.to_string(),
        _ => title,
    }
}

/// Reformats a free-form date-time as `YYYYMMDDHHMMSS` in UTC.
pub fn normalize_timestamp(raw: &str) -> Result<String> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(compact(dt.with_timezone(&Utc).naive_utc()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Ok(compact(dt.with_timezone(&Utc).naive_utc()));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(compact(naive));
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(compact(midnight));
    }

    bail!("Unparsable timestamp: {:?}", raw)
}

fn compact(naive: NaiveDateTime) -> String {
    naive.format(COMPACT_TIMESTAMP).to_string()
}

fn required<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str> {
    match value {
        Some(v) => Ok(v.as_str()),
        None => bail!("Missing {}", what),
    }
}

fn parse_number<T>(raw: &str, what: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Invalid {}: {:?}", what, raw))
}

fn parse_optional<T>(value: Option<String>, what: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.map(|v| parse_number(&v, what)).transpose()
}

/// Source of the two per-page values that are not derived from the dump.
pub struct PageStamps {
    rng: StdRng,
    frozen: Option<DateTime<Utc>>,
}

impl PageStamps {
    /// Entropy-seeded randomness and the wall clock.
    pub fn system() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            frozen: None,
        }
    }

    /// Reproducible stamps: seeded randomness and a frozen clock.
    pub fn fixed(seed: u64, at: DateTime<Utc>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            frozen: Some(at),
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    pub fn touched(&self) -> String {
        self.frozen
            .unwrap_or_else(Utc::now)
            .format(COMPACT_TIMESTAMP)
            .to_string()
    }
}

impl Default for PageStamps {
    fn default() -> Self {
        Self::system()
    }
}

/// Applies defaulting and parsing to a closed revision.
pub fn finish_revision(fields: RevisionFields, page_id: u64) -> Result<RevisionRow> {
    let id: u64 = parse_number(required(&fields.id, "revision id")?, "revision id")?;

    let timestamp = normalize_timestamp(required(&fields.timestamp, "timestamp")?)
        .with_context(|| format!("Revision {} of page {}", id, page_id))?;
    let parent_id = parse_optional(fields.parent_id, "parent id")
        .with_context(|| format!("Revision {}", id))?;
    let user = parse_optional(fields.user, "contributor id")
        .with_context(|| format!("Revision {}", id))?
        .unwrap_or(0);

    Ok(RevisionRow {
        id,
        page_id,
        parent_id,
        timestamp,
        comment: fields.comment.unwrap_or_default(),
        text: fields.text.unwrap_or_default(),
        user,
        user_text: fields.user_text.unwrap_or_default(),
        minor: fields.minor,
        deleted: fields.deleted,
        sha1: fields.sha1.unwrap_or_default(),
        model: fields.model,
        format: fields.format,
    })
}

/// Resolves the page id early so revisions can be attributed before the page closes.
pub fn page_id(fields: &PageFields) -> Result<Option<u64>> {
    fields
        .id
        .as_deref()
        .map(|raw| parse_number(raw, "page id"))
        .transpose()
}

/// Computes derived fields for a closed page.
pub fn finish_page(
    fields: PageFields,
    latest: Option<LatestRevision>,
    stamps: &mut PageStamps,
) -> Result<PageRow> {
    let id: u64 = parse_number(required(&fields.id, "page id")?, "page id")?;
    let namespace: i32 = parse_number(required(&fields.ns, "namespace")?, "namespace")
        .with_context(|| format!("Page {}", id))?;
    let title = normalize_title(
        required(&fields.title, "title").with_context(|| format!("Page {}", id))?,
    );

    let (latest, len) = match latest {
        Some(rev) => (rev.id, rev.len),
        None => {
            warn!(page_id = id, "Page has no revisions");
            (0, 0)
        }
    };

    Ok(PageRow {
        id,
        namespace,
        title,
        redirect: fields.redirect,
        random: stamps.random(),
        touched: stamps.touched(),
        latest,
        len,
        restrictions: fields.restrictions.unwrap_or_default(),
    })
}

/// Context attached to errors that name a record.
pub fn describe<T: Display>(kind: &str, id: Option<T>) -> String {
    match id {
        Some(id) => format!("{} {}", kind, id),
        None => format!("{} without id", kind),
    }
}
