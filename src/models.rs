use crate::parser::Tag;

/// Raw field text collected for an open `<page>`.
#[derive(Debug, Default, Clone)]
pub struct PageFields {
    pub id: Option<String>,
    pub ns: Option<String>,
    pub title: Option<String>,
    pub restrictions: Option<String>,
    pub redirect: bool,
}

impl PageFields {
    /// Presence-only tags; text is irrelevant.
    pub fn mark(&mut self, tag: &Tag) -> bool {
        match tag {
            Tag::Redirect => {
                self.redirect = true;
                true
            }
            _ => false,
        }
    }

    /// Stores text for a recognized child tag. Returns false for tags outside
    /// the page's allow-list.
    pub fn assign(&mut self, tag: &Tag, text: String) -> bool {
        let slot = match tag {
            Tag::Id => &mut self.id,
            Tag::Ns => &mut self.ns,
            Tag::Title => &mut self.title,
            Tag::Restrictions => &mut self.restrictions,
            Tag::Redirect => return true,
            _ => return false,
        };
        *slot = Some(text);
        true
    }
}

/// Raw field text collected for an open `<revision>`, contributor flattened in.
#[derive(Debug, Default, Clone)]
pub struct RevisionFields {
    pub id: Option<String>,
    pub parent_id: Option<String>,
    pub timestamp: Option<String>,
    pub comment: Option<String>,
    pub text: Option<String>,
    pub sha1: Option<String>,
    pub model: Option<String>,
    pub format: Option<String>,
    pub minor: bool,
    pub deleted: bool,
    pub user: Option<String>,
    pub user_text: Option<String>,
}

impl RevisionFields {
    pub fn mark(&mut self, tag: &Tag) -> bool {
        match tag {
            Tag::Minor => self.minor = true,
            Tag::Deleted => self.deleted = true,
            _ => return false,
        }
        true
    }

    pub fn assign(&mut self, tag: &Tag, text: String) -> bool {
        let slot = match tag {
            Tag::Id => &mut self.id,
            Tag::ParentId => &mut self.parent_id,
            Tag::Timestamp => &mut self.timestamp,
            Tag::Comment => &mut self.comment,
            Tag::Text => &mut self.text,
            Tag::Sha1 => &mut self.sha1,
            Tag::Model => &mut self.model,
            Tag::Format => &mut self.format,
            Tag::Minor | Tag::Deleted => return true,
            _ => return false,
        };
        *slot = Some(text);
        true
    }

    pub fn merge_contributor(&mut self, contributor: ContributorFields) {
        self.user = Some(contributor.id);
        self.user_text = Some(contributor.user_text);
    }
}

/// An open `<contributor>`. Seeded so an empty or deleted block still yields
/// user 0 with empty display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributorFields {
    pub id: String,
    pub user_text: String,
}

impl Default for ContributorFields {
    fn default() -> Self {
        Self {
            id: "0".to_string(),
            user_text: String::new(),
        }
    }
}

impl ContributorFields {
    pub fn assign(&mut self, tag: &Tag, text: String) -> bool {
        match tag {
            Tag::Id => self.id = text,
            Tag::Username | Tag::Ip => self.user_text = text,
            _ => return false,
        }
        true
    }
}

/// A finished revision with every field normalized. Free text is kept raw and
/// escaped once when the row literal is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionRow {
    pub id: u64,
    pub page_id: u64,
    pub parent_id: Option<u64>,
    /// `YYYYMMDDHHMMSS`
    pub timestamp: String,
    pub comment: String,
    pub text: String,
    pub user: u64,
    pub user_text: String,
    pub minor: bool,
    pub deleted: bool,
    pub sha1: String,
    pub model: Option<String>,
    pub format: Option<String>,
}

/// A finished page with derived fields filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    pub id: u64,
    pub namespace: i32,
    /// Underscored, namespace prefix removed, not yet escaped.
    pub title: String,
    pub redirect: bool,
    pub random: f64,
    pub touched: String,
    pub latest: u64,
    pub len: usize,
    pub restrictions: String,
}

/// Latest-revision tracker: greatest normalized timestamp wins, ties keep the
/// first revision seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestRevision {
    pub id: u64,
    pub timestamp: String,
    pub len: usize,
}

impl LatestRevision {
    pub fn observe(current: &mut Option<LatestRevision>, rev: &RevisionRow) {
        let newer = match current {
            Some(latest) => rev.timestamp > latest.timestamp,
            None => true,
        };
        if newer {
            *current = Some(LatestRevision {
                id: rev.id,
                timestamp: rev.timestamp.clone(),
                len: rev.text.chars().count(),
            });
        }
    }
}
