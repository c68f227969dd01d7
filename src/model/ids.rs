use std::fmt;

/// Opaque identifier for an email within a folder (`SPEC_FULL.md` §3).
///
/// Totally ordered by the folder's native receive order — the wrapped `u64`
/// is whatever the adapter hands back (an IMAP UID, a row id, ...); the
/// monitor never interprets its magnitude beyond comparing it. Equality
/// holds across folders of the same account, per spec; ordering is only
/// meaningful when both ids come from the same folder, but `Ord` is total
/// so the ConversationSet's "oldest EmailId" tie-break (§4.2) is well
/// defined without extra bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmailId(pub u64);

impl EmailId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EmailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized RFC-822 Message-ID (`SPEC_FULL.md` §4.1).
///
/// Accepts `<id@host>` and bare `id@host` on construction; angle brackets
/// are stripped but case is preserved. Equality is byte-exact after
/// normalization.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(String);

impl MessageId {
    /// Normalize a raw Message-ID header value (with or without angle
    /// brackets, with or without surrounding whitespace) into a `MessageId`.
    /// Returns `None` for an empty/whitespace-only input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let stripped = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed);
        let stripped = stripped.trim();
        if stripped.is_empty() {
            None
        } else {
            Some(Self(stripped.to_string()))
        }
    }

    /// Parse a References/In-Reply-To header body, which may hold several
    /// whitespace-separated `<id@host>` tokens, into normalized MessageIds.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split_whitespace()
            .filter_map(Self::parse)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A singleton key derived from an EmailId, used by `ConversationSet::add_all`
    /// when an email has neither a Message-ID nor any references (§4.2 step 1).
    /// The namespace prefix can't collide with a real Message-ID, which must
    /// contain an `@`.
    pub fn synthetic(id: EmailId) -> Self {
        Self(format!("synthetic-email-id:{}", id.value()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

/// A hierarchical folder path (`SPEC_FULL.md` §3).
///
/// Stored as segments rather than a delimited string so `is_descendant_of`
/// doesn't need to know the adapter's delimiter character.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FolderPath(Vec<String>);

impl FolderPath {
    pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Split a delimited path such as `"[Gmail]/Trash"` on `delimiter`.
    pub fn from_delimited(path: &str, delimiter: char) -> Self {
        Self(path.split(delimiter).map(|s| s.to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True if `self` is `other` or nested under it.
    pub fn is_descendant_of(&self, other: &FolderPath) -> bool {
        self.0.len() >= other.0.len() && self.0[..other.0.len()] == other.0[..]
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_accepts_angle_bracket_and_bare_forms() {
        let bracketed = MessageId::parse("<abc@host.example>").unwrap();
        let bare = MessageId::parse("abc@host.example").unwrap();
        assert_eq!(bracketed, bare);
        assert_eq!(bracketed.as_str(), "abc@host.example");
    }

    #[test]
    fn message_id_preserves_case() {
        let mid = MessageId::parse("<AbC@Host.Example>").unwrap();
        assert_eq!(mid.as_str(), "AbC@Host.Example");
        assert_ne!(mid, MessageId::parse("abc@host.example").unwrap());
    }

    #[test]
    fn message_id_rejects_empty() {
        assert!(MessageId::parse("").is_none());
        assert!(MessageId::parse("   ").is_none());
        assert!(MessageId::parse("<>").is_none());
    }

    #[test]
    fn parse_list_splits_on_whitespace() {
        let ids = MessageId::parse_list("<a@b> <c@d>\n<e@f>");
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[1].as_str(), "c@d");
    }

    #[test]
    fn folder_path_descendant() {
        let trash = FolderPath::from_delimited("[Gmail]/Trash", '/');
        let sub = FolderPath::from_delimited("[Gmail]/Trash/Old", '/');
        assert!(sub.is_descendant_of(&trash));
        assert!(trash.is_descendant_of(&trash));
        assert!(!trash.is_descendant_of(&sub));
    }
}
