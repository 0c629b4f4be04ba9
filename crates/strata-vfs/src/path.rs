//! Backend-independent hierarchical paths.
//!
//! A [`VfsPath`] is a sequence of non-empty segments plus the separator it was
//! parsed with. It never touches a backend: every operation is pure segment
//! algebra, so the same path behaves identically on local disk, SFTP or an
//! in-memory store. Paths are always rooted at the filesystem root; whether a
//! path is *rendered* with a leading separator is a presentation choice.

use std::fmt;
use std::str::FromStr;

use crate::error::{VfsError, VfsResult};

/// Separator used when none is given.
pub const DEFAULT_SEPARATOR: char = '/';

const CURRENT_DIR: &str = ".";
const PARENT_DIR: &str = "..";

/// Immutable hierarchical location.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VfsPath {
    separator: char,
    segments: Vec<String>,
}

impl VfsPath {
    /// The empty path (the root) with the default separator.
    pub fn root() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR, "")
    }

    /// Parse `path` using `/` as separator.
    pub fn new(path: &str) -> Self {
        Self::with_separator(DEFAULT_SEPARATOR, path)
    }

    /// Parse `path`, splitting on `separator` and dropping empty segments.
    pub fn with_separator(separator: char, path: &str) -> Self {
        let segments = path
            .split(separator)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
        Self {
            separator,
            segments,
        }
    }

    /// Build a path from already-split segments.
    ///
    /// Each segment is split again on `separator`, so the segment invariant
    /// holds no matter what the caller passes in.
    pub fn from_segments<I, S>(separator: char, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = segments
            .into_iter()
            .flat_map(|s| {
                s.as_ref()
                    .split(separator)
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            separator,
            segments,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path minus its last segment; `None` for the empty path.
    pub fn parent(&self) -> Option<VfsPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.prefix(self.segments.len() - 1))
    }

    /// True if the file name starts with a dot.
    pub fn is_hidden(&self) -> bool {
        self.file_name().is_some_and(|n| n.starts_with('.'))
    }

    /// True if the last segment is a synthetic `.` or `..` entry.
    pub fn is_dot_entry(&self) -> bool {
        matches!(self.file_name(), Some(CURRENT_DIR) | Some(PARENT_DIR))
    }

    /// Segments `[begin, end)` as a new path.
    pub fn subpath(&self, begin: usize, end: usize) -> VfsResult<VfsPath> {
        if begin >= end || end > self.segments.len() {
            return Err(VfsError::invalid_path(format!(
                "subpath {begin}..{end} out of range for {self}"
            )));
        }
        Ok(Self {
            separator: self.separator,
            segments: self.segments[begin..end].to_vec(),
        })
    }

    /// Append `other`'s segments to this path. The empty path is an identity.
    ///
    /// A different separator on `other` is irrelevant to its meaning, so its
    /// segments are split again on this path's separator.
    pub fn resolve(&self, other: &VfsPath) -> VfsPath {
        if other.is_empty() {
            return self.clone();
        }
        let other = self.adopt(other);
        if self.is_empty() {
            return other;
        }
        let mut segments = self.segments.clone();
        segments.extend(other.segments);
        Self {
            separator: self.separator,
            segments,
        }
    }

    /// Parse `other` with this path's separator and resolve it.
    pub fn resolve_str(&self, other: &str) -> VfsPath {
        self.resolve(&Self::with_separator(self.separator, other))
    }

    /// The suffix of `other` below this path.
    ///
    /// Both paths are normalized first; fails with `InvalidPath` unless this
    /// path is a segment-wise prefix of `other`.
    pub fn relativize(&self, other: &VfsPath) -> VfsResult<VfsPath> {
        let base = self.normalize();
        let target = self.adopt(other).normalize();
        if !target.starts_with(&base) {
            return Err(VfsError::invalid_path(format!(
                "{other} is not below {self}"
            )));
        }
        Ok(Self {
            separator: self.separator,
            segments: target.segments[base.segments.len()..].to_vec(),
        })
    }

    /// Remove `.` segments and collapse `name/..` pairs.
    ///
    /// A `..` with nothing collapsible before it is kept, since a relative
    /// path has no root to resolve it against.
    pub fn normalize(&self) -> VfsPath {
        let mut out: Vec<String> = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment.as_str() {
                CURRENT_DIR => {}
                PARENT_DIR => match out.last().map(String::as_str) {
                    Some(last) if last != PARENT_DIR => {
                        out.pop();
                    }
                    _ => out.push(segment.clone()),
                },
                _ => out.push(segment.clone()),
            }
        }
        Self {
            separator: self.separator,
            segments: out,
        }
    }

    /// Segment-wise prefix test.
    pub fn starts_with(&self, other: &VfsPath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments[..other.segments.len()] == other.segments[..]
    }

    /// Segment-wise suffix test.
    pub fn ends_with(&self, other: &VfsPath) -> bool {
        let n = other.segments.len();
        self.segments.len() >= n && self.segments[self.segments.len() - n..] == other.segments[..]
    }

    /// Successive prefixes of increasing length, ending with the path itself.
    pub fn prefixes(&self) -> Prefixes<'_> {
        Prefixes {
            path: self,
            next: 1,
        }
    }

    /// Rendering without a leading separator.
    pub fn to_relative_string(&self) -> String {
        self.segments.join(&self.separator.to_string())
    }

    /// Rendering with a leading separator; the empty path renders as the
    /// separator alone.
    pub fn to_absolute_string(&self) -> String {
        let mut out = String::with_capacity(self.segments.iter().map(|s| s.len() + 1).sum());
        if self.segments.is_empty() {
            out.push(self.separator);
        }
        for segment in &self.segments {
            out.push(self.separator);
            out.push_str(segment);
        }
        out
    }

    /// `other` expressed with this path's separator.
    fn adopt(&self, other: &VfsPath) -> VfsPath {
        if other.separator == self.separator {
            other.clone()
        } else {
            Self::from_segments(self.separator, &other.segments)
        }
    }

    fn prefix(&self, len: usize) -> VfsPath {
        Self {
            separator: self.separator,
            segments: self.segments[..len].to_vec(),
        }
    }
}

impl Default for VfsPath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_absolute_string())
    }
}

impl fmt::Debug for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VfsPath({:?})", self.to_absolute_string())
    }
}

impl FromStr for VfsPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for VfsPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Iterator over the prefixes of a path.
pub struct Prefixes<'a> {
    path: &'a VfsPath,
    next: usize,
}

impl Iterator for Prefixes<'_> {
    type Item = VfsPath;

    fn next(&mut self) -> Option<VfsPath> {
        if self.next > self.path.len() {
            return None;
        }
        let item = self.path.prefix(self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.path.len() + 1).saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Prefixes<'_> {}

impl<'a> IntoIterator for &'a VfsPath {
    type Item = VfsPath;
    type IntoIter = Prefixes<'a>;

    fn into_iter(self) -> Prefixes<'a> {
        self.prefixes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_drops_empty_segments() {
        let p = VfsPath::new("//a///b/c/");
        assert_eq!(p.segments(), ["a", "b", "c"]);
        assert_eq!(p.to_absolute_string(), "/a/b/c");
        assert_eq!(p.to_relative_string(), "a/b/c");
        assert_eq!(VfsPath::root().to_absolute_string(), "/");
    }

    #[test]
    fn test_separator_participates_in_equality() {
        let slash = VfsPath::new("a/b");
        let backslash = VfsPath::with_separator('\\', "a\\b");
        assert_eq!(slash.segments(), backslash.segments());
        assert_ne!(slash, backslash);
    }

    #[test]
    fn test_from_segments_resplits() {
        let p = VfsPath::from_segments('/', ["a/b", "", "c"]);
        assert_eq!(p, VfsPath::new("/a/b/c"));
    }

    #[test]
    fn test_parent_and_file_name() {
        let p = VfsPath::new("/a/b/c.txt");
        assert_eq!(p.file_name(), Some("c.txt"));
        assert_eq!(p.parent(), Some(VfsPath::new("/a/b")));
        assert_eq!(VfsPath::new("/a").parent(), Some(VfsPath::root()));
        assert_eq!(VfsPath::root().parent(), None);
    }

    #[test]
    fn test_resolve() {
        let a = VfsPath::new("/a/b");
        assert_eq!(a.resolve(&VfsPath::new("c/d")), VfsPath::new("/a/b/c/d"));
        assert_eq!(a.resolve(&VfsPath::root()), a);
        assert_eq!(VfsPath::root().resolve(&a), a);
        assert_eq!(a.resolve_str("x"), VfsPath::new("/a/b/x"));
    }

    #[test]
    fn test_resolve_resplits_foreign_separator() {
        let windows = VfsPath::with_separator('\\', "a/b\\c");
        assert_eq!(windows.segments(), ["a/b", "c"]);

        let joined = VfsPath::new("/x").resolve(&windows);
        assert_eq!(joined.segments(), ["x", "a", "b", "c"]);
        assert_eq!(joined, VfsPath::new("/x/a/b/c"));
        assert_eq!(VfsPath::root().resolve(&windows), VfsPath::new("a/b/c"));

        let rel = VfsPath::new("/a").relativize(&windows).unwrap();
        assert_eq!(rel, VfsPath::new("b/c"));
    }

    #[test]
    fn test_relativize() {
        let base = VfsPath::new("/a/b");
        let rel = base.relativize(&VfsPath::new("/a/b/c/d")).unwrap();
        assert_eq!(rel, VfsPath::new("c/d"));

        let same = base.relativize(&base).unwrap();
        assert!(same.is_empty());

        let err = base.relativize(&VfsPath::new("/a/x")).unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));
    }

    #[test]
    fn test_relativize_normalizes_both_sides() {
        let base = VfsPath::new("/a/./b");
        let rel = base.relativize(&VfsPath::new("/a/x/../b/c")).unwrap();
        assert_eq!(rel, VfsPath::new("c"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(VfsPath::new("a/./b/../c").normalize(), VfsPath::new("a/c"));
        assert_eq!(VfsPath::new("a/b/../../c").normalize(), VfsPath::new("c"));
        assert_eq!(VfsPath::new("../../a").normalize(), VfsPath::new("../../a"));
        assert_eq!(VfsPath::new("a/../../b").normalize(), VfsPath::new("../b"));
        assert_eq!(VfsPath::new("./.").normalize(), VfsPath::root());
    }

    #[test]
    fn test_starts_and_ends_with_are_segment_wise() {
        let p = VfsPath::new("/foo/bar/baz");
        assert!(p.starts_with(&VfsPath::new("/foo")));
        assert!(!p.starts_with(&VfsPath::new("/fo")));
        assert!(p.ends_with(&VfsPath::new("bar/baz")));
        assert!(!p.ends_with(&VfsPath::new("az")));
        assert!(p.starts_with(&VfsPath::root()));
    }

    #[test]
    fn test_subpath() {
        let p = VfsPath::new("/a/b/c/d");
        assert_eq!(p.subpath(1, 3).unwrap(), VfsPath::new("b/c"));
        assert!(p.subpath(2, 2).is_err());
        assert!(p.subpath(0, 5).is_err());
    }

    #[test]
    fn test_prefixes() {
        let p = VfsPath::new("/a/b/c");
        let prefixes: Vec<String> = p.prefixes().map(|x| x.to_absolute_string()).collect();
        assert_eq!(prefixes, ["/a", "/a/b", "/a/b/c"]);
        assert_eq!((&p).into_iter().len(), 3);
        assert_eq!(VfsPath::root().prefixes().count(), 0);
    }

    #[test]
    fn test_hidden_and_dot_entries() {
        assert!(VfsPath::new("/x/.profile").is_hidden());
        assert!(!VfsPath::new("/x/profile").is_hidden());
        assert!(VfsPath::new("/x/..").is_dot_entry());
        assert!(VfsPath::new("/x/.").is_dot_entry());
        assert!(!VfsPath::new("/x/...").is_dot_entry());
    }

    fn arb_path() -> impl Strategy<Value = VfsPath> {
        prop::collection::vec(
            prop_oneof![
                Just(".".to_string()),
                Just("..".to_string()),
                "[a-c]{1,3}",
            ],
            0..8,
        )
        .prop_map(|segments| VfsPath::from_segments('/', segments))
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(p in arb_path()) {
            let once = p.normalize();
            prop_assert_eq!(once.normalize(), once);
        }

        #[test]
        fn prop_resolve_relativize_round_trip(
            a in arb_path(),
            b in prop::collection::vec("[a-c]{1,3}", 0..6),
        ) {
            let a = a.normalize();
            prop_assume!(!a.is_empty());
            let b = VfsPath::from_segments('/', b);
            let joined = a.resolve(&b);
            let rel = a.relativize(&joined).unwrap();
            prop_assert_eq!(a.resolve(&rel), joined);
        }

        #[test]
        fn prop_relativize_never_escapes_base(a in arb_path(), b in arb_path()) {
            let a = a.normalize();
            prop_assume!(!a.is_empty());
            let joined = a.resolve(&b);
            if let Ok(rel) = a.relativize(&joined) {
                prop_assert_eq!(a.resolve(&rel).normalize(), joined.normalize());
            }
        }
    }
}
