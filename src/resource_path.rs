use crate::errors::invalid_argument;
use crate::FirestoreResult;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Field name the server uses for the document key in orderings and cursors.
pub const FIRESTORE_DOCUMENT_ID_FIELD: &str = "__name__";

/// A slash-separated resource path, either qualified
/// (`projects/{p}/databases/{d}/documents/...`) or relative to the documents
/// root. Paths with an even, non-zero number of segments after the documents
/// root address documents; odd counts address collections.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub struct FirestoreResourcePath {
    segments: Vec<String>,
}

impl FirestoreResourcePath {
    pub fn parse<S>(path: S) -> FirestoreResult<Self>
    where
        S: AsRef<str>,
    {
        let segments: Vec<String> = path
            .as_ref()
            .split('/')
            .map(|s| s.to_string())
            .collect();

        for segment in &segments {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(invalid_argument(
                    "path",
                    format!("Invalid path segment {segment:?} in {:?}", path.as_ref()),
                ));
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segments after `projects/{p}/databases/{d}/documents`, or the whole
    /// path when it is relative.
    pub fn relative_segments(&self) -> &[String] {
        if self.is_qualified() {
            &self.segments[5..]
        } else {
            &self.segments
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.segments.len() >= 5
            && self.segments[0] == "projects"
            && self.segments[2] == "databases"
            && self.segments[4] == "documents"
    }

    pub fn is_document_path(&self) -> bool {
        let relative = self.relative_segments();
        !relative.is_empty() && relative.len() % 2 == 0
    }

    pub fn is_collection_path(&self) -> bool {
        self.relative_segments().len() % 2 == 1
    }

    /// The last path segment (document or collection id).
    pub fn id(&self) -> &str {
        self.segments
            .last()
            .map(|s| s.as_str())
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Option<FirestoreResourcePath> {
        if self.relative_segments().is_empty() {
            None
        } else {
            Some(Self {
                segments: self.segments[0..self.segments.len() - 1].to_vec(),
            })
        }
    }

    pub fn child<S>(&self, segment: S) -> FirestoreResult<FirestoreResourcePath>
    where
        S: AsRef<str>,
    {
        let segment = segment.as_ref();
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
            return Err(invalid_argument(
                "path",
                format!("Invalid path segment: {segment:?}"),
            ));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }
}

impl Display for FirestoreResourcePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

impl Ord for FirestoreResourcePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for FirestoreResourcePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A dot-separated field path. Parsing splits on dots; segments that
/// themselves contain dots or other special characters must be supplied as an
/// explicit segment list.
#[derive(Debug, Eq, PartialEq, Clone, Hash, PartialOrd, Ord)]
pub struct FirestoreFieldPath {
    segments: Vec<String>,
}

impl FirestoreFieldPath {
    /// The `__name__` sentinel addressing the document key.
    pub fn document_id() -> Self {
        Self {
            segments: vec![FIRESTORE_DOCUMENT_ID_FIELD.to_string()],
        }
    }

    pub fn parse<S>(path: S) -> FirestoreResult<Self>
    where
        S: AsRef<str>,
    {
        let segments: Vec<String> = path.as_ref().split('.').map(|s| s.to_string()).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid_argument(
                "field_path",
                format!("Invalid field path: {:?}", path.as_ref()),
            ));
        }
        Ok(Self { segments })
    }

    pub fn from_segments<I>(segments: I) -> FirestoreResult<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid_argument("field_path", "Empty field path segment"));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_document_id(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == FIRESTORE_DOCUMENT_ID_FIELD
    }

    /// The server-facing encoding: dot-joined with backtick quoting of any
    /// segment that is not a plain identifier.
    pub fn encoded(&self) -> String {
        self.segments
            .iter()
            .map(|s| escape_field_segment(s))
            .collect::<Vec<String>>()
            .join(".")
    }
}

impl Display for FirestoreFieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encoded())
    }
}

pub(crate) fn escape_field_segment(segment: &str) -> String {
    let plain = segment == FIRESTORE_DOCUMENT_ID_FIELD
        || (!segment.is_empty()
            && !segment.starts_with(|c: char| c.is_ascii_digit())
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if plain {
        segment.to_string()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_vs_collection_paths() {
        let doc =
            FirestoreResourcePath::parse("projects/p/databases/(default)/documents/cities/SF")
                .unwrap();
        assert!(doc.is_qualified());
        assert!(doc.is_document_path());
        assert!(!doc.is_collection_path());
        assert_eq!(doc.id(), "SF");

        let col = doc.parent().unwrap();
        assert!(col.is_collection_path());
        assert_eq!(col.id(), "cities");

        let relative = FirestoreResourcePath::parse("cities/SF/districts").unwrap();
        assert!(!relative.is_qualified());
        assert!(relative.is_collection_path());
    }

    #[test]
    fn test_invalid_segments_rejected() {
        assert!(FirestoreResourcePath::parse("cities//SF").is_err());
        assert!(FirestoreResourcePath::parse("cities/./SF").is_err());
        assert!(FirestoreResourcePath::parse("cities/../SF").is_err());
        let col = FirestoreResourcePath::parse("cities").unwrap();
        assert!(col.child("a/b").is_err());
    }

    #[test]
    fn test_path_ordering_is_segment_wise() {
        let a = FirestoreResourcePath::parse("cities/a/districts/x").unwrap();
        let b = FirestoreResourcePath::parse("cities/a!b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_field_path_parsing_and_escaping() {
        let dotted = FirestoreFieldPath::parse("address.city").unwrap();
        assert_eq!(dotted.segments(), &["address", "city"]);
        assert_eq!(dotted.encoded(), "address.city");

        let explicit = FirestoreFieldPath::from_segments(["we.ird", "ok"]).unwrap();
        assert_eq!(explicit.encoded(), "`we.ird`.ok");

        assert!(FirestoreFieldPath::parse("a..b").is_err());
        assert!(FirestoreFieldPath::document_id().is_document_id());
        assert_eq!(FirestoreFieldPath::document_id().encoded(), "__name__");
    }
}
