use crate::{FirestoreResourcePath, FirestoreResult};
use std::fmt::{Display, Formatter};

/// Fully qualified parent path for documents in sub-collections, extended one
/// collection/document pair at a time. Every segment goes through the
/// resource path rules, and the running path must stay a document path so it
/// can parent another collection.
#[derive(Debug, Clone)]
pub struct ParentPathBuilder {
    value: String,
}

impl ParentPathBuilder {
    pub(crate) fn for_document_at<S>(
        documents_root: &str,
        collection_name: &str,
        document_id: S,
    ) -> FirestoreResult<Self>
    where
        S: AsRef<str>,
    {
        let path = FirestoreResourcePath::parse(documents_root)?
            .child(collection_name)?
            .child(document_id.as_ref())?;
        Ok(Self {
            value: path.to_string(),
        })
    }

    #[inline]
    pub fn at<S>(self, parent_collection_name: &str, parent_document_id: S) -> FirestoreResult<Self>
    where
        S: AsRef<str>,
    {
        Self::for_document_at(
            self.value.as_str(),
            parent_collection_name,
            parent_document_id,
        )
    }
}

impl Display for ParentPathBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

impl AsRef<str> for ParentPathBuilder {
    fn as_ref(&self) -> &str {
        self.value.as_str()
    }
}

impl From<ParentPathBuilder> for String {
    fn from(pb: ParentPathBuilder) -> Self {
        pb.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENTS_ROOT: &str = "projects/p/databases/(default)/documents";

    #[test]
    fn test_nested_parent_paths() {
        let parent = ParentPathBuilder::for_document_at(DOCUMENTS_ROOT, "cities", "SF")
            .unwrap()
            .at("districts", "mission")
            .unwrap();

        assert_eq!(
            parent.as_ref(),
            format!("{DOCUMENTS_ROOT}/cities/SF/districts/mission")
        );
    }

    #[test]
    fn test_invalid_segments_rejected() {
        assert!(ParentPathBuilder::for_document_at(DOCUMENTS_ROOT, "cities", "a/b").is_err());
        assert!(ParentPathBuilder::for_document_at(DOCUMENTS_ROOT, "cities", "..").is_err());
        assert!(ParentPathBuilder::for_document_at(DOCUMENTS_ROOT, "cities", "").is_err());
    }
}
