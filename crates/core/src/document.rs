use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    JavaScript,
    TypeScript,
    Python,
    Php,
    Unknown,
}

impl Language {
    pub fn from_uri(uri: &Url) -> Self {
        let path = uri.path();
        let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        match ext {
            "java" => Language::Java,
            "js" | "jsx" | "mjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "py" => Language::Python,
            "php" => Language::Php,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Php => "php",
            Language::Unknown => "unknown",
        }
    }
}

/// Lightweight container for document state
pub struct Document {
    pub uri: Url,
    pub text: String,
    pub language: Language,
    pub version: i32,
}

impl Document {
    pub fn new(uri: Url, text: String, version: i32) -> Self {
        let language = Language::from_uri(&uri);
        Self {
            uri,
            text,
            language,
            version,
        }
    }
}

/// Registry of documents currently open in the editor.
///
/// The scheduler snapshots target documents from here at submission time,
/// which is what keeps superseded versions from ever reaching the backend.
#[derive(Default)]
pub struct OpenDocuments {
    inner: DashMap<Url, Arc<Document>>,
}

impl OpenDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, document: Document) -> Arc<Document> {
        let doc = Arc::new(document);
        self.inner.insert(doc.uri.clone(), doc.clone());
        doc
    }

    /// Full-sync update: replaces the text wholesale and bumps the version.
    /// Updates for an unknown or older version are ignored.
    pub fn update(&self, uri: &Url, text: String, version: i32) -> Option<Arc<Document>> {
        let mut entry = self.inner.get_mut(uri)?;
        if version < entry.version {
            return None;
        }
        let doc = Arc::new(Document::new(uri.clone(), text, version));
        *entry.value_mut() = doc.clone();
        Some(doc)
    }

    pub fn close(&self, uri: &Url) -> Option<Arc<Document>> {
        self.inner.remove(uri).map(|(_, doc)| doc)
    }

    pub fn get(&self, uri: &Url) -> Option<Arc<Document>> {
        self.inner.get(uri).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.inner.contains_key(uri)
    }

    pub fn matching<P>(&self, predicate: P) -> Vec<Arc<Document>>
    where
        P: Fn(&Document) -> bool,
    {
        self.inner
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}
