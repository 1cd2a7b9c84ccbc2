use unicode_normalization::UnicodeNormalization;

/// Asset key derived from a file name, plus whether the edited marker was present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedName {
    pub key: String,
    pub edited: bool,
}

/// Key normalization rule for one file set.
///
/// The extension vocabulary comes from the file set itself: every extension seen
/// on any file in the set is stripped from every name, so `IMG_1.jpg`,
/// `IMG_1-edited.jpg` and `IMG_1.jpg.json` all map to `IMG_1`.
#[derive(Debug, Clone)]
pub struct KeyRule {
    extensions: Vec<String>,
    edited_suffix: String,
}

/// Substring after the last dot of a file name. Empty extensions are ignored.
pub fn extension_of(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

impl KeyRule {
    /// Build the rule from the names of every file in the set.
    pub fn from_file_names<'a, I>(file_names: I, edited_suffix: &str) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut extensions: Vec<String> = Vec::new();
        for name in file_names {
            let name: String = name.nfc().collect();
            if let Some(ext) = extension_of(&name) {
                if !extensions.iter().any(|e| e == ext) {
                    extensions.push(ext.to_string());
                }
            }
        }
        Self {
            extensions,
            edited_suffix: edited_suffix.nfc().collect(),
        }
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Strip every known extension and the edited marker until nothing changes.
    ///
    /// Iterating to a fixed point keeps the rule idempotent for names such as
    /// `a.jpg.jpg` or doubled edited markers.
    pub fn normalize(&self, file_name: &str) -> NormalizedName {
        let mut key: String = file_name.nfc().collect();
        let mut edited = false;

        loop {
            let before = key.clone();

            for ext in &self.extensions {
                let dotted = format!(".{}", ext);
                if let Some(pos) = key.find(&dotted) {
                    key.replace_range(pos..pos + dotted.len(), "");
                }
            }

            if !self.edited_suffix.is_empty() {
                if let Some(pos) = key.find(&self.edited_suffix) {
                    key.replace_range(pos..pos + self.edited_suffix.len(), "");
                    edited = true;
                }
            }

            key = key.nfc().collect();
            if key == before {
                break;
            }
        }

        NormalizedName { key, edited }
    }
}
