use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Predicate set applied to archive entry names.
///
/// Entry names are compared after turning `\` into `/`, so archives written on
/// either host family match the same prefixes. Prefix comparison is
/// case-sensitive. File-name predicates compare the final path segment exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySelector {
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub file_names: Vec<String>,
}

impl EntrySelector {
    pub fn from_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            file_names: Vec::new(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_names.push(file_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty() && self.file_names.is_empty()
    }

    pub fn matches(&self, entry_name: &str) -> bool {
        let normalized = normalize_entry_name(entry_name);
        if self
            .prefixes
            .iter()
            .any(|prefix| normalized.starts_with(normalize_entry_name(prefix).as_ref()))
        {
            return true;
        }

        let file_name = normalized.rsplit('/').next().unwrap_or_default();
        !file_name.is_empty()
            && self
                .file_names
                .iter()
                .any(|candidate| candidate == file_name)
    }

    /// Returns the matching names in input order.
    pub fn select<I, S>(&self, entry_names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        entry_names
            .into_iter()
            .filter(|name| self.matches(name.as_ref()))
            .map(|name| name.as_ref().to_string())
            .collect()
    }
}

pub fn normalize_entry_name(name: &str) -> Cow<'_, str> {
    if name.contains('\\') {
        Cow::Owned(name.replace('\\', "/"))
    } else {
        Cow::Borrowed(name)
    }
}
