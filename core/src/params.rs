//! Request parameters: string fields plus optional file entries.
//!
//! String fields become the query string (GET, download), the form body
//! (POST) or field parts (upload). File entries only take part in uploads,
//! where each becomes a file part after the explicitly added ones.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::request::FilePart;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    fields: BTreeMap<String, String>,
    files: BTreeMap<String, FilePart>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a flat `[k1, v1, k2, v2, ...]` list.
    pub fn from_pairs<S: AsRef<str>>(keys_and_values: &[S]) -> Result<Self, ValidationError> {
        if keys_and_values.len() % 2 != 0 {
            return Err(ValidationError::OddKeyValueCount(keys_and_values.len()));
        }
        let mut params = Params::new();
        for pair in keys_and_values.chunks_exact(2) {
            params.put(pair[0].as_ref(), pair[1].as_ref());
        }
        Ok(params)
    }

    /// Set a string field, replacing any previous value for `key`.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Attach a file under `key`; the part's file name is the path's base name.
    pub fn put_file(&mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        let key = key.into();
        self.files.insert(key.clone(), FilePart::new(key, path));
        self
    }

    /// Attach in-memory content under `key`, sent as `file_name` with
    /// `content_type`.
    pub fn put_bytes(
        &mut self,
        key: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> &mut Self {
        let key = key.into();
        let part = FilePart::from_bytes(key.clone(), bytes, file_name).with_content_type(content_type);
        self.files.insert(key, part);
        self
    }

    /// Remove `key` from both the string fields and the file entries.
    pub fn remove(&mut self, key: &str) {
        self.fields.remove(key);
        self.files.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.files.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn files(&self) -> impl Iterator<Item = &FilePart> {
        self.files.values()
    }

    pub(crate) fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let files = self.files.keys().map(|k| (k.as_str(), "FILE"));
        for (k, v) in self.fields().chain(files) {
            if !first {
                f.write_str("&")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        params.extend(iter);
        params
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for Params {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.put(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_rejects_odd_length() {
        let err = Params::from_pairs(&["a", "1", "b"]).unwrap_err();
        assert_eq!(err, ValidationError::OddKeyValueCount(3));
    }

    #[test]
    fn from_pairs_builds_fields() {
        let params = Params::from_pairs(&["user", "ann", "age", "7"]).unwrap();
        assert_eq!(params.get("user"), Some("ann"));
        assert_eq!(params.get("age"), Some("7"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn put_replaces_existing_value() {
        let mut params = Params::new();
        params.put("k", "1").put("k", "2");
        assert_eq!(params.get("k"), Some("2"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn remove_clears_fields_and_files() {
        let mut params = Params::new();
        params.put("a", "1").put_file("b", "/tmp/b.txt");
        params.remove("a");
        params.remove("b");
        assert!(params.is_empty());
    }

    #[test]
    fn display_marks_files() {
        let mut params = Params::new();
        params.put("a", "1").put("b", "2").put_file("pic", "/sdcard/pic.jpg");
        assert_eq!(params.to_string(), "a=1&b=2&pic=FILE");
    }

    #[test]
    fn put_file_uses_base_name() {
        let mut params = Params::new();
        params.put_file("pic", "/sdcard/dcim/pic.jpg");
        let part = params.files().next().unwrap();
        assert_eq!(part.field, "pic");
        assert_eq!(part.file_name(), "pic.jpg");
    }

    #[test]
    fn put_bytes_keeps_name_and_type() {
        let mut params = Params::new();
        params.put_bytes("avatar", b"\x89PNG".to_vec(), "me.png", "image/png");
        let part = params.files().next().unwrap();
        assert_eq!(part.field, "avatar");
        assert_eq!(part.file_name(), "me.png");
        assert_eq!(part.content_type.as_deref(), Some("image/png"));
        assert_eq!(part.read().unwrap().as_ref(), b"\x89PNG");
        assert_eq!(params.to_string(), "avatar=FILE");
    }

    #[test]
    fn collects_from_iterator() {
        let params: Params = [("a", "1"), ("b", "2")].into_iter().collect();
        let fields: Vec<_> = params.fields().collect();
        assert_eq!(fields, vec![("a", "1"), ("b", "2")]);
    }
}
