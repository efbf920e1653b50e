//! Hierarchical entity keys.
//!
//! A [`Key`] is an ordered root-to-leaf path of [`KeyTok`] tokens scoped by an
//! application id and a namespace. The leaf token identifies the entity; the
//! tokens before it form its ancestor path.

use std::fmt;

use crate::error::{DatastoreError, DatastoreResult};

/// One element of a key's ancestor path.
///
/// A token carries either a string id, an integer id, or neither (an
/// incomplete token awaiting backend allocation). A token never carries both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyTok {
    /// Entity kind of this path element.
    pub kind: String,
    /// String identifier, empty when unset.
    pub string_id: String,
    /// Integer identifier, zero when unset.
    pub int_id: i64,
}

impl KeyTok {
    /// Creates a token with an integer identifier.
    pub fn with_int_id(kind: impl Into<String>, int_id: i64) -> Self {
        Self { kind: kind.into(), string_id: String::new(), int_id }
    }

    /// Creates a token with a string identifier.
    pub fn with_string_id(kind: impl Into<String>, string_id: impl Into<String>) -> Self {
        Self { kind: kind.into(), string_id: string_id.into(), int_id: 0 }
    }

    /// Creates a token whose identifier will be assigned by the backend.
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), string_id: String::new(), int_id: 0 }
    }

    /// Returns `true` if this token has no identifier.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.string_id.is_empty() && self.int_id == 0
    }
}

static EMPTY_TOK: KeyTok = KeyTok { kind: String::new(), string_id: String::new(), int_id: 0 };

/// An immutable entity key.
///
/// Keys are plain values; they carry no backend connection. A key always has
/// at least one token and only its leaf token may be incomplete.
///
/// # Example
///
/// ```
/// use entitystore::Key;
///
/// let parent = Key::new("app", "", "Parent", "p", 0, None).unwrap();
/// let child = Key::new("app", "", "Child", "", 7, Some(&parent)).unwrap();
///
/// assert_eq!(child.toks().len(), 2);
/// assert_eq!(child.parent(), Some(parent));
/// assert!(!child.is_incomplete());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    app_id: String,
    namespace: String,
    toks: Vec<KeyTok>,
}

impl Key {
    /// Builds a key from an ordered root-to-leaf token list.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidKey`] if `toks` is empty, a token has
    /// an empty kind, a token carries both identifiers, or a non-leaf token
    /// is incomplete.
    pub fn from_toks(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        toks: Vec<KeyTok>,
    ) -> DatastoreResult<Self> {
        let Some((_, ancestors)) = toks.split_last() else {
            return Err(DatastoreError::InvalidKey);
        };
        if ancestors.iter().any(KeyTok::is_incomplete) {
            return Err(DatastoreError::InvalidKey);
        }
        if toks.iter().any(|t| t.kind.is_empty() || (!t.string_id.is_empty() && t.int_id != 0)) {
            return Err(DatastoreError::InvalidKey);
        }
        Ok(Self { app_id: app_id.into(), namespace: namespace.into(), toks })
    }

    /// Builds a key one level below `parent`, or a root key.
    ///
    /// When a parent is given its app id and namespace must match.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidKey`] if the parent is incomplete,
    /// lives in a different scope, or the new token is malformed.
    pub fn new(
        app_id: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        string_id: impl Into<String>,
        int_id: i64,
        parent: Option<&Key>,
    ) -> DatastoreResult<Self> {
        let app_id = app_id.into();
        let namespace = namespace.into();
        let tok = KeyTok { kind: kind.into(), string_id: string_id.into(), int_id };

        let mut toks = match parent {
            Some(parent) => {
                if parent.app_id != app_id || parent.namespace != namespace {
                    return Err(DatastoreError::InvalidKey);
                }
                let mut toks = Vec::with_capacity(parent.toks.len() + 1);
                toks.extend_from_slice(&parent.toks);
                toks
            },
            None => Vec::with_capacity(1),
        };
        toks.push(tok);
        Self::from_toks(app_id, namespace, toks)
    }

    /// Splits the key into its app id, namespace and root-to-leaf tokens.
    #[must_use]
    pub fn split(&self) -> (&str, &str, &[KeyTok]) {
        (&self.app_id, &self.namespace, &self.toks)
    }

    /// Returns the application id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the namespace (empty for the default namespace).
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the root-to-leaf token path.
    #[must_use]
    pub fn toks(&self) -> &[KeyTok] {
        &self.toks
    }

    fn leaf(&self) -> &KeyTok {
        // `from_toks` rejects empty paths.
        debug_assert!(!self.toks.is_empty());
        self.toks.last().unwrap_or(&EMPTY_TOK)
    }

    /// Returns the leaf kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.leaf().kind
    }

    /// Returns the leaf string id (empty when unset).
    #[must_use]
    pub fn string_id(&self) -> &str {
        &self.leaf().string_id
    }

    /// Returns the leaf integer id (zero when unset).
    #[must_use]
    pub fn int_id(&self) -> i64 {
        self.leaf().int_id
    }

    /// Returns `true` if the leaf token has no identifier yet.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.leaf().is_incomplete()
    }

    /// Returns the parent key, or `None` for a root key.
    #[must_use]
    pub fn parent(&self) -> Option<Key> {
        let (_, ancestors) = self.toks.split_last()?;
        if ancestors.is_empty() {
            return None;
        }
        Some(Key {
            app_id: self.app_id.clone(),
            namespace: self.namespace.clone(),
            toks: ancestors.to_vec(),
        })
    }

    /// Returns the root of this key's ancestor path.
    #[must_use]
    pub fn root(&self) -> Key {
        Key {
            app_id: self.app_id.clone(),
            namespace: self.namespace.clone(),
            toks: self.toks.first().cloned().into_iter().collect(),
        }
    }

    /// Returns `true` if `ancestor` is a prefix of this key's path (or equal to it).
    #[must_use]
    pub fn has_ancestor(&self, ancestor: &Key) -> bool {
        self.app_id == ancestor.app_id
            && self.namespace == ancestor.namespace
            && self.toks.starts_with(&ancestor.toks)
    }
}

impl fmt::Display for Key {
    /// Formats as `app:namespace:/Kind,id/Kind,"name"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.app_id, self.namespace)?;
        for tok in &self.toks {
            if !tok.string_id.is_empty() {
                write!(f, "/{},{:?}", tok.kind, tok.string_id)?;
            } else {
                write!(f, "/{},{}", tok.kind, tok.int_id)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(toks: Vec<KeyTok>) -> Key {
        Key::from_toks("app", "ns", toks).unwrap()
    }

    #[test]
    fn test_from_toks_rejects_empty_path() {
        assert!(matches!(Key::from_toks("app", "", vec![]), Err(DatastoreError::InvalidKey)));
    }

    #[test]
    fn test_from_toks_rejects_incomplete_ancestor() {
        let result = Key::from_toks(
            "app",
            "",
            vec![KeyTok::incomplete("Parent"), KeyTok::with_int_id("Child", 1)],
        );
        assert!(matches!(result, Err(DatastoreError::InvalidKey)));
    }

    #[test]
    fn test_from_toks_rejects_double_identifier() {
        let tok = KeyTok { kind: "Kind".into(), string_id: "a".into(), int_id: 3 };
        assert!(Key::from_toks("app", "", vec![tok]).is_err());
    }

    #[test]
    fn test_incomplete_leaf_is_allowed() {
        let k = key(vec![KeyTok::with_string_id("Parent", "p"), KeyTok::incomplete("Child")]);
        assert!(k.is_incomplete());
        assert_eq!(k.kind(), "Child");
        assert!(!k.parent().unwrap().is_incomplete());
    }

    #[test]
    fn test_new_with_parent_extends_path() {
        let parent = Key::new("app", "ns", "Parent", "", 4, None).unwrap();
        let child = Key::new("app", "ns", "Child", "c", 0, Some(&parent)).unwrap();

        assert_eq!(
            child.toks(),
            &[KeyTok::with_int_id("Parent", 4), KeyTok::with_string_id("Child", "c")]
        );
        assert_eq!(child.root(), parent);
        assert!(child.has_ancestor(&parent));
        assert!(!parent.has_ancestor(&child));
    }

    #[test]
    fn test_new_rejects_parent_in_other_namespace() {
        let parent = Key::new("app", "other", "Parent", "", 4, None).unwrap();
        assert!(Key::new("app", "ns", "Child", "c", 0, Some(&parent)).is_err());
    }

    #[test]
    fn test_root_and_parent_walk_the_path() {
        let single = key(vec![KeyTok::with_string_id("A", "a")]);
        assert_eq!(single.root(), single);
        assert!(single.parent().is_none());

        let deep = key(vec![
            KeyTok::with_string_id("A", "a"),
            KeyTok::with_int_id("B", 2),
            KeyTok::incomplete("C"),
        ]);
        let parent = deep.parent().unwrap();
        assert_eq!(parent.toks(), &deep.toks()[..2]);
        assert_eq!(parent.parent().unwrap(), single);
        assert_eq!(deep.root(), single);
        assert_eq!(deep.kind(), "C");
        assert!(deep.is_incomplete());
    }

    #[test]
    fn test_display() {
        let k = key(vec![KeyTok::with_int_id("Parent", 4), KeyTok::with_string_id("Child", "c")]);
        assert_eq!(k.to_string(), "app:ns:/Parent,4/Child,\"c\"");
    }
}
