use std::{
    borrow::Borrow,
    fmt::{self, Debug, Display},
    ops::Deref,
    sync::Arc,
};

/// Logical name of an asset or asset group.
///
/// Cheap to clone. Empty keys are representable
/// so that coordinators can reject them at call time.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct AssetKey(Arc<str>);

impl AssetKey {
    pub fn new(key: &str) -> Self {
        AssetKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AssetKey {
    fn default() -> Self {
        AssetKey::new("")
    }
}

impl Deref for AssetKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AssetKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetKey {
    fn from(key: &str) -> Self {
        AssetKey::new(key)
    }
}

impl From<String> for AssetKey {
    fn from(key: String) -> Self {
        AssetKey(key.into())
    }
}

impl From<Arc<str>> for AssetKey {
    fn from(key: Arc<str>) -> Self {
        AssetKey(key)
    }
}

impl Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for AssetKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for AssetKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        Ok(AssetKey::from(key))
    }
}
