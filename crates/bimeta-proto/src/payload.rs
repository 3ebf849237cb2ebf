//! Wire messages for the `bimeta.v1.Meta` service.
//!
//! The same structs double as REST bodies; the build adds `serde` derives
//! to every generated message.

pub use crate::meta::{Empty, MetaKey, MetaKeyVal, MetaKeyVals, MetaKeys, MetaVal, MetaVals};

impl MetaKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl MetaVal {
    pub fn new(val: impl Into<String>) -> Self {
        Self { val: val.into() }
    }
}

impl MetaKeyVal {
    pub fn new(key: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            val: val.into(),
        }
    }
}

impl<K: Into<String>> FromIterator<K> for MetaKeys {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<V: Into<String>> FromIterator<V> for MetaVals {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self {
            vals: iter.into_iter().map(Into::into).collect(),
        }
    }
}
