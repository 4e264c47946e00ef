//! Deterministic mapping between layer keys and backend names.
//!
//! Every layer lives at `<root>/<kind>/<component>` where `component` is
//! the escaped layer key. Escaping keeps `[A-Za-z0-9_:-]` and writes every
//! other byte, `.` included, as `.` followed by two lowercase hex digits, so
//! the mapping is injective and can be reversed when walking the backend.

use stratum_common::{LayerKey, StratumError, StratumResult};

use crate::layer::LayerKind;

/// Name of the snapshot that anchors clones of a committed layer.
pub const ANCHOR_SNAPSHOT: &str = "anchor";

/// Longest dataset or snapshot name the backend accepts.
pub const MAX_NAME_LEN: usize = 255;

const ESCAPE: char = '.';

/// Escape a layer key into a single backend name component.
#[must_use]
pub fn encode_component(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b':') {
            out.push(char::from(byte));
        } else {
            out.push(ESCAPE);
            out.push_str(&hex::encode([byte]));
        }
    }
    out
}

/// Reverse [`encode_component`]. Returns `None` for names this crate did not produce.
#[must_use]
pub fn decode_component(component: &str) -> Option<String> {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == ESCAPE as u8 {
            let hex_digits = bytes.get(i + 1..i + 3)?;
            if hex_digits.iter().any(u8::is_ascii_uppercase) {
                return None;
            }
            let decoded = hex::decode(hex_digits).ok()?;
            out.extend(decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Full name of the anchor snapshot of `dataset`.
#[must_use]
pub fn anchor_of(dataset: &str) -> String {
    format!("{dataset}@{ANCHOR_SNAPSHOT}")
}

/// Naming scheme rooted at one backend dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    root: String,
}

impl Naming {
    /// Create a naming scheme under `root`, the dataset mounted at the configured root directory.
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    /// The root dataset.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Container dataset holding all layers of `kind`.
    #[must_use]
    pub fn container(&self, kind: LayerKind) -> String {
        format!("{}/{}", self.root, kind.dir_name())
    }

    /// Dataset backing `key` while it is of `kind`.
    #[must_use]
    pub fn dataset(&self, kind: LayerKind, key: &LayerKey) -> String {
        format!("{}/{}", self.container(kind), encode_component(key.as_str()))
    }

    /// Lock name for `key`, shared by all of its kinds.
    #[must_use]
    pub fn lock_name(key: &LayerKey) -> String {
        encode_component(key.as_str())
    }

    /// Reject keys whose longest backend name would exceed the backend limit.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::InvalidKey`] if the key cannot be represented.
    pub fn check_fits(&self, key: &LayerKey) -> StratumResult<()> {
        let longest = LayerKind::ALL
            .into_iter()
            .map(|kind| anchor_of(&self.dataset(kind, key)).len())
            .max()
            .unwrap_or_default();
        if longest > MAX_NAME_LEN {
            return Err(StratumError::InvalidKey {
                key: key.to_string(),
                reason: format!("backend name would be {longest} bytes, limit is {MAX_NAME_LEN}"),
            });
        }
        Ok(())
    }

    /// Recover kind and key from a layer dataset name.
    #[must_use]
    pub fn parse_dataset(&self, dataset: &str) -> Option<(LayerKind, LayerKey)> {
        let rest = dataset.strip_prefix(&self.root)?.strip_prefix('/')?;
        let (dir, component) = rest.split_once('/')?;
        if component.contains('/') || component.contains('@') {
            return None;
        }
        let kind = LayerKind::from_dir_name(dir)?;
        let key = LayerKey::new(decode_component(component)?).ok()?;
        // Only accept the canonical spelling so the mapping stays injective.
        (encode_component(key.as_str()) == component).then_some((kind, key))
    }

    /// Recover the committed layer that owns an anchor snapshot, e.g. a clone's `origin`.
    #[must_use]
    pub fn parse_anchor(&self, snapshot: &str) -> Option<LayerKey> {
        let (dataset, name) = snapshot.split_once('@')?;
        if name != ANCHOR_SNAPSHOT {
            return None;
        }
        match self.parse_dataset(dataset)? {
            (LayerKind::Committed, key) => Some(key),
            _ => None,
        }
    }
}
