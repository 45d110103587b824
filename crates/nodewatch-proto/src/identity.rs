//! Deterministic node and GPU slot identifiers.
//!
//! Both identifiers are SHA-256 digests truncated to 64 bits and rendered as
//! 16 lowercase hex characters. Derivation is a pure function of its inputs,
//! so the same `(host_name, ip)` always maps to the same node across restarts.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProtoError, ProtoResult};

/// Width of a derived identifier in bytes.
const ID_BYTES: usize = 8;

/// Domain tags keep node and slot digests in separate spaces.
const NODE_TAG: &[u8] = b"nodewatch/node\0";
const SLOT_TAG: &[u8] = b"nodewatch/gpu-slot\0";

/// Stable key for a reporting node, derived from its host name and observed IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeIdentity([u8; ID_BYTES]);

impl NodeIdentity {
    /// Derive the identity for `(host_name, ip)`.
    ///
    /// The host name is length-prefixed before hashing, so a colon inside an
    /// IPv6 address can never make two different pairs hash the same input.
    #[must_use]
    pub fn derive(host_name: &str, ip: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(NODE_TAG);
        hasher.update((host_name.len() as u64).to_le_bytes());
        hasher.update(host_name.as_bytes());
        hasher.update(ip.as_bytes());
        Self(truncate(&hasher.finalize()))
    }

    /// Parse an identity from its 16-character hex form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidIdentity`] if `s` is not 16 hex characters.
    pub fn parse(s: &str) -> ProtoResult<Self> {
        parse_hex(s).map(Self)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl TryFrom<String> for NodeIdentity {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeIdentity> for String {
    fn from(id: NodeIdentity) -> Self {
        id.to_string()
    }
}

/// Stable key for one physical GPU on a node.
///
/// Repeated samples of the same `(node, slot_index)` always land on the same
/// slot id, which is what lets the store coalesce them within its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GpuSlotId([u8; ID_BYTES]);

impl GpuSlotId {
    /// Derive the slot id for GPU `index` on `node`.
    #[must_use]
    pub fn derive(node: &NodeIdentity, index: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SLOT_TAG);
        hasher.update(node.as_bytes());
        hasher.update(index.to_le_bytes());
        Self(truncate(&hasher.finalize()))
    }

    /// Parse a slot id from its 16-character hex form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidIdentity`] if `s` is not 16 hex characters.
    pub fn parse(s: &str) -> ProtoResult<Self> {
        parse_hex(s).map(Self)
    }
}

impl fmt::Display for GpuSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl TryFrom<String> for GpuSlotId {
    type Error = ProtoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<GpuSlotId> for String {
    fn from(id: GpuSlotId) -> Self {
        id.to_string()
    }
}

fn truncate(digest: &[u8]) -> [u8; ID_BYTES] {
    let mut out = [0u8; ID_BYTES];
    out.copy_from_slice(&digest[..ID_BYTES]);
    out
}

fn parse_hex(s: &str) -> ProtoResult<[u8; ID_BYTES]> {
    if s.len() != ID_BYTES * 2 {
        return Err(ProtoError::InvalidIdentity(s.to_string()));
    }
    let mut out = [0u8; ID_BYTES];
    hex::decode_to_slice(s, &mut out).map_err(|_| ProtoError::InvalidIdentity(s.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_is_sixteen_hex_chars() {
        let id = NodeIdentity::derive("gpu-box-1", "10.0.0.7");
        let text = id.to_string();
        assert_eq!(text.len(), 16);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_identity_parse_roundtrip() {
        let id = NodeIdentity::derive("gpu-box-1", "10.0.0.7");
        assert_eq!(NodeIdentity::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_identity_parse_rejects_bad_input() {
        assert!(NodeIdentity::parse("abc").is_err());
        assert!(NodeIdentity::parse("zzzzzzzzzzzzzzzz").is_err());
        assert!(NodeIdentity::parse("0123456789abcdef00").is_err());
    }

    #[test]
    fn test_identity_serializes_as_string() {
        let id = NodeIdentity::derive("h", "1.2.3.4");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: NodeIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_field_boundary_is_unambiguous() {
        // IPv6 addresses contain colons; shifting text across the boundary
        // must change the identity.
        let a = NodeIdentity::derive("node:fe80", "1");
        let b = NodeIdentity::derive("node", "fe80:1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_slot_id_depends_on_node_and_index() {
        let node = NodeIdentity::derive("gpu-box-1", "10.0.0.7");
        let other = NodeIdentity::derive("gpu-box-2", "10.0.0.7");

        assert_eq!(GpuSlotId::derive(&node, 0), GpuSlotId::derive(&node, 0));
        assert_ne!(GpuSlotId::derive(&node, 0), GpuSlotId::derive(&node, 1));
        assert_ne!(GpuSlotId::derive(&node, 0), GpuSlotId::derive(&other, 0));
    }

    #[test]
    fn test_slot_and_node_spaces_are_separate() {
        let node = NodeIdentity::derive("h", "ip");
        let slot = GpuSlotId::derive(&node, 0);
        assert_ne!(node.as_bytes(), &slot.0);
    }

    fn host_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    fn ip_strategy() -> impl Strategy<Value = String> {
        (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
            .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}"))
    }

    proptest! {
        #[test]
        fn prop_identity_is_deterministic(host in host_strategy(), ip in ip_strategy()) {
            prop_assert_eq!(NodeIdentity::derive(&host, &ip), NodeIdentity::derive(&host, &ip));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(4))]

        #[test]
        fn prop_identity_collision_free_over_ten_thousand_pairs(
            pairs in prop::collection::hash_set((host_strategy(), ip_strategy()), 10_000)
        ) {
            let ids: HashSet<NodeIdentity> = pairs
                .iter()
                .map(|(host, ip)| NodeIdentity::derive(host, ip))
                .collect();
            prop_assert_eq!(ids.len(), pairs.len());
        }
    }
}
