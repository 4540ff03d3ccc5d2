//! Identity types for the murmur mesh
//!
//! Node identities are 32-bit, matching what the radio transport hands out.
//! They are unique per node and stable for a session, nothing more.

use std::fmt;

/// Node identity assigned by the mesh transport
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ZERO: NodeId = NodeId(0);

    #[inline]
    pub fn new(id: u32) -> Self {
        NodeId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        NodeId(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({:08x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Application-defined node category ("button", "clock", "gateway", ...)
///
/// Role tags scope OTA manifests: a node only accepts firmware announced
/// for its own tag.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RoleTag(pub String);

impl RoleTag {
    pub fn new(tag: impl Into<String>) -> Self {
        RoleTag(tag.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoleTag {
    fn from(s: &str) -> Self {
        RoleTag(s.to_string())
    }
}

impl fmt::Debug for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Role({})", self.0)
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_roundtrip() {
        let id = NodeId::new(0xDEAD_BEEF);
        let bytes = id.to_bytes();
        let recovered = NodeId::from_bytes(bytes);
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_node_id_ordering_is_numeric() {
        assert!(NodeId::new(1) < NodeId::new(2));
        assert!(NodeId::new(0xFFFF_FFFF) > NodeId::new(0));
    }

    #[test]
    fn test_role_tag_display() {
        let role = RoleTag::from("button");
        assert_eq!(role.to_string(), "button");
        assert_eq!(role.as_str(), "button");
    }
}
