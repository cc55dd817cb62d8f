//! Subflow value types.
//!
//! Everything here is a plain owned value: the kernel state it was read
//! from may change the moment the call returns, and nothing tracks whether
//! a [`SubflowId`] still names a live subflow.

use std::fmt;
use std::net::SocketAddr;
use std::ops::Index;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::{MptcpSubStatus, sub_status_flags};

/// Kernel-assigned subflow identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SubflowId(pub u8);

impl SubflowId {
    /// The raw id.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl From<u8> for SubflowId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority of a subflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Priority {
    /// Regular path.
    #[default]
    Normal,
    /// Backup path, used when no normal path is available.
    Low,
}

impl Priority {
    /// Parse the kernel's priority byte (non-zero means low).
    pub fn from_raw(raw: u8) -> Self {
        if raw == 0 { Self::Normal } else { Self::Low }
    }

    /// Convert to the kernel's priority byte.
    pub fn to_raw(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Low => 1,
        }
    }

    /// Check if this is the low (backup) priority.
    pub fn is_low(self) -> bool {
        self == Self::Low
    }
}

/// One entry of a subflow listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubflowStatus {
    /// Subflow id.
    pub id: SubflowId,
    /// Scheduling priority.
    pub priority: Priority,
    /// Not the connection's initial subflow.
    pub slave_sk: bool,
    /// Handshake completed.
    pub fully_established: bool,
    /// Attached to the connection.
    pub attached: bool,
    /// Still in the pre-established state.
    pub pre_established: bool,
}

impl SubflowStatus {
    /// Build from the kernel's status record.
    pub fn from_raw(raw: &MptcpSubStatus) -> Self {
        let flags = raw.flags;
        let priority = if flags & sub_status_flags::LOW_PRIO != 0 {
            Priority::Low
        } else {
            Priority::Normal
        };
        Self {
            id: SubflowId(raw.id),
            priority,
            slave_sk: flags & sub_status_flags::SLAVE_SK != 0,
            fully_established: flags & sub_status_flags::FULLY_ESTABLISHED != 0,
            attached: flags & sub_status_flags::ATTACHED != 0,
            pre_established: flags & sub_status_flags::PRE_ESTABLISHED != 0,
        }
    }

    /// Convert back to the kernel's status record.
    pub fn to_raw(&self) -> MptcpSubStatus {
        let mut flags = 0u16;
        if self.priority.is_low() {
            flags |= sub_status_flags::LOW_PRIO;
        }
        if self.slave_sk {
            flags |= sub_status_flags::SLAVE_SK;
        }
        if self.fully_established {
            flags |= sub_status_flags::FULLY_ESTABLISHED;
        }
        if self.attached {
            flags |= sub_status_flags::ATTACHED;
        }
        if self.pre_established {
            flags |= sub_status_flags::PRE_ESTABLISHED;
        }
        MptcpSubStatus::new(self.id.0, flags)
    }
}

/// The subflows of a connection at the instant of one list call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct SubflowSnapshot {
    entries: Vec<SubflowStatus>,
}

impl SubflowSnapshot {
    pub(crate) fn new(entries: Vec<SubflowStatus>) -> Self {
        Self { entries }
    }

    /// Number of subflows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the connection had no subflows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in kernel order.
    pub fn iter(&self) -> std::slice::Iter<'_, SubflowStatus> {
        self.entries.iter()
    }

    /// The ids, in kernel order.
    pub fn ids(&self) -> Vec<SubflowId> {
        self.entries.iter().map(|s| s.id).collect()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: SubflowId) -> Option<&SubflowStatus> {
        self.entries.iter().find(|s| s.id == id)
    }

    /// Entries as a slice.
    pub fn as_slice(&self) -> &[SubflowStatus] {
        &self.entries
    }

    /// Take ownership of the entries.
    pub fn into_vec(self) -> Vec<SubflowStatus> {
        self.entries
    }
}

impl Index<usize> for SubflowSnapshot {
    type Output = SubflowStatus;

    fn index(&self, index: usize) -> &SubflowStatus {
        &self.entries[index]
    }
}

impl IntoIterator for SubflowSnapshot {
    type Item = SubflowStatus;
    type IntoIter = std::vec::IntoIter<SubflowStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a SubflowSnapshot {
    type Item = &'a SubflowStatus;
    type IntoIter = std::slice::Iter<'a, SubflowStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A subflow's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubflowTuple {
    /// Subflow id.
    pub id: SubflowId,
    /// Scheduling priority.
    pub priority: Priority,
    /// Local endpoint.
    pub local: SocketAddr,
    /// Remote endpoint.
    pub remote: SocketAddr,
}

impl SubflowTuple {
    /// Check if both endpoints use the same address family.
    pub fn is_same_family(&self) -> bool {
        self.local.is_ipv4() == self.remote.is_ipv4()
    }
}

impl fmt::Display for SubflowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.id, self.local, self.remote)?;
        if self.priority.is_low() {
            f.write_str(" backup")?;
        }
        Ok(())
    }
}

/// Raw value of a subflow socket option.
///
/// The bytes are interpreted by the (level, optname) pair they were read
/// with; the integer accessors use the kernel's native `int` layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct OptionValue(Vec<u8>);

impl OptionValue {
    /// Wrap raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Encode a C `int`.
    pub fn from_i32(value: i32) -> Self {
        Self(value.to_ne_bytes().to_vec())
    }

    /// Encode a C `unsigned int`.
    pub fn from_u32(value: u32) -> Self {
        Self(value.to_ne_bytes().to_vec())
    }

    /// Decode as a C `int`, if exactly four bytes long.
    pub fn as_i32(&self) -> Option<i32> {
        let bytes: [u8; 4] = self.0.as_slice().try_into().ok()?;
        Some(i32::from_ne_bytes(bytes))
    }

    /// Decode as a C `unsigned int`, if exactly four bytes long.
    pub fn as_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.0.as_slice().try_into().ok()?;
        Some(u32::from_ne_bytes(bytes))
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Take ownership of the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for OptionValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for OptionValue {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl AsRef<[u8]> for OptionValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_raw() {
        assert_eq!(Priority::from_raw(0), Priority::Normal);
        assert_eq!(Priority::from_raw(1), Priority::Low);
        assert_eq!(Priority::from_raw(0xff), Priority::Low);
        assert_eq!(Priority::Low.to_raw(), 1);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_status_from_raw() {
        let raw = MptcpSubStatus::new(
            4,
            sub_status_flags::LOW_PRIO | sub_status_flags::FULLY_ESTABLISHED,
        );
        let status = SubflowStatus::from_raw(&raw);
        assert_eq!(status.id, SubflowId(4));
        assert_eq!(status.priority, Priority::Low);
        assert!(status.fully_established);
        assert!(!status.slave_sk);
        assert!(!status.attached);
        assert!(!status.pre_established);
    }

    #[test]
    fn test_status_flags_roundtrip() {
        let status = SubflowStatus {
            id: SubflowId(9),
            priority: Priority::Normal,
            slave_sk: true,
            fully_established: false,
            attached: true,
            pre_established: true,
        };
        assert_eq!(SubflowStatus::from_raw(&status.to_raw()), status);
    }

    #[test]
    fn test_snapshot_accessors() {
        let entry = |id| SubflowStatus::from_raw(&MptcpSubStatus::new(id, 0));
        let snap = SubflowSnapshot::new(vec![entry(2), entry(1), entry(5)]);

        assert_eq!(snap.len(), 3);
        assert_eq!(snap.ids(), vec![SubflowId(2), SubflowId(1), SubflowId(5)]);
        assert_eq!(snap[1].id, SubflowId(1));
        assert!(snap.get(SubflowId(5)).is_some());
        assert!(snap.get(SubflowId(3)).is_none());
        assert_eq!((&snap).into_iter().count(), 3);
    }

    #[test]
    fn test_option_value_ints() {
        let v = OptionValue::from_i32(-7);
        assert_eq!(v.len(), 4);
        assert_eq!(v.as_i32(), Some(-7));

        let v = OptionValue::from_u32(1400);
        assert_eq!(v.as_u32(), Some(1400));

        assert_eq!(OptionValue::new(vec![1, 2]).as_i32(), None);
        assert!(OptionValue::default().is_empty());
    }

    #[test]
    fn test_tuple_display() {
        let tuple = SubflowTuple {
            id: SubflowId(3),
            priority: Priority::Low,
            local: "10.0.0.1:5000".parse().unwrap(),
            remote: "10.0.0.2:6000".parse().unwrap(),
        };
        assert_eq!(tuple.to_string(), "3: 10.0.0.1:5000 -> 10.0.0.2:6000 backup");
        assert!(tuple.is_same_family());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_tuple_serde() {
        let tuple = SubflowTuple {
            id: SubflowId(3),
            priority: Priority::Normal,
            local: "10.0.0.1:5000".parse().unwrap(),
            remote: "[2001:db8::1]:6000".parse().unwrap(),
        };
        let json = serde_json::to_value(tuple).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["priority"], "normal");
        assert_eq!(json["local"], "10.0.0.1:5000");

        let back: SubflowTuple = serde_json::from_value(json).unwrap();
        assert_eq!(back, tuple);
    }
}
