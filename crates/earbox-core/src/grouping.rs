//! Asset grouping
//!
//! Classifies a flat key listing into groups of related images. A filename
//! such as `V3xM@session.jpg` is a primary ("V") member of the group keyed by
//! `xM@session.jpg`; `I3xM@session.jpg` is a secondary ("I") member of the same
//! group. Filenames that do not match are unrelated assets and are skipped.

use crate::types::{GroupKey, ObjectKey};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Number of leading filename characters (marker + digit) dropped to form the group key
pub const GROUP_KEY_OFFSET: usize = 2;

static MEMBER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(V|I)[1-6](xM|\dU)@.*\.jpg$").expect("member filename pattern is valid")
});

/// Which half of a group a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemberTag {
    /// `V` member
    #[serde(rename = "V")]
    Primary,
    /// `I` member
    #[serde(rename = "I")]
    Secondary,
}

impl MemberTag {
    /// Tag for a filename's leading marker
    #[must_use]
    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "V" => Some(Self::Primary),
            "I" => Some(Self::Secondary),
            _ => None,
        }
    }

    /// Leading filename marker
    #[must_use]
    pub fn marker(self) -> char {
        match self {
            Self::Primary => 'V',
            Self::Secondary => 'I',
        }
    }
}

/// Keys sharing one group key, split by tag
///
/// Member sequences are append-only and keep listing order. The group key is
/// not serialized; groups are stored under it as a map key, and
/// [`deserialize_keyed`] restores it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetGroup {
    #[serde(skip)]
    group_key: GroupKey,
    #[serde(rename = "V")]
    primary: Vec<ObjectKey>,
    #[serde(rename = "I")]
    secondary: Vec<ObjectKey>,
}

impl AssetGroup {
    /// Empty group under `group_key`
    #[must_use]
    pub fn new(group_key: GroupKey) -> Self {
        Self {
            group_key,
            primary: Vec::new(),
            secondary: Vec::new(),
        }
    }

    /// Append one member
    pub fn push(&mut self, tag: MemberTag, key: ObjectKey) {
        match tag {
            MemberTag::Primary => self.primary.push(key),
            MemberTag::Secondary => self.secondary.push(key),
        }
    }

    /// Key shared by every member
    #[inline]
    #[must_use]
    pub fn group_key(&self) -> &GroupKey {
        &self.group_key
    }

    /// Members carrying `tag`, in listing order
    #[must_use]
    pub fn members(&self, tag: MemberTag) -> &[ObjectKey] {
        match tag {
            MemberTag::Primary => &self.primary,
            MemberTag::Secondary => &self.secondary,
        }
    }

    /// Number of `V` members
    #[inline]
    #[must_use]
    pub fn primary_count(&self) -> usize {
        self.primary.len()
    }

    /// Number of `I` members
    #[inline]
    #[must_use]
    pub fn secondary_count(&self) -> usize {
        self.secondary.len()
    }
}

/// Deserialize a group map, setting each group's key from its map key
///
/// For `#[serde(deserialize_with = "...")]` on `BTreeMap<GroupKey, AssetGroup>` fields.
pub fn deserialize_keyed<'de, D>(deserializer: D) -> Result<BTreeMap<GroupKey, AssetGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut groups = BTreeMap::<GroupKey, AssetGroup>::deserialize(deserializer)?;
    for (key, group) in &mut groups {
        group.group_key = key.clone();
    }
    Ok(groups)
}

/// Result of one grouping pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    groups: BTreeMap<GroupKey, AssetGroup>,
    matched_any: bool,
}

impl Grouping {
    /// No groups, nothing matched
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the group for `group_key`, creating an empty one on first access
    pub fn get_or_create(&mut self, group_key: GroupKey) -> &mut AssetGroup {
        self.groups
            .entry(group_key)
            .or_insert_with_key(|key| AssetGroup::new(key.clone()))
    }

    /// Record one matched key
    pub fn record(&mut self, group_key: GroupKey, tag: MemberTag, key: ObjectKey) {
        self.matched_any = true;
        self.get_or_create(group_key).push(tag, key);
    }

    /// Whether any key matched the member pattern
    #[inline]
    #[must_use]
    pub fn matched_any(&self) -> bool {
        self.matched_any
    }

    /// Groups by key
    #[inline]
    #[must_use]
    pub fn groups(&self) -> &BTreeMap<GroupKey, AssetGroup> {
        &self.groups
    }

    /// Group under `group_key`, if any
    #[must_use]
    pub fn get(&self, group_key: &GroupKey) -> Option<&AssetGroup> {
        self.groups.get(group_key)
    }

    /// Number of groups
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no group exists
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Consume into the group map
    #[must_use]
    pub fn into_groups(self) -> BTreeMap<GroupKey, AssetGroup> {
        self.groups
    }
}

/// Classifies keys into asset groups by filename
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetGrouper;

impl AssetGrouper {
    /// Grouper using the member filename pattern
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Tag and group key for a filename, or `None` if it is not a member image
    #[must_use]
    pub fn classify(&self, file_name: &str) -> Option<(MemberTag, GroupKey)> {
        let captures = MEMBER_PATTERN.captures(file_name)?;
        let tag = MemberTag::from_marker(captures.get(1)?.as_str())?;
        let suffix = file_name.get(GROUP_KEY_OFFSET..)?;
        Some((tag, GroupKey::new(suffix)))
    }

    /// Group every matching key, preserving listing order within each group
    pub fn group<'a, I>(&self, keys: I) -> Grouping
    where
        I: IntoIterator<Item = &'a ObjectKey>,
    {
        let mut grouping = Grouping::new();
        for key in keys {
            if let Some((tag, group_key)) = self.classify(key.file_name()) {
                grouping.record(group_key, tag, key.clone());
            }
        }
        grouping
    }
}
