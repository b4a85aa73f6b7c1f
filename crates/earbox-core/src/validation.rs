//! Group completeness validation
//!
//! A group is complete when it holds exactly the required number of primary
//! and secondary members. Incomplete groups are warned about and dropped;
//! the pass always ends with exactly one summary diagnostic.

use crate::grouping::{AssetGroup, Grouping};
use crate::log_stream::LogStream;
use crate::types::GroupKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Members of each tag a complete group holds
pub const REQUIRED_MEMBER_COUNT: usize = 6;

/// Completeness of one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// Group judged
    pub group_key: GroupKey,
    /// Both counts equal the requirement
    pub is_complete: bool,
    /// `V` members found
    pub primary_count: usize,
    /// `I` members found
    pub secondary_count: usize,
}

/// Overall outcome of a validation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessSummary {
    /// No key matched the member pattern
    NoMatches,
    /// Every group is complete
    AllComplete,
    /// Some groups are complete
    Partial,
    /// Groups exist but none is complete
    NoneComplete,
}

impl CompletenessSummary {
    /// True when at least one group can be processed
    #[inline]
    #[must_use]
    pub fn has_valid_groups(self) -> bool {
        matches!(self, Self::AllComplete | Self::Partial)
    }
}

/// Result of one validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Complete groups only
    pub valid: BTreeMap<GroupKey, AssetGroup>,
    /// One verdict per group, in key order
    pub verdicts: Vec<ValidationVerdict>,
    /// Overall outcome
    pub summary: CompletenessSummary,
}

/// Certifies groups against the completeness rule
#[derive(Debug, Clone, Copy)]
pub struct GroupValidator {
    required: usize,
}

impl Default for GroupValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupValidator {
    /// Validator requiring [`REQUIRED_MEMBER_COUNT`] members of each tag
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_required(REQUIRED_MEMBER_COUNT)
    }

    /// Validator requiring `required` members of each tag
    #[inline]
    #[must_use]
    pub fn with_required(required: usize) -> Self {
        Self { required }
    }

    /// Members of each tag a complete group holds
    #[inline]
    #[must_use]
    pub fn required(&self) -> usize {
        self.required
    }

    /// Judge one group
    #[must_use]
    pub fn verdict(&self, group: &AssetGroup) -> ValidationVerdict {
        let primary_count = group.primary_count();
        let secondary_count = group.secondary_count();
        ValidationVerdict {
            group_key: group.group_key().clone(),
            is_complete: primary_count == self.required && secondary_count == self.required,
            primary_count,
            secondary_count,
        }
    }

    /// Keep the complete groups, logging one warning per incomplete group
    /// and one summary line
    pub fn validate(&self, grouping: &Grouping, log: &mut LogStream) -> ValidationReport {
        if !grouping.matched_any() {
            log.error("No images matched the recognition pattern in the input prefix.");
            return ValidationReport {
                valid: BTreeMap::new(),
                verdicts: Vec::new(),
                summary: CompletenessSummary::NoMatches,
            };
        }

        let mut valid = BTreeMap::new();
        let mut verdicts = Vec::with_capacity(grouping.len());
        for (group_key, group) in grouping.groups() {
            let verdict = self.verdict(group);
            if verdict.is_complete {
                valid.insert(group_key.clone(), group.clone());
            } else {
                log.warning(format!(
                    "Group '{}' does not have required count: V={}, I={}",
                    group_key, verdict.primary_count, verdict.secondary_count
                ));
            }
            verdicts.push(verdict);
        }

        let summary = if valid.is_empty() {
            log.error("No group has the required count of V and I images.");
            CompletenessSummary::NoneComplete
        } else if valid.len() == grouping.len() {
            log.info(format!(
                "All groups have {n} V-images and {n} I-images.",
                n = self.required
            ));
            CompletenessSummary::AllComplete
        } else {
            log.info("Some groups are valid, some are missing images.");
            CompletenessSummary::Partial
        };

        ValidationReport {
            valid,
            verdicts,
            summary,
        }
    }
}
