use earbox_core::grouping::{deserialize_keyed, AssetGrouper, MemberTag};
use earbox_core::types::{GroupKey, LogLevel, ObjectKey};
use earbox_core::validation::{CompletenessSummary, GroupValidator, REQUIRED_MEMBER_COUNT};
use earbox_test_utils::{
    group_keys, open_test_stream, InMemoryLogSink, TEST_LOG_GROUP, TEST_LOG_STREAM,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn keys(names: &[&str]) -> Vec<ObjectKey> {
    names.iter().map(|n| ObjectKey::new(*n)).collect()
}

fn warnings(sink: &InMemoryLogSink) -> Vec<String> {
    sink.messages(TEST_LOG_GROUP, TEST_LOG_STREAM, LogLevel::Warning)
}

fn errors(sink: &InMemoryLogSink) -> Vec<String> {
    sink.messages(TEST_LOG_GROUP, TEST_LOG_STREAM, LogLevel::Error)
}

fn infos(sink: &InMemoryLogSink) -> Vec<String> {
    sink.messages(TEST_LOG_GROUP, TEST_LOG_STREAM, LogLevel::Info)
}

#[test]
fn test_complete_group_is_valid() {
    let listing = group_keys("input_folder/", "xM@session1.jpg", 6, 6);
    let grouping = AssetGrouper::new().group(&listing);

    let sink = Arc::new(InMemoryLogSink::new());
    let mut log = open_test_stream(&sink);
    let report = GroupValidator::new().validate(&grouping, &mut log);

    assert_eq!(report.summary, CompletenessSummary::AllComplete);
    let group = &report.valid[&GroupKey::new("xM@session1.jpg")];
    assert_eq!(group.primary_count(), 6);
    assert_eq!(group.secondary_count(), 6);
    assert!(warnings(&sink).is_empty());
    assert_eq!(infos(&sink), vec!["All groups have 6 V-images and 6 I-images."]);
}

#[test]
fn test_incomplete_group_is_warned_and_excluded() {
    let listing = group_keys("input_folder/", "2U@run.jpg", 5, 6);
    let grouping = AssetGrouper::new().group(&listing);

    let sink = Arc::new(InMemoryLogSink::new());
    let mut log = open_test_stream(&sink);
    let report = GroupValidator::new().validate(&grouping, &mut log);

    assert!(report.valid.is_empty());
    assert_eq!(report.summary, CompletenessSummary::NoneComplete);
    assert_eq!(
        warnings(&sink),
        vec!["Group '2U@run.jpg' does not have required count: V=5, I=6"]
    );
    assert_eq!(
        errors(&sink),
        vec!["No group has the required count of V and I images."]
    );
}

#[test]
fn test_no_matching_names_reports_single_error() {
    let listing = keys(&["input_folder/readme.txt", "input_folder/photo.jpg", "input_folder/session_para"]);
    let grouping = AssetGrouper::new().group(&listing);
    assert!(!grouping.matched_any());

    let sink = Arc::new(InMemoryLogSink::new());
    let mut log = open_test_stream(&sink);
    let report = GroupValidator::new().validate(&grouping, &mut log);

    assert_eq!(report.summary, CompletenessSummary::NoMatches);
    assert!(report.valid.is_empty());
    assert_eq!(
        errors(&sink),
        vec!["No images matched the recognition pattern in the input prefix."]
    );
    assert!(warnings(&sink).is_empty());
}

#[test]
fn test_one_over_required_count_is_incomplete() {
    let listing = group_keys("in/", "xM@big.jpg", 6, 7);
    let grouping = AssetGrouper::new().group(&listing);
    let group = grouping.get(&GroupKey::new("xM@big.jpg")).unwrap();
    assert_eq!(group.secondary_count(), 7);

    let verdict = GroupValidator::new().verdict(group);
    assert!(!verdict.is_complete);
}

#[test]
fn test_partial_summary() {
    let mut listing = group_keys("in/", "xM@a.jpg", 6, 6);
    listing.extend(group_keys("in/", "xM@b.jpg", 6, 3));
    let grouping = AssetGrouper::new().group(&listing);

    let sink = Arc::new(InMemoryLogSink::new());
    let mut log = open_test_stream(&sink);
    let report = GroupValidator::new().validate(&grouping, &mut log);

    assert_eq!(report.summary, CompletenessSummary::Partial);
    assert!(report.summary.has_valid_groups());
    assert_eq!(report.valid.len(), 1);
    assert_eq!(report.verdicts.len(), 2);
    assert_eq!(
        infos(&sink),
        vec!["Some groups are valid, some are missing images."]
    );
}

#[test]
fn test_members_keep_listing_order_and_folder() {
    let listing = keys(&[
        "in/b/V2xM@s.jpg",
        "in/a/V1xM@s.jpg",
        "in/I1xM@s.jpg",
        "in/V1xM@s.png",
        "in/v1xM@s.jpg",
        "in/V7xM@s.jpg",
        "in/V1xN@s.jpg",
    ]);
    let grouping = AssetGrouper::new().group(&listing);

    assert_eq!(grouping.len(), 1);
    let group = grouping.get(&GroupKey::new("xM@s.jpg")).unwrap();
    assert_eq!(
        group.members(MemberTag::Primary),
        &keys(&["in/b/V2xM@s.jpg", "in/a/V1xM@s.jpg"])[..]
    );
    assert_eq!(group.members(MemberTag::Secondary), &keys(&["in/I1xM@s.jpg"])[..]);
}

#[test]
fn test_group_serializes_with_marker_names() {
    let grouping = AssetGrouper::new().group(&keys(&["in/V1xM@s.jpg", "in/I2xM@s.jpg"]));
    let json = serde_json::to_value(grouping.groups()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "xM@s.jpg": { "V": ["in/V1xM@s.jpg"], "I": ["in/I2xM@s.jpg"] } })
    );
}

#[test]
fn test_deserialized_groups_keep_their_keys() {
    let grouping = AssetGrouper::new().group(&keys(&["in/V1xM@s.jpg", "in/I2xM@s.jpg", "in/V1xM@t.jpg"]));
    let json = serde_json::to_value(grouping.groups()).unwrap();

    let restored = deserialize_keyed(json).unwrap();
    assert_eq!(&restored, grouping.groups());
    for (key, group) in &restored {
        assert_eq!(group.group_key(), key);
    }
}

fn member_name() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just('V'), Just('I')],
        1..=6u8,
        prop_oneof![Just("xM".to_string()), (0..=9u8).prop_map(|d| format!("{d}U"))],
        prop_oneof![Just("a"), Just("b"), Just("c")],
    )
        .prop_map(|(marker, digit, second, session)| format!("in/{marker}{digit}{second}@{session}.jpg"))
}

proptest! {
    #[test]
    fn prop_grouping_is_deterministic(names in proptest::collection::vec(member_name(), 0..40)) {
        let listing: Vec<ObjectKey> = names.into_iter().map(ObjectKey::new).collect();
        let first = AssetGrouper::new().group(&listing);
        let second = AssetGrouper::new().group(&listing);
        prop_assert_eq!(&first, &second);

        let members: usize = first
            .groups()
            .values()
            .map(|g| g.primary_count() + g.secondary_count())
            .sum();
        prop_assert_eq!(members, listing.len());
    }

    #[test]
    fn prop_valid_groups_have_exact_counts(names in proptest::collection::vec(member_name(), 0..60)) {
        let listing: Vec<ObjectKey> = names.into_iter().map(ObjectKey::new).collect();
        let grouping = AssetGrouper::new().group(&listing);

        let sink = Arc::new(InMemoryLogSink::new());
        let mut log = open_test_stream(&sink);
        let report = GroupValidator::new().validate(&grouping, &mut log);

        for group in report.valid.values() {
            prop_assert_eq!(group.primary_count(), REQUIRED_MEMBER_COUNT);
            prop_assert_eq!(group.secondary_count(), REQUIRED_MEMBER_COUNT);
        }
        let incomplete = grouping.len() - report.valid.len();
        prop_assert_eq!(warnings(&sink).len(), incomplete);
    }
}

#[test]
fn test_single_group_missing_one_secondary() {
    let mut listing = group_keys("", "xM@a.jpg", 6, 6);
    listing.retain(|k| k.as_str() != "I4xM@a.jpg");
    let grouping = AssetGrouper::new().group(&listing);
    assert!(grouping.matched_any());

    let sink = Arc::new(InMemoryLogSink::new());
    let mut log = open_test_stream(&sink);
    let report = GroupValidator::new().validate(&grouping, &mut log);

    assert!(report.valid.is_empty());
    assert_eq!(
        warnings(&sink),
        vec!["Group 'xM@a.jpg' does not have required count: V=6, I=5"]
    );
    assert_eq!(errors(&sink).len(), 1);
}
