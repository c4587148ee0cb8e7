//! Scenario tests for the compatibility resolver (C13) mirroring spec.md
//! §8's worked examples, plus one test showing it gating actual behavior in
//! a caller (the pattern a binding built on this crate would use it for:
//! deciding which of two code paths to take, not just reporting a bool).

use edgestore_core::compat::CompatibilityResolver;

#[test]
fn a_worker_pinned_to_an_old_date_keeps_every_default_gated_feature_off() {
    let resolver = CompatibilityResolver::new("2021-01-01", &[]);
    assert!(!resolver.is_enabled("formdata_parser_supports_files"));
    assert!(!resolver.is_enabled("fetch_refuses_unknown_protocols"));
    assert!(!resolver.is_enabled("durable_object_fetch_requires_full_url"));
}

#[test]
fn a_worker_pinned_past_every_default_date_gets_every_feature_on() {
    let resolver = CompatibilityResolver::new("2030-01-01", &[]);
    assert!(resolver.is_enabled("formdata_parser_supports_files"));
    assert!(resolver.is_enabled("fetch_refuses_unknown_protocols"));
    assert!(resolver.is_enabled("durable_object_fetch_requires_full_url"));
}

#[test]
fn explicit_flags_can_diverge_per_feature_independent_of_the_pinned_date() {
    // One feature opted in early, a second explicitly held back, a third
    // left to the date default — all against the same compatibility date.
    let resolver = CompatibilityResolver::new(
        "2021-01-01",
        &[
            "fetch_refuses_unknown_protocols".to_string(),
            "durable_object_fetch_allows_relative_url".to_string(),
        ],
    );
    assert!(!resolver.is_enabled("formdata_parser_supports_files"));
    assert!(resolver.is_enabled("fetch_refuses_unknown_protocols"));
    assert!(!resolver.is_enabled("durable_object_fetch_requires_full_url"));
}

#[test]
fn redeploy_with_an_advanced_date_reports_a_change_and_flips_the_right_feature() {
    let mut resolver = CompatibilityResolver::new("2021-11-02", &[]);
    assert!(!resolver.is_enabled("formdata_parser_supports_files"));

    let changed = resolver.update("2021-11-03", &[]);
    assert!(changed);
    assert!(resolver.is_enabled("formdata_parser_supports_files"));
    // Unrelated features' later default dates are untouched by this bump.
    assert!(!resolver.is_enabled("fetch_refuses_unknown_protocols"));
}

fn pick_url_parsing_strategy(resolver: &CompatibilityResolver, relative: &str) -> String {
    if resolver.is_enabled("durable_object_fetch_requires_full_url") {
        format!("rejected: {relative} is not an absolute URL")
    } else {
        format!("resolved-against-origin: {relative}")
    }
}

#[test]
fn resolved_flag_actually_changes_a_caller_branch_not_just_a_reported_bool() {
    let old = CompatibilityResolver::new("2021-01-01", &[]);
    let new = CompatibilityResolver::new("2022-01-01", &[]);

    assert_eq!(pick_url_parsing_strategy(&old, "/a/b"), "resolved-against-origin: /a/b");
    assert!(pick_url_parsing_strategy(&new, "/a/b").starts_with("rejected"));
}
