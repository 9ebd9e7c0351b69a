use proptest::prelude::*;
use test_case::test_case;

use super::*;

#[test]
fn test_join() {
    assert_eq!(join_secret_prefix("abc123", "alerts"), "abc123/alerts");
    assert_eq!(join_secret_prefix("abc123", "a/b/c"), "abc123/a/b/c");
}

#[test_case("abc123", "abc123/alerts" => "alerts" ; "strips prefix")]
#[test_case("abc123", "xyz/alerts" => "xyz/alerts" ; "foreign prefix passes through")]
#[test_case("abc", "abc123/alerts" => "abc123/alerts" ; "prefix must end at a level boundary")]
#[test_case("abc123", "abc123" => "abc123" ; "bare prefix passes through")]
#[test_case("abc123", "abc123/" => "" ; "empty raw topic")]
#[test_case("abc123", "abc123/abc123/x" => "abc123/x" ; "strips only once")]
fn test_remove(prefix: &str, wire: &str) -> String {
    remove_secret_prefix(prefix, wire).to_string()
}

#[test_case("alerts" => true)]
#[test_case("reminder/drink-water" => true)]
#[test_case("" => false)]
#[test_case("a/+" => false)]
#[test_case("a/#" => false)]
#[test_case("a\0b" => false)]
fn test_validate_raw_topic(raw: &str) -> bool {
    validate_raw_topic(raw).is_ok()
}

#[test_case("abc123" => true)]
#[test_case("my-secret_key.v2" => true)]
#[test_case("" => false)]
#[test_case("a/b" => false)]
#[test_case("a+" => false)]
#[test_case("#" => false)]
fn test_validate_secret_prefix(prefix: &str) -> bool {
    validate_secret_prefix(prefix).is_ok()
}

proptest! {
    #[test]
    fn prop_prefix_roundtrip(
        prefix in "[a-zA-Z0-9_\\-]{1,32}",
        raw in "[a-zA-Z0-9_\\-]{1,16}(/[a-zA-Z0-9_\\-]{0,16}){0,4}",
    ) {
        let wire = join_secret_prefix(&prefix, &raw);
        prop_assert_eq!(remove_secret_prefix(&prefix, &wire), raw.as_str());
    }

    #[test]
    fn prop_join_is_injective(
        prefix in "[a-z0-9]{1,8}",
        a in "[a-z0-9/]{1,12}",
        b in "[a-z0-9/]{1,12}",
    ) {
        prop_assume!(a != b);
        prop_assert_ne!(join_secret_prefix(&prefix, &a), join_secret_prefix(&prefix, &b));
    }
}
