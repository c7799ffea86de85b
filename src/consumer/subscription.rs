use std::collections::HashSet;

use crate::client::SubscriptionData;
use crate::Error;

const SUB_ALL: &str = "*";
pub const TAG_EXPRESSION: &str = "TAG";

/// Parses a tag expression (`"TAG_A || TAG_B"` or `"*"`) into a `SubscriptionData`, matching
/// the Java/C++ client's `FilterAPI.buildSubscriptionData`.
pub fn build_subscription_data(topic: &str, sub_expression: &str) -> Result<SubscriptionData, Error> {
    let sub_expression = sub_expression.trim();
    let mut tags_set = HashSet::new();
    let mut code_set = HashSet::new();
    if sub_expression.is_empty() || sub_expression == SUB_ALL {
        return Ok(SubscriptionData {
            class_filter_mode: false,
            topic: topic.to_string(),
            sub_string: SUB_ALL.to_string(),
            tags_set,
            code_set,
            sub_version: now_millis(),
            expression_type: TAG_EXPRESSION.to_string(),
        });
    }
    for tag in sub_expression.split("||") {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        code_set.insert(tag_hash_code(tag).to_string());
        tags_set.insert(tag.to_string());
    }
    if tags_set.is_empty() {
        return Err(Error::InvalidSubscription(format!(
            "empty tags in subscription expression: {}",
            sub_expression
        )));
    }
    Ok(SubscriptionData {
        class_filter_mode: false,
        topic: topic.to_string(),
        sub_string: sub_expression.to_string(),
        tags_set,
        code_set,
        sub_version: now_millis(),
        expression_type: TAG_EXPRESSION.to_string(),
    })
}

/// Java `String#hashCode`, used for the server-side pre-filter code set.
fn tag_hash_code(tag: &str) -> i32 {
    tag.chars().fold(0i32, |hash, c| {
        hash.wrapping_mul(31).wrapping_add(c as i32)
    })
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc() - time::OffsetDateTime::UNIX_EPOCH).whole_milliseconds() as i64
}

/// Re-checks a message's tag against the subscription client-side; the broker's tag filter
/// is best-effort so every delivered message is checked again before dispatch.
pub fn tag_matches(sub: &SubscriptionData, tag: Option<&str>) -> bool {
    if sub.sub_string == SUB_ALL || sub.tags_set.is_empty() {
        return true;
    }
    match tag {
        Some(tag) => sub.tags_set.contains(tag),
        None => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_subscription_data_match_all() {
        let sub = build_subscription_data("topic", "*").unwrap();
        assert_eq!(sub.sub_string, "*");
        assert!(sub.tags_set.is_empty());
    }

    #[test]
    fn test_build_subscription_data_multi_tags() {
        let sub = build_subscription_data("topic", "TAG_A || TAG_B").unwrap();
        assert!(sub.tags_set.contains("TAG_A"));
        assert!(sub.tags_set.contains("TAG_B"));
        assert_eq!(sub.code_set.len(), 2);
    }

    #[test]
    fn test_tag_matches() {
        let sub = build_subscription_data("topic", "TAG_A || TAG_B").unwrap();
        assert!(tag_matches(&sub, Some("TAG_A")));
        assert!(!tag_matches(&sub, Some("TAG_C")));
        assert!(!tag_matches(&sub, None));

        let sub_all = build_subscription_data("topic", "*").unwrap();
        assert!(tag_matches(&sub_all, None));
        assert!(tag_matches(&sub_all, Some("anything")));
    }
}
