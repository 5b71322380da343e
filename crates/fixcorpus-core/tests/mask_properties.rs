//! Property tests for the masking engine: non-verbatim spans are always
//! rejected, and every accepted mask round-trips.

use std::collections::BTreeSet;
use std::sync::Arc;

use fixcorpus_core::stages::MaskProcessor;
use fixcorpus_core::MaskConfig;
use fixcorpus_oracle::ScriptedOracle;
use proptest::prelude::*;

fn body_from(calls: &BTreeSet<String>) -> String {
    let mut body = String::from("void handler(struct req *r)\n{\n");
    for (i, call) in calls.iter().enumerate() {
        body.push_str(&format!("    {call}(r, {i});\n"));
    }
    body.push('}');
    body
}

fn processor() -> MaskProcessor {
    MaskProcessor::new(Arc::new(ScriptedOracle::new()), MaskConfig::default())
}

proptest! {
    #[test]
    fn non_matching_spans_are_rejected(
        calls in prop::collection::btree_set("[a-z]{3,10}", 1..8),
        bogus in "[A-Z][A-Z_]{4,12}",
        fenced in any::<bool>(),
    ) {
        let body = body_from(&calls);
        let candidate = format!("{bogus}(r, 0);");
        let response = if fenced {
            format!("```c\n{candidate}\n```")
        } else {
            candidate
        };
        prop_assert!(processor().apply_response(&body, &response).is_err());
    }

    #[test]
    fn accepted_spans_round_trip(
        calls in prop::collection::btree_set("[a-z]{3,10}", 1..8),
        pick in any::<prop::sample::Index>(),
        indent in 0usize..6,
        trailing in 0usize..4,
    ) {
        let body = body_from(&calls);
        let chosen: Vec<&String> = calls.iter().collect();
        let i = pick.index(chosen.len());
        let call = chosen[i];
        let response = format!(
            "```c\n{}{call}(r, {i});{}\n```",
            " ".repeat(indent),
            " ".repeat(trailing)
        );

        let masked = processor().apply_response(&body, &response).unwrap();
        prop_assert_eq!(masked.placeholder_count(), 1);
        prop_assert_eq!(&masked.ground_truth, &format!("{call}(r, {i});"));
        prop_assert_eq!(masked.unmask(), body);
    }
}
