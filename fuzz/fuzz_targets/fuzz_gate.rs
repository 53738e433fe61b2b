#![no_main]

use gate_oracle::{identify_tools, Gate};
use label_comparison::ResultSetDocument;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(document) = serde_json::from_slice::<ResultSetDocument>(data) else {
        return;
    };

    let set = document.result_set();
    if document.relative_comparison(&set.descriptions).is_err() {
        return;
    }
    let Ok(output) = document.label_comparison(&set.descriptions) else {
        return;
    };

    let comparisons = output.comparisons();
    match Gate::evaluate(&comparisons, &output.stats) {
        Ok(gate) => {
            // a failing gate always explains itself
            assert_eq!(gate.passed(), gate.messages().is_empty());
            if !comparisons.is_empty() {
                assert!(identify_tools(&output.stats.tools).is_ok());
            }
        }
        Err(_) => {}
    }
});
