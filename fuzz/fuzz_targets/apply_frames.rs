#![no_main]

use dispatch_core::decode::{Decoded, decode};
use dispatch_core::model::{Issue, IssueStatus};
use dispatch_core::store::Reconciler;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let mut store = Reconciler::new();
    store.load_snapshot((0..8).map(|id| Issue::new(id, id, "fuzz", "acme/fuzz")).collect());

    for line in text.lines() {
        if let Ok(Decoded::Event(event)) = decode(line) {
            store.apply_event(&event);
        }
    }

    assert_eq!(store.len(), 8, "realtime frames never add or drop issues");
    for issue in store.issues() {
        assert_eq!(
            issue.status == IssueStatus::Classified,
            issue.has_classification()
        );
    }
});
