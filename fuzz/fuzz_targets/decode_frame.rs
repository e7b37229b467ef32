#![no_main]

use dispatch_core::decode::{Decoded, DomainEvent, decode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding never panics, and an accepted update is always storable.
    if let Ok(Decoded::Event(DomainEvent::ClassificationUpdate { classification, .. })) =
        decode(raw)
    {
        assert!((0.0..=1.0).contains(&classification.confidence));
        assert!(!classification.category.trim().is_empty());
        assert!(!classification.priority.trim().is_empty());
    }
});
