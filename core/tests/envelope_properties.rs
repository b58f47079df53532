//! Property tests for the wire envelope codec.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chrono::Utc;
use partnerflow_core::envelope::{CorrelationId, Envelope, Message};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Probe {
    text: String,
    number: i64,
    flags: Vec<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    maybe: Option<String>,
}

impl Message for Probe {
    const KIND: &'static str = "Probe";
}

proptest! {
    #[test]
    fn frame_roundtrip_preserves_payload(
        text in ".*",
        number in any::<i64>(),
        flags in proptest::collection::vec(any::<bool>(), 0..8),
        maybe in proptest::option::of("[a-z]{0,12}"),
    ) {
        let probe = Probe { text, number, flags, maybe };
        let envelope =
            Envelope::enclose(&probe, CorrelationId::new(), "tests", Utc::now()).unwrap();

        let bytes = envelope.to_bytes().unwrap();
        let parsed = Envelope::from_bytes(&bytes).unwrap();

        prop_assert_eq!(parsed.message_id, envelope.message_id);
        prop_assert_eq!(parsed.correlation_id, envelope.correlation_id);
        prop_assert_eq!(parsed.emitted_at, envelope.emitted_at);

        let decoded: Probe = parsed.open().unwrap();
        prop_assert_eq!(decoded, probe);
    }

    #[test]
    fn correlation_survives_re_enclosure(seed in any::<u64>()) {
        // A worker derives an outbound event from an inbound command; the
        // correlation id must survive unchanged while the message id is fresh.
        let correlation = CorrelationId::new();
        let inbound = Envelope::enclose(
            &Probe { text: seed.to_string(), number: 0, flags: vec![], maybe: None },
            correlation,
            "tests",
            Utc::now(),
        ).unwrap();

        let outbound = Envelope::enclose(
            &Probe { text: "derived".to_string(), number: 1, flags: vec![], maybe: None },
            inbound.correlation_id,
            "tests",
            Utc::now(),
        ).unwrap();

        prop_assert_eq!(outbound.correlation_id, correlation);
        prop_assert_ne!(outbound.message_id, inbound.message_id);
    }
}
