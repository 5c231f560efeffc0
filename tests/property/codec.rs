//! Property-based tests for the line codec.
//!
//! Uses proptest to verify:
//! 1. Keyed text, image, document, like, edit and delete frames survive
//!    encode → decode unchanged.
//! 2. A tagged frame missing one of its fields decodes to nothing.
//! 3. Arbitrary input lines never cause a panic in `decode`.

use lanchat_proto::codec;
use lanchat_proto::event::{ChatEvent, MessageIdentity};
use proptest::prelude::*;

// --- Strategies ---

/// Identities in the `<sender>_<millis>` shape produced by real peers.
fn arb_identity() -> impl Strategy<Value = MessageIdentity> {
    ("[A-Za-z][A-Za-z0-9 -]{0,15}", 0i64..=4_102_444_800_000)
        .prop_map(|(sender, ts)| MessageIdentity::synthesize(&sender, ts))
}

/// Free text without line breaks; colons allowed.
fn arb_body() -> impl Strategy<Value = String> {
    "[^\r\n]{0,200}"
}

/// Text that is followed by further fields on the wire.
fn arb_field() -> impl Strategy<Value = String> {
    "[^:\r\n]{0,64}"
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

fn arb_text() -> impl Strategy<Value = ChatEvent> {
    (arb_identity(), arb_body()).prop_map(|(unique_id, body)| ChatEvent::Text { unique_id, body })
}

fn arb_image() -> impl Strategy<Value = ChatEvent> {
    (arb_identity(), arb_field(), arb_payload()).prop_map(|(unique_id, caption, payload)| {
        ChatEvent::Image {
            unique_id,
            caption,
            payload,
        }
    })
}

fn arb_document() -> impl Strategy<Value = ChatEvent> {
    (arb_identity(), arb_field(), any::<u64>(), arb_payload()).prop_map(
        |(unique_id, file_name, file_size, payload)| ChatEvent::Document {
            unique_id,
            file_name,
            file_size,
            payload,
        },
    )
}

fn arb_mutation() -> impl Strategy<Value = ChatEvent> {
    prop_oneof![
        (
            arb_identity(),
            any::<bool>(),
            prop::option::of("[A-Za-z0-9]{1,16}")
        )
            .prop_map(|(unique_id, liked, actor)| ChatEvent::Like {
                unique_id,
                liked,
                actor,
            }),
        (arb_identity(), arb_body()).prop_map(|(unique_id, new_body)| ChatEvent::Edit {
            unique_id,
            new_body,
        }),
        arb_identity().prop_map(|unique_id| ChatEvent::Delete { unique_id }),
    ]
}

// --- Property tests ---

proptest! {
    /// Keyed text survives a round-trip, including colons in the body.
    #[test]
    fn text_round_trip(event in arb_text()) {
        let line = codec::encode(&event);
        prop_assert_eq!(codec::decode(&line), Some(event));
    }

    /// Images survive a round-trip with their payload bytes intact.
    #[test]
    fn image_round_trip(event in arb_image()) {
        let line = codec::encode(&event);
        prop_assert_eq!(codec::decode(&line), Some(event));
    }

    /// Documents survive a round-trip with name, size and payload intact.
    #[test]
    fn document_round_trip(event in arb_document()) {
        let line = codec::encode(&event);
        prop_assert_eq!(codec::decode(&line), Some(event));
    }

    /// Like, edit and delete commands survive a round-trip.
    #[test]
    fn mutation_round_trip(event in arb_mutation()) {
        let line = codec::encode(&event);
        prop_assert_eq!(codec::decode(&line), Some(event));
    }

    /// An image frame without its caption field is dropped.
    #[test]
    fn image_missing_field_dropped(id in arb_identity(), payload in arb_payload()) {
        let line = format!("IMG:{id}:{}", base64_of(&payload));
        prop_assert_eq!(codec::decode(&line), None);
    }

    /// A document frame without its size field is dropped.
    #[test]
    fn document_missing_field_dropped(
        id in arb_identity(),
        name in arb_field(),
        payload in arb_payload(),
    ) {
        let line = format!("DOC:{id}:{name}:{}", base64_of(&payload));
        prop_assert_eq!(codec::decode(&line), None);
    }

    /// A text frame without its body separator is dropped.
    #[test]
    fn text_missing_field_dropped(id in arb_identity()) {
        let line = format!("MSG:{id}");
        prop_assert_eq!(codec::decode(&line), None);
    }

    /// Arbitrary lines never panic the decoder.
    #[test]
    fn arbitrary_lines_decode_no_panic(line in ".{0,512}") {
        let _ = codec::decode(&line);
    }

    /// Arbitrary lines behind a valid tag never panic the decoder.
    #[test]
    fn tagged_garbage_decode_no_panic(
        tag in prop::sample::select(codec::Tag::ALL.to_vec()),
        rest in ".{0,256}",
    ) {
        let line = format!("{}{rest}", tag.prefix());
        let _ = codec::decode(&line);
    }
}

/// Encodes bytes the way the codec does, by round-tripping through an image frame.
fn base64_of(payload: &[u8]) -> String {
    let line = codec::encode(&ChatEvent::Image {
        unique_id: MessageIdentity::new("x"),
        caption: String::new(),
        payload: payload.to_vec(),
    });
    line.strip_prefix("IMG:x::").unwrap_or_default().to_string()
}
