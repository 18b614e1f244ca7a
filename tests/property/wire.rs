//! Property-based checks for the wire protocol and document values.
//!
//! 1. Any client or server frame survives encode → decode.
//! 2. Random bytes never cause a panic in the decoders.
//! 3. Patches applied to arbitrary documents keep array-union set-like.

use proptest::prelude::*;
use taskboard_proto::engine::Snapshot;
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::value::{Document, FieldValue, StoredDocument};
use taskboard_proto::wire::{self, ClientFrame, Operation, Reply, ServerFrame};

/// Scalar values only; floats are kept finite so equality holds.
fn arb_scalar() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Integer),
        (-1.0e9f64..1.0e9).prop_map(FieldValue::Float),
        "[a-zA-Z0-9 ]{0,16}".prop_map(FieldValue::String),
    ]
}

fn arb_value() -> impl Strategy<Value = FieldValue> {
    arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(FieldValue::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(FieldValue::Map),
        ]
    })
}

fn arb_document() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-zA-Z]{1,10}", arb_value(), 0..6)
}

fn arb_stored() -> impl Strategy<Value = StoredDocument> {
    ("[a-z0-9]{1,12}", arb_document()).prop_map(|(id, fields)| StoredDocument::new(id, fields))
}

fn arb_filter() -> impl Strategy<Value = Filter> {
    ("[a-zA-Z]{1,10}", "[a-z0-9]{1,8}").prop_flat_map(|(field, value)| {
        prop_oneof![
            Just(Filter::eq(field.clone(), value.clone())),
            Just(Filter::array_contains(field.clone(), value.clone())),
            Just(Filter::array_contains_id(field, &value)),
        ]
    })
}

fn arb_patch() -> impl Strategy<Value = Patch> {
    prop::collection::vec(
        (
            "[a-zA-Z]{1,8}",
            0u8..3,
            prop::collection::vec(arb_scalar(), 0..3),
        ),
        0..5,
    )
    .prop_map(|updates| {
        updates
            .into_iter()
            .fold(Patch::new(), |patch, (field, kind, values)| match kind {
                0 => patch.set(field, values.into_iter().next().unwrap_or_default()),
                1 => patch.array_union(field, values),
                _ => patch.array_remove(field, values),
            })
    })
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    let collection = "[a-z_]{1,12}";
    prop_oneof![
        (collection, "[a-z0-9]{1,8}").prop_map(|(collection, id)| Operation::Get { collection, id }),
        (collection, "[a-z0-9]{1,8}", arb_patch())
            .prop_map(|(collection, id, patch)| Operation::Update { collection, id, patch }),
        (collection, "[a-z0-9]{1,8}")
            .prop_map(|(collection, id)| Operation::Delete { collection, id }),
        (collection, arb_document())
            .prop_map(|(collection, fields)| Operation::Create { collection, fields }),
        (collection, arb_filter())
            .prop_map(|(collection, filter)| Operation::Query { collection, filter }),
        collection.prop_map(|collection| Operation::List { collection }),
        (any::<u64>(), collection, prop::option::of(arb_filter())).prop_map(
            |(subscription, collection, filter)| Operation::Subscribe {
                subscription,
                collection,
                filter,
            }
        ),
    ]
}

fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        prop::option::of("[a-z0-9]{1,12}").prop_map(|user_id| ClientFrame::Hello { user_id }),
        (any::<u64>(), arb_operation()).prop_map(|(id, op)| ClientFrame::Request { id, op }),
        any::<u64>().prop_map(|subscription| ClientFrame::Unsubscribe { subscription }),
    ]
}

fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        any::<u64>().prop_map(|version| ServerFrame::Welcome { version }),
        (any::<u64>(), prop::option::of(arb_stored())).prop_map(|(id, doc)| ServerFrame::Reply {
            id,
            reply: Reply::Document(doc),
        }),
        (any::<u64>(), any::<u64>()).prop_map(|(id, version)| ServerFrame::Reply {
            id,
            reply: Reply::Written { version },
        }),
        (
            any::<u64>(),
            any::<u64>(),
            prop::collection::vec(arb_stored(), 0..4)
        )
            .prop_map(|(subscription, version, documents)| ServerFrame::Snapshot {
                subscription,
                snapshot: Snapshot { version, documents },
            }),
        ".*".prop_map(|reason| ServerFrame::Error { reason }),
    ]
}

proptest! {
    #[test]
    fn client_frames_round_trip(frame in arb_client_frame()) {
        let bytes = wire::encode_client(&frame).unwrap();
        prop_assert_eq!(wire::decode_client(&bytes).unwrap(), frame);
    }

    #[test]
    fn server_frames_round_trip(frame in arb_server_frame()) {
        let bytes = wire::encode_server(&frame).unwrap();
        prop_assert_eq!(wire::decode_server(&bytes).unwrap(), frame);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = wire::decode_client(&bytes);
        let _ = wire::decode_server(&bytes);
    }

    #[test]
    fn array_union_never_duplicates_new_elements(
        existing in prop::collection::vec(arb_scalar(), 0..6),
        added in prop::collection::vec(arb_scalar(), 0..6),
    ) {
        let mut doc = Document::new();
        doc.insert("members".into(), FieldValue::Array(existing.clone()));
        Patch::new().array_union("members", added.clone()).apply_to(&mut doc);
        let items = doc["members"].as_array().unwrap();
        prop_assert!(items.starts_with(&existing));
        for value in &added {
            prop_assert!(items.contains(value));
            let before = existing.iter().filter(|v| *v == value).count();
            let after = items.iter().filter(|v| *v == value).count();
            prop_assert_eq!(after, before.max(1));
        }
    }
}
