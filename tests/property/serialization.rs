//! Property-based tests for the task document schema and relay wire frames.
//!
//! Uses proptest to verify:
//! 1. Any valid `Task` survives document encode → decode unchanged.
//! 2. Dropping any required field makes decoding fail for that document.
//! 3. Any frame survives postcard encode → decode.
//! 4. Random bytes never cause a panic in the frame decoders.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use tasksync_proto::document::{self, FieldValue, decode_task, encode_task};
use tasksync_proto::task::{Category, Priority, Task, TaskId};
use tasksync_proto::wire::{self, ClientFrame, ServerFrame};
use uuid::Uuid;

// --- Strategies ---

/// Timestamps between 1970 and roughly 2100, with sub-second precision.
fn arb_datetime() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap_or_default())
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        any::<u128>(),
        "[a-zA-Z0-9 ]{1,100}",
        "[a-zA-Z0-9 .,]{0,200}",
        prop::sample::select(Priority::ALL.to_vec()),
        prop::sample::select(Category::ALL.to_vec()),
        arb_datetime(),
        prop::option::of(arb_datetime()),
        prop::option::of(arb_datetime()),
        prop::option::of(arb_datetime()),
    )
        .prop_map(
            |(id, title, description, priority, category, created, due, completed, reminder)| {
                Task {
                    id: TaskId::from_uuid(Uuid::from_u128(id)),
                    title,
                    description,
                    priority,
                    category,
                    is_completed: completed.is_some(),
                    created_at: created,
                    due_at: due,
                    completed_at: completed,
                    reminder_at: reminder,
                }
            },
        )
}

fn arb_document() -> impl Strategy<Value = document::Document> {
    arb_task().prop_map(|task| encode_task(&task, Utc::now()))
}

fn arb_client_frame() -> impl Strategy<Value = ClientFrame> {
    prop_oneof![
        (any::<u64>(), ".{0,64}", arb_document()).prop_map(|(request_id, path, document)| {
            ClientFrame::Set {
                request_id,
                path,
                document,
            }
        }),
        (any::<u64>(), ".{0,64}").prop_map(|(request_id, path)| ClientFrame::Get { request_id, path }),
        (any::<u64>(), ".{0,64}")
            .prop_map(|(request_id, path)| ClientFrame::Delete { request_id, path }),
        (any::<u64>(), ".{0,64}").prop_map(|(request_id, collection)| ClientFrame::List {
            request_id,
            collection
        }),
        ".{0,64}".prop_map(|collection| ClientFrame::Subscribe { collection }),
        ".{0,64}".prop_map(|collection| ClientFrame::Unsubscribe { collection }),
    ]
}

fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        any::<u64>().prop_map(|request_id| ServerFrame::Ack { request_id }),
        (any::<u64>(), prop::option::of(arb_document())).prop_map(|(request_id, document)| {
            ServerFrame::Document {
                request_id,
                document,
            }
        }),
        (any::<u64>(), prop::collection::vec(arb_document(), 0..4)).prop_map(
            |(request_id, documents)| ServerFrame::Documents {
                request_id,
                documents
            }
        ),
        (".{0,64}", prop::collection::vec(arb_document(), 0..4)).prop_map(
            |(collection, documents)| ServerFrame::Snapshot {
                collection,
                documents
            }
        ),
        (prop::option::of(any::<u64>()), ".{0,64}")
            .prop_map(|(request_id, reason)| ServerFrame::Error { request_id, reason }),
    ]
}

// --- Property tests ---

proptest! {
    /// Every field of a valid task survives the remote document schema.
    #[test]
    fn task_document_round_trip(task in arb_task()) {
        let doc = encode_task(&task, Utc::now());
        let decoded = decode_task(&doc).expect("decode should succeed");
        prop_assert_eq!(task, decoded);
    }

    /// Removing a required field fails decoding instead of defaulting it.
    #[test]
    fn missing_required_field_fails(
        task in arb_task(),
        field in prop::sample::select(vec![
            document::fields::ID,
            document::fields::TITLE,
            document::fields::DESCRIPTION,
            document::fields::PRIORITY,
            document::fields::CATEGORY,
            document::fields::IS_COMPLETED,
            document::fields::CREATED_DATE,
        ]),
    ) {
        let mut doc = encode_task(&task, Utc::now());
        doc.remove(field);
        prop_assert!(decode_task(&doc).is_err());
    }

    /// A `Null` optional timestamp decodes as absent.
    #[test]
    fn null_due_date_is_absent(task in arb_task()) {
        let mut doc = encode_task(&task, Utc::now());
        doc.insert(document::fields::DUE_DATE.to_string(), FieldValue::Null);
        let decoded = decode_task(&doc).expect("decode should succeed");
        prop_assert_eq!(decoded.due_at, None);
    }

    /// Decoded tasks always satisfy the completion invariant.
    #[test]
    fn decoded_tasks_keep_completion_invariant(task in arb_task(), flag in any::<bool>()) {
        let mut doc = encode_task(&task, Utc::now());
        doc.insert(document::fields::IS_COMPLETED.to_string(), FieldValue::Bool(flag));
        if let Ok(decoded) = decode_task(&doc) {
            prop_assert_eq!(decoded.is_completed, decoded.completed_at.is_some());
        }
    }

    #[test]
    fn client_frame_round_trip(frame in arb_client_frame()) {
        let bytes = wire::encode_client(&frame).expect("encode should succeed");
        let decoded = wire::decode_client(&bytes).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    #[test]
    fn server_frame_round_trip(frame in arb_server_frame()) {
        let bytes = wire::encode_server(&frame).expect("encode should succeed");
        let decoded = wire::decode_server(&bytes).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    /// Random bytes never cause a panic when decoded; they return Err gracefully.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = wire::decode_client(&bytes);
        let _ = wire::decode_server(&bytes);
    }
}
