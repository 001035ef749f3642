//! Unit tests for the structural cast.

use serde::{Deserialize, Serialize};
use serde_json::json;

use outpost::cast::{from_document, restructure, to_document};
use outpost::AppError;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Narrow {
    name: String,
    count: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct Wide {
    name: String,
    count: u64,
    extra: String,
}

#[test]
fn extra_fields_in_document_are_dropped() {
    let doc = json!({ "name": "agent", "count": 3, "stray": true });

    let narrow: Narrow = from_document(doc).expect("cast with extra fields");
    assert_eq!(
        narrow,
        Narrow {
            name: "agent".to_owned(),
            count: 3
        }
    );
}

#[test]
fn missing_required_field_is_a_cast_error() {
    let doc = json!({ "name": "agent" });

    let err = from_document::<Narrow>(doc).expect_err("count is required");
    assert!(
        matches!(err, AppError::Cast(_)),
        "expected Cast error, got: {err}"
    );
    assert!(err.to_string().contains("count"), "error names the field: {err}");
}

#[test]
fn to_document_then_from_document_round_trips() {
    let value = Narrow {
        name: "roundtrip".to_owned(),
        count: 42,
    };

    let doc = to_document(&value).expect("to_document");
    assert_eq!(doc, json!({ "name": "roundtrip", "count": 42 }));

    let back: Narrow = from_document(doc).expect("from_document");
    assert_eq!(back, value);
}

#[test]
fn restructure_narrows_a_wide_value() {
    let wide = Wide {
        name: "shrink".to_owned(),
        count: 7,
        extra: "dropped".to_owned(),
    };

    let narrow: Narrow = restructure(&wide).expect("restructure");
    assert_eq!(narrow.name, "shrink");
    assert_eq!(narrow.count, 7);
}

#[test]
fn restructure_fails_when_target_requires_more() {
    let narrow = Narrow {
        name: "grow".to_owned(),
        count: 1,
    };

    let err = restructure::<_, Wide>(&narrow).expect_err("extra is required by Wide");
    assert!(matches!(err, AppError::Cast(_)));
}
