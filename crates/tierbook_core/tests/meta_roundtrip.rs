use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use tierbook_core::{
    AttrDescriptor, LogicalType, MetaError, MetaValue, SchemaRegistry, TierClass, TierKind,
    Visibility,
};

fn registry_with(name: &str, logical: LogicalType) -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(name, AttrDescriptor::new(name, logical, Visibility::Core))
        .unwrap();
    registry
}

fn assert_round_trip(name: &str, logical: LogicalType, value: MetaValue) {
    let registry = registry_with(name, logical);
    let raw = registry.encode(name, &value).unwrap();
    assert_eq!(registry.decode(name, Some(&raw)).unwrap(), value);
}

#[test]
fn every_logical_type_round_trips() {
    assert_round_trip("note", LogicalType::Str, MetaValue::Str("free text".into()));
    assert_round_trip("count", LogicalType::Int, MetaValue::Int(-42));
    assert_round_trip("ratio", LogicalType::Float, MetaValue::Float(0.125));
    assert_round_trip("flag", LogicalType::Bool, MetaValue::Bool(true));
    assert_round_trip(
        "due",
        LogicalType::Date,
        MetaValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
    );
    assert_round_trip(
        "started",
        LogicalType::DateTime,
        MetaValue::DateTime(Utc.with_ymd_and_hms(2023, 7, 1, 9, 30, 0).unwrap()),
    );
    assert_round_trip(
        "phase",
        LogicalType::Literal(vec!["solid".into(), "liquid".into()]),
        MetaValue::Str("liquid".into()),
    );
}

#[test]
fn dates_persist_as_iso_text() {
    let registry = registry_with("due", LogicalType::Date);
    let raw = registry
        .encode(
            "due",
            &MetaValue::Date(NaiveDate::from_ymd_opt(2024, 10, 10).unwrap()),
        )
        .unwrap();
    assert_eq!(raw, json!("2024-10-10"));
}

#[test]
fn literal_rejects_values_outside_the_set() {
    let registry = registry_with("phase", LogicalType::Literal(vec!["solid".into()]));
    let err = registry.decode("phase", Some(&json!("plasma"))).unwrap_err();
    assert!(matches!(err, MetaError::TypeMismatch { attr, .. } if attr == "phase"));

    let err = registry
        .encode("phase", &MetaValue::Str("plasma".into()))
        .unwrap_err();
    assert!(matches!(err, MetaError::TypeMismatch { .. }));
}

#[test]
fn type_mismatch_carries_the_offending_raw_value() {
    let registry = registry_with("count", LogicalType::Int);
    let err = registry.decode("count", Some(&json!("seven"))).unwrap_err();
    match err {
        MetaError::TypeMismatch { raw, expected, .. } => {
            assert_eq!(raw, json!("seven"));
            assert_eq!(expected, "integer");
        }
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
}

#[test]
fn integers_decode_into_floats_where_declared() {
    let registry = registry_with("ratio", LogicalType::Float);
    assert_eq!(
        registry.decode("ratio", Some(&json!(3))).unwrap(),
        MetaValue::Float(3.0)
    );
}

fn stock_attrs(registry: &mut SchemaRegistry) {
    registry
        .register(
            "started",
            AttrDescriptor::new("Started", LogicalType::DateTime, Visibility::Core),
        )
        .unwrap();
    registry
        .register(
            "operator",
            AttrDescriptor::new("Operator", LogicalType::Str, Visibility::Core),
        )
        .unwrap();
}

#[test]
fn both_registration_styles_yield_the_same_schema() {
    // Up-front style: the registry is complete before the class sees it.
    let mut up_front = SchemaRegistry::new();
    stock_attrs(&mut up_front);
    let up_front_class = TierClass::new("Run", TierKind::ContentBearing, r"\d+", "R{}")
        .unwrap()
        .with_schema(up_front)
        .unwrap();

    // Detachable style: the class connects first, fields arrive later from
    // a caller that does not own the class.
    let handle = SchemaRegistry::new().into_handle();
    let detached_class = TierClass::new("Run", TierKind::ContentBearing, r"\d+", "R{}").unwrap();
    detached_class.connect_schema(handle.clone()).unwrap();
    stock_attrs(&mut handle.write().unwrap());

    let lhs = up_front_class.schema().unwrap().read().unwrap().describe();
    let rhs = detached_class.schema().unwrap().read().unwrap().describe();
    assert_eq!(lhs, rhs);
}

#[test]
fn one_registry_can_back_cooperating_classes() {
    let handle = SchemaRegistry::new().into_handle();
    stock_attrs(&mut handle.write().unwrap());

    let first = TierClass::new("Run", TierKind::ContentBearing, r"\d+", "R{}").unwrap();
    let second = TierClass::new("Rerun", TierKind::ContentBearing, r"\d+", "RR{}").unwrap();
    first.connect_schema(handle.clone()).unwrap();
    second.connect_schema(handle.clone()).unwrap();

    // A field registered afterwards shows up through both classes.
    handle
        .write()
        .unwrap()
        .register(
            "batch",
            AttrDescriptor::new("Batch", LogicalType::Int, Visibility::Private),
        )
        .unwrap();
    for class in [&first, &second] {
        let schema = class.schema().unwrap().read().unwrap().describe();
        assert!(schema.properties.contains_key("batch"));
    }
}
