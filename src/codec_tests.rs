use super::*;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cart {
    items: Vec<String>,
    total_cents: u64,
}

struct Unregistered {
    #[allow(dead_code)]
    handle: u32,
}

fn codec() -> AttributeCodec {
    AttributeCodec::new().with_type::<Cart>("shop.cart")
}

#[test]
fn builtin_values_roundtrip() {
    let c = codec();
    let values = vec![
        AttrValue::from("blue"),
        AttrValue::from(42i64),
        AttrValue::from(-7i32),
        AttrValue::from(2.5f64),
        AttrValue::from(true),
        AttrValue::from(vec![0u8, 1, 254, 255]),
        AttrValue::from(json!({"a": [1, 2, {"b": null}], "c": "d"})),
        AttrValue::from(String::new()),
    ];
    for v in values {
        let text = c.encode("k", &v).unwrap();
        assert_eq!(c.decode("k", &text).unwrap(), v, "roundtrip failed for {:?}", v);
    }
}

#[test]
fn encoded_text_is_standard_base64() {
    let text = codec().encode("color", &AttrValue::from("blue")).unwrap();
    assert!(text.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '+' || ch == '/' || ch == '='));
}

#[test]
fn registered_object_roundtrips() {
    let c = codec();
    let cart = Cart { items: vec!["apple".into(), "pear".into()], total_cents: 350 };
    let text = c.encode("cart", &AttrValue::object(cart.clone())).unwrap();
    let back = c.decode("cart", &text).unwrap();
    assert_eq!(back.downcast_ref::<Cart>(), Some(&cart));
    assert!(back.type_name().ends_with("Cart"));
}

#[test]
fn unregistered_object_fails_with_type_name() {
    let err = codec().encode("conn", &AttrValue::object(Unregistered { handle: 3 })).unwrap_err();
    match err {
        SessionError::Serialization { key, type_name, .. } => {
            assert_eq!(key, "conn");
            assert!(type_name.ends_with("Unregistered"), "got {}", type_name);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn malformed_text_is_a_deserialization_error() {
    let err = codec().decode("color", "%%% not base64 %%%").unwrap_err();
    assert!(matches!(err, SessionError::Deserialization { ref key, .. } if key == "color"));
}

#[test]
fn corrupted_payload_is_a_deserialization_error() {
    // valid base64, but not a bincode envelope
    let text = base64::engine::general_purpose::STANDARD.encode([0xffu8, 0xff, 0xff, 0xff, 0x01]);
    assert!(matches!(codec().decode("k", &text), Err(SessionError::Deserialization { .. })));
}

#[test]
fn unknown_tag_is_a_deserialization_error() {
    let text = codec().encode("cart", &AttrValue::object(Cart { items: vec![], total_cents: 0 })).unwrap();
    let bare = AttributeCodec::new();
    let err = bare.decode("cart", &text).unwrap_err();
    assert!(err.to_string().contains("unknown type tag 'shop.cart'"), "got {}", err);
}

#[test]
fn re_registering_a_type_moves_its_tag() {
    let c = AttributeCodec::new().with_type::<Cart>("old").with_type::<Cart>("new");
    assert!(c.is_registered::<Cart>());
    let text = c.encode("cart", &AttrValue::object(Cart { items: vec![], total_cents: 1 })).unwrap();
    assert!(c.decode("cart", &text).unwrap().downcast_ref::<Cart>().is_some());
    let only_old = AttributeCodec::new().with_type::<Cart>("old");
    assert!(only_old.decode("cart", &text).is_err());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Coupon {
    code: String,
}

#[test]
fn tag_taken_by_another_type_unregisters_the_previous_owner() {
    let c = AttributeCodec::new().with_type::<Cart>("shop.item").with_type::<Coupon>("shop.item");
    assert!(!c.is_registered::<Cart>());
    assert!(c.is_registered::<Coupon>());
    let err = c.encode("cart", &AttrValue::object(Cart { items: vec![], total_cents: 1 })).unwrap_err();
    assert!(matches!(err, SessionError::Serialization { .. }));
    let text = c.encode("coupon", &AttrValue::object(Coupon { code: "SPRING".into() })).unwrap();
    let back = c.decode("coupon", &text).unwrap();
    assert_eq!(back.downcast_ref::<Coupon>(), Some(&Coupon { code: "SPRING".into() }));
}

#[test]
fn objects_compare_by_identity() {
    let a = AttrValue::object(Cart { items: vec![], total_cents: 1 });
    let b = a.clone();
    let c = AttrValue::object(Cart { items: vec![], total_cents: 1 });
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(AttrValue::from(1i64), AttrValue::from(1.0f64));
}
