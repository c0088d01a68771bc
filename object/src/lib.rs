mod value;
mod class_id;
mod header;
mod objects;
mod strings;
pub mod bigint;

pub use value::{ObjectId, SMI_BITS, SMI_MAX, SMI_MIN, Value};
pub use class_id::{ClassId, ObjectKind, TypedDataKind};
pub use header::{Header, HeaderFlags, MAX_CLASS_ID};
pub use objects::{
    Array, Bigint, Bool, Class, ClassFlags, Closure, ClosureData, Code,
    Context, Double, ExactnessState, ExternalFinalizer, ExternalTypedData,
    Field, FourByteString, Function, FunctionKind, GrowableObjectArray,
    HashCache, ICData, Instance, Instructions, Library, LinkedHashMap, Mint,
    MirrorReference, Object, OneByteString, ReceivePort, Script, ScriptKind,
    SendPort, StackMap, TwoByteString, Type, TypeArguments, TypeParameter,
    TypeRef, TypeState, TypedData, UserTag, Variant,
};
pub use strings::{
    CodePoints, STRING_HASH_BITS, StrRef, combine_hash, finalize_hash,
    hash_str, string_object,
};

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value ──────────────────────────────────────────────────────

    #[test]
    fn smi_range_boundaries() {
        assert_eq!(Value::smi(SMI_MAX), Some(Value::Smi(SMI_MAX)));
        assert_eq!(Value::smi(SMI_MIN), Some(Value::Smi(SMI_MIN)));
        assert_eq!(Value::smi(SMI_MAX + 1), None);
        assert_eq!(Value::smi(SMI_MIN - 1), None);
        assert_eq!(Value::smi(i64::MAX), None);
    }

    #[test]
    fn value_accessors() {
        let id = ObjectId::new(7);
        let v = Value::from(id);
        assert!(v.is_object());
        assert_eq!(v.as_object(), Some(id));
        assert_eq!(v.as_smi(), None);
        assert!(Value::default().is_null());
        assert_eq!(Value::Smi(3).as_smi(), Some(3));
    }

    // ── Class ids ──────────────────────────────────────────────────

    #[test]
    fn typed_data_class_ids_are_contiguous() {
        for index in 0..TypedDataKind::COUNT {
            let kind = TypedDataKind::from_index(index).unwrap();
            let cid = ClassId::typed_data(kind);
            assert_eq!(cid.typed_data_kind(), Some(kind));
            assert_eq!(cid.external_typed_data_kind(), None);
            assert_eq!(cid.kind(), ObjectKind::TypedData);

            let ext = ClassId::external_typed_data(kind);
            assert_eq!(ext.external_typed_data_kind(), Some(kind));
            assert_eq!(ext.kind(), ObjectKind::ExternalTypedData);
        }
        assert!(ClassId::OBJECT.0 > ClassId::external_typed_data(TypedDataKind::Float64).0);
    }

    #[test]
    fn program_classes_are_instances() {
        let cid = ClassId(ClassId::NUM_PREDEFINED + 3);
        assert!(!cid.is_predefined());
        assert_eq!(cid.kind(), ObjectKind::Instance);
        assert_eq!(ClassId::IMMUTABLE_ARRAY.kind(), ObjectKind::Array);
        assert!(ClassId::CODE.kind().is_execution_only());
        assert!(ClassId::SEND_PORT.kind().is_native_resource());
        assert!(!ClassId::ARRAY.kind().is_native_resource());
    }

    // ── Header ─────────────────────────────────────────────────────

    #[test]
    fn header_tags_round_trip() {
        let header = Header::with_flags(
            ClassId::TYPE,
            HeaderFlags::CANONICAL | HeaderFlags::IMMUTABLE,
        );
        let decoded = Header::from_tags(header.tags());
        assert_eq!(decoded.class_id(), ClassId::TYPE);
        assert!(decoded.is_canonical());
        assert!(decoded.has_flag(HeaderFlags::IMMUTABLE));
        assert!(!decoded.has_flag(HeaderFlags::FINALIZABLE));
    }

    #[test]
    fn largest_class_id_fits_the_tags_word() {
        let header = Header::with_flags(ClassId(MAX_CLASS_ID), HeaderFlags::CANONICAL);
        let decoded = Header::from_tags(header.tags());
        assert_eq!(decoded.class_id(), ClassId(MAX_CLASS_ID));
        assert!(decoded.is_canonical());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "overflows the tags word")]
    fn oversized_class_id_is_caught() {
        let _ = Header::new(ClassId(MAX_CLASS_ID + 1)).tags();
    }

    #[test]
    fn header_flags_mutate_through_shared_ref() {
        let header = Header::new(ClassId::MINT);
        assert!(!header.is_canonical());
        header.add_flag(HeaderFlags::CANONICAL);
        assert!(header.is_canonical());
        header.remove_flag(HeaderFlags::CANONICAL);
        assert!(!header.is_canonical());
    }

    // ── Objects ────────────────────────────────────────────────────

    #[test]
    fn variant_access() {
        let mut object: Object = Mint { value: 5 }.into();
        assert_eq!(object.kind(), ObjectKind::Mint);
        assert_eq!(Mint::from_object(&object).map(|m| m.value), Some(5));
        assert!(Double::from_object(&object).is_none());
        Mint::from_object_mut(&mut object).unwrap().value = 6;
        assert_eq!(Mint::from_object(&object).unwrap().value, 6);
    }

    #[test]
    fn placeholder_matches_kind() {
        for kind in [ObjectKind::Type, ObjectKind::Array, ObjectKind::Instance] {
            assert_eq!(Object::placeholder(kind).kind(), kind);
        }
    }

    #[test]
    fn hash_cache_never_stores_zero() {
        let cache = HashCache::default();
        assert_eq!(cache.get(), None);
        assert_eq!(cache.set(0), 1);
        assert_eq!(cache.get(), Some(1));
        cache.clear();
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn linked_hash_map_counts_live_pairs() {
        let map = LinkedHashMap {
            entries: vec![
                Some((Value::Smi(1), Value::Smi(2))),
                None,
                Some((Value::Smi(3), Value::Smi(4))),
            ],
            deleted: 1,
            ..Default::default()
        };
        assert_eq!(map.len(), 2);
        assert_eq!(map.live_pairs().count(), 2);
    }

    // ── Strings ────────────────────────────────────────────────────

    #[test]
    fn string_widths_hash_and_compare_equal() {
        let latin = StrRef::Latin1(b"hello");
        let wide: Vec<u16> = "hello".encode_utf16().collect();
        let le: Vec<u8> = wide.iter().flat_map(|u| u.to_le_bytes()).collect();
        let points: Vec<u32> = "hello".chars().map(|c| c as u32).collect();

        let hash = hash_str("hello");
        assert_eq!(latin.hash(), hash);
        assert_eq!(StrRef::Utf16(&wide).hash(), hash);
        assert_eq!(StrRef::Utf16Le(&le).hash(), hash);
        assert_eq!(StrRef::Utf32(&points).hash(), hash);
        assert!(latin.content_eq(StrRef::Utf16Le(&le)));
        assert!(!latin.content_eq(StrRef::Latin1(b"hellp")));
    }

    #[test]
    fn content_eq_across_borrows() {
        let stored = StrRef::Latin1(b"abc");
        let units: Vec<u16> = "abc".encode_utf16().collect();
        {
            let local = vec![b'a', b'b', b'c'];
            assert!(stored.content_eq(StrRef::Latin1(&local)));
            assert!(StrRef::Latin1(&local).content_eq(stored));
        }
        assert!(StrRef::Utf16(&units).content_eq(stored));
        let short = ['a' as u32, 'b' as u32];
        let long = ['a' as u32, 'b' as u32, 'c' as u32];
        assert!(!StrRef::Utf32(&short).content_eq(StrRef::Utf32(&long)));
    }

    #[test]
    fn surrogate_pairs_decode_to_one_code_point() {
        let units: Vec<u16> = "a\u{1F600}".encode_utf16().collect();
        let points: Vec<u32> = StrRef::Utf16(&units).code_points().collect();
        assert_eq!(points, vec!['a' as u32, 0x1F600]);
        assert_eq!(StrRef::Utf16(&units).to_string_lossy(), "a\u{1F600}");
    }

    #[test]
    fn string_object_picks_narrowest_layout() {
        let (cid, object) = string_object("caf\u{e9}");
        assert_eq!(cid, ClassId::ONE_BYTE_STRING);
        assert_eq!(object.string_hash(), Some(hash_str("caf\u{e9}")));

        let (cid, object) = string_object("\u{3b1}\u{3b2}");
        assert_eq!(cid, ClassId::TWO_BYTE_STRING);
        assert_eq!(object.as_str_ref().unwrap().to_string_lossy(), "\u{3b1}\u{3b2}");
    }

    // ── Bigint digits ──────────────────────────────────────────────

    #[test]
    fn bigint_decimal_round_trip() {
        let text = "12345678901234567890";
        let (negative, digits) = bigint::parse(text).unwrap();
        assert!(!negative);
        assert_eq!(digits.len(), 2);
        assert_eq!(bigint::to_decimal(negative, &digits), text);
        assert_eq!(bigint::to_i64(negative, &digits), None);
    }

    #[test]
    fn bigint_hex_and_sign() {
        let (negative, digits) = bigint::parse("-0x100000000").unwrap();
        assert!(negative);
        assert_eq!(digits, vec![0, 1]);
        assert_eq!(bigint::to_hex(negative, &digits), "-0x100000000");
        assert_eq!(bigint::to_decimal(negative, &digits), "-4294967296");
        assert_eq!(bigint::to_i64(negative, &digits), Some(-4294967296));
    }

    #[test]
    fn bigint_i64_extremes() {
        let (negative, digits) = bigint::from_i64(i64::MIN);
        assert_eq!(bigint::to_i64(negative, &digits), Some(i64::MIN));
        assert_eq!(bigint::to_decimal(negative, &digits), i64::MIN.to_string());
        assert_eq!(bigint::parse("-0"), Some((false, vec![])));
        assert_eq!(bigint::parse("12a"), None);
        assert_eq!(bigint::normalize_len(&[1, 0, 0]), 1);
    }
}
