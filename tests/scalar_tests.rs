use std::sync::{Mutex, MutexGuard};

use pickle::interpreter::Interpreter;
use pickle::scalar::Scalar;

static SESSION_LOCK: Mutex<()> = Mutex::new(());

fn with_interp(f: impl FnOnce(&mut Interpreter)) {
    let _guard: MutexGuard<'_, ()> = SESSION_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut interp = Interpreter::new().expect("interpreter should boot");
    f(&mut interp);
}

#[test]
fn test_default_is_undef() {
    let s = Scalar::default();
    assert!(!s.defined());
    assert_eq!(s.length(), None);
    assert!(!s.as_bool());
    assert_eq!(s.as_string(), "");
}

#[test]
fn test_integer_construction_and_coercion() {
    let s = Scalar::from(42i64);
    assert_eq!(s.as_int(), 42);
    assert_eq!(s.as_double(), 42.0);
    assert_eq!(s.as_string(), "42");
    assert!(s.defined());
    assert_eq!(s.length(), Some(2));

    assert_eq!(Scalar::from(-7i32).as_int(), -7);
    assert_eq!(Scalar::from(7u32).as_uint(), 7);
}

#[test]
fn test_wide_unsigned_degrades_to_float() {
    let max = Scalar::from(u64::MAX);
    assert!(max.as_double() > 1.8e19);

    let fits = Scalar::from(u64::from(u32::MAX));
    assert_eq!(fits.as_int(), 4294967295);
}

#[test]
fn test_float_construction() {
    let s = Scalar::from(2.5f64);
    assert_eq!(s.as_double(), 2.5);
    assert_eq!(s.as_int(), 2);
    assert_eq!(s.as_string(), "2.5");
    assert_eq!(Scalar::from(1.5f32).as_double(), 1.5);
}

#[test]
fn test_text_coercion_rules() {
    assert_eq!(Scalar::from("2.1").as_double(), 2.1);
    assert_eq!(Scalar::from("+5.0").as_int(), 5);
    assert_eq!(Scalar::from("  -3x").as_int(), -3);
    assert_eq!(Scalar::from("abc").as_int(), 0);
    assert_eq!(Scalar::from("abc").as_double(), 0.0);
}

#[test]
fn test_truthiness_follows_runtime_rules() {
    assert!(!Scalar::undef().as_bool());
    assert!(!Scalar::from(0i64).as_bool());
    assert!(!Scalar::from("").as_bool());
    assert!(!Scalar::from("0").as_bool());
    assert!(Scalar::from("0.0").as_bool());
    assert!(Scalar::from(-1i64).as_bool());
    assert!(Scalar::from("x").as_bool());
}

#[test]
fn test_bool_construction_matches_coercions() {
    let yes = Scalar::from(true);
    let no = Scalar::from(false);
    assert!(yes.as_bool());
    assert!(!no.as_bool());
    assert_eq!(yes.as_int(), 1);
    assert_eq!(no.as_string(), "");
    assert!(no.eq(&Scalar::from("")));
}

#[test]
fn test_embedded_nul_bytes_via_explicit_form() {
    let s = Scalar::from_bytes(b"a\x00b");
    assert_eq!(s.as_bytes(), b"a\x00b".to_vec());
    assert_eq!(s.length(), Some(3));

    // &str construction takes the whole slice too; there is no
    // stop-at-NUL form in this binding.
    let t = Scalar::from("a\0b");
    assert_eq!(t.length(), Some(3));
}

#[test]
fn test_eq_is_string_equality() {
    assert!(Scalar::from(5i64).eq(&Scalar::from("5")));
    assert!(Scalar::from("baz").eq(&Scalar::from("baz")));
    assert!(!Scalar::from("baz").eq(&Scalar::from("bar")));
    assert!(Scalar::undef().eq(&Scalar::from("")));
}

#[test]
fn test_copy_round_trip_leaves_refcount_unchanged() {
    let s = Scalar::from(7i64);
    let before = s.refcount();
    {
        let copy = s.clone();
        assert_eq!(s.refcount(), before + 1);
        assert_eq!(copy.as_int(), 7);
    }
    assert_eq!(s.refcount(), before);
}

#[test]
fn test_set_updates_all_aliases() {
    let s = Scalar::from(1i64);
    let alias = s.clone();
    s.set(&Scalar::from("changed"));
    assert_eq!(alias.as_string(), "changed");

    // Self-assignment is a no-op, not a hazard.
    s.set(&s.clone());
    s.set(&s);
    assert_eq!(s.as_string(), "changed");
}

#[test]
fn test_ref_kind_on_plain_scalar_is_false() {
    let kind = Scalar::from(5i64).ref_kind();
    assert!(!kind.as_bool());
    assert_eq!(kind.as_string(), "");
}

#[test]
fn test_display_uses_text_coercion() {
    assert_eq!(format!("{}", Scalar::from(42i64)), "42");
    assert_eq!(format!("{}", Scalar::from("hi")), "hi");
    assert_eq!(format!("{}", Scalar::undef()), "");
}

#[test]
fn test_lookup_aliases_the_global_slot() {
    with_interp(|interp| {
        let x = Scalar::lookup(interp, "x");
        assert!(!x.defined());
        x.set(&Scalar::from(41i64));

        let read = interp.eval_string("$x + 1").expect("eval");
        assert_eq!(read.as_int(), 42);

        interp.eval_string("$x = 'reassigned'").expect("eval");
        assert_eq!(x.as_string(), "reassigned");
    });
}

#[test]
fn test_shape_predicates_on_non_refs() {
    with_interp(|interp| {
        let s = Scalar::from(5i64);
        assert!(!s.is_scalarref(interp));
        assert!(!s.is_arrayref(interp));
        assert!(!s.is_hashref(interp));
        assert!(!s.is_coderef(interp));
        assert!(!s.is_globref(interp));
        let err = s.check_arrayref(interp).unwrap_err();
        assert!(err.to_string().contains("ARRAY reference"));
    });
}

#[test]
fn test_shape_predicates_on_real_refs() {
    with_interp(|interp| {
        let aref = interp.eval_string("[1, 2]").expect("eval");
        assert!(aref.is_arrayref(interp));
        assert!(!aref.is_hashref(interp));
        assert!(aref.check_arrayref(interp).is_ok());
        assert_eq!(aref.ref_kind().as_string(), "ARRAY");

        let href = interp.eval_string("{a: 1}").expect("eval");
        assert!(href.is_hashref(interp));
        assert_eq!(href.ref_kind().as_string(), "HASH");
    });
}
