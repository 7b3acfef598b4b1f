use std::sync::{Mutex, MutexGuard};

use pickle::interpreter::Interpreter;
use pickle::list::List;
use pickle::refs::Arrayref;
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
fn test_add_chains_and_counts() {
    let list = List::new().add(2i64).add("three").add(5.0f64);
    assert_eq!(list.size(), 3);
    assert_eq!(list.at(0).as_int(), 2);
    assert_eq!(list.at(1).as_string(), "three");
    assert_eq!(list.at(2).as_double(), 5.0);
}

#[test]
fn test_push_in_place() {
    let mut list = List::new();
    list.push(1i64);
    list.push(2i64);
    assert_eq!(list.size(), 2);
}

#[test]
fn test_shift_pops_front() {
    let list = List::new().add(7i64).add(14i64);
    assert_eq!(list.shift().as_int(), 7);
    assert_eq!(list.shift().as_int(), 14);
    assert!(!list.shift().defined());
    assert_eq!(list.size(), 0);
}

#[test]
fn test_array_conversion_is_lossless_and_shared() {
    let array = Arrayref::from_elems(&[Scalar::from(1i64)]);
    let list = List::from_array(array.clone());
    assert_eq!(list.size(), 1);

    // Same backing container: growth through either side is visible to
    // the other.
    list.as_array().push(Scalar::from(2i64));
    assert_eq!(array.size(), 2);

    let back: Arrayref = list.into_array();
    assert_eq!(back.size(), 2);
}

#[test]
fn test_checked_construction_requires_sequence_shape() {
    with_interp(|interp| {
        let aref = interp.eval_string("[1, 2, 3]").expect("eval");
        let list = List::checked(interp, &aref).expect("narrow");
        assert_eq!(list.size(), 3);

        let err = List::checked(interp, &Scalar::from("plain")).unwrap_err();
        assert!(err.to_string().contains("ARRAY reference"));

        // The suppressed form trusts the caller.
        let trusted = List::unchecked(&aref);
        assert_eq!(trusted.size(), 3);
    });
}
