//! End-to-end stories: a host function registered, called from script
//! code, failing back across the bridge, and structured data shared
//! between both sides.

use std::cell::RefCell;
use std::sync::{Mutex, MutexGuard};

use pickle::bridge::HostFn;
use pickle::error::Error;
use pickle::interp::Context;
use pickle::interpreter::Interpreter;
use pickle::list::List;
use pickle::refs::{Arrayref, Hashref};
use pickle::scalar::Scalar;

static SESSION_LOCK: Mutex<()> = Mutex::new(());

fn with_interp(f: impl FnOnce(&mut Interpreter)) {
    let _guard: MutexGuard<'_, ()> = SESSION_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut interp = Interpreter::new().expect("interpreter should boot");
    f(&mut interp);
}

fn do_it(s: Scalar) -> Result<Scalar, Error> {
    if s.as_double() <= 0.0 {
        return Err(Error::msg(format!(
            "'{}' is not a positive number",
            s.as_string()
        )));
    }
    Ok(Scalar::from(s.as_double().sqrt()))
}

#[test]
fn test_sqrt_callback_story() {
    with_interp(|interp| {
        interp.define_sub("main", "do_it", HostFn::OneArg(do_it));

        let root = interp.eval_string("do_it(42)").expect("eval");
        assert!((root.as_double() - 6.4807).abs() < 1e-4);

        // The failing call leaves the error signal populated for the
        // script, message and operand intact.
        let seen = interp
            .eval_string("eval { do_it(-100) }; $err")
            .expect("eval");
        assert!(seen.defined());
        assert!(seen.as_string().contains("-100"));

        // The same failure surfaces host-side as a runtime error.
        let err = interp
            .call_named("do_it", &List::new().add(-100i64), Context::Scalar)
            .unwrap_err();
        assert!(err.to_string().contains("-100"));
    });
}

#[test]
fn test_hash_story() {
    with_interp(|interp| {
        let h = Hashref::new();
        h.store("foo", Scalar::from(5i64));
        h.store("bar", Scalar::from("baz"));

        assert_eq!(h.fetch("foo").as_int(), 5);
        assert_eq!(h.fetch("bar").as_string(), "baz");
        assert!(!h.fetch("missing").defined());

        // Hand the hash across the boundary and back through the
        // serialization path.
        let text = (*h).to_tree(interp).expect("encode");
        let decoded = Scalar::from_tree(interp, &text).expect("decode");
        let copy = Hashref::checked(interp, &decoded).expect("hash");
        assert_eq!(copy.fetch("foo").as_int(), 5);
        assert_eq!(copy.fetch("bar").as_string(), "baz");
    });
}

#[test]
fn test_shared_array_mutation_story() {
    with_interp(|interp| {
        let a = Arrayref::from_elems(&[Scalar::from(1i64), Scalar::from("2.1")]);
        let h = Hashref::new();
        h.store("ary", (*a).clone());

        // Mutating through a re-fetched reference hits the same
        // sequence the host still holds.
        Arrayref::unchecked(&h.fetch("ary")).store(2, Scalar::from(4.9f64));
        assert_eq!(a.size(), 3);
        assert_eq!(a.fetch(2).as_double(), 4.9);
        assert_eq!(
            a.fetch(0).as_int() + a.fetch(1).as_int() + a.fetch(2).as_int(),
            7
        );
    });
}

thread_local! {
    static WARNINGS: RefCell<String> = const { RefCell::new(String::new()) };
}

fn capture_warning(message: Scalar) -> Result<Scalar, Error> {
    WARNINGS.with(|w| w.borrow_mut().push_str(&message.as_string()));
    Ok(Scalar::undef())
}

#[test]
fn test_warn_channel_routes_through_installed_handler() {
    with_interp(|interp| {
        WARNINGS.with(|w| w.borrow_mut().clear());
        // Replacing the handler subroutine retargets the hook, which is
        // held by name.
        interp.define_sub("Pickle", "warn_handler", HostFn::OneArg(capture_warning));

        interp.eval_string("warn('beware of the jar')").expect("eval");
        let captured = WARNINGS.with(|w| w.borrow().clone());
        assert_eq!(captured, "beware of the jar\n");

        // No-argument warn gets the stock message.
        interp.eval_string("warn()").expect("eval");
        let captured = WARNINGS.with(|w| w.borrow().clone());
        assert!(captured.contains("something's wrong"));
    });
}

#[test]
fn test_handles_survive_session_value_lifecycle() {
    with_interp(|interp| {
        // A value created by the runtime, held by the host, mutated by
        // the runtime again: one cell throughout.
        let shared = interp.eval_string("$cellar = 'full'; $cellar").expect("eval");
        let before = shared.refcount();
        {
            let copy = shared.clone();
            assert_eq!(copy.refcount(), before + 1);
        }
        assert_eq!(shared.refcount(), before);
    });
}
