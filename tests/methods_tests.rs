use std::sync::{Mutex, MutexGuard};

use pickle::bridge::HostFn;
use pickle::error::Error;
use pickle::interp::Context;
use pickle::interpreter::Interpreter;
use pickle::list::List;
use pickle::refs::{Arrayref, Coderef};
use pickle::scalar::Scalar;

static SESSION_LOCK: Mutex<()> = Mutex::new(());

fn with_interp(f: impl FnOnce(&mut Interpreter)) {
    let _guard: MutexGuard<'_, ()> = SESSION_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut interp = Interpreter::new().expect("interpreter should boot");
    f(&mut interp);
}

/// `$self->depth` on a sequence-backed object.
fn stack_depth(receiver: Scalar) -> Result<Scalar, Error> {
    Ok(Scalar::from(Arrayref::unchecked(&receiver).size() as i64))
}

/// `$self->push_all(@values)` returning the new depth.
fn stack_push_all(args: List, _context: Context) -> Result<List, Error> {
    let receiver = args.shift();
    let stack = Arrayref::unchecked(&receiver);
    while args.size() > 0 {
        stack.push(args.shift());
    }
    Ok(List::new().add(stack.size() as i64))
}

fn install_stack_class(interp: &mut Interpreter) {
    interp.define_sub("Stack", "depth", HostFn::OneArg(stack_depth));
    interp.define_sub("Stack", "push_all", HostFn::Variadic(stack_push_all));
}

#[test]
fn test_bless_and_ref_kind() {
    with_interp(|interp| {
        let obj = interp.eval_string("bless([1, 2], 'Stack')").expect("eval");
        assert_eq!(obj.ref_kind().as_string(), "Stack");
        assert!(obj.is_arrayref(interp));
    });
}

#[test]
fn test_call_method_dispatches_by_name() {
    with_interp(|interp| {
        install_stack_class(interp);
        let obj = interp.eval_string("bless([10, 20], 'Stack')").expect("eval");

        let depth = obj
            .call_method(interp, "depth", &List::new(), Context::Scalar)
            .expect("method");
        assert_eq!(depth.as_int(), 2);

        let grown = obj
            .call_method(
                interp,
                "push_all",
                &List::new().add(30i64).add(40i64),
                Context::Scalar,
            )
            .expect("method");
        assert_eq!(grown.as_int(), 4);
        assert_eq!(Arrayref::unchecked(&obj).fetch(3).as_int(), 40);
    });
}

#[test]
fn test_call_method_missing_method_is_trappable() {
    with_interp(|interp| {
        install_stack_class(interp);
        let obj = interp.eval_string("bless([], 'Stack')").expect("eval");
        let err = obj
            .call_method(interp, "vanish", &List::new(), Context::Scalar)
            .unwrap_err();
        match &err {
            Error::Runtime(value) => {
                let text = value.as_string();
                assert!(text.contains("vanish"));
                assert!(text.contains("Stack"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    });
}

#[test]
fn test_call_method_on_unblessed_ref_fails() {
    with_interp(|interp| {
        let aref = interp.eval_string("[1]").expect("eval");
        let err = aref
            .call_method(interp, "depth", &List::new(), Context::Scalar)
            .unwrap_err();
        assert!(err.to_string().contains("unblessed"));
    });
}

#[test]
fn test_inheritance_through_isa_chain() {
    with_interp(|interp| {
        install_stack_class(interp);
        // Bounded inherits from Stack.
        Arrayref::lookup(interp, "Bounded::ISA").push(Scalar::from("Stack"));

        let obj = interp.eval_string("bless([5], 'Bounded')").expect("eval");
        assert!(obj.isa(interp, "Bounded"));
        assert!(obj.isa(interp, "Stack"));
        assert!(!obj.isa(interp, "Queue"));

        // The inherited method dispatches through the parent's slot.
        let depth = obj
            .call_method(interp, "depth", &List::new(), Context::Scalar)
            .expect("method");
        assert_eq!(depth.as_int(), 1);
    });
}

#[test]
fn test_isa_on_class_name_string() {
    with_interp(|interp| {
        install_stack_class(interp);
        Arrayref::lookup(interp, "Bounded::ISA").push(Scalar::from("Stack"));
        let name = Scalar::from("Bounded");
        assert!(name.isa(interp, "Stack"));
        assert!(!Scalar::from("Queue").isa(interp, "Stack"));
    });
}

#[test]
fn test_isa_on_unblessed_ref_answers_kind() {
    with_interp(|interp| {
        let aref = interp.eval_string("[1]").expect("eval");
        assert!(aref.isa(interp, "ARRAY"));
        assert!(!aref.isa(interp, "HASH"));
        assert!(!Scalar::undef().isa(interp, "ARRAY"));
    });
}

#[test]
fn test_can_returns_callable_or_undef() {
    with_interp(|interp| {
        install_stack_class(interp);
        let obj = interp.eval_string("bless([8, 9], 'Stack')").expect("eval");

        let found = obj.can(interp, "depth");
        assert!(found.defined());
        assert!(found.is_coderef(interp));

        // The returned handle is directly callable, receiver included.
        let code = Coderef::checked(interp, &found).expect("narrow");
        let depth = interp
            .call_function(&code, &List::new().add(obj.clone()), Context::Scalar)
            .expect("call");
        assert_eq!(depth.as_int(), 2);

        assert!(!obj.can(interp, "vanish").defined());
        assert!(!Scalar::from(3i64).can(interp, "depth").defined());
    });
}

#[test]
fn test_trampoline_installed_lazily_once() {
    with_interp(|interp| {
        install_stack_class(interp);
        assert!(Coderef::lookup(interp, "Pickle::call_method").is_none());

        let obj = interp.eval_string("bless([], 'Stack')").expect("eval");
        obj.call_method(interp, "depth", &List::new(), Context::Scalar)
            .expect("method");
        let first = Coderef::lookup(interp, "Pickle::call_method").expect("installed");

        obj.call_method(interp, "depth", &List::new(), Context::Scalar)
            .expect("method");
        let second = Coderef::lookup(interp, "Pickle::call_method").expect("still installed");
        // Same installed body, not a fresh definition per call.
        assert!(first.eq(&second));
    });
}
