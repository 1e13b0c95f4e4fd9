use super::*;
use std::rc::Weak;

use crate::fiber::FiberId;

fn detached_hooks(previous: Option<Vec<Hook>>) -> Hooks {
    Hooks::new(
        FiberId::default(),
        "test_component",
        previous,
        Lanes::DEFAULT,
        RootHandle(Weak::new()),
        ContextValues::default(),
    )
}

#[test]
fn same_value_dependency_comparison() {
    assert!(Dep::from(f64::NAN).same_value(&Dep::from(f64::NAN)));
    assert!(!Dep::from(0.0_f64).same_value(&Dep::from(-0.0_f64)));
    assert!(Dep::from("a").same_value(&Dep::from(String::from("a"))));
    assert!(!Dep::from(1_i32).same_value(&Dep::from(1_u32)));

    let shared = Rc::new(vec![1, 2]);
    let copy = Rc::new(vec![1, 2]);
    assert!(Dep::shared(&shared).same_value(&Dep::shared(&Rc::clone(&shared))));
    assert!(!Dep::shared(&shared).same_value(&Dep::shared(&copy)));
}

#[test]
fn dependency_lists_need_equal_length() {
    let a = deps![1, "x"].expect("list");
    let b = deps![1, "x"].expect("list");
    let c = deps![1].expect("list");
    assert!(are_hook_inputs_equal(&a, &b));
    assert!(!are_hook_inputs_equal(&a, &c));
    assert!(are_hook_inputs_equal(&[], &[]));
}

#[test]
fn state_survives_into_next_render() {
    let mut first = detached_hooks(None);
    let (value, _set) = first.use_state(|| 41);
    assert_eq!(value, 41);
    let output = first.finish(true);
    assert!(output.mismatch.is_none());

    let mut second = detached_hooks(Some(output.hooks));
    let (value, _set) = second.use_state(|| 0);
    assert_eq!(value, 41);
    assert!(second.finish(true).mismatch.is_none());
}

#[test]
fn queued_updates_apply_on_next_render() {
    let mut first = detached_hooks(None);
    let (_, set) = first.use_state(|| 1);
    let output = first.finish(true);

    // The root is gone, so dispatch only enqueues.
    set.update(|n| n * 10);
    set.update(|n| n + 2);

    let mut second = detached_hooks(Some(output.hooks));
    let (value, _) = second.use_state(|| 0);
    assert_eq!(value, 12);
}

#[test]
fn effect_with_unchanged_deps_is_not_marked() {
    let mut first = detached_hooks(None);
    first.use_effect(Cleanup::none, deps![1]);
    let output = first.finish(true);
    assert!(output.passive);
    assert!(output.effects[0].has_tags(HookEffectTags::HAS_EFFECT));

    let mut second = detached_hooks(Some(output.hooks));
    second.use_effect(Cleanup::none, deps![1]);
    let output = second.finish(true);
    assert!(!output.passive);
    assert!(!output.effects[0].has_tags(HookEffectTags::HAS_EFFECT));

    let mut third = detached_hooks(Some(output.hooks));
    third.use_effect(Cleanup::none, deps![2]);
    assert!(third.finish(true).passive);
}

#[test]
fn effect_without_deps_runs_every_render() {
    let mut first = detached_hooks(None);
    first.use_effect(Cleanup::none, None);
    let output = first.finish(true);

    let mut second = detached_hooks(Some(output.hooks));
    second.use_effect(Cleanup::none, None);
    assert!(second.finish(true).passive);
}

#[test]
fn cleanup_is_shared_across_generations() {
    let ran = Rc::new(Cell::new(0));
    let mut first = detached_hooks(None);
    let counter = Rc::clone(&ran);
    first.use_effect(move || Cleanup::new(move || counter.set(counter.get() + 1)), deps![1]);
    let output = first.finish(true);
    output.effects[0].create();

    let mut second = detached_hooks(Some(output.hooks));
    second.use_effect(Cleanup::none, deps![2]);
    let output = second.finish(true);
    output.effects[0].destroy();
    assert_eq!(ran.get(), 1);
    output.effects[0].destroy();
    assert_eq!(ran.get(), 1);
}

#[test]
fn ref_object_is_stable() {
    let mut first = detached_hooks(None);
    let cell = first.use_ref(|| 5);
    cell.set(6);
    let output = first.finish(true);

    let mut second = detached_hooks(Some(output.hooks));
    let again = second.use_ref(|| 0);
    assert!(again.ptr_eq(&cell));
    assert_eq!(again.current(), 6);
}

#[test]
fn changed_hook_kind_is_a_mismatch() {
    let mut first = detached_hooks(None);
    first.use_state(|| 0);
    let output = first.finish(true);

    let mut second = detached_hooks(Some(output.hooks));
    second.use_ref(|| 0);
    let detail = second.finish(true).mismatch.expect("mismatch");
    assert!(detail.contains("use_ref"));
}

#[test]
fn fewer_hooks_is_a_mismatch_only_when_completed() {
    let mut first = detached_hooks(None);
    first.use_state(|| 0);
    first.use_state(|| 1);
    let output = first.finish(true);

    let mut suspended = detached_hooks(Some(output.hooks.clone()));
    suspended.use_state(|| 0);
    assert!(suspended.finish(false).mismatch.is_none());

    let mut completed = detached_hooks(Some(output.hooks));
    completed.use_state(|| 0);
    assert!(completed.finish(true).mismatch.is_some());
}

#[test]
fn extra_hook_is_a_mismatch() {
    let first = detached_hooks(None);
    let output = first.finish(true);

    let mut second = detached_hooks(Some(output.hooks));
    second.use_state(|| 0);
    assert!(second.finish(true).mismatch.is_some());
}

#[test]
fn context_falls_back_to_default() {
    let theme = crate::context::create_context(String::from("light"));
    let mut hooks = detached_hooks(None);
    assert_eq!(hooks.use_context(&theme), "light");

    let mut values = ContextValues::default();
    values.insert(theme.id(), Rc::new(String::from("dark")) as Rc<dyn Any>);
    let mut provided = Hooks::new(
        FiberId::default(),
        "test_component",
        None,
        Lanes::DEFAULT,
        RootHandle(Weak::new()),
        values,
    );
    assert_eq!(provided.use_context(&theme), "dark");
}

#[test]
fn transition_marks_updates_inside_scope() {
    let mut hooks = detached_hooks(None);
    let (pending, start) = hooks.use_transition();
    assert!(!pending);
    let mut seen = None;
    start.start(|| seen = Some(crate::lanes::is_transition_active()));
    assert_eq!(seen, Some(true));
    assert!(!crate::lanes::is_transition_active());
}
