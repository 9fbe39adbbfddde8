//! End-to-end behavior of actions, stores, waitFor and snapshots

use monoflux::{
    ActionMethod, ActionSet, ActionsDefinition, DispatchToken, ErrorKind, Flux, FluxError,
    Handler, MethodTable, Store, StoreDefinition,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MyState {
    name: String,
    called_internal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SecondState {
    foo: Value,
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LifeCycleState {
    bootstraps: u32,
    snapshots: u32,
}

#[derive(Deserialize)]
struct Pair {
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
struct Triple {
    a: i64,
    b: i64,
    c: i64,
}

struct App {
    flux: Flux,
    actions: ActionSet,
    my_store: Store<MyState>,
    second_store: Store<SecondState>,
    lifecycle_store: Store<LifeCycleState>,
}

fn my_actions() -> ActionsDefinition {
    ActionsDefinition::new("MyActions")
        .generate_actions(["callInternalMethod", "shortHandBinary"])
        .generate_action("anotherAction")
        .method(
            "updateName",
            ActionMethod::new(1, |ctx, args| {
                ctx.dispatch(args.into_iter().next().unwrap_or(Value::Null))?;
                Ok(None)
            }),
        )
        .method(
            "justTestingInternalActions",
            ActionMethod::new(0, |ctx, _| {
                Ok(Some(json!({
                    "updateThree": ctx.sibling("updateThree").is_some(),
                    "updateName": ctx.sibling("updateName").is_some(),
                })))
            }),
        )
        .method(
            "updateTwo",
            ActionMethod::new(2, |ctx, args| {
                ctx.dispatch(json!({ "a": args[0], "b": args[1] }))?;
                Ok(None)
            }),
        )
        .method(
            "updateThree",
            ActionMethod::new(3, |ctx, args| {
                ctx.dispatch(json!({ "a": args[0], "b": args[1], "c": args[2] }))?;
                Ok(None)
            }),
        )
}

fn my_store(flux: &Flux, actions: &ActionSet) -> Store<MyState> {
    let actions = actions.clone();
    flux.create_store(
        StoreDefinition::new(
            "MyStore",
            MyState {
                name: "first".into(),
                called_internal: false,
            },
        )
        .handler("onUpdateName", |ctx, name: String| {
            ctx.state_mut().name = name;
            Ok(())
        })
        .unit_handler("doCallInternal", |ctx| ctx.call("internalOnly", Value::Null))
        .unit_handler("internalOnly", |ctx| {
            ctx.state_mut().called_internal = true;
            Ok(())
        })
        .static_method("externalMethod", |_, _| Ok(Value::Bool(true)))
        .setup(move |setup| {
            let on_update = setup.method("onUpdateName");
            setup.bind_action(actions.get("updateName"), on_update)?;
            let internal = setup.method("doCallInternal");
            setup.bind_action(actions.constant("CALL_INTERNAL_METHOD"), internal)
        }),
    )
    .unwrap()
}

fn second_store(flux: &Flux, actions: &ActionSet, first: &Store<MyState>) -> Store<SecondState> {
    let actions = actions.clone();
    let upstream = first.clone();
    flux.create_store(
        StoreDefinition::new(
            "SecondStore",
            SecondState {
                foo: json!("bar"),
                name: first.get_state().name,
            },
        )
        .handler("onUpdateTwo", |ctx, x: Pair| {
            ctx.state_mut().foo = json!(x.a + x.b);
            Ok(())
        })
        .handler("updateThree", |ctx, x: Triple| {
            ctx.state_mut().foo = json!(x.a + x.b + x.c);
            Ok(())
        })
        .raw_handler("shortHandBinary", |ctx, arr| {
            ctx.state_mut().foo = arr;
            Ok(())
        })
        .unit_handler("onUpdateName", move |ctx| {
            ctx.wait_for([upstream.dispatch_token()])?;
            ctx.state_mut().name = upstream.get_state().name;
            Ok(())
        })
        .static_method("externalMethod", |store: &Store<SecondState>, _| {
            Ok(store.get_state().foo)
        })
        .static_method("concatFooWith", |store: &Store<SecondState>, args| {
            let foo = store.get_state().foo;
            let suffix = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(json!(format!("{}{}", foo.as_str().unwrap_or_default(), suffix)))
        })
        .setup(move |setup| setup.bind_actions(&actions)),
    )
    .unwrap()
}

fn lifecycle_store(flux: &Flux) -> Store<LifeCycleState> {
    flux.create_store(
        StoreDefinition::new("LifeCycleStore", LifeCycleState::default())
            .unit_handler("onBootstrap", |ctx| {
                ctx.state_mut().bootstraps += 1;
                Ok(())
            })
            .unit_handler("onTakeSnapshot", |ctx| {
                ctx.state_mut().snapshots += 1;
                Ok(())
            }),
    )
    .unwrap()
}

fn app() -> App {
    let flux = Flux::new();
    let actions = flux.create_actions(my_actions());
    let my_store = my_store(&flux, &actions);
    let second_store = second_store(&flux, &actions, &my_store);
    let lifecycle_store = lifecycle_store(&flux);
    App {
        flux,
        actions,
        my_store,
        second_store,
        lifecycle_store,
    }
}

fn call(app: &App, action: &str, args: impl monoflux::IntoArgs) {
    app.actions.get(action).unwrap().call(args).unwrap();
}

#[test]
fn test_public_surface() {
    let app = app();

    assert_eq!(app.my_store.call("externalMethod", ()).unwrap(), json!(true));
    assert_eq!(app.second_store.call("externalMethod", ()).unwrap(), json!("bar"));
    assert_eq!(
        app.second_store.call("concatFooWith", ("baz",)).unwrap(),
        json!("barbaz")
    );

    assert!(!app.my_store.has_method("internalOnly"));
    assert!(!app.my_store.has_method("onUpdateName"));
    assert!(matches!(
        app.my_store.call("internalOnly", ()),
        Err(FluxError::UnknownMethod { .. })
    ));
    assert_eq!(app.flux.store_names(), vec!["MyStore", "SecondStore", "LifeCycleStore"]);
}

#[test]
fn test_actions_surface() {
    let app = app();

    assert_eq!(app.actions.get("callInternalMethod").unwrap().arity(), 1);
    assert_eq!(app.actions.get("updateTwo").unwrap().arity(), 2);
    assert!(app.actions.get("anotherAction").is_some());
    for constant in ["UPDATE_NAME", "UPDATE_TWO", "CALL_INTERNAL_METHOD"] {
        assert!(app.actions.constant(constant).is_some(), "{constant}");
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    app.flux.dispatcher().listen(move |payload| {
        sink.lock().push(payload.data.clone());
        Ok(())
    });
    call(&app, "justTestingInternalActions", ());
    assert_eq!(
        seen.lock()[0],
        json!({ "updateThree": true, "updateName": true })
    );
}

#[test]
fn test_dispatch_updates_stores_in_dependency_order() {
    let app = app();
    assert_eq!(app.my_store.get_state().name, "first");
    assert!(!app.my_store.get_state().called_internal);

    call(&app, "updateName", ("bear",));
    assert_eq!(app.my_store.get_state().name, "bear");
    assert!(!app.my_store.get_state().called_internal);
    assert_eq!(app.second_store.get_state().name, "bear");

    call(&app, "callInternalMethod", ());
    assert!(app.my_store.get_state().called_internal);
}

#[test]
fn test_wait_for_runs_later_registered_store_first() {
    let flux = Flux::new();
    let actions = flux.create_actions(ActionsDefinition::new("Order").generate_action("go"));
    let late_token: Arc<Mutex<Option<DispatchToken>>> = Arc::new(Mutex::new(None));
    let log = Arc::new(Mutex::new(Vec::new()));

    let (bound, token, early_log) = (actions.clone(), late_token.clone(), log.clone());
    let early = flux
        .create_store(
            StoreDefinition::new("Early", 0u32)
                .unit_handler("onGo", move |ctx| {
                    let waits: Vec<DispatchToken> = token.lock().iter().copied().collect();
                    ctx.wait_for(waits)?;
                    early_log.lock().push("early");
                    *ctx.state_mut() += 1;
                    Ok(())
                })
                .setup(move |setup| setup.bind_actions(&bound)),
        )
        .unwrap();

    let (bound, late_log) = (actions.clone(), log.clone());
    let late = flux
        .create_store(
            StoreDefinition::new("Late", 0u32)
                .unit_handler("onGo", move |ctx| {
                    late_log.lock().push("late");
                    *ctx.state_mut() += 1;
                    Ok(())
                })
                .setup(move |setup| setup.bind_actions(&bound)),
        )
        .unwrap();
    *late_token.lock() = Some(late.dispatch_token());

    actions.get("go").unwrap().call(()).unwrap();
    assert_eq!(*log.lock(), vec!["late", "early"]);
    assert_eq!(early.get_state(), 1);
    assert_eq!(late.get_state(), 1, "late store handled the payload once");
}

#[test]
fn test_snapshot_bootstrap_and_rollback() {
    let app = app();
    assert_eq!(app.lifecycle_store.get_state(), LifeCycleState::default());

    let initial = app.flux.take_snapshot().unwrap();
    assert_eq!(app.lifecycle_store.get_state().snapshots, 1);

    app.flux.bootstrap(&initial).unwrap();
    assert_eq!(
        app.lifecycle_store.get_state(),
        LifeCycleState {
            bootstraps: 1,
            snapshots: 0,
        },
        "bootstrap restores the blob, then fires onBootstrap"
    );

    call(&app, "updateName", ("bear",));
    let snapshot = app.flux.take_snapshot().unwrap();
    let parsed: Value = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(parsed["MyStore"]["name"], "bear");

    call(&app, "updateName", ("blossom",));
    assert_eq!(app.my_store.get_state().name, "blossom");
    let parsed: Value = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(parsed["MyStore"]["name"], "bear");

    let mut state = app.my_store.get_state();
    state.name = "foobar".into();
    assert_eq!(state.name, "foobar");
    assert_eq!(app.my_store.get_state().name, "blossom");

    let lifecycle_fired = Arc::new(AtomicUsize::new(0));
    let counter = lifecycle_fired.clone();
    app.lifecycle_store.listen(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(
        app.lifecycle_store.get_state(),
        LifeCycleState {
            bootstraps: 1,
            snapshots: 1,
        }
    );

    app.flux.rollback().unwrap();
    assert_eq!(app.my_store.get_state().name, "bear");
    let captured: LifeCycleState = serde_json::from_value(parsed["LifeCycleStore"].clone()).unwrap();
    assert_eq!(
        captured,
        LifeCycleState {
            bootstraps: 1,
            snapshots: 0,
        }
    );
    assert_eq!(
        app.lifecycle_store.get_state(),
        captured,
        "rollback fires neither onBootstrap nor onTakeSnapshot"
    );
    assert_eq!(lifecycle_fired.load(Ordering::SeqCst), 1, "one change per restored store");

    let err = app.flux.bootstrap(r#"{"MyStore":{"name":"elk"}}"#).unwrap_err();
    assert_eq!(err.to_string(), "Stores have already been bootstrapped");
    assert_eq!(err.kind(), ErrorKind::Reference);
    assert_eq!(app.my_store.get_state().name, "bear");
}

#[test]
fn test_bootstrap_round_trip_into_fresh_instance() {
    let source = app();
    call(&source, "updateName", ("otter",));
    call(&source, "updateTwo", (4, 2));
    let blob = source.flux.take_snapshot().unwrap();

    let fresh = app();
    fresh.flux.bootstrap(&blob).unwrap();
    assert_eq!(fresh.my_store.get_state(), source.my_store.get_state());
    assert_eq!(fresh.second_store.get_state(), source.second_store.get_state());
}

#[test]
fn test_listen_and_unlisten() {
    let app = app();
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let upstream = app.my_store.clone();
    let id = app.my_store.listen(move |state| {
        assert_eq!(state.name, "moose");
        assert_eq!(upstream.get_state().name, "moose");
        counter.fetch_add(1, Ordering::SeqCst);
    });
    call(&app, "updateName", ("moose",));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(app.my_store.unlisten(id));
    call(&app, "updateName", ("badger",));
    assert_eq!(app.my_store.get_state().name, "badger");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_multi_argument_actions() {
    let app = app();

    call(&app, "updateTwo", (4, 2));
    assert_eq!(app.second_store.get_state().foo, json!(6));

    call(&app, "updateThree", (4, 2, 1));
    assert_eq!(app.second_store.get_state().foo, json!(7));

    call(&app, "shortHandBinary", (1, 0));
    assert_eq!(app.second_store.get_state().foo, json!([1, 0]));
}

#[test]
fn test_defer_dispatches_on_next_turn() {
    let app = app();
    call(&app, "updateName", ("gerenuk",));

    app.actions.get("updateName").unwrap().defer(("marmot",));
    assert_eq!(app.my_store.get_state().name, "gerenuk");

    assert_eq!(app.flux.run_deferred().unwrap(), 1);
    assert_eq!(app.my_store.get_state().name, "marmot");
}

#[test]
fn test_duplicate_handlers_rejected() {
    let app = app();
    let message = "You have multiple action handlers bound to an action: updateName and onUpdateName";

    let actions = app.actions.clone();
    let err = app
        .flux
        .create_store(
            StoreDefinition::new("StoreWithManyListeners", 0u8)
                .method("updateName", Handler::unit(|_| Ok(())))
                .method("onUpdateName", Handler::unit(|_| Ok(())))
                .setup(move |setup| setup.bind_actions(&actions)),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), message);

    let evil = MethodTable::new().with("updateName", Handler::unit(|_| Ok(())));
    let actions = app.actions.clone();
    let err = app
        .flux
        .create_store(
            StoreDefinition::new("InnocentStore", 0u8)
                .extends(&evil)
                .method("onUpdateName", Handler::unit(|_| Ok(())))
                .setup(move |setup| setup.bind_actions(&actions)),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), message);
}

#[test]
fn test_invalid_bindings() {
    let app = app();

    let actions = app.actions.clone();
    let err = app
        .flux
        .create_store(
            StoreDefinition::new("StoreWithInvalidActionHandlers", 0u8)
                .method("trololol", Handler::unit(|_| Ok(())))
                .setup(move |setup| {
                    let handler = setup.method("trololol");
                    setup.bind_action(actions.constant("THIS_DOES_NOT_EXIST"), handler)
                }),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid action reference passed in");

    let actions = app.actions.clone();
    let err = app
        .flux
        .create_store(
            StoreDefinition::new("StoreWithInvalidActionHandlers2", 0u8).setup(move |setup| {
                let handler = setup.method("invisibleFunction");
                setup.bind_action(actions.constant("UPDATE_NAME"), handler)
            }),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "bindAction expects a function");
}

#[test]
fn test_wait_for_requires_tokens() {
    let flux = Flux::new();
    let waiter = flux.create_actions(ActionsDefinition::new("WaitPlease").generate_action("pleaseWait"));

    let bound = waiter.clone();
    flux.create_store(
        StoreDefinition::new("WaitsForNobody", 0u8)
            .unit_handler("pleaseWait", |ctx| ctx.wait_for(Vec::<DispatchToken>::new()))
            .setup(move |setup| setup.bind_actions(&bound)),
    )
    .unwrap();

    let err = waiter.get("pleaseWait").unwrap().call(()).unwrap_err();
    assert_eq!(err.to_string(), "Dispatch tokens not provided");
    assert!(!flux.dispatcher().is_dispatching());
}

#[test]
fn test_failed_handler_leaves_state_untouched() {
    let flux = Flux::new();
    let actions = flux.create_actions(ActionsDefinition::new("Risky").generate_action("attempt"));

    let bound = actions.clone();
    let store = flux
        .create_store(
            StoreDefinition::new("RiskyStore", 0u32)
                .unit_handler("onAttempt", |ctx| {
                    *ctx.state_mut() = 99;
                    Err(FluxError::handler("refused"))
                })
                .setup(move |setup| setup.bind_actions(&bound)),
        )
        .unwrap();

    let err = actions.get("attempt").unwrap().call(()).unwrap_err();
    assert_eq!(err.to_string(), "refused");
    assert_eq!(store.get_state(), 0);
}

#[test]
fn test_error_lifecycle_handles_handler_failures() {
    let flux = Flux::new();
    let actions = flux.create_actions(ActionsDefinition::new("Risky").generate_action("attempt"));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let (bound, sink) = (actions.clone(), errors.clone());
    let store = flux
        .create_store(
            StoreDefinition::new("CarefulStore", 0u32)
                .method("onAttempt", Handler::unit(|_| Err(FluxError::handler("refused"))))
                .setup(move |setup| {
                    setup.on(
                        "error",
                        Handler::raw(move |_, event| {
                            sink.lock().push(event);
                            Ok(())
                        }),
                    );
                    setup.bind_actions(&bound)
                }),
        )
        .unwrap();

    assert!(store.is_handling_errors());
    actions.get("attempt").unwrap().call(()).unwrap();
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["error"], "refused");
    assert_eq!(errors[0]["action"], "attempt");
}

#[test]
fn test_store_event_emitter() {
    let app = app();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let id = app.my_store.on("custom", move |v| sink.lock().push(v.clone()));
    let sink = seen.clone();
    app.my_store.once("custom", move |_| sink.lock().push(json!("once")));

    assert_eq!(app.my_store.emit("custom", &json!(1)), 2);
    assert!(app.my_store.remove_listener(id));
    assert_eq!(app.my_store.emit("custom", &json!(2)), 0);
    assert_eq!(*seen.lock(), vec![json!(1), json!("once")]);
}

#[test]
fn test_raw_dispatcher_listener_sees_every_payload() {
    let app = app();
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    app.flux
        .dispatcher()
        .register(Some(DispatchToken::new()), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    call(&app, "updateName", ("a",));
    call(&app, "anotherAction", ());
    assert_eq!(count.load(Ordering::SeqCst), 2);

    assert!(matches!(
        app.flux.dispatcher().register(None, |_| Ok(())),
        Err(FluxError::InvalidActionReference)
    ));
}
