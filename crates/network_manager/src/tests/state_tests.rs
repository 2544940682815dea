use super::*;

use std::sync::{atomic::AtomicUsize, Mutex as StdMutex};

fn recording_listener(log: &Arc<StdMutex<Vec<(u8, bool)>>>, tag: u8) -> ConnectivityListener {
    let log = Arc::clone(log);
    Arc::new(move |connected| log.lock().expect("log").push((tag, connected)))
}

#[test]
fn starts_disconnected_and_undetermined() {
    let state = SharedState::new();
    assert!(!state.is_connected());
    assert!(!state.is_determined());
    assert_eq!(state.listener_count(), 0);
}

#[test]
fn first_determination_notifies_even_when_value_matches_default() {
    let state = SharedState::new();
    let log = Arc::new(StdMutex::new(Vec::new()));
    let _subscription = state.subscribe(recording_listener(&log, 1));

    assert!(state.set_connected(false));
    assert!(!state.set_connected(false));
    assert!(state.set_connected(true));

    assert_eq!(*log.lock().expect("log"), vec![(1, false), (1, true)]);
    assert!(state.is_determined());
}

#[test]
fn listeners_drain_in_registration_order_after_flag_update() {
    let state = SharedState::new();
    let log = Arc::new(StdMutex::new(Vec::new()));
    let _first = state.subscribe(recording_listener(&log, 1));

    let observed = Arc::new(StdMutex::new(None));
    let observer_state = Arc::clone(&state);
    let observed_in_listener = Arc::clone(&observed);
    let _second = state.subscribe(Arc::new(move |_: bool| {
        *observed_in_listener.lock().expect("observed") = Some(observer_state.is_connected());
    }));
    let _third = state.subscribe(recording_listener(&log, 3));

    state.set_connected(true);

    assert_eq!(*log.lock().expect("log"), vec![(1, true), (3, true)]);
    assert_eq!(*observed.lock().expect("observed"), Some(true));
}

#[test]
fn unsubscribe_is_idempotent() {
    let state = SharedState::new();
    let log = Arc::new(StdMutex::new(Vec::new()));
    let subscription = state.subscribe(recording_listener(&log, 1));
    let _other = state.subscribe(recording_listener(&log, 2));

    subscription.unsubscribe();
    subscription.unsubscribe();
    assert_eq!(state.listener_count(), 1);

    state.set_connected(true);
    assert_eq!(*log.lock().expect("log"), vec![(2, true)]);
}

#[test]
fn listener_may_unsubscribe_itself_while_draining() {
    let state = SharedState::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let slot: Arc<StdMutex<Option<Subscription>>> = Arc::new(StdMutex::new(None));

    let listener_calls = Arc::clone(&calls);
    let listener_slot = Arc::clone(&slot);
    let subscription = state.subscribe(Arc::new(move |_: bool| {
        listener_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(subscription) = listener_slot.lock().expect("slot").take() {
            subscription.unsubscribe();
        }
    }));
    *slot.lock().expect("slot") = Some(subscription);

    state.set_connected(true);
    state.set_connected(false);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.listener_count(), 0);
}

#[test]
fn subscribe_unless_connected_skips_registration_when_online() {
    let state = SharedState::new();
    state.set_connected(true);

    let registered = state.subscribe_unless_connected(Arc::new(|_: bool| {}));
    assert!(registered.is_none());
    assert_eq!(state.listener_count(), 0);

    state.set_connected(false);
    let registered = state.subscribe_unless_connected(Arc::new(|_: bool| {}));
    assert!(registered.is_some());
    assert_eq!(state.listener_count(), 1);
}

#[test]
fn dismiss_input_calls_installed_hook() {
    let state = SharedState::new();
    state.dismiss_input();

    let dismissed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dismissed);
    state.set_input_dismissal(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    state.dismiss_input();
    state.dismiss_input();
    assert_eq!(dismissed.load(Ordering::SeqCst), 2);
}
