//! Named events on top of hooks.
//!
//! Interceptors translate "a hooked function ran" into named occurrences such
//! as `NWNX_ON_LEVEL_UP_BEFORE`, and consumers subscribe to those names.
//! Hooks behind an event family are only installed once somebody subscribes
//! to a matching name, see [`Events::init_on_first_subscribe`].

mod dispatch;
mod pattern;

pub use dispatch::*;
pub use pattern::*;

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;
    use crate::metrics::MemorySink;
    use crate::stack::ObjectId;

    #[test]
    fn init_runs_once_per_pattern() {
        let events = Events::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        events.init_on_first_subscribe("X_*", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for name in ["X_BEFORE", "X_AFTER", "X_ANYTHING"] {
            events.subscribe(name, "test", |_| Ok(())).unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_init_rejects_subscription_and_rearms() {
        let events = Events::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        events.init_on_first_subscribe("Y_*", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("target not hookable yet".into())
            } else {
                Ok(())
            }
        });

        let err = events.subscribe("Y_BEFORE", "test", |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::EventInit { ref event, .. } if event == "Y_BEFORE"));
        assert_eq!(events.state("Y_BEFORE"), EventState::Unregistered);

        events.subscribe("Y_BEFORE", "test", |_| Ok(())).unwrap();
        events.subscribe("Y_AFTER", "test", |_| Ok(())).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sibling_subscription_during_init_is_rejected() {
        let events = Arc::new(Events::new());
        let nested = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&events);
        let slot = nested.clone();
        events.init_on_first_subscribe("H_*", move || {
            if let Some(events) = weak.upgrade() {
                *slot.lock().unwrap() = Some(events.subscribe("H_AFTER", "sibling", |_| Ok(())));
            }
            Ok(())
        });

        events.subscribe("H_BEFORE", "test", |_| Ok(())).unwrap();

        let nested = nested.lock().unwrap().take().unwrap();
        assert!(matches!(nested, Err(Error::InitInProgress { ref event, .. }) if event == "H_AFTER"));
        assert_eq!(events.subscriber_count("H_AFTER"), 0);
        assert_eq!(events.state("H_AFTER"), EventState::Initialized);

        events.subscribe("H_AFTER", "sibling", |_| Ok(())).unwrap();
        assert_eq!(events.state("H_AFTER"), EventState::Active);
    }

    #[test]
    fn panicking_init_stays_armed() {
        let events = Events::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        events.init_on_first_subscribe("P_*", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("hook table not loaded");
            }
            Ok(())
        });

        assert!(matches!(
            events.subscribe("P_BEFORE", "test", |_| Ok(())),
            Err(Error::EventInit { .. })
        ));
        events.subscribe("P_BEFORE", "test", |_| Ok(())).unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn state_machine() {
        let events = Events::new();
        events.init_on_first_subscribe("Z_*", || Ok(()));

        assert_eq!(events.state("Z_BEFORE"), EventState::Unregistered);

        let handle = events.subscribe("Z_BEFORE", "test", |_| Ok(())).unwrap();
        assert_eq!(events.state("Z_BEFORE"), EventState::Active);
        // same hook group, nobody listening yet
        assert_eq!(events.state("Z_AFTER"), EventState::Initialized);

        assert!(events.unsubscribe(&handle));
        assert!(!events.unsubscribe(&handle));
        assert_eq!(events.state("Z_BEFORE"), EventState::Initialized);
    }

    #[test]
    fn delivers_in_subscription_order() {
        let events = Events::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            events
                .subscribe("E_BEFORE", name, move |ctx| {
                    seen.lock().unwrap().push((name, ctx.subject()));
                    Ok(())
                })
                .unwrap();
        }

        let outcome = events.signal_event("E_BEFORE", ObjectId(42));
        assert_eq!(outcome.delivered, 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", ObjectId(42)), ("second", ObjectId(42)), ("third", ObjectId(42))]
        );
    }

    #[test]
    fn failing_subscriber_does_not_stop_dispatch() {
        let metrics = Arc::new(MemorySink::new());
        let events = Events::with_metrics(metrics.clone());
        let reached = Arc::new(AtomicUsize::new(0));

        events.subscribe("F", "broken", |_| Err("boom".into())).unwrap();
        events
            .subscribe("F", "panicky", |_| -> Result<(), crate::error::BoxError> { panic!("oh no") })
            .unwrap();
        let counter = reached.clone();
        events
            .subscribe("F", "healthy", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let outcome = events.signal_event("F", ObjectId(1));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert!(outcome.failures[0].to_string().contains("broken"));

        assert_eq!(metrics.measurements("EventFailure").len(), 2);
        let dispatch = metrics.measurements("Event");
        assert_eq!(dispatch.len(), 1);
        assert_eq!(dispatch[0].get_tag("event"), Some("F"));
    }

    #[test]
    fn around_honours_skip_and_result() {
        let events = Events::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        events
            .subscribe("G_BEFORE", "skipper", move |ctx| {
                log.lock().unwrap().push("before");
                if ctx.subject() == ObjectId(2) {
                    ctx.skip();
                    ctx.set_result("42");
                }
                Ok(())
            })
            .unwrap();
        let log = order.clone();
        events
            .subscribe("G_AFTER", "observer", move |_| {
                log.lock().unwrap().push("after");
                Ok(())
            })
            .unwrap();

        let ran = events.around("G", ObjectId(1), || {
            order.lock().unwrap().push("original");
            7
        });
        assert_eq!(ran, Around::Ran(7));

        let skipped = events.around("G", ObjectId(2), || {
            order.lock().unwrap().push("original");
            7
        });
        assert_eq!(
            skipped,
            Around::Skipped {
                result: Some(String::from("42"))
            }
        );
        assert_eq!(skipped.or_parse(-1), 42);

        assert_eq!(
            *order.lock().unwrap(),
            vec!["before", "original", "after", "before", "after"]
        );
    }

    #[test]
    fn subscribers_read_signal_data() {
        let events = Events::new();
        let response = Arc::new(Mutex::new(None));

        let slot = response.clone();
        events
            .subscribe("NWNX_ON_OPENAI_RESPONSE", "test", move |ctx| {
                *slot.lock().unwrap() = ctx.data("RESPONSE").map(str::to_owned);
                Ok(())
            })
            .unwrap();

        events.signal(Signal::new("NWNX_ON_OPENAI_RESPONSE", ObjectId(0)).with_data("RESPONSE", "hello"));
        assert_eq!(response.lock().unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn signal_without_subscribers_is_a_no_op() {
        let metrics = Arc::new(MemorySink::new());
        let events = Events::with_metrics(metrics.clone());

        let outcome = events.signal_event("NOBODY", ObjectId::INVALID);
        assert_eq!(outcome.delivered, 0);
        assert!(metrics.samples().is_empty());
    }
}
