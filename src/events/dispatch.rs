use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use super::pattern::{EventPattern, Phase};
use crate::error::{BoxError, Error, Result};
use crate::metrics::{MetricsSink, Sample, TracingSink};
use crate::stack::ObjectId;

/// What a subscriber sees of one signalled event.
///
/// The context is shared by every subscriber of the same dispatch, so a skip
/// request or result set by one is visible to those after it.
pub struct EventContext<'a> {
    event: &'a str,
    subject: ObjectId,
    data: &'a HashMap<String, String>,
    skipped: bool,
    result: Option<String>,
}

impl<'a> EventContext<'a> {
    pub fn event(&self) -> &str {
        self.event
    }

    pub fn subject(&self) -> ObjectId {
        self.subject
    }

    /// Data the signalling interceptor attached to this occurrence.
    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    /// Asks the signalling interceptor not to run the original implementation.
    ///
    /// Only meaningful in a BEFORE phase.
    pub fn skip(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn set_result(&mut self, result: impl Into<String>) {
        self.result = Some(result.into());
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }
}

/// A callback subscribed to an event name.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, ctx: &mut EventContext<'_>) -> std::result::Result<(), BoxError>;
}

impl<F> Subscriber for F
where
    F: for<'a> Fn(&mut EventContext<'a>) -> std::result::Result<(), BoxError> + Send + Sync,
{
    fn on_event(&self, ctx: &mut EventContext<'_>) -> std::result::Result<(), BoxError> {
        (self)(ctx)
    }
}

/// One occurrence of an event, as built by an interceptor.
#[derive(Clone, Debug)]
pub struct Signal {
    event: String,
    subject: ObjectId,
    data: HashMap<String, String>,
}

impl Signal {
    pub fn new(event: impl Into<String>, subject: ObjectId) -> Self {
        Self {
            event: event.into(),
            subject,
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// What came back from one dispatch.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Subscribers that returned successfully.
    pub delivered: usize,
    /// One entry per failed subscriber, tagged with the event and subscriber name.
    pub failures: Vec<Error>,
    pub skipped: bool,
    pub result: Option<String>,
}

/// Lifecycle of one event name. Hooks are never uninstalled, so there is no way back
/// to [`EventState::Unregistered`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventState {
    Unregistered,
    /// Its hooks are installed but nobody is listening.
    Initialized,
    Active,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    event: String,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

type InitFn = Box<dyn FnMut() -> std::result::Result<(), BoxError> + Send>;

enum InitState {
    Pending(InitFn),
    /// The initialiser has been taken out and is running on some thread.
    Running,
    Done,
}

struct InitRule {
    pattern: EventPattern,
    state: InitState,
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    subscriber: Arc<str>,
    handler: Arc<dyn Subscriber>,
}

/// Maps event names to subscribers, installing the hooks behind an event the
/// first time somebody listens to it.
///
/// Dispatch is synchronous: [`Events::signal`] runs every current subscriber
/// of the name, in subscription order, on the calling thread, before it
/// returns.
pub struct Events {
    rules: Mutex<Vec<InitRule>>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    initialized: Mutex<HashSet<String>>,
    next_id: AtomicU64,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl Events {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(TracingSink))
    }

    pub fn with_metrics(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            subscriptions: RwLock::new(HashMap::new()),
            initialized: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            metrics,
        }
    }

    fn rules(&self) -> MutexGuard<'_, Vec<InitRule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialized(&self) -> MutexGuard<'_, HashSet<String>> {
        self.initialized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `init` to run the first time any name matching `pattern` is subscribed to.
    ///
    /// `init` typically installs the hooks that signal the matching events. It runs at
    /// most once successfully; if it fails, the subscription that triggered it is
    /// rejected and the next matching subscription tries again. A matching subscription
    /// made while `init` is still running, from `init` itself or another thread, fails
    /// with [`Error::InitInProgress`].
    pub fn init_on_first_subscribe<F>(&self, pattern: &str, init: F)
    where
        F: FnMut() -> std::result::Result<(), BoxError> + Send + 'static,
    {
        let pattern = EventPattern::parse(pattern);
        tracing::debug!(%pattern, "registered lazy event initialisation");

        self.rules().push(InitRule {
            pattern,
            state: InitState::Pending(Box::new(init)),
        });
    }

    fn run_init(&self, event: &str) -> Result<()> {
        let pending: Vec<(usize, InitFn)> = {
            let mut rules = self.rules();

            // a rule mid-initialisation has not installed its hooks yet
            if let Some(rule) = rules
                .iter()
                .find(|rule| matches!(rule.state, InitState::Running) && rule.pattern.matches(event))
            {
                tracing::warn!(pattern = %rule.pattern, event, "subscription overlaps a running initialisation");
                return Err(Error::InitInProgress {
                    event: event.to_owned(),
                    pattern: rule.pattern.to_string(),
                });
            }

            rules
                .iter_mut()
                .enumerate()
                .filter(|(_, rule)| rule.pattern.matches(event))
                .filter_map(|(index, rule)| match std::mem::replace(&mut rule.state, InitState::Running) {
                    InitState::Pending(init) => Some((index, init)),
                    other => {
                        rule.state = other;
                        None
                    }
                })
                .collect()
        };

        let mut failure = None;
        for (index, mut init) in pending {
            let result = match failure {
                None => Some(
                    panic::catch_unwind(AssertUnwindSafe(|| init()))
                        .unwrap_or_else(|payload| Err(panic_message(payload).into())),
                ),
                Some(_) => None,
            };

            let mut rules = self.rules();
            let rule = &mut rules[index];
            match result {
                Some(Ok(())) => {
                    rule.state = InitState::Done;
                    tracing::info!(pattern = %rule.pattern, event, "initialised event hooks");
                }
                Some(Err(source)) => {
                    tracing::error!(pattern = %rule.pattern, event, error = %source, "event initialisation failed");
                    rule.state = InitState::Pending(init);
                    failure = Some(source);
                }
                None => rule.state = InitState::Pending(init),
            }
        }

        match failure {
            Some(source) => Err(Error::EventInit {
                event: event.to_owned(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Subscribes `handler` to the exact event name `event`.
    ///
    /// `subscriber` identifies the consumer in diagnostics.
    pub fn subscribe<F>(&self, event: &str, subscriber: &str, handler: F) -> Result<SubscriptionHandle>
    where
        F: for<'a> Fn(&mut EventContext<'a>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribe_with(event, subscriber, Arc::new(handler))
    }

    /// Like [`Events::subscribe`], for handlers implementing [`Subscriber`] themselves.
    pub fn subscribe_with(
        &self,
        event: &str,
        subscriber: &str,
        handler: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionHandle> {
        self.run_init(event)?;
        self.initialized().insert(event.to_owned());

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_owned())
            .or_default()
            .push(Subscription {
                id,
                subscriber: Arc::from(subscriber),
                handler,
            });

        tracing::debug!(event, subscriber, "subscribed");
        Ok(SubscriptionHandle {
            event: event.to_owned(),
            id,
        })
    }

    /// Removes a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscriptions.get_mut(&handle.event) else {
            return false;
        };

        let before = list.len();
        list.retain(|subscription| subscription.id != handle.id);
        before != list.len()
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn state(&self, event: &str) -> EventState {
        if self.subscriber_count(event) > 0 {
            return EventState::Active;
        }

        let initialized = self.initialized().contains(event)
            || self
                .rules()
                .iter()
                .any(|rule| matches!(rule.state, InitState::Done) && rule.pattern.matches(event));

        if initialized {
            EventState::Initialized
        } else {
            EventState::Unregistered
        }
    }

    /// Notifies every subscriber of `event` about `subject`.
    pub fn signal_event(&self, event: &str, subject: ObjectId) -> Outcome {
        self.signal(Signal::new(event, subject))
    }

    /// Delivers `signal` to every current subscriber of its name.
    ///
    /// A failing or panicking subscriber is logged, reported to the metrics sink and
    /// returned in [`Outcome::failures`]; the remaining subscribers still run.
    pub fn signal(&self, signal: Signal) -> Outcome {
        let subscriptions = match self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&signal.event)
        {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return Outcome::default(),
        };

        let started = Instant::now();
        let mut ctx = EventContext {
            event: &signal.event,
            subject: signal.subject,
            data: &signal.data,
            skipped: false,
            result: None,
        };

        let mut outcome = Outcome::default();
        for subscription in &subscriptions {
            let result = panic::catch_unwind(AssertUnwindSafe(|| subscription.handler.on_event(&mut ctx)));

            let source: BoxError = match result {
                Ok(Ok(())) => {
                    outcome.delivered += 1;
                    continue;
                }
                Ok(Err(source)) => source,
                Err(payload) => panic_message(payload).into(),
            };

            tracing::warn!(
                event = %signal.event,
                subject = %signal.subject,
                subscriber = %subscription.subscriber,
                error = %source,
                "event subscriber failed"
            );
            self.metrics.push(
                Sample::new("EventFailure")
                    .field("count", 1)
                    .tag("event", signal.event.as_str())
                    .tag("subscriber", &*subscription.subscriber),
            );
            outcome.failures.push(Error::handler(
                format!("subscriber `{}` of {}", subscription.subscriber, signal.event),
                source,
            ));
        }

        outcome.skipped = ctx.skipped;
        outcome.result = ctx.result;

        self.metrics.push(
            Sample::new("Event")
                .elapsed(started.elapsed())
                .field("subscribers", subscriptions.len())
                .tag("event", signal.event.as_str()),
        );

        outcome
    }

    /// Signals `<name>_BEFORE`, runs `original` unless a BEFORE subscriber skipped it,
    /// then signals `<name>_AFTER`.
    ///
    /// A skipped call hands back whatever result the BEFORE subscribers set, for the
    /// interceptor to return to the host in place of the original's.
    pub fn around<R, F>(&self, name: &str, subject: ObjectId, original: F) -> Around<R>
    where
        F: FnOnce() -> R,
    {
        let before = self.signal_event(&format!("{}_{}", name, Phase::Before.suffix()), subject);
        let around = if before.skipped {
            Around::Skipped { result: before.result }
        } else {
            Around::Ran(original())
        };
        self.signal_event(&format!("{}_{}", name, Phase::After.suffix()), subject);
        around
    }
}

/// How [`Events::around`] went.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Around<R> {
    /// The original ran and returned this.
    Ran(R),
    /// A BEFORE subscriber skipped the original, optionally leaving a result in its place.
    Skipped { result: Option<String> },
}

impl<R> Around<R> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// The original's return value, or the skip result parsed as `R`, or `fallback`.
    pub fn or_parse(self, fallback: R) -> R
    where
        R: std::str::FromStr,
    {
        match self {
            Self::Ran(value) => value,
            Self::Skipped { result } => result
                .and_then(|result| result.parse().ok())
                .unwrap_or(fallback),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        String::from("panicked")
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscriptions = self.subscriptions.read().unwrap_or_else(PoisonError::into_inner);
        let mut map = f.debug_map();
        for (event, list) in subscriptions.iter() {
            map.entry(event, &list.len());
        }
        map.finish()
    }
}
