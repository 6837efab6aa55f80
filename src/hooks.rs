//! Lifecycle hooks and statement observation.
//!
//! Subscribers are async closures kept in registration order. A `before_*`
//! subscriber may answer [`HookResult::Cancel`], which stops the remaining
//! subscribers and turns the pending operation into a no-op.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt};

use crate::cast::Record;
use crate::criteria::Criteria;
use crate::types::StorageValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    Continue,
    Cancel,
}

impl From<()> for HookResult {
    fn from(_: ()) -> Self {
        HookResult::Continue
    }
}

/// Returned on registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl HookId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HookId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

pub type Hook<A, R> = Arc<dyn Fn(A) -> BoxFuture<'static, R> + Send + Sync>;

// ------------- HookSet -------------
pub struct HookSet<A, R> {
    entries: Mutex<Vec<(HookId, Hook<A, R>)>>,
}

impl<A: Clone + Send + 'static, R: Send + 'static> HookSet<A, R> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn add<F, Fut>(&self, hook: F) -> HookId
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let id = HookId::next();
        let hook: Hook<A, R> = Arc::new(move |argument| hook(argument).boxed());
        self.lock().push((id, hook));
        id
    }

    pub fn remove(&self, id: HookId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(kept, _)| *kept != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // the guard is released before any subscriber is awaited
    fn snapshot(&self) -> Vec<Hook<A, R>> {
        self.lock().iter().map(|(_, hook)| Arc::clone(hook)).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(HookId, Hook<A, R>)>> {
        // a panicking subscriber never holds this lock, so poisoning is harmless
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<A: Clone + Send + 'static, R: Send + 'static> Default for HookSet<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Clone + Send + 'static> HookSet<A, HookResult> {
    /// Runs subscribers in order until one cancels.
    pub async fn run(&self, argument: A) -> HookResult {
        for hook in self.snapshot() {
            if hook(argument.clone()).await == HookResult::Cancel {
                return HookResult::Cancel;
            }
        }
        HookResult::Continue
    }
}

impl<A: Clone + Send + 'static> HookSet<A, ()> {
    pub async fn notify(&self, argument: A) {
        for hook in self.snapshot() {
            hook(argument.clone()).await;
        }
    }
}

// ------------- Model hooks -------------
/// What a `before_update` subscriber gets to see.
#[derive(Debug, Clone)]
pub struct UpdateArgs {
    pub criteria: Criteria,
    pub data: Record,
}

#[derive(Default)]
pub struct ModelHooks {
    pub before_create: HookSet<Record, HookResult>,
    pub after_create: HookSet<Record, ()>,
    pub before_update: HookSet<UpdateArgs, HookResult>,
    pub after_update: HookSet<Record, ()>,
    pub before_remove: HookSet<Criteria, HookResult>,
    pub after_remove: HookSet<Record, ()>,
}

impl ModelHooks {
    pub fn remove(&self, id: HookId) -> bool {
        self.before_create.remove(id)
            || self.after_create.remove(id)
            || self.before_update.remove(id)
            || self.after_update.remove(id)
            || self.before_remove.remove(id)
            || self.after_remove.remove(id)
    }
}

// ------------- Query observation -------------
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// The model the statement ran for, if any.
    pub model: Option<String>,
    pub sql: String,
    pub params: Vec<StorageValue>,
    /// Set for statements issued by the store itself, e.g. change capture.
    pub internal: bool,
}

struct Observer {
    id: HookId,
    include_internal: bool,
    model: Option<String>,
    hook: Hook<QueryEvent, ()>,
}

tokio::task_local! {
    // set on the task that is currently delivering events
    static DELIVERING: ();
}

/// Query observers and the queue of statements waiting to be shown to them.
///
/// Events are queued in execution order and delivered by one task at a time.
/// A store call made from inside an observer returns before its own events
/// are delivered; they follow once the current event has been handled.
#[derive(Default)]
pub struct QueryHooks {
    observers: Mutex<Vec<Observer>>,
    outbox: Mutex<VecDeque<QueryEvent>>,
    delivery: tokio::sync::Mutex<()>,
}

impl QueryHooks {
    pub fn add<F, Fut>(&self, model: Option<&str>, include_internal: bool, hook: F) -> HookId
    where
        F: Fn(QueryEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = HookId::next();
        let hook: Hook<QueryEvent, ()> = Arc::new(move |event| hook(event).boxed());
        self.lock().push(Observer {
            id,
            include_internal,
            model: model.map(str::to_owned),
            hook,
        });
        id
    }

    pub fn remove(&self, id: HookId) -> bool {
        let mut observers = self.lock();
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    /// Queues events for delivery. Nothing is queued while nobody observes.
    pub fn enqueue(&self, events: Vec<QueryEvent>) {
        if events.is_empty() || self.lock().is_empty() {
            return;
        }
        self.outbox().extend(events);
    }

    /// Drains the queue, handing each event to every interested observer
    /// before the next one. Returns once everything queued so far has been
    /// delivered, unless called from within a delivery on this task.
    pub async fn deliver(&self) {
        if DELIVERING.try_with(|_| ()).is_ok() {
            return;
        }
        let _turn = self.delivery.lock().await;
        DELIVERING
            .scope((), async {
                while let Some(event) = self.next_event() {
                    self.dispatch(event).await;
                }
            })
            .await;
    }

    async fn dispatch(&self, event: QueryEvent) {
        let interested: Vec<Hook<QueryEvent, ()>> = self
            .lock()
            .iter()
            .filter(|o| !event.internal || o.include_internal)
            .filter(|o| o.model.is_none() || o.model == event.model)
            .map(|o| Arc::clone(&o.hook))
            .collect();
        for hook in interested {
            hook(event.clone()).await;
        }
    }

    fn next_event(&self) -> Option<QueryEvent> {
        self.outbox().pop_front()
    }

    fn outbox(&self) -> MutexGuard<'_, VecDeque<QueryEvent>> {
        self.outbox.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Observer>> {
        self.observers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
