//! Callback dispatcher (§4.I): a uniform invocation indirection the facade
//! can use to route every session callback through, e.g., a host UI thread.

use std::sync::Arc;

/// A boxed `Fn(T)` the session invokes instead of calling a continuation directly.
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Wraps `f` behind `dispatcher`, so every invocation of the returned
/// callback is routed through `dispatcher` first. Defaults to identity when
/// the facade configures none.
pub fn wrap<T: 'static>(dispatcher: Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>, f: Callback<T>) -> Callback<T>
where
    T: Send,
{
    Arc::new(move |value: T| {
        let f = Arc::clone(&f);
        dispatcher(Box::new(move || f(value)));
    })
}

/// The identity dispatcher: runs the callback inline, on the calling thread.
pub fn identity_dispatcher() -> Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync> {
    Arc::new(|run| run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn identity_dispatcher_runs_callback_inline() {
        let dispatcher = identity_dispatcher();
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);
        let wrapped: Callback<u32> = wrap(dispatcher, Arc::new(move |v| seen_clone.store(v, Ordering::SeqCst)));
        wrapped(42);
        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn custom_dispatcher_intercepts_every_call() {
        let invocation_count = Arc::new(AtomicU32::new(0));
        let count_clone = Arc::clone(&invocation_count);
        let dispatcher: Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync> = Arc::new(move |run| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            run();
        });
        let wrapped: Callback<&'static str> = wrap(dispatcher, Arc::new(|_v| {}));
        wrapped("hello");
        wrapped("world");
        assert_eq!(invocation_count.load(Ordering::SeqCst), 2);
    }
}
