//! Running asynchronous flows inside a context.

use super::{Context, ContextKey};
use crate::combinator::{a_later, a_now};
use crate::promise::Promise;
use crate::runtime::Vat;
use crate::types::Value;

/// Runs `action` now inside `context`.
///
/// Continuations that `action` registers with `listen`/`listen_on` (and
/// every combinator built on them) capture `context`, so the whole flow
/// keeps seeing it after the call returns.
pub fn in_context<T, F>(context: &Context, action: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> Promise<T>,
{
    context.run(|| a_now(action))
}

/// Runs `action` now inside the current context extended with `value`.
pub fn in_context_with<K, T, F>(key: ContextKey<K>, value: K, action: F) -> Promise<T>
where
    K: Send + Sync + 'static,
    T: Value,
    F: FnOnce() -> Promise<T>,
{
    in_context(&Context::current().with(key, value), action)
}

/// Runs `action` later on `vat`, inside `context`.
pub fn in_context_async<T, F>(context: &Context, vat: &Vat, action: F) -> Promise<T>
where
    T: Value,
    F: FnOnce() -> Promise<T> + Send + 'static,
{
    a_later(vat, context.wrap(move || a_now(action)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::a_value;
    use crate::runtime::{block_on, new_daemon_vat};

    #[test]
    fn continuations_on_other_vats_see_the_registering_context() {
        let key = ContextKey::<&'static str>::new("request");
        let helper = new_daemon_vat("ctx-helper");
        let seen = block_on(move || {
            in_context_with(key, "r-17", move || {
                a_later(&helper, || a_value(()))
                    .map(move |()| Context::current().get(key))
            })
        })
        .expect("flow");
        assert_eq!(seen, Some("r-17"));
    }

    #[test]
    fn async_body_runs_inside_context() {
        let key = ContextKey::<u32>::new("attempt");
        let ctx = Context::empty().with(key, 3);
        let helper = new_daemon_vat("ctx-async");
        let seen = block_on(move || {
            in_context_async(&ctx, &helper, move || a_value(Context::current().get(key)))
        })
        .expect("flow");
        assert_eq!(seen, Some(3));
    }
}
