//! Combinators for structured asynchronous composition.
//!
//! This module provides the flows built on top of [`Promise`](crate::Promise):
//!
//! - [`core`](mod@core): Constant promises, immediate and deferred execution, sends
//! - [`seq`]: Sequential steps, `finally_do`, and asynchronous loops
//! - [`all`]: Parallel branches that resolve when every branch is known
//! - [`any`]: Parallel branches where the first (successful) outcome wins
//! - [`resource`]: Closeable resources and scopes that always release them
//!
//! None of the combinators retry. A failure short-circuits sequential flows
//! and is aggregated deterministically by parallel ones.

pub mod all;
pub mod any;
pub mod core;
pub mod resource;
pub mod seq;

pub use self::all::{
    All1, All2, All3, AllBuilder, a_all, a_all_for_collect, a_par, a_par_for_collect,
};
pub use self::any::{AnyBuilder, a_any, a_any_prefer_success};
pub use self::core::{
    a_bool, a_daemon_get, a_failure, a_false, a_later, a_later_default, a_never, a_none, a_now,
    a_one_way, a_outcome, a_resolver, a_send, a_some, a_true, a_value, a_void,
};
pub use self::resource::{
    AsyncCloseable, CloseState, Try1, Try2, Try3, a_try, a_try_promise, a_try_resource,
    close_resource,
};
pub use self::seq::{
    SeqBuilder, a_seq, a_seq_for_collect, a_seq_for_unit, a_seq_until_value, a_seq_while,
};
