//! Backpressured asynchronous streams.
//!
//! Pull streams are read one element at a time with
//! [`next`](AsyncStream::next); sinks accept elements with
//! [`put`](AsyncSink::put) and slow the writer down by resolving late.
//!
//! - [`stream`](mod@stream): the [`AsyncStream`] and [`AsyncSink`] traits
//! - [`base`]: [`StreamBase`], the single-consumer bookkeeping shared by most streams
//! - [`iter`]: sources over producers, iterators, and ranges
//! - [`map`]: pipelining map stage and [`SerializedStream`]
//! - [`transform`]: sequential filter, flat-map, head, and dedup stages
//! - [`window`](mod@window): bounded read-ahead preserving order
//! - [`builder`]: [`PullStreamBuilder`], the fluent front end
//! - [`push`]: [`PushStreamBuilder`], pipelines of transforming sinks
//! - [`rendezvous`]: connected in-memory sink/stream pairs, unbuffered or buffered
//! - [`connect`](mod@connect): copying a stream into a sink
//! - [`export`]: vat-bound proxies

pub mod base;
pub mod builder;
pub mod connect;
pub mod export;
pub mod iter;
pub mod map;
pub mod push;
pub mod rendezvous;
pub mod stream;
pub mod transform;
pub mod window;

pub use base::StreamBase;
pub use builder::PullStreamBuilder;
pub use connect::connect;
pub use export::{ExportedSink, ExportedStream, export_sink};
pub use iter::Streams;
pub use map::{MapStream, SerializedStream};
pub use push::PushStreamBuilder;
pub use rendezvous::{BufferedQueue, QueueSink, RendezvousQueue};
pub use stream::{AsyncSink, AsyncStream, SharedSink, SharedStream};
pub use window::window;
