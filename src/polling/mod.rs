mod adaptive;
mod poller;

pub use adaptive::{AdaptivePoller, AdaptivePollerBuilder};
pub use poller::{FetchFuture, Poller, PollerBuilder};
