mod algorithm;
mod round_robin;
mod sticky;

pub use algorithm::BackendSelector;
pub use round_robin::RoundRobinCursor;
pub use sticky::SessionRouter;
