mod strategy;

pub use strategy::{RetryDecision, RetryError, RetryStrategy};
