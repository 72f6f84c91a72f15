pub mod throttle;

pub use throttle::Throttler;
