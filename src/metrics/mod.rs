mod observations;
mod pushgateway;

pub use observations::{observations, MetricsSource};
pub use pushgateway::PushGateway;
