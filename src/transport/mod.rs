mod endpoint;
mod http_transport;
mod prepared_upstream;

pub use endpoint::{selector_for, EndpointSelector, RandomChoice, RoundRobin};
pub use http_transport::HttpTransport;
pub use prepared_upstream::PreparedUpstream;
