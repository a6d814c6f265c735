//! secsend-storage: the transport contract and an OpenDAL blob store implementing it

pub mod health;
pub mod object;
pub mod operator;
pub mod transport;

pub use health::check_health;
pub use object::ObjectTransport;
pub use operator::{build_operator, S3Credentials};
pub use transport::{Transport, TransportConfig};
