pub mod config;
pub mod error;
pub mod types;

pub use config::SecsendConfig;
pub use error::{SecsendError, SecsendResult, TransportError, TransportErrorKind};
pub use types::{parse_any_file_id, FileId, IdKind, RootId, ID_LEN};
