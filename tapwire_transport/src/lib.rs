pub mod connection;
pub mod transport;

pub use connection::{Connection, MAX_FRAME_SIZE, frame_codec};
pub use transport::{Role, Transport};
