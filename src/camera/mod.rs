mod connection;
mod source;

pub use connection::ConnectionManager;
pub use source::{
    Backend, FrameSource, HttpConnector, HttpSnapshot, SnapshotSource, StreamConnector,
};
