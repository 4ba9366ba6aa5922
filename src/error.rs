use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("interface {name} not found")]
    InterfaceNotFound { name: String },

    #[error("port {0} not found")]
    PortNotFound(usize),

    #[error("flow table {name} not found")]
    TableNotFound { name: String },

    #[error("flow table full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("received frame of {len} bytes exceeds the {max} byte receive buffer")]
    FrameTooLarge { len: usize, max: usize },

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
