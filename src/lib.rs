pub mod config;
pub mod device;
pub mod serial;

pub use config::{FieldLayout, LinkConfig};
pub use serial::{
    ConnectionState, DecodeError, Field, Frame, Link, LinkBuilder, LinkError, LinkNotice, OnBadToken,
};
