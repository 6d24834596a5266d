pub mod device;
pub mod entity;
pub mod envelope;
pub mod remote;
pub mod snapshot;
