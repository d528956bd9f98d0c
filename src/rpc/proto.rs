//! Generated from `proto/supervisor/v1/events.proto` at build time.

include!(concat!(env!("OUT_DIR"), "/supervisor.v1.rs"));
