//! Intermediate stream files and the final container.

pub mod matroska;
pub mod mux;
pub mod stream_file;

pub use mux::{mux_session, remove_intermediate, remove_intermediates, MuxRequest};
