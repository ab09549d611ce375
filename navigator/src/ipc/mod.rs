//! S-expression IPC over line-framed streams.

pub mod dispatch;
pub mod server;

pub use server::{default_socket_path, serve_socket, serve_stdio, ClientSession};
