//! Scripted smoke-test client for LSP servers.
//!
//! Spawns a language server, talks to it over Content-Length framed JSON-RPC
//! on stdio, and drives a fixed scenario: initialize handshake, open a
//! document, request completion, shut down. Every step is reported
//! individually so a broken server produces a diagnosis, not a stack trace.

pub mod app;
pub mod cli;
pub mod lsp;
pub mod scenario;
