//! Finch core library: config, the DashScope application client, the request dispatcher, and
//! the session reconciler with its HTML transcripts, shared by the desktop app and the CLI.

pub mod config;
pub mod dispatch;
pub mod init;
pub mod llm;
pub mod models;
pub mod reconcile;
pub mod session;
pub mod transcript;
