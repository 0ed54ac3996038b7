//! `kvdb` CLI Tools.
//!
//! ## Getting started
//!
//! ```doc
//! ❯ ./kvdb
//!
//! ██  ██  █        █
//! ██ ██   ██      ██
//! ███      ██    ██
//! ██ ██     ██  ██
//! ██  ██     ████  KV Storage CLI
//!
//! Welcome to kvdb.
//!
//! kvdb > SET order_key xxx
//! OK ~
//!
//! kvdb > GET order_key
//! xxx
//!
//! kvdb > DELETE order_key
//! OK ~
//!
//! kvdb > GET order_key
//! (nil)
//! ```

pub mod command;
pub mod config;
pub mod rusty;
pub mod session;
pub mod show;
pub mod trace;
