//! Server crate for toolhub: configuration, composition root, the MCP
//! protocol facade, the admin/REST surface, and the runtime entry point.
//!
//! - `config`: environment-driven settings, validated at boot.
//! - `app`: constructs one set of clients and services and hands them to the
//!   facade; no implicit global state.
//! - `handler`: rmcp `ServerHandler` exposing `find_tool`, `call_tool`,
//!   `call_tool_summarized`, `list_tools`, and `get_tool_schema`, plus
//!   read-only resources and prompt templates.
//! - `admin`: axum routes for `/mcp/*`, `/admin/*`, and the health probes.
//! - `http_transport`: combined HTTP server (REST + streamable-HTTP MCP).
//! - `runtime`: startup sequence, seeding, auto-sync, graceful shutdown.

pub mod admin;
pub mod app;
pub mod config;
pub mod handler;
pub mod http_transport;
pub mod runtime;

pub use app::ToolService;
pub use config::{AppEnv, Settings};
pub use runtime::run;
