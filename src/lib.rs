//! # cacheroute
//!
//! A request-interception cache router. Every request is classified by an
//! ordered route table into one of five caching strategies and answered from
//! a versioned, persistent cache store, the network, or both.
//!
//! The pieces are usable on their own:
//!
//! - [`router::RouteTable`] maps URLs to a [`strategy::Strategy`].
//! - [`strategy::Executor`] runs a strategy against a [`cache::CacheStore`]
//!   and a [`fetch::Fetch`] collaborator.
//! - [`lifecycle::Worker`] owns one deployed version: install, activate,
//!   per-request handling, control messages.
//! - [`proxy::Proxy`] and [`server::Server`] put a worker in front of an
//!   upstream HTTP origin.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cacheroute::cache::MemoryCacheStore;
//! use cacheroute::clock::SystemClock;
//! use cacheroute::config::ServerConfig;
//! use cacheroute::fetch::HttpFetcher;
//! use cacheroute::lifecycle::{Worker, WorkerSettings};
//! use cacheroute::proxy::Proxy;
//! use cacheroute::router::RouteTable;
//! use cacheroute::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut settings = WorkerSettings::new("http://127.0.0.1:3000", "v1");
//!     settings.skip_waiting = true;
//!     let worker = Worker::new(
//!         settings,
//!         RouteTable::builtin(),
//!         Arc::new(MemoryCacheStore::new()),
//!         Arc::new(HttpFetcher::new()),
//!         Arc::new(SystemClock),
//!     );
//!     worker.install().await?;
//!
//!     let proxy = Proxy::new(Arc::new(worker), &ServerConfig::default());
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req| {
//!             let proxy = proxy.clone();
//!             async move { proxy.respond(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod fetch;
pub mod http;
pub mod lifecycle;
pub mod proxy;
pub mod router;
pub mod server;
pub mod strategy;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use lifecycle::{ControlMessage, Phase, Worker};
pub use server::{Server, ServerError};
pub use strategy::Strategy;
