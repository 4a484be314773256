//! The library code for the `lbe` blog server. A request generally passes
//! through three layers:
//!
//! 1. Routing and request handling ([`crate::server`], [`crate::views`])
//! 2. Reading and writing rows ([`crate::store`]), validating submitted
//!    forms ([`crate::forms`]) and checking who is asking ([`crate::auth`])
//! 3. Rendering the result, either as a themed page ([`crate::render`]) or as
//!    an RSS feed ([`crate::feed`])
//!
//! The one piece with any shape of its own is [`crate::tree`], which turns an
//! article's flat, chronological comment list into reply threads.
//!
//! Articles aren't authored through the web interface; they're written as
//! markdown files and loaded with [`crate::import`].

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod auth;
pub mod config;
pub mod csrf;
pub mod feed;
pub mod forms;
pub mod htmlrenderer;
pub mod import;
pub mod mail;
pub mod markdown;
pub mod models;
pub mod page;
pub mod render;
pub mod server;
pub mod store;
pub mod tree;
pub mod views;
