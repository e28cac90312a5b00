//! A controllable synthetic HTTP traffic generator.
//!
//! Given a target, a declarative site map and load parameters this library
//! simulates many independent users issuing a continuous stream of HTTP
//! requests against the target. Throughput is observable while generation
//! runs and generation can be stopped and restarted at will through
//! [`controller::Controller`].

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod auth;
pub mod config;
pub mod controller;
pub mod entropy;
pub mod executor;
pub mod generator;
pub mod matcher;
pub mod persona;
pub mod sitemap;
pub mod target;
pub mod user;
pub mod vars;
pub mod window;
