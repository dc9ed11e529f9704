//! ctxfilter - context filtering proxy for small local models
//!
//! This crate provides a transparent HTTP proxy that sits in front of a
//! local model server and strips agent context (repository trees,
//! environment blocks, instruction files, redundant tools) that small models
//! cannot make use of.

pub mod audit;
pub mod config;
pub mod error;
pub mod filter;
pub mod proxy;

pub use error::CtxFilterError;
