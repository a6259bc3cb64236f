//! Attempt and retake orchestration for sectioned test modules.
//!
//! A module is a list of question groups addressed through one flat item
//! index. The learner answers every group once, sees a banded score, then
//! walks the same items again with the wrong ones reopened.

pub mod app;
pub mod collab;
pub mod config;
pub mod engine;
pub mod event;
pub mod module;
pub mod session;
pub mod store;
