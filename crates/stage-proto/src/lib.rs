//! Shared types and pure logic for the OpenLP stage display.
//!
//! Everything here is free of I/O apart from config loading: channel
//! messages decode in [`protocol`], mutate a [`state::StageState`], and
//! [`render`] turns that state into the view pushed to stage pages.

pub mod config;
pub mod formatting;
pub mod lines;
pub mod platform;
pub mod protocol;
pub mod render;
pub mod state;
pub mod title;
