#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod app;
pub mod config;
pub mod crawler;
pub mod model;
pub mod morph;
pub mod observability;
pub mod pipeline;
pub mod review;
pub mod tagger;
pub mod util;
