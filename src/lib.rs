pub mod app;
pub mod config;
pub mod convert;
pub mod document;
pub mod domain;
pub mod enumerate;
pub mod error;
pub mod output;
pub mod plan;
pub mod resolver;
pub mod runner;
pub mod service;
