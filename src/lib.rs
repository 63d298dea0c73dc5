pub mod app;
pub mod assets;
pub mod atlas;
pub mod canvas;
pub mod config;
pub mod runtime;
pub mod skeleton;
