pub mod app;

pub mod client;

pub mod game;

pub mod pair;

pub mod push;

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
