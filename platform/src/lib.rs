pub mod client;
pub mod export;
pub mod graph;
pub mod ops;
pub mod rest;
pub mod value;
pub mod worker;
