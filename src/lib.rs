//! Chat client built around a feed synchronization engine: one ordered,
//! duplicate-free view of a message log fed by live pushes and backward
//! pagination at the same time.

pub mod common;
pub mod config;
pub mod feed;
pub mod network;
pub mod storage;
pub mod ui;
