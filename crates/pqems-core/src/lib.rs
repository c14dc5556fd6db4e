//! Core contracts for PQEMS: secret storage backends and the codec strategies
//! the file pipeline composes. Kept free of crypto and platform dependencies.

pub mod codec;
pub mod storage;
