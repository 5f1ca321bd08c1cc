pub mod block_mapper;
pub mod block_repository;
pub mod config;
pub mod error;
pub mod storage;
