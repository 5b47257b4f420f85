pub mod file_storage;
pub mod gateway;
pub mod hasher;
pub mod s3_storage;
pub mod storage;
pub mod storage_service;
