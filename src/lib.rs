//! Bucket ACL probe - write/append/copy scenarios with ACL verification
//!
//! This library drives deterministic payloads into an object store through
//! new, appended and copied objects, then checks that the stored bytes and
//! the owner's access grant are what the bucket promises.

pub mod config;
pub mod oracle;
pub mod orchestrator;
pub mod payload;
pub mod storage;
pub mod types;
pub mod verify;
pub mod writer;
