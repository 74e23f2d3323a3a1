//! HTTP message model and transport
//!
//! Messages are handled as header text plus body text so fuzz gaps can be
//! spliced into either; the transport sends them through reqwest.

#![allow(dead_code)]

mod message;
mod sender;

pub use message::{HttpMessage, RequestHeader, ResponseHeader};
pub use sender::{HttpSender, ReqwestSender};
