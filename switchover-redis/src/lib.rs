#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod connector;
pub mod error;
pub mod ping;
pub mod pool;

#[doc(inline)]
pub use crate::connector::RedisConnector;
#[doc(inline)]
pub use crate::error::{Error, classify, to_command_error};
#[doc(inline)]
pub use crate::ping::PingStrategy;
#[doc(inline)]
pub use crate::pool::RedisPool;
