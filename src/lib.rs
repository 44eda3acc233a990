extern crate core;

pub mod config;
pub mod error;
pub mod jsonpath;
pub mod matcher;
pub mod mapping;
pub mod registry;
pub mod message;
pub mod validator;
pub mod table;
pub mod response;
pub mod dispatch;
pub mod server;
pub mod loader;
pub mod watch;
pub mod logging;

pub mod built_info {
  include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
