//! Mobile-web adapter for the bot core.
//!
//! Implements the core's auth/fetch/outbound ports against the platform's
//! m.weibo.cn endpoints, with credential (cookie) persistence.

pub mod client;
pub mod cookies;

pub use client::WeiboClient;
