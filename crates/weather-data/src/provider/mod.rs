//! 외부 데이터 공급자.

pub mod adrinfo;
pub mod cnn;
pub mod krx;

pub use adrinfo::{AdrConfig, AdrInfoSnapshot, AdrScraper};
pub use cnn::{CnnConfig, CnnFetcher};
pub use krx::{KrxConfig, VkospiResolver};
