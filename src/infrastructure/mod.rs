pub mod codecs;
pub mod config;
pub mod db;
