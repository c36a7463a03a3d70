//! subrelay - automated bilingual subtitle relay
//!
//! Downloads new videos from watched channels, repairs and merges their
//! subtitles, translates them through an LLM, burns bilingual subtitles in with
//! ffmpeg and republishes the result.

pub mod acquire;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod lock;
pub mod media;
pub mod monitor;
pub mod publish;
pub mod render;
pub mod subtitle;
pub mod translate;
pub mod workflow;
