//! Frame extraction worker
//!
//! Polls a job queue for uploaded videos, samples frames from each with
//! ffmpeg, zips the frames, publishes the archive to object storage and
//! notifies the requester. Every received message is removed from the queue
//! once handled, whether or not processing succeeded.

pub mod app_state;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod services;
