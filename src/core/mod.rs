//! Core domain models for shipr.
//!
//! This module contains the task model and the task graph the scheduler
//! plans runs from.

pub mod dag;
pub mod task;

pub use dag::{ExecutionPlan, TaskGraph, DEFAULT_TASK};
pub use task::{Task, TaskBody, TaskInfo, TaskStatus};
