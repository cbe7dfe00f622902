//! Integration test suite for shipr.
//!
//! These tests drive the public API the way a deployment script does:
//! register tasks on a `Shipr`, start runs and observe the sinks.
//!
//! # Test Categories
//!
//! - `scheduling`: Dependency order, blocking exclusion, failure propagation
//! - `execution`: Local commands, remote command shaping, copy defaults
//! - `shipfile`: Declarative shipfiles end to end
//!
//! # CI Compatibility
//!
//! Remote hosts are replaced by a recording connection pool, so no test
//! opens an ssh connection.


mod execution;
mod scheduling;
mod shipfile;
