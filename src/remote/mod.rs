//! Remote hosts and the pooled connections used to reach them.

pub mod pool;
pub mod server;
pub mod ssh;

pub use pool::{ConnectionPool, CopyOptions, Direction, RemoteOutput, RunOptions, SyncOptions};
pub use server::{parse_servers, Server};
pub use ssh::{SshOptions, SshPool};
