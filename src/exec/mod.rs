pub mod local;
pub mod sink;

pub use local::{run_local, CommandOutput, LocalOptions, DEFAULT_MAX_BUFFER, LINE_PREFIX};
pub use sink::{ExecutionContext, LineWrapper, MemoryBuffer, OutputSink};
