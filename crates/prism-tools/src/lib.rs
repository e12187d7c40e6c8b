pub mod display;
pub mod registry;

pub use display::format_tool_call;
pub use registry::{ToolError, ToolRegistry};
