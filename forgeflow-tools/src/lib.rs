//! C5 Tool Registry and C6 Interceptor Chain.

pub mod custom_code;
pub mod error;
pub mod external_server;
pub mod interceptor;
pub mod registry;
pub mod spec_file;
pub mod tool;

pub use custom_code::{CustomCodeHandler, CustomCodeRegistry};
pub use error::ToolError;
pub use external_server::{ExternalServerConfig, ExternalServerHandle, RemoteToolDescriptor};
pub use interceptor::{
    CapturedException, ExceptionCaptureInterceptor, Interceptor, InterceptorChain, InvocationContext,
    PerformanceBufferDumpInterceptor, PerformanceVarianceEvent, PerformanceWindowInterceptor, VarianceSeverity,
};
pub use registry::{GeneralizedToolRequest, ToolRegistry, WorkflowDelegate, BEST_TOOL_MIN_SIMILARITY, DUPLICATE_THRESHOLD};
pub use spec_file::parse_tool_spec;
pub use tool::{
    Constraints, CostTier, InvocationDescriptor, QualityTier, SpeedTier, StdinMode, Tool, ToolKind, ToolMetadata,
};
