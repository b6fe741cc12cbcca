use forgeflow_commons::{ErrorCategory, ErrorContext, ErrorEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task queue is full (max {max_size})")]
    QueueFull { max_size: usize },

    #[error("callable '{0}' is not registered")]
    CallableNotFound(String),

    #[error("cron task '{0}' not found")]
    TaskNotFound(String),

    #[error("invalid cron expression '{0}': {1}")]
    InvalidCronExpression(String, String),

    #[error("could not derive a cron expression from '{0}'")]
    UnparseableSchedule(String),

    #[error("task execution failed: {0}")]
    ExecutionFailed(String),

    #[error("artifact memory operation failed: {0}")]
    Memory(#[from] forgeflow_memory::MemoryError),

    #[error("persistence I/O failed: {0}")]
    Io(String),
}

impl SchedulerError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::QueueFull { .. } => "QueueFull",
            SchedulerError::CallableNotFound(_) => "CallableNotFound",
            SchedulerError::TaskNotFound(_) => "TaskNotFound",
            SchedulerError::InvalidCronExpression(..) => "InvalidCronExpression",
            SchedulerError::UnparseableSchedule(_) => "UnparseableSchedule",
            SchedulerError::ExecutionFailed(_) => "ExecutionFailed",
            SchedulerError::Memory(_) => "MemoryDependencyFailed",
            SchedulerError::Io(_) => "SchedulerIoError",
        }
    }
}

impl From<SchedulerError> for ErrorEnvelope {
    fn from(err: SchedulerError) -> Self {
        let code = err.code();
        ErrorEnvelope::new(code, ErrorCategory::Scheduler, err.to_string()).with_context(ErrorContext::default())
    }
}
