//! Relay core: parallel-task records, async-task status, queue payloads and
//! broker-safe naming shared by every relay service.

pub mod messages;
pub mod naming;
pub mod task;

pub use messages::{
    AsyncStatus, AsyncTaskMessage, AsyncTaskStatus, WorkerMessage, ASYNC_REF_PREFIX,
    ASYNC_TASK_GROUP, PTASK_GROUP,
};
pub use naming::{escape_name, generate_id, MAX_NAME_LEN};
pub use task::{
    parse_worker_count, task_key, RunStatus, Task, TaskError, WorkerRecord, DEFAULT_WORKER_COUNT,
    MAX_WORKER_COUNT, RECORD_TTL, TASK_KEY_PREFIX,
};
