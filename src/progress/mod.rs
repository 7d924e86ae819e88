pub mod aggregator;
pub mod backend;
pub mod catalog;
pub mod error;
pub mod record;
pub mod store;
pub mod streak;
pub mod sync;

pub use aggregator::{TopicLessons, calculate_topic_progress};
pub use backend::{DirectoryBackend, KeyValueBackend, MemoryBackend};
pub use catalog::{Course, CourseCatalog, Topic};
pub use error::{StoreError, SyncError};
pub use record::{ProgressRecord, TopicProgress};
pub use store::{
    Clock, CompletionOutcome, DetachedCompletion, ProgressEvent, ProgressStore, SystemClock,
};
pub use streak::{ServerStreak, StudyStreak};
pub use sync::{HttpRemote, ProgressRemote, RetryPolicy, SyncClient, SyncOutcome};
