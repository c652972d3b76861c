//! # BLEX Scheduler
//!
//! Fire-and-forget background work for the blog platform.
//!
//! ## Architecture
//! ```text
//! view / signal handler
//!   └── Notifier::notify(user, url, info, salt)
//!         ├── fingerprint = sha256(user + url + info + salt)
//!         ├── NotificationDb: INSERT OR IGNORE (dedup on fingerprint)
//!         └── user has Telegram? → TaskQueue::submit_async(send)
//!
//! TaskQueue (one worker task, strict FIFO)
//!   ├── Blocking jobs → spawn_blocking, awaited in order
//!   ├── Async jobs    → awaited in order
//!   └── errors/panics → logged + discarded, queue keeps going
//! ```

pub mod dispatch;
pub mod notify;
pub mod persistence;
pub mod queue;

pub use dispatch::{MessageSender, TelegramSender};
pub use notify::{Notifier, fingerprint};
pub use persistence::{Notification, NotificationDb};
pub use queue::{QueueState, QueueStats, TaskQueue};
