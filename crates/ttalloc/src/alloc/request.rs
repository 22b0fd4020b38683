use std::time::Duration;

use derive_builder::Builder;

use crate::alloc::Groups;

/// Priority used when none is requested (0 is the highest, 999 the lowest).
pub const DEFAULT_PRIORITY: u32 = 500;

/// Parameters of a new allocation.
///
/// Priority and preemption are only passed through to the broker, which
/// decides on its own who gets evicted.
#[derive(Builder, Debug, Clone, PartialEq)]
#[builder(pattern = "owned")]
pub struct AllocationRequest {
    pub groups: Groups,
    #[builder(default = "DEFAULT_PRIORITY")]
    pub priority: u32,
    /// Allow the broker to evict lower priority, non-preempting holders.
    #[builder(default)]
    pub preempt: bool,
    /// Queue the request when the targets are busy instead of failing right away.
    #[builder(default = "true")]
    pub queue: bool,
    #[builder(default = "Some(default_reason())", setter(into, strip_option))]
    pub reason: Option<String>,
    #[builder(default, setter(into, strip_option))]
    pub on_behalf_of: Option<String>,
    /// Upper bound of the whole queue wait; `None` waits forever and zero
    /// returns right after submission.
    #[builder(default, setter(strip_option))]
    pub queue_timeout: Option<Duration>,
    #[builder(default = "true")]
    pub wait_in_queue: bool,
}

impl AllocationRequest {
    pub fn new(groups: Groups) -> Self {
        Self {
            groups,
            priority: DEFAULT_PRIORITY,
            preempt: false,
            queue: true,
            reason: Some(default_reason()),
            on_behalf_of: None,
            queue_timeout: None,
            wait_in_queue: true,
        }
    }

    /// The caller explicitly does not want to wait for the lease.
    pub fn skips_queue_wait(&self) -> bool {
        !self.wait_in_queue || self.queue_timeout == Some(Duration::ZERO)
    }
}

/// `cmdline USER@HOST:PARENTPID`
pub fn default_reason() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = gethostname::gethostname();
    format!(
        "cmdline {}@{}:{}",
        user,
        host.to_string_lossy(),
        std::os::unix::process::parent_id()
    )
}
