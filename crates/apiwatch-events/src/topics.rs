// Event kinds published by the poll scheduler.

pub const TOPIC_POLL_SCHEDULED: &str = "poll.scheduled";
pub const TOPIC_POLL_UPDATED: &str = "poll.updated";
pub const TOPIC_POLL_CHANGED: &str = "poll.changed";
pub const TOPIC_POLL_FAILED: &str = "poll.failed";
pub const TOPIC_POLL_DROPPED: &str = "poll.dropped";
