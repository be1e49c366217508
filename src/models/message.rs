use crate::models::job::{Job, JobError};

/// Transport envelope around a job body, as handed out by a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: Option<String>,
    pub body: String,
    /// Delivery token needed to acknowledge the message. `None` means it cannot be deleted.
    pub receipt: Option<String>,
}

impl QueueMessage {
    pub fn new(id: Option<String>, body: impl Into<String>, receipt: Option<String>) -> Self {
        Self {
            id,
            body: body.into(),
            receipt,
        }
    }

    pub fn parse_job(&self) -> Result<Job, JobError> {
        Job::parse(&self.body)
    }

    /// Identifier used in logs when the queue did not assign one.
    pub fn log_id(&self) -> &str {
        self.id.as_deref().unwrap_or("<none>")
    }
}
