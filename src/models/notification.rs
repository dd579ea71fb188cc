/// One entry of the upstream notification panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    /// Stable id of the work item, e.g. `T123`.
    pub task:   String,
    /// Id of this particular notification; a task collects many over time.
    pub meta:   String,
    pub unread: bool,
    /// Text of the task link, e.g. `T123: Fix login`.
    pub title:  String,
    /// Plain text of the whole notification.
    pub text:   String,
    /// Absolute URL of the task.
    pub link:   String,
}

impl NotificationRecord {
    #[cfg(test)]
    pub fn unread(task: &str, meta: &str) -> Self {
        Self {
            task:   task.to_string(),
            meta:   meta.to_string(),
            unread: true,
            title:  format!("{}: title", task),
            text:   format!("someone updated {}", task),
            link:   format!("https://phab.example/{}", task),
        }
    }
}
