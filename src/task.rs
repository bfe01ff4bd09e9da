use tokio::task::JoinHandle;

/// Owns a background task; stopping or dropping the handle cancels it.
#[derive(Debug)]
pub struct TaskHandle {
    task: Option<JoinHandle<()>>,
}

impl TaskHandle {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn stop(mut self) {
        self.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
