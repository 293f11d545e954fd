use std::path::{Path, PathBuf};

/// Resolves where task data lives below the working directory.
#[derive(Clone, Debug)]
pub struct StoragePaths {
    cwd: PathBuf,
    retriever_socket: Option<PathBuf>,
}

impl StoragePaths {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            retriever_socket: None,
        }
    }

    pub fn with_result_retriever(mut self, socket: impl Into<PathBuf>) -> Self {
        self.retriever_socket = Some(socket.into());
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.cwd.join("storage").join("tasks").join(task_id)
    }

    pub fn task_errors(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("errors.json")
    }

    pub fn nodework_zip(&self, task_id: &str) -> PathBuf {
        self.cwd
            .join("storage")
            .join("nodework")
            .join(format!("{task_id}.zip"))
    }

    pub fn result_retriever_socket(&self) -> PathBuf {
        self.retriever_socket.clone().unwrap_or_else(|| {
            self.cwd
                .join("operational")
                .join("sockets")
                .join("resultretriever.sock")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_cwd() {
        let paths = StoragePaths::new("/srv/sandnode");
        assert_eq!(
            paths.nodework_zip("T1"),
            PathBuf::from("/srv/sandnode/storage/nodework/T1.zip")
        );
        assert_eq!(
            paths.task_errors("T1"),
            PathBuf::from("/srv/sandnode/storage/tasks/T1/errors.json")
        );
        assert_eq!(
            paths.result_retriever_socket(),
            PathBuf::from("/srv/sandnode/operational/sockets/resultretriever.sock")
        );
    }

    #[test]
    fn retriever_socket_override() {
        let paths = StoragePaths::new("/srv/sandnode").with_result_retriever("/run/rr.sock");
        assert_eq!(paths.result_retriever_socket(), PathBuf::from("/run/rr.sock"));
    }
}
