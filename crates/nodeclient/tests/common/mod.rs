#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sandnode_common::{ClientError, EventSink, Machine, NodeMsg, StoragePaths, Task};
use sandnode_nodeclient::{
    EventReader, ImportError, LocalNode, NodeApi, NodeContext, NodeError, NodeWork,
    NodeWorkPacker, ResultRetriever, StartableTask, StateController, TaskResources,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub const ANALYSIS_ID: &str = "20240101-ABCDEF";

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn record(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

/// Terminal reports seen by the state controller, in order.
pub fn reports(journal: &Journal) -> Vec<String> {
    entries(journal)
        .into_iter()
        .filter(|e| e.starts_with("done:") || e.starts_with("failed:"))
        .collect()
}

pub fn position(journal: &Journal, entry: &str) -> usize {
    entries(journal)
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("{entry} not in journal {:?}", entries(journal)))
}

pub fn wait_for(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

pub struct RecordingController {
    pub journal: Journal,
}

impl StateController for RecordingController {
    fn task_done(&self, task_id: &str, analysis_id: &str) {
        assert_eq!(analysis_id, ANALYSIS_ID);
        record(&self.journal, format!("done:{task_id}"));
    }

    fn task_failed(&self, task_id: &str, analysis_id: &str) {
        assert_eq!(analysis_id, ANALYSIS_ID);
        record(&self.journal, format!("failed:{task_id}"));
    }
}

struct MachineSlot {
    journal: Journal,
    task_id: String,
}

impl TaskResources for MachineSlot {
    fn release(&self) -> anyhow::Result<()> {
        record(&self.journal, format!("release:{}", self.task_id));
        Ok(())
    }
}

pub fn machines() -> Vec<Machine> {
    vec![
        Machine::new("win10-1", "windows").with_tags(["dotnet"]),
        Machine::new("ubuntu-1", "linux"),
    ]
}

pub fn startable(task_id: &str, journal: &Journal) -> Arc<StartableTask> {
    Arc::new(new_startable(task_id, journal))
}

pub fn new_startable(task_id: &str, journal: &Journal) -> StartableTask {
    StartableTask::new(
        Task::new(task_id, ANALYSIS_ID).with_platform("windows"),
        Machine::new("win10-1", "windows"),
    )
    .with_resources(MachineSlot {
        journal: journal.clone(),
        task_id: task_id.to_string(),
    })
}

pub fn context(journal: &Journal, cwd: &Path) -> NodeContext {
    NodeContext::new(
        Arc::new(RecordingController {
            journal: journal.clone(),
        }),
        StoragePaths::new(cwd),
    )
}

#[derive(Clone, Default)]
pub struct Faults {
    pub machine_list: bool,
    pub upload: bool,
    pub start: bool,
    pub retrieve: bool,
    pub pack: bool,
    pub open: bool,
    pub upload_delay: Duration,
}

pub struct FakeApi {
    pub faults: Faults,
    pub journal: Journal,
    pub reader: Arc<FakeReader>,
}

#[async_trait]
impl NodeApi for FakeApi {
    fn name(&self) -> &str {
        "node-a"
    }

    async fn machine_list(&self) -> Result<Vec<Machine>, ClientError> {
        if self.faults.machine_list {
            return Err(ClientError::Connect("connection refused".into()));
        }
        Ok(machines())
    }

    async fn upload_taskwork(&self, path: &Path) -> Result<(), ClientError> {
        tokio::time::sleep(self.faults.upload_delay).await;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        assert!(path.exists(), "node work must exist while uploading");
        record(&self.journal, format!("upload:{stem}"));
        if self.faults.upload {
            return Err(ClientError::Request("node unreachable".into()));
        }
        Ok(())
    }

    async fn start_task(&self, task_id: &str, _machine_name: &str) -> Result<(), ClientError> {
        record(&self.journal, format!("start:{task_id}"));
        if self.faults.start {
            return Err(ClientError::Status {
                code: 500,
                body: "machine unavailable".into(),
            });
        }
        Ok(())
    }

    fn event_reader(&self, sink: Arc<dyn EventSink>) -> Arc<dyn EventReader> {
        *self.reader.sink.lock().unwrap() = Some(sink);
        self.reader.clone()
    }
}

/// Event reader fed by the test through [`FakeReader::push`].
pub struct FakeReader {
    sink: Mutex<Option<Arc<dyn EventSink>>>,
    tx: Mutex<Option<mpsc::UnboundedSender<NodeMsg>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<NodeMsg>>,
    closed: CancellationToken,
    fail_open: bool,
    journal: Journal,
}

impl FakeReader {
    pub fn new(journal: Journal, fail_open: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sink: Mutex::new(None),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
            fail_open,
            journal,
        }
    }

    pub fn push(&self, msg: NodeMsg) {
        let tx = self.tx.lock().unwrap();
        tx.as_ref().expect("stream already ended").send(msg).unwrap();
    }

    /// The node closes its end of the stream.
    pub fn end(&self) {
        self.tx.lock().unwrap().take();
    }

    fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.lock().unwrap().clone().expect("reader used before it was bound")
    }
}

#[async_trait]
impl EventReader for FakeReader {
    async fn open(&self) -> Result<(), ClientError> {
        record(&self.journal, "reader:open");
        if self.fail_open {
            let err = ClientError::Connect("event stream refused".into());
            self.sink().connect_error(&err);
            return Err(err);
        }
        self.sink().connected();
        Ok(())
    }

    async fn read_stream(&self) {
        let sink = self.sink();
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => sink.message(msg).await,
                        None => break,
                    }
                }
            }
        }
        sink.read_end();
    }

    async fn close(&self) -> Result<(), ClientError> {
        record(&self.journal, "reader:close");
        self.closed.cancel();
        Ok(())
    }
}

pub struct FakeRetriever {
    pub fail: bool,
    pub journal: Journal,
}

#[async_trait]
impl ResultRetriever for FakeRetriever {
    async fn retrieve_result(&self, task_id: &str, node: &str) -> Result<(), ClientError> {
        assert_eq!(node, "node-a");
        record(&self.journal, format!("retrieve:{task_id}"));
        if self.fail {
            return Err(ClientError::Request("retriever busy".into()));
        }
        Ok(())
    }
}

pub struct FakePacker {
    pub paths: StoragePaths,
    pub fail: bool,
}

impl NodeWorkPacker for FakePacker {
    fn create(&self, _analysis_id: &str, task_id: &str) -> Result<NodeWork, ImportError> {
        if self.fail {
            return Err(ImportError::Missing(task_id.to_string()));
        }
        let path = self.paths.nodework_zip(task_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"PK\x03\x04")?;
        Ok(NodeWork::new(path))
    }
}

pub struct FakeLocalNode {
    pub fail: bool,
    pub journal: Journal,
}

impl LocalNode for FakeLocalNode {
    fn machines(&self) -> Vec<Machine> {
        machines()
    }

    fn add_work(&self, task_id: &str, machine_name: &str) -> Result<(), NodeError> {
        record(&self.journal, format!("work:{task_id}@{machine_name}"));
        if self.fail {
            return Err(NodeError(format!("no free slot for {machine_name}")));
        }
        Ok(())
    }
}
