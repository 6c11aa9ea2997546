//! Node start/stop lifecycle behavior.

use std::sync::Arc;

use async_trait::async_trait;
use libp2p::identity::Keypair;
use murmur_node::node::{Node, NodeState};
use murmur_node::testing::MemoryHost;
use murmur_node::{NetworkHost, NodeConfig, NodeError, ProtocolModule};
use parking_lot::Mutex;

fn node(host: Arc<MemoryHost>) -> Node {
    Node::builder(NodeConfig::default(), host, Keypair::generate_ed25519())
        .build()
        .unwrap()
}

/// Records start/stop calls into a shared log.
struct RecordingModule {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail_start: bool,
    host: Option<Arc<dyn NetworkHost>>,
}

impl RecordingModule {
    fn boxed(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Box<dyn ProtocolModule> {
        Box::new(RecordingModule {
            name,
            log,
            fail_start: false,
            host: None,
        })
    }
}

#[async_trait]
impl ProtocolModule for RecordingModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn set_host(&mut self, host: Arc<dyn NetworkHost>) {
        self.host = Some(host);
    }

    async fn start(&mut self) -> Result<(), NodeError> {
        assert!(self.host.is_some(), "host must be set before start");
        if self.fail_start {
            return Err(NodeError::Protocol {
                name: self.name,
                reason: "refused".into(),
            });
        }
        self.log.lock().push(format!("start {}", self.name));
        Ok(())
    }

    async fn stop(&mut self) {
        self.log.lock().push(format!("stop {}", self.name));
    }
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let mut node = node(MemoryHost::new());
    node.stop().await;
    node.stop().await;
    assert_eq!(node.state(), NodeState::Created);
}

#[tokio::test]
async fn start_then_stop_tears_everything_down() {
    let host = MemoryHost::new();
    let mut node = node(host.clone());

    node.start().await.unwrap();
    assert_eq!(node.state(), NodeState::Running);
    assert!(host.is_listening());
    assert!(host.has_observer());

    node.stop().await;
    assert_eq!(node.state(), NodeState::Stopped);
    assert!(host.is_closed());
    assert!(!host.has_observer());

    // Second stop is a guarded no-op.
    node.stop().await;
    assert_eq!(node.state(), NodeState::Stopped);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let mut node = node(MemoryHost::new());
    node.start().await.unwrap();

    let result = node.start().await;
    assert!(matches!(result, Err(NodeError::InvalidState { .. })));

    node.stop().await;
}

#[tokio::test]
async fn listen_failure_aborts_start() {
    let host = MemoryHost::new();
    host.fail_listen(true);

    let mut node = node(host);
    let result = node.start().await;
    assert!(matches!(result, Err(NodeError::Host(_))));
    assert_ne!(node.state(), NodeState::Running);
}

#[tokio::test]
async fn subscription_failure_aborts_start() {
    let host = MemoryHost::new();
    host.fail_subscriptions(true);

    let mut node = node(host);
    let result = node.start().await;
    assert!(matches!(result, Err(NodeError::Host(_))));
    assert_ne!(node.state(), NodeState::Running);
}

#[tokio::test]
async fn protocol_modules_start_and_stop_in_declared_order() {
    let host = MemoryHost::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut node = Node::builder(NodeConfig::default(), host, Keypair::generate_ed25519())
        .with_protocol(RecordingModule::boxed("metadata", log.clone()))
        .with_protocol(RecordingModule::boxed("peer-manager", log.clone()))
        .with_protocol(RecordingModule::boxed("relay", log.clone()))
        .with_protocol(RecordingModule::boxed("store", log.clone()))
        .build()
        .unwrap();

    node.start().await.unwrap();
    assert_eq!(
        *log.lock(),
        vec![
            "start metadata",
            "start peer-manager",
            "start relay",
            "start store"
        ]
    );

    log.lock().clear();
    node.stop().await;
    assert_eq!(
        *log.lock(),
        vec![
            "stop metadata",
            "stop peer-manager",
            "stop relay",
            "stop store"
        ]
    );
}

#[tokio::test]
async fn failing_protocol_module_aborts_start() {
    let host = MemoryHost::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut node = Node::builder(NodeConfig::default(), host, Keypair::generate_ed25519())
        .with_protocol(RecordingModule::boxed("metadata", log.clone()))
        .with_protocol(Box::new(RecordingModule {
            name: "relay",
            log: log.clone(),
            fail_start: true,
            host: None,
        }))
        .build()
        .unwrap();

    let result = node.start().await;
    assert!(matches!(
        result,
        Err(NodeError::Protocol { name: "relay", .. })
    ));
    assert_ne!(node.state(), NodeState::Running);
    assert_eq!(*log.lock(), vec!["start metadata"]);
}
