//! State that outlives an engine: persisted ports, deferred messages and
//! the access list, over the redb store and the in-memory store.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use shoal_core::encoding::{decode_key, decode_list, encode_key};
use shoal_core::recovery::PORTS_PROPERTY;
use shoal_core::transport::loopback::LoopbackMessageTransport;
use shoal_core::{
    EngineConfig, Interest, MemoryPropertyStore, Payload, PeerAddress, PeerIdentity, Port,
    PortFactory, PortMemento, PropertyStore, SendOutcome, ShoalEngine, ShoalError, TransportKind,
    TransportStub,
};
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Debug, Clone)]
struct Session {
    endpoint_type: String,
    name: Option<String>,
    state: Option<Vec<u8>>,
}

impl Session {
    fn new(endpoint_type: &str, name: Option<&str>, state: &[u8]) -> Self {
        Self {
            endpoint_type: endpoint_type.to_string(),
            name: name.map(str::to_string),
            state: Some(state.to_vec()),
        }
    }
}

impl Port for Session {
    fn endpoint_type(&self) -> &str {
        &self.endpoint_type
    }

    fn unique_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn memento(&self) -> Option<Vec<u8>> {
        self.state.clone()
    }
}

/// Factory that rebuilds a `Session` and remembers every memento it saw
fn recording_factory(seen: Arc<Mutex<Vec<PortMemento>>>) -> PortFactory {
    Arc::new(move |_engine: &ShoalEngine, memento: PortMemento| {
        seen.lock().push(memento.clone());
        Ok(Arc::new(Session {
            endpoint_type: memento.endpoint_type,
            name: memento.unique_name,
            state: Some(memento.state),
        }) as Arc<dyn Port>)
    })
}

async fn with_mail(engine: &ShoalEngine) -> Arc<LoopbackMessageTransport> {
    let mail = Arc::new(LoopbackMessageTransport::new(TransportKind::Mail));
    let stub = mail.clone();
    engine
        .register_transport(
            TransportKind::Mail,
            Arc::new(move || Ok(TransportStub::Message(stub.clone()))),
        )
        .await;
    mail
}

fn pat() -> PeerIdentity {
    PeerIdentity::new("Pat", "urn:pat").with_address("mail://pat")
}

// ============================================================================
// Port recovery
// ============================================================================

#[test]
fn test_recovery_round_trip_across_restart() {
    let temp = TempDir::new().unwrap();

    {
        let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
        engine
            .persist_port(&Session::new("chat.Channel", Some("reef"), b"topic=fish"))
            .unwrap();
        engine
            .persist_port(&Session::new("mail.Inbox", None, b"cursor=42"))
            .unwrap();
    }

    let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.register_port_factory("chat.Channel", recording_factory(seen.clone()));
    engine.register_port_factory("mail.Inbox", recording_factory(seen.clone()));

    let ports = engine.recover_ports().unwrap();
    assert_eq!(ports.len(), 2);

    let mut seen = seen.lock().clone();
    seen.sort_by(|a, b| a.endpoint_type.cmp(&b.endpoint_type));
    assert_eq!(seen[0].endpoint_type, "chat.Channel");
    assert_eq!(seen[0].unique_name.as_deref(), Some("reef"));
    assert_eq!(seen[0].state, b"topic=fish");
    assert_eq!(seen[1].endpoint_type, "mail.Inbox");
    assert_eq!(seen[1].unique_name, None);
    assert_eq!(seen[1].state, b"cursor=42");
}

#[test]
fn test_removed_port_not_recovered_after_restart() {
    let temp = TempDir::new().unwrap();
    let kept = Session::new("chat.Channel", Some("kept"), b"1");
    let gone = Session::new("chat.Channel", Some("gone"), b"2");

    {
        let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
        engine.persist_port(&kept).unwrap();
        engine.persist_port(&gone).unwrap();
        engine.remove_port(&gone).unwrap();
    }

    let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.register_port_factory("chat.Channel", recording_factory(seen.clone()));
    engine.recover_ports().unwrap();

    let names: Vec<_> = seen
        .lock()
        .iter()
        .map(|m| m.unique_name.clone())
        .collect();
    assert_eq!(names, vec![Some("kept".to_string())]);
}

#[test]
fn test_unregistered_type_does_not_block_others() {
    let engine = ShoalEngine::in_memory(EngineConfig::default()).unwrap();
    engine
        .persist_port(&Session::new("legacy.Port", None, b"old"))
        .unwrap();
    engine
        .persist_port(&Session::new("chat.Channel", Some("reef"), b"new"))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    engine.register_port_factory("chat.Channel", recording_factory(seen.clone()));

    let ports = engine.recover_ports().unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].unique_name(), Some("reef"));
    // The unknown entry stays for a later run that knows its type
    assert_eq!(engine.recovery_store().entries().len(), 2);
}

#[test]
fn test_without_store_nothing_to_recover() {
    let engine = ShoalEngine::with_store(EngineConfig::default(), None).unwrap();

    assert!(engine.recover_ports().unwrap().is_empty());
    assert!(matches!(
        engine.persist_port(&Session::new("chat.Channel", None, b"x")),
        Err(ShoalError::StorageUnavailable(_))
    ));
}

#[derive(Debug, Clone)]
enum PortOp {
    Persist(usize, Option<usize>, Vec<u8>),
    Remove(usize, Option<usize>),
}

const TYPES: [&str; 3] = ["chat.Channel", "a:b", "3:x"];
const NAMES: [&str; 4] = ["reef", "b:c", "", "1:a1:b"];

fn port_op_strategy() -> impl Strategy<Value = PortOp> {
    let target = (0..TYPES.len(), prop::option::of(0..NAMES.len()));
    prop_oneof![
        3 => (target.clone(), prop::collection::vec(any::<u8>(), 0..8))
            .prop_map(|((t, n), state)| PortOp::Persist(t, n, state)),
        2 => target.prop_map(|(t, n)| PortOp::Remove(t, n)),
    ]
}

fn session(t: usize, n: Option<usize>, state: &[u8]) -> Session {
    Session::new(TYPES[t], n.map(|n| NAMES[n]), state)
}

proptest! {
    /// The entry list always names exactly the ports whose memento is stored
    #[test]
    fn aggregate_matches_stored_mementos(ops in prop::collection::vec(port_op_strategy(), 0..40)) {
        let store = Arc::new(MemoryPropertyStore::new());
        let engine = ShoalEngine::with_store(EngineConfig::default(), Some(store.clone())).unwrap();

        for op in &ops {
            match op {
                PortOp::Persist(t, n, state) => engine.persist_port(&session(*t, *n, state)).unwrap(),
                PortOp::Remove(t, n) => engine.remove_port(&session(*t, *n, &[])).unwrap(),
            }
        }

        let aggregate: BTreeSet<String> = match store.get_property(PORTS_PROPERTY).unwrap() {
            Some(record) => decode_list(&record).unwrap().into_iter().collect(),
            None => BTreeSet::new(),
        };

        let stored: BTreeSet<String> = store
            .property_names(&encode_key(&["port"]))
            .unwrap()
            .into_iter()
            .map(|name| encode_key(&decode_key(&name).unwrap()[1..]))
            .collect();

        prop_assert_eq!(&aggregate, &stored);
        prop_assert_eq!(
            engine.recovery_store().entries(),
            aggregate.into_iter().collect::<Vec<_>>()
        );
    }

    /// Distinct part lists never share a key
    #[test]
    fn key_encoding_is_collision_free(
        a in prop::collection::vec("[a-z0-9:|/]{0,6}", 0..4),
        b in prop::collection::vec("[a-z0-9:|/]{0,6}", 0..4),
    ) {
        prop_assert_eq!(decode_key(&encode_key(&a)).unwrap(), a.clone());
        if a != b {
            prop_assert_ne!(encode_key(&a), encode_key(&b));
        }
    }
}

// ============================================================================
// Deferred messages
// ============================================================================

#[tokio::test]
async fn test_replay_sends_deferred_interest_once() {
    let engine = ShoalEngine::in_memory(EngineConfig::default()).unwrap();
    let mail = with_mail(&engine).await;
    engine
        .defer(&Payload::Interest(Interest::topic("urn:fish")), &pat())
        .unwrap();

    let report = engine.replay_deferred().await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 0);
    assert!(engine.pending_messages().unwrap().is_empty());
    assert_eq!(mail.send_attempts(), vec![PeerAddress::from("mail://pat")]);

    let (_, envelope) = mail.envelopes().unwrap().remove(0);
    assert_eq!(envelope.header.receiver.peer, Some(vec!["urn:pat".to_string()]));
}

#[tokio::test]
async fn test_failed_replay_is_not_deferred_again() {
    let engine = ShoalEngine::in_memory(EngineConfig::default()).unwrap();
    let mail = with_mail(&engine).await;
    mail.fail_send("mail://pat");

    let outcome = engine
        .send_or_defer_interest(&Interest::topic("urn:fish"), &pat())
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Deferred(_)));

    let report = engine.replay_deferred().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(engine.pending_messages().unwrap().is_empty());
}

#[tokio::test]
async fn test_deferred_messages_survive_restart() {
    let temp = TempDir::new().unwrap();

    {
        let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
        let mail = with_mail(&engine).await;
        mail.fail_send("mail://pat");
        engine
            .send_or_defer_interest(&Interest::topic("urn:fish"), &pat())
            .await
            .unwrap();
    }

    let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
    let pending = engine.pending_messages().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].recipient, pat());

    let mail = with_mail(&engine).await;
    engine.replay_deferred().await.unwrap();
    assert_eq!(mail.datagrams().len(), 1);
    assert!(engine.pending_messages().unwrap().is_empty());
}

// ============================================================================
// Access list
// ============================================================================

#[test]
fn test_access_list_survives_restart() {
    let temp = TempDir::new().unwrap();
    let mallory = PeerIdentity::new("Mallory", "urn:mallory");

    {
        let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
        engine.use_black_white_list(true).unwrap();
        engine.use_white_list(false).unwrap();
        engine.accept_peer(&mallory, false).unwrap();
    }

    let engine = ShoalEngine::new(temp.path(), EngineConfig::default()).unwrap();
    assert!(!engine.is_accepted(&mallory));
    assert!(engine.is_accepted(&pat()));
}
