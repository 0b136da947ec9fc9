use std::collections::VecDeque;

use chrono::Utc;
use shared::domain::MessageId;
use tokio::{sync::Mutex, time::timeout};

use super::*;
use crate::transport::{PushSink, PushStream};

struct FakeTransport {
    // One entry per connect attempt: `None` is a scripted refusal, `Some`
    // hands out a live connection fed by the test. An exhausted script
    // parks the reconnect loop forever.
    scripts: Mutex<VecDeque<Option<mpsc::UnboundedReceiver<ServerFrame>>>>,
    sent: Arc<Mutex<Vec<ClientFrame>>>,
}

impl FakeTransport {
    fn new(
        scripts: Vec<Option<mpsc::UnboundedReceiver<ServerFrame>>>,
    ) -> (Arc<Self>, Arc<Mutex<Vec<ClientFrame>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                sent: Arc::clone(&sent),
            }),
            sent,
        )
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn connect(&self) -> Result<(Box<dyn PushSink>, Box<dyn PushStream>), ClientError> {
        let script = self.scripts.lock().await.pop_front();
        match script {
            Some(Some(rx)) => Ok((
                Box::new(FakeSink {
                    sent: Arc::clone(&self.sent),
                }),
                Box::new(FakeReader { rx }),
            )),
            Some(None) => Err(ClientError::ConnectionLost("scripted refusal".into())),
            None => futures::future::pending().await,
        }
    }
}

struct FakeSink {
    sent: Arc<Mutex<Vec<ClientFrame>>>,
}

#[async_trait]
impl PushSink for FakeSink {
    async fn send_frame(&mut self, frame: ClientFrame) -> Result<(), ClientError> {
        self.sent.lock().await.push(frame);
        Ok(())
    }
}

struct FakeReader {
    rx: mpsc::UnboundedReceiver<ServerFrame>,
}

#[async_trait]
impl PushStream for FakeReader {
    async fn next_frame(&mut self) -> Option<ServerFrame> {
        self.rx.recv().await
    }
}

fn fast_config(policy: NotifyPolicy) -> ConnectionConfig {
    ConnectionConfig {
        reconnect_initial: Duration::from_millis(10),
        reconnect_max: Duration::from_millis(40),
        notify_policy: policy,
    }
}

fn payload(id: &str) -> MessagePayload {
    MessagePayload {
        message_id: MessageId::from(id),
        sender: UserId::from("u-2"),
        receiver: UserId::from("u-1"),
        content: "hello".into(),
        sent_at: Utc::now(),
    }
}

async fn next_event(rx: &mut mpsc::Receiver<PushEvent>) -> PushEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within deadline")
        .expect("channel open")
}

#[tokio::test]
async fn announces_identity_then_forwards_inbound() {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (transport, sent) = FakeTransport::new(vec![Some(frames_rx)]);
    let (manager, mut inbound) = ConnectionManager::connect(
        UserId::from("u-1"),
        transport,
        fast_config(NotifyPolicy::Queue),
    );

    assert!(matches!(next_event(&mut inbound).await, PushEvent::Up));
    {
        let sent = sent.lock().await;
        assert!(matches!(
            &sent[0],
            ClientFrame::Setup { user_id } if user_id == &UserId::from("u-1")
        ));
    }

    frames_tx
        .send(ServerFrame::ReceiveMessage(payload("m-1")))
        .expect("feed frame");
    match next_event(&mut inbound).await {
        PushEvent::Message(message) => assert_eq!(message.message_id.0, "m-1"),
        other => panic!("unexpected event: {other:?}"),
    }

    manager.teardown();
    assert_eq!(*manager.state().borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnects_without_resubscribing() {
    let (first_tx, first_rx) = mpsc::unbounded_channel();
    let (second_tx, second_rx) = mpsc::unbounded_channel();
    let (transport, _sent) = FakeTransport::new(vec![Some(first_rx), Some(second_rx)]);
    let (_manager, mut inbound) = ConnectionManager::connect(
        UserId::from("u-1"),
        transport,
        fast_config(NotifyPolicy::Queue),
    );

    assert!(matches!(next_event(&mut inbound).await, PushEvent::Up));
    drop(first_tx);
    assert!(matches!(next_event(&mut inbound).await, PushEvent::Down { .. }));

    // Same receiver keeps delivering after the transparent reconnect.
    assert!(matches!(next_event(&mut inbound).await, PushEvent::Up));
    second_tx
        .send(ServerFrame::ReceiveMessage(payload("m-2")))
        .expect("feed frame");
    match next_event(&mut inbound).await {
        PushEvent::Message(message) => assert_eq!(message.message_id.0, "m-2"),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn failed_establish_retries_with_backoff() {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (transport, _sent) = FakeTransport::new(vec![None, None, Some(frames_rx)]);
    let (_manager, mut inbound) = ConnectionManager::connect(
        UserId::from("u-1"),
        transport,
        fast_config(NotifyPolicy::Queue),
    );

    assert!(matches!(next_event(&mut inbound).await, PushEvent::Down { .. }));
    assert!(matches!(next_event(&mut inbound).await, PushEvent::Down { .. }));
    assert!(matches!(next_event(&mut inbound).await, PushEvent::Up));
    drop(frames_tx);
}

#[tokio::test]
async fn queue_policy_holds_frames_across_reconnect() {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (transport, sent) = FakeTransport::new(vec![None, Some(frames_rx)]);
    let (manager, mut inbound) = ConnectionManager::connect(
        UserId::from("u-1"),
        transport,
        fast_config(NotifyPolicy::Queue),
    );

    // Queued while the first attempt is still failing.
    manager
        .notifier()
        .notify(ClientFrame::SendMessage {
            sender: UserId::from("u-1"),
            receiver: UserId::from("u-2"),
            content: "queued".into(),
        })
        .await
        .expect("queued notify");

    assert!(matches!(next_event(&mut inbound).await, PushEvent::Down { .. }));
    assert!(matches!(next_event(&mut inbound).await, PushEvent::Up));

    timeout(Duration::from_secs(2), async {
        loop {
            if sent.lock().await.iter().any(|frame| {
                matches!(frame, ClientFrame::SendMessage { content, .. } if content == "queued")
            }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queued frame flushed after reconnect");
    drop(frames_tx);
}

#[tokio::test]
async fn fail_fast_policy_rejects_while_down() {
    let (transport, _sent) = FakeTransport::new(vec![]);
    let (manager, _inbound) = ConnectionManager::connect(
        UserId::from("u-1"),
        transport,
        fast_config(NotifyPolicy::FailFast),
    );

    let err = manager
        .notifier()
        .notify(ClientFrame::SendMessage {
            sender: UserId::from("u-1"),
            receiver: UserId::from("u-2"),
            content: "rejected".into(),
        })
        .await
        .expect_err("must fail while disconnected");
    assert!(matches!(err, ClientError::ConnectionLost(_)));
}
