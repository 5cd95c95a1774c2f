//! Scripted upstream transports for driving adapters without a network.

use async_trait::async_trait;
use push_proxy::adapters::{ApnsNotification, ApnsReply, ApnsTransport, FcmMessage, FcmReply, FcmTransport};
use push_proxy::error::PushError;
use std::sync::Mutex;

/// An APNs transport that answers every push the same way and keeps what it
/// was asked to send.
pub struct FakeApns {
    reply: Result<ApnsReply, String>,
    sent: Mutex<Vec<ApnsNotification>>,
}

impl FakeApns {
    pub fn accepting() -> Self {
        Self::answering(200, None)
    }

    pub fn rejecting(status: u16, reason: &str) -> Self {
        Self::answering(status, Some(reason))
    }

    fn answering(status: u16, reason: Option<&str>) -> Self {
        Self {
            reply: Ok(ApnsReply {
                status,
                apns_id: Some("fake-apns-id".to_string()),
                reason: reason.map(str::to_string),
            }),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(cause: &str) -> Self {
        Self {
            reply: Err(cause.to_string()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<ApnsNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApnsTransport for FakeApns {
    async fn push(&self, notification: &ApnsNotification) -> Result<ApnsReply, PushError> {
        self.sent.lock().unwrap().push(notification.clone());
        self.reply.clone().map_err(PushError::Transport)
    }
}

/// An FCM transport that accepts everything and keeps what it was sent.
#[derive(Default)]
pub struct FakeFcm {
    sent: Mutex<Vec<FcmMessage>>,
}

impl FakeFcm {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn sent(&self) -> Vec<FcmMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl FcmTransport for FakeFcm {
    async fn send(&self, message: &FcmMessage) -> Result<FcmReply, PushError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(FcmReply {
            multicast_id: Some(1),
            success: 1,
            failure: 0,
            results: Vec::new(),
        })
    }
}
