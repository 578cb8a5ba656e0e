/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Stream source over a message-oriented subscription session.
//!
//! The session itself (QUIC, WebTransport, in-process, …) is an external
//! collaborator behind [`SessionConnector`]: it delivers per-track byte
//! frames and state changes over a channel. This adapter subscribes a set of
//! tracks, parses Sesame frames on media tracks, forwards raw payloads on
//! data tracks, and treats a session state change to `Disconnected` as
//! terminal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use sesame_types::PacketBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DataEvent, RawDataEvent, SourceCallbacks, StreamKind, StreamSource};
use crate::error::{ClientError, Result};

/// One track to subscribe, with its delivery priority and framing policy.
///
/// The framing policy is explicit per track: only `Video` and `Audio` tracks
/// are parsed with the wire codec. A sender that wants Sesame framing on an
/// auxiliary track must subscribe it as media.
#[derive(Debug, Clone)]
pub struct TrackSubscription {
    pub name: String,
    pub priority: u8,
    pub kind: StreamKind,
}

impl TrackSubscription {
    pub fn video(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            kind: StreamKind::Video,
        }
    }

    pub fn audio(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            kind: StreamKind::Audio,
        }
    }

    pub fn data(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            kind: StreamKind::Data,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
}

/// What the underlying session reports to the adapter.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Frame { track: String, payload: Bytes },
    StateChange(SessionState),
}

/// Opens sessions. One `open` call corresponds to one session lifetime.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn open(
        &self,
        subscriptions: &[TrackSubscription],
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Box<dyn SessionHandle>>;
}

/// A live session. Dropping the handle tears the session down.
pub trait SessionHandle: Send {
    /// Ask the publisher for a keyframe, where the session supports it.
    fn request_keyframe(&self) {}
    fn close(&self);
}

/// [`StreamSource`] over a subscription session.
pub struct SubscriberSource {
    connector: Arc<dyn SessionConnector>,
    subscriptions: Vec<TrackSubscription>,
    callbacks: SourceCallbacks,
    session: Option<Box<dyn SessionHandle>>,
    pump: Option<JoinHandle<()>>,
    malformed: Arc<AtomicU64>,
}

impl SubscriberSource {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        subscriptions: Vec<TrackSubscription>,
        callbacks: SourceCallbacks,
    ) -> Self {
        Self {
            connector,
            subscriptions,
            callbacks,
            session: None,
            pump: None,
            malformed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Packets that failed to parse since connect. They are dropped silently
    /// apart from this counter.
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for SubscriberSource {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[async_trait]
impl StreamSource for SubscriberSource {
    async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(ClientError::InvalidState("connected"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let session = self.connector.open(&self.subscriptions, tx).await?;
        self.session = Some(session);

        let callbacks = self.callbacks.clone();
        let subscriptions = self.subscriptions.clone();
        let malformed = self.malformed.clone();
        self.pump = Some(tokio::spawn(pump_events(
            rx,
            subscriptions,
            callbacks.clone(),
            malformed,
        )));

        callbacks.on_connected.emit(());
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.teardown();
    }

    fn request_keyframe(&mut self) {
        if let Some(session) = &self.session {
            session.request_keyframe();
        }
    }

    fn dispose(&mut self) {
        self.teardown();
    }
}

async fn pump_events(
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    subscriptions: Vec<TrackSubscription>,
    callbacks: SourceCallbacks,
    malformed: Arc<AtomicU64>,
) {
    let kind_of = |track: &str| {
        subscriptions
            .iter()
            .find(|s| s.name == track)
            .map(|s| s.kind)
    };

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Frame { track, payload } => match kind_of(&track) {
                Some(kind) if kind.is_media() => match PacketBuf::parse(payload) {
                    Ok(packet) => callbacks.on_data.emit(DataEvent {
                        track,
                        kind,
                        packet,
                    }),
                    Err(e) => {
                        malformed.fetch_add(1, Ordering::Relaxed);
                        debug!("dropping malformed frame on track {track}: {e}");
                    }
                },
                Some(StreamKind::Data) => {
                    callbacks.on_raw_data.emit(RawDataEvent { track, payload })
                }
                Some(_) | None => {
                    warn!("frame on unsubscribed track {track}, forwarding raw");
                    callbacks.on_raw_data.emit(RawDataEvent { track, payload });
                }
            },
            SessionEvent::StateChange(SessionState::Disconnected) => {
                callbacks
                    .on_disconnected
                    .emit("session disconnected".to_string());
                break;
            }
            SessionEvent::StateChange(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sesame_types::{serialize, PacketHeader, PacketType};
    use std::sync::Mutex;

    struct MockConnector {
        events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    }

    struct MockHandle {
        keyframe_requests: Arc<AtomicU64>,
    }

    impl SessionHandle for MockHandle {
        fn request_keyframe(&self) {
            self.keyframe_requests.fetch_add(1, Ordering::Relaxed);
        }
        fn close(&self) {}
    }

    #[async_trait]
    impl SessionConnector for MockConnector {
        async fn open(
            &self,
            _subscriptions: &[TrackSubscription],
            events: mpsc::UnboundedSender<SessionEvent>,
        ) -> Result<Box<dyn SessionHandle>> {
            *self.events.lock().unwrap() = Some(events);
            Ok(Box::new(MockHandle {
                keyframe_requests: Arc::new(AtomicU64::new(0)),
            }))
        }
    }

    fn video_frame_bytes(pts: u64) -> Bytes {
        let header = PacketHeader {
            pts,
            ..PacketHeader::new(PacketType::VideoFrame)
        };
        serialize(&header, None, None, b"frame").unwrap()
    }

    async fn collected_source() -> (
        SubscriberSource,
        mpsc::UnboundedSender<SessionEvent>,
        mpsc::UnboundedReceiver<super::super::SourceEvent>,
    ) {
        let connector = Arc::new(MockConnector {
            events: Mutex::new(None),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let callbacks = SourceCallbacks::into_channel(tx);
        let mut source = SubscriberSource::new(
            connector.clone(),
            vec![
                TrackSubscription::video("video").with_priority(1),
                TrackSubscription::data("chat"),
            ],
            callbacks,
        );
        source.connect().await.unwrap();
        let session_tx = connector.events.lock().unwrap().take().unwrap();
        (source, session_tx, rx)
    }

    #[tokio::test]
    async fn media_tracks_are_parsed_and_data_tracks_are_raw() {
        let (_source, session_tx, mut rx) = collected_source().await;

        assert!(matches!(
            rx.recv().await,
            Some(super::super::SourceEvent::Connected)
        ));

        session_tx
            .send(SessionEvent::Frame {
                track: "video".into(),
                payload: video_frame_bytes(42),
            })
            .unwrap();
        match rx.recv().await {
            Some(super::super::SourceEvent::Data(event)) => {
                assert_eq!(event.track, "video");
                assert_eq!(event.kind, StreamKind::Video);
                assert_eq!(event.packet.header.pts, 42);
            }
            other => panic!("expected data event, got {other:?}"),
        }

        session_tx
            .send(SessionEvent::Frame {
                track: "chat".into(),
                payload: Bytes::from_static(b"hello"),
            })
            .unwrap();
        match rx.recv().await {
            Some(super::super::SourceEvent::RawData(event)) => {
                assert_eq!(event.track, "chat");
                assert_eq!(event.payload.as_ref(), b"hello");
            }
            other => panic!("expected raw data event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_media_frames_are_counted_and_dropped() {
        let (source, session_tx, mut rx) = collected_source().await;
        let _ = rx.recv().await; // connected

        session_tx
            .send(SessionEvent::Frame {
                track: "video".into(),
                payload: Bytes::from_static(b"not a sesame packet"),
            })
            .unwrap();
        session_tx
            .send(SessionEvent::Frame {
                track: "video".into(),
                payload: video_frame_bytes(1),
            })
            .unwrap();

        // Only the valid frame comes through.
        match rx.recv().await {
            Some(super::super::SourceEvent::Data(event)) => {
                assert_eq!(event.packet.header.pts, 1)
            }
            other => panic!("expected data event, got {other:?}"),
        }
        assert_eq!(source.malformed_count(), 1);
    }

    #[tokio::test]
    async fn session_disconnect_is_terminal() {
        let (_source, session_tx, mut rx) = collected_source().await;
        let _ = rx.recv().await; // connected

        session_tx
            .send(SessionEvent::StateChange(SessionState::Disconnected))
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(super::super::SourceEvent::Disconnected(_))
        ));

        // The pump has exited; later frames are not delivered.
        let _ = session_tx.send(SessionEvent::Frame {
            track: "video".into(),
            payload: video_frame_bytes(2),
        });
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
