use super::{Output, OutputContext, OutputName};
use crate::distributor::{
    spawn_consumer, ConsumerHandle, FrameDistributor, FrameSubscription, Received, FRAME_WAIT_TIMEOUT,
};
use crate::error::{OutputError, Result};
use crate::frame::VideoFrame;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Network stream statistics
#[derive(Debug, Default)]
pub struct NetworkStats {
    pub total_connections: AtomicU64,
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
}

/// Raw H.264 stream over TCP, one client at a time
pub struct NetworkOutput {
    frames: Arc<FrameDistributor<VideoFrame>>,
    consumer: ConsumerHandle,
    server: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    local_addr: SocketAddr,
    stats: Arc<NetworkStats>,
}

impl NetworkOutput {
    pub async fn start(ctx: &OutputContext) -> Result<Self> {
        let address = format!("0.0.0.0:{}", ctx.config.network.socket_port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| OutputError::BindFailed {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("Network output listening on {}", local_addr);

        let frames = Arc::new(FrameDistributor::new("network"));
        let cancel = CancellationToken::new();
        let stats = Arc::new(NetworkStats::default());

        let relay = Arc::clone(&frames);
        let consumer = spawn_consumer(
            "network video consumer",
            ctx.sources.video.subscribe("network video consumer"),
            cancel.clone(),
            move |frame: &VideoFrame| {
                relay.publish(frame.clone());
                Ok(())
            },
        );

        let server = tokio::spawn(serve(
            listener,
            Arc::clone(&frames),
            cancel.clone(),
            Arc::clone(&stats),
        ));

        Ok(Self {
            frames,
            consumer,
            server: Some(server),
            cancel,
            local_addr,
            stats,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn total_connections(&self) -> u64 {
        self.stats.total_connections.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.stats.bytes_sent.load(Ordering::Relaxed)
    }
}

async fn serve(
    listener: TcpListener,
    frames: Arc<FrameDistributor<VideoFrame>>,
    cancel: CancellationToken,
    stats: Arc<NetworkStats>,
) {
    loop {
        let (socket, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Failed to accept network client: {}", e);
                    continue;
                }
            },
        };

        info!("Network client connected: {}", peer);
        stats.total_connections.fetch_add(1, Ordering::Relaxed);

        let subscription = frames.subscribe(format!("network client {}", peer));
        match stream_to_client(socket, subscription, &cancel, &stats).await {
            Ok(()) => info!("Network client {} disconnected", peer),
            Err(e) => info!("Network client {} dropped: {}", peer, e),
        }
    }

    debug!("Network listener stopped");
}

/// Write frames to one client, starting at the first SPS header so the stream is decodable
async fn stream_to_client(
    mut socket: TcpStream,
    mut subscription: FrameSubscription<VideoFrame>,
    cancel: &CancellationToken,
    stats: &NetworkStats,
) -> std::io::Result<()> {
    let mut streaming = false;

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            received = subscription.recv(FRAME_WAIT_TIMEOUT) => received,
        };

        let frame = match received {
            Received::Frame(frame) => frame,
            Received::TimedOut => continue,
            Received::Closed => return Ok(()),
        };

        if !streaming {
            if !frame.is_header() {
                continue;
            }
            debug!("First SPS header reached, streaming to client");
            streaming = true;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            written = socket.write_all(&frame.data) => written?,
        }

        stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        stats.bytes_sent.fetch_add(frame.len() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl Output for NetworkOutput {
    fn name(&self) -> OutputName {
        OutputName::Network
    }

    fn process_video_frame(&self, frame: &VideoFrame) -> Result<()> {
        self.frames.publish(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.consumer.close().await;
        if let Some(server) = self.server.take() {
            if let Err(e) = server.await {
                error!("Network server task ended abnormally: {}", e);
            }
        }
        info!("Network output closed");
        Ok(())
    }
}

impl Drop for NetworkOutput {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotionCamConfig;
    use crate::events::EventBus;
    use crate::frame::FrameType;
    use crate::outputs::FrameSources;
    use crate::transport::Dispatcher;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn context() -> OutputContext {
        let mut config = MotionCamConfig::default();
        config.network.enabled = true;
        // An OS-assigned port keeps parallel tests apart
        config.network.socket_port = 0;
        let (dispatcher, _) = Dispatcher::new();
        OutputContext {
            config,
            sources: FrameSources::new(),
            dispatcher,
            events: EventBus::default(),
        }
    }

    #[tokio::test]
    async fn test_streams_from_first_header() {
        let ctx = context();
        let mut output = NetworkOutput::start(&ctx).await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", output.local_addr().port()))
            .await
            .unwrap();
        for _ in 0..200 {
            if output.total_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(output.total_connections(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let frames = [
            VideoFrame::new(vec![1u8, 1], 0, 0.0, FrameType::PFrame),
            VideoFrame::new(vec![9u8, 9, 9], 1, 0.1, FrameType::SpsHeader),
            VideoFrame::new(vec![2u8], 2, 0.2, FrameType::IFrame),
        ];
        for frame in frames {
            ctx.sources.video.publish(frame);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut received = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, [9, 9, 9, 2]);

        output.close().await.unwrap();
        assert_eq!(output.bytes_sent(), 4);
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let ctx = context();
        let first = NetworkOutput::start(&ctx).await.unwrap();

        let mut clash = ctx.clone();
        clash.config.network.socket_port = first.local_addr().port();

        assert!(matches!(
            NetworkOutput::start(&clash).await,
            Err(crate::error::MotionCamError::Output(OutputError::BindFailed { .. }))
        ));
    }
}
