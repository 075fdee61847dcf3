//! UDP 수신 -- 소켓 바인드, 수신 워커, 인테이크 큐
//!
//! 입력 하나당 소켓 하나를 바인드하고, 설정된 수만큼의 수신 워커가
//! 같은 소켓(`Arc<UdpSocket>`)에서 데이터그램을 읽습니다.
//!
//! 수신 워커는 소켓 읽기에서만 대기합니다. 인테이크 큐가 가득 차면
//! 데이터그램을 즉시 버리고 드롭 카운터를 올립니다.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::FlowPipelineError;
use crate::stats::PipelineStats;

/// UDP 페이로드 최대 크기
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// 수신된 원시 데이터그램
///
/// 수신 워커가 생성하고 디코드 워커가 소비합니다.
#[derive(Debug, Clone)]
pub struct RawDatagram {
    /// 송신자 주소 (익스포터)
    pub exporter: SocketAddr,
    /// 수신 시각 (unix 초)
    pub time_received: u64,
    /// UDP 페이로드
    pub payload: Bytes,
}

impl RawDatagram {
    /// 현재 시각으로 새 데이터그램을 생성합니다.
    pub fn new(exporter: SocketAddr, payload: Bytes) -> Self {
        Self {
            exporter,
            time_received: unix_now(),
            payload,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 입력 하나의 유한 인테이크 큐 송신측
///
/// `offer()`는 절대 대기하지 않습니다. 큐가 가득 찼거나 닫혔으면
/// 데이터그램을 버리고 `false`를 반환합니다.
#[derive(Debug, Clone)]
pub struct IntakeQueue {
    input: usize,
    tx: mpsc::Sender<RawDatagram>,
    stats: Arc<PipelineStats>,
}

impl IntakeQueue {
    /// 용량 `capacity`의 큐를 생성하고 수신측을 함께 반환합니다.
    pub fn new(
        input: usize,
        capacity: usize,
        stats: Arc<PipelineStats>,
    ) -> (Self, mpsc::Receiver<RawDatagram>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { input, tx, stats }, rx)
    }

    /// 데이터그램을 큐에 넣습니다. 수락되면 `true`.
    pub fn offer(&self, datagram: RawDatagram) -> bool {
        self.stats.record_received(self.input);
        match self.tx.try_send(datagram) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                self.stats.record_dropped(self.input);
                debug!(
                    input = self.input,
                    exporter = %dropped.exporter,
                    "intake queue full, datagram dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.record_dropped(self.input);
                false
            }
        }
    }

    /// 입력 인덱스
    pub fn input(&self) -> usize {
        self.input
    }

    /// 큐 용량
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// 대기 중인 데이터그램 수
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// 큐가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 설정된 주소에 UDP 소켓을 바인드합니다.
pub async fn bind(listen: SocketAddr) -> Result<UdpSocket, FlowPipelineError> {
    UdpSocket::bind(listen)
        .await
        .map_err(|e| FlowPipelineError::Bind {
            addr: listen.to_string(),
            reason: e.to_string(),
        })
}

/// 수신 워커 루프
///
/// 취소되거나 소켓 에러가 발생하면 종료합니다. 종료 시 `queue`가
/// 드롭되므로, 모든 수신 워커가 끝나면 디코드 워커는 큐를 비운 뒤 종료합니다.
pub(crate) async fn receive_loop(
    worker: usize,
    socket: Arc<UdpSocket>,
    queue: IntakeQueue,
    cancel: CancellationToken,
) {
    let input = queue.input();
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    debug!(input, worker, "receive worker started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => {
                    trace!(input, worker, %peer, len, "datagram received");
                    queue.offer(RawDatagram::new(peer, Bytes::copy_from_slice(&buf[..len])));
                }
                Err(e) => {
                    error!(input, worker, error = %e, "socket receive failed, worker exiting");
                    break;
                }
            }
        }
    }

    debug!(input, worker, "receive worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn datagram(n: u8) -> RawDatagram {
        RawDatagram::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9995),
            Bytes::from(vec![n]),
        )
    }

    #[test]
    fn offer_beyond_capacity_drops_exactly_one() {
        let stats = Arc::new(PipelineStats::new(1));
        let (queue, _rx) = IntakeQueue::new(0, 4, Arc::clone(&stats));

        let accepted = (0..5).filter(|n| queue.offer(datagram(*n))).count();

        assert_eq!(accepted, 4);
        assert_eq!(stats.received(0), 5);
        assert_eq!(stats.dropped(0), 1);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn offer_to_closed_queue_is_dropped() {
        let stats = Arc::new(PipelineStats::new(1));
        let (queue, rx) = IntakeQueue::new(0, 4, Arc::clone(&stats));
        drop(rx);
        assert!(!queue.offer(datagram(1)));
        assert_eq!(stats.dropped(0), 1);
    }

    #[test]
    fn queue_preserves_order() {
        let stats = Arc::new(PipelineStats::new(1));
        let (queue, mut rx) = IntakeQueue::new(0, 8, stats);
        for n in 0..3 {
            queue.offer(datagram(n));
        }
        for n in 0..3 {
            assert_eq!(rx.try_recv().unwrap().payload[0], n);
        }
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 8);
    }

    #[test]
    fn raw_datagram_has_current_time() {
        let d = datagram(0);
        assert!(d.time_received > 1_600_000_000);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = taken.local_addr().unwrap();
        let err = bind(addr).await.unwrap_err();
        assert!(matches!(err, FlowPipelineError::Bind { .. }));
    }

    #[tokio::test]
    async fn receive_loop_forwards_until_cancelled() {
        let stats = Arc::new(PipelineStats::new(1));
        let (queue, mut rx) = IntakeQueue::new(0, 16, Arc::clone(&stats));
        let socket = Arc::new(bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(receive_loop(0, socket, queue, cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"hello", addr).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got.payload[..], b"hello");
        assert_eq!(got.exporter, sender.local_addr().unwrap());

        cancel.cancel();
        task.await.unwrap();
        // 워커가 끝나면 송신측이 모두 사라져 큐가 닫힘
        assert!(rx.recv().await.is_none());
        assert_eq!(stats.received(0), 1);
    }
}
