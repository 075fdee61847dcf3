//! 파이프라인 오케스트레이션 -- 수신/디코딩/전달의 전체 흐름을 관리합니다.
//!
//! [`FlowPipeline`]은 core의 [`Pipeline`](ironflow_core::pipeline::Pipeline) trait을 구현하여
//! `ironflow-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! input[i]: UdpSocket -> receive workers -> intake queue[i] -> decode workers ─┐
//!                                                                               ├-> outgoing -> consumer
//! inject() ────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # 생명주기
//! - `start()`: 모든 입력 소켓을 먼저 바인드합니다. 하나라도 실패하면
//!   아무것도 실행하지 않고 에러를 반환합니다.
//! - `stop()`: 수신 워커를 취소하고, 디코드 워커가 인테이크 큐를 비울 때까지
//!   drain timeout 한도 내에서 기다린 뒤 outgoing 큐를 닫습니다. 멱등적입니다.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ironflow_core::error::{IronflowError, PipelineError};
use ironflow_core::metrics as m;
use ironflow_core::pipeline::{HealthStatus, Pipeline};
use ironflow_core::types::FlowMessage;

use crate::config::PipelineConfig;
use crate::decoder::Decoder;
use crate::dispatch::{self, DecodeWorker};
use crate::error::FlowPipelineError;
use crate::listener::{self, IntakeQueue};
use crate::stats::PipelineStats;
use crate::template::TemplateStore;

/// outgoing 큐 점유율이 이 값을 넘으면 Degraded
const DEGRADED_OCCUPANCY: f64 = 0.9;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 생성됨, 아직 시작하지 않음
    Created,
    /// 실행 중
    Started,
    /// 정지 진행 중
    Stopping,
    /// 정지됨 (재시작 불가)
    Stopped,
}

/// 플로우 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use ironflow_flow_pipeline::{FlowPipelineBuilder, PipelineConfig};
///
/// let (mut pipeline, mut records) = FlowPipelineBuilder::new()
///     .config(PipelineConfig::default())
///     .build()?;
///
/// pipeline.start().await?;
/// while let Some(record) = records.recv().await {
///     // ...
/// }
/// ```
pub struct FlowPipeline {
    config: PipelineConfig,
    state: PipelineState,
    templates: Arc<TemplateStore>,
    stats: Arc<PipelineStats>,
    /// stop 완료 시 `None`이 되어 outgoing 큐가 닫힘
    outgoing_tx: Option<mpsc::Sender<FlowMessage>>,
    cancel: CancellationToken,
    receive_tasks: Vec<JoinHandle<()>>,
    decode_tasks: Vec<JoinHandle<()>>,
    local_addrs: Vec<SocketAddr>,
}

impl FlowPipeline {
    /// 현재 상태를 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Created => "created",
            PipelineState::Started => "started",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 카운터
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// 템플릿 저장소
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// 실제로 바인드된 입력 주소 (입력 순서, 시작 전에는 비어 있음)
    ///
    /// 포트 0으로 설정한 입력의 실제 포트를 확인할 때 사용합니다.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// outgoing 큐에 쌓인 레코드 수
    pub fn outgoing_len(&self) -> usize {
        self.outgoing_tx.as_ref().map_or(0, dispatch::outgoing_len)
    }

    /// 레코드를 outgoing 큐에 직접 넣습니다.
    ///
    /// 디코더를 거치지 않으며 레코드는 수정되지 않습니다.
    /// 큐가 가득 차면 대기합니다. 정지된 파이프라인에서는 실패합니다.
    pub async fn inject(&self, record: FlowMessage) -> Result<(), FlowPipelineError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or_else(|| FlowPipelineError::Channel("outgoing queue closed".to_owned()))?;
        tx.send(record)
            .await
            .map_err(|_| FlowPipelineError::Channel("outgoing queue closed".to_owned()))
    }

    /// 모든 입력 소켓을 바인드합니다. 하나라도 실패하면 이미 바인드한 소켓은 닫힙니다.
    async fn bind_all(&self) -> Result<Vec<Arc<tokio::net::UdpSocket>>, FlowPipelineError> {
        let mut sockets = Vec::with_capacity(self.config.inputs.len());
        for (index, input) in self.config.inputs.iter().enumerate() {
            let socket = listener::bind(input.listen).await.inspect_err(|e| {
                tracing::error!(input = index, listen = %input.listen, error = %e, "failed to bind input");
            })?;
            sockets.push(Arc::new(socket));
        }
        Ok(sockets)
    }

    /// 모든 워커의 종료를 기다리고, 시간 초과 시 남은 워커를 중단합니다.
    async fn join_workers(&mut self) {
        let mut tasks: Vec<JoinHandle<()>> = self
            .receive_tasks
            .drain(..)
            .chain(self.decode_tasks.drain(..))
            .collect();
        let timeout = self.config.drain_timeout();

        let joined = tokio::time::timeout(timeout, async {
            for task in tasks.iter_mut() {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        tracing::error!(error = %e, "pipeline worker panicked");
                    }
                }
            }
        })
        .await;

        if joined.is_err() {
            let abandoned = tasks.iter().filter(|t| !t.is_finished()).count();
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                abandoned,
                "drain timeout elapsed, aborting remaining workers"
            );
            for task in &tasks {
                task.abort();
            }
        }
    }
}

impl Pipeline for FlowPipeline {
    async fn start(&mut self) -> Result<(), IronflowError> {
        match self.state {
            PipelineState::Created => {}
            PipelineState::Started | PipelineState::Stopping => {
                return Err(PipelineError::AlreadyRunning.into());
            }
            PipelineState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "flow pipeline cannot be restarted after stop".to_owned(),
                )
                .into());
            }
        }
        let Some(outgoing) = self.outgoing_tx.clone() else {
            return Err(PipelineError::InitFailed("outgoing queue closed".to_owned()).into());
        };

        tracing::info!(inputs = self.config.inputs.len(), "starting flow pipeline");

        // 1. 소켓 바인드 (실패 시 아무것도 스폰하지 않음)
        let sockets = self.bind_all().await?;
        let local_addrs = sockets
            .iter()
            .map(|s| s.local_addr())
            .collect::<Result<Vec<_>, _>>()
            .map_err(FlowPipelineError::from)?;

        // 2. 입력별 인테이크 큐와 워커 스폰
        for (index, (input, socket)) in self.config.inputs.iter().zip(sockets).enumerate() {
            let (queue, intake_rx) =
                IntakeQueue::new(index, input.queue_size, Arc::clone(&self.stats));
            let intake = Arc::new(Mutex::new(intake_rx));

            for id in 0..input.decode_workers {
                let worker = DecodeWorker {
                    input: index,
                    id,
                    decoder: Decoder::from_kind(input.decoder),
                    templates: Arc::clone(&self.templates),
                    stats: Arc::clone(&self.stats),
                    intake: Arc::clone(&intake),
                    outgoing: outgoing.clone(),
                };
                self.decode_tasks.push(tokio::spawn(worker.run()));
            }

            // 송신측은 수신 워커만 보유
            for worker in 0..input.workers {
                self.receive_tasks.push(tokio::spawn(listener::receive_loop(
                    worker,
                    Arc::clone(&socket),
                    queue.clone(),
                    self.cancel.clone(),
                )));
            }

            tracing::info!(
                input = index,
                decoder = %input.decoder,
                listen = %local_addrs[index],
                workers = input.workers,
                decode_workers = input.decode_workers,
                queue_size = input.queue_size,
                "flow input started"
            );
        }

        self.local_addrs = local_addrs;
        self.state = PipelineState::Started;
        tracing::info!("flow pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), IronflowError> {
        match self.state {
            PipelineState::Stopped | PipelineState::Stopping => return Ok(()),
            PipelineState::Created => {
                self.outgoing_tx = None;
                self.state = PipelineState::Stopped;
                tracing::debug!("flow pipeline stopped before start");
                return Ok(());
            }
            PipelineState::Started => {}
        }

        tracing::info!("stopping flow pipeline");
        self.state = PipelineState::Stopping;

        // 1. 수신 워커 취소 -> 인테이크 송신측 해제
        self.cancel.cancel();

        // 2. 디코드 워커가 큐를 비울 때까지 대기 (drain timeout 한도)
        self.join_workers().await;

        // 3. 모든 워커 종료 후 outgoing 큐 닫기
        self.outgoing_tx = None;
        metrics::gauge!(m::FLOW_OUTGOING_QUEUE_SIZE).set(0.0);

        self.state = PipelineState::Stopped;
        tracing::info!(
            records_decoded = self.stats.records_decoded(),
            "flow pipeline stopped"
        );
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Started => {
                let exited = self.receive_tasks.iter().filter(|t| t.is_finished()).count();
                if exited > 0 {
                    return HealthStatus::Degraded(format!(
                        "{exited} receive worker(s) exited"
                    ));
                }

                let capacity = self.config.outgoing_queue_size.max(1) as f64;
                let occupancy = self.outgoing_len() as f64 / capacity;
                if occupancy > DEGRADED_OCCUPANCY {
                    HealthStatus::Degraded(format!(
                        "outgoing queue occupancy high: {:.1}%",
                        occupancy * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Created => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopping => HealthStatus::Unhealthy("stopping".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 플로우 파이프라인 빌더
///
/// 파이프라인과 outgoing 큐를 생성합니다.
pub struct FlowPipelineBuilder {
    config: PipelineConfig,
}

impl FlowPipelineBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// # Returns
    /// - `FlowPipeline`: 파이프라인 인스턴스
    /// - `mpsc::Receiver<FlowMessage>`: 정규화된 레코드 스트림.
    ///   파이프라인이 정지되고 큐가 비워지면 `None`으로 끝납니다.
    pub fn build(self) -> Result<(FlowPipeline, mpsc::Receiver<FlowMessage>), FlowPipelineError> {
        self.config.validate()?;

        let (outgoing_tx, outgoing_rx) = mpsc::channel(self.config.outgoing_queue_size);
        let stats = Arc::new(PipelineStats::new(self.config.inputs.len()));

        let pipeline = FlowPipeline {
            config: self.config,
            state: PipelineState::Created,
            templates: Arc::new(TemplateStore::new()),
            stats,
            outgoing_tx: Some(outgoing_tx),
            cancel: CancellationToken::new(),
            receive_tasks: Vec::new(),
            decode_tasks: Vec::new(),
            local_addrs: Vec::new(),
        };

        Ok((pipeline, outgoing_rx))
    }
}

impl Default for FlowPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecoderKind, InputConfig, PipelineConfigBuilder};
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback_config() -> PipelineConfig {
        PipelineConfigBuilder::new()
            .input(InputConfig::new(
                DecoderKind::Netflow,
                "127.0.0.1:0".parse().unwrap(),
            ))
            .outgoing_queue_size(10)
            .drain_timeout_secs(1)
            .build()
            .unwrap()
    }

    fn record(port: u16) -> FlowMessage {
        let mut msg = FlowMessage::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 1);
        msg.dst_port = port;
        msg
    }

    #[test]
    fn builder_creates_pipeline() {
        let (pipeline, _rx) = FlowPipelineBuilder::new().build().unwrap();
        assert_eq!(pipeline.state_name(), "created");
        assert!(pipeline.local_addrs().is_empty());
        assert_eq!(pipeline.stats().records_decoded(), 0);
        assert!(pipeline.templates().is_empty());
    }

    #[test]
    fn builder_with_invalid_config_fails() {
        let mut config = PipelineConfig::default();
        config.outgoing_queue_size = 0;
        let result = FlowPipelineBuilder::new().config(config).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pipeline_lifecycle() {
        let (mut pipeline, mut rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        assert!(pipeline.health_check().await.is_unhealthy());

        pipeline.start().await.unwrap();
        assert_eq!(pipeline.state_name(), "started");
        assert!(pipeline.health_check().await.is_healthy());
        assert_ne!(pipeline.local_addrs()[0].port(), 0);

        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
        assert!(pipeline.health_check().await.is_unhealthy());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let (mut pipeline, _rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        pipeline.start().await.unwrap();
        let err = pipeline.start().await.unwrap_err();
        assert!(matches!(
            err,
            IronflowError::Pipeline(PipelineError::AlreadyRunning)
        ));
        pipeline.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_after_stop_fails() {
        let (mut pipeline, _rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        pipeline.start().await.unwrap();
        pipeline.stop().await.unwrap();
        assert!(pipeline.start().await.is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (mut pipeline, _rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        pipeline.stop().await.unwrap();
        pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state_name(), "stopped");
    }

    #[tokio::test]
    async fn inject_before_start_is_delivered() {
        let (pipeline, mut rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        pipeline.inject(record(443)).await.unwrap();
        assert_eq!(pipeline.outgoing_len(), 1);
        assert_eq!(rx.recv().await.unwrap(), record(443));
    }

    #[tokio::test]
    async fn inject_after_stop_fails() {
        let (mut pipeline, _rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        pipeline.stop().await.unwrap();
        let err = pipeline.inject(record(1)).await.unwrap_err();
        assert!(matches!(err, FlowPipelineError::Channel(_)));
    }

    #[tokio::test]
    async fn full_outgoing_queue_degrades_health() {
        let (mut pipeline, _rx) = FlowPipelineBuilder::new()
            .config(loopback_config())
            .build()
            .unwrap();
        pipeline.start().await.unwrap();
        for port in 0..10 {
            pipeline.inject(record(port)).await.unwrap();
        }
        let health = pipeline.health_check().await;
        assert!(matches!(health, HealthStatus::Degraded(_)), "{health}");
        pipeline.stop().await.unwrap();
    }
}
