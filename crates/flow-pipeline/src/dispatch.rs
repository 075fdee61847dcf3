//! 디코드 워커 풀
//!
//! 입력 하나의 디코드 워커들은 인테이크 큐 수신측 하나를
//! `Arc<Mutex<Receiver>>`로 공유합니다. 각 워커는 데이터그램을 꺼내
//! 디코딩하고, 나온 레코드를 모두 공유 outgoing 큐에 넣습니다.
//!
//! outgoing 큐가 가득 차면 워커는 대기합니다 (backpressure).
//! 한 데이터그램의 레코드는 같은 워커가 연속으로 넣습니다.

use std::sync::Arc;
use std::time::Instant;

use ironflow_core::metrics as m;
use ironflow_core::types::FlowMessage;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use crate::decoder::{Decoder, FlowDecoder};
use crate::error::DecodeError;
use crate::listener::RawDatagram;
use crate::stats::PipelineStats;
use crate::template::TemplateStore;

/// 디코드 워커들이 공유하는 인테이크 큐 수신측
pub type SharedIntake = Arc<Mutex<mpsc::Receiver<RawDatagram>>>;

/// 디코드 워커
pub(crate) struct DecodeWorker {
    pub(crate) input: usize,
    pub(crate) id: usize,
    pub(crate) decoder: Decoder,
    pub(crate) templates: Arc<TemplateStore>,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) intake: SharedIntake,
    pub(crate) outgoing: mpsc::Sender<FlowMessage>,
}

impl DecodeWorker {
    /// 인테이크 큐가 닫히고 비워질 때까지 실행합니다.
    pub(crate) async fn run(self) {
        debug!(input = self.input, worker = self.id, decoder = self.decoder.name(), "decode worker started");

        loop {
            let next = {
                let mut rx = self.intake.lock().await;
                rx.recv().await
            };
            let Some(datagram) = next else {
                break;
            };
            if !self.process(datagram).await {
                break;
            }
        }

        debug!(input = self.input, worker = self.id, "decode worker stopped");
    }

    /// 데이터그램 하나를 처리합니다. outgoing 큐가 닫혔으면 `false`.
    async fn process(&self, datagram: RawDatagram) -> bool {
        let exporter = datagram.exporter.ip();

        let started = Instant::now();
        let output = self.decoder.decode(
            &datagram.payload,
            exporter,
            datagram.time_received,
            &self.templates,
        );
        metrics::histogram!(m::FLOW_DECODE_DURATION_SECONDS, m::LABEL_DECODER => self.decoder.name())
            .record(started.elapsed().as_secs_f64());

        for err in &output.errors {
            self.stats.record_decode_error(err);
            if let DecodeError::UnknownTemplate {
                domain,
                template_id,
            } = err
            {
                self.stats.record_missing_template(exporter);
                debug!(%exporter, domain, template_id, "data set for unknown template dropped");
            } else {
                debug!(%exporter, reason = %err.reason(), error = %err, "decode error");
            }
        }
        self.stats.record_templates_upserted(output.templates_upserted);
        self.stats.record_decoded(self.decoder.kind(), output.records.len());

        trace!(
            input = self.input,
            %exporter,
            records = output.records.len(),
            "datagram decoded"
        );

        for record in output.records {
            if self.outgoing.send(record).await.is_err() {
                warn!(input = self.input, worker = self.id, "outgoing queue closed, decode worker exiting");
                return false;
            }
        }
        metrics::gauge!(m::FLOW_OUTGOING_QUEUE_SIZE).set(outgoing_len(&self.outgoing) as f64);
        true
    }
}

/// outgoing 큐에 쌓인 레코드 수
pub(crate) fn outgoing_len(tx: &mpsc::Sender<FlowMessage>) -> usize {
    tx.max_capacity() - tx.capacity()
}
